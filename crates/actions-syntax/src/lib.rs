//! Position-preserving models for CI workflow definitions.
//!
//! Unlike a plain `serde` model, every scalar in the tree produced here
//! remembers where it came from, so that consumers can point at the exact
//! line and column of a problem.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

pub mod workflow;
pub mod yaml;

pub use workflow::{
    Container, Credentials, Env, EnvVar, Input, Job, Matrix, RunsOn, Step, StepBody, Trigger,
    Workflow,
};
pub use yaml::{Mapping, Node, NodeKind, Scalar, ScalarStyle};

/// A location in a source document.
///
/// Both fields are 1-based; columns count bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    /// The line.
    pub line: usize,
    /// The column.
    pub column: usize,
}

impl Position {
    /// Creates a new position.
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    pub(crate) fn from_point(point: tree_sitter::Point) -> Self {
        Self {
            line: point.row + 1,
            column: point.column + 1,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Possible errors when loading a workflow.
#[derive(Error, Debug)]
pub enum SyntaxError {
    /// The tree-sitter backend couldn't accept the YAML grammar.
    #[error("malformed or unsupported tree-sitter grammar")]
    InvalidLanguage(#[from] tree_sitter::LanguageError),
    /// tree-sitter didn't produce a tree at all.
    #[error("YAML parser produced no syntax tree")]
    NoTree,
    /// The input isn't valid YAML.
    #[error("input is not valid YAML (near {0})")]
    InvalidYaml(Position),
    /// The input is valid YAML, but not a valid workflow.
    #[error("{position}: {message}")]
    Malformed {
        /// Where the problem is.
        position: Position,
        /// What the problem is.
        message: String,
    },
    /// The input couldn't be read.
    #[error("couldn't read {path}")]
    Io {
        /// The path being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl SyntaxError {
    pub(crate) fn malformed(position: Position, message: impl Into<String>) -> Self {
        Self::Malformed {
            position,
            message: message.into(),
        }
    }
}
