//! Models for findings.

use actions_syntax::Position;
use camino::Utf8PathBuf;

/// A single problem reported by a rule.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Finding {
    /// The identifier of the rule that produced this finding.
    pub(crate) rule: &'static str,
    pub(crate) message: String,
    /// Where the problem is. `0:0` means the finding isn't tied to a
    /// particular place in the file.
    pub(crate) position: Position,
    /// The file the finding belongs to. Only known after aggregation.
    pub(crate) path: Option<Utf8PathBuf>,
}

impl Finding {
    pub(crate) fn new(rule: &'static str, position: Position, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            position,
            path: None,
        }
    }

    /// Attaches the finding to a file.
    pub(crate) fn at_path(self, path: Utf8PathBuf) -> Self {
        Self {
            path: Some(path),
            ..self
        }
    }

    pub(crate) fn path(&self) -> &str {
        self.path.as_ref().map_or("", |p| p.as_str())
    }
}
