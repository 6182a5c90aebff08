//! Taint analysis over `${{ ... }}` expressions.
//!
//! Each fragment in a scalar is parsed and walked bottom-up. Every maximal
//! property chain (`github.event.issue.title`, `needs.a.outputs['b']`, ...)
//! is matched against the [`UntrustedInputMap`]; chains that end on a leaf
//! of the map are reported.

use std::sync::Arc;

use actions_expressions::{Expr, Literal, SpannedExpr, fragments};
use actions_syntax::{Position, Scalar};

use crate::untrusted::{ANY_ELEMENT, ANY_PROPERTY, TrieNode, UntrustedInputMap};

/// A reference to untrusted input.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Taint {
    pub(crate) position: Position,
    /// The matched paths. More than one means an object filter fanned out.
    pub(crate) paths: Vec<String>,
}

impl Taint {
    pub(crate) fn message(&self) -> String {
        match self.paths.as_slice() {
            [path] => format!("Expression injection, \"{path}\" is potentially untrusted."),
            paths => format!(
                "Expression injection, object filter extracts potentially untrusted properties {}.",
                paths
                    .iter()
                    .map(|p| format!("\"{p}\""))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

struct Reached<'a> {
    node: &'a TrieNode,
    path: String,
}

pub(crate) struct TaintAnalyzer {
    untrusted: Arc<UntrustedInputMap>,
}

impl TaintAnalyzer {
    pub(crate) fn new(untrusted: Arc<UntrustedInputMap>) -> Self {
        Self { untrusted }
    }

    /// Returns every untrusted reference in `scalar`, left to right.
    pub(crate) fn analyze(&self, scalar: &Scalar) -> Vec<Taint> {
        let text = scalar.as_str();
        let mut taints = vec![];

        for fragment in fragments(text) {
            let expr = match fragment.expr {
                Ok(expr) => expr,
                Err(err) => {
                    tracing::debug!(
                        "skipping unparsable expression `{raw}`: {err}",
                        raw = &text[fragment.start..fragment.end]
                    );
                    continue;
                }
            };

            let mut chains = vec![];
            self.walk(&expr, &mut chains);

            taints.extend(chains.into_iter().map(|(offset, paths)| Taint {
                position: scalar.position_at(fragment.body + offset),
                paths,
            }));
        }

        taints
    }

    fn walk(&self, expr: &SpannedExpr<'_>, out: &mut Vec<(usize, Vec<String>)>) {
        match &expr.inner {
            Expr::Variable(_)
            | Expr::ObjectDeref { .. }
            | Expr::ArrayDeref { .. }
            | Expr::IndexAccess { .. } => {
                self.walk_chain_operands(expr, out);

                let paths = self
                    .reach(expr)
                    .into_iter()
                    .filter(|r| r.node.is_leaf())
                    .map(|r| r.path)
                    .collect::<Vec<_>>();

                if !paths.is_empty() {
                    out.push((expr.origin.offset, paths));
                }
            }
            _ => {
                for child in expr.children() {
                    self.walk(child, out);
                }
            }
        }
    }

    /// Walks the parts of a chain that aren't themselves links in it:
    /// index expressions, and a head that isn't a variable.
    fn walk_chain_operands(&self, expr: &SpannedExpr<'_>, out: &mut Vec<(usize, Vec<String>)>) {
        match &expr.inner {
            Expr::Variable(_) => {}
            Expr::ObjectDeref { receiver, .. } | Expr::ArrayDeref { receiver } => {
                self.walk_chain_operands(receiver, out)
            }
            Expr::IndexAccess { operand, index } => {
                self.walk_chain_operands(operand, out);
                self.walk(index, out);
            }
            _ => self.walk(expr, out),
        }
    }

    /// Returns the trie nodes reached by a chain.
    fn reach<'a>(&'a self, expr: &SpannedExpr<'_>) -> Vec<Reached<'a>> {
        match &expr.inner {
            Expr::Variable(ident) => self
                .untrusted
                .root(ident.as_str())
                .map(|node| Reached {
                    node,
                    path: ident.as_str().to_ascii_lowercase(),
                })
                .into_iter()
                .collect(),
            Expr::ObjectDeref { receiver, property } => self
                .reach(receiver)
                .into_iter()
                .filter_map(|r| follow_property(r, property.as_str()))
                .collect(),
            Expr::IndexAccess { operand, index } => match &index.inner {
                Expr::Literal(Literal::String(prop)) => self
                    .reach(operand)
                    .into_iter()
                    .filter_map(|r| follow_property(r, prop))
                    .collect(),
                _ => self
                    .reach(operand)
                    .into_iter()
                    .filter_map(follow_element)
                    .collect(),
            },
            Expr::ArrayDeref { receiver } => self
                .reach(receiver)
                .into_iter()
                .flat_map(|r| match r.node.child(ANY_ELEMENT) {
                    Some(node) => vec![Reached {
                        node,
                        path: format!("{}.{ANY_ELEMENT}", r.path),
                    }],
                    // An object filter over an object selects all of its
                    // properties.
                    None => r
                        .node
                        .named_children()
                        .map(|(name, node)| Reached {
                            node,
                            path: format!("{}.{name}", r.path),
                        })
                        .collect(),
                })
                .collect(),
            _ => vec![],
        }
    }
}

fn follow_property<'a>(from: Reached<'a>, prop: &str) -> Option<Reached<'a>> {
    let named = from
        .node
        .named_children()
        .find(|(name, _)| name.eq_ignore_ascii_case(prop));

    match named {
        Some((name, node)) => Some(Reached {
            node,
            path: format!("{}.{name}", from.path),
        }),
        None => from.node.child(ANY_PROPERTY).map(|node| Reached {
            node,
            path: format!("{}.{prop}", from.path),
        }),
    }
}

fn follow_element(from: Reached<'_>) -> Option<Reached<'_>> {
    // A computed index may select any element or property.
    let node = from
        .node
        .child(ANY_ELEMENT)
        .or_else(|| from.node.child(ANY_PROPERTY))?;

    Some(Reached {
        node,
        path: format!("{}.{ANY_ELEMENT}", from.path),
    })
}
