//! A small, owned YAML tree built from tree-sitter's concrete syntax tree.
//!
//! Anchors and aliases are resolved eagerly, and `<<` merge keys are
//! flattened into the mapping that contains them.

use std::collections::HashMap;

use tree_sitter::{Language, Node as TsNode, Parser};

use crate::{Position, SyntaxError};

/// How a scalar was written in the source document.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScalarStyle {
    /// `foo`
    Plain,
    /// `'foo'`
    SingleQuoted,
    /// `"foo"`
    DoubleQuoted,
    /// `|` block scalar.
    Literal,
    /// `>` block scalar.
    Folded,
}

/// A YAML scalar, decoded, along with where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Scalar {
    /// The decoded value.
    pub value: String,
    /// The position of the scalar's first character. For block scalars,
    /// this is the position of the `|` or `>` indicator.
    pub position: Position,
    /// How the scalar was written.
    pub style: ScalarStyle,
    /// Where runs of the decoded value start in the source, as
    /// `(offset into value, position)` pairs sorted by offset. Within a run
    /// each byte of the value sits one column after the previous one.
    origins: Vec<(usize, Position)>,
}

impl Scalar {
    /// Returns the decoded value.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Returns whether the scalar was quoted in the source.
    pub fn is_quoted(&self) -> bool {
        matches!(
            self.style,
            ScalarStyle::SingleQuoted | ScalarStyle::DoubleQuoted
        )
    }

    /// Returns whether the scalar is a block (`|` or `>`) scalar.
    pub fn is_block(&self) -> bool {
        matches!(self.style, ScalarStyle::Literal | ScalarStyle::Folded)
    }

    /// Returns whether the value contains a `${{ ... }}` expression.
    pub fn has_expression(&self) -> bool {
        self.value.contains("${{")
    }

    /// Maps a byte offset within the decoded value back to a position in
    /// the source document.
    ///
    /// Folded line breaks, indentation and escape sequences are accounted
    /// for. An escape sequence maps to its leading backslash.
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = offset.min(self.value.len());
        let run = self
            .origins
            .partition_point(|(start, _)| *start <= offset)
            .saturating_sub(1);

        match self.origins.get(run) {
            Some((start, origin)) => Position::new(origin.line, origin.column + (offset - start)),
            None => self.position,
        }
    }
}

/// A YAML mapping, with keys in document order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mapping {
    entries: Vec<(Scalar, Node)>,
}

impl Mapping {
    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entry(key).map(|(_, v)| v)
    }

    /// Returns the key and value for `key`, if present.
    pub fn entry(&self, key: &str) -> Option<&(Scalar, Node)> {
        self.entries.iter().find(|(k, _)| k.value == key)
    }

    /// Returns an iterator over the mapping's entries, in document order.
    pub fn iter(&self) -> impl Iterator<Item = &(Scalar, Node)> {
        self.entries.iter()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The different kinds of YAML node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// An absent value, e.g. `foo:` with nothing after it.
    Null,
    /// A scalar.
    Scalar(Scalar),
    /// A sequence.
    Sequence(Vec<Node>),
    /// A mapping.
    Mapping(Mapping),
}

/// A YAML node and its position.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// Where the node begins.
    pub position: Position,
    /// The node's contents.
    pub kind: NodeKind,
}

impl Node {
    fn null(position: Position) -> Self {
        Self {
            position,
            kind: NodeKind::Null,
        }
    }

    /// Returns the node as a scalar, if it is one.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match &self.kind {
            NodeKind::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the node as a mapping, if it is one.
    pub fn as_mapping(&self) -> Option<&Mapping> {
        match &self.kind {
            NodeKind::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the node as a sequence, if it is one.
    pub fn as_sequence(&self) -> Option<&[Node]> {
        match &self.kind {
            NodeKind::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Shorthand for looking up `key` when this node is a mapping.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_mapping().and_then(|m| m.get(key))
    }

    /// Returns whether the node is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self.kind, NodeKind::Null)
    }
}

/// Parses the first document in `source` into a [`Node`].
///
/// An empty document parses as a `Null` node.
pub fn parse(source: &str) -> Result<Node, SyntaxError> {
    let mut parser = Parser::new();
    let language: Language = tree_sitter_yaml::LANGUAGE.into();
    parser.set_language(&language)?;

    let tree = parser.parse(source, None).ok_or(SyntaxError::NoTree)?;
    let root = tree.root_node();

    if root.has_error() {
        return Err(SyntaxError::InvalidYaml(first_error(root)));
    }

    let mut cursor = root.walk();
    let document = root
        .named_children(&mut cursor)
        .find(|child| child.kind() == "document");

    let Some(document) = document else {
        return Ok(Node::null(Position::new(1, 1)));
    };

    let mut cursor = document.walk();
    let content = document
        .named_children(&mut cursor)
        .find(|child| !matches!(child.kind(), "comment" | "yaml_directive" | "tag_directive"));

    let mut builder = Builder {
        source,
        anchors: HashMap::new(),
    };

    match content {
        Some(content) => builder.node(content),
        None => Ok(Node::null(Position::from_point(document.start_position()))),
    }
}

fn first_error(node: TsNode<'_>) -> Position {
    if node.is_error() || node.is_missing() {
        return Position::from_point(node.start_position());
    }

    let mut cursor = node.walk();
    let children = node.children(&mut cursor).collect::<Vec<_>>();
    children
        .into_iter()
        .find(|child| child.has_error())
        .map_or_else(
            || Position::from_point(node.start_position()),
            first_error,
        )
}

struct Builder<'src> {
    source: &'src str,
    anchors: HashMap<String, Node>,
}

impl Builder<'_> {
    fn text(&self, node: TsNode<'_>) -> &str {
        &self.source[node.byte_range()]
    }

    fn node(&mut self, node: TsNode<'_>) -> Result<Node, SyntaxError> {
        let position = Position::from_point(node.start_position());

        match node.kind() {
            "block_node" | "flow_node" => {
                let mut anchor = None;
                let mut content = None;

                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    match child.kind() {
                        "anchor" => anchor = self.text(child).get(1..).map(str::to_string),
                        "tag" | "comment" => {}
                        _ => content = Some(child),
                    }
                }

                let built = match content {
                    Some(content) => self.node(content)?,
                    None => Node::null(position),
                };

                if let Some(anchor) = anchor {
                    self.anchors.insert(anchor, built.clone());
                }

                Ok(built)
            }
            "alias" => {
                let name = self.text(node).trim_start_matches('*');
                self.anchors
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SyntaxError::malformed(position, format!("unknown alias `{name}`")))
            }
            "block_mapping" | "flow_mapping" => self.mapping(node),
            "block_sequence" | "flow_sequence" => self.sequence(node),
            "plain_scalar" | "single_quote_scalar" | "double_quote_scalar" | "block_scalar" => {
                Ok(Node {
                    position,
                    kind: NodeKind::Scalar(self.scalar(node)),
                })
            }
            other => Err(SyntaxError::malformed(
                position,
                format!("unexpected YAML node `{other}`"),
            )),
        }
    }

    fn mapping(&mut self, node: TsNode<'_>) -> Result<Node, SyntaxError> {
        let position = Position::from_point(node.start_position());
        let mut entries: Vec<(Scalar, Node)> = vec![];
        let mut merges = vec![];

        let mut cursor = node.walk();
        let children = node.named_children(&mut cursor).collect::<Vec<_>>();

        for child in children {
            let (key, value) = match child.kind() {
                "block_mapping_pair" | "flow_pair" => {
                    let Some(key) = child.child_by_field_name("key") else {
                        continue;
                    };
                    (key, child.child_by_field_name("value"))
                }
                // A bare key in a flow mapping, e.g. `{ a, b: c }`.
                "flow_node" => (child, None),
                "comment" => continue,
                other => {
                    return Err(SyntaxError::malformed(
                        Position::from_point(child.start_position()),
                        format!("unexpected YAML node `{other}` in mapping"),
                    ));
                }
            };

            let key_node = self.node(key)?;
            let NodeKind::Scalar(key) = key_node.kind else {
                return Err(SyntaxError::malformed(
                    key_node.position,
                    "mapping keys must be scalars",
                ));
            };

            let value = match value {
                Some(value) => self.node(value)?,
                None => Node::null(key.position),
            };

            if key.value == "<<" && key.style == ScalarStyle::Plain {
                merges.push(value);
            } else {
                entries.push((key, value));
            }
        }

        // Explicit keys win over merged ones, and earlier merges win over
        // later ones.
        for merge in merges {
            let merged = match merge.kind {
                NodeKind::Mapping(mapping) => vec![mapping],
                NodeKind::Sequence(items) => items
                    .into_iter()
                    .filter_map(|item| match item.kind {
                        NodeKind::Mapping(mapping) => Some(mapping),
                        _ => None,
                    })
                    .collect(),
                _ => {
                    return Err(SyntaxError::malformed(
                        merge.position,
                        "merge key value must be a mapping",
                    ));
                }
            };

            for (key, value) in merged.into_iter().flat_map(|m| m.entries) {
                if !entries.iter().any(|(k, _)| k.value == key.value) {
                    entries.push((key, value));
                }
            }
        }

        Ok(Node {
            position,
            kind: NodeKind::Mapping(Mapping { entries }),
        })
    }

    fn sequence(&mut self, node: TsNode<'_>) -> Result<Node, SyntaxError> {
        let position = Position::from_point(node.start_position());
        let mut items = vec![];

        let mut cursor = node.walk();
        let children = node.named_children(&mut cursor).collect::<Vec<_>>();

        for child in children {
            match child.kind() {
                "block_sequence_item" => {
                    let mut cursor = child.walk();
                    let content = child
                        .named_children(&mut cursor)
                        .find(|c| c.kind() != "comment");

                    items.push(match content {
                        Some(content) => self.node(content)?,
                        None => Node::null(Position::from_point(child.start_position())),
                    });
                }
                "flow_node" => items.push(self.node(child)?),
                // A single-pair mapping inside a flow sequence, e.g. `[a: b]`.
                "flow_pair" => items.push(self.mapping_from_pair(child)?),
                "comment" => {}
                other => {
                    return Err(SyntaxError::malformed(
                        Position::from_point(child.start_position()),
                        format!("unexpected YAML node `{other}` in sequence"),
                    ));
                }
            }
        }

        Ok(Node {
            position,
            kind: NodeKind::Sequence(items),
        })
    }

    fn mapping_from_pair(&mut self, pair: TsNode<'_>) -> Result<Node, SyntaxError> {
        let position = Position::from_point(pair.start_position());
        let key = match pair.child_by_field_name("key") {
            Some(key) => self.node(key)?,
            None => return Ok(Node::null(position)),
        };
        let NodeKind::Scalar(key) = key.kind else {
            return Err(SyntaxError::malformed(position, "mapping keys must be scalars"));
        };
        let value = match pair.child_by_field_name("value") {
            Some(value) => self.node(value)?,
            None => Node::null(position),
        };

        Ok(Node {
            position,
            kind: NodeKind::Mapping(Mapping {
                entries: vec![(key, value)],
            }),
        })
    }

    fn scalar(&self, node: TsNode<'_>) -> Scalar {
        let raw = self.text(node);
        let position = Position::from_point(node.start_position());

        let style = match node.kind() {
            "single_quote_scalar" => ScalarStyle::SingleQuoted,
            "double_quote_scalar" => ScalarStyle::DoubleQuoted,
            "block_scalar" if raw.starts_with('>') => ScalarStyle::Folded,
            "block_scalar" => ScalarStyle::Literal,
            _ => ScalarStyle::Plain,
        };

        let value = match style {
            ScalarStyle::Plain if !raw.contains('\n') => raw.to_string(),
            _ => serde_yaml::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string()),
        };

        // The part of the source the value is decoded from, and where it
        // starts.
        let (body, start) = match style {
            ScalarStyle::Plain => (raw, position),
            ScalarStyle::SingleQuoted | ScalarStyle::DoubleQuoted => (
                raw.get(1..raw.len().saturating_sub(1)).unwrap_or_default(),
                Position::new(position.line, position.column + 1),
            ),
            ScalarStyle::Literal | ScalarStyle::Folded => (
                raw.split_once('\n').map_or("", |(_, content)| content),
                Position::new(position.line + 1, 1),
            ),
        };

        Scalar {
            origins: origins(&value, body, start, style),
            value,
            position,
            style,
        }
    }
}

/// Walks a scalar's source text alongside its decoded value.
struct SourceCursor<'a> {
    rest: &'a str,
    position: Position,
}

impl SourceCursor<'_> {
    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.rest = &self.rest[c.len_utf8()..];
        if c == '\n' {
            self.position = Position::new(self.position.line + 1, 1);
        } else {
            self.position.column += c.len_utf8();
        }
        Some(c)
    }

    fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn skip_blanks(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.bump();
        }
    }
}

/// Lines up each character of `value` with the source character it was
/// decoded from, and records where the two stop advancing in step.
fn origins(
    value: &str,
    body: &str,
    start: Position,
    style: ScalarStyle,
) -> Vec<(usize, Position)> {
    let mut source = SourceCursor {
        rest: body,
        position: start,
    };
    let mut origins: Vec<(usize, Position)> = vec![];

    for (offset, c) in value.char_indices() {
        let origin = loop {
            let here = source.position;
            let Some(next) = source.peek() else {
                break here;
            };

            if style == ScalarStyle::DoubleQuoted && next == '\\' {
                source.bump();
                match source.bump() {
                    // An escaped line break joins the lines without a space.
                    Some('\n') => {
                        source.skip_blanks();
                        continue;
                    }
                    Some('x') => source.skip(2),
                    Some('u') => source.skip(4),
                    Some('U') => source.skip(8),
                    _ => {}
                }
                break here;
            }

            if next == c {
                source.bump();
                if style == ScalarStyle::SingleQuoted && c == '\'' && source.peek() == Some('\'') {
                    source.bump();
                }
                break here;
            }

            // A line break folded into a space.
            if next == '\n' && c == ' ' {
                source.bump();
                break here;
            }

            // Indentation, or whitespace that folding dropped.
            if next.is_whitespace() {
                source.bump();
                continue;
            }

            if !c.is_whitespace() {
                source.bump();
            }
            break here;
        };

        let in_step = origins.last().is_some_and(|(run, at)| {
            at.line == origin.line && at.column + (offset - run) == origin.column
        });
        if !in_step {
            origins.push((offset, origin));
        }
    }

    if origins.is_empty() {
        origins.push((0, start));
    }

    origins
}
