//! Parsing for the `${{ ... }}` expression language embedded in workflows.
//!
//! Every node in the parsed tree carries an [`Origin`] relative to the
//! start of the text it was parsed from, so that callers can map findings
//! back into the enclosing document.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::{borrow::Cow, ops::Deref};

use itertools::Itertools as _;
use pest::{
    Parser as _,
    error::LineColLocation,
    iterators::{Pair, Pairs},
};
use thiserror::Error;

use self::parser::{ExprParser, Rule};

pub mod fragment;

pub use fragment::{Fragment, Fragments, fragments};

// Isolates the ExprParser, Rule and other generated types
// so that we can do `missing_docs` at the top-level.
// See: https://github.com/pest-parser/pest/issues/326
mod parser {
    use pest_derive::Parser;

    /// A parser for the workflow expression language.
    #[derive(Parser)]
    #[grammar = "expr.pest"]
    pub struct ExprParser;
}

/// An error produced while parsing an expression.
#[derive(Debug, Error, PartialEq)]
#[error("invalid expression at {line}:{column}: {message}")]
pub struct ParseError {
    /// A human-readable description of the problem.
    pub message: String,
    /// The (1-based) line the error occurred on.
    pub line: usize,
    /// The (1-based) column the error occurred on.
    pub column: usize,
}

impl ParseError {
    fn malformed(pair: &Pair<'_, Rule>) -> Self {
        let (line, column) = pair.line_col();
        Self {
            message: format!("malformed parse tree near `{}`", pair.as_str()),
            line,
            column,
        }
    }
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let (line, column) = match err.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };

        Self {
            message: err.variant.message().into_owned(),
            line,
            column,
        }
    }
}

/// The location of an expression node, relative to the parsed text.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Origin {
    /// The (1-based) line.
    pub line: usize,
    /// The (1-based) column, in characters.
    pub column: usize,
    /// The byte offset.
    pub offset: usize,
}

impl Origin {
    fn of(pair: &Pair<'_, Rule>) -> Self {
        let (line, column) = pair.line_col();
        Self {
            line,
            column,
            offset: pair.as_span().start(),
        }
    }
}

/// A function name in an expression.
///
/// Function names are case-insensitive.
#[derive(Debug)]
pub struct Function<'src>(&'src str);

impl Function<'_> {
    /// Returns the function name as written.
    pub fn as_str(&self) -> &str {
        self.0
    }
}

impl PartialEq for Function<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl PartialEq<str> for Function<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

/// A variable or property name in an expression.
///
/// Identifiers are case-insensitive.
#[derive(Debug)]
pub struct Identifier<'src>(&'src str);

impl Identifier<'_> {
    /// Returns the identifier as written.
    pub fn as_str(&self) -> &str {
        self.0
    }
}

impl PartialEq for Identifier<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl PartialEq<str> for Identifier<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

/// A literal value.
#[derive(Debug, PartialEq)]
pub enum Literal<'src> {
    /// A number literal.
    Number(f64),
    /// A string literal, with `''` escapes already collapsed.
    String(Cow<'src, str>),
    /// A boolean literal.
    Boolean(bool),
    /// The `null` literal.
    Null,
}

impl<'src> Literal<'src> {
    /// Returns a string representation of the literal.
    ///
    /// String literals are returned without their surrounding quotes.
    pub fn as_str(&self) -> Cow<'src, str> {
        match self {
            Literal::String(s) => s.clone(),
            Literal::Number(n) => Cow::Owned(n.to_string()),
            Literal::Boolean(b) => Cow::Owned(b.to_string()),
            Literal::Null => Cow::Borrowed("null"),
        }
    }
}

/// Binary operators.
#[derive(Debug, PartialEq)]
pub enum BinOp {
    /// `expr && expr`
    And,
    /// `expr || expr`
    Or,
    /// `expr == expr`
    Eq,
    /// `expr != expr`
    Neq,
    /// `expr > expr`
    Gt,
    /// `expr >= expr`
    Ge,
    /// `expr < expr`
    Lt,
    /// `expr <= expr`
    Le,
}

/// Unary operators.
#[derive(Debug, PartialEq)]
pub enum UnOp {
    /// `!expr`
    Not,
}

/// An expression node.
#[derive(Debug, PartialEq)]
pub enum Expr<'src> {
    /// A literal value.
    Literal(Literal<'src>),
    /// A bare variable (context name), e.g. `github`.
    Variable(Identifier<'src>),
    /// A property dereference, e.g. `.actor` in `github.actor`.
    ObjectDeref {
        /// The expression being dereferenced.
        receiver: Box<SpannedExpr<'src>>,
        /// The property name.
        property: Identifier<'src>,
    },
    /// An object filter, e.g. `.*` in `github.event.commits.*`.
    ArrayDeref {
        /// The expression being filtered.
        receiver: Box<SpannedExpr<'src>>,
    },
    /// An index access, e.g. `[0]` or `['title']`.
    IndexAccess {
        /// The expression being indexed.
        operand: Box<SpannedExpr<'src>>,
        /// The index expression.
        index: Box<SpannedExpr<'src>>,
    },
    /// A function call.
    FuncCall {
        /// The function name, e.g. `contains` in `contains(a, b)`.
        func: Function<'src>,
        /// The call's arguments.
        args: Vec<SpannedExpr<'src>>,
    },
    /// A binary operation.
    BinOp {
        /// The LHS of the binop.
        lhs: Box<SpannedExpr<'src>>,
        /// The binary operator.
        op: BinOp,
        /// The RHS of the binop.
        rhs: Box<SpannedExpr<'src>>,
    },
    /// A unary operation. Negation (`!`) is currently the only `UnOp`.
    UnOp {
        /// The unary operator.
        op: UnOp,
        /// The operand.
        expr: Box<SpannedExpr<'src>>,
    },
}

/// An expression node along with its origin.
#[derive(Debug, PartialEq)]
pub struct SpannedExpr<'src> {
    /// Where this node begins. Property chains begin at their head,
    /// so `github.event.issue` begins at `github`.
    pub origin: Origin,
    /// The node itself.
    pub inner: Expr<'src>,
}

impl<'src> Deref for SpannedExpr<'src> {
    type Target = Expr<'src>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'src> SpannedExpr<'src> {
    fn new(origin: Origin, inner: Expr<'src>) -> Self {
        Self { origin, inner }
    }

    /// Returns this node's direct children, in source order.
    pub fn children(&self) -> Vec<&SpannedExpr<'src>> {
        match &self.inner {
            Expr::Literal(_) | Expr::Variable(_) => vec![],
            Expr::ObjectDeref { receiver, .. } | Expr::ArrayDeref { receiver } => {
                vec![receiver]
            }
            Expr::IndexAccess { operand, index } => vec![operand, index],
            Expr::FuncCall { args, .. } => args.iter().collect(),
            Expr::BinOp { lhs, rhs, .. } => vec![lhs, rhs],
            Expr::UnOp { expr, .. } => vec![expr],
        }
    }

    /// Returns the dotted path of a pure property chain, e.g.
    /// `github.event.issue.title` for `github.event['issue'].title`.
    ///
    /// Object filters and non-literal indices render as `*`. Returns `None`
    /// for anything that isn't rooted at a variable.
    pub fn context_path(&self) -> Option<String> {
        match &self.inner {
            Expr::Variable(ident) => Some(ident.as_str().to_string()),
            Expr::ObjectDeref { receiver, property } => receiver
                .context_path()
                .map(|head| format!("{head}.{prop}", prop = property.as_str())),
            Expr::ArrayDeref { receiver } => receiver.context_path().map(|head| head + ".*"),
            Expr::IndexAccess { operand, index } => {
                let head = operand.context_path()?;
                match &index.inner {
                    Expr::Literal(Literal::String(prop)) => Some(format!("{head}.{prop}")),
                    _ => Some(head + ".*"),
                }
            }
            _ => None,
        }
    }
}

impl<'src> Expr<'src> {
    /// Parses a standalone expression, e.g. the contents of a bare `if:`.
    pub fn parse(expr: &'src str) -> Result<SpannedExpr<'src>, ParseError> {
        let mut pairs = ExprParser::parse(Rule::expression, expr)?;
        let root = take(&mut pairs, expr)?;
        let mut inner = root.into_inner();
        let or_expr = take(&mut inner, expr)?;

        build(or_expr)
    }

    /// Parses the body of a `${{ ... }}` fragment, i.e. the text
    /// immediately following `${{`.
    ///
    /// On success, returns the expression along with the number of bytes
    /// consumed, including the closing `}}`.
    pub fn parse_fragment(body: &'src str) -> Result<(SpannedExpr<'src>, usize), ParseError> {
        let mut pairs = ExprParser::parse(Rule::fragment, body)?;
        let root = take(&mut pairs, body)?;
        let consumed = root.as_span().end();
        let mut inner = root.into_inner();
        let or_expr = take(&mut inner, body)?;

        Ok((build(or_expr)?, consumed))
    }
}

fn take<'src>(pairs: &mut Pairs<'src, Rule>, src: &str) -> Result<Pair<'src, Rule>, ParseError> {
    pairs.next().ok_or_else(|| ParseError {
        message: format!("unexpected end of parse tree in `{src}`"),
        line: 1,
        column: 1,
    })
}

fn next_inner<'src>(
    parent: &Pair<'src, Rule>,
    pairs: &mut Pairs<'src, Rule>,
) -> Result<Pair<'src, Rule>, ParseError> {
    pairs.next().ok_or_else(|| ParseError::malformed(parent))
}

// The grammar isn't left-recursive, so rules like
// `or_expr = { and_expr ~ ("||" ~ and_expr)* }` produce flat, many-headed
// pairs. We punch single pairs down to their primitive node and fold the
// many-headed ones to the left.
fn build(pair: Pair<'_, Rule>) -> Result<SpannedExpr<'_>, ParseError> {
    let origin = Origin::of(&pair);

    match pair.as_rule() {
        Rule::or_expr | Rule::and_expr => {
            let op = || match pair.as_rule() {
                Rule::or_expr => BinOp::Or,
                _ => BinOp::And,
            };
            let mut pairs = pair.clone().into_inner();
            let lhs = build(next_inner(&pair, &mut pairs)?)?;
            pairs.try_fold(lhs, |lhs, next| {
                Ok(SpannedExpr::new(
                    origin,
                    Expr::BinOp {
                        lhs: lhs.into(),
                        op: op(),
                        rhs: build(next)?.into(),
                    },
                ))
            })
        }
        Rule::eq_expr | Rule::comp_expr => {
            // Both capture their operator, so we fold over
            // (operator, operand) two-tuples.
            let mut pairs = pair.clone().into_inner();
            let lhs = build(next_inner(&pair, &mut pairs)?)?;

            let chunks = pairs.chunks(2);
            chunks.into_iter().try_fold(lhs, |lhs, mut chunk| {
                let (Some(op), Some(rhs)) = (chunk.next(), chunk.next()) else {
                    return Err(ParseError::malformed(&pair));
                };

                let op = match op.as_str() {
                    "==" => BinOp::Eq,
                    "!=" => BinOp::Neq,
                    ">" => BinOp::Gt,
                    ">=" => BinOp::Ge,
                    "<" => BinOp::Lt,
                    "<=" => BinOp::Le,
                    _ => return Err(ParseError::malformed(&op)),
                };

                Ok(SpannedExpr::new(
                    origin,
                    Expr::BinOp {
                        lhs: lhs.into(),
                        op,
                        rhs: build(rhs)?.into(),
                    },
                ))
            })
        }
        Rule::unary_expr => {
            let mut pairs = pair.clone().into_inner();
            let first = next_inner(&pair, &mut pairs)?;

            match first.as_rule() {
                Rule::unary_op => Ok(SpannedExpr::new(
                    origin,
                    Expr::UnOp {
                        op: UnOp::Not,
                        expr: build(next_inner(&pair, &mut pairs)?)?.into(),
                    },
                )),
                _ => build(first),
            }
        }
        Rule::postfix_expr => {
            let mut pairs = pair.clone().into_inner();
            let head = build(next_inner(&pair, &mut pairs)?)?;

            // Chains keep the origin of their head, which is what
            // callers want to point at when reporting a full reference.
            let origin = head.origin;
            pairs.try_fold(head, |receiver, accessor| {
                let inner = match accessor.as_rule() {
                    Rule::array_deref => Expr::ArrayDeref {
                        receiver: receiver.into(),
                    },
                    Rule::object_deref => {
                        let mut inner = accessor.clone().into_inner();
                        let property = next_inner(&accessor, &mut inner)?;
                        Expr::ObjectDeref {
                            receiver: receiver.into(),
                            property: Identifier(property.as_str()),
                        }
                    }
                    Rule::index_access => {
                        let mut inner = accessor.clone().into_inner();
                        let index = build(next_inner(&accessor, &mut inner)?)?;
                        Expr::IndexAccess {
                            operand: receiver.into(),
                            index: index.into(),
                        }
                    }
                    _ => return Err(ParseError::malformed(&accessor)),
                };

                Ok(SpannedExpr::new(origin, inner))
            })
        }
        Rule::function_call => {
            let mut pairs = pair.clone().into_inner();
            let name = next_inner(&pair, &mut pairs)?;
            let args = pairs.map(build).collect::<Result<_, _>>()?;

            Ok(SpannedExpr::new(
                origin,
                Expr::FuncCall {
                    func: Function(name.as_str()),
                    args,
                },
            ))
        }
        Rule::variable => Ok(SpannedExpr::new(
            origin,
            Expr::Variable(Identifier(pair.as_str())),
        )),
        Rule::null => Ok(SpannedExpr::new(origin, Expr::Literal(Literal::Null))),
        Rule::boolean => Ok(SpannedExpr::new(
            origin,
            Expr::Literal(Literal::Boolean(pair.as_str() == "true")),
        )),
        Rule::number => {
            let raw = pair.as_str();
            let number = match raw.strip_prefix("0x") {
                Some(hex) => i64::from_str_radix(hex, 16).map(|n| n as f64).ok(),
                None => raw.parse::<f64>().ok(),
            };

            match number {
                Some(n) => Ok(SpannedExpr::new(origin, Expr::Literal(Literal::Number(n)))),
                None => Err(ParseError::malformed(&pair)),
            }
        }
        Rule::string => {
            let mut pairs = pair.clone().into_inner();
            let raw = next_inner(&pair, &mut pairs)?.as_str();
            let value = if raw.contains("''") {
                Cow::Owned(raw.replace("''", "'"))
            } else {
                Cow::Borrowed(raw)
            };

            Ok(SpannedExpr::new(
                origin,
                Expr::Literal(Literal::String(value)),
            ))
        }
        _ => Err(ParseError::malformed(&pair)),
    }
}

#[cfg(test)]
mod tests {
    use pest::Parser as _;
    use pretty_assertions::assert_eq;

    use super::{BinOp, Expr, ExprParser, Function, Literal, Origin, Rule, UnOp};

    #[test]
    fn test_function_eq() {
        let func = Function("foo");
        assert_eq!(&func, "foo");
        assert_eq!(&func, "FOO");
        assert_eq!(func, Function("Foo"));
    }

    #[test]
    fn test_parse_string_rule() {
        let cases = &[
            ("''", ""),
            ("' '", " "),
            ("''''", "''"),
            ("'test'", "test"),
            ("'escaping '' works'", "escaping '' works"),
        ];

        for (case, expected) in cases {
            let s = ExprParser::parse(Rule::string, case)
                .unwrap()
                .next()
                .unwrap();

            assert_eq!(s.into_inner().next().unwrap().as_str(), *expected);
        }
    }

    #[test]
    fn test_parse_literals() {
        let cases = &[
            ("null", Literal::Null),
            ("true", Literal::Boolean(true)),
            ("false", Literal::Boolean(false)),
            ("42", Literal::Number(42.0)),
            ("-1.5", Literal::Number(-1.5)),
            ("0xff", Literal::Number(255.0)),
            ("'it''s'", Literal::String("it's".into())),
        ];

        for (case, expected) in cases {
            let expr = Expr::parse(case).unwrap();
            assert_eq!(expr.inner, Expr::Literal(expected.clone_literal()));
        }
    }

    impl Literal<'_> {
        fn clone_literal(&self) -> Self {
            match self {
                Literal::Number(n) => Literal::Number(*n),
                Literal::String(s) => Literal::String(s.clone().into_owned().into()),
                Literal::Boolean(b) => Literal::Boolean(*b),
                Literal::Null => Literal::Null,
            }
        }
    }

    #[test]
    fn test_parse_property_chain() {
        let expr = Expr::parse("github.event.issue.title").unwrap();

        let Expr::ObjectDeref { receiver, property } = &expr.inner else {
            panic!("expected an object deref, got {expr:?}");
        };
        assert_eq!(property, "title");
        assert!(matches!(receiver.inner, Expr::ObjectDeref { .. }));
        assert_eq!(
            expr.context_path().as_deref(),
            Some("github.event.issue.title")
        );
    }

    #[test]
    fn test_context_path() {
        let cases = &[
            ("github", Some("github")),
            ("github.event['issue'].title", Some("github.event.issue.title")),
            ("github.event.commits.*.message", Some("github.event.commits.*.message")),
            ("github.event.commits[0].message", Some("github.event.commits.*.message")),
            ("fromJSON(x).foo", None),
            ("'literal'", None),
        ];

        for (case, expected) in cases {
            let expr = Expr::parse(case).unwrap();
            assert_eq!(expr.context_path().as_deref(), *expected, "{case}");
        }
    }

    #[test]
    fn test_parse_operators() {
        let expr = Expr::parse("!a && b == 'c' || d").unwrap();

        let Expr::BinOp { lhs, op, .. } = &expr.inner else {
            panic!("expected a binop, got {expr:?}");
        };
        assert_eq!(op, &BinOp::Or);

        let Expr::BinOp { lhs, op, rhs } = &lhs.inner else {
            panic!("expected a binop, got {lhs:?}");
        };
        assert_eq!(op, &BinOp::And);
        assert!(matches!(lhs.inner, Expr::UnOp { op: UnOp::Not, .. }));
        assert!(matches!(rhs.inner, Expr::BinOp { op: BinOp::Eq, .. }));
    }

    #[test]
    fn test_parse_call() {
        let expr = Expr::parse("contains(github.actor, '[bot]')").unwrap();

        let Expr::FuncCall { func, args } = &expr.inner else {
            panic!("expected a call, got {expr:?}");
        };
        assert_eq!(func, "CONTAINS");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].context_path().as_deref(), Some("github.actor"));
    }

    #[test]
    fn test_origins() {
        let expr = Expr::parse("a ==\n  github.head_ref").unwrap();

        let Expr::BinOp { rhs, .. } = &expr.inner else {
            panic!("expected a binop, got {expr:?}");
        };
        assert_eq!(
            rhs.origin,
            Origin {
                line: 2,
                column: 3,
                offset: 7
            }
        );
    }

    #[test]
    fn test_parse_fragment() {
        let body = " github.event.issue.title }} and more";
        let (expr, consumed) = Expr::parse_fragment(body).unwrap();

        assert_eq!(&body[..consumed], " github.event.issue.title }}");
        assert_eq!(expr.origin.offset, 1);
        assert_eq!(expr.origin.column, 2);
    }

    #[test]
    fn test_parse_fragment_string_with_braces() {
        let body = "format('}}{0}', a) }}";
        let (_, consumed) = Expr::parse_fragment(body).unwrap();
        assert_eq!(consumed, body.len());
    }

    #[test]
    fn test_parse_invalid() {
        for case in ["", "a ==", "github.", "(a", "foo(", "a ||| b"] {
            assert!(Expr::parse(case).is_err(), "{case} should not parse");
        }

        assert!(Expr::parse_fragment(" github.actor ").is_err());
    }
}
