//! Extraction of `${{ ... }}` fragments from arbitrary text.

use crate::{Expr, ParseError, SpannedExpr};

/// A single `${{ ... }}` occurrence within some text.
#[derive(Debug)]
pub struct Fragment<'src> {
    /// The byte offset of the opening `${{`.
    pub start: usize,
    /// The byte offset of the fragment's body, i.e. just after `${{`.
    pub body: usize,
    /// The byte offset just past the closing `}}`.
    pub end: usize,
    /// The parsed expression, or the reason it didn't parse.
    pub expr: Result<SpannedExpr<'src>, ParseError>,
}

impl Fragment<'_> {
    /// Returns the raw text of the fragment, including its delimiters.
    pub fn as_str<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// An iterator over the fragments in a piece of text.
pub struct Fragments<'src> {
    text: &'src str,
    cursor: usize,
}

/// Returns an iterator over every `${{ ... }}` fragment in `text`.
///
/// A fragment whose body doesn't parse is still yielded, with `expr` set to
/// the error, and scanning resumes after the next `}}`.
pub fn fragments(text: &str) -> Fragments<'_> {
    Fragments { text, cursor: 0 }
}

impl<'src> Iterator for Fragments<'src> {
    type Item = Fragment<'src>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.text.get(self.cursor..)?;
        let start = self.cursor + rest.find("${{")?;
        let body = start + 3;

        match Expr::parse_fragment(&self.text[body..]) {
            Ok((expr, consumed)) => {
                let end = body + consumed;
                self.cursor = end;
                Some(Fragment {
                    start,
                    body,
                    end,
                    expr: Ok(expr),
                })
            }
            Err(err) => {
                // Unterminated fragments run to the end of the text.
                let end = self.text[body..]
                    .find("}}")
                    .map_or(self.text.len(), |idx| body + idx + 2);
                self.cursor = end;
                Some(Fragment {
                    start,
                    body,
                    end,
                    expr: Err(err),
                })
            }
        }
    }
}
