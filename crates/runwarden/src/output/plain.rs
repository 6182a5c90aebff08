//! "plain" (i.e. cargo-style) output.

use std::{collections::HashMap, ops::Range};

use actions_syntax::Position;
use annotate_snippets::{AnnotationKind, Group, Level, Renderer, Snippet};
use anstream::println;
use line_index::{LineCol, LineIndex};
use owo_colors::OwoColorize;

use crate::finding::Finding;

struct Source {
    text: String,
    index: LineIndex,
}

impl Source {
    fn load(path: &str) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        let index = LineIndex::new(&text);
        Some(Self { text, index })
    }

    /// The span of the token starting at `position`.
    fn span_at(&self, position: Position) -> Option<Range<usize>> {
        let line = u32::try_from(position.line.checked_sub(1)?).ok()?;
        let col = u32::try_from(position.column.checked_sub(1)?).ok()?;

        let start = usize::from(self.index.offset(LineCol { line, col })?);
        let rest = self.text.get(start..)?;
        let len = match rest.find(char::is_whitespace) {
            Some(0) => rest.chars().next().map_or(0, char::len_utf8),
            Some(len) => len,
            None => rest.len(),
        };

        Some(start..start + len)
    }
}

pub(crate) fn render_findings(findings: &[Finding]) {
    let mut sources: HashMap<&str, Option<Source>> = HashMap::new();

    for finding in findings {
        let source = sources
            .entry(finding.path())
            .or_insert_with(|| Source::load(finding.path()));

        render_finding(finding, source.as_ref());
        println!();
    }

    if findings.is_empty() {
        println!("{}", "No findings to report. Good job!".green());
    } else {
        let nfindings = findings.len();
        println!(
            "{nfindings} finding{s}",
            nfindings = nfindings.green(),
            s = if nfindings == 1 { "" } else { "s" },
        );
    }
}

fn render_finding(finding: &Finding, source: Option<&Source>) {
    let title = Level::WARNING
        .primary_title(&finding.message)
        .id(finding.rule);

    let snippet = source.and_then(|source| {
        let span = source.span_at(finding.position)?;
        Some(
            Snippet::source(&source.text)
                .fold(true)
                .line_start(1)
                .path(finding.path())
                .annotation(AnnotationKind::Primary.span(span).label(finding.rule)),
        )
    });

    let group = match snippet {
        Some(snippet) => Group::with_title(title).element(snippet),
        None => Group::with_title(title).element(Level::NOTE.message(format!(
            "in {path}",
            path = finding.path()
        ))),
    };

    let renderer = Renderer::styled();
    println!("{}", renderer.render(&[group]));
}
