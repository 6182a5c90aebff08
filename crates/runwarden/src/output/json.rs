//! JSON output: a flat array of findings.

use std::io;

use serde::Serialize;

use crate::finding::Finding;

#[derive(Serialize)]
struct JsonFinding<'a> {
    rule: &'a str,
    message: &'a str,
    path: &'a str,
    line: usize,
    column: usize,
}

impl<'a> From<&'a Finding> for JsonFinding<'a> {
    fn from(finding: &'a Finding) -> Self {
        Self {
            rule: finding.rule,
            message: &finding.message,
            path: finding.path(),
            line: finding.position.line,
            column: finding.position.column,
        }
    }
}

pub(crate) fn output(sink: impl io::Write, findings: &[Finding]) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(
        sink,
        &findings.iter().map(JsonFinding::from).collect::<Vec<_>>(),
    )?;
    Ok(())
}
