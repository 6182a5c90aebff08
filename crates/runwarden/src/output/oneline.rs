//! One line per finding, without source snippets.

use std::io;

use crate::finding::Finding;

pub(crate) fn output(mut sink: impl io::Write, findings: &[Finding]) -> anyhow::Result<()> {
    for finding in findings {
        let position = finding.position;
        // Findings not tied to a line (e.g. network errors) only get a path.
        if position.line == 0 {
            writeln!(
                sink,
                "{path}: {message} [{rule}]",
                path = finding.path(),
                message = finding.message,
                rule = finding.rule
            )?;
        } else {
            writeln!(
                sink,
                "{path}:{line}:{column}: {message} [{rule}]",
                path = finding.path(),
                line = position.line,
                column = position.column,
                message = finding.message,
                rule = finding.rule
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use actions_syntax::Position;
    use pretty_assertions::assert_eq;

    use super::output;
    use crate::finding::Finding;

    #[test]
    fn test_output() {
        let findings = [
            Finding::new(
                "expression-injection",
                Position::new(8, 24),
                r#"Expression injection, "github.head_ref" is potentially untrusted."#,
            )
            .at_path(".github/workflows/ci.yml".into()),
            Finding::new("repo-jacking", Position::new(0, 0), "Error while fetching")
                .at_path(".github/workflows/ci.yml".into()),
        ];

        let mut buf = vec![];
        output(&mut buf, &findings).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            concat!(
                ".github/workflows/ci.yml:8:24: Expression injection, \"github.head_ref\" is potentially untrusted. [expression-injection]\n",
                ".github/workflows/ci.yml: Error while fetching [repo-jacking]\n",
            )
        );

        let mut buf = vec![];
        output(&mut buf, &[]).unwrap();
        assert!(buf.is_empty());
    }
}
