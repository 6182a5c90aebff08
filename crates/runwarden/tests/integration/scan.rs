use anyhow::Result;
use serde_json::Value;

use crate::common::{OutputMode, input_under_test, runwarden};

/// Renders the JSON findings as one `path:line:column rule` line each.
fn summarize(json: &str) -> Result<String> {
    let findings: Vec<Value> = serde_json::from_str(json)?;

    Ok(findings
        .iter()
        .map(|f| {
            format!(
                "{path}:{line}:{column} {rule}",
                path = f["path"].as_str().unwrap_or_default(),
                line = f["line"],
                column = f["column"],
                rule = f["rule"].as_str().unwrap_or_default(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

#[test]
fn injection_json() -> Result<()> {
    insta::assert_snapshot!(
        runwarden()
            .input(input_under_test("injection"))
            .args(["--format", "json"])
            .expected_code(1)
            .run()?,
        @r#"
    [
      {
        "rule": "expression-injection",
        "message": "Expression injection, \"github.event.comment.body\" is potentially untrusted.",
        "path": "tests/integration/test-data/injection/.github/workflows/triage.yml",
        "line": 8,
        "column": 24
      }
    ]
    "#
    );

    Ok(())
}

#[test]
fn injection_plain() -> Result<()> {
    let output = runwarden()
        .input(input_under_test("injection/.github/workflows/triage.yml"))
        .args(["--color", "never"])
        .expected_code(1)
        .run()?;

    assert!(output.contains("expression-injection"));
    assert!(output.contains(
        r#"Expression injection, "github.event.comment.body" is potentially untrusted."#
    ));
    assert!(output.ends_with("1 finding\n"));

    Ok(())
}

#[test]
fn clean() -> Result<()> {
    insta::assert_snapshot!(
        runwarden()
            .input(input_under_test("clean"))
            .args(["--color", "never"])
            .run()?,
        @"No findings to report. Good job!"
    );

    Ok(())
}

#[test]
fn ignore_drops_matching_findings() -> Result<()> {
    insta::assert_snapshot!(
        runwarden()
            .input(input_under_test("injection"))
            .args(["--format", "json", "--ignore", "comment\\.body"])
            .run()?,
        @"[]"
    );

    Ok(())
}

#[test]
fn trigger_filter_skips_workflow() -> Result<()> {
    insta::assert_snapshot!(
        runwarden()
            .input(input_under_test("injection"))
            .args(["--format", "json", "--filter-triggers", "push"])
            .run()?,
        @"[]"
    );

    insta::assert_snapshot!(
        summarize(
            &runwarden()
                .input(input_under_test("injection"))
                .args(["--format", "json", "--filter-triggers", "external"])
                .expected_code(1)
                .run()?
        )?,
        @"tests/integration/test-data/injection/.github/workflows/triage.yml:8:24 expression-injection"
    );

    Ok(())
}

#[test]
fn mixed_findings_are_ordered() -> Result<()> {
    insta::assert_snapshot!(
        summarize(
            &runwarden()
                .input(input_under_test("mixed"))
                .args(["--format", "json"])
                .expected_code(1)
                .run()?
        )?,
        @r"
    tests/integration/test-data/mixed/.github/workflows/a-target.yml:6:15 dangerous-checkout
    tests/integration/test-data/mixed/.github/workflows/a-target.yml:9:15 local-action
    tests/integration/test-data/mixed/.github/workflows/a-target.yml:10:28 expression-injection
    tests/integration/test-data/mixed/.github/workflows/a-target.yml:10:48 dangerous-write
    tests/integration/test-data/mixed/.github/workflows/b-deploy.yml:9:19 credentials
    tests/integration/test-data/mixed/.github/workflows/b-deploy.yml:11:15 oidc-action
    "
    );

    Ok(())
}

#[test]
fn selected_rules_only() -> Result<()> {
    insta::assert_snapshot!(
        summarize(
            &runwarden()
                .input(input_under_test("mixed"))
                .args(["--format", "json", "--enable-rules", "oidc-action,credentials"])
                .expected_code(1)
                .run()?
        )?,
        @r"
    tests/integration/test-data/mixed/.github/workflows/b-deploy.yml:9:19 credentials
    tests/integration/test-data/mixed/.github/workflows/b-deploy.yml:11:15 oidc-action
    "
    );

    insta::assert_snapshot!(
        summarize(
            &runwarden()
                .input(input_under_test("mixed/.github/workflows/a-target.yml"))
                .args([
                    "--format",
                    "json",
                    "--disable-rules",
                    "dangerous-checkout,dangerous-write",
                ])
                .expected_code(1)
                .run()?
        )?,
        @r"
    tests/integration/test-data/mixed/.github/workflows/a-target.yml:9:15 local-action
    tests/integration/test-data/mixed/.github/workflows/a-target.yml:10:28 expression-injection
    "
    );

    Ok(())
}

#[test]
fn filter_run_keeps_script_injection() -> Result<()> {
    insta::assert_snapshot!(
        summarize(
            &runwarden()
                .input(input_under_test("mixed/.github/workflows/a-target.yml"))
                .args([
                    "--format",
                    "json",
                    "--filter-run",
                    "--enable-rules",
                    "expression-injection",
                ])
                .expected_code(1)
                .run()?
        )?,
        @"tests/integration/test-data/mixed/.github/workflows/a-target.yml:10:28 expression-injection"
    );

    Ok(())
}

#[test]
fn sarif() -> Result<()> {
    let output = runwarden()
        .input(input_under_test("injection"))
        .args(["--format", "sarif"])
        .expected_code(1)
        .run()?;

    let sarif: Value = serde_json::from_str(&output)?;
    let results = sarif["runs"][0]["results"]
        .as_array()
        .map(Vec::len)
        .unwrap_or_default();

    assert_eq!(sarif["version"], "2.1.0");
    assert_eq!(results, 1);
    assert_eq!(
        sarif["runs"][0]["results"][0]["ruleId"],
        "runwarden/expression-injection"
    );

    Ok(())
}

#[test]
fn invalid_workflow_is_fatal() -> Result<()> {
    let output = runwarden()
        .input(input_under_test("broken"))
        .output(OutputMode::Stderr)
        .expected_code(3)
        .run()?;

    assert!(output.contains("fatal: no scan was performed"));
    assert!(output.contains("bad.yml"));

    Ok(())
}

#[test]
fn missing_input_is_fatal() -> Result<()> {
    let output = runwarden()
        .input("/definitely/not/here")
        .output(OutputMode::Stderr)
        .expected_code(3)
        .run()?;

    assert!(output.contains("invalid input: /definitely/not/here"));

    Ok(())
}

#[test]
fn relative_input_inside_git_checkout() -> Result<()> {
    let checkout = tempfile::tempdir()?;
    let root = checkout.path();
    std::fs::create_dir_all(root.join(".git"))?;
    std::fs::create_dir_all(root.join(".github/workflows"))?;
    std::fs::create_dir_all(root.join(".github/actions/setup"))?;
    std::fs::write(
        root.join(".github/workflows/ci.yml"),
        "on: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: ./.github/actions/setup\n",
    )?;
    std::fs::write(
        root.join(".github/actions/setup/action.yml"),
        "name: Setup\nruns:\n  using: composite\n  steps: []\n",
    )?;

    let output = runwarden()
        .working_dir(root.to_string_lossy())
        .input(".github/workflows/ci.yml")
        .args(["--format", "json", "--enable-rules", "local-action"])
        .no_config(true)
        .expected_code(1)
        .run()?;

    let findings: Vec<Value> = serde_json::from_str(&output)?;
    assert_eq!(findings.len(), 1);
    assert_eq!(
        findings[0]["message"],
        r#"Use of local action "./.github/actions/setup" (runs using "composite")"#
    );

    Ok(())
}

#[test]
fn oneline() -> Result<()> {
    let expected = "tests/integration/test-data/injection/.github/workflows/triage.yml:8:24: \
        Expression injection, \"github.event.comment.body\" is potentially untrusted. \
        [expression-injection]\n";

    for args in [vec!["--oneline"], vec!["--format", "oneline"]] {
        let output = runwarden()
            .input(input_under_test("injection"))
            .args(args)
            .expected_code(1)
            .run()?;
        assert_eq!(output, expected);
    }

    let output = runwarden()
        .input(input_under_test("injection"))
        .args(["--oneline", "--format", "json"])
        .output(OutputMode::Stderr)
        .expected_code(2)
        .run()?;
    assert!(output.contains("cannot be used with"));

    Ok(())
}
