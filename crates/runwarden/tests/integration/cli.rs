use anyhow::Result;

use crate::common::{OutputMode, input_under_test, runwarden, runwarden_download};

#[test]
fn list_rules() -> Result<()> {
    let output = runwarden().args(["--list-rules", "--color", "never"]).run()?;

    let idents = output
        .lines()
        .filter_map(|line| line.split_once(": ").map(|(ident, _)| ident))
        .collect::<Vec<_>>();

    assert_eq!(idents.len(), 14);
    assert!(idents.contains(&"expression-injection"));
    assert!(idents.contains(&"repo-jacking"));
    assert!(output.contains("dangerous-write: Checks for writes to $GITHUB_OUTPUT or $GITHUB_ENV"));

    Ok(())
}

#[test]
fn conflicting_rule_selection() -> Result<()> {
    let output = runwarden()
        .input(input_under_test("injection"))
        .args(["--enable-rules", "oidc-action", "--disable-rules", "credentials"])
        .output(OutputMode::Stderr)
        .expected_code(2)
        .run()?;

    assert!(output.contains("cannot be used with"));

    Ok(())
}

#[test]
fn invalid_ignore_regex() -> Result<()> {
    runwarden()
        .input(input_under_test("injection"))
        .args(["--ignore", "("])
        .output(OutputMode::Stderr)
        .expected_code(2)
        .run()?;

    Ok(())
}

#[test]
fn config_and_no_config_conflict() -> Result<()> {
    runwarden()
        .input(input_under_test("injection"))
        .args(["--no-config", "--config", "runwarden.yml"])
        .output(OutputMode::Stderr)
        .expected_code(2)
        .run()?;

    Ok(())
}

#[test]
fn failed_download_is_not_a_scan() -> Result<()> {
    // Nothing listens on port 1, so listing the repositories fails at once.
    let output = runwarden_download()
        .args(["--org", "acme", "--gh-hostname", "127.0.0.1:1"])
        .output(OutputMode::Stderr)
        .expected_code(3)
        .run()?;

    assert!(output.contains("fatal: no download was performed"));
    assert!(!output.contains("no scan was performed"));
    assert!(output.contains("couldn't list the repositories of acme"));

    Ok(())
}
