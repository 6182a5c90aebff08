use anyhow::Result;

use crate::common::{OutputMode, input_under_test, runwarden};

#[test]
fn explicit_config_ignores_findings() -> Result<()> {
    insta::assert_snapshot!(
        runwarden()
            .config(input_under_test("config/runwarden.yml"))
            .input(input_under_test("config"))
            .args(["--format", "json"])
            .run()?,
        @"[]"
    );

    Ok(())
}

#[test]
fn discovered_config_ignores_findings() -> Result<()> {
    insta::assert_snapshot!(
        runwarden()
            .working_dir(input_under_test("config"))
            .args(["--format", "json"])
            .run()?,
        @"[]"
    );

    Ok(())
}

#[test]
fn no_config_skips_discovery() -> Result<()> {
    let output = runwarden()
        .working_dir(input_under_test("config"))
        .no_config(true)
        .args(["--format", "json"])
        .expected_code(1)
        .run()?;

    assert!(output.contains(r#""rule": "expression-injection""#));

    Ok(())
}

#[test]
fn missing_config_is_fatal() -> Result<()> {
    let output = runwarden()
        .config(format!("{}/nope.yml", input_under_test("config")))
        .input(input_under_test("injection"))
        .output(OutputMode::Stderr)
        .expected_code(3)
        .run()?;

    assert!(output.contains("configuration error in @@CONFIG@@"));

    Ok(())
}
