//! SARIF output.

use std::collections::{HashMap, HashSet};

use serde_sarif::sarif::{
    ArtifactLocation, Invocation, Location, MultiformatMessageString, PhysicalLocation,
    PropertyBag, Region, ReportingDescriptor, Result as SarifResult, ResultKind, ResultLevel, Run,
    Sarif, Tool, ToolComponent,
};

use crate::{finding::Finding, registry::RuleRegistry};

pub(crate) fn build(findings: &[Finding]) -> Sarif {
    Sarif::builder()
        .version("2.1.0")
        .schema("https://docs.oasis-open.org/sarif/sarif/v2.1.0/os/schemas/sarif-schema-2.1.0.json")
        .runs([build_run(findings)])
        .build()
}

fn build_run(findings: &[Finding]) -> Run {
    Run::builder()
        .tool(
            Tool::builder()
                .driver(
                    ToolComponent::builder()
                        .name(env!("CARGO_CRATE_NAME"))
                        .version(env!("CARGO_PKG_VERSION"))
                        .semantic_version(env!("CARGO_PKG_VERSION"))
                        .download_uri(env!("CARGO_PKG_REPOSITORY"))
                        .information_uri(env!("CARGO_PKG_HOMEPAGE"))
                        .rules(build_rules(findings))
                        .build(),
                )
                .build(),
        )
        .results(findings.iter().map(build_result).collect::<Vec<_>>())
        .invocations([Invocation::builder()
            // We only produce results on successful executions.
            .execution_successful(true)
            .build()])
        .build()
}

fn build_rules(findings: &[Finding]) -> Vec<ReportingDescriptor> {
    let catalog = RuleRegistry::catalog();
    let descs = catalog.iter_rules().collect::<HashMap<_, _>>();

    let mut unique_rules = HashSet::new();
    findings
        .iter()
        .filter(|finding| unique_rules.insert(finding.rule))
        .map(|finding| {
            ReportingDescriptor::builder()
                .id(format!("runwarden/{id}", id = finding.rule))
                .name(finding.rule)
                .help(
                    MultiformatMessageString::builder()
                        .text(descs.get(finding.rule).copied().unwrap_or(finding.rule))
                        .build(),
                )
                .properties(PropertyBag::builder().tags(["security".into()]).build())
                .build()
        })
        .collect()
}

fn build_result(finding: &Finding) -> SarifResult {
    SarifResult::builder()
        .rule_id(format!("runwarden/{id}", id = finding.rule))
        .message(finding.message.as_str())
        .locations([build_location(finding)])
        .level(ResultLevel::Warning)
        .kind(ResultKind::Fail)
        .build()
}

fn build_location(finding: &Finding) -> Location {
    let artifact = ArtifactLocation::builder().uri(finding.path()).build();

    // Findings that aren't tied to a place in the file have no region;
    // SARIF regions are 1-based.
    let physical = if finding.position.line == 0 {
        PhysicalLocation::builder()
            .artifact_location(artifact)
            .build()
    } else {
        PhysicalLocation::builder()
            .artifact_location(artifact)
            .region(
                Region::builder()
                    .start_line(finding.position.line as i64)
                    .start_column(finding.position.column as i64)
                    .source_language("yaml")
                    .build(),
            )
            .build()
    };

    Location::builder().physical_location(physical).build()
}
