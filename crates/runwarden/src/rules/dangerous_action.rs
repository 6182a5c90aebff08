//! Actions and commands that pull artifacts from other workflow runs.

use std::sync::LazyLock;

use actions_syntax::{Input, Scalar, Step, StepBody};
use indexmap::IndexMap;
use regex::Regex;

use super::{OnStep, Rule, RuleLoadError, RuleState, Sink, first_match, hooks, rule_meta};

/// Actions that can download artifacts from another repository.
const EXTERNAL_ARTIFACT_ACTIONS: &[&str] = &[
    "dawidd6/action-download-artifact",
    "aochmann/actions-download-artifact",
    "bettermarks/action-artifact-download",
];

/// Actions that download the artifacts of another run of this repository.
const LOCAL_ARTIFACT_ACTIONS: &[&str] = &["blablacar/action-download-last-artifact"];

#[allow(clippy::unwrap_used)]
static GH_RUN_DOWNLOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"gh run download").unwrap());

#[allow(clippy::unwrap_used)]
static DOWNLOAD_ARTIFACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"downloadArtifact").unwrap());

pub(crate) struct DangerousAction;

rule_meta!(
    DangerousAction,
    "dangerous-action",
    "Checks for actions and commands that download artifacts"
);

impl Rule for DangerousAction {
    fn new(_: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self)
    }

    hooks!(OnStep);
}

impl OnStep for DangerousAction {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        match &step.body {
            StepBody::Run { run, .. } => {
                if let Some(offset) = first_match(run.as_str(), &GH_RUN_DOWNLOAD) {
                    sink.report(
                        run.position_at(offset),
                        "Use of \"gh run download\" in a script.",
                    );
                }
            }
            StepBody::Uses { uses, with, .. } => {
                check_local_downloads(uses, sink);
                check_external_downloads(uses, with, sink);
                check_github_script(uses, with, sink);
            }
        }
    }
}

fn check_local_downloads(uses: &Scalar, sink: &mut Sink) {
    let spec = uses.as_str();

    if LOCAL_ARTIFACT_ACTIONS
        .iter()
        .any(|action| spec.starts_with(action))
    {
        sink.report(uses.position, format!("Use of action \"{spec}\""));
    }
}

fn check_external_downloads(uses: &Scalar, with: &IndexMap<String, Input>, sink: &mut Sink) {
    let spec = uses.as_str();

    if !EXTERNAL_ARTIFACT_ACTIONS
        .iter()
        .any(|action| spec.starts_with(action))
    {
        return;
    }

    match with.get("repo") {
        Some(repo) => sink.report(
            repo.value.position,
            format!("Use of action \"{spec}\" with external artifact"),
        ),
        None => sink.report(uses.position, format!("Use of action \"{spec}\"")),
    }
}

fn check_github_script(uses: &Scalar, with: &IndexMap<String, Input>, sink: &mut Sink) {
    if !uses.as_str().starts_with("actions/github-script") {
        return;
    }

    let Some(script) = with.get("script") else {
        return;
    };

    if let Some(offset) = first_match(script.value.as_str(), &DOWNLOAD_ARTIFACT) {
        sink.report(
            script.value.position_at(offset),
            "Use of \"downloadArtifact\" in \"actions/github-script\" action.",
        );
    }
}
