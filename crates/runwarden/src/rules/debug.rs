//! Rules that surface interesting workflows rather than vulnerabilities.
//!
//! These are only registered with `--debug-rules`, and are meant to help
//! triage a large number of repositories by hand.

use std::sync::{Arc, LazyLock};

use actions_syntax::{Step, StepBody, Workflow};
use anyhow::anyhow;
use regex::Regex;

use super::{
    OnStep, OnWorkflowEnter, Rule, RuleLoadError, RuleState, Sink, first_match, hooks, rule_meta,
};
use crate::config::{EXTERNAL_TRIGGERS, RuleSetConfig};

#[allow(clippy::unwrap_used)]
static JS_EXEC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"exec\.exec\(").unwrap());

fn require_debug(state: &RuleState) -> Result<(), RuleLoadError> {
    if state.config.debug_rules {
        Ok(())
    } else {
        Err(RuleLoadError::Skip(anyhow!("debug rules are disabled")))
    }
}

pub(crate) struct ExternalTrigger {
    config: Arc<RuleSetConfig>,
}

rule_meta!(
    ExternalTrigger,
    "debug-external-trigger",
    "Reports workflows that can be triggered externally"
);

impl Rule for ExternalTrigger {
    fn new(state: &RuleState) -> Result<Self, RuleLoadError> {
        require_debug(state)?;

        Ok(Self {
            config: state.config.clone(),
        })
    }

    hooks!(OnWorkflowEnter);
}

impl OnWorkflowEnter for ExternalTrigger {
    fn on_workflow_enter(&mut self, workflow: &Workflow, sink: &mut Sink) {
        let triggers = &self.config.triggers;

        let Some(trigger) = workflow.on.iter().find(|trigger| {
            let event = trigger.event.as_str();
            if triggers.is_empty() {
                EXTERNAL_TRIGGERS.contains(&event)
            } else {
                triggers.contains(event)
            }
        }) else {
            return;
        };

        if let Some(name) = &workflow.name {
            sink.report(
                name.position,
                format!(
                    "Use of action with \"{event}\" workflow trigger.",
                    event = trigger.event
                ),
            );
        }
    }
}

pub(crate) struct Artefacts;

rule_meta!(
    Artefacts,
    "debug-artefacts",
    "Reports workflows that upload artifacts"
);

impl Rule for Artefacts {
    fn new(state: &RuleState) -> Result<Self, RuleLoadError> {
        require_debug(state)?;
        Ok(Self)
    }

    hooks!(OnStep);
}

impl OnStep for Artefacts {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        let StepBody::Uses { uses, .. } = &step.body else {
            return;
        };

        if uses.as_str().starts_with("actions/upload-artifact") {
            sink.report(uses.position, "Use of action \"actions/upload-artifact\"");
        }
    }
}

pub(crate) struct JsExec;

rule_meta!(
    JsExec,
    "debug-js-exec",
    "Reports workflows that run system commands from JS scripts"
);

impl Rule for JsExec {
    fn new(state: &RuleState) -> Result<Self, RuleLoadError> {
        require_debug(state)?;
        Ok(Self)
    }

    hooks!(OnStep);
}

impl OnStep for JsExec {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        let StepBody::Uses { uses, with, .. } = &step.body else {
            return;
        };

        if !uses.as_str().starts_with("actions/github-script") {
            return;
        }

        let Some(script) = with.get("script") else {
            return;
        };

        if let Some(offset) = first_match(script.value.as_str(), &JS_EXEC) {
            sink.report(
                script.value.position_at(offset),
                "Use of \"exec.exec()\" in \"actions/github-script\" action.",
            );
        }
    }
}
