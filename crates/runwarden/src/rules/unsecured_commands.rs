//! Re-enabling the deprecated `set-env` and `add-path` workflow commands.

use actions_syntax::{Env, Job, Step, Workflow};

use super::{
    OnJobEnter, OnStep, OnWorkflowEnter, Rule, RuleLoadError, RuleState, Sink, hooks, rule_meta,
};

const UNSECURE_COMMANDS_VAR: &str = "ACTIONS_ALLOW_UNSECURE_COMMANDS";

pub(crate) struct UnsecuredCommands;

rule_meta!(
    UnsecuredCommands,
    "unsecured-commands",
    "Checks for the ACTIONS_ALLOW_UNSECURE_COMMANDS environment variable"
);

impl Rule for UnsecuredCommands {
    fn new(_: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self)
    }

    hooks!(OnWorkflowEnter, OnJobEnter, OnStep);
}

impl OnWorkflowEnter for UnsecuredCommands {
    fn on_workflow_enter(&mut self, workflow: &Workflow, sink: &mut Sink) {
        check_env(&workflow.env, sink);
    }
}

impl OnJobEnter for UnsecuredCommands {
    fn on_job_enter(&mut self, job: &Job, sink: &mut Sink) {
        check_env(&job.env, sink);
    }
}

impl OnStep for UnsecuredCommands {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        check_env(&step.env, sink);
    }
}

fn check_env(env: &Env, sink: &mut Sink) {
    for var in env.iter() {
        let name = var.name.as_str();
        if name.eq_ignore_ascii_case(UNSECURE_COMMANDS_VAR) {
            sink.report(
                var.name.position,
                format!("environment variable name \"{name}\" is set."),
            );
        }
    }
}
