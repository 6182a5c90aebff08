//! Local (`./path`) actions.

use std::sync::Arc;

use actions_syntax::{Step, StepBody};

use super::{OnStep, Rule, RuleLoadError, RuleState, Sink, hooks, rule_meta};
use crate::project::ProjectCache;

pub(crate) struct LocalAction {
    project: Option<Arc<ProjectCache>>,
}

rule_meta!(LocalAction, "local-action", "Checks for uses of local actions");

impl Rule for LocalAction {
    fn new(state: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self {
            project: state.project.clone(),
        })
    }

    hooks!(OnStep);
}

impl OnStep for LocalAction {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        let StepBody::Uses { uses, .. } = &step.body else {
            return;
        };

        let spec = uses.as_str();
        if !spec.starts_with("./") {
            return;
        }

        let using = self
            .project
            .as_ref()
            .and_then(|project| project.lookup(spec))
            .and_then(|action| action.using.as_deref());

        let message = match using {
            Some(using) => format!("Use of local action \"{spec}\" (runs using \"{using}\")"),
            None => format!("Use of local action \"{spec}\""),
        };

        sink.report(uses.position, message);
    }
}
