//! Actions that exchange the workflow's OIDC token for cloud credentials.

use actions_syntax::{Step, StepBody};

use super::{OnStep, Rule, RuleLoadError, RuleState, Sink, hooks, rule_meta};

const OIDC_ACTIONS: &[&str] = &["aws-actions/configure-aws-credentials", "azure/login"];

pub(crate) struct OidcAction;

rule_meta!(OidcAction, "oidc-action", "Checks for OIDC actions");

impl Rule for OidcAction {
    fn new(_: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self)
    }

    fn honors_trigger_filter(&self) -> bool {
        false
    }

    hooks!(OnStep);
}

impl OnStep for OidcAction {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        let StepBody::Uses { uses, .. } = &step.body else {
            return;
        };

        let spec = uses.as_str();
        if OIDC_ACTIONS.iter().any(|action| spec.starts_with(action)) {
            sink.report(uses.position, format!("Use of OIDC action \"{spec}\""));
        }
    }
}
