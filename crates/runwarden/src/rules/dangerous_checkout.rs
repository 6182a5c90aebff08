//! Checkouts of attacker-controlled refs.

use std::sync::LazyLock;

use actions_syntax::{Step, StepBody};
use regex::Regex;

use super::{OnStep, Rule, RuleLoadError, RuleState, Sink, first_match, hooks, rule_meta};

#[allow(clippy::unwrap_used)]
static MANUAL_CHECKOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(git|gh pr) checkout [^\n]*[$`]").unwrap());

/// Refs made of letters only are branch names like `main`, never
/// something pulled from the event payload.
#[allow(clippy::unwrap_used)]
static PLAIN_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z]+$").unwrap());

pub(crate) struct DangerousCheckout;

rule_meta!(
    DangerousCheckout,
    "dangerous-checkout",
    "Checks for checkouts of potentially attacker-controlled refs"
);

impl Rule for DangerousCheckout {
    fn new(_: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self)
    }

    hooks!(OnStep);
}

impl OnStep for DangerousCheckout {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        match &step.body {
            StepBody::Run { run, .. } => {
                if let Some(offset) = first_match(run.as_str(), &MANUAL_CHECKOUT) {
                    sink.report(
                        run.position_at(offset),
                        "Use of \"git checkout\" in a bash script with a potentially dangerous reference.",
                    );
                }
            }
            StepBody::Uses { uses, with, .. } => {
                if uses.has_expression() || !uses.as_str().starts_with("actions/checkout") {
                    return;
                }

                let Some(input) = with.get("ref") else {
                    return;
                };

                if !PLAIN_REF.is_match(input.value.as_str()) {
                    sink.report(
                        uses.position,
                        "Use of 'actions/checkout' with external workflow trigger and custom ref.",
                    );
                }
            }
        }
    }
}
