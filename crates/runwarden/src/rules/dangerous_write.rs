//! Writes to the `$GITHUB_OUTPUT` and `$GITHUB_ENV` command files.
//!
//! Anything written there becomes a step output or an environment
//! variable for every later step, so it's worth a closer look when the
//! written value may be attacker-controlled.

use std::sync::LazyLock;

use actions_syntax::{Scalar, Step, StepBody};
use regex::Regex;

use super::{OnStep, Rule, RuleLoadError, RuleState, Sink, first_match, hooks, rule_meta};

/// Patterns paired with their messages, checked in this order.
#[allow(clippy::unwrap_used)]
static PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i:env):GITHUB_OUTPUT",
            "Write to \"$GITHUB_OUTPUT\" in a powershell script. It might be a false positive, The regexp must be improved",
        ),
        (
            r#">>\s*"*\$\{*GITHUB_OUTPUT"#,
            "Write to \"$GITHUB_OUTPUT\" in a bash script.",
        ),
        (
            r"(?i:env):GITHUB_ENV",
            "Write to \"$GITHUB_ENV\" in a powershell script. It might be a false positive, The regexp must be improved",
        ),
        (
            r#">>\s*"*\$\{*GITHUB_ENV"#,
            "Write to \"$GITHUB_ENV\" in a bash script.",
        ),
    ]
    .into_iter()
    .map(|(pattern, message)| (Regex::new(pattern).unwrap(), message))
    .collect()
});

pub(crate) struct DangerousWrite;

rule_meta!(
    DangerousWrite,
    "dangerous-write",
    "Checks for writes to $GITHUB_OUTPUT or $GITHUB_ENV"
);

impl Rule for DangerousWrite {
    fn new(_: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self)
    }

    hooks!(OnStep);
}

impl OnStep for DangerousWrite {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        let StepBody::Run { run, .. } = &step.body else {
            return;
        };

        check_script(run, sink);
    }
}

fn check_script(run: &Scalar, sink: &mut Sink) {
    for (pattern, message) in PATTERNS.iter() {
        if let Some(offset) = first_match(run.as_str(), pattern) {
            sink.report(run.position_at(offset), *message);
        }
    }
}
