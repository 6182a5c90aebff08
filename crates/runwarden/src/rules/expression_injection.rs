//! Untrusted input flowing into `${{ ... }}` expressions.

use actions_syntax::{Scalar, Step, StepBody};

use super::{OnStep, Rule, RuleLoadError, RuleState, Sink, hooks, rule_meta};
use crate::taint::TaintAnalyzer;

pub(crate) struct ExpressionInjection {
    analyzer: TaintAnalyzer,
    script_only: bool,
}

rule_meta!(
    ExpressionInjection,
    "expression-injection",
    "Checks for expression injection in scripts and action inputs"
);

impl Rule for ExpressionInjection {
    fn new(state: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self {
            analyzer: TaintAnalyzer::new(state.untrusted.clone()),
            script_only: state.config.script_only,
        })
    }

    hooks!(OnStep);
}

impl OnStep for ExpressionInjection {
    fn on_step(&mut self, step: &Step, sink: &mut Sink) {
        match &step.body {
            StepBody::Run {
                run,
                working_directory,
                ..
            } => {
                self.check(run, sink);
                if let Some(dir) = working_directory {
                    self.check(dir, sink);
                }
            }
            StepBody::Uses { .. } if self.script_only => {}
            StepBody::Uses {
                uses,
                with,
                entrypoint,
                args,
            } => {
                self.check(uses, sink);
                for input in with.values() {
                    self.check(&input.value, sink);
                }
                for scalar in [entrypoint, args].into_iter().flatten() {
                    self.check(scalar, sink);
                }
            }
        }
    }
}

impl ExpressionInjection {
    fn check(&self, scalar: &Scalar, sink: &mut Sink) {
        if !scalar.has_expression() {
            return;
        }

        for taint in self.analyzer.analyze(scalar) {
            sink.report(taint.position, taint.message());
        }
    }
}
