//! Core namespace for runwarden's rules.
//!
//! A rule observes a workflow through one or more lifecycle hooks. Each
//! hook is its own trait; a rule opts into the hooks it implements with
//! [`hooks!`], and the dispatcher never calls the others.

use std::sync::Arc;

use actions_syntax::{Job, Position, Step, Workflow};
use thiserror::Error;

use crate::{
    config::RuleSetConfig, finding::Finding, github::OwnerProbe, project::ProjectCache,
    untrusted::UntrustedInputMap,
};

pub(crate) mod bot_check;
pub(crate) mod credentials;
pub(crate) mod dangerous_action;
pub(crate) mod dangerous_checkout;
pub(crate) mod dangerous_write;
pub(crate) mod debug;
pub(crate) mod expression_injection;
pub(crate) mod local_action;
pub(crate) mod oidc_action;
pub(crate) mod repo_jacking;
pub(crate) mod runner_label;
pub(crate) mod unsecured_commands;

/// Everything a rule may consult when it's created.
#[derive(Clone)]
pub(crate) struct RuleState {
    pub(crate) config: Arc<RuleSetConfig>,
    pub(crate) untrusted: Arc<UntrustedInputMap>,
    /// `None` when running offline.
    pub(crate) probe: Option<Arc<dyn OwnerProbe>>,
    /// The local actions of the project the current file belongs to.
    pub(crate) project: Option<Arc<ProjectCache>>,
}

impl RuleState {
    pub(crate) fn new(config: Arc<RuleSetConfig>, untrusted: Arc<UntrustedInputMap>) -> Self {
        Self {
            config,
            untrusted,
            probe: None,
            project: None,
        }
    }

    pub(crate) fn with_probe(self, probe: Arc<dyn OwnerProbe>) -> Self {
        Self {
            probe: Some(probe),
            ..self
        }
    }

    pub(crate) fn with_project(&self, project: Option<Arc<ProjectCache>>) -> Self {
        Self {
            project,
            ..self.clone()
        }
    }
}

/// Collects the findings of a single rule.
#[derive(Debug)]
pub(crate) struct Sink {
    ident: &'static str,
    findings: Vec<Finding>,
}

impl Sink {
    pub(crate) fn new(ident: &'static str) -> Self {
        Self {
            ident,
            findings: vec![],
        }
    }

    pub(crate) fn report(&mut self, position: Position, message: impl Into<String>) {
        self.findings
            .push(Finding::new(self.ident, position, message));
    }

    pub(crate) fn into_findings(self) -> Vec<Finding> {
        self.findings
    }
}

pub(crate) trait RuleCore {
    fn ident() -> &'static str
    where
        Self: Sized;

    fn desc() -> &'static str
    where
        Self: Sized;
}

macro_rules! rule_meta {
    ($t:ty, $id:literal, $desc:expr) => {
        impl $crate::rules::RuleCore for $t {
            fn ident() -> &'static str {
                $id
            }

            fn desc() -> &'static str
            where
                Self: Sized,
            {
                $desc
            }
        }
    };
}

pub(crate) use rule_meta;

#[derive(Error, Debug)]
pub(crate) enum RuleLoadError {
    /// The rule can't or shouldn't run, e.g. because it needs the network.
    #[error("{0}")]
    Skip(anyhow::Error),
}

pub(crate) trait OnWorkflowEnter {
    fn on_workflow_enter(&mut self, workflow: &Workflow, sink: &mut Sink);
}

pub(crate) trait OnJobEnter {
    fn on_job_enter(&mut self, job: &Job, sink: &mut Sink);
}

pub(crate) trait OnStep {
    fn on_step(&mut self, step: &Step, sink: &mut Sink);
}

pub(crate) trait OnJobLeave {
    fn on_job_leave(&mut self, job: &Job, sink: &mut Sink);
}

/// Runs once the whole workflow has been seen. Unlike the other hooks,
/// this one may perform I/O.
#[async_trait::async_trait]
pub(crate) trait OnWorkflowLeave: Send {
    async fn on_workflow_leave(&mut self, workflow: &Workflow, sink: &mut Sink);
}

pub(crate) trait Rule: RuleCore + Send {
    fn new(state: &RuleState) -> Result<Self, RuleLoadError>
    where
        Self: Sized;

    /// Whether the rule is skipped for workflows outside the trigger
    /// filter.
    fn honors_trigger_filter(&self) -> bool {
        true
    }

    fn workflow_enter_hook(&mut self) -> Option<&mut dyn OnWorkflowEnter> {
        None
    }

    fn job_enter_hook(&mut self) -> Option<&mut dyn OnJobEnter> {
        None
    }

    fn step_hook(&mut self) -> Option<&mut dyn OnStep> {
        None
    }

    fn job_leave_hook(&mut self) -> Option<&mut dyn OnJobLeave> {
        None
    }

    fn workflow_leave_hook(&mut self) -> Option<&mut dyn OnWorkflowLeave> {
        None
    }
}

/// Declares the hooks a rule implements, e.g. `hooks!(OnJobEnter, OnStep);`
/// inside an `impl Rule` block.
macro_rules! hooks {
    (@accessor OnWorkflowEnter) => {
        fn workflow_enter_hook(&mut self) -> Option<&mut dyn $crate::rules::OnWorkflowEnter> {
            Some(self)
        }
    };
    (@accessor OnJobEnter) => {
        fn job_enter_hook(&mut self) -> Option<&mut dyn $crate::rules::OnJobEnter> {
            Some(self)
        }
    };
    (@accessor OnStep) => {
        fn step_hook(&mut self) -> Option<&mut dyn $crate::rules::OnStep> {
            Some(self)
        }
    };
    (@accessor OnJobLeave) => {
        fn job_leave_hook(&mut self) -> Option<&mut dyn $crate::rules::OnJobLeave> {
            Some(self)
        }
    };
    (@accessor OnWorkflowLeave) => {
        fn workflow_leave_hook(&mut self) -> Option<&mut dyn $crate::rules::OnWorkflowLeave> {
            Some(self)
        }
    };
    ($($hook:ident),+ $(,)?) => {
        $($crate::rules::hooks!(@accessor $hook);)+
    };
}

pub(crate) use hooks;

/// Returns the first line of `script` matching `pattern`, as a byte offset
/// of the match within `script`.
///
/// Scripts are scanned line by line so that `^` and `$` anchor per line.
pub(crate) fn first_match(script: &str, pattern: &regex::Regex) -> Option<usize> {
    let mut line_start = 0;

    for line in script.split_inclusive('\n') {
        let content = line.strip_suffix('\n').unwrap_or(line);
        if let Some(m) = pattern.find(content) {
            return Some(line_start + m.start());
        }
        line_start += line.len();
    }

    None
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use actions_syntax::Workflow;

    use super::{Rule, RuleState};
    use crate::{
        config::RuleSetConfig, dispatch::Dispatcher, finding::Finding,
        untrusted::UntrustedInputMap,
    };

    pub(crate) fn state(config: RuleSetConfig) -> RuleState {
        RuleState::new(Arc::new(config), Arc::new(UntrustedInputMap::builtin()))
    }

    /// Runs a single rule over `source`, returning `(line, column, message)`
    /// triples.
    pub(crate) async fn run_rule<R: Rule + 'static>(
        state: &RuleState,
        source: &str,
    ) -> Vec<(usize, usize, String)> {
        let workflow = Workflow::from_string(source).unwrap();
        let rule = R::new(state).unwrap();
        let findings: Vec<Finding> = Dispatcher::from_rules(state.config.clone(), vec![(
            R::ident(),
            Box::new(rule) as Box<dyn Rule>,
        )])
        .run(&workflow)
        .await;

        findings
            .into_iter()
            .map(|f| (f.position.line, f.position.column, f.message))
            .collect()
    }

    /// Like [`run_rule`], with the default configuration.
    pub(crate) async fn check<R: Rule + 'static>(source: &str) -> Vec<(usize, usize, String)> {
        run_rule::<R>(&state(RuleSetConfig::default()), source).await
    }
}
