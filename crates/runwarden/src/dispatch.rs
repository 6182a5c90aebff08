//! Walks a workflow once, driving every enabled rule through its hooks.

use std::sync::Arc;

use actions_syntax::Workflow;

use crate::{
    config::RuleSetConfig,
    finding::Finding,
    rules::{Rule, Sink},
};

struct Slot {
    rule: Box<dyn Rule>,
    /// Set when the workflow falls outside the trigger filter.
    skip: bool,
    sink: Sink,
}

/// Runs a fresh set of rule instances over a single workflow.
pub(crate) struct Dispatcher {
    config: Arc<RuleSetConfig>,
    slots: Vec<Slot>,
}

impl Dispatcher {
    pub(crate) fn from_rules(
        config: Arc<RuleSetConfig>,
        rules: Vec<(&'static str, Box<dyn Rule>)>,
    ) -> Self {
        Self {
            config,
            slots: rules
                .into_iter()
                .map(|(ident, rule)| Slot {
                    rule,
                    skip: false,
                    sink: Sink::new(ident),
                })
                .collect(),
        }
    }

    fn active(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut().filter(|slot| !slot.skip)
    }

    /// Runs every hook over `workflow` and returns the findings, grouped
    /// by rule in registration order.
    pub(crate) async fn run(mut self, workflow: &Workflow) -> Vec<Finding> {
        let in_filter = self
            .config
            .triggers
            .matches(workflow.on.iter().map(|t| t.event.as_str()));

        for slot in self.slots.iter_mut() {
            slot.skip = !in_filter && slot.rule.honors_trigger_filter();
        }

        for slot in self.active() {
            if let Some(hook) = slot.rule.workflow_enter_hook() {
                hook.on_workflow_enter(workflow, &mut slot.sink);
            }
        }

        for job in workflow.jobs.values() {
            for slot in self.active() {
                if let Some(hook) = slot.rule.job_enter_hook() {
                    hook.on_job_enter(job, &mut slot.sink);
                }
            }

            for step in &job.steps {
                for slot in self.active() {
                    if let Some(hook) = slot.rule.step_hook() {
                        hook.on_step(step, &mut slot.sink);
                    }
                }
            }

            for slot in self.active() {
                if let Some(hook) = slot.rule.job_leave_hook() {
                    hook.on_job_leave(job, &mut slot.sink);
                }
            }
        }

        for slot in self.slots.iter_mut().filter(|slot| !slot.skip) {
            if let Some(hook) = slot.rule.workflow_leave_hook() {
                hook.on_workflow_leave(workflow, &mut slot.sink).await;
            }
        }

        self.slots
            .into_iter()
            .flat_map(|slot| slot.sink.into_findings())
            .collect()
    }
}
