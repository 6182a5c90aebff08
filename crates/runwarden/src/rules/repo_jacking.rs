//! Actions whose owning account no longer exists.
//!
//! When a GitHub user or organization is deleted or renamed, anybody can
//! register the freed name and publish an action under it. Every
//! workflow that still references the old `owner/repo` then runs the new
//! owner's code.

use std::{sync::Arc, time::Duration};

use actions_syntax::{Position, Step, StepBody, Workflow};
use anyhow::anyhow;
use indexmap::IndexMap;

use super::{OnStep, OnWorkflowLeave, Rule, RuleLoadError, RuleState, Sink, hooks, rule_meta};
use crate::{
    config::RuleSetConfig,
    github::{ClientError, OwnerProbe},
};

/// Popular owners that are known to exist.
const KNOWN_OWNERS: &[&str] = &[
    "aochmann",
    "bettermarks",
    "blablacar",
    "8398a7",
    "actions",
    "actions-cool",
    "actions-rs",
    "aws-actions",
    "azure",
    "Azure",
    "bahmutov",
    "codecov",
    "dawidd6",
    "dessant",
    "docker",
    "dorny",
    "dtolnay",
    "EnricoMi",
    "enriikke",
    "erlef",
    "game-ci",
    "getsentry",
    "github",
    "githubocto",
    "golangci",
    "goreleaser",
    "gradle",
    "haskell",
    "JamesIves",
    "marvinpinto",
    "microsoft",
    "mikepenz",
    "msys2",
    "ncipollo",
    "nwtgck",
    "octokit",
    "peaceiris",
    "peter-evans",
    "preactjs",
    "ReactiveCircus",
    "reviewdog",
    "rhysd",
    "ridedott",
    "rtCamp",
    "ruby",
    "shivammathur",
    "softprops",
    "subosito",
    "Swatinem",
    "treosh",
    "wearerequired",
];

/// How many times a rate-limited request is attempted before giving up.
const MAX_ATTEMPTS: u64 = 10;

const TOO_MANY_REQUESTS: u16 = 429;

/// A single `uses:` that references an owner.
struct Usage {
    spec: String,
    position: Position,
}

enum VerifierState {
    /// Recording usages, grouped by owner in first-seen order.
    Collecting(IndexMap<String, Vec<Usage>>),
    Verifying,
    Done,
}

pub(crate) struct RepoJacking {
    config: Arc<RuleSetConfig>,
    probe: Arc<dyn OwnerProbe>,
    state: VerifierState,
}

rule_meta!(
    RepoJacking,
    "repo-jacking",
    "Verifies that external actions point to an existing GitHub user or organization"
);

impl Rule for RepoJacking {
    fn new(state: &RuleState) -> Result<Self, RuleLoadError> {
        if !state.config.connectivity {
            return Err(RuleLoadError::Skip(anyhow!("can't reach github.com")));
        }

        let Some(probe) = state.probe.clone() else {
            return Err(RuleLoadError::Skip(anyhow!("offline mode")));
        };

        Ok(Self {
            config: state.config.clone(),
            probe,
            state: VerifierState::Collecting(Default::default()),
        })
    }

    fn honors_trigger_filter(&self) -> bool {
        false
    }

    hooks!(OnStep, OnWorkflowLeave);
}

impl OnStep for RepoJacking {
    fn on_step(&mut self, step: &Step, _: &mut Sink) {
        let VerifierState::Collecting(owners) = &mut self.state else {
            return;
        };

        let StepBody::Uses { uses, .. } = &step.body else {
            return;
        };

        let spec = uses.as_str();
        if spec.starts_with("./") || spec.starts_with("docker://") || uses.has_expression() {
            return;
        }

        let Some((owner, _)) = spec.split_once('/') else {
            return;
        };

        owners.entry(owner.into()).or_default().push(Usage {
            spec: spec.into(),
            position: uses.position,
        });
    }
}

#[async_trait::async_trait]
impl OnWorkflowLeave for RepoJacking {
    async fn on_workflow_leave(&mut self, _: &Workflow, sink: &mut Sink) {
        let owners = match std::mem::replace(&mut self.state, VerifierState::Verifying) {
            VerifierState::Collecting(owners) => owners,
            other => {
                self.state = other;
                return;
            }
        };

        for (owner, usages) in owners {
            if self.is_known(&owner) {
                continue;
            }

            let url = format!("https://github.com/{owner}");
            match self.fetch(&url).await {
                Ok(200) => {}
                Ok(status) => {
                    for usage in usages {
                        sink.report(
                            usage.position,
                            format!(
                                "Got a {status} status code while fetching \"{url}\". You might be able to perform a repo-jacking attack to takeover the \"{spec}\" action.",
                                spec = usage.spec
                            ),
                        );
                    }
                }
                Err(e) => sink.report(
                    Position::new(0, 0),
                    format!(
                        "Error while fetching \"{url}\": \"{error}\". Check you internet connectivity.",
                        error = error_chain(&e)
                    ),
                ),
            }
        }

        self.state = VerifierState::Done;
    }
}

impl RepoJacking {
    fn is_known(&self, owner: &str) -> bool {
        KNOWN_OWNERS.contains(&owner) || self.config.known_owners.iter().any(|o| o == owner)
    }

    /// Fetches `url`, backing off linearly while rate limited.
    async fn fetch(&self, url: &str) -> Result<u16, ClientError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let status = self.probe.status(url).await?;
            if status != TOO_MANY_REQUESTS {
                return Ok(status);
            }

            if attempt < MAX_ATTEMPTS {
                tracing::debug!("got 429 while fetching {url}, sleeping {attempt}s");
                tokio::time::sleep(Duration::from_secs(attempt)).await;
            }
        }

        Err(ClientError::Unexpected(format!(
            "still rate limited after {MAX_ATTEMPTS} attempts"
        )))
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}
