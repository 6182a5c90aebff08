//! The set of rules selected for a scan.

use anyhow::anyhow;
use indexmap::IndexMap;

use crate::{
    config::RuleSetConfig,
    dispatch::Dispatcher,
    rules::{self, Rule, RuleLoadError, RuleState},
};

type Builder = fn(&RuleState) -> Result<Box<dyn Rule>, RuleLoadError>;

fn build<R: Rule + 'static>(state: &RuleState) -> Result<Box<dyn Rule>, RuleLoadError> {
    Ok(Box::new(R::new(state)?))
}

/// Checks whether a rule should run under `state`.
fn admit<R: Rule>(state: &RuleState, ident: &str) -> Result<(), RuleLoadError> {
    if !state.config.selection.enables(ident) {
        return Err(RuleLoadError::Skip(anyhow!("not selected")));
    }

    R::new(state).map(drop)
}

struct Entry {
    desc: &'static str,
    build: Builder,
}

pub(crate) struct RuleRegistry {
    rules: IndexMap<&'static str, Entry>,
}

impl RuleRegistry {
    fn empty() -> Self {
        Self {
            rules: Default::default(),
        }
    }

    /// Every rule that would run under `state`, in registration order.
    pub(crate) fn default_rules(state: &RuleState) -> Self {
        Self::collect(Some(state))
    }

    /// Every rule runwarden knows about, regardless of configuration.
    pub(crate) fn catalog() -> Self {
        Self::collect(None)
    }

    fn collect(state: Option<&RuleState>) -> Self {
        let mut registry = Self::empty();

        macro_rules! register_rule {
            ($rule:path) => {{
                use $rule as base;

                use crate::rules::RuleCore as _;
                let admitted = match state {
                    Some(state) => admit::<base>(state, base::ident()),
                    None => Ok(()),
                };

                match admitted {
                    Ok(()) => registry.register(base::ident(), base::desc(), build::<base>),
                    Err(RuleLoadError::Skip(e)) => {
                        tracing::debug!("skipping {rule}: {e}", rule = base::ident())
                    }
                }
            }};
        }

        register_rule!(rules::dangerous_action::DangerousAction);
        register_rule!(rules::dangerous_checkout::DangerousCheckout);
        register_rule!(rules::expression_injection::ExpressionInjection);
        register_rule!(rules::dangerous_write::DangerousWrite);
        register_rule!(rules::local_action::LocalAction);
        register_rule!(rules::oidc_action::OidcAction);
        register_rule!(rules::runner_label::RunnerLabel);
        register_rule!(rules::unsecured_commands::UnsecuredCommands);
        register_rule!(rules::bot_check::BotCheck);
        register_rule!(rules::credentials::Credentials);
        register_rule!(rules::debug::ExternalTrigger);
        register_rule!(rules::debug::Artefacts);
        register_rule!(rules::debug::JsExec);
        register_rule!(rules::repo_jacking::RepoJacking);

        registry
    }

    fn register(&mut self, ident: &'static str, desc: &'static str, build: Builder) {
        self.rules.insert(ident, Entry { desc, build });
    }

    pub(crate) fn len(&self) -> usize {
        self.rules.len()
    }

    /// Yields `(ident, description)` pairs.
    pub(crate) fn iter_rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|(ident, entry)| (*ident, entry.desc))
    }

    /// Creates fresh rule instances for a single file.
    pub(crate) fn dispatcher(&self, state: &RuleState) -> Dispatcher {
        let rules = self
            .rules
            .iter()
            .filter_map(|(ident, entry)| match (entry.build)(state) {
                Ok(rule) => Some((*ident, rule)),
                Err(RuleLoadError::Skip(e)) => {
                    tracing::debug!("skipping {ident} for this input: {e}");
                    None
                }
            })
            .collect();

        Dispatcher::from_rules(state.config.clone(), rules)
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Whether the selection leaves `repo-jacking` enabled. The connectivity
/// probe is only worth running when it does.
pub(crate) fn wants_network(config: &RuleSetConfig) -> bool {
    use crate::rules::RuleCore as _;

    config
        .selection
        .enables(rules::repo_jacking::RepoJacking::ident())
}
