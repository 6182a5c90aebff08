use std::{fs, str::FromStr};

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::finding::Finding;

const CONFIG_CANDIDATES: &[&str] = &[
    ".github/runwarden.yml",
    ".github/runwarden.yaml",
    "runwarden.yml",
    "runwarden.yaml",
];

/// Triggers through which an outside party can feed data into a workflow.
pub(crate) const EXTERNAL_TRIGGERS: &[&str] = &[
    "workflow_run",
    "pull_request_target",
    "issue_comment",
    "issues",
    "discussion_comment",
    "discussion",
    "fork",
    "watch",
    "pull_request_review",
    "pull_request_review_comment",
];

const ALL_TRIGGERS: &[&str] = &[
    "branch_protection_rule",
    "check_run",
    "check_suite",
    "create",
    "delete",
    "deployment",
    "deployment_status",
    "discussion",
    "discussion_comment",
    "fork",
    "gollum",
    "issue_comment",
    "issues",
    "label",
    "merge_group",
    "milestone",
    "page_build",
    "project",
    "project_card",
    "project_column",
    "public",
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "pull_request_target",
    "push",
    "registry_package",
    "release",
    "repository_dispatch",
    "schedule",
    "status",
    "watch",
    "workflow_call",
    "workflow_dispatch",
    "workflow_run",
];

#[derive(Error, Debug)]
#[error("configuration error in {path}")]
pub(crate) struct ConfigError {
    /// The path to the configuration file that caused this error.
    path: String,
    /// The source of this error.
    pub(crate) source: ConfigErrorInner,
}

#[derive(Error, Debug)]
pub(crate) enum ConfigErrorInner {
    /// An I/O error occurred while loading the configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is syntactically invalid.
    #[error("invalid configuration syntax")]
    Syntax(#[source] serde_yaml::Error),

    /// An `ignore` pattern or a runner label pattern doesn't compile.
    #[error("invalid pattern")]
    InvalidRegex(#[from] regex::Error),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRules {
    #[serde(default)]
    disable: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSelfHostedRunner {
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RawRepoJacking {
    #[serde(default)]
    known_owners: Vec<String>,
}

/// The contents of a `runwarden.yml` file, exactly as written.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub(crate) struct Config {
    #[serde(default)]
    rules: RawRules,
    #[serde(default)]
    ignore: Vec<String>,
    #[serde(default)]
    self_hosted_runner: RawSelfHostedRunner,
    #[serde(default)]
    repo_jacking: RawRepoJacking,
}

impl Config {
    fn load(contents: &str) -> Result<Self, ConfigErrorInner> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(contents).map_err(ConfigErrorInner::Syntax)
    }

    /// Loads the configuration at `path`.
    pub(crate) fn from_path(path: &Utf8Path) -> Result<Self, ConfigError> {
        tracing::debug!("loading config from `{path}`");

        fs::read_to_string(path)
            .map_err(ConfigErrorInner::from)
            .and_then(|contents| Self::load(&contents))
            .map_err(|source| ConfigError {
                path: path.to_string(),
                source,
            })
    }

    /// Looks for a configuration file in `dir`, returning the first
    /// candidate that exists.
    pub(crate) fn discover(dir: &Utf8Path) -> Result<Option<Self>, ConfigError> {
        for candidate in CONFIG_CANDIDATES {
            let candidate_path = dir.join(candidate);
            if candidate_path.is_file() {
                tracing::debug!("found config candidate at `{candidate_path}`");
                return Self::from_path(&candidate_path).map(Some);
            }
        }

        tracing::debug!("no config found in `{dir}`");
        Ok(None)
    }
}

/// Which rules to run.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum RuleSelection {
    #[default]
    All,
    /// Run only the named rules.
    Enable(Vec<String>),
    /// Run every rule except the named ones.
    Disable(Vec<String>),
}

impl RuleSelection {
    pub(crate) fn enables(&self, ident: &str) -> bool {
        match self {
            RuleSelection::All => true,
            RuleSelection::Enable(names) => names.iter().any(|n| n == ident),
            RuleSelection::Disable(names) => !names.iter().any(|n| n == ident),
        }
    }

    /// Additionally disables `names`.
    pub(crate) fn disable(self, names: &[String]) -> Self {
        if names.is_empty() {
            return self;
        }

        match self {
            RuleSelection::All => RuleSelection::Disable(names.to_vec()),
            RuleSelection::Enable(enabled) => RuleSelection::Enable(
                enabled
                    .into_iter()
                    .filter(|n| !names.contains(n))
                    .collect(),
            ),
            RuleSelection::Disable(mut disabled) => {
                disabled.extend(names.iter().cloned());
                RuleSelection::Disable(disabled)
            }
        }
    }
}

/// The set of workflow triggers that rules honoring the filter care about.
///
/// An empty filter matches every workflow.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct TriggerFilter(Vec<String>);

impl TriggerFilter {
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn contains(&self, event: &str) -> bool {
        self.0.iter().any(|e| e == event)
    }

    /// Returns whether any of `events` passes the filter.
    pub(crate) fn matches<'a>(&self, mut events: impl Iterator<Item = &'a str>) -> bool {
        self.is_empty() || events.any(|event| self.contains(event))
    }
}

impl FromStr for TriggerFilter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let events = match s.trim() {
            "external" => EXTERNAL_TRIGGERS.iter().map(|e| e.to_string()).collect(),
            "allnopr" => ALL_TRIGGERS
                .iter()
                .filter(|e| **e != "pull_request")
                .map(|e| e.to_string())
                .collect(),
            list => list
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect(),
        };

        Ok(Self(events))
    }
}

/// Everything that shapes a scan, merged from the command line and the
/// configuration file.
#[derive(Debug, Default)]
pub(crate) struct RuleSetConfig {
    pub(crate) selection: RuleSelection,
    pub(crate) triggers: TriggerFilter,
    /// Only analyze `run:` scripts for expression injection.
    pub(crate) script_only: bool,
    pub(crate) debug_rules: bool,
    /// Findings whose message matches any of these are dropped.
    pub(crate) ignore: Vec<Regex>,
    /// Whether network-backed rules may run.
    pub(crate) connectivity: bool,
    pub(crate) self_hosted_labels: Vec<Regex>,
    pub(crate) known_owners: Vec<String>,
}

impl RuleSetConfig {
    /// Folds a configuration file into the command line settings.
    pub(crate) fn with_config(mut self, config: Config) -> Result<Self, ConfigErrorInner> {
        self.selection = self.selection.disable(&config.rules.disable);

        for pattern in &config.ignore {
            self.ignore.push(Regex::new(pattern)?);
        }

        for label in &config.self_hosted_runner.labels {
            self.self_hosted_labels.push(glob(label)?);
        }

        self.known_owners.extend(config.repo_jacking.known_owners);

        Ok(self)
    }

    pub(crate) fn ignores(&self, finding: &Finding) -> bool {
        self.ignore.iter().any(|re| re.is_match(&finding.message))
    }

    pub(crate) fn is_self_hosted_label(&self, label: &str) -> bool {
        self.self_hosted_labels.iter().any(|re| re.is_match(label))
    }
}

/// Compiles a `*` glob into an anchored, case-insensitive regex.
fn glob(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    Regex::new(&format!("(?i)^{body}$"))
}

/// Resolves the configuration file named by `--config`, or discovered
/// in the current directory.
pub(crate) fn locate(
    explicit: Option<&Utf8PathBuf>,
    no_config: bool,
    cwd: &Utf8Path,
) -> Result<Config, ConfigError> {
    if no_config {
        tracing::debug!("skipping config discovery: explicitly disabled");
        Ok(Config::default())
    } else if let Some(path) = explicit {
        Config::from_path(path)
    } else {
        Config::discover(cwd).map(Option::unwrap_or_default)
    }
}
