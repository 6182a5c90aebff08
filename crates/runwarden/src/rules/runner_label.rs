//! Classification of `runs-on:` labels.
//!
//! Each known GitHub-hosted label maps to a bitmask of the runner images it
//! may select. Two labels of the same job that share no bit can never be
//! satisfied by a single runner.

use std::sync::Arc;

use actions_expressions::{Expr, SpannedExpr};
use actions_syntax::{Job, Matrix, Position, Scalar};
use indexmap::IndexMap;

use super::{OnJobEnter, Rule, RuleLoadError, RuleState, Sink, hooks, rule_meta};
use crate::config::RuleSetConfig;

type Compat = u32;

const UBUNTU_2004: Compat = 1 << 0;
const UBUNTU_2204: Compat = 1 << 1;
const UBUNTU_2404: Compat = 1 << 2;
const MACOS_1015: Compat = 1 << 3;
const MACOS_11: Compat = 1 << 4;
const MACOS_12: Compat = 1 << 5;
const MACOS_12_L: Compat = 1 << 6;
const MACOS_12_XL: Compat = 1 << 7;
const MACOS_13: Compat = 1 << 8;
const MACOS_13_L: Compat = 1 << 9;
const MACOS_13_XL: Compat = 1 << 10;
const MACOS_14: Compat = 1 << 11;
const MACOS_14_L: Compat = 1 << 12;
const MACOS_14_XL: Compat = 1 << 13;
const WINDOWS_2016: Compat = 1 << 14;
const WINDOWS_2019: Compat = 1 << 15;
const WINDOWS_2022: Compat = 1 << 16;

const UBUNTU: Compat = UBUNTU_2004 | UBUNTU_2204 | UBUNTU_2404;
const MACOS: Compat = MACOS_1015
    | MACOS_11
    | MACOS_12
    | MACOS_12_L
    | MACOS_12_XL
    | MACOS_13
    | MACOS_13_L
    | MACOS_13_XL
    | MACOS_14
    | MACOS_14_L
    | MACOS_14_XL;
const WINDOWS: Compat = WINDOWS_2016 | WINDOWS_2019 | WINDOWS_2022;

/// Labels that select no image we know about. `0` never conflicts.
const NO_COMPAT: Compat = 0;

const DEFAULT_COMPATS: &[(&str, Compat)] = &[
    ("ubuntu-latest", UBUNTU_2404),
    ("ubuntu-latest-4-cores", UBUNTU_2404),
    ("ubuntu-latest-8-cores", UBUNTU_2404),
    ("ubuntu-latest-16-cores", UBUNTU_2404),
    ("ubuntu-24.04", UBUNTU_2404),
    ("ubuntu-22.04", UBUNTU_2204),
    ("ubuntu-20.04", UBUNTU_2004),
    ("macos-latest-xl", MACOS_14_XL),
    ("macos-latest-xlarge", MACOS_14_XL),
    ("macos-latest-large", MACOS_14_L),
    ("macos-latest", MACOS_14),
    ("macos-14-xl", MACOS_14_XL),
    ("macos-14-xlarge", MACOS_14_XL),
    ("macos-14-large", MACOS_14_L),
    ("macos-14", MACOS_14),
    ("macos-14.0", MACOS_14),
    ("macos-13-xl", MACOS_13_XL),
    ("macos-13-xlarge", MACOS_13_XL),
    ("macos-13-large", MACOS_13_L),
    ("macos-13", MACOS_13),
    ("macos-13.0", MACOS_13),
    ("macos-12-xl", MACOS_12_XL),
    ("macos-12-xlarge", MACOS_12_XL),
    ("macos-12-large", MACOS_12_L),
    ("macos-12", MACOS_12),
    ("macos-12.0", MACOS_12),
    ("macos-11", MACOS_11),
    ("macos-11.0", MACOS_11),
    ("macos-10.15", MACOS_1015),
    ("windows-latest", WINDOWS_2022),
    ("windows-latest-8-cores", WINDOWS_2022),
    ("windows-2022", WINDOWS_2022),
    ("windows-2019", WINDOWS_2019),
    ("windows-2016", WINDOWS_2016),
    ("linux", UBUNTU),
    ("macos", MACOS),
    ("windows", WINDOWS),
];

/// Retired images, still accepted as labels.
const KNOWN_LABELS: &[&str] = &["ubuntu-18.04", "ubuntu-16.04"];

pub(crate) struct RunnerLabel {
    config: Arc<RuleSetConfig>,
    /// Bitmasks seen so far in the current job, with the label that
    /// introduced each.
    compats: IndexMap<Compat, (String, Position)>,
}

rule_meta!(
    RunnerLabel,
    "runner-label",
    "Checks for GitHub-hosted and preset self-hosted runner labels in \"runs-on:\""
);

impl Rule for RunnerLabel {
    fn new(state: &RuleState) -> Result<Self, RuleLoadError> {
        Ok(Self {
            config: state.config.clone(),
            compats: Default::default(),
        })
    }

    fn honors_trigger_filter(&self) -> bool {
        false
    }

    hooks!(OnJobEnter);
}

impl OnJobEnter for RunnerLabel {
    fn on_job_enter(&mut self, job: &Job, sink: &mut Sink) {
        let labels = &job.runs_on.labels;

        match labels.as_slice() {
            [] => {}
            [label] if !is_expression_assigned(label) => {
                // A lone label can't conflict with anything; a partial
                // expression can't be resolved.
                if !label.has_expression() {
                    self.verify(label, sink);
                }
            }
            labels => {
                self.compats.clear();
                for label in labels {
                    self.check_with_conflicts(label, job.matrix.as_ref(), sink);
                }
                self.compats.clear();
            }
        }
    }
}

impl RunnerLabel {
    fn check_with_conflicts(&mut self, label: &Scalar, matrix: Option<&Matrix>, sink: &mut Sink) {
        if !label.has_expression() {
            let compat = self.verify(label, sink);
            if compat != NO_COMPAT && !self.conflicts(compat, label.as_str(), label.position, sink)
            {
                self.compats
                    .entry(compat)
                    .or_insert_with(|| (label.value.clone(), label.position));
            }
            return;
        }

        let candidates = matrix_candidates(label, matrix);
        if candidates.is_empty() {
            sink.report(
                label.position,
                format!(
                    "Expression in a label: \"{label}\". It might be a self-hosted runner.",
                    label = label.as_str()
                ),
            );
            return;
        }

        let compats = candidates
            .iter()
            .map(|candidate| self.verify(candidate, sink))
            .collect::<Vec<_>>();

        // Candidates are alternatives, so they're only checked against
        // the other labels, never against each other.
        let compats = compats
            .into_iter()
            .zip(&candidates)
            .map(|(compat, candidate)| {
                if compat != NO_COMPAT
                    && self.conflicts(compat, candidate.as_str(), candidate.position, sink)
                {
                    NO_COMPAT
                } else {
                    compat
                }
            })
            .collect::<Vec<_>>();

        for (compat, candidate) in compats.into_iter().zip(&candidates) {
            if compat != NO_COMPAT {
                self.compats
                    .entry(compat)
                    .or_insert_with(|| (candidate.value.clone(), candidate.position));
            }
        }
    }

    /// Returns the label's bitmask, reporting labels we don't recognize.
    fn verify(&self, label: &Scalar, sink: &mut Sink) -> Compat {
        let name = label.as_str();

        if let Some(compat) = compat_of(name) {
            return compat;
        }

        if KNOWN_LABELS.iter().any(|k| k.eq_ignore_ascii_case(name))
            || self.config.is_self_hosted_label(name)
        {
            return NO_COMPAT;
        }

        sink.report(
            label.position,
            format!("label \"{name}\" is non default and might be a self-hosted runner."),
        );

        NO_COMPAT
    }

    /// Reports the first earlier label that `compat` can't coexist with.
    fn conflicts(&self, compat: Compat, label: &str, position: Position, sink: &mut Sink) -> bool {
        let Some((earlier, at)) = self
            .compats
            .iter()
            .find(|(c, _)| *c & compat == 0)
            .map(|(_, seen)| seen)
        else {
            return false;
        };

        sink.report(
            position,
            format!(
                "label \"{label}\" conflicts with label \"{earlier}\" defined at {at}. note: to run your job on each workers, use matrix"
            ),
        );

        true
    }
}

fn compat_of(label: &str) -> Option<Compat> {
    let label = label.to_ascii_lowercase();

    DEFAULT_COMPATS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, compat)| *compat)
}

/// Whether the label is, once trimmed, a single `${{ ... }}` expression.
fn is_expression_assigned(label: &Scalar) -> bool {
    parse_assigned(label).is_some()
}

fn parse_assigned(label: &Scalar) -> Option<SpannedExpr<'_>> {
    let text = label.as_str().trim();
    let body = text.strip_prefix("${{")?;
    let (expr, consumed) = Expr::parse_fragment(body).ok()?;

    (consumed == body.len()).then_some(expr)
}

/// Resolves `${{ matrix.<prop> }}` to the matrix's literal values for
/// `<prop>`.
fn matrix_candidates<'a>(label: &Scalar, matrix: Option<&'a Matrix>) -> Vec<&'a Scalar> {
    let (Some(matrix), Some(expr)) = (matrix, parse_assigned(label)) else {
        return vec![];
    };

    match &expr.inner {
        Expr::ObjectDeref { receiver, property } => match &receiver.inner {
            Expr::Variable(name) if name == "matrix" => matrix.candidates(property.as_str()),
            _ => vec![],
        },
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{RunnerLabel, compat_of};
    use crate::{
        config::RuleSetConfig,
        rules::test_support::{check, run_rule, state},
    };

    fn messages(findings: Vec<(usize, usize, String)>) -> Vec<String> {
        findings.into_iter().map(|(_, _, m)| m).collect()
    }

    #[test]
    fn test_compat_table() {
        assert!(compat_of("Ubuntu-Latest").is_some());
        assert_eq!(compat_of("ubuntu-latest"), compat_of("ubuntu-24.04"));
        assert_eq!(compat_of("macos-latest"), compat_of("macos-14"));
        assert_eq!(compat_of("windows-latest"), compat_of("windows-2022"));
        assert_ne!(compat_of("linux").unwrap() & compat_of("ubuntu-20.04").unwrap(), 0);
        assert_eq!(compat_of("linux").unwrap() & compat_of("windows").unwrap(), 0);
        assert!(compat_of("ubuntu-18.04").is_none());
        assert!(compat_of("self-hosted").is_none());
    }

    #[tokio::test]
    async fn test_single_labels() {
        let findings = check::<RunnerLabel>(
            r#"on: push
jobs:
  a:
    runs-on: ubuntu-latest
  b:
    runs-on: ubuntu-16.04
  c:
    runs-on: my-runner
  d:
    runs-on: [gpu]
  e:
    runs-on: runner-${{ inputs.size }}
"#,
        )
        .await;

        assert_eq!(
            findings,
            [
                (
                    8,
                    14,
                    r#"label "my-runner" is non default and might be a self-hosted runner."#.into()
                ),
                (
                    10,
                    15,
                    r#"label "gpu" is non default and might be a self-hosted runner."#.into()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_conflicts() {
        let findings = check::<RunnerLabel>(
            r#"on: push
jobs:
  a:
    runs-on: [ubuntu-latest, linux]
  b:
    runs-on: [linux, windows-latest, macos]
  c:
    runs-on: [self-hosted, linux]
"#,
        )
        .await;

        assert_eq!(
            messages(findings),
            [
                r#"label "windows-latest" conflicts with label "linux" defined at 6:15. note: to run your job on each workers, use matrix"#,
                r#"label "macos" conflicts with label "linux" defined at 6:15. note: to run your job on each workers, use matrix"#,
                r#"label "self-hosted" is non default and might be a self-hosted runner."#,
            ]
        );
    }

    #[tokio::test]
    async fn test_matrix() {
        let findings = check::<RunnerLabel>(
            r#"on: push
jobs:
  a:
    strategy:
      matrix:
        os: [ubuntu-latest, windows-latest, my-box]
    runs-on: ${{ matrix.os }}
  b:
    strategy:
      matrix:
        os: [ubuntu-latest]
    runs-on: [linux, "${{ matrix.os }}"]
  c:
    runs-on: ${{ inputs.runner }}
  d:
    strategy:
      matrix:
        os: [windows-latest]
    runs-on: [linux, "${{ matrix.os }}"]
"#,
        )
        .await;

        assert_eq!(
            findings,
            [
                (
                    6,
                    45,
                    r#"label "my-box" is non default and might be a self-hosted runner."#.into()
                ),
                (
                    14,
                    14,
                    r#"Expression in a label: "${{ inputs.runner }}". It might be a self-hosted runner."#
                        .into()
                ),
                (
                    18,
                    14,
                    r#"label "windows-latest" conflicts with label "linux" defined at 19:15. note: to run your job on each workers, use matrix"#
                        .into()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_self_hosted_labels() {
        let config = RuleSetConfig::default()
            .with_config(serde_yaml::from_str("self-hosted-runner:\n  labels: [gpu-*]\n").unwrap())
            .unwrap();

        let findings = run_rule::<RunnerLabel>(
            &state(config),
            "on: push\njobs:\n  a:\n    runs-on: [gpu-large, linux]\n",
        )
        .await;

        assert!(findings.is_empty());
    }
}
