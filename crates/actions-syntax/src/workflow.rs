//! Workflow models.
//!
//! These cover the parts of a workflow definition that matter for static
//! analysis: triggers, jobs, steps, and the scalars inside them. Unknown
//! keys are ignored rather than rejected.

use std::path::Path;

use indexmap::IndexMap;

use crate::{
    Position, SyntaxError,
    yaml::{self, Mapping, Node, NodeKind, Scalar},
};

/// A single workflow trigger, e.g. `push` or `pull_request_target`.
#[derive(Clone, Debug, PartialEq)]
pub struct Trigger {
    /// The event name.
    pub event: String,
    /// Where the event is named.
    pub position: Position,
}

/// A single environment variable.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvVar {
    /// The variable's name.
    pub name: Scalar,
    /// The variable's value, if it has one.
    pub value: Option<Scalar>,
}

/// An `env:` block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Env {
    vars: Vec<EnvVar>,
}

impl Env {
    /// Returns the variables in document order.
    pub fn iter(&self) -> impl Iterator<Item = &EnvVar> {
        self.vars.iter()
    }

    fn from_node(node: Option<&Node>) -> Self {
        let vars = node
            .and_then(Node::as_mapping)
            .map(|mapping| {
                mapping
                    .iter()
                    .map(|(name, value)| EnvVar {
                        name: name.clone(),
                        value: value.as_scalar().cloned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { vars }
    }
}

/// A job's `runs-on:` labels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunsOn {
    /// The labels, in document order.
    pub labels: Vec<Scalar>,
}

impl RunsOn {
    fn from_node(node: Option<&Node>) -> Self {
        let labels = match node.map(|n| &n.kind) {
            Some(NodeKind::Scalar(label)) => vec![label.clone()],
            Some(NodeKind::Sequence(items)) => scalars(items),
            // runs-on: { group: ..., labels: ... }
            Some(NodeKind::Mapping(mapping)) => match mapping.get("labels").map(|n| &n.kind) {
                Some(NodeKind::Scalar(label)) => vec![label.clone()],
                Some(NodeKind::Sequence(items)) => scalars(items),
                _ => vec![],
            },
            _ => vec![],
        };

        Self { labels }
    }
}

/// A job's `strategy.matrix`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Matrix {
    /// Where the matrix is defined.
    pub position: Position,
    /// The matrix's rows, excluding `include` and `exclude`. Each row holds
    /// its scalar values; a row given as an expression holds that
    /// expression as its only value.
    pub rows: IndexMap<String, Vec<Scalar>>,
    /// The scalar properties of each `include` entry.
    pub include: Vec<IndexMap<String, Scalar>>,
    /// When the whole matrix is an expression, that expression.
    pub expression: Option<Scalar>,
}

impl Matrix {
    fn from_node(node: &Node) -> Self {
        let mut matrix = Self {
            position: node.position,
            ..Default::default()
        };

        match &node.kind {
            NodeKind::Scalar(expr) => matrix.expression = Some(expr.clone()),
            NodeKind::Mapping(mapping) => {
                for (key, value) in mapping.iter() {
                    match key.as_str() {
                        "include" => {
                            matrix.include = value
                                .as_sequence()
                                .unwrap_or_default()
                                .iter()
                                .filter_map(Node::as_mapping)
                                .map(|entry| {
                                    entry
                                        .iter()
                                        .filter_map(|(k, v)| {
                                            v.as_scalar().map(|v| (k.value.clone(), v.clone()))
                                        })
                                        .collect()
                                })
                                .collect();
                        }
                        "exclude" => {}
                        row => {
                            let values = match &value.kind {
                                NodeKind::Scalar(expr) => vec![expr.clone()],
                                NodeKind::Sequence(items) => scalars(items),
                                _ => vec![],
                            };
                            matrix.rows.insert(row.to_string(), values);
                        }
                    }
                }
            }
            _ => {}
        }

        matrix
    }

    /// Returns the literal candidate values for the property `prop`, taken
    /// from its row and from every `include` entry. Property names are
    /// compared case-insensitively, and values containing expressions are
    /// left out.
    pub fn candidates(&self, prop: &str) -> Vec<&Scalar> {
        let rows = self
            .rows
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(prop))
            .flat_map(|(_, values)| values);

        let includes = self.include.iter().flat_map(|entry| {
            entry
                .iter()
                .filter(|(name, _)| name.eq_ignore_ascii_case(prop))
                .map(|(_, value)| value)
        });

        rows.chain(includes)
            .filter(|value| !value.has_expression())
            .collect()
    }
}

/// Registry credentials for a container or service.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Credentials {
    /// `username:`
    pub username: Option<Scalar>,
    /// `password:`
    pub password: Option<Scalar>,
}

/// A job's `container:`, or one of its `services:`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Container {
    /// Where the container is defined.
    pub position: Position,
    /// `image:`, or the container itself when given as a bare string.
    pub image: Option<Scalar>,
    /// `credentials:`
    pub credentials: Option<Credentials>,
}

impl Container {
    fn from_node(node: &Node) -> Self {
        match &node.kind {
            NodeKind::Scalar(image) => Self {
                position: node.position,
                image: Some(image.clone()),
                credentials: None,
            },
            NodeKind::Mapping(mapping) => Self {
                position: node.position,
                image: scalar(mapping, "image"),
                credentials: mapping
                    .get("credentials")
                    .and_then(Node::as_mapping)
                    .map(|creds| Credentials {
                        username: scalar(creds, "username"),
                        password: scalar(creds, "password"),
                    }),
            },
            _ => Self {
                position: node.position,
                ..Default::default()
            },
        }
    }
}

/// An input passed to an action with `with:`.
#[derive(Clone, Debug, PartialEq)]
pub struct Input {
    /// The input's name.
    pub name: Scalar,
    /// The input's value.
    pub value: Scalar,
}

/// What a step does.
#[derive(Clone, Debug, PartialEq)]
pub enum StepBody {
    /// A `run:` step.
    Run {
        /// The script.
        run: Scalar,
        /// `working-directory:`
        working_directory: Option<Scalar>,
        /// `shell:`
        shell: Option<Scalar>,
    },
    /// A `uses:` step.
    Uses {
        /// The action reference, e.g. `actions/checkout@v4`.
        uses: Scalar,
        /// The action's inputs, excluding `entrypoint` and `args`.
        with: IndexMap<String, Input>,
        /// `with.entrypoint`, for container actions.
        entrypoint: Option<Scalar>,
        /// `with.args`, for container actions.
        args: Option<Scalar>,
    },
}

/// A single step within a job.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    /// Where the step begins.
    pub position: Position,
    /// `id:`
    pub id: Option<Scalar>,
    /// `name:`
    pub name: Option<Scalar>,
    /// `if:`
    pub if_cond: Option<Scalar>,
    /// `env:`
    pub env: Env,
    /// What the step does.
    pub body: StepBody,
}

impl Step {
    fn from_node(node: &Node) -> Result<Self, SyntaxError> {
        let mapping = expect_mapping(node, "step")?;

        let body = if let Some(run) = scalar(mapping, "run") {
            StepBody::Run {
                run,
                working_directory: scalar(mapping, "working-directory"),
                shell: scalar(mapping, "shell"),
            }
        } else if let Some(uses) = scalar(mapping, "uses") {
            let mut with = IndexMap::new();
            let mut entrypoint = None;
            let mut args = None;

            for (name, value) in mapping
                .get("with")
                .and_then(Node::as_mapping)
                .into_iter()
                .flat_map(Mapping::iter)
            {
                let Some(value) = value.as_scalar() else {
                    continue;
                };

                match name.as_str() {
                    "entrypoint" => entrypoint = Some(value.clone()),
                    "args" => args = Some(value.clone()),
                    _ => {
                        with.insert(
                            name.value.clone(),
                            Input {
                                name: name.clone(),
                                value: value.clone(),
                            },
                        );
                    }
                }
            }

            StepBody::Uses {
                uses,
                with,
                entrypoint,
                args,
            }
        } else {
            return Err(SyntaxError::malformed(
                node.position,
                "step must have either `run` or `uses`",
            ));
        };

        Ok(Self {
            position: node.position,
            id: scalar(mapping, "id"),
            name: scalar(mapping, "name"),
            if_cond: scalar(mapping, "if"),
            env: Env::from_node(mapping.get("env")),
            body,
        })
    }
}

/// A single job within a workflow.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    /// The job's ID, i.e. its key under `jobs:`.
    pub id: Scalar,
    /// Where the job's definition begins.
    pub position: Position,
    /// `name:`
    pub name: Option<Scalar>,
    /// `if:`
    pub if_cond: Option<Scalar>,
    /// `runs-on:`
    pub runs_on: RunsOn,
    /// `strategy.matrix:`
    pub matrix: Option<Matrix>,
    /// `env:`
    pub env: Env,
    /// `container:`
    pub container: Option<Container>,
    /// `services:`, keyed by service ID.
    pub services: IndexMap<String, Container>,
    /// `steps:`, in order. Empty for jobs that call reusable workflows.
    pub steps: Vec<Step>,
}

impl Job {
    fn from_node(id: &Scalar, node: &Node) -> Result<Self, SyntaxError> {
        let mapping = expect_mapping(node, "job")?;

        let steps = match mapping.get("steps") {
            Some(steps) => match &steps.kind {
                NodeKind::Sequence(items) => {
                    items.iter().map(Step::from_node).collect::<Result<_, _>>()?
                }
                NodeKind::Null => vec![],
                _ => {
                    return Err(SyntaxError::malformed(
                        steps.position,
                        "`steps` must be a sequence",
                    ));
                }
            },
            None => vec![],
        };

        let services = mapping
            .get("services")
            .and_then(Node::as_mapping)
            .into_iter()
            .flat_map(Mapping::iter)
            .map(|(id, service)| (id.value.clone(), Container::from_node(service)))
            .collect();

        Ok(Self {
            id: id.clone(),
            position: node.position,
            name: scalar(mapping, "name"),
            if_cond: scalar(mapping, "if"),
            runs_on: RunsOn::from_node(mapping.get("runs-on")),
            matrix: mapping
                .get("strategy")
                .and_then(|strategy| strategy.get("matrix"))
                .map(Matrix::from_node),
            env: Env::from_node(mapping.get("env")),
            container: mapping.get("container").map(Container::from_node),
            services,
            steps,
        })
    }
}

/// A workflow definition.
#[derive(Clone, Debug, PartialEq)]
pub struct Workflow {
    /// `name:`
    pub name: Option<Scalar>,
    /// The events the workflow is triggered by, in document order.
    pub on: Vec<Trigger>,
    /// `env:`
    pub env: Env,
    /// `jobs:`, in document order.
    pub jobs: IndexMap<String, Job>,
}

impl Workflow {
    /// Loads a workflow from its source text.
    pub fn from_string(source: &str) -> Result<Self, SyntaxError> {
        let root = yaml::parse(source)?;
        let mapping = expect_mapping(&root, "workflow")?;

        let on = match mapping.get("on").map(|n| &n.kind) {
            Some(NodeKind::Scalar(event)) => vec![Trigger {
                event: event.value.clone(),
                position: event.position,
            }],
            Some(NodeKind::Sequence(events)) => events
                .iter()
                .filter_map(Node::as_scalar)
                .map(|event| Trigger {
                    event: event.value.clone(),
                    position: event.position,
                })
                .collect(),
            Some(NodeKind::Mapping(events)) => events
                .iter()
                .map(|(event, _)| Trigger {
                    event: event.value.clone(),
                    position: event.position,
                })
                .collect(),
            _ => vec![],
        };

        let Some(jobs) = mapping.get("jobs") else {
            return Err(SyntaxError::malformed(
                root.position,
                "workflow has no `jobs`",
            ));
        };

        let jobs = expect_mapping(jobs, "jobs")?
            .iter()
            .map(|(id, job)| Ok((id.value.clone(), Job::from_node(id, job)?)))
            .collect::<Result<_, SyntaxError>>()?;

        Ok(Self {
            name: scalar(mapping, "name"),
            on,
            env: Env::from_node(mapping.get("env")),
            jobs,
        })
    }

    /// Loads a workflow from a file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SyntaxError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| SyntaxError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_string(&source)
    }

    /// Returns whether the workflow is triggered by `event`.
    pub fn has_trigger(&self, event: &str) -> bool {
        self.on.iter().any(|t| t.event == event)
    }
}

fn expect_mapping<'a>(node: &'a Node, what: &str) -> Result<&'a Mapping, SyntaxError> {
    node.as_mapping()
        .ok_or_else(|| SyntaxError::malformed(node.position, format!("{what} must be a mapping")))
}

fn scalar(mapping: &Mapping, key: &str) -> Option<Scalar> {
    mapping.get(key).and_then(Node::as_scalar).cloned()
}

fn scalars(items: &[Node]) -> Vec<Scalar> {
    items.iter().filter_map(Node::as_scalar).cloned().collect()
}
