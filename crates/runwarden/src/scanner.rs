//! Runs the selected rules over a batch of workflow files.

use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use actions_syntax::{SyntaxError, Workflow};
use camino::{Utf8Path, Utf8PathBuf};
use owo_colors::OwoColorize;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::{
    config::RuleSetConfig,
    finding::Finding,
    github::OwnerProbe,
    project::{ProjectCache, project_root},
    registry::RuleRegistry,
    rules::RuleState,
    untrusted::UntrustedInputMap,
};

#[derive(Error, Debug)]
pub(crate) enum ScanError {
    #[error("couldn't read {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("couldn't parse {path}")]
    Syntax {
        path: Utf8PathBuf,
        #[source]
        source: SyntaxError,
    },
    #[error("scan task failed")]
    Task(#[from] tokio::task::JoinError),
}

pub(crate) struct Scanner {
    config: Arc<RuleSetConfig>,
    state: RuleState,
    registry: Arc<RuleRegistry>,
    cwd: Option<Utf8PathBuf>,
}

impl Scanner {
    pub(crate) fn new(
        config: Arc<RuleSetConfig>,
        untrusted: Arc<UntrustedInputMap>,
        probe: Option<Arc<dyn OwnerProbe>>,
    ) -> Self {
        let state = RuleState::new(config.clone(), untrusted);
        let state = match probe {
            Some(probe) => state.with_probe(probe),
            None => state,
        };

        let registry = Arc::new(RuleRegistry::default_rules(&state));
        tracing::debug!("scanning with {n} rules", n = registry.len());

        let cwd = std::env::current_dir()
            .ok()
            .and_then(|cwd| Utf8PathBuf::try_from(cwd).ok());

        Self {
            config,
            state,
            registry,
            cwd,
        }
    }

    /// Scans every file in `paths`, returning the findings ordered by
    /// input, then by line and column.
    ///
    /// Fails with the error of the first file (in input order) that
    /// couldn't be read or parsed.
    pub(crate) async fn scan(&self, paths: &[Utf8PathBuf]) -> Result<Vec<Finding>, ScanError> {
        let per_file = match paths {
            [] => return Ok(vec![]),
            [path] => {
                let project = index_project(project_root(path)).await?;
                let state = self.state.with_project(Some(project));
                vec![scan_file(&self.registry, state, path, None).await?]
            }
            paths => self.scan_many(paths).await?,
        };

        Ok(paths
            .iter()
            .zip(per_file)
            .flat_map(|(path, findings)| self.merge(path, findings))
            .collect())
    }

    async fn scan_many(&self, paths: &[Utf8PathBuf]) -> Result<Vec<Vec<Finding>>, ScanError> {
        let mut projects: HashMap<Utf8PathBuf, Arc<ProjectCache>> = HashMap::new();
        let roots = paths.iter().map(|path| project_root(path)).collect::<Vec<_>>();
        for root in &roots {
            if !projects.contains_key(root) {
                projects.insert(root.clone(), index_project(root.clone()).await?);
            }
        }

        let permits = Arc::new(Semaphore::new(
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        ));

        let handles = paths
            .iter()
            .zip(&roots)
            .map(|(path, root)| {
                let registry = self.registry.clone();
                let state = self.state.with_project(projects.get(root).cloned());
                let permits = permits.clone();
                let path = path.clone();

                tokio::spawn(async move {
                    scan_file(&registry, state, &path, Some(&permits)).await
                })
            })
            .collect::<Vec<_>>();

        let results = futures::future::join_all(handles).await;

        let mut per_file = Vec::with_capacity(results.len());
        for result in results {
            per_file.push(result??);
        }

        Ok(per_file)
    }

    fn merge(&self, path: &Utf8Path, findings: Vec<Finding>) -> Vec<Finding> {
        let path = self.display_path(path);

        let mut findings = findings
            .into_iter()
            .filter(|finding| !self.config.ignores(finding))
            .map(|finding| finding.at_path(path.clone()))
            .collect::<Vec<_>>();

        findings.sort_by_key(|finding| (finding.position.line, finding.position.column));
        findings
    }

    /// Makes `path` relative to the current directory, if it's under it.
    fn display_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.cwd
            .as_deref()
            .filter(|_| path.is_absolute())
            .and_then(|cwd| path.strip_prefix(cwd).ok())
            .unwrap_or(path)
            .to_path_buf()
    }
}

/// Indexes a project on the blocking pool, since walking the tree is
/// synchronous.
async fn index_project(root: Utf8PathBuf) -> Result<Arc<ProjectCache>, ScanError> {
    let project = tokio::task::spawn_blocking(move || ProjectCache::index(&root)).await?;
    Ok(Arc::new(project))
}

async fn scan_file(
    registry: &RuleRegistry,
    state: RuleState,
    path: &Utf8Path,
    permits: Option<&Semaphore>,
) -> Result<Vec<Finding>, ScanError> {
    let source = {
        let _permit = match permits {
            Some(permits) => permits.acquire().await.ok(),
            None => None,
        };

        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ScanError::Read {
                path: path.to_path_buf(),
                source,
            })?
    };

    let workflow = Workflow::from_string(&source).map_err(|source| ScanError::Syntax {
        path: path.to_path_buf(),
        source,
    })?;

    let findings = registry.dispatcher(&state).run(&workflow).await;

    tracing::info!(
        "🌈 {completed} {path}",
        completed = "completed".green()
    );

    Ok(findings)
}
