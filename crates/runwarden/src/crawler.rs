//! Mirrors the workflows of a GitHub organization to disk.
//!
//! Every branch of every repository lands in
//! `<output-dir>/<repo>/<branch>/`, next to an empty `.git` marker so that
//! a later scan treats each branch as its own project.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::github::{ClientError, Contents, EntryKind, RateLimit, RepoApi};

/// Below this many remaining requests, wait for the bucket to refill.
const RATE_LIMIT_THRESHOLD: u64 = 10;

const RESET_MARGIN: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub(crate) enum CrawlError {
    #[error("GitHub API error")]
    Api(#[from] ClientError),
    #[error("couldn't write {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct CrawlOptions {
    pub(crate) org: String,
    /// The directory (or file) to mirror in each branch, without
    /// surrounding slashes.
    pub(crate) path: String,
    pub(crate) output_dir: Utf8PathBuf,
    pub(crate) default_branch_only: bool,
    pub(crate) max_branches: Option<usize>,
}

pub(crate) struct Crawler<A> {
    api: A,
    opts: CrawlOptions,
}

impl<A: RepoApi> Crawler<A> {
    pub(crate) fn new(api: A, opts: CrawlOptions) -> Self {
        Self { api, opts }
    }

    /// Mirrors every repository owned by the organization, returning how
    /// many were mirrored.
    ///
    /// Only a failure to list the repositories is fatal: a repository that
    /// fails midway is logged and skipped.
    pub(crate) async fn crawl_org(&self) -> Result<usize, ClientError> {
        let org = &self.opts.org;
        tracing::info!("downloading files of {org}");

        let repos = self.api.list_repos(org).await?;

        let mut mirrored = 0;
        for repo in repos
            .iter()
            .filter(|repo| repo.owner.login.eq_ignore_ascii_case(org))
        {
            match self.crawl_repo(&repo.name).await {
                Ok(()) => mirrored += 1,
                Err(e) => tracing::error!(
                    "couldn't download {org}/{name}: {e}",
                    name = repo.name
                ),
            }
        }

        Ok(mirrored)
    }

    /// Mirrors the selected branches of a single repository.
    pub(crate) async fn crawl_repo(&self, repo: &str) -> Result<(), CrawlError> {
        let org = &self.opts.org;

        self.wait_for_rate_limit().await?;
        let branches = self.branches(repo).await?;

        for branch in &branches {
            self.mirror_branch(repo, branch).await?;
        }

        tracing::info!(
            "downloaded {org}/{repo} ({n} branches)",
            n = branches.len()
        );
        Ok(())
    }

    async fn branches(&self, repo: &str) -> Result<Vec<String>, ClientError> {
        let org = &self.opts.org;

        if self.opts.default_branch_only {
            return Ok(vec![self.api.default_branch(org, repo).await?]);
        }

        let mut branches = self
            .api
            .list_branches(org, repo)
            .await?
            .into_iter()
            .map(|branch| branch.name)
            .collect::<Vec<_>>();

        if let Some(max) = self.opts.max_branches {
            branches.truncate(max);
        }

        Ok(branches)
    }

    async fn mirror_branch(&self, repo: &str, branch: &str) -> Result<(), CrawlError> {
        let org = &self.opts.org;
        let path = &self.opts.path;

        self.wait_for_rate_limit().await?;
        let Some(contents) = self.api.contents(org, repo, path, branch).await? else {
            tracing::debug!("{org}/{repo} has no {path} on {branch}");
            return Ok(());
        };

        let branch_dir = self.opts.output_dir.join(repo).join(branch);
        create_dir(&branch_dir).await?;
        write(&branch_dir.join(".git"), "").await?;

        let mut pending = match contents {
            Contents::File(entry) => vec![entry],
            Contents::Dir(entries) => entries,
        };

        while let Some(entry) = pending.pop() {
            let Some(relative) = safe_path(&entry.path) else {
                tracing::warn!(
                    "skipping suspicious path {path} in {org}/{repo}",
                    path = entry.path
                );
                continue;
            };

            match entry.kind {
                EntryKind::File => {
                    let body = self.api.raw_file(org, repo, &entry.path, branch).await?;
                    let Some(body) = body else {
                        tracing::debug!("{path} vanished from {org}/{repo}", path = entry.path);
                        continue;
                    };

                    if body.is_empty() {
                        tracing::warn!(
                            "{path} in {org}/{repo} ({branch}) is empty",
                            path = entry.path
                        );
                    }

                    let dest = branch_dir.join(relative);
                    if let Some(parent) = dest.parent() {
                        create_dir(parent).await?;
                    }
                    write(&dest, &body).await?;
                }
                EntryKind::Dir => {
                    self.wait_for_rate_limit().await?;
                    match self.api.contents(org, repo, &entry.path, branch).await? {
                        Some(Contents::Dir(entries)) => pending.extend(entries),
                        Some(Contents::File(entry)) => pending.push(entry),
                        None => {}
                    }
                }
                EntryKind::Symlink | EntryKind::Submodule => {
                    tracing::debug!(
                        "skipping {path}: not a file or directory",
                        path = entry.path
                    );
                }
            }
        }

        Ok(())
    }

    async fn wait_for_rate_limit(&self) -> Result<(), ClientError> {
        let limit = self.api.rate_limit().await?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());

        if let Some(wait) = backoff(limit, now) {
            tracing::warn!(
                "{remaining} API requests left, sleeping {secs}s until the limit resets",
                remaining = limit.remaining,
                secs = wait.as_secs()
            );
            tokio::time::sleep(wait).await;
        }

        Ok(())
    }
}

/// How long to wait before the next batch of requests, if at all.
fn backoff(limit: RateLimit, now: u64) -> Option<Duration> {
    (limit.remaining < RATE_LIMIT_THRESHOLD)
        .then(|| Duration::from_secs(limit.reset.saturating_sub(now)) + RESET_MARGIN)
}

/// Returns `path` if it stays within the directory it's joined to.
fn safe_path(path: &str) -> Option<&Utf8Path> {
    let path = Utf8Path::new(path);
    path.components()
        .all(|c| matches!(c, Utf8Component::Normal(_)))
        .then_some(path)
}

async fn create_dir(path: &Utf8Path) -> Result<(), CrawlError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| CrawlError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn write(path: &Utf8Path, contents: &str) -> Result<(), CrawlError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| CrawlError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeMap, HashSet},
        fs,
        sync::Mutex,
        time::Duration,
    };

    use camino::{Utf8Path, Utf8PathBuf};
    use pretty_assertions::assert_eq;

    use super::{CrawlOptions, Crawler, backoff, safe_path};
    use crate::github::{
        Branch, ClientError, Contents, Entry, EntryKind, Owner, RateLimit, RepoApi, Repository,
    };

    /// An in-memory organization.
    #[derive(Default)]
    struct FakeApi {
        repos: Vec<(&'static str, &'static str)>,
        branches: BTreeMap<&'static str, Vec<&'static str>>,
        /// `(repo, branch, path) => contents`
        files: BTreeMap<(&'static str, &'static str, &'static str), &'static str>,
        broken: HashSet<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RepoApi for FakeApi {
        async fn rate_limit(&self) -> Result<RateLimit, ClientError> {
            self.record("rate_limit".into());
            Ok(RateLimit {
                remaining: 5000,
                reset: 0,
            })
        }

        async fn list_repos(&self, org: &str) -> Result<Vec<Repository>, ClientError> {
            if org == "nobody" {
                return Err(ClientError::Unexpected("no such organization".into()));
            }

            Ok(self
                .repos
                .iter()
                .map(|(owner, name)| Repository {
                    name: name.to_string(),
                    owner: Owner {
                        login: owner.to_string(),
                    },
                    default_branch: None,
                })
                .collect())
        }

        async fn default_branch(&self, _: &str, repo: &str) -> Result<String, ClientError> {
            Ok(self.branches[repo][0].to_string())
        }

        async fn list_branches(&self, _: &str, repo: &str) -> Result<Vec<Branch>, ClientError> {
            if self.broken.contains(repo) {
                return Err(ClientError::Unexpected("boom".into()));
            }

            Ok(self.branches[repo]
                .iter()
                .map(|name| Branch {
                    name: name.to_string(),
                })
                .collect())
        }

        async fn contents(
            &self,
            _: &str,
            repo: &str,
            path: &str,
            git_ref: &str,
        ) -> Result<Option<Contents>, ClientError> {
            self.record(format!("contents {repo} {git_ref} {path}"));

            let mut children = BTreeMap::new();
            for (file_repo, file_ref, file_path) in self.files.keys() {
                if (*file_repo, *file_ref) != (repo, git_ref) {
                    continue;
                }

                if *file_path == path {
                    return Ok(Some(Contents::File(Entry {
                        path: path.into(),
                        kind: EntryKind::File,
                    })));
                }

                let Some(rest) = file_path.strip_prefix(&format!("{path}/")) else {
                    continue;
                };

                let (child, kind) = match rest.split_once('/') {
                    Some((dir, _)) => (format!("{path}/{dir}"), EntryKind::Dir),
                    None => (file_path.to_string(), EntryKind::File),
                };
                children.insert(child, kind);
            }

            if children.is_empty() {
                return Ok(None);
            }

            Ok(Some(Contents::Dir(
                children
                    .into_iter()
                    .map(|(path, kind)| Entry { path, kind })
                    .collect(),
            )))
        }

        async fn raw_file(
            &self,
            _: &str,
            repo: &str,
            path: &str,
            git_ref: &str,
        ) -> Result<Option<String>, ClientError> {
            Ok(self
                .files
                .iter()
                .find(|((r, b, p), _)| (*r, *b, *p) == (repo, git_ref, path))
                .map(|(_, body)| body.to_string()))
        }
    }

    fn org() -> FakeApi {
        FakeApi {
            repos: vec![
                ("acme", "api"),
                ("ACME", "web"),
                ("acme", "empty"),
                ("someone-else", "fork"),
            ],
            branches: BTreeMap::from([
                ("api", vec!["main", "dev"]),
                ("web", vec!["main"]),
                ("empty", vec!["main"]),
                ("fork", vec!["main"]),
            ]),
            files: BTreeMap::from([
                (("api", "main", ".github/workflows/ci.yml"), "on: push\n"),
                (("api", "main", ".github/workflows/nested/x.yml"), "on: pull_request\n"),
                (("api", "dev", ".github/workflows/ci.yml"), "on: workflow_dispatch\n"),
                (("web", "main", ".github/workflows/deploy.yaml"), "on: release\n"),
                (("fork", "main", ".github/workflows/ci.yml"), "on: push\n"),
            ]),
            ..Default::default()
        }
    }

    fn options(output_dir: &Utf8Path) -> CrawlOptions {
        CrawlOptions {
            org: "acme".into(),
            path: ".github/workflows".into(),
            output_dir: output_dir.to_path_buf(),
            default_branch_only: false,
            max_branches: None,
        }
    }

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    fn read(path: Utf8PathBuf) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[tokio::test]
    async fn test_crawl_org() {
        let (_guard, out) = tempdir();
        let crawler = Crawler::new(org(), options(&out));

        assert_eq!(crawler.crawl_org().await.unwrap(), 3);

        assert_eq!(read(out.join("api/main/.github/workflows/ci.yml")), "on: push\n");
        assert_eq!(
            read(out.join("api/main/.github/workflows/nested/x.yml")),
            "on: pull_request\n"
        );
        assert_eq!(
            read(out.join("api/dev/.github/workflows/ci.yml")),
            "on: workflow_dispatch\n"
        );
        assert_eq!(
            read(out.join("web/main/.github/workflows/deploy.yaml")),
            "on: release\n"
        );
        assert_eq!(read(out.join("api/main/.git")), "");

        // Nothing to mirror, so no marker either.
        assert!(!out.join("empty").exists());
        // Not owned by the organization.
        assert!(!out.join("fork").exists());
    }

    #[tokio::test]
    async fn test_branch_selection() {
        let (_guard, out) = tempdir();
        let crawler = Crawler::new(
            org(),
            CrawlOptions {
                max_branches: Some(1),
                ..options(&out)
            },
        );
        crawler.crawl_repo("api").await.unwrap();
        assert!(out.join("api/main").is_dir());
        assert!(!out.join("api/dev").exists());

        let (_guard, out) = tempdir();
        let crawler = Crawler::new(
            org(),
            CrawlOptions {
                default_branch_only: true,
                ..options(&out)
            },
        );
        crawler.crawl_repo("api").await.unwrap();
        assert!(out.join("api/main").is_dir());
        assert!(!out.join("api/dev").exists());
    }

    #[tokio::test]
    async fn test_single_file_path() {
        let (_guard, out) = tempdir();
        let crawler = Crawler::new(
            org(),
            CrawlOptions {
                path: ".github/workflows/ci.yml".into(),
                ..options(&out)
            },
        );
        crawler.crawl_repo("api").await.unwrap();

        assert_eq!(read(out.join("api/main/.github/workflows/ci.yml")), "on: push\n");
        assert!(!out.join("api/main/.github/workflows/nested").exists());
    }

    #[tokio::test]
    async fn test_rate_limit_checked_per_batch() {
        let (_guard, out) = tempdir();
        let crawler = Crawler::new(org(), options(&out));
        crawler.crawl_repo("web").await.unwrap();

        assert_eq!(
            crawler.api.calls(),
            [
                "rate_limit",
                "rate_limit",
                "contents web main .github/workflows",
            ]
        );
    }

    #[tokio::test]
    async fn test_repo_failure_is_not_fatal() {
        let (_guard, out) = tempdir();
        let mut api = org();
        api.broken.insert("api");
        let crawler = Crawler::new(api, options(&out));

        assert_eq!(crawler.crawl_org().await.unwrap(), 2);
        assert!(out.join("web/main/.github/workflows/deploy.yaml").is_file());

        let crawler = Crawler::new(
            org(),
            CrawlOptions {
                org: "nobody".into(),
                ..options(&out)
            },
        );
        assert!(crawler.crawl_org().await.is_err());
    }

    #[test]
    fn test_backoff() {
        let plenty = RateLimit {
            remaining: 10,
            reset: 1_000,
        };
        assert_eq!(backoff(plenty, 900), None);

        let low = RateLimit {
            remaining: 9,
            reset: 1_000,
        };
        assert_eq!(backoff(low, 900), Some(Duration::from_secs(105)));
        assert_eq!(backoff(low, 2_000), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_safe_path() {
        assert!(safe_path(".github/workflows/ci.yml").is_some());
        assert!(safe_path("../escape.yml").is_none());
        assert!(safe_path("/etc/passwd").is_none());
        assert!(safe_path("a/../../b").is_none());
    }
}
