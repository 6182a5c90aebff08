//! GitHub clients.
//!
//! Two very different kinds of requests are made to GitHub:
//!
//! * [`OwnerProbe`]s check whether an account exists by fetching its
//!   profile page on the web frontend. These are unauthenticated.
//! * The [`Client`] talks to the REST API, and is used to mirror an
//!   organization's workflows locally.

use std::{fmt::Display, str::FromStr, time::Duration};

use reqwest::{
    Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue},
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

pub(crate) const RUNWARDEN_AGENT: &str =
    concat!("runwarden/", env!("CARGO_PKG_VERSION"), " (runwarden)");

const PAGE_SIZE: usize = 100;

/// How long any single request to GitHub may take, end to end.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The connectivity check gives up sooner than real requests.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Represents different types of GitHub hosts.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum GitHubHost {
    Enterprise(String),
    Standard(String),
}

impl GitHubHost {
    pub(crate) fn new(hostname: &str) -> Result<Self, String> {
        let normalized = hostname.to_lowercase();

        if normalized.starts_with("https://") || normalized.starts_with("http://") {
            return Err("must be a domain name, not a URL".into());
        }

        if normalized.eq_ignore_ascii_case("github.com") || normalized.ends_with(".ghe.com") {
            Ok(Self::Standard(hostname.into()))
        } else {
            Ok(Self::Enterprise(hostname.into()))
        }
    }

    fn to_api_url(&self) -> String {
        match self {
            Self::Enterprise(host) => format!("https://{host}/api/v3"),
            Self::Standard(host) => format!("https://api.{host}"),
        }
    }
}

impl Default for GitHubHost {
    fn default() -> Self {
        Self::Standard("github.com".into())
    }
}

impl Display for GitHubHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enterprise(host) | Self::Standard(host) => write!(f, "{host}"),
        }
    }
}

impl FromStr for GitHubHost {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A sanitized GitHub access token.
#[derive(Clone)]
pub(crate) struct GitHubToken(String);

impl GitHubToken {
    pub(crate) fn new(token: &str) -> Result<Self, String> {
        let token = token.trim();
        if token.is_empty() {
            return Err("GitHub token cannot be empty".into());
        }
        Ok(Self(token.to_owned()))
    }

    fn to_header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&format!("Bearer {}", self.0))
    }
}

impl FromStr for GitHubToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Errors that can occur while talking to GitHub.
#[derive(Debug, Error)]
pub(crate) enum ClientError {
    /// An error originating from the underlying HTTP client.
    #[error("request error while accessing GitHub")]
    Request(#[from] reqwest::Error),
    /// An error originating from the HTTP client (and its middleware).
    #[error("request error while accessing GitHub")]
    Middleware(#[from] reqwest_middleware::Error),
    /// We couldn't turn the user's token into a valid header value.
    #[error("invalid token header")]
    InvalidTokenHeader(#[from] InvalidHeaderValue),
    /// GitHub answered with something we didn't expect.
    #[error("unexpected response from GitHub: {0}")]
    Unexpected(String),
}

struct RequestLoggingMiddleware;

#[async_trait::async_trait]
impl reqwest_middleware::Middleware for RequestLoggingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let method = req.method().clone();
        let url = req.url().clone();
        tracing::debug!("{method} {url}");

        let res = next.run(req, extensions).await?;
        tracing::debug!("{method} {url} -> {status}", status = res.status());

        Ok(res)
    }
}

fn with_middleware(client: reqwest::Client) -> ClientWithMiddleware {
    ClientBuilder::new(client)
        .with(RequestLoggingMiddleware)
        .build()
}

/// Checks whether an account exists.
#[async_trait::async_trait]
pub(crate) trait OwnerProbe: Send + Sync {
    /// Fetches `url` and returns the response's status code.
    async fn status(&self, url: &str) -> Result<u16, ClientError>;
}

/// An [`OwnerProbe`] backed by real HTTP requests.
pub(crate) struct WebProbe {
    client: ClientWithMiddleware,
}

impl WebProbe {
    pub(crate) fn new() -> Result<Self, ClientError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    fn with_timeout(timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(RUNWARDEN_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client: with_middleware(client),
        })
    }
}

#[async_trait::async_trait]
impl OwnerProbe for WebProbe {
    #[instrument(skip(self))]
    async fn status(&self, url: &str) -> Result<u16, ClientError> {
        let resp = self.client.get(url).send().await?;
        Ok(resp.status().as_u16())
    }
}

/// Returns whether `https://github.com` is reachable.
pub(crate) async fn check_connectivity() -> bool {
    let client = match reqwest::Client::builder()
        .user_agent(RUNWARDEN_AGENT)
        .timeout(CONNECTIVITY_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("couldn't build HTTP client: {e}");
            return false;
        }
    };

    match client.head("https://github.com").send().await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("connectivity check failed: {e}");
            false
        }
    }
}

/// The REST API operations needed to mirror an organization.
#[async_trait::async_trait]
pub(crate) trait RepoApi: Send + Sync {
    async fn rate_limit(&self) -> Result<RateLimit, ClientError>;

    /// Lists every repository of `org`, which may be a user.
    async fn list_repos(&self, org: &str) -> Result<Vec<Repository>, ClientError>;

    async fn default_branch(&self, org: &str, repo: &str) -> Result<String, ClientError>;

    async fn list_branches(&self, org: &str, repo: &str) -> Result<Vec<Branch>, ClientError>;

    /// Returns `None` when nothing exists at `path`.
    async fn contents(
        &self,
        org: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Contents>, ClientError>;

    /// Returns the raw contents of a single file, or `None` if it's gone.
    async fn raw_file(
        &self,
        org: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, ClientError>;
}

#[derive(Clone)]
pub(crate) struct Client {
    api_base: String,
    api_client: ClientWithMiddleware,
}

impl Client {
    pub(crate) fn new(host: &GitHubHost, token: Option<&GitHubToken>) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(AUTHORIZATION, token.to_header_value()?);
        }
        headers.insert("X-GitHub-Api-Version", "2022-11-28".parse()?);
        headers.insert(ACCEPT, "application/vnd.github+json".parse()?);

        let client = reqwest::Client::builder()
            .user_agent(RUNWARDEN_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            api_base: host.to_api_url(),
            api_client: with_middleware(client),
        })
    }

    /// Fetches every page of a listing endpoint.
    async fn paginate<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<Option<Vec<T>>, ClientError> {
        let mut items = vec![];

        for page in 1.. {
            let resp = self
                .api_client
                .get(url)
                .query(&[("per_page", PAGE_SIZE), ("page", page)])
                .send()
                .await?;

            let resp = match resp.error_for_status() {
                Ok(resp) => resp,
                Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            let batch: Vec<T> = resp.json().await?;
            let done = batch.len() < PAGE_SIZE;
            items.extend(batch);

            if done {
                break;
            }
        }

        Ok(Some(items))
    }
}

#[async_trait::async_trait]
impl RepoApi for Client {
    #[instrument(skip(self))]
    async fn rate_limit(&self) -> Result<RateLimit, ClientError> {
        let url = format!("{api_base}/rate_limit", api_base = self.api_base);
        let resp: RateLimitResponse = self
            .api_client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.resources.core)
    }

    #[instrument(skip(self))]
    async fn list_repos(&self, org: &str) -> Result<Vec<Repository>, ClientError> {
        let url = format!("{api_base}/orgs/{org}/repos", api_base = self.api_base);
        if let Some(repos) = self.paginate(&url).await? {
            return Ok(repos);
        }

        tracing::debug!("{org} isn't an organization, trying as a user");
        let url = format!("{api_base}/users/{org}/repos", api_base = self.api_base);
        self.paginate(&url)
            .await?
            .ok_or_else(|| ClientError::Unexpected(format!("no such organization or user: {org}")))
    }

    #[instrument(skip(self))]
    async fn default_branch(&self, org: &str, repo: &str) -> Result<String, ClientError> {
        let url = format!("{api_base}/repos/{org}/{repo}", api_base = self.api_base);
        let resp: Repository = self
            .api_client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        resp.default_branch
            .ok_or_else(|| ClientError::Unexpected(format!("{org}/{repo} has no default branch")))
    }

    #[instrument(skip(self))]
    async fn list_branches(&self, org: &str, repo: &str) -> Result<Vec<Branch>, ClientError> {
        let url = format!(
            "{api_base}/repos/{org}/{repo}/branches",
            api_base = self.api_base
        );

        self.paginate(&url)
            .await?
            .ok_or_else(|| ClientError::Unexpected(format!("can't list branches of {org}/{repo}")))
    }

    #[instrument(skip(self))]
    async fn contents(
        &self,
        org: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Contents>, ClientError> {
        let url = format!(
            "{api_base}/repos/{org}/{repo}/contents/{path}",
            api_base = self.api_base
        );

        let resp = self
            .api_client
            .get(&url)
            .query(&[("ref", git_ref)])
            .send()
            .await?;

        match resp.error_for_status() {
            Ok(resp) => Ok(Some(resp.json().await?)),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn raw_file(
        &self,
        org: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, ClientError> {
        let url = format!(
            "{api_base}/repos/{org}/{repo}/contents/{path}",
            api_base = self.api_base
        );

        let resp = self
            .api_client
            .get(&url)
            .header(ACCEPT, "application/vnd.github.raw+json")
            .query(&[("ref", git_ref)])
            .send()
            .await?;

        match resp.error_for_status() {
            Ok(resp) => Ok(Some(resp.text().await?)),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// The `core` bucket of `GET /rate_limit`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub(crate) struct RateLimit {
    pub(crate) remaining: u64,
    /// When the bucket refills, in seconds since the epoch.
    pub(crate) reset: u64,
}

#[derive(Deserialize)]
struct RateLimitResources {
    core: RateLimit,
}

#[derive(Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Owner {
    pub(crate) login: String,
}

/// A repository, as returned by GitHub's repository endpoints.
///
/// This model is intentionally incomplete.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Repository {
    pub(crate) name: String,
    pub(crate) owner: Owner,
    #[serde(default)]
    pub(crate) default_branch: Option<String>,
}

/// A single branch, as returned by GitHub's branches endpoints.
///
/// This model is intentionally incomplete.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Branch {
    pub(crate) name: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EntryKind {
    File,
    Dir,
    Symlink,
    Submodule,
}

/// One entry of a contents listing.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Entry {
    pub(crate) path: String,
    #[serde(rename = "type")]
    pub(crate) kind: EntryKind,
}

/// The response of GitHub's contents API: a single entry for a file, or a
/// listing for a directory.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Contents {
    Dir(Vec<Entry>),
    File(Entry),
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{Contents, EntryKind, GitHubHost, GitHubToken, OwnerProbe as _, WebProbe};

    #[test]
    fn test_github_host() {
        for (host, expected) in [
            ("github.com", "https://api.github.com"),
            ("something.ghe.com", "https://api.something.ghe.com"),
            (
                "selfhosted.example.com",
                "https://selfhosted.example.com/api/v3",
            ),
        ] {
            assert_eq!(GitHubHost::new(host).unwrap().to_api_url(), expected);
        }

        assert!(GitHubHost::new("https://github.com").is_err());
    }

    #[test]
    fn test_github_token() {
        for (token, expected) in [
            ("gha_testtest\n", "gha_testtest"),
            ("  gha_testtest  ", "gha_testtest"),
            ("gho_testtest", "gho_testtest"),
            ("gho_test\ntest", "gho_test\ntest"),
        ] {
            assert_eq!(GitHubToken::new(token).unwrap().0, expected);
        }
    }

    #[test]
    fn test_github_token_err() {
        for token in ["", " ", "\r", "\n", "\t", "     "] {
            assert!(GitHubToken::new(token).is_err());
        }
    }

    #[test]
    fn test_contents_shapes() {
        let dir: Contents = serde_json::from_str(
            r#"[
                {"name": "ci.yml", "path": ".github/workflows/ci.yml", "type": "file", "sha": "abc"},
                {"name": "nested", "path": ".github/workflows/nested", "type": "dir", "sha": "def"}
            ]"#,
        )
        .unwrap();
        let Contents::Dir(entries) = dir else {
            panic!("expected a listing");
        };
        assert_eq!(
            entries.iter().map(|e| e.kind).collect::<Vec<_>>(),
            [EntryKind::File, EntryKind::Dir]
        );

        let file: Contents = serde_json::from_str(
            r#"{"name": "ci.yml", "path": ".github/workflows/ci.yml", "type": "file", "content": "b24="}"#,
        )
        .unwrap();
        assert!(matches!(file, Contents::File(entry) if entry.path == ".github/workflows/ci.yml"));
    }

    #[tokio::test]
    async fn test_owner_check_gives_up_on_silent_server() {
        // Connections complete in the backlog, but nothing ever answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/someone", listener.local_addr().unwrap());

        let checker = WebProbe::with_timeout(Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        assert!(checker.status(&url).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));

        drop(listener);
    }
}
