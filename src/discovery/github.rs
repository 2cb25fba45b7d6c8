//! GitHub organization repository source.
//!
//! Lists an organization's repositories page by page through the REST API,
//! oldest first, so repositories created later show up at the end. Once the
//! last page is consumed the iterator reports end-of-source with a poll
//! delay; the next call fetches the last page again to pick up anything new.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::types::{DiscoveryError, Repository, RepositoryIter};

/// GitHub API base URL.
const GITHUB_API_BASE: &str = "https://api.github.com";

/// Delay suggested for transient server errors.
const SERVER_ERROR_RETRY: Duration = Duration::from_secs(5);

/// Configuration for the GitHub organization iterator.
#[derive(Debug, Clone)]
pub struct GitHubIterConfig {
    /// Repositories requested per page (max 100).
    pub per_page: usize,
    /// Delay suggested to callers after the last page.
    pub poll_interval: Duration,
    /// Skip forked repositories.
    pub skip_forks: bool,
    /// Skip archived repositories.
    pub skip_archived: bool,
    /// API base URL.
    pub api_base: String,
    /// HTTP request timeout.
    pub request_timeout: Duration,
}

impl Default for GitHubIterConfig {
    fn default() -> Self {
        Self {
            per_page: 100,
            poll_interval: Duration::from_secs(3600),
            skip_forks: false,
            skip_archived: false,
            api_base: GITHUB_API_BASE.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl GitHubIterConfig {
    /// Sets the page size, clamped to what the API accepts.
    pub fn with_per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page.clamp(1, 100);
        self
    }

    /// Sets the delay suggested after the last page.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets whether forks are skipped.
    pub fn with_skip_forks(mut self, skip: bool) -> Self {
        self.skip_forks = skip;
        self
    }

    /// Sets whether archived repositories are skipped.
    pub fn with_skip_archived(mut self, skip: bool) -> Self {
        self.skip_archived = skip;
        self
    }

    /// Sets the API base URL.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

/// Iterator over the repositories of one GitHub organization.
pub struct GitHubOrgIter {
    /// HTTP client for API requests.
    http_client: Client,
    /// Optional GitHub API token for higher rate limits.
    api_token: Option<String>,
    org: String,
    config: GitHubIterConfig,
    /// Page to fetch next.
    page: u32,
    buffer: VecDeque<Repository>,
    /// Names already handed out.
    seen: HashSet<String>,
    /// The last page has been consumed.
    at_end: bool,
}

impl GitHubOrgIter {
    /// Creates an iterator over `org`.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Http` if the HTTP client cannot be built.
    pub fn new(
        org: impl Into<String>,
        api_token: Option<String>,
        config: GitHubIterConfig,
    ) -> Result<Self, DiscoveryError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DiscoveryError::Http {
                message: format!("Failed to build HTTP client: {e}"),
                retry_after: None,
            })?;

        Ok(Self {
            http_client,
            api_token: api_token.filter(|t| !t.is_empty()),
            org: org.into(),
            config,
            page: 1,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            at_end: false,
        })
    }

    /// Returns the organization name.
    pub fn org(&self) -> &str {
        &self.org
    }

    /// Returns whether an API token is configured.
    pub fn has_token(&self) -> bool {
        self.api_token.is_some()
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}/orgs/{}/repos?type=all&sort=created&direction=asc&per_page={}&page={}",
            self.config.api_base.trim_end_matches('/'),
            urlencoding::encode(&self.org),
            self.config.per_page,
            page
        )
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<Repository>, DiscoveryError> {
        let mut request = self
            .http_client
            .get(self.page_url(page))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "gitcollector/1.0")
            .header("X-GitHub-Api-Version", "2022-11-28");

        if let Some(ref token) = self.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| DiscoveryError::Http {
            message: e.to_string(),
            retry_after: Some(SERVER_ERROR_RETRY),
        })?;

        let status = response.status();
        if is_rate_limited(status, response.headers()) {
            let retry_after = rate_limit_delay(response.headers(), Utc::now().timestamp());
            return Err(DiscoveryError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DiscoveryError::Http {
                message: format!("API returned status {}: {}", status, error_text),
                retry_after: status.is_server_error().then_some(SERVER_ERROR_RETRY),
            });
        }

        let body = response.text().await.map_err(|e| DiscoveryError::Http {
            message: e.to_string(),
            retry_after: Some(SERVER_ERROR_RETRY),
        })?;

        parse_page(&body)
    }

    fn accept(&mut self, repo: &Repository) -> bool {
        if self.config.skip_forks && repo.fork {
            return false;
        }
        if self.config.skip_archived && repo.archived {
            return false;
        }
        self.seen.insert(repo.full_name.clone())
    }
}

#[async_trait]
impl RepositoryIter for GitHubOrgIter {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Repository, DiscoveryError> {
        loop {
            if let Some(repo) = self.buffer.pop_front() {
                return Ok(repo);
            }

            if self.at_end {
                // Next call re-reads the last page for new repositories.
                self.at_end = false;
                return Err(DiscoveryError::EndOfSource {
                    retry_after: Some(self.config.poll_interval),
                });
            }

            let page = self.page;
            let repos = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                repos = self.fetch_page(page) => repos?,
            };

            let fetched = repos.len();
            if fetched < self.config.per_page {
                self.at_end = true;
            } else {
                self.page += 1;
            }

            for repo in repos {
                if self.accept(&repo) {
                    self.buffer.push_back(repo);
                }
            }

            trace!(
                org = %self.org,
                page = page,
                fetched = fetched,
                buffered = self.buffer.len(),
                "Fetched repository page"
            );
        }
    }
}

/// Parses one page of the organization repositories listing.
pub fn parse_page(body: &str) -> Result<Vec<Repository>, DiscoveryError> {
    serde_json::from_str(body)
        .map_err(|e| DiscoveryError::Parse(format!("Failed to parse repositories: {}", e)))
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    match status {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => {
            headers.contains_key("retry-after")
                || headers
                    .get("x-ratelimit-remaining")
                    .and_then(|v| v.to_str().ok())
                    == Some("0")
        }
        _ => false,
    }
}

/// Computes how long to wait from rate limit headers.
///
/// `retry-after` is a delay in seconds; `x-ratelimit-reset` is the epoch
/// second at which the limit resets.
pub fn rate_limit_delay(headers: &HeaderMap, now_epoch: i64) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
    };

    if let Some(seconds) = header("retry-after") {
        return Some(Duration::from_secs(seconds.max(0) as u64));
    }

    header("x-ratelimit-reset").map(|reset| {
        let delay = (reset - now_epoch).max(1) as u64;
        debug!(delay_secs = delay, "Rate limit resets later");
        Duration::from_secs(delay)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).expect("header value"));
        }
        map
    }

    #[test]
    fn test_rate_limit_delay_prefers_retry_after() {
        let map = headers(&[("retry-after", "30"), ("x-ratelimit-reset", "2000")]);
        assert_eq!(rate_limit_delay(&map, 1000), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_rate_limit_delay_from_reset() {
        let map = headers(&[("x-ratelimit-reset", "1060")]);
        assert_eq!(rate_limit_delay(&map, 1000), Some(Duration::from_secs(60)));

        // A reset already in the past still waits a moment.
        assert_eq!(rate_limit_delay(&map, 5000), Some(Duration::from_secs(1)));
        assert_eq!(rate_limit_delay(&HeaderMap::new(), 1000), None);
    }

    #[test]
    fn test_forbidden_is_rate_limit_only_when_exhausted() {
        let exhausted = headers(&[("x-ratelimit-remaining", "0")]);
        assert!(is_rate_limited(StatusCode::FORBIDDEN, &exhausted));
        assert!(!is_rate_limited(StatusCode::FORBIDDEN, &HeaderMap::new()));
        assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new()));
        assert!(!is_rate_limited(StatusCode::NOT_FOUND, &exhausted));
    }

    #[test]
    fn test_parse_page() {
        let body = r#"[
            {"full_name": "org/a", "html_url": "https://github.com/org/a", "fork": false, "archived": false},
            {"full_name": "org/b", "git_url": "git://github.com/org/b.git", "fork": true, "archived": false}
        ]"#;
        let repos = parse_page(body).expect("parse");
        assert_eq!(repos.len(), 2);
        assert!(repos[1].fork);

        assert!(matches!(parse_page("{\"message\": 1}"), Err(DiscoveryError::Parse(_))));
    }

    #[test]
    fn test_page_url_encodes_org() {
        let iter = GitHubOrgIter::new(
            "my org",
            None,
            GitHubIterConfig::default()
                .with_per_page(500)
                .with_api_base("http://localhost:9/"),
        )
        .expect("client");
        assert_eq!(
            iter.page_url(2),
            "http://localhost:9/orgs/my%20org/repos?type=all&sort=created&direction=asc&per_page=100&page=2"
        );
        assert!(!iter.has_token());
    }

    #[test]
    fn test_filters_forks_archived_and_duplicates() {
        let mut iter = GitHubOrgIter::new(
            "org",
            Some("token".to_string()),
            GitHubIterConfig::default()
                .with_skip_forks(true)
                .with_skip_archived(true),
        )
        .expect("client");

        let mut fork = Repository::new("org/fork");
        fork.fork = true;
        let mut archived = Repository::new("org/old");
        archived.archived = true;
        let plain = Repository::new("org/plain");

        assert!(!iter.accept(&fork));
        assert!(!iter.accept(&archived));
        assert!(iter.accept(&plain));
        assert!(!iter.accept(&plain));
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let mut iter = GitHubOrgIter::new(
            "org",
            None,
            GitHubIterConfig::default().with_api_base("http://127.0.0.1:9"),
        )
        .expect("client");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = iter.next(&cancel).await.expect_err("cancelled");
        assert!(matches!(err, DiscoveryError::Cancelled));
    }
}
