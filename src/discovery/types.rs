//! Common types shared by repository sources and providers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur while listing repositories from a source.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The source has no more repositories for now.
    #[error("No new repositories in source")]
    EndOfSource {
        /// How long to wait before polling the source again.
        retry_after: Option<Duration>,
    },

    /// API rate limit exceeded.
    #[error("Rate limited: retry after {retry_after:?}")]
    RateLimited {
        /// How long until the limit resets.
        retry_after: Option<Duration>,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {message}")]
    Http {
        message: String,
        /// Set for transient failures worth retrying.
        retry_after: Option<Duration>,
    },

    /// Failed to parse response data.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The caller cancelled the request.
    #[error("Discovery cancelled")]
    Cancelled,

    /// JSON deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DiscoveryError {
    /// Returns the source's hint for when to try again, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DiscoveryError::EndOfSource { retry_after }
            | DiscoveryError::RateLimited { retry_after }
            | DiscoveryError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A repository as reported by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Name in "owner/repo" form.
    pub full_name: String,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default)]
    pub ssh_url: Option<String>,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
}

impl Repository {
    /// Creates a repository with no endpoints.
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Default::default()
        }
    }

    /// Sets the web URL.
    pub fn with_html_url(mut self, url: impl Into<String>) -> Self {
        self.html_url = Some(url.into());
        self
    }

    /// Sets the git protocol URL.
    pub fn with_git_url(mut self, url: impl Into<String>) -> Self {
        self.git_url = Some(url.into());
        self
    }

    /// Sets the SSH URL.
    pub fn with_ssh_url(mut self, url: impl Into<String>) -> Self {
        self.ssh_url = Some(url.into());
        self
    }
}

/// A source of repositories, consumed one at a time.
#[async_trait]
pub trait RepositoryIter: Send {
    /// Returns the next repository.
    ///
    /// Implementations return `EndOfSource` when nothing new is available and
    /// `RateLimited` when the source throttles; both may carry a hint for
    /// when to ask again.
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Repository, DiscoveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_hints() {
        let hint = Some(Duration::from_secs(3));
        assert_eq!(DiscoveryError::EndOfSource { retry_after: hint }.retry_after(), hint);
        assert_eq!(DiscoveryError::RateLimited { retry_after: hint }.retry_after(), hint);
        assert_eq!(DiscoveryError::Parse("bad".into()).retry_after(), None);
        assert_eq!(DiscoveryError::Cancelled.retry_after(), None);
    }

    #[test]
    fn test_repository_deserializes_github_shape() {
        let json = r#"{
            "full_name": "src-d/go-git",
            "html_url": "https://github.com/src-d/go-git",
            "git_url": "git://github.com/src-d/go-git.git",
            "ssh_url": "git@github.com:src-d/go-git.git",
            "fork": false,
            "archived": true,
            "stargazers_count": 4000
        }"#;

        let repo: Repository = serde_json::from_str(json).expect("parse");
        assert_eq!(repo.full_name, "src-d/go-git");
        assert_eq!(repo.git_url.as_deref(), Some("git://github.com/src-d/go-git.git"));
        assert!(repo.archived);
    }
}
