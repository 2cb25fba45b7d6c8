//! Repository discovery.
//!
//! Providers feed library job queues:
//!
//! - [`DiscoveryProvider`] pulls repositories from a [`RepositoryIter`] (such as
//!   [`GitHubOrgIter`]) and enqueues download jobs, with a retry buffer,
//!   backoff, and a stop handshake
//! - [`UpdatesProvider`] enqueues one update job per repository already in the
//!   library and closes its queue

pub mod github;
pub mod provider;
pub mod types;
pub mod updates;

pub use github::{GitHubIterConfig, GitHubOrgIter};
pub use provider::{resolve_endpoint, DiscoveryProvider, ProviderHandle, ProviderOpts};
pub use types::{DiscoveryError, Repository, RepositoryIter};
pub use updates::UpdatesProvider;
