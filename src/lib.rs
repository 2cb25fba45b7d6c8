//! gitcollector: discover GitHub repositories and keep local git mirrors.
//!
//! The crate is built around a generic job [`scheduler`]: bounded queues,
//! pluggable schedule functions and a resizable worker pool. The
//! [`library`] module turns it into a git mirroring engine and
//! [`discovery`] feeds it with repositories from GitHub organizations or
//! from the library itself.

pub mod cli;
pub mod discovery;
pub mod error;
pub mod library;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used error types
pub use error::{ErrorKind, JobError, LibraryError, ProviderError};
