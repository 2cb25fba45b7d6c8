//! Repository library: jobs, their schedule functions and the git executor.
//!
//! - **LibraryJob**: a download or update of one repository
//! - **LibraryScheduleFn**: picks library jobs from download and update queues
//! - **GitLibrary**: performs the jobs against an on-disk mirror library

pub mod git;
pub mod job;
pub mod schedule;

pub use git::{repository_id, GitLibrary, GitLibraryConfig};
pub use job::{process_fn, JobKind, LibraryJob, ProcessFn};
pub use schedule::LibraryScheduleFn;
