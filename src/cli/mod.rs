//! Command-line interface for gitcollector.
//!
//! Provides the `download` and `update` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
