//! Command-line interface for taskqueue.
//!
//! Provides the `serve` command plus one-shot producer commands for
//! submitting, inspecting and retrying tasks.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
