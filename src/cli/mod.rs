//! Command-line interface for synda.
//!
//! Provides the `generate`, `cache` and `provider` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
