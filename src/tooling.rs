//! Tooling
//!
//! Command-line front end: running the authority and talking to a running one.

pub mod cli;

pub use cli::{Cli, CliContext, Commands, PromptPathChooser};
