//! Subcommand implementations
//!
//! Each returns the process exit code for its outcome.

pub mod deploy;
pub mod plan;
pub mod verify;
