//! # Strongroom CLI
//!
//! Operator command line for the at-rest protection layer. Every primitive
//! of `strongroom-crypto` is reachable as a subcommand, which makes the
//! binary useful for provisioning (password hashes, salts) as well as for
//! inspecting and delivering stored uploads.

pub mod commands;
pub mod config;
pub mod error;

pub use commands::{execute, Command};
pub use config::{load_config, Overrides};
pub use error::CliError;
