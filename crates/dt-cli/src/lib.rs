//! Door tracker CLI library.
//!
//! This crate provides the CLI interface for the door tracker.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, DoorAction, RebuildArgs, UpdateTarget};
pub use config::Config;
