//! Command-line interface components
//!
//! This module contains CLI-specific code for the runner cache, including
//! argument parsing and command handlers.

pub mod args;
pub mod commands;

pub use args::{
    Cli, Commands, GlobalArgs, LookupArgs, RestoreArgs, SaveArgs, VersionArgs, VersionSource,
};
pub use commands::{handle_lookup, handle_restore, handle_save, handle_version};
