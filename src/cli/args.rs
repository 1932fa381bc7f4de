//! Command-line argument parsing for the runner cache
//!
//! This module defines the CLI structure using clap derive macros: saving
//! and restoring archives, looking up entries and printing cache versions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::{CacheKey, CompressionMethod, VersionOptions};
use crate::errors::ValidationError;

/// Runner Cache - save and restore CI build caches
#[derive(Parser, Debug)]
#[command(
    name = "runner-cache",
    version,
    about = "Save and restore CI build caches",
    long_about = "Transfers cache archives between a CI runner and the cache service or a blob container.
Features parallel chunked uploads, segmented downloads and automatic retry logic."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload an archive under a key
    Save(SaveArgs),

    /// Download the best matching archive
    Restore(RestoreArgs),

    /// Check whether an entry exists without downloading it
    Lookup(LookupArgs),

    /// Print the cache version for a set of paths
    Version(VersionArgs),
}

/// Paths and compression that determine the cache version
#[derive(Args, Debug, Clone)]
pub struct VersionSource {
    /// Path pattern the archive was built from (repeatable, order matters)
    #[arg(short, long = "path", value_name = "PATH", required = true)]
    pub paths: Vec<String>,

    /// Compression method of the archive
    #[arg(short, long, default_value_t = CompressionMethod::Gzip)]
    pub compression: CompressionMethod,

    /// Share the entry between Windows and other operating systems
    #[arg(long)]
    pub cross_os: bool,
}

impl VersionSource {
    /// Version options implied by the flags
    pub fn version_options(&self) -> VersionOptions {
        VersionOptions {
            cross_os_archive: self.cross_os,
        }
    }
}

/// Arguments for the save command
#[derive(Args, Debug, Clone)]
pub struct SaveArgs {
    /// Key to save the archive under
    #[arg(short, long)]
    pub key: String,

    #[command(flatten)]
    pub source: VersionSource,

    /// Archive file to upload
    #[arg(short, long, value_name = "FILE")]
    pub archive: PathBuf,
}

/// Arguments for the restore command
#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Primary key
    #[arg(short, long)]
    pub key: String,

    /// Fallback key, tried in order after the primary key (repeatable)
    #[arg(short, long = "restore-key", value_name = "KEY")]
    pub restore_keys: Vec<String>,

    #[command(flatten)]
    pub source: VersionSource,

    /// Where to write the archive
    #[arg(short, long, value_name = "FILE")]
    pub archive: PathBuf,

    /// Resolve the entry but do not download it
    #[arg(long)]
    pub lookup_only: bool,
}

/// Arguments for the lookup command
#[derive(Args, Debug, Clone)]
pub struct LookupArgs {
    /// Primary key
    #[arg(short, long)]
    pub key: String,

    /// Fallback key, tried in order after the primary key (repeatable)
    #[arg(short, long = "restore-key", value_name = "KEY")]
    pub restore_keys: Vec<String>,

    #[command(flatten)]
    pub source: VersionSource,
}

impl LookupArgs {
    /// Validated key list
    pub fn cache_key(&self) -> Result<CacheKey, ValidationError> {
        CacheKey::new(self.key.as_str(), self.restore_keys.iter().cloned())
    }
}

/// Arguments for the version command
#[derive(Args, Debug, Clone)]
pub struct VersionArgs {
    #[command(flatten)]
    pub source: VersionSource,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        self.global.log_level()
    }
}

impl GlobalArgs {
    /// Get the logging level based on verbosity flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.very_verbose {
            tracing::Level::DEBUG
        } else if self.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}
