//! Command handlers for the runner cache CLI
//!
//! This module implements the command handlers that coordinate between CLI
//! arguments, configuration and the cache engine.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::app::{
    compute_version_with, CacheEngine, RestoreOutcome, RestoreRequest, SaveOutcome, SaveRequest,
    SecretMasker,
};
use crate::cli::{GlobalArgs, LookupArgs, RestoreArgs, SaveArgs, VersionArgs};
use crate::config::{AppConfig, EngineConfig};
use crate::errors::{AppError, Result, Stage};

/// Handle the save command
pub async fn handle_save(
    args: SaveArgs,
    global: &GlobalArgs,
    config: &AppConfig,
    masker: &SecretMasker,
) -> Result<()> {
    let start_time = Instant::now();
    let engine = build_engine(config, false, masker)?;

    let request = SaveRequest {
        key: args.key.clone(),
        paths: args.source.paths.clone(),
        archive: args.archive.clone(),
        compression: args.source.compression,
        version_options: args.source.version_options(),
    };

    let spinner = spinner(global, format!("Saving cache '{}'...", args.key));
    let result = engine.save(&request).await;
    spinner.finish_and_clear();

    match result.map_err(hint_retry)? {
        SaveOutcome::Saved { cache_id, size } => {
            println!(
                "✅ Cache saved with key '{}' ({}) in {:.1?}",
                args.key,
                format_size(size),
                start_time.elapsed()
            );
            if let Some(cache_id) = cache_id {
                debug!("Committed cache id {}", cache_id);
            }
        }
        SaveOutcome::Skipped => {
            println!(
                "ℹ️  Cache key '{}' is already saved or being saved by another job, skipping",
                args.key
            );
        }
    }
    Ok(())
}

/// Handle the restore command
pub async fn handle_restore(
    args: RestoreArgs,
    global: &GlobalArgs,
    config: &AppConfig,
    masker: &SecretMasker,
) -> Result<()> {
    let start_time = Instant::now();
    let engine = build_engine(config, args.lookup_only, masker)?;

    let request = RestoreRequest {
        key: args.key.clone(),
        restore_keys: args.restore_keys.clone(),
        paths: args.source.paths.clone(),
        archive: args.archive.clone(),
        compression: args.source.compression,
        version_options: args.source.version_options(),
    };

    let spinner = spinner(global, format!("Restoring cache '{}'...", args.key));
    let result = engine.restore(&request).await;
    spinner.finish_and_clear();

    match result.map_err(hint_retry)? {
        RestoreOutcome::NotFound => {
            println!("Cache not found for key '{}'", args.key);
            print_output("cache-hit", "false");
        }
        RestoreOutcome::Found { matched_key, exact } => {
            println!("🔍 Cache found for key '{}'", matched_key);
            print_output("cache-matched-key", &matched_key);
            print_output("cache-hit", &exact.to_string());
        }
        RestoreOutcome::Restored {
            matched_key,
            exact,
            size,
        } => {
            println!(
                "✅ Cache restored from key '{}' ({}) in {:.1?}",
                matched_key,
                format_size(size),
                start_time.elapsed()
            );
            print_output("cache-matched-key", &matched_key);
            print_output("cache-hit", &exact.to_string());
        }
    }
    Ok(())
}

/// Handle the lookup command
pub async fn handle_lookup(
    args: LookupArgs,
    global: &GlobalArgs,
    config: &AppConfig,
    masker: &SecretMasker,
) -> Result<()> {
    let keys = args
        .cache_key()
        .map_err(|e| AppError::stage(Stage::Validate, e))?;
    let version = compute_version_with(
        &args.source.paths,
        args.source.compression,
        args.source.version_options(),
    );
    let engine = build_engine(config, true, masker)?;

    let spinner = spinner(global, format!("Looking up '{}'...", keys.joined()));
    let result = engine.lookup(&keys, &version).await;
    spinner.finish_and_clear();

    match result.map_err(hint_retry)? {
        Some(entry) => {
            println!("🔍 Cache found for key '{}'", entry.key());
            if let Some(created) = entry.creation_time {
                println!("  Created: {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!("  Version: {}", version);
            print_output("cache-matched-key", entry.key());
        }
        None => {
            println!("Cache not found for keys: {}", keys.joined());
        }
    }
    Ok(())
}

/// Handle the version command
pub async fn handle_version(args: VersionArgs) -> Result<()> {
    let version = compute_version_with(
        &args.source.paths,
        args.source.compression,
        args.source.version_options(),
    );
    println!("{}", version);
    Ok(())
}

/// Apply environment overrides and build the engine
fn build_engine(
    app_config: &AppConfig,
    lookup_only: bool,
    masker: &SecretMasker,
) -> Result<CacheEngine> {
    let mut config: EngineConfig = app_config.resolve(|name| std::env::var(name).ok())?;
    config.download.lookup_only = lookup_only;

    info!(
        "Using {} backend",
        if config.container.is_some() {
            "container"
        } else {
            "cache service"
        }
    );

    CacheEngine::from_config(&config, masker.clone())
}

/// Note transient failures so a rerun of the job is known to be safe
fn hint_retry(error: AppError) -> AppError {
    if error.is_recoverable() {
        warn!(
            "{} failure looks transient; rerunning the job may succeed",
            error.category()
        );
    }
    error
}

/// Spinner shown while a transfer runs, hidden in quiet mode
fn spinner(global: &GlobalArgs, message: String) -> ProgressBar {
    if global.quiet {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["◐", "◓", "◑", "◒"]),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Print a machine-readable `name=value` result line
fn print_output(name: &str, value: &str) {
    debug!("Output {}={}", name, value);
    println!("{}={}", name, value);
}

/// Human readable byte count
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
