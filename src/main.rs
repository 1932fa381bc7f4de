//! Runner Cache CLI application
//!
//! Command-line interface for saving and restoring CI build caches.

use std::process;

use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use runner_cache::cli::{
    handle_lookup, handle_restore, handle_save, handle_version, Cli, Commands,
};
use runner_cache::app::SecretMasker;
use runner_cache::config::{AppConfig, LoggingConfig};
use runner_cache::errors::Result;

#[tokio::main]
async fn main() {
    // Shared with the engine so secrets found while running are masked here too
    let masker = SecretMasker::new();
    let result = run(&masker).await;

    if let Err(e) = result {
        eprintln!("Error: {}", masker.redact(&e.report()));
        process::exit(1);
    }
}

/// Main application logic
async fn run(masker: &SecretMasker) -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    let config = AppConfig::load(cli.global.config.clone()).await?;
    init_logging(&cli, &config.logging);

    info!("Runner Cache v{} starting", env!("CARGO_PKG_VERSION"));

    let global = cli.global;
    match cli.command {
        Commands::Save(args) => {
            info!("Executing save command");
            handle_save(args, &global, &config, masker).await
        }
        Commands::Restore(args) => {
            info!("Executing restore command");
            handle_restore(args, &global, &config, masker).await
        }
        Commands::Lookup(args) => {
            info!("Executing lookup command");
            handle_lookup(args, &global, &config, masker).await
        }
        Commands::Version(args) => handle_version(args).await,
    }
}

/// Initialize logging from CLI verbosity flags, falling back to the config file level
fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let global = &cli.global;
    let level = if global.quiet || global.verbose || global.very_verbose {
        cli.log_level().to_string()
    } else {
        logging.level.clone()
    };

    let directive = format!("runner_cache={}", level).parse::<Directive>();
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = &directive {
        filter = filter.add_directive(directive.clone());
    }

    // Logs go to stderr so result lines on stdout stay parseable
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(global.very_verbose)
        .init();

    if directive.is_err() {
        warn!("Ignoring invalid log level '{}' from configuration", level);
    }
    if global.very_verbose {
        info!("Very verbose logging enabled");
    } else if global.verbose {
        info!("Verbose logging enabled");
    }
}
