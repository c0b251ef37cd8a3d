//! ytarr CLI
//!
//! Downloads episodes Sonarr is missing from yt-dlp sources.

use clap::Parser;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use ytarr::cli::{
    args::{Cli, Commands, LedgerAction},
    commands::{check, ledger, run},
};
use ytarr::models::config;
use ytarr::preflight;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _guard = init_logging(cli.verbose || config.debug, config.log_dir.as_deref())?;
    tracing::debug!("Loaded configuration from {}", config.config_dir.display());

    match cli.command {
        Commands::Run { once, json } => {
            if !cli.skip_preflight {
                run_preflight_checks(&config).await?;
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted; finishing the current step");
                    on_signal.cancel();
                }
            });

            run::run(&config, once, json, cancel).await?;
        }

        Commands::Check => {
            check::check(&config).await?;
        }

        Commands::Ledger { action } => match action {
            LedgerAction::List { series, json } => {
                ledger::list(&config, series, json).await?;
            }
        },
    }

    Ok(())
}

/// Initialize the logging system.
///
/// Logs go to the console and, when `log_dir` is set, to a daily rolling file.
fn init_logging(verbose: bool, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("ytarr=debug")
        } else {
            EnvFilter::new("ytarr=info")
        }
    });

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "ytarr.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(guard)
}

/// Run preflight checks and exit if any fail.
async fn run_preflight_checks(config: &config::Config) -> anyhow::Result<()> {
    use colored::Colorize;

    println!("{}", "Running preflight checks...".bold());
    println!();

    let results = preflight::run_preflight_checks(config).await;
    preflight::print_results(&results);

    println!();

    if !preflight::all_passed(&results) {
        anyhow::bail!("Preflight checks failed. Fix the issues above and try again.");
    }

    Ok(())
}
