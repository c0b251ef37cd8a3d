//! Run command implementation.
//!
//! Resolves the configured series against Sonarr and runs scan cycles until
//! cancelled, or once with `--once`.

use crate::core::cycle::ScanCycle;
use crate::core::ledger::DownloadLedger;
use crate::models::config::Config;
use crate::models::report::{CycleReport, DownloadOutcome, SeriesStatus};
use crate::services::sonarr::SonarrClient;
use crate::services::ytdlp::YtDlpClient;
use crate::Result;
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run scan cycles.
pub async fn run(config: &Config, once: bool, json: bool, cancel: CancellationToken) -> Result<()> {
    let ledger = Arc::new(DownloadLedger::open(&config.ledger_path())?);
    let manager = Arc::new(SonarrClient::new(&config.sonarr)?);
    let source = Arc::new(YtDlpClient::new(&config.ytdl));
    let cycle = ScanCycle::from_config(config, manager, source, ledger);
    let interval = Duration::from_secs(config.scan_interval_minutes.max(1) * 60);

    loop {
        match cycle.resolve_series(config).await {
            Ok(series) if series.is_empty() => {
                tracing::warn!("No configured series could be resolved in Sonarr");
            }
            Ok(series) => {
                let report = cycle.run_once(&series, &cancel).await?;
                print_report(&report, json)?;
            }
            Err(e) if once => return Err(e),
            Err(e) => tracing::error!("Failed to list Sonarr series: {}", e),
        }

        if once || cancel.is_cancelled() {
            break;
        }

        tracing::info!("Next scan in {} minutes", config.scan_interval_minutes.max(1));
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    Ok(())
}

/// Print a cycle report.
pub fn print_report(report: &CycleReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    println!();
    println!("{}", "[SCAN] Cycle report".bold().cyan());
    for series in &report.series {
        match &series.status {
            SeriesStatus::Processed => println!(
                "  {} ({} missing, {} videos)",
                series.title.bold(),
                series.missing,
                series.candidates
            ),
            SeriesStatus::Skipped { reason } => {
                println!("  {} {}", series.title.bold(), format!("skipped: {}", reason).yellow());
            }
        }

        for o in &series.outcomes {
            let label = format!("S{:02}E{:02}", o.season, o.episode);
            let tier = o.tier.map(|t| t.to_string()).unwrap_or_else(|| "ledger".to_string());
            let line = format!("{} <- {} [{}]: {}", label, o.video_id, tier, o.outcome);
            match o.outcome {
                DownloadOutcome::Downloaded { .. } => println!("    {}", line.green()),
                DownloadOutcome::Skipped { .. } => println!("    {}", line.dimmed()),
                DownloadOutcome::Failed { .. } => println!("    {}", line.red()),
            }
        }
    }

    println!();
    println!(
        "  {} {}  {} {}  {} {}",
        "Downloaded:".bold(),
        report.downloaded().to_string().green(),
        "Skipped:".bold(),
        report.skipped(),
        "Failed:".bold(),
        report.failed().to_string().red()
    );
    if report.cancelled {
        println!("  {}", "[WARNING] Cycle was cancelled before completion".yellow());
    }

    Ok(())
}
