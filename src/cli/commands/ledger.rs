//! Ledger command implementation.

use crate::core::ledger::DownloadLedger;
use crate::models::config::Config;
use crate::Result;
use colored::Colorize;

/// List ledger entries.
pub async fn list(config: &Config, series: Option<u64>, json: bool) -> Result<()> {
    let path = config.ledger_path();
    if !path.exists() {
        println!("No downloads recorded yet ({}).", path.display());
        return Ok(());
    }

    let ledger = DownloadLedger::open(&path)?;
    let entries: Vec<_> = ledger
        .entries()
        .await
        .into_iter()
        .filter(|e| series.map_or(true, |id| e.key.series_id == id))
        .collect();

    if json {
        for entry in &entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    if entries.is_empty() {
        println!("No matching entries.");
        return Ok(());
    }

    println!(
        "{:<8} {:<8} {:<14} {:<22} {}",
        "Series".bold(),
        "Episode".bold(),
        "Video".bold(),
        "Downloaded".bold(),
        "Path".bold()
    );
    println!("{}", "-".repeat(80));

    for entry in &entries {
        println!(
            "{:<8} {:<8} {:<14} {:<22} {}",
            entry.key.series_id,
            format!("S{:02}E{:02}", entry.key.season, entry.key.episode),
            entry.key.video_id,
            entry.downloaded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.path.display()
        );
    }

    println!();
    println!("{} {}", "Total:".bold(), entries.len());
    Ok(())
}
