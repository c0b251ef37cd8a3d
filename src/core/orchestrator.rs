//! Download orchestrator.
//!
//! Turns matches into library files:
//! - ledger re-check
//! - crash recovery for placed but unrecorded files
//! - fetch into staging, with retries
//! - verification
//! - atomic placement
//! - ledger record

use crate::core::ledger::DownloadLedger;
use crate::core::matcher::MatchResult;
use crate::core::retry::{retry_transient, RetryPolicy};
use crate::generators::{filename, folder};
use crate::models::config::Config;
use crate::models::ledger::{LedgerEntry, LedgerKey, RecordOutcome};
use crate::models::media::{Artifact, Series};
use crate::models::report::{DownloadOutcome, FailureReason, MatchOutcome, SkipReason};
use crate::services::{FetchRequest, SourceGateway};
use crate::utils::fs as fs_utils;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Format selector for series without their own.
    pub default_format: String,
    /// Naming pattern for series without their own.
    pub naming_pattern: String,
    /// Prepended to manager series paths.
    pub path_prefix: Option<PathBuf>,
    /// Parent of the per-download staging directories.
    pub staging_root: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_format: "bestvideo+bestaudio/best".to_string(),
            naming_pattern: filename::DEFAULT_NAMING_PATTERN.to_string(),
            path_prefix: None,
            staging_root: std::env::temp_dir().join("ytarr"),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_format: config.ytdl.default_format.clone(),
            naming_pattern: filename::DEFAULT_NAMING_PATTERN.to_string(),
            path_prefix: config.library.path_prefix.clone(),
            staging_root: config.staging_dir(),
            retry: RetryPolicy::from(&config.download),
        }
    }
}

/// Check a downloaded file before it enters the library.
pub fn verify_artifact(artifact: &Artifact) -> std::result::Result<(), String> {
    let size = std::fs::metadata(&artifact.path)
        .map_err(|e| format!("cannot read {:?}: {}", artifact.path, e))?
        .len();
    if size == 0 || artifact.size == 0 {
        return Err(format!("{:?} is empty", artifact.path));
    }

    if !fs_utils::is_video_file(&artifact.path) {
        return Err(format!(
            "{:?} does not have a video extension",
            artifact.path
        ));
    }

    match fs_utils::sniff_mime(&artifact.path) {
        Ok(Some(mime)) if !mime.starts_with("video/") => {
            Err(format!("{:?} looks like {}, not a video", artifact.path, mime))
        }
        Ok(_) => Ok(()),
        Err(e) => Err(format!("cannot sniff {:?}: {}", artifact.path, e)),
    }
}

/// Remove a file the ledger refused, unless it is the recorded file itself.
fn discard_duplicate(placed: &Path, recorded: &Path) {
    if placed == recorded {
        tracing::warn!("{:?} was replaced by a duplicate download", placed);
        return;
    }
    match std::fs::remove_file(placed) {
        Ok(()) => tracing::info!("Removed duplicate download {:?}", placed),
        Err(e) => tracing::warn!("Failed to remove duplicate download {:?}: {}", placed, e),
    }
}

fn remove_staging(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            tracing::warn!("Failed to remove staging directory {:?}: {}", dir, e);
        }
    }
}

/// Download orchestrator.
pub struct DownloadOrchestrator {
    config: OrchestratorConfig,
    source: Arc<dyn SourceGateway>,
    ledger: Arc<DownloadLedger>,
}

impl DownloadOrchestrator {
    /// Create an orchestrator with default configuration.
    pub fn new(source: Arc<dyn SourceGateway>, ledger: Arc<DownloadLedger>) -> Self {
        Self::with_config(OrchestratorConfig::default(), source, ledger)
    }

    /// Create an orchestrator with custom configuration.
    pub fn with_config(
        config: OrchestratorConfig,
        source: Arc<dyn SourceGateway>,
        ledger: Arc<DownloadLedger>,
    ) -> Self {
        Self {
            config,
            source,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<DownloadLedger> {
        &self.ledger
    }

    /// Season folder and file stem for a match.
    pub fn destination(&self, series: &Series, m: &MatchResult) -> (PathBuf, String) {
        let dir = folder::season_dir(
            self.config.path_prefix.as_deref(),
            &series.path,
            m.episode.season,
        );
        let pattern = series
            .options
            .naming_pattern
            .as_deref()
            .unwrap_or(&self.config.naming_pattern);
        let stem = filename::render_episode_stem(pattern, &series.title, &m.episode);
        (dir, stem)
    }

    /// Process matches in order.
    ///
    /// Per-match failures are reported as outcomes; only ledger failures are
    /// returned as errors. Stops before the next match once `cancel` fires.
    pub async fn process(
        &self,
        series: &Series,
        matches: &[MatchResult],
        cancel: &CancellationToken,
    ) -> Result<Vec<MatchOutcome>> {
        let mut outcomes = Vec::with_capacity(matches.len());

        for (idx, m) in matches.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    "Cancelled; {} of {} matches left for '{}'",
                    matches.len() - idx,
                    matches.len(),
                    series.title
                );
                break;
            }

            tracing::info!(
                "Process [{}/{}]: {} {} <- {}",
                idx + 1,
                matches.len(),
                series.title,
                m.episode.label(),
                m.candidate.video_id
            );

            let outcome = self.process_one(series, m, cancel).await?;
            match &outcome {
                DownloadOutcome::Failed { .. } => {
                    tracing::error!("{} {}: {}", series.title, m.episode.label(), outcome)
                }
                _ => tracing::info!("{} {}: {}", series.title, m.episode.label(), outcome),
            }

            outcomes.push(MatchOutcome {
                season: m.episode.season,
                episode: m.episode.episode,
                video_id: m.candidate.video_id.clone(),
                tier: Some(m.tier),
                outcome,
            });
        }

        Ok(outcomes)
    }

    async fn process_one(
        &self,
        series: &Series,
        m: &MatchResult,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let (season, episode) = m.episode.number();
        let key = LedgerKey::new(series.id, season, episode, &m.candidate.video_id);

        if self.ledger.episode_satisfied(series.id, season, episode).await {
            return Ok(DownloadOutcome::Skipped {
                reason: SkipReason::AlreadySatisfied,
            });
        }
        if self.ledger.video_already_used(series.id, &m.candidate.video_id).await {
            return Ok(DownloadOutcome::Skipped {
                reason: SkipReason::VideoAlreadyUsed,
            });
        }

        let (dir, stem) = self.destination(series, m);

        if let Some(existing) = fs_utils::find_video_with_stem(&dir, &stem) {
            tracing::warn!(
                "Found unrecorded file {:?}; recording without download",
                existing
            );
            let outcome = self.ledger.record(LedgerEntry::now(key, existing.clone())).await?;
            return Ok(match outcome {
                RecordOutcome::EpisodeSatisfied { .. } => DownloadOutcome::Skipped {
                    reason: SkipReason::AlreadySatisfied,
                },
                RecordOutcome::VideoUsed { .. } => DownloadOutcome::Skipped {
                    reason: SkipReason::VideoAlreadyUsed,
                },
                RecordOutcome::Appended | RecordOutcome::AlreadyPresent => DownloadOutcome::Skipped {
                    reason: SkipReason::AlreadyPlaced { path: existing },
                },
            });
        }

        let staging = self
            .config
            .staging_root
            .join(Uuid::new_v4().simple().to_string());
        let placed = self.fetch_and_place(series, m, &dir, &stem, &staging, cancel).await;
        remove_staging(&staging);

        let path = match placed {
            Ok(path) => path,
            Err(reason) => return Ok(DownloadOutcome::Failed { reason }),
        };

        // The ledger re-checks episode and video under its lock; a concurrent
        // download of the same episode loses here.
        let reason = match self.ledger.record(LedgerEntry::now(key, path.clone())).await? {
            RecordOutcome::Appended | RecordOutcome::AlreadyPresent => {
                return Ok(DownloadOutcome::Downloaded { path })
            }
            RecordOutcome::EpisodeSatisfied { existing } => {
                discard_duplicate(&path, &existing.path);
                SkipReason::AlreadySatisfied
            }
            RecordOutcome::VideoUsed { existing } => {
                discard_duplicate(&path, &existing.path);
                SkipReason::VideoAlreadyUsed
            }
        };
        Ok(DownloadOutcome::Skipped { reason })
    }

    async fn fetch_and_place(
        &self,
        series: &Series,
        m: &MatchResult,
        dir: &Path,
        stem: &str,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<PathBuf, FailureReason> {
        let request = FetchRequest {
            video_id: m.candidate.video_id.clone(),
            url: m
                .candidate
                .url
                .clone()
                .unwrap_or_else(|| m.candidate.video_id.clone()),
            format: series
                .options
                .format
                .clone()
                .unwrap_or_else(|| self.config.default_format.clone()),
            staging_dir: staging.to_path_buf(),
            cookies_file: series.options.cookies_file.clone(),
            subtitles: series.options.subtitles.clone(),
        };

        let op_name = format!("fetch {}", request.video_id);
        let source = &self.source;
        let request = &request;
        let artifact = retry_transient(&self.config.retry, &op_name, cancel, move |attempt| async move {
            tracing::debug!("Fetching {} (attempt {})", request.video_id, attempt);
            source.fetch(request).await
        })
        .await
        .map_err(|failure| {
            if failure.cancelled {
                FailureReason::Cancelled {
                    attempts: failure.attempts,
                }
            } else if failure.exhausted() {
                FailureReason::RetriesExhausted {
                    attempts: failure.attempts,
                    message: failure.error.to_string(),
                }
            } else {
                FailureReason::Permanent {
                    message: failure.error.to_string(),
                }
            }
        })?;

        verify_artifact(&artifact).map_err(|message| FailureReason::Verification { message })?;

        let ext = fs_utils::get_extension(&artifact.path).unwrap_or_else(|| "mkv".to_string());
        let target = dir.join(format!("{}.{}", stem, ext));

        fs_utils::place_atomically(&artifact.path, &target).map_err(|e| FailureReason::Placement {
            message: e.to_string(),
        })?;

        Ok(target)
    }
}
