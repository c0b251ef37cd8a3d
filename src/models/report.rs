//! Cycle report model.

use crate::core::matcher::MatchTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of processing one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf },
    Skipped { reason: SkipReason },
    Failed { reason: FailureReason },
}

/// Why a match was not downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// The ledger already holds an entry for the episode.
    AlreadySatisfied,
    /// The video was already used for another episode of the series.
    VideoAlreadyUsed,
    /// A file was found at the destination and recorded without fetching.
    AlreadyPlaced { path: PathBuf },
}

/// Why a match failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Transient errors persisted past the retry budget.
    RetriesExhausted { attempts: u32, message: String },
    /// The source refused the video outright.
    Permanent { message: String },
    /// The downloaded file did not pass verification.
    Verification { message: String },
    /// The file could not be moved into the library.
    Placement { message: String },
    /// The cycle was cancelled while waiting to retry.
    Cancelled { attempts: u32 },
}

impl std::fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadOutcome::Downloaded { path } => write!(f, "downloaded to {}", path.display()),
            DownloadOutcome::Skipped { reason } => match reason {
                SkipReason::AlreadySatisfied => write!(f, "skipped (already satisfied)"),
                SkipReason::VideoAlreadyUsed => write!(f, "skipped (video already used)"),
                SkipReason::AlreadyPlaced { path } => {
                    write!(f, "skipped (already placed at {})", path.display())
                }
            },
            DownloadOutcome::Failed { reason } => match reason {
                FailureReason::RetriesExhausted { attempts, message } => {
                    write!(f, "failed after {} attempts: {}", attempts, message)
                }
                FailureReason::Permanent { message } => write!(f, "failed: {}", message),
                FailureReason::Verification { message } => {
                    write!(f, "verification failed: {}", message)
                }
                FailureReason::Placement { message } => write!(f, "placement failed: {}", message),
                FailureReason::Cancelled { attempts } => {
                    write!(f, "cancelled after {} attempts", attempts)
                }
            },
        }
    }
}

/// Outcome of one match, with enough context to log it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub season: u32,
    pub episode: u32,
    pub video_id: String,
    /// `None` when the ledger already satisfied the episode before matching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<MatchTier>,
    pub outcome: DownloadOutcome,
}

/// Whether a series could be processed this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SeriesStatus {
    Processed,
    Skipped { reason: String },
}

/// Per-series part of a cycle report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesReport {
    pub series_id: u64,
    pub title: String,
    pub status: SeriesStatus,
    /// Missing episodes considered.
    pub missing: usize,
    /// Candidates listed across all sources.
    pub candidates: usize,
    pub outcomes: Vec<MatchOutcome>,
}

impl SeriesReport {
    pub fn new(series_id: u64, title: &str) -> Self {
        Self {
            series_id,
            title: title.to_string(),
            status: SeriesStatus::Processed,
            missing: 0,
            candidates: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn skipped(series_id: u64, title: &str, reason: impl Into<String>) -> Self {
        Self {
            status: SeriesStatus::Skipped {
                reason: reason.into(),
            },
            ..Self::new(series_id, title)
        }
    }

    pub fn downloaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, DownloadOutcome::Downloaded { .. }))
            .count()
    }
}

/// Everything one `run_once` did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub series: Vec<SeriesReport>,
    /// The cycle stopped early on cancellation.
    pub cancelled: bool,
}

impl CycleReport {
    fn count(&self, pred: impl Fn(&DownloadOutcome) -> bool) -> usize {
        self.series
            .iter()
            .flat_map(|s| s.outcomes.iter())
            .filter(|o| pred(&o.outcome))
            .count()
    }

    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Downloaded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Failed { .. }))
    }
}
