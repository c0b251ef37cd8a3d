//! Ledger data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identity of a satisfied (episode, video) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerKey {
    pub series_id: u64,
    pub season: u32,
    pub episode: u32,
    pub video_id: String,
}

impl LedgerKey {
    pub fn new(series_id: u64, season: u32, episode: u32, video_id: impl Into<String>) -> Self {
        Self {
            series_id,
            season,
            episode,
            video_id: video_id.into(),
        }
    }
}

impl std::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "series {} S{:02}E{:02} video {}",
            self.series_id, self.season, self.episode, self.video_id
        )
    }
}

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub key: LedgerKey,
    /// When the file was placed.
    pub downloaded_at: DateTime<Utc>,
    /// Final location of the file.
    pub path: PathBuf,
}

impl LedgerEntry {
    /// New entry stamped with the current time.
    pub fn now(key: LedgerKey, path: PathBuf) -> Self {
        Self {
            key,
            downloaded_at: Utc::now(),
            path,
        }
    }
}

/// One line of the ledger file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    /// SHA-256 of the serialized entry.
    pub checksum: String,
}

/// What `record` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new line was appended.
    Appended,
    /// The key was already present; nothing changed.
    AlreadyPresent,
    /// Another video was already recorded for the episode; nothing changed.
    EpisodeSatisfied { existing: LedgerEntry },
    /// The video was already recorded for another episode; nothing changed.
    VideoUsed { existing: LedgerEntry },
}

impl RecordOutcome {
    /// Whether the entry is now stored in the ledger.
    pub fn is_stored(&self) -> bool {
        matches!(self, RecordOutcome::Appended | RecordOutcome::AlreadyPresent)
    }
}
