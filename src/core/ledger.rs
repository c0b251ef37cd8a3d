//! Download ledger.
//!
//! Append-only JSON Lines file recording every (series, season, episode,
//! video) pair that has been downloaded and placed. It is the only state that
//! survives between cycles and the sole authority on whether an episode or a
//! video has already been used.
//!
//! Each line carries a SHA-256 checksum of its entry. On open, a damaged last
//! line (the usual result of a crash mid-append) is cut off and loading
//! continues; damage anywhere else is reported as `LedgerCorrupt`.

use crate::models::ledger::{LedgerEntry, LedgerKey, LedgerRecord, RecordOutcome};
use crate::utils::hash;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Durable record of completed downloads.
pub struct DownloadLedger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

struct LedgerState {
    file: File,
    /// Current file length, used to undo a failed append.
    len: u64,
    /// Set when a failed append could not be undone.
    poisoned: bool,
    entries: Vec<LedgerEntry>,
    keys: HashMap<LedgerKey, usize>,
    episodes: HashSet<(u64, u32, u32)>,
    videos: HashSet<(u64, String)>,
}

/// Per-series view of the ledger taken at cycle start.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    /// Satisfied episode to the video that satisfied it.
    episodes: HashMap<(u32, u32), String>,
    videos: HashSet<String>,
}

impl LedgerSnapshot {
    /// Build a snapshot from entries of a single series.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut snapshot = Self::default();
        for entry in entries {
            snapshot
                .episodes
                .entry((entry.key.season, entry.key.episode))
                .or_insert_with(|| entry.key.video_id.clone());
            snapshot.videos.insert(entry.key.video_id.clone());
        }
        snapshot
    }

    pub fn episode_satisfied(&self, season: u32, episode: u32) -> bool {
        self.episodes.contains_key(&(season, episode))
    }

    /// The video recorded for an episode.
    pub fn video_for(&self, season: u32, episode: u32) -> Option<&str> {
        self.episodes.get(&(season, episode)).map(String::as_str)
    }

    pub fn video_used(&self, video_id: &str) -> bool {
        self.videos.contains(video_id)
    }
}

/// A line split out of the ledger file.
struct RawLine<'a> {
    bytes: &'a [u8],
    start: usize,
    end: usize,
    terminated: bool,
}

fn split_lines(data: &[u8]) -> Vec<RawLine<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    while start < data.len() {
        match data[start..].iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let end = start + pos;
                lines.push(RawLine {
                    bytes: &data[start..end],
                    start,
                    end,
                    terminated: true,
                });
                start = end + 1;
            }
            None => {
                lines.push(RawLine {
                    bytes: &data[start..],
                    start,
                    end: data.len(),
                    terminated: false,
                });
                start = data.len();
            }
        }
    }
    lines
}

fn entry_checksum(entry: &LedgerEntry) -> Result<String> {
    Ok(hash::sha256_str(&serde_json::to_string(entry)?))
}

fn encode(entry: &LedgerEntry) -> Result<String> {
    let record = LedgerRecord {
        entry: entry.clone(),
        checksum: entry_checksum(entry)?,
    };
    let mut line = serde_json::to_string(&record)?;
    line.push('\n');
    Ok(line)
}

fn decode(bytes: &[u8]) -> Option<LedgerEntry> {
    let record: LedgerRecord = serde_json::from_slice(bytes).ok()?;
    let expected = entry_checksum(&record.entry).ok()?;
    (expected == record.checksum).then_some(record.entry)
}

fn ledger_io(context: &str, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::LedgerIo(format!("{} {}: {}", context, path.display(), e))
}

impl LedgerState {
    fn contains(&self, key: &LedgerKey) -> bool {
        self.keys.contains_key(key)
    }

    /// An entry that already claims the episode or the video of `key`.
    fn conflict(&self, key: &LedgerKey) -> Option<RecordOutcome> {
        if self.episodes.contains(&(key.series_id, key.season, key.episode)) {
            return self
                .entries
                .iter()
                .find(|e| {
                    e.key.series_id == key.series_id
                        && e.key.season == key.season
                        && e.key.episode == key.episode
                })
                .map(|e| RecordOutcome::EpisodeSatisfied { existing: e.clone() });
        }
        if self.videos.contains(&(key.series_id, key.video_id.clone())) {
            return self
                .entries
                .iter()
                .find(|e| e.key.series_id == key.series_id && e.key.video_id == key.video_id)
                .map(|e| RecordOutcome::VideoUsed { existing: e.clone() });
        }
        None
    }

    fn insert(&mut self, entry: LedgerEntry) {
        self.episodes
            .insert((entry.key.series_id, entry.key.season, entry.key.episode));
        self.videos
            .insert((entry.key.series_id, entry.key.video_id.clone()));
        self.keys.insert(entry.key.clone(), self.entries.len());
        self.entries.push(entry);
    }
}

impl DownloadLedger {
    /// Open or create the ledger at `path`, loading every valid record.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ledger_io("creating", parent, e))?;
            }
        }

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(ledger_io("reading", path, e)),
        };

        let lines = split_lines(&data);
        let mut loaded = Vec::new();
        let mut valid_len = 0usize;
        let mut needs_newline = false;

        for (idx, line) in lines.iter().enumerate() {
            if line.bytes.iter().all(u8::is_ascii_whitespace) {
                if line.terminated {
                    valid_len = line.end + 1;
                }
                continue;
            }

            match decode(line.bytes) {
                Some(entry) => {
                    loaded.push(entry);
                    valid_len = if line.terminated { line.end + 1 } else { line.end };
                    needs_newline = !line.terminated;
                }
                None => {
                    let is_last = lines[idx + 1..]
                        .iter()
                        .all(|l| l.bytes.iter().all(u8::is_ascii_whitespace));
                    if !is_last {
                        return Err(Error::LedgerCorrupt {
                            path: path.to_path_buf(),
                            line: idx + 1,
                        });
                    }
                    tracing::warn!(
                        "Ledger {}: dropping damaged trailing record at line {} (byte {})",
                        path.display(),
                        idx + 1,
                        line.start
                    );
                    valid_len = line.start;
                    needs_newline = false;
                    break;
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ledger_io("opening", path, e))?;

        let mut len = data.len() as u64;
        if (valid_len as u64) < len {
            file.set_len(valid_len as u64)
                .and_then(|_| file.sync_data())
                .map_err(|e| ledger_io("truncating", path, e))?;
            len = valid_len as u64;
        }
        if needs_newline {
            file.write_all(b"\n")
                .and_then(|_| file.sync_data())
                .map_err(|e| ledger_io("repairing", path, e))?;
            len += 1;
        }

        let mut state = LedgerState {
            file,
            len,
            poisoned: false,
            entries: Vec::new(),
            keys: HashMap::new(),
            episodes: HashSet::new(),
            videos: HashSet::new(),
        };
        for entry in loaded {
            if state.contains(&entry.key) {
                tracing::warn!("Ledger {}: duplicate record for {}", path.display(), entry.key);
                continue;
            }
            state.insert(entry);
        }

        tracing::info!(
            "Ledger loaded from {} ({} entries)",
            path.display(),
            state.entries.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    /// Ledger file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an entry exists for exactly this key.
    pub async fn contains(&self, key: &LedgerKey) -> bool {
        self.state.lock().await.contains(key)
    }

    /// Whether any video has been recorded for this episode.
    pub async fn episode_satisfied(&self, series_id: u64, season: u32, episode: u32) -> bool {
        self.state
            .lock()
            .await
            .episodes
            .contains(&(series_id, season, episode))
    }

    /// Whether this video has been recorded for any episode of the series.
    pub async fn video_already_used(&self, series_id: u64, video_id: &str) -> bool {
        self.state
            .lock()
            .await
            .videos
            .contains(&(series_id, video_id.to_string()))
    }

    /// Append an entry unless the ledger already covers it.
    ///
    /// An existing key is left untouched and reported as `AlreadyPresent`.
    /// An entry whose episode or video is already claimed by another entry of
    /// the series is refused, and the claiming entry is returned.
    pub async fn record(&self, entry: LedgerEntry) -> Result<RecordOutcome> {
        let mut state = self.state.lock().await;

        if state.poisoned {
            return Err(Error::LedgerIo(format!(
                "{} is in an unknown state after a failed write",
                self.path.display()
            )));
        }
        if state.contains(&entry.key) {
            tracing::debug!("Ledger already holds {}", entry.key);
            return Ok(RecordOutcome::AlreadyPresent);
        }
        if let Some(conflict) = state.conflict(&entry.key) {
            tracing::warn!("Ledger refused {}: already covered", entry.key);
            return Ok(conflict);
        }

        let line = encode(&entry)
            .map_err(|e| Error::LedgerIo(format!("encoding {}: {}", entry.key, e)))?;
        let write = state
            .file
            .write_all(line.as_bytes())
            .and_then(|_| state.file.sync_data());

        if let Err(e) = write {
            let len = state.len;
            let undo = state.file.set_len(len).and_then(|_| state.file.sync_data());
            if undo.is_err() {
                state.poisoned = true;
            }
            return Err(ledger_io("appending to", &self.path, e));
        }

        state.len += line.len() as u64;
        tracing::debug!("Ledger recorded {}", entry.key);
        state.insert(entry);
        Ok(RecordOutcome::Appended)
    }

    /// Snapshot of one series' satisfied episodes and used videos.
    pub async fn snapshot(&self, series_id: u64) -> LedgerSnapshot {
        let state = self.state.lock().await;
        LedgerSnapshot::from_entries(
            state
                .entries
                .iter()
                .filter(|e| e.key.series_id == series_id),
        )
    }

    /// All entries in file order.
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Entry stored under `key`.
    pub async fn get(&self, key: &LedgerKey) -> Option<LedgerEntry> {
        let state = self.state.lock().await;
        state.keys.get(key).map(|&i| state.entries[i].clone())
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
