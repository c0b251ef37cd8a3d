//! In-memory gateways and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use ytarr::core::cycle::{CycleConfig, ScanCycle};
use ytarr::core::ledger::DownloadLedger;
use ytarr::core::matcher::MatcherConfig;
use ytarr::core::orchestrator::OrchestratorConfig;
use ytarr::core::retry::RetryPolicy;
use ytarr::models::media::{Artifact, Episode, ManagedSeries, Series, SeriesOptions, VideoCandidate};
use ytarr::services::{FetchRequest, ManagerGateway, SourceGateway};
use ytarr::{Error, Result};

/// EBML header followed by the Matroska doc type.
pub const MKV_BYTES: &[u8] = &[
    0x1A, 0x45, 0xDF, 0xA3, 0x93, 0x42, 0x82, 0x88, b'm', b'a', b't', b'r', b'o', b's', b'k', b'a',
    0x42, 0x87, 0x81, 0x04,
];

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn episode(series_id: u64, season: u32, number: u32, title: &str, aired: Option<&str>) -> Episode {
    Episode {
        series_id,
        season,
        episode: number,
        title: Some(title.to_string()),
        air_date: aired.map(date),
        air_date_utc: None,
        has_file: false,
        monitored: true,
    }
}

pub fn video(id: &str, title: &str, published: Option<&str>) -> VideoCandidate {
    VideoCandidate {
        video_id: id.to_string(),
        title: title.to_string(),
        published: published.map(date),
        duration_secs: Some(1500),
        url: Some(format!("https://videos.example/{}", id)),
    }
}

// ========== MANAGER ==========

#[derive(Default)]
pub struct FakeManager {
    pub series: Mutex<Vec<ManagedSeries>>,
    pub episodes: Mutex<HashMap<u64, Vec<Episode>>>,
    pub failing: Mutex<HashSet<u64>>,
    pub rescans: Mutex<Vec<u64>>,
}

impl FakeManager {
    pub fn set_episodes(&self, series_id: u64, episodes: Vec<Episode>) {
        self.episodes.lock().unwrap().insert(series_id, episodes);
    }

    /// Mark an episode as present on disk, as Sonarr does after a rescan.
    pub fn mark_has_file(&self, series_id: u64, season: u32, number: u32) {
        let mut all = self.episodes.lock().unwrap();
        for e in all.get_mut(&series_id).into_iter().flatten() {
            if e.season == season && e.episode == number {
                e.has_file = true;
            }
        }
    }
}

#[async_trait]
impl ManagerGateway for FakeManager {
    async fn list_series(&self) -> Result<Vec<ManagedSeries>> {
        Ok(self.series.lock().unwrap().clone())
    }

    async fn list_episodes(&self, series_id: u64) -> Result<Vec<Episode>> {
        if self.failing.lock().unwrap().contains(&series_id) {
            return Err(Error::TransientRemote("Sonarr returned 503".to_string()));
        }
        Ok(self
            .episodes
            .lock()
            .unwrap()
            .get(&series_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn rescan_series(&self, series_id: u64) -> Result<()> {
        self.rescans.lock().unwrap().push(series_id);
        Ok(())
    }
}

// ========== SOURCE ==========

/// Scripted result of one fetch call.
#[derive(Debug, Clone)]
pub enum FetchStep {
    Succeed,
    Transient,
    Permanent,
    /// Produce an empty file.
    Empty,
}

#[derive(Default)]
pub struct FakeSource {
    pub candidates: Mutex<HashMap<String, Vec<VideoCandidate>>>,
    pub scripts: Mutex<HashMap<String, VecDeque<FetchStep>>>,
    pub fetches: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn set_candidates(&self, source: &str, candidates: Vec<VideoCandidate>) {
        self.candidates
            .lock()
            .unwrap()
            .insert(source.to_string(), candidates);
    }

    pub fn script(&self, video_id: &str, steps: Vec<FetchStep>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(video_id.to_string(), steps.into());
    }

    pub fn fetch_count(&self, video_id: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == video_id)
            .count()
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceGateway for FakeSource {
    async fn list_candidates(&self, _series: &Series, source: &str) -> Result<Vec<VideoCandidate>> {
        self.candidates
            .lock()
            .unwrap()
            .get(source)
            .cloned()
            .ok_or_else(|| Error::PermanentRemote(format!("unknown source {}", source)))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Artifact> {
        self.fetches.lock().unwrap().push(request.video_id.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.video_id)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(FetchStep::Succeed);

        let (name, bytes): (String, &[u8]) = match step {
            FetchStep::Transient => {
                return Err(Error::TransientRemote("HTTP Error 503".to_string()))
            }
            FetchStep::Permanent => {
                return Err(Error::PermanentRemote("HTTP Error 404: Not Found".to_string()))
            }
            FetchStep::Succeed => (format!("{}.mkv", request.video_id), MKV_BYTES),
            FetchStep::Empty => (format!("{}.mkv", request.video_id), &[0u8; 0]),
        };

        std::fs::create_dir_all(&request.staging_dir)?;
        let path = request.staging_dir.join(name);
        std::fs::write(&path, bytes)?;
        Ok(Artifact {
            path,
            size: bytes.len() as u64,
        })
    }
}

// ========== HARNESS ==========

pub const SOURCE_URL: &str = "https://videos.example/channel";

pub struct Harness {
    pub temp: TempDir,
    pub manager: Arc<FakeManager>,
    pub source: Arc<FakeSource>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            manager: Arc::new(FakeManager::default()),
            source: Arc::new(FakeSource::default()),
        }
    }

    pub fn library(&self) -> PathBuf {
        self.temp.path().join("library")
    }

    pub fn staging(&self) -> PathBuf {
        self.temp.path().join("staging")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.temp.path().join("ledger.jsonl")
    }

    pub fn series(&self, id: u64, title: &str) -> Series {
        Series {
            id,
            title: title.to_string(),
            path: self.library().join(title),
            monitored: true,
            sources: vec![SOURCE_URL.to_string()],
            options: SeriesOptions::default(),
        }
    }

    pub fn open_ledger(&self) -> Arc<DownloadLedger> {
        Arc::new(DownloadLedger::open(&self.ledger_path()).unwrap())
    }

    /// A cycle over a freshly opened ledger, as a restarted process would have.
    pub fn cycle(&self) -> ScanCycle {
        self.cycle_with(MatcherConfig::default())
    }

    pub fn cycle_with(&self, matcher: MatcherConfig) -> ScanCycle {
        self.build_cycle(matcher, 2)
    }

    /// A cycle that processes series one at a time, in order.
    pub fn sequential_cycle(&self) -> ScanCycle {
        self.build_cycle(MatcherConfig::default(), 1)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            staging_root: self.staging(),
            retry: RetryPolicy::immediate(3),
            ..OrchestratorConfig::default()
        }
    }

    fn build_cycle(&self, matcher: MatcherConfig, max_concurrent_series: usize) -> ScanCycle {
        ScanCycle::with_config(
            CycleConfig {
                max_concurrent_series,
                rescan_after_download: true,
            },
            matcher,
            self.orchestrator_config(),
            self.manager.clone(),
            self.source.clone(),
            self.open_ledger(),
        )
    }
}

/// Files directly inside `dir`, sorted.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}
