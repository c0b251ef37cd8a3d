//! External services.
//!
//! The scan cycle talks to the series manager and to the video source only
//! through the two traits below, so tests can substitute in-memory fakes.

pub mod sonarr;
pub mod ytdlp;

use crate::models::config::SubtitleOptions;
use crate::models::media::{Artifact, Episode, ManagedSeries, Series, VideoCandidate};
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// The series manager (Sonarr).
#[async_trait]
pub trait ManagerGateway: Send + Sync {
    /// All series the manager knows about.
    async fn list_series(&self) -> Result<Vec<ManagedSeries>>;

    /// All episodes of one series.
    async fn list_episodes(&self, series_id: u64) -> Result<Vec<Episode>>;

    /// Ask the manager to rescan a series folder.
    async fn rescan_series(&self, series_id: u64) -> Result<()>;
}

/// Everything a source needs to download one video.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub video_id: String,
    /// Page URL of the video.
    pub url: String,
    /// Format selector.
    pub format: String,
    /// Private directory the source writes into.
    pub staging_dir: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub subtitles: Option<SubtitleOptions>,
}

/// A video provider reachable through yt-dlp.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    /// Videos offered by one source reference (channel or playlist URL).
    async fn list_candidates(&self, series: &Series, source: &str) -> Result<Vec<VideoCandidate>>;

    /// Download a video into `request.staging_dir`.
    async fn fetch(&self, request: &FetchRequest) -> Result<Artifact>;
}
