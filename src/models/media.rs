//! Series, episode and candidate video models.

use super::config::{SubtitleOptions, TimeOffset, TitleRewrite};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A series as the manager knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedSeries {
    /// Manager series ID.
    pub id: u64,
    /// Display title.
    pub title: String,
    /// Series folder as seen by the manager.
    pub path: PathBuf,
    /// Whether the manager monitors this series.
    pub monitored: bool,
}

/// A configured series, ready for a scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    /// Manager series ID.
    pub id: u64,
    /// Display title.
    pub title: String,
    /// Series folder as seen by the manager.
    pub path: PathBuf,
    /// Whether the manager monitors this series.
    pub monitored: bool,
    /// Channel or playlist URLs to pull candidates from.
    pub sources: Vec<String>,
    /// Per-series overrides.
    pub options: SeriesOptions,
}

/// Per-series overrides taken from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesOptions {
    /// yt-dlp format selector.
    pub format: Option<String>,
    /// Filename pattern, see `generators::filename`.
    pub naming_pattern: Option<String>,
    /// Candidate titles must match this regex.
    pub include: Option<String>,
    /// Candidate titles matching this regex are ignored.
    pub exclude: Option<String>,
    /// Shift applied to air timestamps before deciding whether an episode has aired.
    pub offset: TimeOffset,
    /// Rewrite applied to manager episode titles.
    pub title_rewrite: Option<TitleRewrite>,
    /// Absolute path of a cookies file for the source.
    pub cookies_file: Option<PathBuf>,
    /// List playlists oldest first.
    pub playlist_reverse: bool,
    /// Subtitle download options.
    pub subtitles: Option<SubtitleOptions>,
}

impl Series {
    /// Build from the manager's view plus configured sources and options.
    pub fn from_managed(managed: ManagedSeries, sources: Vec<String>, options: SeriesOptions) -> Self {
        Self {
            id: managed.id,
            title: managed.title,
            path: managed.path,
            monitored: managed.monitored,
            sources,
            options,
        }
    }
}

/// An episode from the manager's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    /// Owning series ID.
    pub series_id: u64,
    /// Season number.
    pub season: u32,
    /// Episode number within the season.
    pub episode: u32,
    /// Episode title.
    pub title: Option<String>,
    /// Local air date.
    pub air_date: Option<NaiveDate>,
    /// Air timestamp.
    pub air_date_utc: Option<DateTime<Utc>>,
    /// Whether the manager already has a file for it.
    pub has_file: bool,
    /// Whether the manager monitors it.
    pub monitored: bool,
}

impl Episode {
    /// `(season, episode)` pair.
    pub fn number(&self) -> (u32, u32) {
        (self.season, self.episode)
    }

    /// Short label such as `S01E02`.
    pub fn label(&self) -> String {
        format!("S{:02}E{:02}", self.season, self.episode)
    }
}

/// A video offered by the source for a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCandidate {
    /// Source-unique video ID.
    pub video_id: String,
    /// Free-text title.
    pub title: String,
    /// Publish date.
    pub published: Option<NaiveDate>,
    /// Duration in seconds.
    pub duration_secs: Option<u64>,
    /// Page URL, when the source reports one.
    pub url: Option<String>,
}

/// A downloaded file waiting in staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Location inside the staging directory.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Parse a yt-dlp style `YYYYMMDD` or ISO `YYYY-MM-DD` date.
pub fn parse_publish_date(raw: &str) -> crate::Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| crate::Error::Metadata(format!("unparseable date '{}'", raw)))
}
