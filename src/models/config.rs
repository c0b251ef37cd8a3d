//! Configuration model.

use crate::models::media::SeriesOptions;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that points at the configuration file.
pub const CONFIG_PATH_ENV: &str = "CONFIGPATH";

/// Environment variable used when `sonarr.api_key` is empty.
pub const SONARR_API_KEY_ENV: &str = "SONARR_API_KEY";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Minutes between scan cycles.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_minutes: u64,
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,
    /// Directory for rolling log files.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Sonarr connection.
    pub sonarr: SonarrConfig,
    /// yt-dlp settings.
    #[serde(default)]
    pub ytdl: YtdlConfig,
    /// Library layout.
    #[serde(default)]
    pub library: LibraryConfig,
    /// Matching policy.
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Download policy.
    #[serde(default)]
    pub download: DownloadConfig,
    /// Configured series.
    #[serde(default)]
    pub series: Vec<SeriesConfig>,
    /// Directory of the loaded file, used for relative paths.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

/// Sonarr configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SonarrConfig {
    /// Sonarr host.
    pub host: String,
    /// Sonarr port.
    #[serde(default = "default_sonarr_port")]
    pub port: u16,
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// Use HTTPS.
    #[serde(default)]
    pub ssl: bool,
    /// API base path.
    #[serde(default = "default_api_base_path")]
    pub api_base_path: String,
}

/// yt-dlp configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YtdlConfig {
    /// Executable name or path.
    #[serde(default = "default_ytdlp_binary")]
    pub binary: String,
    /// Format selector used when a series has none.
    #[serde(default = "default_format")]
    pub default_format: String,
    /// Where downloads land before placement.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

/// Library layout configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Prefix prepended to manager series paths (e.g. a container mount).
    #[serde(default)]
    pub path_prefix: Option<PathBuf>,
    /// Ledger file location.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
}

/// Matching policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Maximum distance in days between air date and publish date.
    #[serde(default)]
    pub date_tolerance_days: i64,
    /// Minimum title similarity for the fuzzy tier.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

/// Download policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Attempts per video, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay.
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    /// Upper bound for retry delays.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Series processed concurrently.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_series: usize,
}

/// A configured series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// Title as it appears in the manager.
    pub title: String,
    /// Single source URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Additional source URLs.
    #[serde(default)]
    pub urls: Vec<String>,
    /// yt-dlp format selector.
    #[serde(default)]
    pub format: Option<String>,
    /// Filename pattern.
    #[serde(default)]
    pub naming_pattern: Option<String>,
    /// Cookies file, relative to the config directory.
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
    /// List playlists oldest first.
    #[serde(default = "default_true")]
    pub playlist_reverse: bool,
    /// Include filter for candidate titles.
    #[serde(default)]
    pub include: Option<String>,
    /// Exclude filter for candidate titles.
    #[serde(default)]
    pub exclude: Option<String>,
    /// Air time offset.
    #[serde(default)]
    pub offset: TimeOffset,
    /// Episode title rewrite.
    #[serde(default)]
    pub title_rewrite: Option<TitleRewrite>,
    /// Subtitle options.
    #[serde(default)]
    pub subtitles: Option<SubtitleOptions>,
}

/// Offset added to an episode's air timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffset {
    #[serde(default)]
    pub weeks: i64,
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub minutes: i64,
}

impl TimeOffset {
    /// Offset as a duration.
    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::weeks(self.weeks)
            + chrono::Duration::days(self.days)
            + chrono::Duration::hours(self.hours)
            + chrono::Duration::minutes(self.minutes)
    }
}

/// Regex rewrite applied to manager episode titles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRewrite {
    pub pattern: String,
    pub replacement: String,
}

/// Subtitle options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleOptions {
    /// Subtitle languages, e.g. `["en"]`.
    #[serde(default = "default_subtitle_languages")]
    pub languages: Vec<String>,
    /// Also accept auto-generated subtitles.
    #[serde(default)]
    pub autogenerated: bool,
}

fn default_scan_interval() -> u64 {
    60
}

fn default_sonarr_port() -> u16 {
    8989
}

fn default_api_base_path() -> String {
    "api/v3".to_string()
}

fn default_ytdlp_binary() -> String {
    "yt-dlp".to_string()
}

fn default_format() -> String {
    "bestvideo+bestaudio/best".to_string()
}

fn default_similarity_threshold() -> f64 {
    crate::core::matcher::DEFAULT_SIMILARITY_THRESHOLD
}

fn default_max_attempts() -> u32 {
    crate::core::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay() -> u64 {
    crate::core::retry::DEFAULT_BASE_DELAY.as_secs()
}

fn default_max_delay() -> u64 {
    crate::core::retry::DEFAULT_MAX_DELAY.as_secs()
}

fn default_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_subtitle_languages() -> Vec<String> {
    vec!["en".to_string()]
}

impl Default for YtdlConfig {
    fn default() -> Self {
        Self {
            binary: default_ytdlp_binary(),
            default_format: default_format(),
            staging_dir: None,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            date_tolerance_days: crate::core::matcher::DEFAULT_DATE_TOLERANCE_DAYS,
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            max_concurrent_series: default_concurrency(),
        }
    }
}

impl SeriesConfig {
    /// All source URLs, `url` first.
    pub fn sources(&self) -> Vec<String> {
        self.url
            .iter()
            .chain(self.urls.iter())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect()
    }
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str, config_dir: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.config_dir = config_dir.to_path_buf();

        if config.sonarr.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var(SONARR_API_KEY_ENV) {
                config.sonarr.api_key = key;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.sonarr.host.trim().is_empty() {
            errors.push("sonarr.host is empty".to_string());
        }
        if self.sonarr.api_key.trim().is_empty() {
            errors.push(format!(
                "sonarr.api_key is empty and {} is not set",
                SONARR_API_KEY_ENV
            ));
        }
        if !(0.0..=1.0).contains(&self.matching.similarity_threshold) {
            errors.push("matching.similarity_threshold must be between 0 and 1".to_string());
        }
        if self.matching.date_tolerance_days < 0 {
            errors.push("matching.date_tolerance_days must not be negative".to_string());
        }
        if self.download.max_attempts == 0 {
            errors.push("download.max_attempts must be at least 1".to_string());
        }
        if self.download.max_concurrent_series == 0 {
            errors.push("download.max_concurrent_series must be at least 1".to_string());
        }

        for (i, series) in self.series.iter().enumerate() {
            if series.title.trim().is_empty() {
                errors.push(format!("series {} has no title", i));
            }
            if series.sources().is_empty() {
                errors.push(format!("series '{}' has no url", series.title));
            }
            let patterns = [
                series.include.as_deref(),
                series.exclude.as_deref(),
                series.title_rewrite.as_ref().map(|r| r.pattern.as_str()),
            ];
            for pattern in patterns.into_iter().flatten() {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(format!("series '{}': {}", series.title, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Config(errors.join("; ")))
        }
    }

    /// Resolve a configured cookies file against the config directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    /// Ledger location.
    pub fn ledger_path(&self) -> PathBuf {
        match self.library.ledger_path {
            Some(ref p) => self.resolve_path(p),
            None => self.config_dir.join("ledger.jsonl"),
        }
    }

    /// Staging location.
    pub fn staging_dir(&self) -> PathBuf {
        match self.ytdl.staging_dir {
            Some(ref p) => self.resolve_path(p),
            None => std::env::temp_dir().join("ytarr"),
        }
    }

    /// Matching and download options of a configured series.
    pub fn series_options(&self, series: &SeriesConfig) -> SeriesOptions {
        SeriesOptions {
            format: series.format.clone(),
            naming_pattern: series.naming_pattern.clone(),
            include: series.include.clone(),
            exclude: series.exclude.clone(),
            offset: series.offset,
            title_rewrite: series.title_rewrite.clone(),
            cookies_file: series.cookies_file.as_deref().map(|p| self.resolve_path(p)),
            playlist_reverse: series.playlist_reverse,
            subtitles: series.subtitles.clone(),
        }
    }
}

/// Get the default configuration directory path.
pub fn dirs_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytarr")
}

/// Locate the configuration file: explicit path, then `$CONFIGPATH`, then the
/// user config directory.
pub fn config_file_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => dirs_config_path().join("config.toml"),
    }
}

/// Load configuration from file.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config_path = config_file_path(explicit);

    if !config_path.exists() {
        return Err(crate::Error::ConfigNotFound(config_path.display().to_string()));
    }

    let content = std::fs::read_to_string(&config_path)?;
    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::from_toml(&content, &config_dir)?;
    Ok(config)
}
