//! Sonarr API client.

use crate::models::config::SonarrConfig;
use crate::models::media::{Episode, ManagedSeries};
use crate::services::ManagerGateway;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Series as returned by `GET /series`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonarrSeries {
    pub id: u64,
    pub title: String,
    pub path: String,
    #[serde(default)]
    pub monitored: bool,
}

/// Episode as returned by `GET /episode?seriesId=`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonarrEpisode {
    pub series_id: u64,
    pub season_number: u32,
    pub episode_number: u32,
    pub title: Option<String>,
    pub air_date: Option<String>,
    pub air_date_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub monitored: bool,
}

/// `GET /system/status`.
#[derive(Debug, Deserialize)]
pub struct SystemStatus {
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest<'a> {
    name: &'a str,
    series_id: u64,
}

impl From<SonarrSeries> for ManagedSeries {
    fn from(s: SonarrSeries) -> Self {
        Self {
            id: s.id,
            title: s.title,
            path: PathBuf::from(s.path),
            monitored: s.monitored,
        }
    }
}

impl From<SonarrEpisode> for Episode {
    fn from(e: SonarrEpisode) -> Self {
        let air_date = e.air_date.as_deref().and_then(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|err| {
                    tracing::warn!(
                        "Ignoring air date '{}' of S{:02}E{:02}: {}",
                        raw,
                        e.season_number,
                        e.episode_number,
                        err
                    )
                })
                .ok()
        });

        Self {
            series_id: e.series_id,
            season: e.season_number,
            episode: e.episode_number,
            title: e.title,
            air_date: air_date.or_else(|| e.air_date_utc.map(|d| d.date_naive())),
            air_date_utc: e.air_date_utc,
            has_file: e.has_file,
            monitored: e.monitored,
        }
    }
}

/// Sonarr API client.
pub struct SonarrClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SonarrClient {
    /// Create a new Sonarr client.
    pub fn new(config: &SonarrConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: Self::base_url(config),
            api_key: config.api_key.clone(),
            client,
        })
    }

    /// `http(s)://host:port/<api base>`, without a trailing slash.
    pub fn base_url(config: &SonarrConfig) -> String {
        let scheme = if config.ssl { "https" } else { "http" };
        let base = config.api_base_path.trim_matches('/');
        if base.is_empty() {
            format!("{}://{}:{}", scheme, config.host, config.port)
        } else {
            format!("{}://{}:{}/{}", scheme, config.host, config.port, base)
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        tracing::debug!("Sonarr GET {}", url);

        let resp = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::from_status(resp.status(), &format!("Sonarr GET {}", path)));
        }
        Ok(resp.json().await?)
    }

    /// Fetch the server status; used by preflight.
    pub async fn system_status(&self) -> Result<SystemStatus> {
        self.get("system/status").await
    }
}

#[async_trait]
impl ManagerGateway for SonarrClient {
    async fn list_series(&self) -> Result<Vec<ManagedSeries>> {
        let series: Vec<SonarrSeries> = self.get("series").await?;
        Ok(series.into_iter().map(ManagedSeries::from).collect())
    }

    async fn list_episodes(&self, series_id: u64) -> Result<Vec<Episode>> {
        let episodes: Vec<SonarrEpisode> = self.get(&format!("episode?seriesId={}", series_id)).await?;
        Ok(episodes.into_iter().map(Episode::from).collect())
    }

    async fn rescan_series(&self, series_id: u64) -> Result<()> {
        let resp = self
            .client
            .post(self.url("command"))
            .header("X-Api-Key", &self.api_key)
            .json(&CommandRequest {
                name: "RescanSeries",
                series_id,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::from_status(resp.status(), "Sonarr RescanSeries"));
        }
        tracing::info!("Requested Sonarr rescan of series {}", series_id);
        Ok(())
    }
}
