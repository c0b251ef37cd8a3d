//! Scan cycle.
//!
//! One pass over the configured series: list episodes, select the missing
//! ones, list candidates, match, download.

use crate::core::ledger::DownloadLedger;
use crate::core::matcher::{EpisodeMatcher, MatcherConfig};
use crate::core::orchestrator::{DownloadOrchestrator, OrchestratorConfig};
use crate::models::config::Config;
use crate::models::media::{Episode, Series, VideoCandidate};
use crate::models::report::{CycleReport, DownloadOutcome, MatchOutcome, SeriesReport, SkipReason};
use crate::services::{ManagerGateway, SourceGateway};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cycle configuration.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Series processed at the same time.
    pub max_concurrent_series: usize,
    /// Ask the manager to rescan series that received files.
    pub rescan_after_download: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_series: 1,
            rescan_after_download: true,
        }
    }
}

/// Episodes worth looking for.
///
/// Keeps monitored episodes without a file whose air time, shifted by the
/// series offset, is not after `now`. Episodes without an air time are kept.
/// The series title rewrite is applied to the kept episodes.
pub fn select_missing(series: &Series, episodes: Vec<Episode>, now: DateTime<Utc>) -> Vec<Episode> {
    let rewrite = series.options.title_rewrite.as_ref().and_then(|rw| {
        match Regex::new(&rw.pattern) {
            Ok(re) => Some((re, rw.replacement.as_str())),
            Err(e) => {
                tracing::warn!("Ignoring invalid title rewrite for '{}': {}", series.title, e);
                None
            }
        }
    });
    let offset = series.options.offset.as_duration();

    episodes
        .into_iter()
        .filter(|e| e.monitored && !e.has_file)
        .filter(|e| match e.air_date_utc {
            Some(aired) if aired + offset > now => {
                tracing::debug!("{} {} has not aired yet", series.title, e.label());
                false
            }
            _ => true,
        })
        .map(|mut e| {
            if let (Some((re, replacement)), Some(title)) = (&rewrite, &e.title) {
                e.title = Some(re.replace_all(title, *replacement).into_owned());
            }
            e
        })
        .collect()
}

/// Fold entries sharing a manager id into one, keeping the first entry's
/// options and appending the other entries' sources.
///
/// Two configured entries can resolve to the same manager series; processing
/// them separately would race for the same episodes.
pub fn merge_duplicate_series(series: &[Series]) -> Vec<Series> {
    let mut merged: Vec<Series> = Vec::with_capacity(series.len());
    for s in series {
        match merged.iter_mut().find(|m| m.id == s.id) {
            Some(existing) => {
                tracing::warn!(
                    "Series '{}' is configured more than once; merging its sources",
                    s.title
                );
                for source in &s.sources {
                    if !existing.sources.contains(source) {
                        existing.sources.push(source.clone());
                    }
                }
            }
            None => merged.push(s.clone()),
        }
    }
    merged
}

/// Scan cycle.
pub struct ScanCycle {
    config: CycleConfig,
    manager: Arc<dyn ManagerGateway>,
    source: Arc<dyn SourceGateway>,
    matcher: EpisodeMatcher,
    orchestrator: DownloadOrchestrator,
}

impl ScanCycle {
    /// Create a cycle with default policies.
    pub fn new(
        manager: Arc<dyn ManagerGateway>,
        source: Arc<dyn SourceGateway>,
        ledger: Arc<DownloadLedger>,
    ) -> Self {
        Self::with_config(
            CycleConfig::default(),
            MatcherConfig::default(),
            OrchestratorConfig::default(),
            manager,
            source,
            ledger,
        )
    }

    /// Create a cycle with custom policies.
    pub fn with_config(
        config: CycleConfig,
        matcher: MatcherConfig,
        orchestrator: OrchestratorConfig,
        manager: Arc<dyn ManagerGateway>,
        source: Arc<dyn SourceGateway>,
        ledger: Arc<DownloadLedger>,
    ) -> Self {
        Self {
            config,
            orchestrator: DownloadOrchestrator::with_config(orchestrator, source.clone(), ledger),
            matcher: EpisodeMatcher::with_config(matcher),
            manager,
            source,
        }
    }

    /// Create a cycle from application configuration.
    pub fn from_config(
        config: &Config,
        manager: Arc<dyn ManagerGateway>,
        source: Arc<dyn SourceGateway>,
        ledger: Arc<DownloadLedger>,
    ) -> Self {
        Self::with_config(
            CycleConfig {
                max_concurrent_series: config.download.max_concurrent_series.max(1),
                rescan_after_download: true,
            },
            MatcherConfig::from(&config.matching),
            OrchestratorConfig::from_config(config),
            manager,
            source,
            ledger,
        )
    }

    pub fn ledger(&self) -> &Arc<DownloadLedger> {
        self.orchestrator.ledger()
    }

    /// Pair configured series with the manager's series by title.
    ///
    /// Configured series the manager does not know, or does not monitor,
    /// are left out with a warning.
    pub async fn resolve_series(&self, config: &Config) -> Result<Vec<Series>> {
        let managed = self.manager.list_series().await?;
        let mut resolved = Vec::new();

        for wanted in &config.series {
            let found = managed
                .iter()
                .find(|m| m.title.trim().eq_ignore_ascii_case(wanted.title.trim()));

            match found {
                None => tracing::warn!("Series '{}' not found in Sonarr", wanted.title),
                Some(m) if !m.monitored => {
                    tracing::warn!("Series '{}' is not monitored in Sonarr", wanted.title)
                }
                Some(m) => {
                    tracing::debug!("Resolved '{}' to Sonarr series {}", wanted.title, m.id);
                    resolved.push(Series::from_managed(
                        m.clone(),
                        wanted.sources(),
                        config.series_options(wanted),
                    ));
                }
            }
        }

        tracing::info!(
            "Resolved {} of {} configured series",
            resolved.len(),
            config.series.len()
        );
        Ok(resolved)
    }

    /// Run one cycle over `series`.
    ///
    /// Manager and source failures skip only the affected series. A ledger
    /// failure cancels the remaining work and is returned once every series
    /// in flight has stopped.
    pub async fn run_once(&self, series: &[Series], cancel: &CancellationToken) -> Result<CycleReport> {
        let started_at = Utc::now();
        let merged = merge_duplicate_series(series);
        let series = merged.as_slice();
        tracing::info!("Scan cycle started for {} series", series.len());

        // Child token: a ledger failure stops this cycle without cancelling the caller.
        let cycle_cancel = cancel.child_token();
        let cycle_cancel = &cycle_cancel;

        let results: Vec<Result<SeriesReport>> = stream::iter(series)
            .map(move |s| async move {
                if cycle_cancel.is_cancelled() {
                    return Ok(None);
                }
                let result = self.run_series(s, cycle_cancel).await;
                if let Err(e) = &result {
                    tracing::error!("Stopping cycle: {}", e);
                    cycle_cancel.cancel();
                }
                result.map(Some)
            })
            .buffer_unordered(self.config.max_concurrent_series.max(1))
            .filter_map(|r| async move { r.transpose() })
            .collect()
            .await;

        let mut reports = Vec::with_capacity(results.len());
        let mut fatal = None;
        for result in results {
            match result {
                Ok(report) => reports.push(report),
                Err(e) if fatal.is_none() => fatal = Some(e),
                Err(e) => tracing::error!("Additional cycle failure: {}", e),
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        reports.sort_by_key(|r| r.series_id);
        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled() || reports.len() < series.len(),
            series: reports,
        };

        tracing::info!(
            "Scan cycle finished: {} downloaded, {} skipped, {} failed",
            report.downloaded(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    /// Process one series. Only ledger failures are returned as errors.
    async fn run_series(&self, series: &Series, cancel: &CancellationToken) -> Result<SeriesReport> {
        let episodes = match self.manager.list_episodes(series.id).await {
            Ok(episodes) => episodes,
            Err(e) => {
                tracing::error!("Failed to list episodes of '{}': {}", series.title, e);
                return Ok(SeriesReport::skipped(series.id, &series.title, e.to_string()));
            }
        };

        let missing = select_missing(series, episodes, Utc::now());
        let mut report = SeriesReport::new(series.id, &series.title);
        report.missing = missing.len();

        if missing.is_empty() {
            tracing::info!("'{}': no missing episodes", series.title);
            return Ok(report);
        }

        // Downloaded earlier but not yet picked up by the manager.
        let snapshot = self.ledger().snapshot(series.id).await;
        let (satisfied, pending): (Vec<Episode>, Vec<Episode>) = missing
            .into_iter()
            .partition(|e| snapshot.episode_satisfied(e.season, e.episode));
        report.outcomes = satisfied
            .iter()
            .map(|e| MatchOutcome {
                season: e.season,
                episode: e.episode,
                video_id: snapshot.video_for(e.season, e.episode).unwrap_or_default().to_string(),
                tier: None,
                outcome: DownloadOutcome::Skipped {
                    reason: SkipReason::AlreadySatisfied,
                },
            })
            .collect();

        if pending.is_empty() {
            tracing::info!(
                "'{}': {} missing episodes already downloaded, waiting for rescan",
                series.title,
                satisfied.len()
            );
            return Ok(report);
        }

        let candidates = match self.list_candidates(series).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!("Failed to list videos for '{}': {}", series.title, e);
                return Ok(SeriesReport::skipped(series.id, &series.title, e.to_string()));
            }
        };
        report.candidates = candidates.len();

        let matches = self
            .matcher
            .match_episodes(series, &pending, &candidates, &snapshot);

        report
            .outcomes
            .extend(self.orchestrator.process(series, &matches, cancel).await?);

        if self.config.rescan_after_download && report.downloaded() > 0 {
            if let Err(e) = self.manager.rescan_series(series.id).await {
                tracing::warn!("Rescan of '{}' failed: {}", series.title, e);
            }
        }

        Ok(report)
    }

    /// Candidates from every source of the series.
    async fn list_candidates(&self, series: &Series) -> Result<Vec<VideoCandidate>> {
        if series.sources.is_empty() {
            return Err(Error::Config(format!("series '{}' has no source URL", series.title)));
        }

        let mut all = Vec::new();
        for source in &series.sources {
            all.extend(self.source.list_candidates(series, source).await?);
        }
        Ok(all)
    }
}
