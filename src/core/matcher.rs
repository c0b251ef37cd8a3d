//! Episode matcher.
//!
//! Correlates the manager's missing episodes with the videos a source offers.
//! Every (video, episode) pair is decided by the first tier that applies:
//!
//! 1. Structured: the video title carries a season/episode marker that pins
//!    exactly one missing episode.
//! 2. AirDate: publish date and air date are within the tolerance window.
//! 3. Fuzzy: normalized titles are similar enough.
//!
//! A marker is a hard constraint: a video marked `S01E05` is never matched to
//! another episode by date or title.
//!
//! Pairs are then assigned one-to-one, best first.

use crate::core::ledger::LedgerSnapshot;
use crate::core::parser::{self, EpisodeMarker};
use crate::models::config::MatchingConfig;
use crate::models::media::{Episode, Series, VideoCandidate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Default air/publish date tolerance: same calendar day.
pub const DEFAULT_DATE_TOLERANCE_DAYS: i64 = 0;

/// Default minimum title similarity for the fuzzy tier.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Confidence tier, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Fuzzy,
    AirDate,
    Structured,
}

impl std::fmt::Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchTier::Fuzzy => write!(f, "fuzzy"),
            MatchTier::AirDate => write!(f, "air-date"),
            MatchTier::Structured => write!(f, "structured"),
        }
    }
}

/// The rule that produced a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MatchRule {
    EpisodeMarker { season: Option<u32>, episode: u32 },
    AirDate { days_apart: i64 },
    TitleSimilarity { score: f64 },
}

/// An episode paired with the video that should fill it.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub episode: Episode,
    pub candidate: VideoCandidate,
    pub tier: MatchTier,
    /// Strength within the tier, 0.0 to 1.0.
    pub confidence: f64,
    pub rule: MatchRule,
}

/// Matcher configuration.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Maximum days between air date and publish date.
    pub date_tolerance_days: i64,
    /// Minimum similarity for the fuzzy tier.
    pub similarity_threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            date_tolerance_days: DEFAULT_DATE_TOLERANCE_DAYS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl From<&MatchingConfig> for MatcherConfig {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            date_tolerance_days: config.date_tolerance_days,
            similarity_threshold: config.similarity_threshold,
        }
    }
}

/// Include/exclude regexes from the series options.
struct TitleFilters {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl TitleFilters {
    fn compile(series: &Series) -> Self {
        let compile = |pattern: &Option<String>, which: &str| {
            pattern.as_deref().and_then(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("Ignoring invalid {} filter for '{}': {}", which, series.title, e);
                    None
                }
            })
        };
        Self {
            include: compile(&series.options.include, "include"),
            exclude: compile(&series.options.exclude, "exclude"),
        }
    }

    fn allows(&self, title: &str) -> bool {
        self.include.as_ref().map_or(true, |re| re.is_match(title))
            && !self.exclude.as_ref().map_or(false, |re| re.is_match(title))
    }
}

struct PreparedCandidate<'a> {
    candidate: &'a VideoCandidate,
    normalized: String,
    without_series: String,
    marker: Option<EpisodeMarker>,
}

struct PreparedEpisode<'a> {
    episode: &'a Episode,
    /// `None` for placeholder titles.
    normalized_title: Option<String>,
}

struct Proposal {
    candidate: usize,
    episode: usize,
    tier: MatchTier,
    confidence: f64,
    rule: MatchRule,
}

/// Earlier dates first, missing dates last.
fn cmp_published(a: &VideoCandidate, b: &VideoCandidate) -> Ordering {
    match (a.published, b.published) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Episode matcher.
pub struct EpisodeMatcher {
    config: MatcherConfig,
}

impl EpisodeMatcher {
    /// Create a matcher with default policy.
    pub fn new() -> Self {
        Self {
            config: MatcherConfig::default(),
        }
    }

    /// Create a matcher with custom policy.
    pub fn with_config(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Match missing episodes to candidate videos.
    ///
    /// Episodes already satisfied in `ledger` and videos already used for the
    /// series are excluded first. The result is ordered most confident first
    /// and is identical for identical inputs.
    pub fn match_episodes(
        &self,
        series: &Series,
        missing: &[Episode],
        candidates: &[VideoCandidate],
        ledger: &LedgerSnapshot,
    ) -> Vec<MatchResult> {
        let episodes = self.prepare_episodes(missing, ledger);
        let prepared = self.prepare_candidates(series, candidates, ledger);

        if episodes.is_empty() || prepared.is_empty() {
            tracing::debug!(
                "Nothing to match for '{}' ({} episodes, {} candidates)",
                series.title,
                episodes.len(),
                prepared.len()
            );
            return Vec::new();
        }

        let mut proposals = Vec::new();
        for (ci, candidate) in prepared.iter().enumerate() {
            match candidate.marker {
                Some(marker) => {
                    let fitting: Vec<usize> = episodes
                        .iter()
                        .enumerate()
                        .filter(|(_, e)| marker.fits(e.episode.season, e.episode.episode))
                        .map(|(i, _)| i)
                        .collect();

                    if let [only] = fitting[..] {
                        proposals.push(Proposal {
                            candidate: ci,
                            episode: only,
                            tier: MatchTier::Structured,
                            confidence: 1.0,
                            rule: MatchRule::EpisodeMarker {
                                season: marker.season,
                                episode: marker.episode,
                            },
                        });
                        continue;
                    }

                    for ei in fitting {
                        if let Some(p) = self.score_unstructured(candidate, ci, &episodes[ei], ei) {
                            proposals.push(p);
                        }
                    }
                }
                None => {
                    for (ei, episode) in episodes.iter().enumerate() {
                        if let Some(p) = self.score_unstructured(candidate, ci, episode, ei) {
                            proposals.push(p);
                        }
                    }
                }
            }
        }

        proposals.sort_by(|a, b| {
            let (ca, cb) = (prepared[a.candidate].candidate, prepared[b.candidate].candidate);
            b.tier
                .cmp(&a.tier)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| cmp_published(ca, cb))
                .then_with(|| ca.video_id.cmp(&cb.video_id))
                .then_with(|| {
                    episodes[a.episode]
                        .episode
                        .number()
                        .cmp(&episodes[b.episode].episode.number())
                })
        });

        let mut used_candidates = HashSet::new();
        let mut used_episodes = HashSet::new();
        let mut results = Vec::new();

        for proposal in proposals {
            if used_candidates.contains(&proposal.candidate) || used_episodes.contains(&proposal.episode) {
                continue;
            }
            used_candidates.insert(proposal.candidate);
            used_episodes.insert(proposal.episode);

            let episode = episodes[proposal.episode].episode;
            let candidate = prepared[proposal.candidate].candidate;
            tracing::debug!(
                "Matched {} {} <- {} '{}' ({}, {:.2})",
                series.title,
                episode.label(),
                candidate.video_id,
                candidate.title,
                proposal.tier,
                proposal.confidence
            );

            results.push(MatchResult {
                episode: episode.clone(),
                candidate: candidate.clone(),
                tier: proposal.tier,
                confidence: proposal.confidence,
                rule: proposal.rule,
            });
        }

        tracing::info!(
            "Series '{}': {} matches for {} missing episodes from {} candidates",
            series.title,
            results.len(),
            episodes.len(),
            prepared.len()
        );
        results
    }

    fn prepare_episodes<'a>(
        &self,
        missing: &'a [Episode],
        ledger: &LedgerSnapshot,
    ) -> Vec<PreparedEpisode<'a>> {
        let mut seen = HashSet::new();
        missing
            .iter()
            .filter(|e| !e.has_file)
            .filter(|e| !ledger.episode_satisfied(e.season, e.episode))
            .filter(|e| seen.insert(e.number()))
            .map(|episode| {
                let normalized_title = episode
                    .title
                    .as_deref()
                    .map(parser::normalize_title)
                    .filter(|t| !parser::is_placeholder_title(t));
                PreparedEpisode {
                    episode,
                    normalized_title,
                }
            })
            .collect()
    }

    fn prepare_candidates<'a>(
        &self,
        series: &Series,
        candidates: &'a [VideoCandidate],
        ledger: &LedgerSnapshot,
    ) -> Vec<PreparedCandidate<'a>> {
        let filters = TitleFilters::compile(series);
        let series_title = parser::normalize_title(&series.title);
        let mut seen = HashSet::new();
        let mut prepared = Vec::new();

        for candidate in candidates {
            if candidate.video_id.trim().is_empty() {
                tracing::warn!("Skipping candidate without id: '{}'", candidate.title);
                continue;
            }
            if !seen.insert(candidate.video_id.as_str()) {
                continue;
            }
            if ledger.video_used(&candidate.video_id) {
                tracing::debug!("Skipping {}: already in ledger", candidate.video_id);
                continue;
            }

            let normalized = parser::normalize_title(&candidate.title);
            if normalized.is_empty() {
                tracing::warn!("Skipping candidate {}: empty title", candidate.video_id);
                continue;
            }
            if !filters.allows(&candidate.title) {
                tracing::debug!("Skipping {}: filtered out", candidate.video_id);
                continue;
            }

            let without_series = parser::strip_series_prefix(&normalized, &series_title).to_string();
            prepared.push(PreparedCandidate {
                candidate,
                marker: parser::extract_episode_marker(&candidate.title),
                normalized,
                without_series,
            });
        }

        prepared
    }

    /// Date tier, then fuzzy tier, for one pair.
    fn score_unstructured(
        &self,
        candidate: &PreparedCandidate<'_>,
        ci: usize,
        episode: &PreparedEpisode<'_>,
        ei: usize,
    ) -> Option<Proposal> {
        if let (Some(aired), Some(published)) = (episode.episode.air_date, candidate.candidate.published) {
            let days_apart = (published - aired).num_days().abs();
            if days_apart <= self.config.date_tolerance_days {
                let confidence = 1.0 - days_apart as f64 / (self.config.date_tolerance_days + 1) as f64;
                return Some(Proposal {
                    candidate: ci,
                    episode: ei,
                    tier: MatchTier::AirDate,
                    confidence,
                    rule: MatchRule::AirDate { days_apart },
                });
            }
        }

        let title = episode.normalized_title.as_deref()?;
        let score = parser::title_similarity(title, &candidate.normalized)
            .max(parser::title_similarity(title, &candidate.without_series));

        (score >= self.config.similarity_threshold).then(|| Proposal {
            candidate: ci,
            episode: ei,
            tier: MatchTier::Fuzzy,
            confidence: score,
            rule: MatchRule::TitleSimilarity { score },
        })
    }
}

impl Default for EpisodeMatcher {
    fn default() -> Self {
        Self::new()
    }
}
