//! Title parsing.
//!
//! Helpers the matcher uses to compare free-text video titles with the
//! manager's structured episode data:
//! - title normalization
//! - season/episode marker extraction
//! - title similarity

use regex::Regex;
use std::sync::OnceLock;

/// Score given when the episode title appears verbatim inside the video title.
pub const CONTAINMENT_SCORE: f64 = 0.95;

/// Shortest normalized episode title that may match by containment.
const MIN_CONTAINED_LEN: usize = 4;

/// Season/episode numbers found in a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeMarker {
    /// Season, when the title states one.
    pub season: Option<u32>,
    /// Episode number.
    pub episode: u32,
}

impl EpisodeMarker {
    /// Whether this marker is consistent with an episode number pair.
    pub fn fits(&self, season: u32, episode: u32) -> bool {
        self.episode == episode && self.season.map_or(true, |s| s == season)
    }
}

const ORDINALS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
    "eleventh", "twelfth", "thirteenth", "fourteenth", "fifteenth", "sixteenth", "seventeenth",
    "eighteenth", "nineteenth", "twentieth",
];

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[[^\]]*\]|\([^)]*\)|\{[^}]*\}|【[^】]*】").expect("valid bracket pattern")
    })
}

/// Patterns carrying both season and episode, most specific first.
fn season_episode_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"\bs(\d{1,2}) ?e(\d{1,3})\b",
            r"\b(\d{1,2})x(\d{1,3})\b",
            r"\b(?:season|series) (\d{1,2}) (?:episode|ep) ?(\d{1,3})\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid marker pattern"))
        .collect()
    })
}

/// Patterns carrying only an episode number.
fn episode_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"\b(?:episode|ep) ?(\d{1,3})\b",
            r"\b(\d{1,3})(?:st|nd|rd|th) episode\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid marker pattern"))
        .collect()
    })
}

fn ordinal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let words = ORDINALS.join("|");
        Regex::new(&format!(r"\b({}) episode\b", words)).expect("valid ordinal pattern")
    })
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:tba|tbd|episode \d+)$").expect("valid placeholder pattern"))
}

/// Lowercase, turn punctuation into spaces and collapse whitespace.
///
/// Apostrophes are dropped so that "don't" and "dont" compare equal, and `&`
/// becomes "and".
fn flatten(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        match c {
            '&' => out.push_str(" and "),
            '\'' | '\u{2018}' | '\u{2019}' => {}
            c if c.is_alphanumeric() => out.push(c),
            _ => out.push(' '),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a title for comparison.
///
/// Lowercases, removes bracketed tags such as `[4K]` or `(Official Video)`,
/// strips punctuation and collapses whitespace.
pub fn normalize_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let untagged = bracket_re().replace_all(&lower, " ");
    flatten(&untagged)
}

/// Find a season/episode marker in a title.
///
/// Bracketed tags are searched too, so `Show [S01E02]` is recognised.
pub fn extract_episode_marker(title: &str) -> Option<EpisodeMarker> {
    let text = flatten(title);

    for re in season_episode_res() {
        if let Some(caps) = re.captures(&text) {
            let season = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
            if let (Some(season), Some(episode)) = (season, episode) {
                return Some(EpisodeMarker {
                    season: Some(season),
                    episode,
                });
            }
        }
    }

    for re in episode_res() {
        if let Some(episode) = re
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            return Some(EpisodeMarker {
                season: None,
                episode,
            });
        }
    }

    ordinal_re()
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| ORDINALS.iter().position(|w| *w == m.as_str()))
        .map(|idx| EpisodeMarker {
            season: None,
            episode: idx as u32 + 1,
        })
}

/// Whether a normalized manager title is a placeholder like "TBA".
pub fn is_placeholder_title(normalized: &str) -> bool {
    normalized.is_empty() || placeholder_re().is_match(normalized)
}

/// Remove a leading series name from a normalized video title.
pub fn strip_series_prefix<'a>(normalized: &'a str, normalized_series: &str) -> &'a str {
    if normalized_series.is_empty() {
        return normalized;
    }
    match normalized.strip_prefix(normalized_series) {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim_start(),
        _ => normalized,
    }
}

/// Similarity between two normalized titles, from 0.0 to 1.0.
///
/// Equal titles score 1.0; an episode title found as a whole phrase inside the
/// video title scores `CONTAINMENT_SCORE`; otherwise the normalized
/// Levenshtein ratio is used.
pub fn title_similarity(episode_title: &str, video_title: &str) -> f64 {
    if episode_title.is_empty() || video_title.is_empty() {
        return 0.0;
    }
    if episode_title == video_title {
        return 1.0;
    }

    if episode_title.chars().count() >= MIN_CONTAINED_LEN {
        let haystack = format!(" {} ", video_title);
        let needle = format!(" {} ", episode_title);
        if haystack.contains(&needle) {
            return CONTAINMENT_SCORE;
        }
    }

    let distance = levenshtein_distance(episode_title, video_title);
    let max_len = episode_title.chars().count().max(video_title.chars().count());

    1.0 - (distance as f64 / max_len as f64)
}

/// Calculate Levenshtein distance between two strings.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];

    for (i, ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}
