//! Episode filename generator.

use crate::models::media::Episode;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Naming pattern used when a series does not configure one.
///
/// Format: `${series} - S${season2}E${episode2} - ${title} WEBDL`
pub const DEFAULT_NAMING_PATTERN: &str = "{series} - S{season:02}E{episode:02} - {title} WEBDL";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)(?::0?(\d))?\}").expect("valid placeholder pattern"))
}

/// Render the file stem for an episode (no extension).
///
/// Placeholders: `{series}`, `{season}`, `{episode}`, `{title}`, `{air_date}`.
/// Numbers accept a zero-pad width, e.g. `{season:02}`. Unknown placeholders
/// are kept literally.
pub fn render_episode_stem(pattern: &str, series_title: &str, episode: &Episode) -> String {
    let title = episode
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| format!("Episode {}", episode.episode));

    let rendered = placeholder_re().replace_all(pattern, |caps: &Captures| {
        let width: usize = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        match &caps[1] {
            "series" => series_title.to_string(),
            "season" => format!("{:0width$}", episode.season, width = width),
            "episode" => format!("{:0width$}", episode.episode, width = width),
            "title" => title.clone(),
            "air_date" => episode
                .air_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            _ => caps[0].to_string(),
        }
    });

    sanitize_filename(&rendered)
}

/// Sanitize a string for use in filenames.
///
/// Path separators and reserved characters become `_`, whitespace is
/// collapsed, and leading/trailing dots and spaces are removed.
pub fn sanitize_filename(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            _ => c,
        })
        .collect();

    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c| c == '.' || c == ' ')
        .to_string()
}
