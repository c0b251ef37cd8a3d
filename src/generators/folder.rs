//! Library folder layout.

use std::path::{Component, Path, PathBuf};

/// Season folder name.
///
/// Format: `Season ${seasonNr}`
pub fn generate_season_folder(season: u32) -> String {
    format!("Season {}", season)
}

/// Local directory of a series.
///
/// The manager reports paths as it sees them; when it runs in another
/// container the library is mounted elsewhere, so `prefix` is prepended.
pub fn series_dir(prefix: Option<&Path>, manager_path: &Path) -> PathBuf {
    match prefix {
        Some(prefix) => {
            let relative: PathBuf = manager_path
                .components()
                .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                .collect();
            prefix.join(relative)
        }
        None => manager_path.to_path_buf(),
    }
}

/// Directory an episode of the given season is placed in.
pub fn season_dir(prefix: Option<&Path>, manager_path: &Path, season: u32) -> PathBuf {
    series_dir(prefix, manager_path).join(generate_season_folder(season))
}
