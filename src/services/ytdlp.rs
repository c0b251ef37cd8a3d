//! yt-dlp source adapter.
//!
//! Lists channel/playlist entries with `--dump-json` and downloads single
//! videos into a staging directory.

use crate::models::config::YtdlConfig;
use crate::models::media::{parse_publish_date, Artifact, Series, VideoCandidate};
use crate::services::{FetchRequest, SourceGateway};
use crate::utils::fs as fs_utils;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

/// stderr fragments meaning the video will never be downloadable.
const PERMANENT_MARKERS: &[&str] = &[
    "video unavailable",
    "this video is unavailable",
    "private video",
    "has been removed",
    "http error 404",
    "http error 403",
    "requested format is not available",
    "sign in to confirm your age",
    "members-only",
    "unsupported url",
];

/// stderr fragments meaning a later attempt may succeed.
const TRANSIENT_MARKERS: &[&str] = &[
    "http error 429",
    "too many requests",
    "timed out",
    "connection reset",
    "temporary failure in name resolution",
    "name or service not known",
    "http error 500",
    "http error 502",
    "http error 503",
    "http error 504",
    "incomplete read",
];

/// One line of `--dump-json` output.
#[derive(Debug, Deserialize)]
struct DumpEntry {
    id: Option<String>,
    title: Option<String>,
    upload_date: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
}

/// Classify a failed yt-dlp run by its stderr.
///
/// Unknown failures are treated as transient so the retry budget decides.
pub fn classify_failure(stderr: &str) -> Error {
    let lower = stderr.to_lowercase();
    let summary = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("yt-dlp failed")
        .trim()
        .to_string();

    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return Error::PermanentRemote(summary);
    }
    if !TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        tracing::debug!("Unrecognised yt-dlp failure, treating as transient: {}", summary);
    }
    Error::TransientRemote(summary)
}

/// Parse `--dump-json` output into candidates.
///
/// Lines that are not JSON, lack an id, or carry an unparseable upload date
/// are skipped with a warning.
pub fn parse_candidates(stdout: &str) -> Vec<VideoCandidate> {
    let mut candidates = Vec::new();

    for (idx, line) in stdout.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let entry: DumpEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unparseable yt-dlp line {}: {}", idx + 1, e);
                continue;
            }
        };

        let Some(video_id) = entry.id.filter(|id| !id.trim().is_empty()) else {
            tracing::warn!("Skipping yt-dlp entry without id on line {}", idx + 1);
            continue;
        };

        let published = match entry.upload_date.as_deref() {
            Some(raw) => match parse_publish_date(raw) {
                Ok(date) => Some(date),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", video_id, e);
                    continue;
                }
            },
            None => None,
        };

        candidates.push(VideoCandidate {
            video_id,
            title: entry.title.unwrap_or_default(),
            published,
            duration_secs: entry.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64),
            url: entry.webpage_url,
        });
    }

    candidates
}

/// yt-dlp client.
pub struct YtDlpClient {
    binary: String,
}

impl YtDlpClient {
    pub fn new(config: &YtdlConfig) -> Self {
        Self {
            binary: config.binary.clone(),
        }
    }

    /// `yt-dlp --version`.
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.binary).arg("--version").output().await?;
        if !output.status.success() {
            return Err(Error::other(format!("{} --version failed", self.binary)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(&self, args: Vec<OsString>) -> Result<Output> {
        tracing::debug!("Running {} {:?}", self.binary, args);
        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Arguments for listing a source.
    pub fn list_args(series: &Series, source: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["--dump-json", "--skip-download", "--ignore-errors", "--no-warnings"]
            .iter()
            .map(OsString::from)
            .collect();

        if series.options.playlist_reverse {
            args.push("--playlist-reverse".into());
        }
        push_cookies(&mut args, series.options.cookies_file.as_deref());
        // Ids may start with '-'.
        args.push("--".into());
        args.push(source.into());
        args
    }

    /// Arguments for downloading one video.
    pub fn fetch_args(request: &FetchRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            request.format.clone().into(),
            "--merge-output-format".into(),
            "mkv".into(),
            "--no-playlist".into(),
            "--no-progress".into(),
            "-o".into(),
            request.staging_dir.join("%(id)s.%(ext)s").into_os_string(),
        ];

        push_cookies(&mut args, request.cookies_file.as_deref());

        if let Some(subs) = &request.subtitles {
            args.push("--write-subs".into());
            if subs.autogenerated {
                args.push("--write-auto-subs".into());
            }
            args.push("--sub-langs".into());
            args.push(subs.languages.join(",").into());
            args.push("--convert-subs".into());
            args.push("srt".into());
            args.push("--embed-subs".into());
        }

        args.push("--".into());
        args.push(request.url.clone().into());
        args
    }
}

fn push_cookies(args: &mut Vec<OsString>, cookies: Option<&Path>) {
    if let Some(path) = cookies {
        if path.is_file() {
            args.push("--cookies".into());
            args.push(path.as_os_str().to_owned());
        } else {
            tracing::warn!("Cookies file not found: {:?}", path);
        }
    }
}

/// The largest video file in `dir`.
fn find_artifact(dir: &Path) -> Result<Option<Artifact>> {
    let mut best: Option<Artifact> = None;
    for entry in std::fs::read_dir(dir)? {
        let path: PathBuf = entry?.path();
        if !path.is_file() || !fs_utils::is_video_file(&path) {
            continue;
        }
        let size = std::fs::metadata(&path)?.len();
        if best.as_ref().map_or(true, |b| size > b.size) {
            best = Some(Artifact { path, size });
        }
    }
    Ok(best)
}

#[async_trait]
impl SourceGateway for YtDlpClient {
    async fn list_candidates(&self, series: &Series, source: &str) -> Result<Vec<VideoCandidate>> {
        let output = self.run(Self::list_args(series, source)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        // --ignore-errors exits non-zero when single entries fail; keep what was listed.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.trim().is_empty() {
                return Err(classify_failure(&stderr));
            }
            tracing::warn!("yt-dlp reported errors while listing {}: {}", source, stderr.trim());
        }

        let candidates = parse_candidates(&stdout);
        tracing::info!("Listed {} videos from {}", candidates.len(), source);
        Ok(candidates)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Artifact> {
        fs_utils::create_dir_all(&request.staging_dir)?;

        let output = self.run(Self::fetch_args(request)).await?;
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        find_artifact(&request.staging_dir)?.ok_or_else(|| {
            Error::PermanentRemote(format!("yt-dlp produced no video file for {}", request.video_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::SubtitleOptions;
    use crate::models::media::SeriesOptions;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn series() -> Series {
        Series {
            id: 1,
            title: "Show".to_string(),
            path: PathBuf::from("/tv/Show"),
            monitored: true,
            sources: vec!["https://example.com/c".to_string()],
            options: SeriesOptions {
                playlist_reverse: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_parse_candidates() {
        let stdout = concat!(
            r#"{"id": "abc", "title": "S01E01", "upload_date": "20240105", "duration": 612.4, "webpage_url": "https://example.com/abc"}"#,
            "\n",
            "not json\n",
            r#"{"title": "no id"}"#,
            "\n",
            r#"{"id": "bad", "title": "x", "upload_date": "2024"}"#,
            "\n",
            r#"{"id": "nodate", "title": "Undated"}"#,
            "\n"
        );

        let candidates = parse_candidates(stdout);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].video_id, "abc");
        assert_eq!(candidates[0].published, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(candidates[0].duration_secs, Some(612));
        assert_eq!(candidates[1].video_id, "nodate");
        assert!(candidates[1].published.is_none());
    }

    #[test]
    fn test_classify_failure() {
        assert!(!classify_failure("ERROR: [youtube] abc: Video unavailable").is_transient());
        assert!(!classify_failure("ERROR: Private video. Sign in if you've been granted access").is_transient());
        assert!(classify_failure("ERROR: HTTP Error 429: Too Many Requests").is_transient());
        assert!(classify_failure("ERROR: Read timed out.").is_transient());
        assert!(classify_failure("something odd").is_transient());

        match classify_failure("WARNING: x\nERROR: HTTP Error 404: Not Found\n") {
            Error::PermanentRemote(msg) => assert_eq!(msg, "ERROR: HTTP Error 404: Not Found"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_list_args() {
        let args = YtDlpClient::list_args(&series(), "https://example.com/c");
        assert!(args.contains(&OsString::from("--dump-json")));
        assert!(args.contains(&OsString::from("--playlist-reverse")));
        assert_eq!(&args[args.len() - 2..], ["--", "https://example.com/c"]);
    }

    #[test]
    fn test_fetch_args_with_subtitles() {
        let request = FetchRequest {
            video_id: "abc".to_string(),
            url: "https://example.com/abc".to_string(),
            format: "best".to_string(),
            staging_dir: PathBuf::from("/tmp/stage"),
            cookies_file: None,
            subtitles: Some(SubtitleOptions {
                languages: vec!["en".to_string(), "de".to_string()],
                autogenerated: true,
            }),
        };

        let args = YtDlpClient::fetch_args(&request);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(&args[..2], ["-f", "best"]);
        assert!(args.contains(&"/tmp/stage/%(id)s.%(ext)s".to_string()));
        assert!(args.contains(&"--write-auto-subs".to_string()));
        assert!(args.contains(&"en,de".to_string()));
        assert_eq!(&args[args.len() - 2..], ["--", "https://example.com/abc"]);
    }

    #[test]
    fn test_dash_prefixed_id_is_not_an_option() {
        let request = FetchRequest {
            video_id: "-x3AbC_d9".to_string(),
            url: "-x3AbC_d9".to_string(),
            format: "best".to_string(),
            staging_dir: PathBuf::from("/tmp/stage"),
            cookies_file: None,
            subtitles: None,
        };

        let args = YtDlpClient::fetch_args(&request);
        let separator = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(separator, args.len() - 2);
        assert_eq!(args[separator + 1], "-x3AbC_d9");
    }

    #[test]
    fn test_find_artifact_picks_largest_video() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("abc.f137.mp4"), vec![0u8; 10]).unwrap();
        std::fs::write(temp.path().join("abc.mkv"), vec![0u8; 100]).unwrap();
        std::fs::write(temp.path().join("abc.en.srt"), vec![0u8; 1000]).unwrap();

        let artifact = find_artifact(temp.path()).unwrap().unwrap();
        assert_eq!(artifact.path, temp.path().join("abc.mkv"));
        assert_eq!(artifact.size, 100);
    }
}
