//! yt-dlp preflight check.

use super::CheckResult;
use crate::models::config::YtdlConfig;
use crate::services::ytdlp::YtDlpClient;

/// Check that yt-dlp runs.
pub async fn check(config: &YtdlConfig) -> CheckResult {
    match YtDlpClient::new(config).version().await {
        Ok(version) => CheckResult::ok("yt-dlp", &format!("installed ({})", version)),
        Err(_) => CheckResult::fail(
            "yt-dlp",
            &format!("'{}' not found or not runnable", config.binary),
            "Install yt-dlp (pip install yt-dlp) or set ytdl.binary",
        ),
    }
}
