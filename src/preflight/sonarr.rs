//! Sonarr preflight check.

use super::CheckResult;
use crate::models::config::SonarrConfig;
use crate::services::sonarr::SonarrClient;
use crate::Error;

/// Check that Sonarr answers with the configured API key.
pub async fn check(config: &SonarrConfig) -> CheckResult {
    let client = match SonarrClient::new(config) {
        Ok(client) => client,
        Err(e) => return CheckResult::fail("Sonarr", &e.to_string(), "Check the [sonarr] section"),
    };

    match client.system_status().await {
        Ok(status) => CheckResult::ok("Sonarr", &format!("connected (v{})", status.version)),
        Err(Error::PermanentRemote(msg)) => CheckResult::fail(
            "Sonarr",
            &msg,
            "Check sonarr.api_key or the SONARR_API_KEY environment variable",
        ),
        Err(e) => CheckResult::fail(
            "Sonarr",
            &format!("connection failed: {}", e),
            &format!("Check that Sonarr is reachable at {}", SonarrClient::base_url(config)),
        ),
    }
}
