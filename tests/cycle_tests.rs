//! Integration tests for the scan cycle.
//!
//! Tests cover:
//! - End-to-end download of a structured match
//! - Idempotent reruns
//! - Date tier, retries and permanent failures
//! - Crash recovery for placed but unrecorded files
//! - Per-series failure isolation and cancellation

mod common;

use common::*;
use ytarr::core::matcher::MatchTier;
use ytarr::models::config::Config;
use ytarr::models::ledger::LedgerKey;
use ytarr::models::media::ManagedSeries;
use ytarr::models::report::{DownloadOutcome, FailureReason, SeriesStatus, SkipReason};
use tokio_util::sync::CancellationToken;

const SHOW: &str = "Show Name";

fn expected_path(h: &Harness, season: u32, stem: &str) -> std::path::PathBuf {
    h.library()
        .join(SHOW)
        .join(format!("Season {}", season))
        .join(format!("{}.mkv", stem))
}

// ========== SCENARIOS ==========

#[tokio::test]
async fn test_structured_match_is_downloaded() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-a", "Show Name S01E02 - Title", None)]);

    let cycle = h.cycle();
    let report = cycle.run_once(&[h.series(1, SHOW)], &CancellationToken::new()).await.unwrap();

    let target = expected_path(&h, 1, "Show Name - S01E02 - Title WEBDL");
    assert_eq!(report.downloaded(), 1);
    let outcome = &report.series[0].outcomes[0];
    assert_eq!(outcome.tier, Some(MatchTier::Structured));
    assert_eq!(outcome.outcome, DownloadOutcome::Downloaded { path: target.clone() });
    assert_eq!(std::fs::read(&target).unwrap(), MKV_BYTES);

    let entry = cycle
        .ledger()
        .get(&LedgerKey::new(1, 1, 2, "vid-a"))
        .await
        .unwrap();
    assert_eq!(entry.path, target);
    assert_eq!(*h.manager.rescans.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-a", "Show Name S01E02 - Title", None)]);
    let series = [h.series(1, SHOW)];

    let first = h.cycle().run_once(&series, &CancellationToken::new()).await.unwrap();
    assert_eq!(first.downloaded(), 1);

    // Sonarr has not rescanned yet and still reports the episode missing.
    let cycle = h.cycle();
    let second = cycle.run_once(&series, &CancellationToken::new()).await.unwrap();

    assert_eq!(second.downloaded(), 0);
    let outcomes = &second.series[0].outcomes;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].episode, 2);
    assert_eq!(outcomes[0].video_id, "vid-a");
    assert_eq!(outcomes[0].tier, None);
    assert_eq!(
        outcomes[0].outcome,
        DownloadOutcome::Skipped {
            reason: SkipReason::AlreadySatisfied
        }
    );
    assert_eq!(h.source.total_fetches(), 1);
    assert_eq!(cycle.ledger().len().await, 1);
}

#[tokio::test]
async fn test_air_date_match() {
    let h = Harness::new();
    h.manager
        .set_episodes(1, vec![episode(1, 2, 5, "Something Else Entirely", Some("2024-01-05"))]);
    h.source.set_candidates(
        SOURCE_URL,
        vec![
            video("vid-old", "Weekly vlog", Some("2024-01-04")),
            video("vid-new", "Weekly vlog", Some("2024-01-05")),
        ],
    );

    let report = h
        .cycle()
        .run_once(&[h.series(1, SHOW)], &CancellationToken::new())
        .await
        .unwrap();

    let outcomes = &report.series[0].outcomes;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].video_id, "vid-new");
    assert_eq!(outcomes[0].tier, Some(MatchTier::AirDate));
    assert!(matches!(outcomes[0].outcome, DownloadOutcome::Downloaded { .. }));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-a", "S01E02", None)]);
    h.source
        .script("vid-a", vec![FetchStep::Transient, FetchStep::Transient, FetchStep::Succeed]);

    let report = h
        .cycle()
        .run_once(&[h.series(1, SHOW)], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded(), 1);
    assert_eq!(h.source.fetch_count("vid-a"), 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-a", "S01E02", None)]);
    h.source.script("vid-a", vec![FetchStep::Transient; 5]);

    let cycle = h.cycle();
    let report = cycle.run_once(&[h.series(1, SHOW)], &CancellationToken::new()).await.unwrap();

    match &report.series[0].outcomes[0].outcome {
        DownloadOutcome::Failed {
            reason: FailureReason::RetriesExhausted { attempts, .. },
        } => assert_eq!(*attempts, 3),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(cycle.ledger().is_empty().await);
    assert!(h.manager.rescans.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-a", "S01E02", None)]);
    h.source.script("vid-a", vec![FetchStep::Permanent]);

    let cycle = h.cycle();
    let report = cycle.run_once(&[h.series(1, SHOW)], &CancellationToken::new()).await.unwrap();

    assert!(matches!(
        report.series[0].outcomes[0].outcome,
        DownloadOutcome::Failed {
            reason: FailureReason::Permanent { .. }
        }
    ));
    assert_eq!(h.source.fetch_count("vid-a"), 1);
    assert!(cycle.ledger().is_empty().await);
    assert!(!h.library().join(SHOW).join("Season 1").exists());
}

#[tokio::test]
async fn test_verification_failure_leaves_no_trace() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-a", "S01E02", None)]);
    h.source.script("vid-a", vec![FetchStep::Empty]);

    let cycle = h.cycle();
    let report = cycle.run_once(&[h.series(1, SHOW)], &CancellationToken::new()).await.unwrap();

    assert!(matches!(
        report.series[0].outcomes[0].outcome,
        DownloadOutcome::Failed {
            reason: FailureReason::Verification { .. }
        }
    ));
    assert!(cycle.ledger().is_empty().await);
    assert!(files_in(&h.staging()).is_empty());
}

// ========== RECOVERY ==========

#[tokio::test]
async fn test_placed_but_unrecorded_file_is_recorded() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-a", "S01E02", None)]);

    // Left behind by a crash between placement and the ledger write.
    let placed = expected_path(&h, 1, "Show Name - S01E02 - Title WEBDL");
    std::fs::create_dir_all(placed.parent().unwrap()).unwrap();
    std::fs::write(&placed, MKV_BYTES).unwrap();

    let series = [h.series(1, SHOW)];
    let cycle = h.cycle();
    let report = cycle.run_once(&series, &CancellationToken::new()).await.unwrap();

    assert_eq!(
        report.series[0].outcomes[0].outcome,
        DownloadOutcome::Skipped {
            reason: SkipReason::AlreadyPlaced { path: placed.clone() }
        }
    );
    assert_eq!(h.source.total_fetches(), 0);
    assert!(cycle.ledger().contains(&LedgerKey::new(1, 1, 2, "vid-a")).await);
    drop(cycle);

    // Once Sonarr sees the file the episode is no longer missing.
    h.manager.mark_has_file(1, 1, 2);
    let report = h.cycle().run_once(&series, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.series[0].missing, 0);
    assert_eq!(h.source.total_fetches(), 0);
}

#[tokio::test]
async fn test_placement_failure_records_nothing() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-a", "S01E02", None)]);

    // A regular file where the season folder should be.
    let season_dir = h.library().join(SHOW).join("Season 1");
    std::fs::create_dir_all(season_dir.parent().unwrap()).unwrap();
    std::fs::write(&season_dir, b"not a directory").unwrap();

    let cycle = h.cycle();
    let report = cycle.run_once(&[h.series(1, SHOW)], &CancellationToken::new()).await.unwrap();

    assert!(matches!(
        report.series[0].outcomes[0].outcome,
        DownloadOutcome::Failed {
            reason: FailureReason::Placement { .. }
        }
    ));
    assert!(cycle.ledger().is_empty().await);
    assert!(files_in(&h.staging()).is_empty());
    assert!(h.manager.rescans.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_staging_is_cleaned_up() {
    let h = Harness::new();
    h.manager.set_episodes(
        1,
        vec![episode(1, 1, 1, "One", None), episode(1, 1, 2, "Two", None)],
    );
    h.source.set_candidates(
        SOURCE_URL,
        vec![video("vid-1", "S01E01", None), video("vid-2", "S01E02", None)],
    );
    h.source.script("vid-2", vec![FetchStep::Permanent]);

    let report = h
        .cycle()
        .run_once(&[h.series(1, SHOW)], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded(), 1);
    assert_eq!(report.failed(), 1);
    assert!(files_in(&h.staging()).is_empty());
}

// ========== ISOLATION ==========

#[tokio::test]
async fn test_series_failure_does_not_abort_others() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 1, "One", None)]);
    h.manager.set_episodes(2, vec![episode(2, 1, 1, "Uno", None)]);
    h.manager.failing.lock().unwrap().insert(2);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-1", "S01E01", None)]);

    let report = h
        .cycle()
        .run_once(
            &[h.series(1, SHOW), h.series(2, "Other Show")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.series.len(), 2);
    assert_eq!(report.series[0].status, SeriesStatus::Processed);
    assert_eq!(report.series[0].downloaded(), 1);
    assert!(matches!(report.series[1].status, SeriesStatus::Skipped { .. }));
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_video_used_once_per_series() {
    let h = Harness::new();
    h.manager.set_episodes(
        1,
        vec![
            episode(1, 1, 1, "Same Day A", Some("2024-02-01")),
            episode(1, 1, 2, "Same Day B", Some("2024-02-01")),
        ],
    );
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-only", "Daily upload", Some("2024-02-01"))]);

    let series = [h.series(1, SHOW)];
    let first = h.cycle().run_once(&series, &CancellationToken::new()).await.unwrap();
    assert_eq!(first.downloaded(), 1);
    assert_eq!(first.series[0].outcomes[0].episode, 1);

    let second = h.cycle().run_once(&series, &CancellationToken::new()).await.unwrap();
    let outcomes = &second.series[0].outcomes;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].episode, 1);
    assert_eq!(
        outcomes[0].outcome,
        DownloadOutcome::Skipped {
            reason: SkipReason::AlreadySatisfied
        }
    );
    assert_eq!(h.source.total_fetches(), 1);
}

#[tokio::test]
async fn test_duplicate_series_entries_download_once() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates("https://a", vec![video("vid-a", "Show Name S01E02", None)]);
    h.source
        .set_candidates("https://b", vec![video("vid-b", "Show Name S01E02", None)]);

    let mut first = h.series(1, SHOW);
    first.sources = vec!["https://a".to_string()];
    let mut second = h.series(1, SHOW);
    second.sources = vec!["https://b".to_string()];

    let cycle = h.cycle();
    let report = cycle
        .run_once(&[first, second], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.series.len(), 1);
    assert_eq!(report.series[0].candidates, 2);
    assert_eq!(report.downloaded(), 1);
    assert_eq!(h.source.total_fetches(), 1);

    let entries = cycle.ledger().entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, LedgerKey::new(1, 1, 2, "vid-a"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_ledger_failure_aborts_cycle() {
    use std::os::unix::ffi::OsStrExt;

    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 1, "One", None)]);
    h.manager.set_episodes(
        2,
        vec![episode(2, 1, 1, "Uno", None), episode(2, 1, 2, "Dos", None)],
    );
    h.source.set_candidates(SOURCE_URL, vec![video("vid-1", "S01E01", None)]);
    h.source.set_candidates(
        "https://videos.example/other",
        vec![video("vid-uno", "S01E01", None), video("vid-dos", "S01E02", None)],
    );

    // A path the ledger cannot store: not valid UTF-8.
    let mut broken = h.series(1, SHOW);
    broken.path = h
        .library()
        .join(std::ffi::OsStr::from_bytes(b"Show \xff Name"));
    let mut healthy = h.series(2, "Other Show");
    healthy.sources = vec!["https://videos.example/other".to_string()];

    let cycle = h.sequential_cycle();
    let result = cycle
        .run_once(&[broken, healthy], &CancellationToken::new())
        .await;

    match result {
        Err(e) => assert!(e.is_ledger_failure(), "unexpected error {}", e),
        Ok(report) => panic!("cycle succeeded: {:?}", report),
    }
    assert_eq!(h.source.fetch_count("vid-1"), 1);
    assert_eq!(h.source.fetch_count("vid-uno"), 0);
    assert_eq!(h.source.fetch_count("vid-dos"), 0);
    assert!(cycle.ledger().is_empty().await);
}

#[tokio::test]
async fn test_cancelled_cycle_does_nothing() {
    let h = Harness::new();
    h.manager.set_episodes(1, vec![episode(1, 1, 2, "Title", None)]);
    h.source
        .set_candidates(SOURCE_URL, vec![video("vid-a", "S01E02", None)]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = h.cycle().run_once(&[h.series(1, SHOW)], &cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(report.series.is_empty());
    assert_eq!(h.source.total_fetches(), 0);
}

// ========== SERIES RESOLUTION ==========

#[tokio::test]
async fn test_resolve_series() {
    let h = Harness::new();
    *h.manager.series.lock().unwrap() = vec![
        ManagedSeries {
            id: 1,
            title: "Show Name".to_string(),
            path: "/tv/Show Name".into(),
            monitored: true,
        },
        ManagedSeries {
            id: 2,
            title: "Paused Show".to_string(),
            path: "/tv/Paused Show".into(),
            monitored: false,
        },
    ];

    let toml = r#"
[sonarr]
host = "localhost"
api_key = "abc"

[[series]]
title = "show name"
url = "https://videos.example/channel"
cookies_file = "cookies.txt"
format = "best"

[[series]]
title = "Paused Show"
url = "https://videos.example/paused"

[[series]]
title = "Unknown Show"
url = "https://videos.example/unknown"
"#;
    let config = Config::from_toml(toml, h.temp.path()).unwrap();

    let resolved = h.cycle().resolve_series(&config).await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, 1);
    assert_eq!(resolved[0].sources, vec!["https://videos.example/channel".to_string()]);
    assert_eq!(resolved[0].options.format.as_deref(), Some("best"));
    assert_eq!(
        resolved[0].options.cookies_file,
        Some(h.temp.path().join("cookies.txt"))
    );
}
