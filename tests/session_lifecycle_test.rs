//! Session registry lifecycle tests.
//!
//! Drives [`SessionRegistry`] directly with scripted shell transcoders:
//! readiness outcomes, failure cleanup, capacity, expiry, shutdown and
//! cancellation while a session is still starting.

#![cfg(unix)]

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{local_source, Script, TestHarness, REMOTE_SOURCE};
use previewly::session::SessionPhase;
use previewly_common::Error;
use previewly_stream::NetworkMetrics;

#[tokio::test]
async fn ready_session_is_servable() {
    let harness = TestHarness::with_script(Script::Steady { segments: 3 });

    let started = harness.registry.start_session(REMOTE_SOURCE).await.unwrap();
    assert_eq!(started.status, SessionPhase::Ready);
    assert!(started.segment_count >= 1);
    assert_eq!(harness.preview_dirs(), vec![started.preview_id.to_string()]);

    let snapshot = harness.registry.get_session(started.preview_id).await.unwrap();
    assert_eq!(snapshot.state, SessionPhase::Ready);
    assert_eq!(snapshot.video_url, REMOTE_SOURCE);

    let window = harness.registry.active_window(started.preview_id).await.unwrap();
    assert_eq!(window.current, 1);
    assert_eq!(window.chunks.first(), Some(&1));

    harness.registry.end_session(started.preview_id).await.unwrap();
    assert!(harness.preview_dirs().is_empty());
}

#[tokio::test]
async fn early_exit_with_few_segments_is_degraded() {
    let harness = TestHarness::build(Script::ExitAfter { segments: 1 }, |settings| {
        settings.readiness = common::fast_readiness(3);
    });

    let started = harness.registry.start_session(REMOTE_SOURCE).await.unwrap();
    assert_eq!(started.status, SessionPhase::Degraded);
    assert_eq!(started.segment_count, 1);

    // A degraded session still serves its window.
    let window = harness
        .registry
        .advance(started.preview_id, &NetworkMetrics::default())
        .await
        .unwrap();
    assert_eq!(window.current, 2);

    harness.registry.end_session(started.preview_id).await.unwrap();
    assert!(harness.preview_dirs().is_empty());
}

#[tokio::test]
async fn failed_start_leaves_nothing_behind() {
    let harness = TestHarness::with_script(Script::Fail);

    let err = harness.registry.start_session(REMOTE_SOURCE).await.unwrap_err();
    assert_matches!(
        err,
        Error::ReadinessTimeout { diagnostics: Some(ref d), .. } if d.contains("cannot open input")
    );
    assert_eq!(harness.registry.active_count(), 0);
    assert!(harness.preview_dirs().is_empty());
}

#[tokio::test]
async fn readiness_timeout_without_output() {
    let harness = TestHarness::build(Script::Hang, |settings| {
        settings.readiness.max_wait = Duration::from_millis(200);
    });

    let err = harness.registry.start_session(REMOTE_SOURCE).await.unwrap_err();
    assert_matches!(err, Error::ReadinessTimeout { .. });
    assert_eq!(harness.registry.active_count(), 0);
    assert!(harness.preview_dirs().is_empty());
}

#[tokio::test]
async fn invalid_locator_creates_no_session() {
    let harness = TestHarness::new();

    assert_matches!(
        harness.registry.start_session("").await,
        Err(Error::InvalidInput(_))
    );
    assert_matches!(
        harness.registry.start_session("mailto:someone@example.com").await,
        Err(Error::InvalidInput(_))
    );
    assert_eq!(harness.registry.active_count(), 0);
    assert!(harness.preview_dirs().is_empty());
}

#[tokio::test]
async fn capacity_is_enforced() {
    let harness = TestHarness::build(Script::Steady { segments: 1 }, |settings| {
        settings.max_concurrent = 1;
    });

    let first = harness.registry.start_session(REMOTE_SOURCE).await.unwrap();
    let err = harness.registry.start_session(REMOTE_SOURCE).await.unwrap_err();
    assert_matches!(err, Error::CapacityExceeded { active: 1, limit: 1 });
    assert_eq!(harness.preview_dirs().len(), 1);

    harness.registry.end_session(first.preview_id).await.unwrap();
    let second = harness.registry.start_session(REMOTE_SOURCE).await.unwrap();
    assert_ne!(first.preview_id, second.preview_id);

    harness.registry.shutdown_all().await;
}

#[tokio::test]
async fn ending_twice_is_not_found() {
    let harness = TestHarness::new();
    let started = harness.registry.start_session(REMOTE_SOURCE).await.unwrap();

    harness.registry.end_session(started.preview_id).await.unwrap();
    assert_matches!(
        harness.registry.end_session(started.preview_id).await,
        Err(Error::NotFound { .. })
    );
    assert_matches!(
        harness.registry.active_window(started.preview_id).await,
        Err(Error::NotFound { .. })
    );
}

#[tokio::test]
async fn concurrent_ends_tear_down_once() {
    let harness = TestHarness::new();
    let started = harness.registry.start_session(REMOTE_SOURCE).await.unwrap();
    let id = started.preview_id;

    let (a, b) = tokio::join!(
        harness.registry.end_session(id),
        harness.registry.end_session(id)
    );
    assert!(a.is_ok() ^ b.is_ok());
    assert!(harness.preview_dirs().is_empty());
}

#[tokio::test]
async fn sweep_removes_only_expired_sessions() {
    let harness = TestHarness::build(Script::Steady { segments: 1 }, |settings| {
        settings.session_timeout = Duration::from_millis(300);
    });

    let old = harness.registry.start_session(REMOTE_SOURCE).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    let fresh = harness.registry.start_session(REMOTE_SOURCE).await.unwrap();

    assert_eq!(harness.registry.sweep_expired().await, 1);
    assert_matches!(
        harness.registry.get_session(old.preview_id).await,
        Err(Error::NotFound { .. })
    );
    assert!(harness.registry.get_session(fresh.preview_id).await.is_ok());
    assert_eq!(harness.preview_dirs(), vec![fresh.preview_id.to_string()]);

    harness.registry.shutdown_all().await;
}

#[tokio::test]
async fn shutdown_terminates_everything() {
    let harness = TestHarness::new();
    for _ in 0..3 {
        harness.registry.start_session(REMOTE_SOURCE).await.unwrap();
    }
    assert_eq!(harness.preview_dirs().len(), 3);

    assert_eq!(harness.registry.shutdown_all().await, 3);
    assert_eq!(harness.registry.active_count(), 0);
    assert!(harness.preview_dirs().is_empty());
    assert!(harness.registry.list_sessions().await.is_empty());
}

#[tokio::test]
async fn ending_during_launch_cancels_start() {
    let harness = TestHarness::build(Script::Hang, |settings| {
        settings.readiness.max_wait = Duration::from_secs(10);
    });

    let registry = harness.registry.clone();
    let start = tokio::spawn(async move { registry.start_session(REMOTE_SOURCE).await });

    // Wait for the session to appear in the table.
    let id = loop {
        if let Some(s) = harness.registry.list_sessions().await.first() {
            break s.preview_id;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    harness.registry.end_session(id).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), start)
        .await
        .expect("start did not observe cancellation")
        .unwrap();
    assert_matches!(result, Err(Error::LaunchFailure { .. }));
    assert_eq!(harness.registry.active_count(), 0);
    assert!(harness.preview_dirs().is_empty());
}

#[tokio::test]
async fn abandoned_start_releases_slot_and_directory() {
    let harness = TestHarness::build(Script::Hang, |settings| {
        settings.max_concurrent = 1;
        settings.readiness.max_wait = Duration::from_millis(500);
    });

    // The caller gives up while readiness is still pending.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        harness.registry.start_session(REMOTE_SOURCE),
    )
    .await;
    assert!(abandoned.is_err());

    assert_eq!(harness.registry.active_count(), 0);
    assert!(harness.preview_dirs().is_empty());
    assert!(harness.registry.list_sessions().await.is_empty());

    // The slot is free again: the next start gets as far as readiness.
    let err = harness.registry.start_session(REMOTE_SOURCE).await.unwrap_err();
    assert_matches!(err, Error::ReadinessTimeout { .. });
    assert!(harness.preview_dirs().is_empty());
}

#[tokio::test]
async fn window_ops_rejected_while_starting() {
    let harness = TestHarness::build(Script::Hang, |settings| {
        settings.readiness.max_wait = Duration::from_secs(10);
    });

    let registry = harness.registry.clone();
    let start = tokio::spawn(async move { registry.start_session(REMOTE_SOURCE).await });

    let id = loop {
        if let Some(s) = harness.registry.list_sessions().await.first() {
            break s.preview_id;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    assert_matches!(
        harness.registry.active_window(id).await,
        Err(Error::Conflict(_))
    );
    assert_matches!(
        harness.registry.advance(id, &NetworkMetrics::default()).await,
        Err(Error::Conflict(_))
    );

    harness.registry.shutdown_all().await;
    let _ = start.await;
    assert!(harness.preview_dirs().is_empty());
}

#[tokio::test]
async fn playback_stops_when_session_ends() {
    let harness = TestHarness::build(Script::Steady { segments: 1 }, |settings| {
        settings.source.chunk_size_bytes = 1;
    });
    let source_dir = tempfile::tempdir().unwrap();
    let source = local_source(source_dir.path(), &[7u8; 4096]);

    let started = harness.registry.start_session(&source).await.unwrap();
    let (playback, cancel) = harness
        .registry
        .open_playback(started.preview_id, NetworkMetrics::default())
        .await
        .unwrap();

    // A one-slot channel that is never drained keeps playback parked.
    let (tx, _rx) = tokio::sync::mpsc::channel(1);
    let task = tokio::spawn(async move { playback.run(tx, cancel).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.registry.end_session(started.preview_id).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("playback did not stop")
        .unwrap();
    assert_matches!(outcome, Ok(previewly_stream::PlaybackEnd::Cancelled));
}
