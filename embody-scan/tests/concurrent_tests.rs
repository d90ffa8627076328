//! Integration tests for concurrent scan access patterns
//!
//! Single-flight per scan_id, parallel sessions for different ids, and
//! rapid sequential reruns of one id.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use uuid::Uuid;

use embody_common::events::{EventBus, ScanFlavor};
use embody_scan::models::ScanStatus;
use embody_scan::pipeline::PipelineError;

use helpers::{build_pipeline, create_test_db, test_request, FakePhotoStore, ScriptedAnalysis};

// ============================================================================
// Single-flight
// ============================================================================

/// A second run for the same scan_id bounces with AlreadyRunning and causes
/// no stage calls while the first run is in flight
#[tokio::test]
async fn test_duplicate_scan_rejected_while_running() {
    let (_tmp, pool) = create_test_db().await;
    let event_bus = EventBus::new(256);

    // Slow stages keep the first run holding its claim
    let analysis = Arc::new(ScriptedAnalysis::happy().with_delay(Duration::from_millis(100)));
    let photos = Arc::new(FakePhotoStore::happy());
    let pipeline = build_pipeline(&pool, &event_bus, analysis.clone(), photos);

    let user_id = Uuid::new_v4();
    let request = test_request("scan-dup", user_id, ScanFlavor::FirstScan);
    let tracker = pipeline.tracker_for("scan-dup");

    let first = {
        let pipeline = pipeline.clone();
        let tracker = tracker.clone();
        let request = request.clone();
        tokio::spawn(async move { pipeline.run(request, &tracker).await })
    };

    // Let the first run take its claim
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(pipeline.registry().is_running("scan-dup"));

    let err = pipeline.run(request, &tracker).await.unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyRunning));

    let result = first.await.unwrap().expect("first run should complete");
    assert_eq!(result.server_scan_id, "srv-1");

    // Exactly one pass through the stages
    assert_eq!(analysis.calls.estimate.load(Ordering::SeqCst), 1);
    assert_eq!(analysis.calls.commit.load(Ordering::SeqCst), 1);
    assert!(!pipeline.registry().is_running("scan-dup"));
}

/// Different scan_ids are independent: claims do not interfere and every
/// session completes
#[tokio::test]
async fn test_concurrent_scans_different_sessions() {
    let (_tmp, pool) = create_test_db().await;
    let event_bus = EventBus::new(1024);

    let analysis = Arc::new(ScriptedAnalysis::happy().with_delay(Duration::from_millis(20)));
    let photos = Arc::new(FakePhotoStore::happy());
    let pipeline = build_pipeline(&pool, &event_bus, analysis.clone(), photos);

    let mut join_set = JoinSet::new();
    for i in 0..4 {
        let pipeline = pipeline.clone();
        let scan_id = format!("scan-par-{}", i);
        join_set.spawn(async move {
            let tracker = pipeline.tracker_for(&scan_id);
            let request = test_request(&scan_id, Uuid::new_v4(), ScanFlavor::Rescan);
            pipeline
                .run(request, &tracker)
                .await
                .unwrap_or_else(|e| panic!("scan {} failed: {}", scan_id, e));
            scan_id
        });
    }

    let mut completed = Vec::new();
    while let Some(result) = join_set.join_next().await {
        completed.push(result.expect("task should not panic"));
    }
    assert_eq!(completed.len(), 4);

    // Each session wrote its own completed row
    for scan_id in &completed {
        let record = embody_scan::db::scans::load_scan(&pool, scan_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("missing row for {}", scan_id));
        assert_eq!(record.status, ScanStatus::Complete);
    }
    assert_eq!(analysis.calls.commit.load(Ordering::SeqCst), 4);
}

// ============================================================================
// Sequential reuse
// ============================================================================

/// The same scan_id can run again as soon as the previous attempt finished;
/// the shared tracker restarts cleanly each time
#[tokio::test]
async fn test_rapid_sequential_reruns() {
    let (_tmp, pool) = create_test_db().await;
    let event_bus = EventBus::new(512);

    let analysis = Arc::new(ScriptedAnalysis::happy());
    let photos = Arc::new(FakePhotoStore::happy());
    let pipeline = build_pipeline(&pool, &event_bus, analysis.clone(), photos);

    let user_id = Uuid::new_v4();
    let tracker = pipeline.tracker_for("scan-rerun");

    for attempt in 0..3 {
        let request = test_request("scan-rerun", user_id, ScanFlavor::Rescan);
        let result = pipeline
            .run(request, &tracker)
            .await
            .unwrap_or_else(|e| panic!("attempt {} failed: {}", attempt, e));
        assert_eq!(result.server_scan_id, "srv-1");

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.progress, 100.0);
    }

    assert_eq!(analysis.calls.commit.load(Ordering::SeqCst), 3);

    let record = embody_scan::db::scans::load_scan(&pool, "scan-rerun")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ScanStatus::Complete);
}
