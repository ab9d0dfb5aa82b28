//! Identification against enrolled templates.
//!
//! Run with: cargo test --package biokey-session --test integration_match

mod common;

use biokey_core::{CaptureMode, Error, OperationKind, ResultCode};
use biokey_session::{MatchOutcome, SessionPhase, StatusEvent};
use biokey_storage::TemplateStore;
use common::{Harness, WAIT, config, harness, place_fingers, ready, template, wait};

/// Initialized harness with fingers 1..=count enrolled.
async fn enrolled(count: u8) -> Harness {
    let h = ready(config().with_target_samples(u32::from(count))).await;
    place_fingers(&h.sensor, count);
    h.controller.start_enrollment(CaptureMode::Manual).await.unwrap();
    wait(&h.controller, |s| s.phase == SessionPhase::Completed).await;
    h
}

#[tokio::test]
async fn test_match_finds_enrolled_finger() {
    let h = enrolled(3).await;
    h.sensor.place_finger(template(2), 90).unwrap();

    let outcome = h.controller.start_match().await.unwrap();

    match &outcome {
        MatchOutcome::Matched {
            record_id,
            score,
            checked,
            quality,
        } => {
            assert_eq!(record_id, "USER_002");
            assert_eq!(*score, 1000);
            assert_eq!(*checked, 2);
            assert_eq!(quality.quality, 90);
        }
        other => panic!("expected a match, got {other:?}"),
    }

    let status = h.controller.status();
    assert_eq!(
        status.event,
        StatusEvent::MatchFound {
            record_id: "USER_002".into(),
            score: 1000,
        }
    );
    assert!(!h.controller.is_running(OperationKind::Capture));
}

#[tokio::test]
async fn test_unknown_finger_checks_whole_store() {
    let h = enrolled(3).await;
    h.sensor.place_finger(template(9), 90).unwrap();

    let outcome = h.controller.start_match().await.unwrap();

    assert!(!outcome.is_match());
    assert_eq!(outcome.checked(), 3);
    assert_eq!(h.sensor.compare_calls(), 3);
    assert_eq!(h.controller.status().event, StatusEvent::NoMatch { checked: 3 });
}

#[tokio::test]
async fn test_threshold_comes_from_config() {
    let h = ready(config().with_target_samples(1).with_match_threshold(900)).await;
    place_fingers(&h.sensor, 1);
    h.controller.start_enrollment(CaptureMode::Manual).await.unwrap();
    wait(&h.controller, |s| s.phase == SessionPhase::Completed).await;

    h.sensor.set_score(template(1), 899);
    h.sensor.place_finger(template(1), 90).unwrap();
    let outcome = h.controller.start_match().await.unwrap();
    assert!(!outcome.is_match());

    h.sensor.set_score(template(1), 900);
    h.sensor.place_finger(template(1), 90).unwrap();
    let outcome = h.controller.start_match().await.unwrap();
    assert_eq!(outcome.record_id(), Some("USER_001"));
}

#[tokio::test]
async fn test_empty_store_fails_without_capture() {
    let h = ready(config()).await;
    assert_eq!(h.store.count().await.unwrap(), 0);

    let err = h.controller.start_match().await.unwrap_err();

    assert!(matches!(err, Error::EmptyStore));
    assert_eq!(h.sensor.capture_requests(), 0);
    assert!(matches!(
        h.controller.status().event,
        StatusEvent::MatchFailed { .. }
    ));
    assert!(!h.controller.is_running(OperationKind::Capture));
}

#[tokio::test]
async fn test_match_rejected_during_enrollment() {
    let h = ready(config()).await;
    h.controller.start_enrollment(CaptureMode::Manual).await.unwrap();

    let err = h.controller.start_match().await.unwrap_err();

    assert!(matches!(
        err,
        Error::OperationAlreadyInProgress(OperationKind::Capture)
    ));
    assert_eq!(h.controller.status().phase, SessionPhase::CapturingFinger(1));
}

#[tokio::test]
async fn test_match_requires_initialized_device() {
    let h = harness(config()).await;

    let err = h.controller.start_match().await.unwrap_err();

    assert!(matches!(err, Error::DeviceNotInitialized));
    assert!(!h.controller.is_running(OperationKind::Capture));
}

#[tokio::test]
async fn test_capture_failure_surfaces() {
    let h = enrolled(2).await;
    h.sensor.fail_next_capture(-2034).unwrap();

    let err = h.controller.start_match().await.unwrap_err();

    assert_eq!(err.code(), Some(-2034));
    assert_eq!(h.sensor.compare_calls(), 0);
    assert_eq!(h.controller.status().event.code(), Some(-2034));
    // Device stays initialized.
    assert!(h.controller.status().is_initialized());
}

#[tokio::test]
async fn test_disconnect_during_compare_drops_device() {
    let h = enrolled(2).await;
    h.sensor.fail_next_compare(-2057);
    h.sensor.place_finger(template(2), 90).unwrap();

    let err = h.controller.start_match().await.unwrap_err();

    assert!(matches!(err, Error::DeviceDisconnected));
    let status = h.controller.status();
    assert!(status.device.is_none());
    assert_eq!(status.event, StatusEvent::Disconnected);
    assert!(!h.controller.is_running(OperationKind::Capture));
}

#[tokio::test]
async fn test_uninitialize_rejected_while_matching() {
    let h = enrolled(1).await;
    let pending = tokio::spawn({
        let controller = h.controller.clone();
        async move { controller.start_match().await }
    });
    wait(&h.controller, |s| s.event == StatusEvent::Matching).await;

    let err = h.controller.uninitialize().await.unwrap_err();

    assert!(matches!(
        err,
        Error::OperationAlreadyInProgress(OperationKind::Capture)
    ));
    assert!(h.controller.is_running(OperationKind::Capture));
    assert!(!h.controller.is_running(OperationKind::Uninit));
    assert_eq!(h.sensor.teardown_calls(), 0);

    // The match is unaffected.
    h.sensor.place_finger(template(1), 90).unwrap();
    let outcome = tokio::time::timeout(WAIT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome.record_id(), Some("USER_001"));
    assert!(h.controller.status().is_initialized());
}

#[tokio::test]
async fn test_disconnect_cancels_pending_match() {
    let h = enrolled(1).await;
    let pending = tokio::spawn({
        let controller = h.controller.clone();
        async move { controller.start_match().await }
    });
    wait(&h.controller, |s| s.event == StatusEvent::Matching).await;

    h.sensor.preview(ResultCode::DeviceDisconnected, 0);
    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();

    assert!(matches!(result, Err(Error::DeviceDisconnected)));
    assert_eq!(h.controller.status().event, StatusEvent::Disconnected);
    assert!(!h.controller.is_running(OperationKind::Capture));

    // The abandoned capture no longer holds the sensor.
    h.controller.initialize().await.unwrap();
    h.sensor.place_finger(template(1), 90).unwrap();
    let outcome = tokio::time::timeout(WAIT, h.controller.start_match())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.record_id(), Some("USER_001"));
}
