//! End-to-end scenarios for the duplicate guard, run against scaled-down
//! windows so the suite stays fast. Timing mirrors the production ratios:
//! rapid < same-product < general retention.

use std::time::Duration;
use uuid::Uuid;

use fashion_recommendation_service::guard::{
    DuplicateGuard, FeedbackTuple, GuardConfig, GuardDecision, GuardedRequest,
};
use fashion_recommendation_service::models::UserAction;

// 1 "scenario second" = 20ms: rapid 5s -> 100ms, same-product 60s -> 1200ms.
const TICK: Duration = Duration::from_millis(20);

fn scaled_guard() -> DuplicateGuard {
    DuplicateGuard::new(GuardConfig {
        general_window: TICK * 30,
        rapid_window: TICK * 5,
        same_product_window: TICK * 60,
        idempotency_window: Duration::from_secs(60),
    })
}

fn feedback_request(
    session: Uuid,
    product: &str,
    action: UserAction,
    key: Option<&str>,
) -> GuardedRequest {
    GuardedRequest {
        // Distinct bodies produce distinct fingerprints; model that here.
        fingerprint: format!("{session}:{product}:{action}:{}", Uuid::new_v4()),
        idempotency_key: key.map(str::to_string),
        feedback: Some(FeedbackTuple {
            session_id: session,
            product_id: product.to_string(),
            action,
        }),
    }
}

#[test]
fn s2_rapid_feedback_rejected_within_window() {
    let guard = scaled_guard();
    let session = Uuid::new_v4();

    // First feedback passes.
    assert!(matches!(
        guard.check_and_record(&feedback_request(session, "P1", UserAction::Like, None)),
        GuardDecision::Proceed
    ));

    // "1 second" later, a different action on the same product is rapid.
    std::thread::sleep(TICK);
    match guard.check_and_record(&feedback_request(session, "P1", UserAction::Love, None)) {
        GuardDecision::RapidFeedback {
            retry_after_seconds,
            ..
        } => {
            assert!(retry_after_seconds >= 1);
        }
        other => panic!("expected rapid_feedback, got {other:?}"),
    }
}

#[test]
fn s3_same_product_window_then_changed_mind() {
    let guard = scaled_guard();
    let session = Uuid::new_v4();

    guard.check_and_record(&feedback_request(session, "P1", UserAction::Like, None));

    // "7 seconds" in: past the rapid window, inside the conflict window.
    std::thread::sleep(TICK * 7);
    assert!(matches!(
        guard.check_and_record(&feedback_request(session, "P1", UserAction::Dislike, None)),
        GuardDecision::FeedbackConflict { .. }
    ));

    // After the full window the user is allowed to change their mind.
    std::thread::sleep(TICK * 55);
    assert!(matches!(
        guard.check_and_record(&feedback_request(session, "P1", UserAction::Dislike, None)),
        GuardDecision::Proceed
    ));
}

#[test]
fn s4_idempotent_replay_is_byte_identical() {
    let guard = scaled_guard();
    let session = Uuid::new_v4();

    let first = feedback_request(session, "P2", UserAction::Love, Some("k-1"));
    assert!(matches!(
        guard.check_and_record(&first),
        GuardDecision::Proceed
    ));

    // The service stores the exact bytes it responded with.
    let served = br#"{"success":true,"learning_update":{"reward":2.0}}"#.to_vec();
    guard.store_response("k-1", 200, served.clone(), Some("application/json".into()));

    // An identical retry with the same key replays those bytes verbatim,
    // even inside the rapid window.
    let retry = feedback_request(session, "P2", UserAction::Love, Some("k-1"));
    match guard.check_and_record(&retry) {
        GuardDecision::IdempotentReplay { status, body, .. } => {
            assert_eq!(status, 200);
            assert_eq!(body, served);
        }
        other => panic!("expected idempotent replay, got {other:?}"),
    }
}

#[test]
fn different_idempotency_key_still_conflicts() {
    let guard = scaled_guard();
    let session = Uuid::new_v4();

    guard.check_and_record(&feedback_request(session, "P3", UserAction::Like, Some("k-a")));

    std::thread::sleep(TICK * 7);
    // Different key, same product, inside the window: conflict.
    assert!(matches!(
        guard.check_and_record(&feedback_request(session, "P3", UserAction::Like, Some("k-b"))),
        GuardDecision::FeedbackConflict { .. }
    ));
}

#[test]
fn s6_intra_batch_conflicts_are_positional() {
    let session = Uuid::new_v4();
    let items = vec![
        FeedbackTuple {
            session_id: session,
            product_id: "A".into(),
            action: UserAction::Like,
        },
        FeedbackTuple {
            session_id: session,
            product_id: "A".into(),
            action: UserAction::Love,
        },
        FeedbackTuple {
            session_id: session,
            product_id: "B".into(),
            action: UserAction::Like,
        },
    ];

    let conflicts = DuplicateGuard::intra_batch_conflicts(&items);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].index, 1);
    assert_eq!(conflicts[0].conflicts_with_index, 0);

    // Items for different sessions never collide.
    let other_session = vec![
        FeedbackTuple {
            session_id: Uuid::new_v4(),
            product_id: "A".into(),
            action: UserAction::Like,
        },
        FeedbackTuple {
            session_id: Uuid::new_v4(),
            product_id: "A".into(),
            action: UserAction::Like,
        },
    ];
    assert!(DuplicateGuard::intra_batch_conflicts(&other_session).is_empty());
}

#[test]
fn sessions_are_isolated_from_each_other() {
    let guard = scaled_guard();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    guard.check_and_record(&feedback_request(a, "P1", UserAction::Like, None));
    // Another session's feedback on the same product passes untouched.
    assert!(matches!(
        guard.check_and_record(&feedback_request(b, "P1", UserAction::Like, None)),
        GuardDecision::Proceed
    ));
}

#[test]
fn maintenance_keeps_a_grace_tail_for_status_queries() {
    let guard = DuplicateGuard::new(GuardConfig {
        general_window: Duration::from_millis(40),
        rapid_window: Duration::from_millis(10),
        same_product_window: Duration::from_millis(60),
        idempotency_window: Duration::from_secs(60),
    });
    let session = Uuid::new_v4();
    guard.check_and_record(&feedback_request(session, "P1", UserAction::Like, None));

    // Past the conflict window but inside the doubled retention tail: the
    // record is still inspectable.
    std::thread::sleep(Duration::from_millis(80));
    guard.cleanup_expired();
    assert!(guard
        .feedback_status(session, "P1", UserAction::Like)
        .is_some());

    // Past the tail it disappears.
    std::thread::sleep(Duration::from_millis(60));
    guard.cleanup_expired();
    assert!(guard
        .feedback_status(session, "P1", UserAction::Like)
        .is_none());
}
