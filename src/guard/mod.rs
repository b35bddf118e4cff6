//! Duplicate, conflict and idempotency protection for mutating requests.
//!
//! Three in-memory TTL tables back the guard:
//! - request fingerprints (general dedup window),
//! - per-(session, product) feedback records (rapid / same-product windows),
//! - idempotency keys mapped to the prior response for verbatim replay.
//!
//! Entries are process-local; a periodic maintenance pass purges everything
//! older than its window (feedback records get a doubled grace tail so the
//! status endpoint can still report on them).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use prometheus::{register_int_counter, IntCounter};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::UserAction;

static DUPLICATES_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "recommendation_guard_duplicates_rejected_total",
        "Requests rejected by the duplicate guard"
    )
    .expect("register recommendation_guard_duplicates_rejected_total")
});

static IDEMPOTENT_REPLAYS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "recommendation_guard_idempotent_replays_total",
        "Responses served verbatim from the idempotency cache"
    )
    .expect("register recommendation_guard_idempotent_replays_total")
});

/// Guard windows. Defaults follow the service contract; tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    /// General duplicate-request window.
    pub general_window: Duration,
    /// Rapid re-feedback window for the same (session, product).
    pub rapid_window: Duration,
    /// Same-product conflict window.
    pub same_product_window: Duration,
    /// Idempotency-key retention.
    pub idempotency_window: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            general_window: Duration::from_secs(30),
            rapid_window: Duration::from_secs(5),
            same_product_window: Duration::from_secs(60),
            idempotency_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct FingerprintEntry {
    seen_at: Instant,
}

#[derive(Debug, Clone)]
struct FeedbackEntry {
    action: UserAction,
    seen_at: Instant,
    timestamp: DateTime<Utc>,
    idempotency_key: Option<String>,
    processed: bool,
}

#[derive(Debug, Clone)]
struct IdempotencyEntry {
    stored_at: Instant,
    status: u16,
    body: Vec<u8>,
    content_type: Option<String>,
}

/// Canonical identity of a feedback request as seen by the guard.
#[derive(Debug, Clone)]
pub struct FeedbackTuple {
    pub session_id: Uuid,
    pub product_id: String,
    pub action: UserAction,
}

/// Everything the guard needs to know about an incoming mutating request.
#[derive(Debug, Clone)]
pub struct GuardedRequest {
    pub fingerprint: String,
    pub idempotency_key: Option<String>,
    pub feedback: Option<FeedbackTuple>,
}

/// Outcome of the precedence chain.
#[derive(Debug, Clone)]
pub enum GuardDecision {
    Proceed,
    IdempotentReplay {
        status: u16,
        body: Vec<u8>,
        content_type: Option<String>,
    },
    RapidFeedback {
        retry_after_seconds: u64,
        first_seen: DateTime<Utc>,
    },
    FeedbackConflict {
        retry_after_seconds: u64,
        first_seen: DateTime<Utc>,
    },
    DuplicateRequest {
        retry_after_seconds: u64,
    },
}

/// State of a guarded feedback record, as reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecordStatus {
    pub session_id: Uuid,
    pub product_id: String,
    pub action: String,
    pub recorded_at: DateTime<Utc>,
    pub age_seconds: u64,
    pub processed: bool,
    pub has_idempotency_key: bool,
    pub rapid_window_open: bool,
    pub conflict_window_open: bool,
}

/// Table counters for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GuardStats {
    pub fingerprint_entries: usize,
    pub feedback_entries: usize,
    pub idempotency_entries: usize,
    pub duplicates_rejected: u64,
    pub idempotent_replays: u64,
}

/// A conflicting item inside one batch request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchConflict {
    pub index: usize,
    pub conflicts_with_index: usize,
    pub session_id: Uuid,
    pub product_id: String,
}

pub struct DuplicateGuard {
    config: GuardConfig,
    fingerprints: DashMap<String, FingerprintEntry>,
    feedback: DashMap<(Uuid, String), FeedbackEntry>,
    idempotency: DashMap<String, IdempotencyEntry>,
}

impl DuplicateGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            fingerprints: DashMap::new(),
            feedback: DashMap::new(),
            idempotency: DashMap::new(),
        }
    }

    /// Request fingerprint: SHA-256 over source, method, path and the
    /// canonicalized body and query.
    pub fn fingerprint(ip: &str, method: &str, path: &str, body: &[u8], query: &str) -> String {
        let canonical_body = canonical_json(body);
        let canonical_query = canonical_query(query);

        let mut hasher = Sha256::new();
        hasher.update(ip.as_bytes());
        hasher.update(b"\n");
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical_body.as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical_query.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Run the precedence chain. On `Proceed` the request is recorded in the
    /// relevant tables, so a retried twin inside the window is caught.
    pub fn check_and_record(&self, request: &GuardedRequest) -> GuardDecision {
        // 1. Verbatim replay for a known idempotency key.
        if let Some(key) = &request.idempotency_key {
            if let Some(entry) = self.idempotency.get(key) {
                if entry.stored_at.elapsed() < self.config.idempotency_window {
                    IDEMPOTENT_REPLAYS.inc();
                    debug!(idempotency_key = %key, "serving idempotent replay");
                    return GuardDecision::IdempotentReplay {
                        status: entry.status,
                        body: entry.body.clone(),
                        content_type: entry.content_type.clone(),
                    };
                }
            }
        }

        // 2. Feedback-specific windows on (session, product).
        if let Some(feedback) = &request.feedback {
            let key = (feedback.session_id, feedback.product_id.clone());
            if let Some(entry) = self.feedback.get(&key) {
                let elapsed = entry.seen_at.elapsed();
                if elapsed < self.config.rapid_window {
                    DUPLICATES_REJECTED.inc();
                    return GuardDecision::RapidFeedback {
                        retry_after_seconds: remaining_seconds(self.config.rapid_window, elapsed),
                        first_seen: entry.timestamp,
                    };
                }
                if elapsed < self.config.same_product_window {
                    let same_key = request.idempotency_key.is_some()
                        && request.idempotency_key == entry.idempotency_key;
                    if !same_key {
                        DUPLICATES_REJECTED.inc();
                        return GuardDecision::FeedbackConflict {
                            retry_after_seconds: remaining_seconds(
                                self.config.same_product_window,
                                elapsed,
                            ),
                            first_seen: entry.timestamp,
                        };
                    }
                }
                // Beyond the window the user may change their mind.
            }
        }

        // 3. General fingerprint dedup.
        if let Some(entry) = self.fingerprints.get(&request.fingerprint) {
            let elapsed = entry.seen_at.elapsed();
            if elapsed < self.config.general_window {
                DUPLICATES_REJECTED.inc();
                return GuardDecision::DuplicateRequest {
                    retry_after_seconds: remaining_seconds(self.config.general_window, elapsed),
                };
            }
        }

        self.record(request);
        GuardDecision::Proceed
    }

    fn record(&self, request: &GuardedRequest) {
        self.fingerprints.insert(
            request.fingerprint.clone(),
            FingerprintEntry {
                seen_at: Instant::now(),
            },
        );
        if let Some(feedback) = &request.feedback {
            self.feedback.insert(
                (feedback.session_id, feedback.product_id.clone()),
                FeedbackEntry {
                    action: feedback.action,
                    seen_at: Instant::now(),
                    timestamp: Utc::now(),
                    idempotency_key: request.idempotency_key.clone(),
                    processed: false,
                },
            );
        }
    }

    /// Store the response served for an idempotency key, for later replay.
    pub fn store_response(
        &self,
        key: &str,
        status: u16,
        body: Vec<u8>,
        content_type: Option<String>,
    ) {
        self.idempotency.insert(
            key.to_string(),
            IdempotencyEntry {
                stored_at: Instant::now(),
                status,
                body,
                content_type,
            },
        );
    }

    /// Flip the processed flag once the feedback mutation committed.
    pub fn mark_processed(&self, session_id: Uuid, product_id: &str) {
        if let Some(mut entry) = self.feedback.get_mut(&(session_id, product_id.to_string())) {
            entry.processed = true;
        }
    }

    /// Inspect the guard record for an exact (session, product, action) tuple.
    pub fn feedback_status(
        &self,
        session_id: Uuid,
        product_id: &str,
        action: UserAction,
    ) -> Option<FeedbackRecordStatus> {
        let entry = self.feedback.get(&(session_id, product_id.to_string()))?;
        if entry.action != action {
            return None;
        }
        let elapsed = entry.seen_at.elapsed();
        Some(FeedbackRecordStatus {
            session_id,
            product_id: product_id.to_string(),
            action: action.as_str().to_string(),
            recorded_at: entry.timestamp,
            age_seconds: elapsed.as_secs(),
            processed: entry.processed,
            has_idempotency_key: entry.idempotency_key.is_some(),
            rapid_window_open: elapsed < self.config.rapid_window,
            conflict_window_open: elapsed < self.config.same_product_window,
        })
    }

    /// Detect intra-batch duplicates on (session, product): every repeat of a
    /// pair already seen earlier in the batch is a conflict at its position.
    pub fn intra_batch_conflicts(items: &[FeedbackTuple]) -> Vec<BatchConflict> {
        let mut first_seen: std::collections::HashMap<(Uuid, &str), usize> =
            std::collections::HashMap::new();
        let mut conflicts = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match first_seen.entry((item.session_id, item.product_id.as_str())) {
                std::collections::hash_map::Entry::Occupied(existing) => {
                    conflicts.push(BatchConflict {
                        index,
                        conflicts_with_index: *existing.get(),
                        session_id: item.session_id,
                        product_id: item.product_id.clone(),
                    });
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(index);
                }
            }
        }
        conflicts
    }

    /// Purge entries older than their window. Feedback records are kept for
    /// twice their window so status queries retain a grace tail.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.fingerprints.len() + self.feedback.len() + self.idempotency.len();

        self.fingerprints
            .retain(|_, entry| entry.seen_at.elapsed() < self.config.general_window);
        self.feedback
            .retain(|_, entry| entry.seen_at.elapsed() < self.config.same_product_window * 2);
        self.idempotency
            .retain(|_, entry| entry.stored_at.elapsed() < self.config.idempotency_window);

        let after = self.fingerprints.len() + self.feedback.len() + self.idempotency.len();
        let removed = before.saturating_sub(after);
        if removed > 0 {
            info!(removed, "purged expired guard entries");
        }
        removed
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            fingerprint_entries: self.fingerprints.len(),
            feedback_entries: self.feedback.len(),
            idempotency_entries: self.idempotency.len(),
            duplicates_rejected: DUPLICATES_REJECTED.get(),
            idempotent_replays: IDEMPOTENT_REPLAYS.get(),
        }
    }

    /// Development-only wipe of all three tables.
    pub fn reset(&self) {
        self.fingerprints.clear();
        self.feedback.clear();
        self.idempotency.clear();
    }
}

/// Canonical JSON rendering: parse and re-serialize so object key order does
/// not change the fingerprint. Non-JSON bodies hash as raw bytes.
fn canonical_json(body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}

fn remaining_seconds(window: Duration, elapsed: Duration) -> u64 {
    window.saturating_sub(elapsed).as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(product: &str, action: UserAction) -> FeedbackTuple {
        FeedbackTuple {
            session_id: Uuid::nil(),
            product_id: product.to_string(),
            action,
        }
    }

    fn request(fingerprint: &str, feedback: Option<FeedbackTuple>) -> GuardedRequest {
        GuardedRequest {
            fingerprint: fingerprint.to_string(),
            idempotency_key: None,
            feedback,
        }
    }

    fn fast_guard() -> DuplicateGuard {
        DuplicateGuard::new(GuardConfig {
            general_window: Duration::from_millis(200),
            rapid_window: Duration::from_millis(50),
            same_product_window: Duration::from_millis(150),
            idempotency_window: Duration::from_secs(60),
        })
    }

    #[test]
    fn fingerprint_ignores_json_key_order_and_query_order() {
        let a = DuplicateGuard::fingerprint(
            "1.2.3.4",
            "POST",
            "/api/feedback",
            br#"{"b":1,"a":2}"#,
            "y=2&x=1",
        );
        let b = DuplicateGuard::fingerprint(
            "1.2.3.4",
            "POST",
            "/api/feedback",
            br#"{"a":2,"b":1}"#,
            "x=1&y=2",
        );
        assert_eq!(a, b);

        let c = DuplicateGuard::fingerprint(
            "1.2.3.4",
            "POST",
            "/api/feedback",
            br#"{"a":3,"b":1}"#,
            "x=1&y=2",
        );
        assert_ne!(a, c);
    }

    #[test]
    fn rapid_feedback_is_rejected_even_for_a_different_action() {
        let guard = fast_guard();
        let first = request("f1", Some(tuple("P1", UserAction::Like)));
        assert!(matches!(
            guard.check_and_record(&first),
            GuardDecision::Proceed
        ));

        let second = request("f2", Some(tuple("P1", UserAction::Love)));
        assert!(matches!(
            guard.check_and_record(&second),
            GuardDecision::RapidFeedback { .. }
        ));
    }

    #[test]
    fn same_product_window_conflicts_after_rapid_window() {
        let guard = fast_guard();
        let first = request("f1", Some(tuple("P1", UserAction::Like)));
        guard.check_and_record(&first);

        std::thread::sleep(Duration::from_millis(80));
        let later = request("f3", Some(tuple("P1", UserAction::Dislike)));
        assert!(matches!(
            guard.check_and_record(&later),
            GuardDecision::FeedbackConflict { .. }
        ));

        std::thread::sleep(Duration::from_millis(120));
        let changed_mind = request("f4", Some(tuple("P1", UserAction::Dislike)));
        assert!(matches!(
            guard.check_and_record(&changed_mind),
            GuardDecision::Proceed
        ));
    }

    #[test]
    fn rejected_attempts_do_not_refresh_the_window() {
        let guard = fast_guard();
        guard.check_and_record(&request("f1", Some(tuple("P1", UserAction::Like))));

        std::thread::sleep(Duration::from_millis(60));
        // Rejected conflict must not reset the window clock.
        guard.check_and_record(&request("f2", Some(tuple("P1", UserAction::Love))));

        std::thread::sleep(Duration::from_millis(100));
        assert!(matches!(
            guard.check_and_record(&request("f3", Some(tuple("P1", UserAction::Love)))),
            GuardDecision::Proceed
        ));
    }

    #[test]
    fn different_products_do_not_conflict() {
        let guard = fast_guard();
        guard.check_and_record(&request("f1", Some(tuple("P1", UserAction::Like))));
        assert!(matches!(
            guard.check_and_record(&request("f2", Some(tuple("P2", UserAction::Like)))),
            GuardDecision::Proceed
        ));
    }

    #[test]
    fn general_fingerprint_dedup_applies_to_non_feedback_requests() {
        let guard = fast_guard();
        assert!(matches!(
            guard.check_and_record(&request("same", None)),
            GuardDecision::Proceed
        ));
        assert!(matches!(
            guard.check_and_record(&request("same", None)),
            GuardDecision::DuplicateRequest { .. }
        ));
        assert!(matches!(
            guard.check_and_record(&request("other", None)),
            GuardDecision::Proceed
        ));
    }

    #[test]
    fn idempotency_key_replays_stored_response() {
        let guard = fast_guard();
        let mut req = request("f1", Some(tuple("P2", UserAction::Love)));
        req.idempotency_key = Some("k-1".to_string());

        assert!(matches!(
            guard.check_and_record(&req),
            GuardDecision::Proceed
        ));
        guard.store_response("k-1", 200, b"{\"success\":true}".to_vec(), None);

        match guard.check_and_record(&req) {
            GuardDecision::IdempotentReplay { status, body, .. } => {
                assert_eq!(status, 200);
                assert_eq!(body, b"{\"success\":true}".to_vec());
            }
            other => panic!("expected replay, got {:?}", other),
        }
    }

    #[test]
    fn same_idempotency_key_without_stored_response_is_allowed() {
        let guard = fast_guard();
        let mut req = request("f1", Some(tuple("P2", UserAction::Love)));
        req.idempotency_key = Some("k-2".to_string());
        guard.check_and_record(&req);

        std::thread::sleep(Duration::from_millis(60));
        let mut retry = request("f2", Some(tuple("P2", UserAction::Love)));
        retry.idempotency_key = Some("k-2".to_string());
        assert!(matches!(
            guard.check_and_record(&retry),
            GuardDecision::Proceed
        ));
    }

    #[test]
    fn processed_flag_and_status_report() {
        let guard = fast_guard();
        guard.check_and_record(&request("f1", Some(tuple("P9", UserAction::Like))));

        let status = guard
            .feedback_status(Uuid::nil(), "P9", UserAction::Like)
            .expect("status should exist");
        assert!(!status.processed);
        assert!(status.rapid_window_open);

        guard.mark_processed(Uuid::nil(), "P9");
        let status = guard
            .feedback_status(Uuid::nil(), "P9", UserAction::Like)
            .expect("status should exist");
        assert!(status.processed);

        // A different action does not match the record.
        assert!(guard
            .feedback_status(Uuid::nil(), "P9", UserAction::Love)
            .is_none());
    }

    #[test]
    fn intra_batch_duplicates_are_indexed_by_position() {
        let items = vec![
            tuple("A", UserAction::Like),
            tuple("A", UserAction::Love),
            tuple("B", UserAction::Like),
        ];
        let conflicts = DuplicateGuard::intra_batch_conflicts(&items);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].index, 1);
        assert_eq!(conflicts[0].conflicts_with_index, 0);
        assert_eq!(conflicts[0].product_id, "A");
    }

    #[test]
    fn cleanup_purges_expired_entries() {
        let guard = fast_guard();
        guard.check_and_record(&request("f1", Some(tuple("P1", UserAction::Like))));
        assert_eq!(guard.stats().fingerprint_entries, 1);
        assert_eq!(guard.stats().feedback_entries, 1);

        std::thread::sleep(Duration::from_millis(350));
        guard.cleanup_expired();
        let stats = guard.stats();
        assert_eq!(stats.fingerprint_entries, 0);
        assert_eq!(stats.feedback_entries, 0);
    }
}
