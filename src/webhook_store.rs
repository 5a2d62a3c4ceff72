//! Per-request storage of enriched webhook results.
//!
//! Results are keyed first by request id, then by test-case id. A later
//! delivery for the same pair overwrites the earlier one but keeps its
//! original position, so listing a request yields first-write order with
//! latest-write values.

use crate::model::EnrichedResult;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Composite key returned to callers for tracing and idempotency checks.
#[must_use]
pub fn storage_key(request_id: &str, test_case_id: &str) -> String {
    format!("{request_id}-{test_case_id}")
}

/// Repository for webhook results.
pub trait WebhookResultStore: Send + Sync {
    /// Store (or overwrite) a result and return its storage key.
    fn put(&self, request_id: &str, result: EnrichedResult) -> String;

    /// Results currently stored for `request_id`, in first-write order.
    fn results_for_request(&self, request_id: &str) -> Vec<EnrichedResult>;

    fn request_ids(&self) -> Vec<String>;

    /// Drop everything. Intended for tests and process resets.
    fn clear(&self);
}

#[derive(Debug, Default)]
struct RequestBucket {
    order: Vec<String>,
    results: HashMap<String, EnrichedResult>,
}

#[derive(Debug, Default)]
struct Inner {
    order: Vec<String>,
    requests: HashMap<String, RequestBucket>,
}

/// Process-local webhook result store.
#[derive(Debug, Default)]
pub struct InMemoryWebhookStore {
    inner: Mutex<Inner>,
}

impl InMemoryWebhookStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WebhookResultStore for InMemoryWebhookStore {
    fn put(&self, request_id: &str, result: EnrichedResult) -> String {
        let test_case_id = result.id().to_string();
        let key = storage_key(request_id, &test_case_id);

        let mut inner = self.lock();
        if !inner.requests.contains_key(request_id) {
            inner.order.push(request_id.to_string());
        }
        let bucket = inner.requests.entry(request_id.to_string()).or_default();
        if bucket.results.insert(test_case_id.clone(), result).is_some() {
            tracing::debug!(
                event = "webhook_store.overwrite",
                request_id,
                test_case_id = %test_case_id,
                "Replaced earlier result for test case"
            );
        } else {
            bucket.order.push(test_case_id);
        }
        key
    }

    fn results_for_request(&self, request_id: &str) -> Vec<EnrichedResult> {
        let inner = self.lock();
        inner.requests.get(request_id).map_or_else(Vec::new, |bucket| {
            bucket
                .order
                .iter()
                .filter_map(|id| bucket.results.get(id).cloned())
                .collect()
        })
    }

    fn request_ids(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    fn clear(&self) {
        let mut inner = self.lock();
        inner.order.clear();
        inner.requests.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParsingSource, TestCaseResult, TestStatus};

    fn result(id: &str, status: TestStatus) -> EnrichedResult {
        EnrichedResult::plain(
            TestCaseResult {
                id: id.to_string(),
                name: None,
                status,
                duration: None,
                logs: None,
                junit_xml: None,
            },
            ParsingSource::None,
        )
    }

    #[test]
    fn storage_key_is_request_dash_test_case() {
        assert_eq!(storage_key("r1", "TC1"), "r1-TC1");
    }

    #[test]
    fn put_then_list_returns_result_once() {
        let store = InMemoryWebhookStore::new();
        let key = store.put("r1", result("TC1", TestStatus::Passed));
        assert_eq!(key, "r1-TC1");

        let listed = store.results_for_request("r1");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id(), "TC1");
        assert!(store.results_for_request("r2").is_empty());
    }

    #[test]
    fn later_delivery_overwrites_but_keeps_position() {
        let store = InMemoryWebhookStore::new();
        store.put("r1", result("TC1", TestStatus::Failed));
        store.put("r1", result("TC2", TestStatus::Passed));
        store.put("r1", result("TC1", TestStatus::Passed));

        let listed = store.results_for_request("r1");
        let summary: Vec<(&str, TestStatus)> = listed
            .iter()
            .map(|r| (r.id(), r.result.status))
            .collect();
        assert_eq!(
            summary,
            vec![("TC1", TestStatus::Passed), ("TC2", TestStatus::Passed)]
        );
    }

    #[test]
    fn requests_are_isolated_and_clearable() {
        let store = InMemoryWebhookStore::new();
        store.put("r1", result("TC1", TestStatus::Failed));
        store.put("r2", result("TC1", TestStatus::Passed));

        assert_eq!(store.request_ids(), vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(
            store.results_for_request("r1")[0].result.status,
            TestStatus::Failed
        );

        store.clear();
        assert!(store.request_ids().is_empty());
        assert!(store.results_for_request("r1").is_empty());
    }
}
