//! Typed change events and a subscription bus.
//!
//! Consumers that need to react to ingested results or recomputed gates
//! subscribe here and receive events over a channel.

use crate::model::{TestCaseRecord, TestStatus};
use serde::Serialize;
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};

/// Events published by the ingestion pipeline and the store.
///
/// Serialized with a `type` tag in `snake_case` (e.g. `"test_case_updated"`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QualityEvent {
    /// A webhook result was accepted and stored.
    WebhookReceived {
        request_id: String,
        test_case_id: String,
        storage_key: String,
        status: TestStatus,
    },

    /// Reconciliation created a record that did not exist before.
    TestCaseCreated { record: TestCaseRecord },

    /// Reconciliation changed the status of an existing record.
    TestCaseUpdated {
        previous_status: TestStatus,
        record: TestCaseRecord,
    },

    /// The whole test-case collection was replaced.
    TestCasesReplaced { count: usize },

    /// Release definitions (including gate results) were written.
    VersionsUpdated { count: usize },
}

impl QualityEvent {
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::WebhookReceived { .. } => "webhook_received",
            Self::TestCaseCreated { .. } => "test_case_created",
            Self::TestCaseUpdated { .. } => "test_case_updated",
            Self::TestCasesReplaced { .. } => "test_cases_replaced",
            Self::VersionsUpdated { .. } => "versions_updated",
        }
    }
}

/// Fan-out of [`QualityEvent`]s to any number of channel subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::Sender<QualityEvent>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<QualityEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber. Subscribers whose receiver
    /// was dropped are forgotten.
    pub fn publish(&self, event: &QualityEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::trace!(
            event = "bus.publish",
            name = event.event_name(),
            subscribers = subscribers.len(),
            "Published quality event"
        );
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
