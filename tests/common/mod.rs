//! Common test infrastructure for qtrack integration tests.
//!
//! - `TestHarness`: temp directory with file helpers
//! - `Pipeline`: an in-memory store, reconciler and webhook handler wired together
//! - fixture builders for snapshots and webhook payloads

#![allow(dead_code)]

use qtrack::events::EventBus;
use qtrack::quality_gate::{GateCatalog, GateRefreshHook};
use qtrack::reconcile::Reconciler;
use qtrack::store::{InMemoryQualityStore, Snapshot};
use qtrack::webhook::WebhookHandler;
use qtrack::webhook_store::InMemoryWebhookStore;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Temp directory owned by one test.
pub struct TestHarness {
    name: String,
    temp_dir: TempDir,
}

impl TestHarness {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn temp_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.temp_dir.path().join(path)
    }

    /// Create a file in the temp directory, making parent directories as needed.
    pub fn create_file(&self, name: impl AsRef<Path>, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.temp_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content).expect("Failed to create test file");
        path
    }

    pub fn create_json(&self, name: impl AsRef<Path>, value: &Value) -> PathBuf {
        let content = serde_json::to_string_pretty(value).expect("serialize fixture");
        self.create_file(name, content)
    }

    pub fn read_file(&self, name: impl AsRef<Path>) -> String {
        std::fs::read_to_string(self.temp_path(name)).expect("Failed to read test file")
    }
}

/// Store, reconciler (with gate refresh) and webhook handler sharing one event bus.
pub struct Pipeline {
    pub store: Arc<InMemoryQualityStore>,
    pub events: Arc<EventBus>,
    pub handler: WebhookHandler,
}

impl Pipeline {
    pub fn new(snapshot: Snapshot) -> Self {
        let events = Arc::new(EventBus::new());
        let store = Arc::new(InMemoryQualityStore::with_events(
            snapshot,
            Arc::clone(&events),
        ));
        let gate_refresh = Arc::new(GateRefreshHook::new(
            Arc::new(GateCatalog::standard()),
            qtrack::coverage::CoverageOptions::default(),
        ));
        let reconciler = Arc::new(
            Reconciler::new(store.clone(), Arc::clone(&events)).with_hook(gate_refresh),
        );
        let handler = WebhookHandler::new(Arc::new(InMemoryWebhookStore::new()), reconciler);
        Self {
            store,
            events,
            handler,
        }
    }
}

/// Two releases, three requirements, three test cases.
pub fn sample_snapshot() -> Snapshot {
    serde_json::from_value(sample_snapshot_json()).expect("sample snapshot")
}

pub fn sample_snapshot_json() -> Value {
    json!({
        "requirements": [
            { "id": "REQ-1", "name": "Login", "priority": "High", "businessImpact": 5, "minTestCases": 2, "versions": ["v1", "v2"] },
            { "id": "REQ-2", "name": "Checkout", "priority": "Medium", "businessImpact": 4, "minTestCases": 1, "versions": ["v1"] },
            { "id": "REQ-3", "name": "Search", "priority": "Low", "businessImpact": 2, "minTestCases": 1, "versions": ["v2"] }
        ],
        "testCases": [
            { "id": "TC1", "name": "Valid login", "status": "Passed", "automationStatus": "Automated", "requirementIds": ["REQ-1"] },
            { "id": "TC2", "name": "Bad password", "status": "Passed", "automationStatus": "Manual", "requirementIds": ["REQ-1"] },
            { "id": "TC3", "name": "Pay by card", "status": "Passed", "automationStatus": "Automated", "requirementIds": ["REQ-2"] }
        ],
        "mapping": { "REQ-1": ["TC1", "TC2"], "REQ-2": ["TC3"] },
        "versions": [
            { "id": "v1", "name": "1.0", "status": "In Progress", "qualityGates": [
                { "id": "test-pass-rate", "target": 90 },
                { "id": "requirement-coverage", "target": 100 }
            ]},
            { "id": "v2", "name": "2.0", "status": "Planned", "qualityGates": [
                { "id": "defect-density", "target": 0 }
            ]}
        ]
    })
}

pub fn single_result(request_id: &str, result: Value) -> Value {
    json!({
        "requestId": request_id,
        "timestamp": "2024-05-01T10:00:00Z",
        "results": [result],
    })
}
