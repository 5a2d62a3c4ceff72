//! Test case reconciliation.
//!
//! Merges an enriched webhook result into the canonical [`TestCaseRecord`]
//! held by a [`QualityStore`]. Each id is reconciled under its own lock so
//! concurrent deliveries for the same test case cannot lose an update, while
//! different ids proceed in parallel.

use crate::error::{Error, Result};
use crate::events::{EventBus, QualityEvent};
use crate::model::{AutomationStatus, EnrichedResult, Priority, TestCaseRecord, TestStatus};
use crate::store::QualityStore;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

const NEW_RECORD_DESCRIPTION: &str = "Created from an automated test execution result.";

/// Work to run after a reconciliation committed a change.
///
/// Hooks run outside the per-id critical section. A failing hook is logged
/// and counted; it never fails the reconciliation.
pub trait PostCommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn after_commit(&self, store: &dyn QualityStore, record: &TestCaseRecord) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Unchanged,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }

    #[must_use]
    pub const fn is_committed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub change: ChangeKind,
    pub previous_status: Option<TestStatus>,
    /// The record as it now stands in the store.
    pub record: TestCaseRecord,
    pub hook_failures: usize,
}

pub struct Reconciler {
    store: Arc<dyn QualityStore>,
    events: Arc<EventBus>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hooks: Vec<Arc<dyn PostCommitHook>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks: Vec<&str> = self.hooks.iter().map(|hook| hook.name()).collect();
        f.debug_struct("Reconciler")
            .field("hooks", &hooks)
            .field("active_locks", &self.active_locks())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn QualityStore>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            events,
            locks: Mutex::new(HashMap::new()),
            hooks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PostCommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn QualityStore> {
        &self.store
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Number of ids currently being reconciled.
    #[must_use]
    pub fn active_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Create or merge the record for `incoming`.
    ///
    /// Only a status change (or a missing record) is written back. A failed
    /// store read or write is returned as an error and leaves the stored
    /// record untouched.
    pub fn reconcile(&self, incoming: &EnrichedResult) -> Result<ReconcileOutcome> {
        let id = incoming.id();
        if id.is_empty() {
            return Err(Error::validation("test case result is missing an id"));
        }

        let key_lock = self.key_lock(id);
        let committed = {
            let _guard = key_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.merge_and_commit(incoming)
        };
        self.release_key_lock(id, key_lock);
        let mut outcome = committed?;

        match outcome.change {
            ChangeKind::Created => {
                tracing::info!(
                    event = "reconcile.created",
                    test_case_id = %id,
                    status = %outcome.record.status,
                    "Created test case from webhook result"
                );
                self.events.publish(&QualityEvent::TestCaseCreated {
                    record: outcome.record.clone(),
                });
            }
            ChangeKind::Updated => {
                tracing::info!(
                    event = "reconcile.updated",
                    test_case_id = %id,
                    from = %outcome.previous_status.unwrap_or_default(),
                    to = %outcome.record.status,
                    "Updated test case status"
                );
                self.events.publish(&QualityEvent::TestCaseUpdated {
                    previous_status: outcome.previous_status.unwrap_or_default(),
                    record: outcome.record.clone(),
                });
            }
            ChangeKind::Unchanged => {
                tracing::debug!(
                    event = "reconcile.unchanged",
                    test_case_id = %id,
                    status = %outcome.record.status,
                    "Status unchanged; nothing written"
                );
                return Ok(outcome);
            }
        }

        outcome.hook_failures = self.run_hooks(&outcome.record);
        Ok(outcome)
    }

    fn merge_and_commit(&self, incoming: &EnrichedResult) -> Result<ReconcileOutcome> {
        let Some(existing) = self.store.get_test_case(incoming.id())? else {
            let record = new_record(incoming);
            self.store.commit_test_case(record.clone())?;
            return Ok(ReconcileOutcome {
                change: ChangeKind::Created,
                previous_status: None,
                record,
                hook_failures: 0,
            });
        };

        let previous_status = existing.status;
        let merged = merge_record(&existing, incoming);
        if merged.status == previous_status {
            return Ok(ReconcileOutcome {
                change: ChangeKind::Unchanged,
                previous_status: Some(previous_status),
                record: existing,
                hook_failures: 0,
            });
        }

        self.store.commit_test_case(merged.clone())?;
        Ok(ReconcileOutcome {
            change: ChangeKind::Updated,
            previous_status: Some(previous_status),
            record: merged,
            hook_failures: 0,
        })
    }

    fn run_hooks(&self, record: &TestCaseRecord) -> usize {
        let mut failures = 0;
        for hook in &self.hooks {
            if let Err(err) = hook.after_commit(self.store.as_ref(), record) {
                failures += 1;
                tracing::warn!(
                    event = "reconcile.hook_failed",
                    hook = hook.name(),
                    test_case_id = %record.id,
                    error = %err,
                    "Post-commit hook failed"
                );
            }
        }
        failures
    }

    fn key_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(table.entry(id.to_string()).or_default())
    }

    fn release_key_lock(&self, id: &str, key_lock: Arc<Mutex<()>>) {
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table, one held here.
        if Arc::strong_count(&key_lock) <= 2 {
            table.remove(id);
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn incoming_execution_time(incoming: &EnrichedResult) -> Option<u64> {
    incoming
        .result
        .duration
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| ms.round() as u64)
}

fn incoming_logs(incoming: &EnrichedResult) -> Option<String> {
    incoming
        .result
        .logs
        .as_ref()
        .filter(|logs| !logs.is_empty())
        .cloned()
}

fn new_record(incoming: &EnrichedResult) -> TestCaseRecord {
    let id = incoming.id();
    let status = incoming.result.status;
    TestCaseRecord {
        id: id.to_string(),
        name: incoming
            .result
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Test case {id}")),
        description: NEW_RECORD_DESCRIPTION.to_string(),
        status,
        automation_status: AutomationStatus::Automated,
        priority: Priority::Medium,
        last_executed: status.is_executed().then(Utc::now),
        execution_time: incoming_execution_time(incoming).unwrap_or(0),
        logs: incoming_logs(incoming).unwrap_or_default(),
        requirement_ids: Vec::new(),
        version: String::new(),
        applicable_versions: None,
        tags: Vec::new(),
        assignee: String::new(),
    }
}

/// Incoming status, timing and logs over the existing record. Identity and
/// classification fields always come from `existing`.
fn merge_record(existing: &TestCaseRecord, incoming: &EnrichedResult) -> TestCaseRecord {
    let status = incoming.result.status;
    let last_executed = if status != existing.status && status.is_executed() {
        Some(Utc::now())
    } else {
        existing.last_executed
    };
    TestCaseRecord {
        status,
        last_executed,
        execution_time: incoming_execution_time(incoming).unwrap_or(existing.execution_time),
        logs: incoming_logs(incoming).unwrap_or_else(|| existing.logs.clone()),
        ..existing.clone()
    }
}
