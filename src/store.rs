//! Contract for the canonical requirement/test-case store, plus an in-memory
//! implementation backed by a JSON snapshot file.

use crate::error::{Error, Result};
use crate::events::{EventBus, QualityEvent};
use crate::model::{Mapping, Requirement, TestCaseRecord, Version};
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tempfile::NamedTempFile;

/// Narrow read/write view of the dashboard's persistent data.
///
/// `commit_test_case` must be all-or-nothing for the one record it writes.
pub trait QualityStore: Send + Sync {
    fn get_test_cases(&self) -> Result<Vec<TestCaseRecord>>;

    fn get_test_case(&self, id: &str) -> Result<Option<TestCaseRecord>> {
        Ok(self.get_test_cases()?.into_iter().find(|tc| tc.id == id))
    }

    /// Replace the whole collection and notify subscribers.
    fn set_test_cases(&self, test_cases: Vec<TestCaseRecord>) -> Result<()>;

    /// Insert or replace a single record by id.
    fn commit_test_case(&self, record: TestCaseRecord) -> Result<()>;

    fn get_requirements(&self) -> Result<Vec<Requirement>>;

    fn get_mapping(&self) -> Result<Mapping>;

    fn get_versions(&self) -> Result<Vec<Version>>;

    fn set_versions(&self, versions: Vec<Version>) -> Result<()>;
}

/// Serialized form of the dashboard data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub requirements: Vec<Requirement>,
    pub test_cases: Vec<TestCaseRecord>,
    pub mapping: Mapping,
    pub versions: Vec<Version>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|err| {
            Error::store(format!(
                "Failed to parse snapshot {}: {err}",
                path.display()
            ))
        })
    }

    /// Write the snapshot through a temp file so readers never see a partial file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            std::fs::create_dir_all(parent)?;
            parent
        };

        let mut contents = serde_json::to_string_pretty(self)?;
        contents.push('\n');

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| {
            Error::store(format!(
                "Failed to persist snapshot to {}: {}",
                path.display(),
                err.error
            ))
        })?;
        Ok(())
    }
}

/// Thread-safe in-memory store. Publishes change events on `events()`.
#[derive(Debug)]
pub struct InMemoryQualityStore {
    data: RwLock<Snapshot>,
    events: Arc<EventBus>,
}

impl Default for InMemoryQualityStore {
    fn default() -> Self {
        Self::new(Snapshot::default())
    }
}

impl InMemoryQualityStore {
    #[must_use]
    pub fn new(snapshot: Snapshot) -> Self {
        Self::with_events(snapshot, Arc::new(EventBus::new()))
    }

    #[must_use]
    pub fn with_events(snapshot: Snapshot, events: Arc<EventBus>) -> Self {
        Self {
            data: RwLock::new(snapshot),
            events,
        }
    }

    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Copy of the current contents, e.g. for writing back to disk.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        f(&self.data.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> T {
        f(&mut self.data.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl QualityStore for InMemoryQualityStore {
    fn get_test_cases(&self) -> Result<Vec<TestCaseRecord>> {
        Ok(self.read(|data| data.test_cases.clone()))
    }

    fn get_test_case(&self, id: &str) -> Result<Option<TestCaseRecord>> {
        Ok(self.read(|data| data.test_cases.iter().find(|tc| tc.id == id).cloned()))
    }

    fn set_test_cases(&self, test_cases: Vec<TestCaseRecord>) -> Result<()> {
        let count = test_cases.len();
        self.write(|data| data.test_cases = test_cases);
        self.events
            .publish(&QualityEvent::TestCasesReplaced { count });
        Ok(())
    }

    fn commit_test_case(&self, record: TestCaseRecord) -> Result<()> {
        if record.id.is_empty() {
            return Err(Error::store("refusing to commit a test case without an id"));
        }
        self.write(|data| {
            match data.test_cases.iter_mut().find(|tc| tc.id == record.id) {
                Some(existing) => *existing = record,
                None => data.test_cases.push(record),
            }
        });
        Ok(())
    }

    fn get_requirements(&self) -> Result<Vec<Requirement>> {
        Ok(self.read(|data| data.requirements.clone()))
    }

    fn get_mapping(&self) -> Result<Mapping> {
        Ok(self.read(|data| data.mapping.clone()))
    }

    fn get_versions(&self) -> Result<Vec<Version>> {
        Ok(self.read(|data| data.versions.clone()))
    }

    fn set_versions(&self, versions: Vec<Version>) -> Result<()> {
        let count = versions.len();
        self.write(|data| data.versions = versions);
        self.events.publish(&QualityEvent::VersionsUpdated { count });
        Ok(())
    }
}
