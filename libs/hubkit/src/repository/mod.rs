//! Durable storage of module configuration records.
//!
//! The repository is pure CRUD keyed by module id - it has no lifecycle
//! knowledge. Records are self-describing: each persisted unit carries the
//! config-shape tag (`kind`) next to the field data, so reading a record back
//! reconstructs the exact original shape without a separate schema registry.

mod json_store;

pub use json_store::JsonConfigRepository;
pub(crate) use json_store::sanitize_id as sanitize_file_stem;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Common configuration base, embedded by value in every record.
///
/// `id` is globally unique within the repository and immutable once assigned.
/// Type-specific fields live in `params`; modules deserialize that section
/// into their own typed struct via [`crate::config`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub id: String,
    pub name: String,
    /// Identifies which module implementation to instantiate (the registry
    /// resolves this against discovered module types).
    pub module_type: String,
    /// Enabled/auto-start flag: disabled modules keep their record but get no
    /// live instance during bulk load.
    #[serde(default)]
    pub auto_start: bool,
    /// Ids of modules that must be started before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ModuleConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            module_type: module_type.into(),
            auto_start: false,
            depends_on: Vec::new(),
            params: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn auto_start(mut self, on: bool) -> Self {
        self.auto_start = on;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    #[must_use]
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// The persisted two-part unit: a config-shape tag plus the field data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub kind: String,
    pub config: ModuleConfig,
}

impl ConfigRecord {
    pub fn new(kind: impl Into<String>, config: ModuleConfig) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("config record with id '{id}' already exists")]
    DuplicateId { id: String },

    #[error("failed to persist config record at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt config record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Store of module configuration records keyed by module id.
///
/// `update` is insert-or-replace, never a partial merge. Writes for the same
/// id are mutually exclusive; writes for different ids proceed independently.
/// `get_all` iteration order is deterministic per implementation (the
/// registry's load tie-break depends on it).
pub trait ConfigRepository: Send + Sync {
    /// All records, in the repository's deterministic iteration order.
    fn get_all(&self) -> Result<Vec<ConfigRecord>, RepositoryError>;

    fn get(&self, id: &str) -> Result<Option<ConfigRecord>, RepositoryError>;

    /// Insert a new record. Fails with [`RepositoryError::DuplicateId`] if the
    /// id is already present.
    fn add(&self, record: &ConfigRecord) -> Result<(), RepositoryError>;

    /// Insert-or-replace. The stored record is always the full unit passed in.
    fn update(&self, record: &ConfigRecord) -> Result<(), RepositoryError>;

    /// Remove a record; returns whether it existed.
    fn remove(&self, id: &str) -> Result<bool, RepositoryError>;
}

/// In-memory repository preserving insertion order. Used by tests and
/// short-lived hosts that do not persist configuration.
#[derive(Default)]
pub struct MemoryConfigRepository {
    records: RwLock<Vec<ConfigRecord>>,
}

impl MemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ConfigRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
        }
    }
}

impl ConfigRepository for MemoryConfigRepository {
    fn get_all(&self) -> Result<Vec<ConfigRecord>, RepositoryError> {
        Ok(self.records.read().clone())
    }

    fn get(&self, id: &str) -> Result<Option<ConfigRecord>, RepositoryError> {
        Ok(self.records.read().iter().find(|r| r.id() == id).cloned())
    }

    fn add(&self, record: &ConfigRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(RepositoryError::DuplicateId {
                id: record.id().to_owned(),
            });
        }
        records.push(record.clone());
        Ok(())
    }

    fn update(&self, record: &ConfigRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        if let Some(existing) = records.iter_mut().find(|r| r.id() == record.id()) {
            *existing = record.clone();
        } else {
            records.push(record.clone());
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, RepositoryError> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.id() != id);
        Ok(records.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> ConfigRecord {
        ConfigRecord::new(
            "test/config@1",
            ModuleConfig::new(id, id, "test").params(json!({"n": 1})),
        )
    }

    #[test]
    fn add_twice_fails_with_duplicate_id() {
        let repo = MemoryConfigRepository::new();
        repo.add(&record("a")).unwrap();
        let err = repo.add(&record("a")).unwrap_err();
        assert!(matches!(err, RepositoryError::DuplicateId { id } if id == "a"));
    }

    #[test]
    fn update_inserts_when_absent() {
        let repo = MemoryConfigRepository::new();
        repo.update(&record("fresh")).unwrap();
        assert_eq!(repo.get("fresh").unwrap().unwrap().id(), "fresh");
    }

    #[test]
    fn update_replaces_wholesale() {
        let repo = MemoryConfigRepository::new();
        repo.add(&record("a")).unwrap();

        let mut changed = record("a");
        changed.config.params = json!({"n": 2});
        repo.update(&changed).unwrap();

        let stored = repo.get("a").unwrap().unwrap();
        assert_eq!(stored.config.params, json!({"n": 2}));
    }

    #[test]
    fn remove_reports_existence() {
        let repo = MemoryConfigRepository::new();
        repo.add(&record("a")).unwrap();
        assert!(repo.remove("a").unwrap());
        assert!(!repo.remove("a").unwrap());
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let repo = MemoryConfigRepository::new();
        for id in ["c", "a", "b"] {
            repo.add(&record(id)).unwrap();
        }
        let ids: Vec<_> = repo.get_all().unwrap().iter().map(|r| r.id().to_owned()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn config_record_roundtrips_through_json() {
        let original = record("sensor#1");
        let text = serde_json::to_string(&original).unwrap();
        let back: ConfigRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, original);
    }
}
