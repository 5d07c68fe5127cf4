//! JSON-file-backed config repository.
//!
//! One file per module id under a store directory. Writes are atomic per
//! record: the new content goes to a temp file in the same directory, then a
//! rename replaces the target, so a crash mid-write leaves either the old or
//! the new record, never a mix. File names derive from the id with unsafe
//! characters sanitized deterministically; sanitization collisions get a
//! numeric suffix.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ConfigRecord, ConfigRepository, RepositoryError};

/// id -> file name, plus the record cache keyed by file name so `get_all`
/// iterates in file-name order.
#[derive(Default)]
struct Index {
    by_file: BTreeMap<String, ConfigRecord>,
    file_of: std::collections::HashMap<String, String>,
}

pub struct JsonConfigRepository {
    dir: PathBuf,
    index: RwLock<Index>,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl JsonConfigRepository {
    /// Open (or create) a store directory and load every `*.json` record.
    ///
    /// # Errors
    /// Fails if the directory cannot be created or read, a record cannot be
    /// parsed, or two files carry the same module id.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| RepositoryError::Persistence {
            path: dir.clone(),
            source,
        })?;

        let mut index = Index::default();
        let mut names: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|source| RepositoryError::Persistence {
                path: dir.clone(),
                source,
            })?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        names.sort();

        for path in names {
            let text =
                std::fs::read_to_string(&path).map_err(|source| RepositoryError::Persistence {
                    path: path.clone(),
                    source,
                })?;
            let record: ConfigRecord =
                serde_json::from_str(&text).map_err(|source| RepositoryError::Corrupt {
                    path: path.clone(),
                    source,
                })?;
            let file_name = file_name_of(&path);
            if index.file_of.contains_key(record.id()) {
                return Err(RepositoryError::DuplicateId {
                    id: record.id().to_owned(),
                });
            }
            index.file_of.insert(record.id().to_owned(), file_name.clone());
            index.by_file.insert(file_name, record);
        }

        tracing::debug!(dir = %dir.display(), records = index.by_file.len(), "Opened config store");

        Ok(Self {
            dir,
            index: RwLock::new(index),
            write_locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Pick a file name for a new id: sanitized id, then `-1`, `-2`, ... while
    /// the candidate is taken by another id.
    fn allocate_file_name(index: &Index, id: &str) -> String {
        let base = sanitize_id(id);
        let mut candidate = format!("{base}.json");
        let mut suffix = 0u32;
        while index.by_file.contains_key(&candidate) {
            suffix += 1;
            candidate = format!("{base}-{suffix}.json");
        }
        candidate
    }

    fn write_record(&self, file_name: &str, record: &ConfigRecord) -> Result<(), RepositoryError> {
        let path = self.dir.join(file_name);
        let persist = |source: std::io::Error| RepositoryError::Persistence {
            path: path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(record).map_err(|source| RepositoryError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(persist)?;
        tmp.write_all(&json).map_err(persist)?;
        tmp.as_file().sync_all().map_err(persist)?;
        tmp.persist(&path).map_err(|e| persist(e.error))?;
        Ok(())
    }
}

impl ConfigRepository for JsonConfigRepository {
    fn get_all(&self) -> Result<Vec<ConfigRecord>, RepositoryError> {
        Ok(self.index.read().by_file.values().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<ConfigRecord>, RepositoryError> {
        let index = self.index.read();
        Ok(index
            .file_of
            .get(id)
            .and_then(|f| index.by_file.get(f))
            .cloned())
    }

    fn add(&self, record: &ConfigRecord) -> Result<(), RepositoryError> {
        let lock = self.id_lock(record.id());
        let _guard = lock.lock();

        let file_name = {
            let index = self.index.read();
            if index.file_of.contains_key(record.id()) {
                return Err(RepositoryError::DuplicateId {
                    id: record.id().to_owned(),
                });
            }
            Self::allocate_file_name(&index, record.id())
        };

        self.write_record(&file_name, record)?;

        let mut index = self.index.write();
        index.file_of.insert(record.id().to_owned(), file_name.clone());
        index.by_file.insert(file_name, record.clone());
        Ok(())
    }

    fn update(&self, record: &ConfigRecord) -> Result<(), RepositoryError> {
        let lock = self.id_lock(record.id());
        let _guard = lock.lock();

        let file_name = {
            let index = self.index.read();
            match index.file_of.get(record.id()) {
                Some(existing) => existing.clone(),
                None => Self::allocate_file_name(&index, record.id()),
            }
        };

        self.write_record(&file_name, record)?;

        let mut index = self.index.write();
        index.file_of.insert(record.id().to_owned(), file_name.clone());
        index.by_file.insert(file_name, record.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, RepositoryError> {
        let lock = self.id_lock(id);
        let _guard = lock.lock();

        let Some(file_name) = self.index.read().file_of.get(id).cloned() else {
            return Ok(false);
        };

        let path = self.dir.join(&file_name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(RepositoryError::Persistence { path, source }),
        }

        let mut index = self.index.write();
        index.file_of.remove(id);
        index.by_file.remove(&file_name);
        Ok(true)
    }
}

fn file_name_of(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => String::new(),
    }
}

/// Deterministic file-name sanitization: ASCII alphanumerics, `-`, `_` and
/// `.` pass through, everything else (`#`, `:`, `/`, spaces, ...) becomes `_`.
pub(crate) fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "module".to_owned()
    } else {
        cleaned
    }
}
