use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::snapshot::schema::{GradeRecord, Snapshot};

/// Bump when the persisted document shape changes. Readers reject any
/// other version instead of guessing at the contents.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed accessing cache file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {path} is corrupt")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache file {path} is missing its schema version tag")]
    MissingVersion { path: PathBuf },
    #[error("cache file {path} has schema version {found}, this build reads {SCHEMA_VERSION}")]
    UnsupportedVersion { path: PathBuf, found: u64 },
}

/// What the last successful cycle left behind.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    pub snapshot: Snapshot,
    pub last_notified_at: Option<DateTime<Utc>>,
}

/// Durable persistence of the last accepted snapshot. Injected so tests
/// and alternate deployments can swap the backing store.
pub trait CacheStore {
    /// Empty state on first run or a missing file; a typed error when the
    /// stored data exists but cannot be trusted. Corruption must never be
    /// silently treated as "no prior grades" or every existing grade
    /// would be re-reported as new.
    fn load(&self) -> Result<CacheState, CacheError>;

    /// Replaces the stored snapshot so that a crashed writer or a
    /// concurrent reader never observes a partial document.
    fn commit(
        &self,
        snapshot: &Snapshot,
        last_notified_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    schema_version: u32,
    snapshot: BTreeMap<String, GradeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_notified_at: Option<DateTime<Utc>>,
}

/// JSON-file cache with write-to-temporary-then-rename commit semantics.
#[derive(Debug)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache".to_string());
        self.path.with_file_name(format!("{name}.tmp"))
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self) -> Result<CacheState, CacheError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no cache yet, starting from an empty snapshot");
            return Ok(CacheState::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;

        // The version tag is checked on the raw document first, so a
        // future shape change surfaces as "unsupported version" rather
        // than a generic parse failure.
        let value: serde_json::Value =
            serde_json::from_str(&data).map_err(|source| CacheError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        let found = value
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| CacheError::MissingVersion {
                path: self.path.clone(),
            })?;
        if found != u64::from(SCHEMA_VERSION) {
            return Err(CacheError::UnsupportedVersion {
                path: self.path.clone(),
                found,
            });
        }

        let document: CacheDocument =
            serde_json::from_value(value).map_err(|source| CacheError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        let snapshot = Snapshot::from_records(document.snapshot.into_values());
        debug!(records = snapshot.len(), "loaded cached snapshot");
        Ok(CacheState {
            snapshot,
            last_notified_at: document.last_notified_at,
        })
    }

    fn commit(
        &self,
        snapshot: &Snapshot,
        last_notified_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let document = CacheDocument {
            schema_version: SCHEMA_VERSION,
            snapshot: snapshot
                .iter()
                .map(|record| (record.key().storage_key(), record.clone()))
                .collect(),
            last_notified_at,
        };
        let data = serde_json::to_string_pretty(&document).map_err(|source| CacheError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let temp = self.temp_path();
        std::fs::write(&temp, data).map_err(|e| self.io_err(e))?;
        std::fs::rename(&temp, &self.path).map_err(|e| self.io_err(e))?;
        info!(path = %self.path.display(), records = snapshot.len(), "committed snapshot");
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    state: Mutex<CacheState>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: CacheState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn current(&self) -> CacheState {
        self.state.lock().expect("cache state lock poisoned").clone()
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self) -> Result<CacheState, CacheError> {
        Ok(self.current())
    }

    fn commit(
        &self,
        snapshot: &Snapshot,
        last_notified_at: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        let mut state = self.state.lock().expect("cache state lock poisoned");
        state.snapshot = snapshot.clone();
        state.last_notified_at = last_notified_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::schema::{GradeRecord, GradeValue};

    fn record(discipline: &str, value: GradeValue) -> GradeRecord {
        GradeRecord {
            period: "2024.2".to_string(),
            discipline: discipline.to_string(),
            section: Some("T01".to_string()),
            assessment: "Unid. 1".to_string(),
            value,
            observed_at: DateTime::parse_from_rfc3339("2024-11-05T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn missing_file_loads_as_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache.json"));

        let state = store.load().unwrap();
        assert!(state.snapshot.is_empty());
        assert!(state.last_notified_at.is_none());
    }

    #[test]
    fn commit_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache.json"));

        let snapshot = Snapshot::from_records(vec![
            record("Biology", GradeValue::Score(9.5)),
            record("Calculus", GradeValue::Pending),
        ]);
        let notified = Utc::now();
        store.commit(&snapshot, Some(notified)).unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.snapshot.len(), 2);
        assert_eq!(state.last_notified_at, Some(notified));
        let key = record("Biology", GradeValue::Pending).key();
        assert_eq!(
            state.snapshot.get(&key).unwrap().value,
            GradeValue::Score(9.5)
        );
    }

    #[test]
    fn commit_leaves_no_temporary_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache.json"));

        let snapshot = Snapshot::from_records(vec![record("Biology", GradeValue::Score(9.5))]);
        store.commit(&snapshot, None).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cache.json".to_string()]);
    }

    #[test]
    fn garbage_bytes_are_corrupt_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileCacheStore::new(&path);

        assert!(matches!(store.load(), Err(CacheError::Corrupt { .. })));
        // The broken bytes stay on disk for inspection.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(
            &path,
            r#"{"schema_version": 99, "snapshot": {}, "last_notified_at": null}"#,
        )
        .unwrap();
        let store = FileCacheStore::new(&path);

        assert!(matches!(
            store.load(),
            Err(CacheError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn document_without_version_tag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{"snapshot": {}}"#).unwrap();
        let store = FileCacheStore::new(&path);

        assert!(matches!(store.load(), Err(CacheError::MissingVersion { .. })));
    }
}
