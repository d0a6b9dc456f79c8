//! Durable key/value storage backing the session id and the attempt stamp.
//!
//! - **FileStorage** (`state.json`): one JSON object of string values, saved to
//!   the platform data directory. Survives the full-page OAuth round trip.
//! - **MemoryStorage**: process-local map, used by tests and `--ephemeral` runs.
//!
//! Callers never see raw I/O here; [`crate::SessionStore`] and
//! [`crate::LoopGuard`] absorb every [`StorageError`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Failure of a single storage operation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage contents are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable string storage, one atomic operation per call.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

type Entries = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// JSON-file storage. Each write rewrites the whole file atomically.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at `<data dir>/triage-auth/state.json`.
    pub fn in_data_dir() -> Result<Self, StorageError> {
        let dir = data_dir()
            .ok_or_else(|| StorageError::Unavailable("data dir not found".to_string()))?;
        Ok(Self::new(dir.join("state.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Entries, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load for a read-modify-write. Unparseable contents are replaced, so a
    /// corrupt file heals on the next write. The flag reports a reset.
    fn load_for_write(&self) -> Result<(Entries, bool), StorageError> {
        match self.load() {
            Ok(entries) => Ok((entries, false)),
            Err(StorageError::Json(e)) => {
                warn!(path = %self.path.display(), error = %e, "discarding unparseable storage file");
                Ok((Entries::new(), true))
            }
            Err(e) => Err(e),
        }
    }

    fn save(&self, entries: &Entries) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        atomic_write(&self.path, json.as_bytes())?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let (mut entries, _) = self.load_for_write()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let (mut entries, reset) = self.load_for_write()?;
        if entries.remove(key).is_none() && !reset {
            return Ok(());
        }
        self.save(&entries)
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<Entries>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, Entries>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries()?.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Directory helpers
// ---------------------------------------------------------------------------

/// Data directory (e.g. `~/Library/Application Support/triage-auth/`).
fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("triage-auth"))
}

/// Write bytes to a file atomically: write to a temp file in the same
/// directory, then rename over the target. Prevents partial JSON on crash.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), std::io::Error> {
    use std::io::Write;

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_storage_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let storage = FileStorage::new(tmp.path().join("state.json"));

        storage.set("pe_session_id", "session_abc").unwrap();
        assert_eq!(
            storage.get("pe_session_id").unwrap().as_deref(),
            Some("session_abc")
        );

        storage.remove("pe_session_id").unwrap();
        assert!(storage.get("pe_session_id").unwrap().is_none());
    }

    #[test]
    fn file_storage_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let storage = FileStorage::new(tmp.path().join("nested").join("state.json"));
        assert!(storage.get("anything").unwrap().is_none());
        storage.remove("anything").unwrap();
        assert!(!storage.path().exists());
    }

    #[test]
    fn file_storage_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a").join("b").join("state.json");
        let storage = FileStorage::new(&path);
        storage.set("k", "v").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn file_storage_keeps_other_keys() {
        let tmp = TempDir::new().unwrap();
        let storage = FileStorage::new(tmp.path().join("state.json"));
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        storage.remove("a").unwrap();
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn file_storage_invalid_json_reads_as_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "not valid json!!!").unwrap();
        let storage = FileStorage::new(&path);
        assert!(matches!(storage.get("k"), Err(StorageError::Json(_))));
    }

    #[test]
    fn file_storage_write_replaces_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, r#"{"pe_session_id": "#).unwrap();
        let storage = FileStorage::new(&path);

        storage.set("k", "v").unwrap();

        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        assert!(storage.get("pe_session_id").unwrap().is_none());
    }

    #[test]
    fn file_storage_remove_replaces_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{").unwrap();
        let storage = FileStorage::new(&path);

        storage.remove("k").unwrap();

        assert!(storage.get("k").unwrap().is_none());
    }

    #[test]
    fn memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.get("k").unwrap().is_none());
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        storage.remove("k").unwrap();
        assert!(storage.get("k").unwrap().is_none());
    }
}
