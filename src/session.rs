//! Session data and the durable session-id store

use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage key holding the opaque session id.
pub const SESSION_KEY: &str = "pe_session_id";

/// An authenticated backend session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque id issued by the backend. `None` when the backend recognised
    /// the caller through its cookie alone.
    pub session_id: Option<String>,
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub sandbox_mode: bool,
}

impl Session {
    /// Session handed back on the redirect URL.
    pub fn delivered(session_id: String, patient_id: Option<String>) -> Self {
        Self {
            session_id: Some(session_id),
            patient_id,
            expires_at: None,
            sandbox_mode: false,
        }
    }
}

/// Get/set/clear of the one stored session id.
///
/// Storage failures are logged and swallowed: `get` reads as `None`, writes
/// leave whatever was there before.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn Storage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn get(&self) -> Option<String> {
        match self.storage.get(SESSION_KEY) {
            Ok(value) => value.filter(|id| !id.is_empty()),
            Err(e) => {
                warn!(error = %e, "failed to read stored session");
                None
            }
        }
    }

    pub fn set(&self, session_id: &str) {
        match self.storage.set(SESSION_KEY, session_id) {
            Ok(()) => debug!("session stored"),
            Err(e) => warn!(error = %e, "failed to store session"),
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(SESSION_KEY) {
            warn!(error = %e, "failed to clear stored session");
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageError};

    /// Storage that fails every operation, like a browser in privacy mode.
    pub(crate) struct BrokenStorage;

    impl Storage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("privacy mode".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("privacy mode".into()))
        }
    }

    #[test]
    fn set_get_clear_roundtrip() {
        let store = SessionStore::new(Arc::new(MemoryStorage::new()));
        assert_eq!(store.get(), None);

        store.set("abc");
        assert_eq!(store.get().as_deref(), Some("abc"));

        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn set_overwrites_previous() {
        let store = SessionStore::new(Arc::new(MemoryStorage::new()));
        store.set("old");
        store.set("new");
        assert_eq!(store.get().as_deref(), Some("new"));
    }

    #[test]
    fn empty_value_reads_as_none() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(SESSION_KEY, "").unwrap();
        assert_eq!(SessionStore::new(storage).get(), None);
    }

    #[test]
    fn storage_failures_are_absorbed() {
        let store = SessionStore::new(Arc::new(BrokenStorage));
        store.set("abc");
        store.clear();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn session_serializes_camel_case() {
        let session = Session::delivered("abc".into(), Some("123".into()));
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"sessionId\":\"abc\""));
        assert!(json.contains("\"patientId\":\"123\""));
        assert!(!json.contains("expiresAt"));
    }
}
