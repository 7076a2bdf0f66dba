//! Durable session checkpoint storage.
//!
//! One JSON file per driver, written after every successful batch result so
//! a crash or restart can resume at the last cursor.

use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Session, SESSION_SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// File-backed session store.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the persisted session, if any.
    ///
    /// Checkpoints written by an unknown schema version are discarded rather
    /// than trusted; the same applies to unparseable files.
    pub fn load(&self) -> Result<Option<Session>, SessionError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(e) => {
                warn!("discarding unreadable session checkpoint: {}", e);
                self.clear()?;
                return Ok(None);
            }
        };
        if session.schema_version != SESSION_SCHEMA_VERSION {
            warn!(
                found = session.schema_version,
                expected = SESSION_SCHEMA_VERSION,
                "discarding session checkpoint with unknown schema version"
            );
            self.clear()?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Persist the session atomically (write-then-rename).
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(session)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(cursor = session.cursor, "session checkpoint saved");
        Ok(())
    }

    /// Remove the checkpoint (run completed, abandoned, or conflicting).
    pub fn clear(&self) -> Result<(), SessionError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BatchFilter;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        (dir, store)
    }

    #[test]
    fn round_trips_a_session() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_none());

        let mut session = Session::new(BatchFilter::missing_only(2));
        session.checkpoint(42, 2, 1, 1);
        store.save(&session).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.cursor, 42);
        assert_eq!(loaded.counters.succeeded, 1);
    }

    #[test]
    fn unknown_schema_version_is_discarded() {
        let (_dir, store) = store();
        let mut session = Session::new(BatchFilter::missing_only(2));
        session.schema_version = 99;
        store.save(&session).unwrap();

        assert!(store.load().unwrap().is_none());
        // File was cleaned up too.
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_checkpoint_is_discarded() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn clear_is_idempotent() {
        let (_dir, store) = store();
        store.clear().unwrap();
        let session = Session::new(BatchFilter::missing_only(2));
        store.save(&session).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
