//! StateBackend trait: pluggable storage for the notification ledger
//!
//! Keeps the store independent of the medium so the ledger can live in a
//! JSON file or an embedded database without touching pipeline code:
//! - `JsonFileStateBackend`: single JSON file, replaced atomically on save
//! - `SledStateBackend`: one sled tree, one key per event, batch-applied
//! - `MemoryStateBackend`: shared in-memory copy for tests and dry runs

use super::notification_state::{NotificationEntry, NotificationState};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// State persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("state database error: {0}")]
    Database(String),
}

impl From<sled::Error> for StateError {
    fn from(err: sled::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Where the notification ledger is kept between runs.
///
/// Single-writer: implementations do no locking, overlapping runs against the
/// same backend must be prevented by whoever schedules them.
pub trait StateBackend: Send {
    /// Read the persisted state, `None` if nothing has been saved yet.
    fn load(&self) -> Result<Option<NotificationState>, StateError>;

    /// Replace the persisted state with `state` in one step.
    fn save(&self, state: &NotificationState) -> Result<(), StateError>;

    /// Remove everything.
    fn clear(&self) -> Result<(), StateError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// JSON file
// ============================================================================

/// One JSON document on disk.
///
/// Saves go to `<path>.tmp`, are fsynced, then renamed over the target, so a
/// crash mid-write leaves the previous version intact.
#[derive(Debug, Clone)]
pub struct JsonFileStateBackend {
    path: PathBuf,
}

impl JsonFileStateBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateBackend for JsonFileStateBackend {
    fn load(&self) -> Result<Option<NotificationState>, StateError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No notification state file yet");
            return Ok(None);
        }
        let data = fs::read(&self.path).map_err(|e| self.io_err(e))?;
        match serde_json::from_slice::<NotificationState>(&data) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // Keep the unreadable file for inspection and start over.
                let aside = self.path.with_extension("json.corrupt");
                error!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "Corrupted notification state, starting empty"
                );
                fs::rename(&self.path, &aside).map_err(|e| self.io_err(e))?;
                Ok(None)
            }
        }
    }

    fn save(&self, state: &NotificationState) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(state)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| self.io_err(e))?;
            file.write_all(&json).map_err(|e| self.io_err(e))?;
            file.sync_all().map_err(|e| self.io_err(e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_err(e))?;
        debug!(
            path = %self.path.display(),
            entries = state.entries.len(),
            "Notification state saved"
        );
        Ok(())
    }

    fn clear(&self) -> Result<(), StateError> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| self.io_err(e))?;
            info!(path = %self.path.display(), "Cleared notification state");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "json-file"
    }
}

// ============================================================================
// sled
// ============================================================================

/// Named sled tree, one key per event ID with a JSON entry as value.
pub struct SledStateBackend {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStateBackend {
    const TREE_NAME: &'static str = "notifications";

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { db, tree })
    }
}

impl StateBackend for SledStateBackend {
    fn load(&self) -> Result<Option<NotificationState>, StateError> {
        if self.tree.is_empty() {
            return Ok(None);
        }
        let mut entries = BTreeMap::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            let event_id = String::from_utf8_lossy(&key).into_owned();
            match serde_json::from_slice::<NotificationEntry>(&value) {
                Ok(entry) => {
                    entries.insert(event_id, entry);
                }
                Err(e) => {
                    error!(event = %event_id, error = %e, "Corrupted notification entry, skipping");
                }
            }
        }
        Ok(Some(NotificationState { entries }))
    }

    fn save(&self, state: &NotificationState) -> Result<(), StateError> {
        let mut batch = sled::Batch::default();
        for item in self.tree.iter().keys() {
            let key = item?;
            let keep = state
                .entries
                .contains_key(String::from_utf8_lossy(&key).as_ref());
            if !keep {
                batch.remove(key);
            }
        }
        for (event_id, entry) in &state.entries {
            batch.insert(event_id.as_bytes(), serde_json::to_vec(entry)?);
        }
        self.tree.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StateError> {
        self.tree.clear()?;
        self.db.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-memory backend. Clones share the same slot, so dropping a store and
/// loading a new one from a clone behaves like a process restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateBackend {
    slot: Arc<Mutex<Option<NotificationState>>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<NotificationState>>, StateError> {
        self.slot
            .lock()
            .map_err(|e| StateError::Database(e.to_string()))
    }
}

impl StateBackend for MemoryStateBackend {
    fn load(&self) -> Result<Option<NotificationState>, StateError> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, state: &NotificationState) -> Result<(), StateError> {
        *self.lock()? = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StateError> {
        *self.lock()? = None;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::notification_state::NotificationWindow;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn sample_state() -> NotificationState {
        let mut state = NotificationState::default();
        let instant = Utc.with_ymd_and_hms(2030, 1, 1, 18, 0, 0).unwrap();
        let mut entry = NotificationEntry::new(instant, Utc::now());
        entry.windows_sent.insert(NotificationWindow::DAY_BEFORE);
        state.entries.insert("2030-01-01 1800|Net".to_string(), entry);
        state
    }

    #[test]
    fn json_round_trip_via_rename() {
        let dir = tempdir().unwrap();
        let backend = JsonFileStateBackend::new(dir.path().join("state.json"));
        assert!(backend.load().unwrap().is_none());

        backend.save(&sample_state()).unwrap();
        assert!(backend.path().exists());
        assert!(!dir.path().join("state.json.tmp").exists());

        let loaded = backend.load().unwrap().unwrap();
        assert_eq!(loaded, sample_state());
    }

    #[test]
    fn json_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let backend = JsonFileStateBackend::new(dir.path().join("nested/deeper/state.json"));
        backend.save(&sample_state()).unwrap();
        assert!(backend.load().unwrap().is_some());
    }

    #[test]
    fn json_corrupted_file_is_moved_aside() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").unwrap();
        let backend = JsonFileStateBackend::new(&path);
        assert!(backend.load().unwrap().is_none());
        assert!(!path.exists());
        assert!(dir.path().join("state.json.corrupt").exists());
    }

    #[test]
    fn json_clear() {
        let dir = tempdir().unwrap();
        let backend = JsonFileStateBackend::new(dir.path().join("state.json"));
        backend.save(&sample_state()).unwrap();
        backend.clear().unwrap();
        assert!(backend.load().unwrap().is_none());
        // Clearing twice is fine
        backend.clear().unwrap();
    }

    #[test]
    fn sled_round_trip_and_removal() {
        let dir = tempdir().unwrap();
        let backend = SledStateBackend::open(dir.path().join("state.db")).unwrap();
        assert!(backend.load().unwrap().is_none());

        backend.save(&sample_state()).unwrap();
        assert_eq!(backend.load().unwrap().unwrap(), sample_state());

        backend.save(&NotificationState::default()).unwrap();
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn memory_clones_share_storage() {
        let a = MemoryStateBackend::new();
        let b = a.clone();
        a.save(&sample_state()).unwrap();
        assert_eq!(b.load().unwrap().unwrap(), sample_state());
        b.clear().unwrap();
        assert!(a.load().unwrap().is_none());
    }

    #[test]
    fn trait_object() {
        let backend: Box<dyn StateBackend> = Box::new(MemoryStateBackend::new());
        assert_eq!(backend.backend_name(), "memory");
    }
}
