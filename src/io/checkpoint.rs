//! Durable snapshot of keyed session state
//!
//! All sessions are written as one JSON document. The document is written to
//! a temp file in the same directory and renamed over the previous one, so a
//! crash mid-write leaves the last complete checkpoint in place.

use crate::domain::Plate;
use crate::services::session_processor::{MemoryStateStore, SessionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const CHECKPOINT_FILE: &str = "state.json";
const CHECKPOINT_TMP: &str = "state.json.tmp";
const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unsupported checkpoint version {0}")]
    Version(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    version: u32,
    saved_at: DateTime<Utc>,
    /// Sorted so checkpoints diff cleanly
    sessions: BTreeMap<Plate, SessionState>,
}

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    /// Persist every session, replacing the previous checkpoint
    pub fn save(&self, store: &MemoryStateStore, saved_at: DateTime<Utc>) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|source| io_error(&self.dir, source))?;

        let document = CheckpointDocument {
            version: CHECKPOINT_VERSION,
            saved_at,
            sessions: store.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let json = serde_json::to_vec_pretty(&document)?;

        let tmp = self.dir.join(CHECKPOINT_TMP);
        fs::write(&tmp, json).map_err(|source| io_error(&tmp, source))?;
        let path = self.path();
        fs::rename(&tmp, &path).map_err(|source| io_error(&path, source))?;

        debug!(path = %path.display(), sessions = %document.sessions.len(), "checkpoint_written");
        Ok(())
    }

    /// Load the last checkpoint; `Ok(None)` when none has been written yet
    pub fn load(&self) -> Result<Option<MemoryStateStore>, CheckpointError> {
        let path = self.path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&path, source)),
        };

        let document: CheckpointDocument = serde_json::from_slice(&bytes)?;
        if document.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Version(document.version));
        }

        info!(
            path = %path.display(),
            sessions = %document.sessions.len(),
            saved_at = %document.saved_at,
            "checkpoint_loaded"
        );
        Ok(Some(MemoryStateStore::from_entries(document.sessions)))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io { path: path.to_path_buf(), source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VehicleStatus;
    use crate::services::session_processor::StateStore;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn parked(at: DateTime<Utc>) -> SessionState {
        SessionState {
            location: "B4".into(),
            status: VehicleStatus::Parked,
            parked_start: Some(at),
            last_update: at,
            parked_blocks: 2,
            total_cost: 20_000,
        }
    }

    #[test]
    fn test_load_without_checkpoint() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("missing"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_restore_sessions() {
        let dir = tempdir().unwrap();
        let checkpoint = CheckpointStore::new(dir.path());
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();

        let mut states = MemoryStateStore::new();
        states.put(&"29A-12345".into(), parked(at));
        states.put(
            &"30B-12345".into(),
            SessionState { status: VehicleStatus::Moving, ..parked(at) },
        );
        checkpoint.save(&states, at).unwrap();

        let restored = checkpoint.load().unwrap().unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get(&"29A-12345".into()), Some(parked(at)));
        assert_eq!(restored.get(&"30B-12345".into()).unwrap().status, VehicleStatus::Moving);
        assert!(!dir.path().join(CHECKPOINT_TMP).exists());
    }

    #[test]
    fn test_save_replaces_previous() {
        let dir = tempdir().unwrap();
        let checkpoint = CheckpointStore::new(dir.path());
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();

        let mut states = MemoryStateStore::new();
        states.put(&"29A-12345".into(), parked(at));
        checkpoint.save(&states, at).unwrap();

        states.delete(&"29A-12345".into());
        checkpoint.save(&states, at).unwrap();

        assert!(checkpoint.load().unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CHECKPOINT_FILE), "{ not json").unwrap();
        let checkpoint = CheckpointStore::new(dir.path());
        assert!(matches!(checkpoint.load(), Err(CheckpointError::Encode(_))));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CHECKPOINT_FILE),
            r#"{"version": 99, "saved_at": "2025-05-01T08:00:00Z", "sessions": {}}"#,
        )
        .unwrap();
        let checkpoint = CheckpointStore::new(dir.path());
        assert!(matches!(checkpoint.load(), Err(CheckpointError::Version(99))));
    }
}
