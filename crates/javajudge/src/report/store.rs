//! Persisted verdict store
//!
//! One JSON file holding the latest verdict per (exercise, student). Every
//! save rewrites the whole file through a temporary file in the same
//! directory and renames it into place, so a crash leaves either the old or
//! the new file, never a torn one.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::model::{ExerciseVerdict, RecordKey};
use crate::report::VerdictMessage;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state file {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Stored state of one (exercise, student) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub verdict: ExerciseVerdict,
    /// Fingerprint of the submission the verdict judges
    pub fingerprint: String,
    /// Message forwarded to the control process, kept for re-sends
    pub message: VerdictMessage,
    /// Set until the message is acknowledged by the control process
    pub pending_resend: bool,
}

impl VerdictRecord {
    pub fn key(&self) -> RecordKey {
        self.verdict.key()
    }
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: Vec<VerdictRecord>,
}

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    records: BTreeMap<RecordKey, VerdictRecord>,
}

impl StateStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state file yet");
                return Ok(Self {
                    path,
                    records: BTreeMap::new(),
                });
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        let file: StoreFile = match serde_json::from_str(&text) {
            Ok(file) => file,
            Err(source) => return Err(StoreError::Parse { path, source }),
        };
        if file.version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path,
                version: file.version,
            });
        }

        let records = file
            .records
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &RecordKey) -> Option<&VerdictRecord> {
        self.records.get(key)
    }

    /// Insert or overwrite the record for its key
    pub fn upsert(&mut self, record: VerdictRecord) {
        self.records.insert(record.key(), record);
    }

    /// Returns `false` if there is no record for `key`
    pub fn set_pending(&mut self, key: &RecordKey, pending: bool) -> bool {
        match self.records.get_mut(key) {
            Some(record) => {
                record.pending_resend = pending;
                true
            }
            None => false,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &VerdictRecord> {
        self.records.values()
    }

    pub fn pending(&self) -> impl Iterator<Item = &VerdictRecord> {
        self.records.values().filter(|r| r.pending_resend)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Atomically replace the state file with the current records
    pub fn save(&self) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let file = StoreFile {
            version: STORE_VERSION,
            records: self.records.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|e| write_err(e.into()))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        debug!(path = %self.path.display(), records = self.records.len(), "state saved");
        Ok(())
    }
}
