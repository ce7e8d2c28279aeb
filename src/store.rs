use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, SubpipeError};

/// Prefix of in-flight snapshot files. Anything with this prefix is an
/// unpublished write and never visible under a snapshot key.
const PENDING_PREFIX: &str = ".pending-";

/// The two hand-off points between pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotKey {
    Transcription,
    Translation,
}

impl SnapshotKey {
    pub const ALL: [SnapshotKey; 2] = [SnapshotKey::Transcription, SnapshotKey::Translation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Translation => "translation",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable JSON snapshots shared between the controller and stage workers.
///
/// A snapshot becomes visible only once it is completely written and synced:
/// it is serialized into a temporary file in the same directory, fsynced and
/// renamed over the final name.
#[derive(Debug, Clone)]
pub struct InterchangeStore {
    root: PathBuf,
}

impl InterchangeStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| SubpipeError::IoWrite {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: SnapshotKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    pub fn contains(&self, key: SnapshotKey) -> bool {
        self.path(key).is_file()
    }

    /// Write `value` under `key`, replacing any previous snapshot atomically.
    pub fn publish<T: Serialize>(&self, key: SnapshotKey, value: &T) -> Result<PathBuf> {
        let target = self.path(key);
        let write_err = |e: std::io::Error| SubpipeError::IoWrite {
            path: target.clone(),
            source: e,
        };

        let pending = tempfile::Builder::new()
            .prefix(PENDING_PREFIX)
            .suffix(".json")
            .tempfile_in(&self.root)
            .map_err(write_err)?;

        {
            let mut writer = BufWriter::new(pending.as_file());
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.write_all(b"\n").map_err(write_err)?;
            writer.flush().map_err(write_err)?;
        }
        pending.as_file().sync_all().map_err(write_err)?;

        pending.persist(&target).map_err(|e| write_err(e.error))?;
        debug!("Published {} snapshot: {}", key, target.display());
        Ok(target)
    }

    /// Read and deserialize the snapshot stored under `key`.
    pub fn load<T: DeserializeOwned>(&self, key: SnapshotKey) -> Result<T> {
        let path = self.path(key);
        let content = fs::read_to_string(&path).map_err(|e| SubpipeError::Snapshot {
            key: key.to_string(),
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;

        serde_json::from_str(&content).map_err(|e| SubpipeError::Snapshot {
            key: key.to_string(),
            reason: format!("malformed JSON in {}: {}", path.display(), e),
        })
    }

    /// Delete the snapshot under `key`. Returns whether a file was removed.
    pub fn remove(&self, key: SnapshotKey) -> Result<bool> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of every snapshot and of abandoned pending writes.
    /// Failures are logged; returns the number of files removed.
    pub fn clear(&self) -> usize {
        let mut removed = 0;

        for key in SnapshotKey::ALL {
            match self.remove(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to remove {} snapshot: {}", key, e),
            }
        }

        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.filter_map(|e| e.ok()) {
                let is_pending = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(PENDING_PREFIX));
                if !is_pending {
                    continue;
                }
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
                }
            }
        }

        removed
    }
}
