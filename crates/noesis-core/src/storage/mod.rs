//! Data-directory persistence.
//!
//! Every store owns one file under the data directory. Writes go through
//! [`FileStore`]: serialize, write a temp file in the same directory, fsync,
//! rename over the target. The previous version is kept as a `.bak` sibling
//! and is consulted when a load fails its schema check.
//!
//! The directory itself is guarded by an exclusive advisory lock file so a
//! second instance targeting the same directory fails fast.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{Result, SubstrateError};

/// File names inside the data directory
pub mod files {
    /// Thought records
    pub const THOUGHTS: &str = "thoughts.json";
    /// Association edge map
    pub const ASSOCIATIONS: &str = "thought_associations.json";
    /// Flat vector index blob
    pub const VECTOR_INDEX: &str = "vector_index.bin";
    /// Row-to-thought-id companion map
    pub const INDEX_META: &str = "index_meta";
    /// Concept records
    pub const CONCEPTS: &str = "evolved_concepts.json";
    /// Prompt pattern store
    pub const PATTERNS: &str = "prompt_patterns.json";
    /// Scheduler job state and mood vector
    pub const SCHEDULER: &str = "scheduler_state.json";
    /// Event log directory
    pub const LOGS_DIR: &str = "logs";
    /// Advisory lock file
    pub const LOCK: &str = ".lock";
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{suffix}"))
}

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// fsync, rename. Keeps the previous content as `<name>.bak`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SubstrateError::persistence(path, e))?;
    }

    if path.exists() {
        if let Err(e) = fs::copy(path, sibling(path, "bak")) {
            warn!(path = %path.display(), error = %e, "could not refresh backup");
        }
    }

    let tmp = sibling(path, "tmp");
    let mut file = File::create(&tmp).map_err(|e| SubstrateError::persistence(&tmp, e))?;
    file.write_all(bytes)
        .map_err(|e| SubstrateError::persistence(&tmp, e))?;
    file.sync_all()
        .map_err(|e| SubstrateError::persistence(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| SubstrateError::persistence(path, e))?;
    Ok(())
}

/// One JSON file with a process-wide write lock.
pub struct FileStore {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl FileStore {
    /// Bind a store to `dir/name`
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
            write_guard: Mutex::new(()),
        }
    }

    /// The file this store owns
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `value` as pretty-printed JSON, atomically
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        let _guard = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| SubstrateError::corrupt(&self.path, format!("serialize: {e}")))?;
        atomic_write(&self.path, &bytes)
    }

    /// Load and schema-check the file. A missing file yields `default`; a
    /// corrupt file falls back to the `.bak` sibling before giving up.
    pub fn load_or<T: DeserializeOwned>(&self, default: T) -> Result<T> {
        if !self.path.exists() {
            return Ok(default);
        }
        match Self::parse(&self.path) {
            Ok(value) => Ok(value),
            Err(primary) => {
                let backup = sibling(&self.path, "bak");
                if backup.exists() {
                    warn!(path = %self.path.display(), "store corrupt, recovering from backup");
                    if let Ok(value) = Self::parse::<T>(&backup) {
                        return Ok(value);
                    }
                }
                Err(primary)
            }
        }
    }

    fn parse<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let bytes = fs::read(path).map_err(|e| SubstrateError::persistence(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| SubstrateError::corrupt(path, e.to_string()))
    }
}

/// Exclusive advisory lock over the data directory.
///
/// Held for the lifetime of the substrate; dropped on shutdown. A second
/// instance finds the lock file and exits with the directory-locked error.
#[derive(Debug)]
pub struct DirectoryLock {
    path: PathBuf,
}

impl DirectoryLock {
    /// Acquire the lock for `dir`, creating the directory if needed.
    ///
    /// A lock file whose recorded process is no longer alive is stale (the
    /// holder crashed) and is reclaimed.
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| SubstrateError::persistence(dir, e))?;
        let path = dir.join(files::LOCK);

        if path.exists() && Self::is_stale(&path) {
            warn!(path = %path.display(), "reclaiming stale directory lock");
            let _ = fs::remove_file(&path);
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    SubstrateError::DirectoryLocked(dir.to_path_buf())
                }
                _ => SubstrateError::persistence(&path, e),
            })?;
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }

    fn is_stale(path: &Path) -> bool {
        let Some(pid) = fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
        else {
            // Unreadable lock content is treated as held; never steal a
            // lock we cannot attribute
            return false;
        };
        if pid == std::process::id() {
            return false;
        }
        #[cfg(target_os = "linux")]
        {
            !Path::new(&format!("/proc/{pid}")).exists()
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not release directory lock");
        }
    }
}

/// Append-only JSON-per-line event log under `logs/`.
///
/// Best-effort: a failed append is logged and swallowed so observability
/// never takes down a cognitive operation.
pub struct EventLog {
    file: Mutex<File>,
}

impl EventLog {
    /// Open (or create) `logs/events.jsonl` under `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let logs_dir = dir.join(files::LOGS_DIR);
        fs::create_dir_all(&logs_dir).map_err(|e| SubstrateError::persistence(&logs_dir, e))?;
        let path = logs_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SubstrateError::persistence(&path, e))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one event record
    pub fn append(&self, event: &str, data: serde_json::Value) {
        let record = serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(file, "{record}") {
            warn!(event, error = %e, "event log append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "sample.json");
        let value = Sample {
            name: "alpha".to_string(),
            count: 3,
        };
        store.save(&value).unwrap();
        let loaded: Sample = store
            .load_or(Sample {
                name: String::new(),
                count: 0,
            })
            .unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "absent.json");
        let loaded: Vec<u32> = store.load_or(vec![7]).unwrap();
        assert_eq!(loaded, vec![7]);
    }

    #[test]
    fn test_backup_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "sample.json");
        let value = Sample {
            name: "alpha".to_string(),
            count: 1,
        };
        store.save(&value).unwrap();
        // Second save creates the .bak of the first version
        store
            .save(&Sample {
                name: "beta".to_string(),
                count: 2,
            })
            .unwrap();

        // Corrupt the live file; load falls back to the backup, which holds
        // the previous generation
        fs::write(store.path(), b"{ not json").unwrap();
        let loaded: Sample = store
            .load_or(Sample {
                name: String::new(),
                count: 0,
            })
            .unwrap();
        assert_eq!(loaded.name, "alpha");
    }

    #[test]
    fn test_corrupt_without_backup_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "sample.json");
        fs::write(store.path(), b"][").unwrap();
        let err = store.load_or(Sample {
            name: String::new(),
            count: 0,
        });
        match err {
            Err(SubstrateError::CorruptState { .. }) => {}
            other => panic!("expected corrupt-state, got {other:?}"),
        }
    }

    #[test]
    fn test_directory_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DirectoryLock::acquire(dir.path()).unwrap();
        let second = DirectoryLock::acquire(dir.path());
        match second {
            Err(SubstrateError::DirectoryLocked(_)) => {}
            other => panic!("expected directory-locked, got {other:?}"),
        }
        drop(lock);
        // Released on drop; a third acquisition succeeds
        DirectoryLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn test_event_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        log.append("thought_saved", serde_json::json!({"id": "t-1"}));
        log.append("decay", serde_json::json!({"decayed": 4}));

        let contents =
            fs::read_to_string(dir.path().join(files::LOGS_DIR).join("events.jsonl")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(record.get("ts").is_some());
            assert!(record.get("event").is_some());
        }
    }
}
