//! Staging queue: keyed, coalescing hand-off between ingress and the worker.
//!
//! Persists a [`QueueFile`] JSON document at `<home>/.tasksheet/queue.json`.
//! Every mutation is load → modify → atomic `.tmp` + rename save, held under
//! an exclusive `fs2` lock on `queue.json.lock`. The daemon, a `--local` CLI
//! run and any number of handles in one process therefore never interleave
//! their read-modify-write cycles. Reads take the shared lock.
//!
//! Entries are keyed by task key: enqueueing a key that is already waiting
//! replaces its payload (last write wins). [`StagingQueue::drain`] removes
//! entries at dequeue time; a crash between drain and write loses them.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, SyncError};

/// One waiting task change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub key: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

/// On-disk queue payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueFile {
    #[serde(default)]
    pub entries: BTreeMap<String, QueueEntry>,
}

/// `~/.tasksheet/queue.json`
pub fn queue_path_at(home: &Path) -> PathBuf {
    home.join(".tasksheet").join("queue.json")
}

#[derive(Debug)]
pub struct StagingQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StagingQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Queue stored under `home`'s `.tasksheet/` directory.
    pub fn at(home: &Path) -> Self {
        Self::new(queue_path_at(home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar lock file guarding the queue document across processes.
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open the lock file and take an exclusive or shared lock on it. The
    /// lock is released when the returned handle drops.
    fn file_lock(&self, exclusive: bool) -> Result<File, SyncError> {
        let lock_path = self.lock_path();
        if let Some(dir) = lock_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| io_err(&lock_path, e))?;
        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|e| io_err(&lock_path, e))?;
        Ok(file)
    }

    /// Insert or replace the payload waiting for `key`.
    ///
    /// The payload's `key` field is set to `key`, so the entry coalesced here
    /// is the one written under that key.
    pub fn enqueue(&self, key: &str, payload: Value) -> Result<QueueEntry, SyncError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(SyncError::EmptyKey);
        }
        let mut payload = payload;
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("key".to_string(), Value::String(key.to_string()));
        }
        let entry = QueueEntry {
            key: key.to_string(),
            payload,
            enqueued_at: Utc::now(),
        };

        let _guard = self.guard();
        let _lock = self.file_lock(true)?;
        let mut file = self.load()?;
        let replaced = file.entries.insert(key.to_string(), entry.clone()).is_some();
        self.save(&file)?;
        tracing::debug!(key, replaced, depth = file.entries.len(), "enqueued task change");
        Ok(entry)
    }

    /// Remove and return every waiting entry, oldest first.
    pub fn drain(&self) -> Result<Vec<QueueEntry>, SyncError> {
        let _guard = self.guard();
        let _lock = self.file_lock(true)?;
        let file = self.load()?;
        if file.entries.is_empty() {
            return Ok(Vec::new());
        }
        self.save(&QueueFile::default())?;
        let mut entries: Vec<QueueEntry> = file.entries.into_values().collect();
        entries.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    /// Put drained entries back unless a newer payload for the same key
    /// arrived in the meantime. Returns how many were restored.
    pub fn requeue(&self, entries: Vec<QueueEntry>) -> Result<usize, SyncError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let _guard = self.guard();
        let _lock = self.file_lock(true)?;
        let mut file = self.load()?;
        let mut restored = 0;
        for entry in entries {
            if !file.entries.contains_key(&entry.key) {
                file.entries.insert(entry.key.clone(), entry);
                restored += 1;
            }
        }
        self.save(&file)?;
        Ok(restored)
    }

    /// Snapshot of waiting entries, oldest first, without removing them.
    pub fn pending(&self) -> Result<Vec<QueueEntry>, SyncError> {
        let _guard = self.guard();
        let _lock = self.file_lock(false)?;
        let mut entries: Vec<QueueEntry> = self.load()?.entries.into_values().collect();
        entries.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize, SyncError> {
        let _guard = self.guard();
        let _lock = self.file_lock(false)?;
        Ok(self.load()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, SyncError> {
        Ok(self.len()? == 0)
    }

    /// Empty queue if the file does not exist yet.
    fn load(&self) -> Result<QueueFile, SyncError> {
        if !self.path.exists() {
            return Ok(QueueFile::default());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        if contents.trim().is_empty() {
            return Ok(QueueFile::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, file: &QueueFile) -> Result<(), SyncError> {
        let Some(dir) = self.path.parent() else {
            return Err(io_err(
                &self.path,
                std::io::Error::other("invalid queue path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}
