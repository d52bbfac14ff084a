// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Embedded single-writer key-value store.
//!
//! The full map lives in memory as a `BTreeMap`; durability comes from
//! logging every mutation batch to the WAL before applying it, with
//! periodic compaction into a compressed snapshot. All higher layers
//! (job records, queue, logs) are built on these primitives.
//!
//! Writers serialize on one lock, which is what makes `update` an atomic
//! read-modify-write. Readers see a consistent map under the shared lock.

use crate::snapshot::{Snapshot, SnapshotError};
use crate::wal::{Op, Wal, WalError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Mutations applied past this count trigger an automatic checkpoint.
const CHECKPOINT_EVERY_OPS: u64 = 10_000;

/// Backoff before the single retry of a failed WAL write.
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

const WAL_FILE: &str = "store.wal";
const SNAPSHOT_FILE: &str = "store.snap";

/// Errors surfaced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persistence layer failed twice in a row; callers should treat
    /// the store as down.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Wal(#[from] WalError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Outcome of an [`Store::update`] closure.
pub enum Update {
    /// Leave the key untouched (used to abort without writing).
    Keep,
    Set(Vec<u8>),
    Delete,
}

struct Inner {
    map: BTreeMap<String, Vec<u8>>,
    wal: Wal,
    ops_since_checkpoint: u64,
}

/// Embedded persistent key-value store. Cheap to share via `Arc`.
pub struct Store {
    inner: RwLock<Inner>,
    dir: PathBuf,
}

impl Store {
    /// Open the store rooted at `dir`, recovering state from the snapshot
    /// plus WAL replay.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let snap_path = dir.join(SNAPSHOT_FILE);
        let wal_path = dir.join(WAL_FILE);

        let mut map = match Snapshot::load(&snap_path)? {
            Some(snapshot) => {
                debug!(seq = snapshot.seq, keys = snapshot.entries.len(), "loaded snapshot");
                snapshot.entries
            }
            None => BTreeMap::new(),
        };

        let entries = Wal::read_all(&wal_path)?;
        for entry in &entries {
            for op in &entry.batch {
                apply_op(&mut map, op.clone());
            }
        }
        if !entries.is_empty() {
            debug!(replayed = entries.len(), "replayed WAL entries");
        }

        let wal = Wal::open(&wal_path)?;
        Ok(Self {
            inner: RwLock::new(Inner { map, wal, ops_since_checkpoint: 0 }),
            dir: dir.to_owned(),
        })
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read().map.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Vec<u8>) -> Result<(), StoreError> {
        self.apply(vec![Op::set(key, value)])
    }

    pub fn delete(&self, key: impl Into<String>) -> Result<(), StoreError> {
        self.apply(vec![Op::delete(key)])
    }

    /// Atomically replace `key` only when its current value matches
    /// `expected` (`None` = key absent). Returns whether the swap happened.
    pub fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        if inner.map.get(key).map(|v| v.as_slice()) != expected {
            return Ok(false);
        }
        let op = match new {
            Some(value) => Op::set(key, value),
            None => Op::delete(key),
        };
        Self::commit(&mut inner, vec![op])?;
        drop(inner);
        self.maybe_checkpoint();
        Ok(true)
    }

    /// Atomic read-modify-write of a single key. The closure sees the
    /// current value and decides what to write.
    pub fn update(
        &self,
        key: &str,
        f: impl FnOnce(Option<&[u8]>) -> Update,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let op = match f(inner.map.get(key).map(|v| v.as_slice())) {
            Update::Keep => return Ok(()),
            Update::Set(value) => Op::set(key, value),
            Update::Delete => Op::delete(key),
        };
        Self::commit(&mut inner, vec![op])?;
        drop(inner);
        self.maybe_checkpoint();
        Ok(())
    }

    /// Apply a batch of ops atomically: either the whole batch is logged
    /// and applied, or none of it is.
    pub fn apply(&self, batch: Vec<Op>) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write();
        Self::commit(&mut inner, batch)?;
        drop(inner);
        self.maybe_checkpoint();
        Ok(())
    }

    /// Ordered scan of every `(key, value)` pair under `prefix`.
    pub fn scan(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        let inner = self.inner.read();
        inner
            .map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Ordered scan of keys under `prefix`.
    pub fn scan_keys(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Force buffered WAL entries to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.inner.write().wal.flush()?;
        Ok(())
    }

    /// Write a snapshot of the current map and truncate the WAL.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.wal.flush()?;
        let snapshot =
            Snapshot::new(inner.wal.write_seq(), inner.map.clone(), chrono::Utc::now());
        snapshot.write(&self.dir.join(SNAPSHOT_FILE))?;
        inner.wal.reset()?;
        inner.ops_since_checkpoint = 0;
        debug!(keys = snapshot.entries.len(), "checkpoint written");
        Ok(())
    }

    /// Log and apply a batch under the held write lock, retrying the WAL
    /// write once before giving up with [`StoreError::Unavailable`].
    fn commit(inner: &mut Inner, batch: Vec<Op>) -> Result<(), StoreError> {
        inner.wal.append(&batch)?;
        if inner.wal.needs_flush() {
            if let Err(first) = inner.wal.flush() {
                warn!(error = %first, "WAL flush failed, retrying once");
                std::thread::sleep(RETRY_BACKOFF);
                inner
                    .wal
                    .flush()
                    .map_err(|e| StoreError::Unavailable(format!("{first}; retry: {e}")))?;
            }
        }
        inner.ops_since_checkpoint += batch.len() as u64;
        for op in batch {
            apply_op(&mut inner.map, op);
        }
        Ok(())
    }

    fn maybe_checkpoint(&self) {
        let due = self.inner.read().ops_since_checkpoint >= CHECKPOINT_EVERY_OPS;
        if due {
            if let Err(e) = self.checkpoint() {
                warn!(error = %e, "automatic checkpoint failed");
            }
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.inner.write().wal.flush() {
            warn!(error = %e, "failed to flush WAL on close");
        }
    }
}

fn apply_op(map: &mut BTreeMap<String, Vec<u8>>, op: Op) {
    match op {
        Op::Set { key, value } => {
            map.insert(key, value);
        }
        Op::Delete { key } => {
            map.remove(&key);
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
