// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL write-ahead log of key-value op batches, with group commit.
//!
//! Every store mutation is durably logged before it is applied to the
//! in-memory map, enabling crash recovery via snapshot + replay. Group
//! commit batches fsyncs (~10ms) for performance.
//!
//! Each entry is a single line of JSON: `{"seq":N,"batch":[ops…]}\n`

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Flush interval for group commit (~10ms batches)
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum entries to buffer before forcing flush
const FLUSH_THRESHOLD: usize = 100;

/// Errors that can occur in Wal operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single key-value mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl Op {
    pub fn set(key: impl Into<String>, value: Vec<u8>) -> Self {
        Op::Set { key: key.into(), value }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Op::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Op::Set { key, .. } | Op::Delete { key } => key,
        }
    }
}

/// Serialization helper for writing WAL entries without cloning the batch.
#[derive(Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    batch: &'a [Op],
}

/// Deserialization helper for reading WAL entries.
#[derive(Deserialize)]
struct WalRecord {
    seq: u64,
    batch: Vec<Op>,
}

/// A replayed WAL entry with its sequence number.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub batch: Vec<Op>,
}

/// JSONL WAL for durable op-batch storage with group commit.
///
/// Batches are buffered in memory and flushed to disk either:
/// - When `needs_flush()` returns true (interval elapsed or buffer full)
/// - Explicitly via `flush()`
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Highest sequence number written (next append gets `write_seq + 1`)
    write_seq: u64,
    /// Buffered JSON lines waiting to be flushed (without trailing newline)
    write_buffer: Vec<Vec<u8>>,
    /// Last flush timestamp for interval checking
    last_flush: Instant,
}

impl Wal {
    /// Open or create a WAL at the given path.
    ///
    /// Scans existing entries to find the write sequence. A corrupt tail
    /// (torn write from a crash) rotates the file to `.bak` and rewrites
    /// it with only the valid prefix.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).read(true).append(true).open(path)?;

        let (mut write_seq, corrupt) = Self::scan(&file)?;

        if corrupt {
            let valid_lines = Self::read_valid_lines(&file)?;
            drop(file);

            let bak_path = crate::snapshot::rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid_lines.len(),
                "Corrupt WAL detected, rotating to .bak and preserving valid entries",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut new_file = File::create(path)?;
                for line in &valid_lines {
                    new_file.write_all(line.as_bytes())?;
                    new_file.write_all(b"\n")?;
                }
                new_file.sync_all()?;
            }

            file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
            write_seq = Self::scan(&file)?.0;
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            write_seq,
            write_buffer: Vec::new(),
            last_flush: Instant::now(),
        })
    }

    /// Scan the WAL to find the maximum sequence number.
    ///
    /// Returns `(max_seq, corrupt)` where `corrupt` is true if a parse
    /// error was encountered before EOF.
    fn scan(file: &File) -> Result<(u64, bool), WalError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut max_seq = 0;
        let mut corrupt = false;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(&line) {
                Ok(record) => max_seq = max_seq.max(record.seq),
                Err(_) => {
                    corrupt = true;
                    break;
                }
            }
        }
        Ok((max_seq, corrupt))
    }

    /// Collect the parseable line prefix of a corrupt WAL.
    fn read_valid_lines(file: &File) -> Result<Vec<String>, WalError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut valid = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if serde_json::from_str::<WalRecord>(&line).is_err() {
                break;
            }
            valid.push(line);
        }
        Ok(valid)
    }

    /// Append a batch, returning its sequence number. Buffered until the
    /// next flush.
    pub fn append(&mut self, batch: &[Op]) -> Result<u64, WalError> {
        self.write_seq += 1;
        let line = serde_json::to_vec(&WalRecordRef { seq: self.write_seq, batch })?;
        self.write_buffer.push(line);
        Ok(self.write_seq)
    }

    /// Whether the group-commit window has closed.
    pub fn needs_flush(&self) -> bool {
        !self.write_buffer.is_empty()
            && (self.write_buffer.len() >= FLUSH_THRESHOLD
                || self.last_flush.elapsed() >= FLUSH_INTERVAL)
    }

    /// Write buffered entries to disk and sync.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.write_buffer.is_empty() {
            self.last_flush = Instant::now();
            return Ok(());
        }
        for line in self.write_buffer.drain(..) {
            self.file.write_all(&line)?;
            self.file.write_all(b"\n")?;
        }
        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Read every entry in sequence order (for replay on open).
    pub fn read_all(path: &Path) -> Result<Vec<WalEntry>, WalError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(&line) {
                Ok(record) => entries.push(WalEntry { seq: record.seq, batch: record.batch }),
                // Torn tail; open() will rotate it
                Err(_) => break,
            }
        }
        Ok(entries)
    }

    /// Truncate the log after a checkpoint. The sequence keeps counting.
    pub fn reset(&mut self) -> Result<(), WalError> {
        self.write_buffer.clear();
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
