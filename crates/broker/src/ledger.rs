// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job durable message ledger and PID record.
//!
//! One `Ledger` exists per job while its process runs; it is the only
//! writer of the job's ledger file. After [`Ledger::close`] the
//! reconciliation loop owns the file exclusively.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use courier_core::{JobPaths, Message, RecordError};

/// Errors from ledger and PID file operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record at {path} line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: RecordError,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io { path: path.to_path_buf(), source }
}

/// Append-only writer for one job's message ledger.
pub struct Ledger {
    paths: JobPaths,
    file: File,
}

impl Ledger {
    /// Create the job directory (idempotent) and open the ledger file
    /// for appending.
    pub fn open(paths: &JobPaths) -> Result<Self, LedgerError> {
        fs::create_dir_all(&paths.dir).map_err(|e| io_err(&paths.dir, e))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.ledger)
            .map_err(|e| io_err(&paths.ledger, e))?;
        Ok(Self { paths: paths.clone(), file })
    }

    /// Append one message record, flushed to disk before returning.
    ///
    /// Slow, deliberately: once `append` returns, a crash cannot lose
    /// the line.
    pub fn append(&mut self, message: &Message) -> Result<(), LedgerError> {
        let mut line = message.to_record();
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.sync_data())
            .map_err(|e| io_err(&self.paths.ledger, e))?;
        Ok(())
    }

    /// Record the OS process id as the sole content of the PID file.
    /// Last write wins.
    pub fn record_pid(&self, pid: u32) -> Result<(), LedgerError> {
        fs::write(&self.paths.pid, pid.to_string()).map_err(|e| io_err(&self.paths.pid, e))
    }

    /// Release the file handle. No further appends may happen for this
    /// job; the reconciliation loop takes over the file.
    pub fn close(self) {
        drop(self);
    }
}

/// Read every record in a ledger file, preserving order.
pub fn read_entries(path: &Path) -> Result<Vec<Message>, LedgerError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| io_err(path, e))?;
        if line.is_empty() {
            continue;
        }
        let message = Message::from_record(&line).map_err(|source| LedgerError::Corrupt {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        entries.push(message);
    }
    Ok(entries)
}

/// Write `entries` to `path`, replacing any existing content, flushed to
/// disk before returning.
pub fn write_entries(path: &Path, entries: &[Message]) -> Result<(), LedgerError> {
    let mut file = File::create(path).map_err(|e| io_err(path, e))?;
    for entry in entries {
        let mut line = entry.to_record();
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(|e| io_err(path, e))?;
    }
    file.sync_data().map_err(|e| io_err(path, e))
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
