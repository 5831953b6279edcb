//! Lock-guarded sink files
//!
//! Every publish replaces the whole file while holding an exclusive
//! `flock(2)`. Readers that take a shared lock before reading therefore see
//! either the previous record or the new one.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;
use tracing::trace;

use super::record::{RecordError, WireRecord};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to open sink {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to lock sink {path}: {source}")]
    Lock { path: PathBuf, source: Errno },
    #[error("failed to truncate sink {path}: {source}")]
    Truncate { path: PathBuf, source: io::Error },
    #[error("failed to write sink {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read sink {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to lock sink {path}: {source}")]
    Lock { path: PathBuf, source: Errno },
    #[error("sink {path} holds a malformed record: {source}")]
    Record { path: PathBuf, source: RecordError },
}

/// Writes records to one named sink
#[derive(Debug, Clone)]
pub struct Publisher {
    path: PathBuf,
}

impl Publisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the sink's content with `record`.
    ///
    /// Truncation happens only after the exclusive lock is held.
    pub fn publish(&self, record: &[u8]) -> Result<(), PublishError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| PublishError::Open {
                path: self.path.clone(),
                source,
            })?;

        let mut locked = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, source)| {
            PublishError::Lock {
                path: self.path.clone(),
                source,
            }
        })?;

        locked.set_len(0).map_err(|source| PublishError::Truncate {
            path: self.path.clone(),
            source,
        })?;
        locked
            .write_all(record)
            .and_then(|()| locked.flush())
            .map_err(|source| PublishError::Write {
                path: self.path.clone(),
                source,
            })?;

        trace!(sink = %self.path.display(), bytes = record.len(), "record published");
        // Dropping the guard unlocks, then the descriptor closes.
        Ok(())
    }
}

/// Read the record currently in a sink under a shared lock
pub fn read_latest(path: &Path) -> Result<WireRecord, ReadError> {
    let file = File::open(path).map_err(|source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut locked = Flock::lock(file, FlockArg::LockShared).map_err(|(_, source)| {
        ReadError::Lock {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let mut buf = Vec::new();
    locked.read_to_end(&mut buf).map_err(|source| ReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    drop(locked);

    WireRecord::parse(&buf).map_err(|source| ReadError::Record {
        path: path.to_path_buf(),
        source,
    })
}
