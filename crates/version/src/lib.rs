//! # Version — persisted level-structure bookkeeping
//!
//! The on-disk state of the store is a set of numbered table files
//! arranged into levels. Every change to that arrangement (a flush adding
//! a file, a compaction adding and deleting files) is expressed as one
//! [`VersionEdit`]: a serializable diff appended to the **manifest**, a
//! log of edits framed exactly like the write-ahead log. Replaying the
//! manifest from the start reconstructs the current level structure, which
//! is how the store reopens after a crash.
//!
//! A separate one-line `CURRENT` file names the active manifest, updated
//! by the write-temp / fsync / rename dance so it is never half-written.
//!
//! Unlike WAL corruption (tolerated, truncated), a manifest that fails to
//! decode is **fatal**: the engine refuses to open rather than guess at
//! the level structure.
//!
//! This crate also hosts the [`SnapshotList`]: the registry of outstanding
//! read snapshots whose oldest entry bounds what garbage collection may
//! discard.

mod edit;
mod manifest;
mod snapshot;

pub use edit::{NewFile, VersionEdit};
pub use manifest::{
    current_file_name, manifest_file_name, recover, set_current_file, ManifestWriter,
    RecoveredState,
};
pub use snapshot::{Snapshot, SnapshotList};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use format::InternalKey;
use thiserror::Error;

/// Number of levels in the store.
pub const NUM_LEVELS: usize = 7;

/// Errors from manifest handling.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest (or an edit inside it) failed to decode. The store
    /// cannot safely open.
    #[error("corrupt manifest: {0}")]
    Corrupt(String),
}

/// Metadata for one on-disk table file.
#[derive(Debug)]
pub struct FileMetadata {
    /// File number; names the file on disk.
    pub number: u64,
    /// File size in bytes.
    pub file_size: u64,
    /// Smallest internal key served by the file.
    pub smallest: InternalKey,
    /// Largest internal key served by the file.
    pub largest: InternalKey,
    /// Seeks this file may absorb before becoming a compaction candidate.
    allowed_seeks: AtomicI64,
}

impl FileMetadata {
    pub fn new(
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) -> Arc<FileMetadata> {
        // one seek costs about as much as compacting 16 KiB, with a floor
        // so tiny files are not compacted on their first few reads
        let allowed = ((file_size / (16 * 1024)) as i64).max(100);
        Arc::new(FileMetadata {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed),
        })
    }

    /// Consumes one unit of the seek budget. Returns `true` when the
    /// budget is exhausted and the file should be considered for
    /// compaction.
    pub fn consume_seek(&self) -> bool {
        self.allowed_seeks.fetch_sub(1, Ordering::Relaxed) <= 1
    }

    /// Remaining seek budget.
    pub fn allowed_seeks(&self) -> i64 {
        self.allowed_seeks.load(Ordering::Relaxed)
    }
}
