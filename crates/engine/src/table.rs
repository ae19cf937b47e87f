//! Collaborator seams for the on-disk table layer, plus the table cache.
//!
//! The engine does not know how sorted tables are encoded. It builds them
//! through a [`TableFactory`] when flushing a memtable and reads them
//! through a [`Table`] opened by a [`TableLoader`]; both live behind
//! traits so the block/filter format stays a separate concern.
//!
//! The [`TableCache`] bounds how many tables are open at once. Each entry
//! charges 1 against the cache capacity: pure handle-count eviction.

use std::path::{Path, PathBuf};

use format::InternalKey;
use log::debug;

use crate::error::Result;

/// An open on-disk sorted table.
pub trait Table: Send + Sync {
    /// Seeks to the first entry with internal key at or after `target`
    /// and returns it, or `None` if the table ends first.
    ///
    /// The caller interprets the returned internal key (user-key match,
    /// sequence visibility, tombstones).
    fn get(&self, target: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
}

/// Opens table files by number.
pub trait TableLoader: Send + Sync {
    type T: Table + 'static;

    /// Opens table file `number` (expected to be `file_size` bytes),
    /// parsing whatever footer/index it needs.
    fn open(&self, dir: &Path, number: u64, file_size: u64) -> Result<Self::T>;
}

/// Summary of a table built by a flush.
#[derive(Debug, Clone)]
pub struct BuiltTable {
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

/// Builds table files from sorted entry streams.
pub trait TableFactory: Send + Sync {
    /// Writes `entries` (internal-key order, `(internal_key, value)`
    /// pairs) as table file `number` and reports its metadata.
    fn build_table(
        &self,
        dir: &Path,
        number: u64,
        entries: &mut dyn Iterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> Result<BuiltTable>;
}

/// Maps file numbers to open table handles, bounded by an LRU cache.
pub struct TableCache<L: TableLoader> {
    dir: PathBuf,
    loader: L,
    cache: cache::Cache<u64, L::T>,
}

/// A pinned open table. Keep it alive as long as anything reads the
/// table; iterators hold theirs until dropped, which is what decouples
/// an iterator's lifetime from eviction.
pub type TableHandle<L> = cache::Handle<u64, <L as TableLoader>::T>;

impl<L: TableLoader> TableCache<L> {
    pub fn new(dir: PathBuf, loader: L, capacity: usize) -> TableCache<L> {
        TableCache {
            dir,
            loader,
            cache: cache::Cache::new(capacity),
        }
    }

    /// Returns a pinned handle for table `number`, opening the file on a
    /// miss.
    ///
    /// The open runs outside the cache's lock, so a slow open never
    /// serializes unrelated lookups. Open failures are returned without
    /// being cached, so a transient fault or a repaired file is retried on
    /// the next access.
    pub fn find_table(&self, number: u64, file_size: u64) -> Result<TableHandle<L>> {
        if let Some(handle) = self.cache.lookup(&number) {
            return Ok(handle);
        }

        let table = self.loader.open(&self.dir, number, file_size)?;
        let deleter: cache::Deleter<u64, L::T> = Box::new(|number, _table| {
            debug!("closing table file {number}");
        });
        // two racing misses may both open; the second insert supersedes
        // the first, which closes when its handles drop
        Ok(self.cache.insert(number, table, 1, Some(deleter)))
    }

    /// Point lookup through the cache: pins the table for the duration
    /// of the read.
    pub fn get(
        &self,
        number: u64,
        file_size: u64,
        target: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let handle = self.find_table(number, file_size)?;
        handle.get(target)
    }

    /// Drops table `number` from the cache, e.g. after compaction deleted
    /// its file. A stale handle is never served afterwards; outstanding
    /// handles finish their reads and close on release.
    pub fn evict(&self, number: u64) {
        self.cache.erase(&number);
    }

    /// Number of currently open tables.
    #[must_use]
    pub fn open_tables(&self) -> usize {
        self.cache.len()
    }
}
