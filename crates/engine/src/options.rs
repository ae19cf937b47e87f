//! Engine configuration.

use std::sync::Arc;

use format::{BytewiseComparator, Comparator};
use version::Snapshot;

/// Knobs fixed at open time.
#[derive(Clone)]
pub struct Options {
    /// Create the store if `CURRENT` does not exist.
    pub create_if_missing: bool,

    /// Memtable byte budget; exceeding it rotates the memtable and
    /// flushes the retired one to a table file.
    pub write_buffer_size: usize,

    /// How many table files may be open (cached) at once.
    pub table_cache_capacity: usize,

    /// Fsync the WAL on every commit. Off trades durability of the last
    /// few commits for throughput; the WAL is still written before the
    /// memtable either way.
    pub wal_sync: bool,

    /// Verify WAL record checksums during recovery.
    pub verify_checksums: bool,

    /// The user-key ordering. Baked into every file the store writes;
    /// reopening with a different comparator is refused.
    pub comparator: Arc<dyn Comparator>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            create_if_missing: true,
            write_buffer_size: 4 * 1024 * 1024,
            table_cache_capacity: 990,
            wal_sync: false,
            verify_checksums: true,
            comparator: Arc::new(BytewiseComparator),
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("table_cache_capacity", &self.table_cache_capacity)
            .field("wal_sync", &self.wal_sync)
            .field("verify_checksums", &self.verify_checksums)
            .field("comparator", &self.comparator.name())
            .finish()
    }
}

/// Per-read options.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Read as of this snapshot instead of the current state.
    pub snapshot: Option<Snapshot>,
}
