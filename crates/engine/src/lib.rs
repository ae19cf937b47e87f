//! # Engine — the EddyKV ingestion and caching core
//!
//! Ties the workspace together into the write path, read path, and
//! bookkeeping of an LSM storage engine:
//!
//! ```text
//! Writer threads                          Reader threads
//!      |                                       |
//!      v                                       v
//! ┌──────────────────────────────────────────────────────────┐
//! │                          DB                              │
//! │                                                          │
//! │ write.rs: queue -> leader merges batches                 │
//! │             -> WAL append -> memtable apply              │
//! │                     |                                    │
//! │                     | (write buffer full?)               │
//! │                     v                                    │
//! │            rotate memtable, flush via TableFactory,      │
//! │            VersionEdit appended to the manifest          │
//! │                                                          │
//! │ read.rs: snapshot seq -> memtable -> immutable memtable  │
//! │            -> table files via TableCache (LRU handles)   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering and crash safety
//!
//! Writes are serialized: one leader at a time performs the
//! WAL-append-then-memtable-apply pair, so log order, memtable order, and
//! assigned sequence numbers stay mutually consistent. The WAL always
//! lands first; a crash between the two is healed on reopen by replaying
//! the log into a fresh memtable.
//!
//! Reads never wait on the writer queue. A read binds to a sequence
//! ceiling (an explicit [`Snapshot`] or the current last sequence) and
//! probes `Arc` clones of the memtables; multi-version consistency comes
//! from the internal-key ordering, not from read locks.
//!
//! ## Scope
//!
//! The on-disk table format is a collaborator, not a resident: flushes go
//! through [`TableFactory`] and reads through [`TableLoader`]/[`Table`].

mod batch;
mod error;
mod filename;
mod options;
mod read;
mod recovery;
mod table;
mod write;

pub use batch::{BatchHandler, WriteBatch, BATCH_HEADER_SIZE};
pub use error::{Error, Result};
pub use filename::{log_file_name, parse_log_file_name, table_file_name};
pub use options::{Options, ReadOptions};
pub use table::{BuiltTable, Table, TableCache, TableFactory, TableHandle, TableLoader};
pub use version::Snapshot;

use std::collections::VecDeque;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use format::InternalKeyComparator;
use log::{debug, info};
use memtable::MemTable;
use version::{
    FileMetadata, ManifestWriter, SnapshotList, VersionEdit, NUM_LEVELS,
};

use write::Ticket;

/// A memtable retired by rotation, awaiting (or retrying) its flush.
/// `log_number` is the log covering writes newer than this table.
struct RetiredMemTable {
    mem: Arc<MemTable>,
    log_number: u64,
}

/// WAL state, touched only by the current write leader.
struct WalState {
    log: wal::Writer<File>,
    /// Number of the log file `log` writes to.
    log_number: u64,
}

/// The persisted level structure and the manifest recording it.
struct VersionState {
    manifest: ManifestWriter,
    /// Table files per level: level 0 newest first.
    files: Vec<Vec<Arc<FileMetadata>>>,
    next_file_number: u64,
}

impl VersionState {
    fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }
}

/// The storage engine core.
///
/// Generic over the table loader so the on-disk table format stays
/// pluggable; the flush side is a boxed [`TableFactory`] fixed at open.
pub struct Db<L: TableLoader> {
    options: Options,
    dir: PathBuf,
    icmp: InternalKeyComparator,
    table_cache: TableCache<L>,
    factory: Box<dyn TableFactory>,

    /// Active memtable. Swapped (never mutated in place) on rotation.
    mem: RwLock<Arc<MemTable>>,
    /// Retired memtable being flushed, still readable.
    imm: RwLock<Option<RetiredMemTable>>,

    /// Queued writers, front is the current leader.
    writers: Mutex<VecDeque<Arc<Ticket>>>,
    wal: Mutex<WalState>,
    versions: Mutex<VersionState>,
    snapshots: Mutex<SnapshotList>,
    last_sequence: AtomicU64,
}

impl<L: TableLoader> Db<L> {
    /// Opens (or creates) the store at `dir`, running full recovery:
    /// manifest replay, then WAL replay of anything newer.
    ///
    /// A memtable recovered from the WAL is flushed to a table file
    /// before the replayed logs are discarded, so the reopened store
    /// starts from a clean log.
    pub fn open(
        dir: impl AsRef<Path>,
        options: Options,
        loader: L,
        factory: Box<dyn TableFactory>,
    ) -> Result<Db<L>> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        if !version::current_file_name(&dir).exists() {
            if !options.create_if_missing {
                return Err(Error::InvalidArgument(format!(
                    "store does not exist: {}",
                    dir.display()
                )));
            }
            Self::initialize_store(&dir, &options)?;
        }

        let state = version::recover(&dir)?;
        if let Some(name) = &state.comparator_name {
            if name != options.comparator.name() {
                return Err(Error::InvalidArgument(format!(
                    "comparator mismatch: store ordered by {name}, options carry {}",
                    options.comparator.name()
                )));
            }
        }

        let icmp = InternalKeyComparator::new(options.comparator.clone());
        let mut files = state.files;
        let mut next_file_number = state.next_file_number;
        let mut max_seq = state.last_sequence;

        // replay logs the manifest does not cover, oldest first
        let recovered = Arc::new(MemTable::new(icmp.clone()));
        let mut log_numbers =
            Self::find_log_files(&dir, state.log_number, state.prev_log_number)?;
        log_numbers.sort_unstable();
        for &number in &log_numbers {
            let replayed = recovery::replay_log(
                &log_file_name(&dir, number),
                &recovered,
                options.verify_checksums,
            )?;
            if let Some(seq) = replayed {
                max_seq = max_seq.max(seq);
            }
        }

        // roll forward onto a fresh log and manifest
        let log_number = {
            let n = next_file_number;
            next_file_number += 1;
            n
        };
        let manifest_number = {
            let n = next_file_number;
            next_file_number += 1;
            n
        };

        let mut snapshot_edit = VersionEdit::new();
        snapshot_edit
            .set_comparator_name(options.comparator.name())
            .set_log_number(log_number)
            .set_last_sequence(max_seq);

        // anything replayed from the old logs must reach a table file
        // before those logs can go
        if !recovered.is_empty() {
            let number = {
                let n = next_file_number;
                next_file_number += 1;
                n
            };
            let built = factory.build_table(&dir, number, &mut recovered.iter())?;
            info!(
                "flushed recovered memtable to table {number} ({} bytes)",
                built.file_size
            );
            files[0].insert(
                0,
                FileMetadata::new(
                    number,
                    built.file_size,
                    built.smallest.clone(),
                    built.largest.clone(),
                ),
            );
        }

        for (level, level_files) in files.iter().enumerate() {
            for f in level_files {
                snapshot_edit.add_file(
                    level,
                    f.number,
                    f.file_size,
                    f.smallest.clone(),
                    f.largest.clone(),
                );
            }
        }
        snapshot_edit.set_next_file(next_file_number);

        let log_file = File::create(log_file_name(&dir, log_number))?;
        let mut manifest = ManifestWriter::create(&dir, manifest_number)?;
        manifest.append(&snapshot_edit)?;
        version::set_current_file(&dir, manifest_number)?;

        for &number in &log_numbers {
            let path = log_file_name(&dir, number);
            if let Err(e) = fs::remove_file(&path) {
                debug!("leaving old log {}: {e}", path.display());
            } else {
                debug!("removed replayed log {}", path.display());
            }
        }

        info!(
            "opened store at {} (last sequence {max_seq}, {} table files)",
            dir.display(),
            files.iter().map(Vec::len).sum::<usize>()
        );

        Ok(Db {
            table_cache: TableCache::new(dir.clone(), loader, options.table_cache_capacity),
            icmp: icmp.clone(),
            factory,
            mem: RwLock::new(Arc::new(MemTable::new(icmp))),
            imm: RwLock::new(None),
            writers: Mutex::new(VecDeque::new()),
            wal: Mutex::new(WalState {
                log: wal::Writer::new(log_file),
                log_number,
            }),
            versions: Mutex::new(VersionState {
                manifest,
                files,
                next_file_number,
            }),
            snapshots: Mutex::new(SnapshotList::new()),
            last_sequence: AtomicU64::new(max_seq),
            options,
            dir,
        })
    }

    /// Writes the manifest of a brand-new store.
    fn initialize_store(dir: &Path, options: &Options) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(options.comparator.name())
            .set_log_number(0)
            .set_next_file(2)
            .set_last_sequence(0);

        let mut manifest = ManifestWriter::create(dir, 1)?;
        manifest.append(&edit)?;
        version::set_current_file(dir, 1)?;
        info!("created new store at {}", dir.display());
        Ok(())
    }

    /// Log files the manifest does not account for.
    fn find_log_files(dir: &Path, log_number: u64, prev_log_number: u64) -> Result<Vec<u64>> {
        let mut numbers = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(number) = parse_log_file_name(name) {
                    if number >= log_number || number == prev_log_number {
                        numbers.push(number);
                    }
                }
            }
        }
        Ok(numbers)
    }

    /// The most recently assigned sequence number.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// Bytes held by the active memtable.
    #[must_use]
    pub fn memtable_usage(&self) -> usize {
        self.mem.read().unwrap().approximate_memory_usage()
    }

    /// Number of table files at `level`.
    #[must_use]
    pub fn files_at_level(&self, level: usize) -> usize {
        debug_assert!(level < NUM_LEVELS);
        self.versions.lock().unwrap().files[level].len()
    }

    /// The table cache, for eviction after external compaction.
    pub fn table_cache(&self) -> &TableCache<L> {
        &self.table_cache
    }
}

impl<L: TableLoader> Drop for Db<L> {
    fn drop(&mut self) {
        // contents are replayable from the WAL; just make sure it is all
        // on disk
        if let Ok(mut wal) = self.wal.lock() {
            let _ = wal.log.flush();
            let _ = wal.log.get_ref().sync_all();
        }
    }
}

impl<L: TableLoader> std::fmt::Debug for Db<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("dir", &self.dir)
            .field("last_sequence", &self.last_sequence())
            .field("memtable_usage", &self.memtable_usage())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
