//! Read path: snapshot-bound point lookups and snapshot management.
//!
//! A read resolves its sequence ceiling once (explicit snapshot or the
//! current last sequence), then probes sources newest-first: active
//! memtable, immutable memtable, then table files through the table
//! cache. A tombstone anywhere terminates the search, since older sources
//! must not resurrect a deleted key.

use std::cmp::Ordering as KeyOrdering;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use format::{LookupKey, ParsedInternalKey, ValueType};
use log::debug;
use memtable::LookupResult;
use version::{FileMetadata, Snapshot, NUM_LEVELS};

use crate::error::Result;
use crate::{Db, ReadOptions, TableLoader};

impl<L: TableLoader> Db<L> {
    /// Looks up `key`, bound to `options.snapshot` or the current state.
    ///
    /// `Ok(None)` is the valid "not found" answer; errors are reserved
    /// for corruption and I/O.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let sequence = match &options.snapshot {
            Some(snapshot) => snapshot.sequence(),
            None => self.last_sequence.load(Ordering::Acquire),
        };
        let lkey = LookupKey::new(key, sequence);

        // memtable probes work on Arc clones: the writer never blocks us
        let mem = Arc::clone(&*self.mem.read().unwrap());
        match mem.get(&lkey) {
            LookupResult::Found(value) => return Ok(Some(value)),
            LookupResult::Deleted => return Ok(None),
            LookupResult::Missing => {}
        }

        let imm = self.imm.read().unwrap().as_ref().map(|r| Arc::clone(&r.mem));
        if let Some(imm) = imm {
            match imm.get(&lkey) {
                LookupResult::Found(value) => return Ok(Some(value)),
                LookupResult::Deleted => return Ok(None),
                LookupResult::Missing => {}
            }
        }

        self.search_tables(&lkey)
    }

    /// Registers a snapshot at the current last sequence. Reads bound to
    /// it see a consistent point-in-time view until it is released.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots
            .lock()
            .unwrap()
            .acquire(self.last_sequence.load(Ordering::Acquire))
    }

    /// Releases `snapshot`, allowing garbage collection of versions no
    /// remaining snapshot can see.
    pub fn release_snapshot(&self, snapshot: &Snapshot) {
        self.snapshots.lock().unwrap().release(snapshot);
    }

    /// Sequence of the oldest outstanding snapshot, the bound below which
    /// superseded versions may be reclaimed.
    #[must_use]
    pub fn oldest_snapshot(&self) -> Option<u64> {
        self.snapshots.lock().unwrap().oldest()
    }

    /// Searches table files newest-first for the lookup key.
    fn search_tables(&self, lkey: &LookupKey) -> Result<Option<Vec<u8>>> {
        let ucmp = Arc::clone(self.icmp.user_comparator());
        let user_key = lkey.user_key();

        let in_range = |f: &FileMetadata| {
            ucmp.compare(user_key, f.smallest.user_key()) != KeyOrdering::Less
                && ucmp.compare(user_key, f.largest.user_key()) != KeyOrdering::Greater
        };

        // collect candidates under the version lock, search without it
        let candidates: Vec<Arc<FileMetadata>> = {
            let versions = self.versions.lock().unwrap();
            let mut candidates = Vec::new();
            // level 0 files may overlap; every one in range counts,
            // already ordered newest first
            for f in &versions.files[0] {
                if in_range(f) {
                    candidates.push(Arc::clone(f));
                }
            }
            // deeper levels are non-overlapping: at most one file each
            for level in 1..NUM_LEVELS {
                if let Some(f) = versions.files[level].iter().find(|f| in_range(f)) {
                    candidates.push(Arc::clone(f));
                }
            }
            candidates
        };

        // when more than one file is probed, the first one pays a unit of
        // its seek budget: files that keep getting searched fruitlessly
        // should eventually be compacted
        let mut charged: Option<Arc<FileMetadata>> = None;

        for (i, f) in candidates.iter().enumerate() {
            if i == 1 {
                charged = Some(Arc::clone(&candidates[0]));
            }

            if let Some((ikey, value)) =
                self.table_cache.get(f.number, f.file_size, lkey.internal_key())?
            {
                if let Some(parsed) = ParsedInternalKey::parse(&ikey) {
                    if ucmp.compare(parsed.user_key, user_key) == KeyOrdering::Equal {
                        self.charge_seek(charged);
                        return match parsed.value_type {
                            ValueType::Value => Ok(Some(value)),
                            ValueType::Deletion => Ok(None),
                        };
                    }
                }
            }
        }

        self.charge_seek(charged);
        Ok(None)
    }

    fn charge_seek(&self, file: Option<Arc<FileMetadata>>) {
        if let Some(f) = file {
            if f.consume_seek() {
                debug!(
                    "table {} exhausted its seek budget; compaction candidate",
                    f.number
                );
            }
        }
    }
}
