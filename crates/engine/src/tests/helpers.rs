//! In-memory stand-ins for the on-disk table collaborators, shared by
//! the engine tests: the factory records "files" into a map the loader
//! later serves them back from.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use format::{BytewiseComparator, Comparator, InternalKey, InternalKeyComparator};

use crate::{BuiltTable, Db, Error, Options, Result, Table, TableFactory, TableLoader};

type Entries = Arc<Vec<(Vec<u8>, Vec<u8>)>>;

/// Shared in-memory table storage acting as both loader and factory.
#[derive(Clone, Default)]
pub struct TableStore {
    tables: Arc<Mutex<HashMap<u64, Entries>>>,
    pub opens: Arc<AtomicUsize>,
    pub builds: Arc<AtomicUsize>,
    /// When set, opens fail with an I/O error (transient-fault injection).
    pub fail_opens: Arc<AtomicBool>,
}

impl TableStore {
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Registers a prebuilt table directly, for cache tests that bypass
    /// the engine.
    pub fn put_table(&self, number: u64, entries: Vec<(Vec<u8>, Vec<u8>)>) {
        self.tables.lock().unwrap().insert(number, Arc::new(entries));
    }
}

/// A loaded in-memory table: sorted `(internal_key, value)` pairs.
pub struct MemoryTable {
    entries: Entries,
    icmp: InternalKeyComparator,
}

impl Table for MemoryTable {
    fn get(&self, target: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let idx = self
            .entries
            .partition_point(|(ikey, _)| {
                self.icmp.compare(ikey, target) == std::cmp::Ordering::Less
            });
        Ok(self.entries.get(idx).cloned())
    }
}

impl TableLoader for TableStore {
    type T = MemoryTable;

    fn open(&self, _dir: &Path, number: u64, _file_size: u64) -> Result<MemoryTable> {
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected open failure for table {number}"),
            )));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let entries = self
            .tables
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| {
                Error::from(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such table: {number}"),
                ))
            })?;
        Ok(MemoryTable {
            entries,
            icmp: InternalKeyComparator::new(Arc::new(BytewiseComparator)),
        })
    }
}

impl TableFactory for TableStore {
    fn build_table(
        &self,
        _dir: &Path,
        number: u64,
        entries: &mut dyn Iterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> Result<BuiltTable> {
        let all: Vec<(Vec<u8>, Vec<u8>)> = entries.collect();
        assert!(!all.is_empty(), "flush of an empty memtable");
        self.builds.fetch_add(1, Ordering::SeqCst);

        let file_size: u64 = all.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum();
        let smallest = InternalKey::decode_from(&all.first().unwrap().0);
        let largest = InternalKey::decode_from(&all.last().unwrap().0);

        self.tables.lock().unwrap().insert(number, Arc::new(all));
        Ok(BuiltTable {
            file_size,
            smallest,
            largest,
        })
    }
}

static LOG_INIT: Once = Once::new();

/// Routes `log` output through env_logger once, so `RUST_LOG=debug`
/// makes failing tests narrate the engine's decisions.
fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Opens a store in `dir` backed by a fresh [`TableStore`].
pub fn open_db(dir: &Path, options: Options) -> (Db<TableStore>, TableStore) {
    init_logging();
    let store = TableStore::default();
    let db = Db::open(dir, options, store.clone(), Box::new(store.clone())).unwrap();
    (db, store)
}

/// Reopens `dir` against an existing [`TableStore`] (its "filesystem").
pub fn reopen_db(dir: &Path, options: Options, store: &TableStore) -> Result<Db<TableStore>> {
    Db::open(dir, options, store.clone(), Box::new(store.clone()))
}
