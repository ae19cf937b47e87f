//! # Memtable — sorted in-memory table of recent writes
//!
//! Every record lives in one [`Arena`] allocation, laid out as
//!
//! ```text
//! [varint32: klen + 8][user_key][fixed64: (seq << 8) | tag][varint32: vlen][value]
//! ```
//!
//! and indexed by a skiplist ordered on the internal key, so the newest
//! version of each user key sorts first. Sequence numbers are unique per
//! write, which is why a duplicate internal key can never be inserted.
//!
//! ## Sharing
//!
//! A memtable that has been superseded by a newer one may still be read
//! by snapshot-holding iterators, so the engine hands out `Arc<MemTable>`
//! clones; the table is freed when the last reference drops. Internally a
//! read-write lock covers the arena and index: the single writer takes it
//! briefly for `add`, readers share it for `get` and iteration.

mod arena;
mod skiplist;

pub use arena::{Arena, ArenaSlice};
pub use skiplist::{KeyOrder, SkipList};

use std::cmp::Ordering;
use std::sync::{RwLock, RwLockReadGuard};

use coding::{get_length_prefixed_slice, put_length_prefixed_slice, put_varint32};
use format::{
    pack_sequence_and_type, Comparator, InternalKeyComparator, LookupKey, SequenceNumber,
    ValueType, INTERNAL_KEY_TRAILER,
};

/// Outcome of a memtable lookup.
///
/// `Deleted` is a definitive answer: the caller must stop searching older
/// sources instead of resurrecting a shadowed value. `Missing` means this
/// table knows nothing about the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Found(Vec<u8>),
    Deleted,
    Missing,
}

/// Orders memtable entries by their length-prefixed internal keys.
struct EntryOrder {
    icmp: InternalKeyComparator,
}

impl KeyOrder for EntryOrder {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let mut a_input = a;
        let mut b_input = b;
        // entries always carry a well-formed prefix; fall back to raw
        // bytes rather than panicking if one ever does not
        let ak = get_length_prefixed_slice(&mut a_input).unwrap_or(a);
        let bk = get_length_prefixed_slice(&mut b_input).unwrap_or(b);
        self.icmp.compare(ak, bk)
    }
}

struct MemCore {
    arena: Arena,
    index: SkipList<EntryOrder>,
}

/// Mutable, in-memory sorted table of recent writes.
pub struct MemTable {
    cmp: InternalKeyComparator,
    core: RwLock<MemCore>,
}

impl MemTable {
    pub fn new(cmp: InternalKeyComparator) -> MemTable {
        let order = EntryOrder { icmp: cmp.clone() };
        MemTable {
            cmp,
            core: RwLock::new(MemCore {
                arena: Arena::new(),
                index: SkipList::new(order),
            }),
        }
    }

    /// Inserts an entry for `key` at `seq`. For `ValueType::Deletion` the
    /// value is conventionally empty.
    pub fn add(&self, seq: SequenceNumber, t: ValueType, key: &[u8], value: &[u8]) {
        let ikey_len = key.len() + INTERNAL_KEY_TRAILER;
        let mut buf =
            Vec::with_capacity(5 + ikey_len + 5 + value.len());
        put_varint32(&mut buf, ikey_len as u32);
        buf.extend_from_slice(key);
        coding::put_fixed64(&mut buf, pack_sequence_and_type(seq, t));
        put_length_prefixed_slice(&mut buf, value);

        let mut core = self.core.write().unwrap();
        let entry = core.arena.push(&buf);
        let MemCore { arena, index } = &mut *core;
        index.insert(arena, entry);
    }

    /// Looks up the newest entry visible at the lookup key's snapshot.
    pub fn get(&self, key: &LookupKey) -> LookupResult {
        let core = self.core.read().unwrap();
        let Some(entry) = core.index.seek(&core.arena, key.memtable_key()) else {
            return LookupResult::Missing;
        };

        let mut input = core.arena.slice(entry);
        let Some(ikey) = get_length_prefixed_slice(&mut input) else {
            return LookupResult::Missing;
        };

        // the seek may have landed on a different user key entirely
        let user_key = &ikey[..ikey.len() - INTERNAL_KEY_TRAILER];
        if self
            .cmp
            .user_comparator()
            .compare(user_key, key.user_key())
            != Ordering::Equal
        {
            return LookupResult::Missing;
        }

        let packed = coding::decode_fixed64(&ikey[ikey.len() - INTERNAL_KEY_TRAILER..]);
        match ValueType::from_tag((packed & 0xff) as u8) {
            Some(ValueType::Value) => {
                let value = get_length_prefixed_slice(&mut input).unwrap_or(b"");
                LookupResult::Found(value.to_vec())
            }
            // a tombstone answers the lookup definitively
            Some(ValueType::Deletion) => LookupResult::Deleted,
            None => LookupResult::Missing,
        }
    }

    /// Bytes of arena memory backing this table.
    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        self.core.read().unwrap().arena.memory_usage()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.read().unwrap().index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.read().unwrap().index.is_empty()
    }

    /// Iterates entries in internal-key order, yielding
    /// `(internal_key, value)` pairs. Holds a read lock for the iterator's
    /// lifetime, so a concurrent writer will block until it is dropped.
    pub fn iter(&self) -> MemTableIter<'_> {
        let guard = self.core.read().unwrap();
        let node = guard.index.first();
        MemTableIter { guard, node }
    }
}

/// Ordered iterator over memtable entries.
pub struct MemTableIter<'a> {
    guard: RwLockReadGuard<'a, MemCore>,
    node: Option<u32>,
}

impl Iterator for MemTableIter<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.node?;
        let (entry, next) = self.guard.index.key_and_next(node);
        self.node = next;

        let mut input = self.guard.arena.slice(entry);
        let ikey = get_length_prefixed_slice(&mut input)?;
        let value = get_length_prefixed_slice(&mut input)?;
        Some((ikey.to_vec(), value.to_vec()))
    }
}
