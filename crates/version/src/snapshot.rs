//! Registry of outstanding read snapshots.
//!
//! A snapshot is an immutable sequence-number ceiling. The list tracks
//! every live snapshot in creation order so garbage collection can ask
//! for the oldest sequence still visible to some reader; versions of a
//! key superseded below that bound may be discarded.
//!
//! Entries are addressed by a monotonically increasing registration id
//! rather than intrusive links, so a stale handle is simply ignored.
//! Creation order equals id order equals sequence order, because sequence
//! numbers only increase.

use std::collections::BTreeMap;

use format::SequenceNumber;

/// Handle to one registered snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    id: u64,
    sequence: SequenceNumber,
}

impl Snapshot {
    /// The sequence-number ceiling reads bound to this snapshot observe.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}

/// All outstanding snapshots, oldest first.
#[derive(Debug, Default)]
pub struct SnapshotList {
    entries: BTreeMap<u64, SequenceNumber>,
    next_id: u64,
}

impl SnapshotList {
    pub fn new() -> SnapshotList {
        SnapshotList::default()
    }

    /// Registers a snapshot at `seq` and returns its handle.
    ///
    /// `seq` must not be lower than the newest registered snapshot;
    /// callers always pass the current last sequence, which only grows.
    pub fn acquire(&mut self, seq: SequenceNumber) -> Snapshot {
        debug_assert!(self.newest().map_or(true, |newest| newest <= seq));
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, seq);
        Snapshot { id, sequence: seq }
    }

    /// Unregisters `snapshot`. Releasing an already-released handle is a
    /// no-op.
    pub fn release(&mut self, snapshot: &Snapshot) {
        self.entries.remove(&snapshot.id);
    }

    /// Sequence of the oldest outstanding snapshot.
    #[must_use]
    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.entries.values().next().copied()
    }

    /// Sequence of the newest outstanding snapshot.
    #[must_use]
    pub fn newest(&self) -> Option<SequenceNumber> {
        self.entries.values().next_back().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
