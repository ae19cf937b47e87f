//! Write batches: ordered, atomically-applied sets of mutations.
//!
//! ## Wire format
//!
//! ```text
//! [sequence: u64 LE][count: u32 LE]
//! then `count` records:
//!   [tag: u8 = 1 (value) | 2 (deletion)]
//!   [varint32-prefixed key]
//!   [varint32-prefixed value]        (value records only)
//! ```
//!
//! The encoded form is exactly what gets appended to the WAL, so a batch
//! is both the public mutation API and the log's record payload. The
//! header count must match the number of records replay finds; any
//! disagreement, unknown tag, or truncated field is corruption.

use coding::{get_length_prefixed_slice, put_fixed32, put_fixed64, put_length_prefixed_slice};
use format::{SequenceNumber, ValueType};
use memtable::MemTable;

use crate::error::{Error, Result};

/// Batch header: 8-byte sequence + 4-byte count.
pub const BATCH_HEADER_SIZE: usize = 12;

// Record tags. Part of the wire format.
const TAG_VALUE: u8 = 1;
const TAG_DELETION: u8 = 2;

/// Receives the replayed operations of a batch, in encoded order.
pub trait BatchHandler {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// An ordered set of Put/Delete operations applied atomically.
///
/// Pure data: building a batch touches nothing but its internal buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl WriteBatch {
    pub fn new() -> WriteBatch {
        let mut rep = Vec::with_capacity(64);
        put_fixed64(&mut rep, 0);
        put_fixed32(&mut rep, 0);
        WriteBatch { rep }
    }

    /// Queues an insertion of `key -> value`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(TAG_VALUE);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    /// Queues a deletion of `key`.
    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(TAG_DELETION);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    /// Empties the batch for reuse, keeping its allocation.
    pub fn clear(&mut self) {
        self.rep.clear();
        put_fixed64(&mut self.rep, 0);
        put_fixed32(&mut self.rep, 0);
    }

    /// Number of queued operations.
    #[must_use]
    pub fn count(&self) -> u32 {
        coding::decode_fixed32(&self.rep[8..12])
    }

    /// Stamps the record count into the header.
    fn set_count(&mut self, n: u32) {
        let mut buf = Vec::with_capacity(4);
        put_fixed32(&mut buf, n);
        self.rep[8..12].copy_from_slice(&buf);
    }

    /// Base sequence number from the header.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        coding::decode_fixed64(&self.rep[..8])
    }

    /// Stamps the base sequence number. Operations apply at
    /// `seq, seq+1, seq+2, …` in encoded order.
    pub fn set_sequence(&mut self, seq: SequenceNumber) {
        let mut buf = Vec::with_capacity(8);
        put_fixed64(&mut buf, seq);
        self.rep[..8].copy_from_slice(&buf);
    }

    /// The encoded form, as written to the WAL.
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.rep
    }

    /// Adopts an encoded batch, e.g. one recovered from the WAL.
    pub fn set_contents(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption("batch smaller than header".into()));
        }
        self.rep.clear();
        self.rep.extend_from_slice(data);
        Ok(())
    }

    /// Size of the encoded batch in bytes.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Concatenates `other`'s records onto this batch and sums the
    /// counts. Used to merge concurrently-queued batches into one
    /// physical write.
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
    }

    /// Replays the records in encoded order.
    ///
    /// # Errors
    ///
    /// `Corruption` if a record's tag is unrecognized, a field is
    /// truncated, or the record count disagrees with the header.
    pub fn iterate(&self, handler: &mut dyn BatchHandler) -> Result<()> {
        let mut input = &self.rep[BATCH_HEADER_SIZE..];
        let mut found: u32 = 0;

        while !input.is_empty() {
            let tag = input[0];
            input = &input[1..];
            match tag {
                TAG_VALUE => {
                    let key = get_length_prefixed_slice(&mut input)
                        .ok_or_else(|| Error::Corruption("bad batch Put key".into()))?;
                    let value = get_length_prefixed_slice(&mut input)
                        .ok_or_else(|| Error::Corruption("bad batch Put value".into()))?;
                    handler.put(key, value);
                }
                TAG_DELETION => {
                    let key = get_length_prefixed_slice(&mut input)
                        .ok_or_else(|| Error::Corruption("bad batch Delete key".into()))?;
                    handler.delete(key);
                }
                other => {
                    return Err(Error::Corruption(format!("unknown batch tag: {other}")));
                }
            }
            found += 1;
        }

        if found != self.count() {
            return Err(Error::Corruption("batch count mismatch".into()));
        }
        Ok(())
    }

    /// Applies the batch to `mem`, assigning sequence numbers
    /// `sequence(), sequence()+1, …` in record order.
    pub fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut inserter = MemTableInserter {
            sequence: self.sequence(),
            mem,
        };
        self.iterate(&mut inserter)
    }
}

impl Default for WriteBatch {
    fn default() -> WriteBatch {
        WriteBatch::new()
    }
}

struct MemTableInserter<'a> {
    sequence: SequenceNumber,
    mem: &'a MemTable,
}

impl BatchHandler for MemTableInserter<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mem.add(self.sequence, ValueType::Value, key, value);
        self.sequence += 1;
    }

    fn delete(&mut self, key: &[u8]) {
        self.mem.add(self.sequence, ValueType::Deletion, key, b"");
        self.sequence += 1;
    }
}
