//! Version edits: tag-prefixed, varint-encoded diffs of the level
//! structure, one per manifest record.

use coding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice,
    put_varint32, put_varint64,
};
use format::{InternalKey, SequenceNumber};

use crate::{VersionError, NUM_LEVELS};

// Field tags. Never renumber: they are the manifest wire format.
const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
// 8 was used by a historical field
const TAG_PREV_LOG_NUMBER: u32 = 9;

/// A file added by an edit: `(level, number, size, smallest, largest)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub level: usize,
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

/// One atomic change to the persisted level structure.
///
/// All fields are optional; an edit records only what changed. Encoded
/// edits are immutable once appended to the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<NewFile>,
}

impl VersionEdit {
    pub fn new() -> VersionEdit {
        VersionEdit::default()
    }

    pub fn set_comparator_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.comparator_name = Some(name.into());
        self
    }

    pub fn set_log_number(&mut self, n: u64) -> &mut Self {
        self.log_number = Some(n);
        self
    }

    pub fn set_prev_log_number(&mut self, n: u64) -> &mut Self {
        self.prev_log_number = Some(n);
        self
    }

    pub fn set_next_file(&mut self, n: u64) -> &mut Self {
        self.next_file_number = Some(n);
        self
    }

    pub fn set_last_sequence(&mut self, seq: SequenceNumber) -> &mut Self {
        self.last_sequence = Some(seq);
        self
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) -> &mut Self {
        debug_assert!(level < NUM_LEVELS);
        self.compact_pointers.push((level, key));
        self
    }

    /// Records the addition of a table file to `level`.
    pub fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) -> &mut Self {
        debug_assert!(level < NUM_LEVELS);
        self.new_files.push(NewFile {
            level,
            number,
            file_size,
            smallest,
            largest,
        });
        self
    }

    /// Records the deletion of table file `number` from `level`.
    pub fn delete_file(&mut self, level: usize, number: u64) -> &mut Self {
        debug_assert!(level < NUM_LEVELS);
        self.deleted_files.push((level, number));
        self
    }

    /// Serializes the edit for appending to the manifest.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        if let Some(name) = &self.comparator_name {
            put_varint32(dst, TAG_COMPARATOR);
            put_length_prefixed_slice(dst, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(dst, TAG_LOG_NUMBER);
            put_varint64(dst, n);
        }
        if let Some(n) = self.prev_log_number {
            put_varint32(dst, TAG_PREV_LOG_NUMBER);
            put_varint64(dst, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(dst, TAG_NEXT_FILE_NUMBER);
            put_varint64(dst, n);
        }
        if let Some(seq) = self.last_sequence {
            put_varint32(dst, TAG_LAST_SEQUENCE);
            put_varint64(dst, seq);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(dst, TAG_COMPACT_POINTER);
            put_varint32(dst, *level as u32);
            put_length_prefixed_slice(dst, key.encoded());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(dst, TAG_DELETED_FILE);
            put_varint32(dst, *level as u32);
            put_varint64(dst, *number);
        }
        for f in &self.new_files {
            put_varint32(dst, TAG_NEW_FILE);
            put_varint32(dst, f.level as u32);
            put_varint64(dst, f.number);
            put_varint64(dst, f.file_size);
            put_length_prefixed_slice(dst, f.smallest.encoded());
            put_length_prefixed_slice(dst, f.largest.encoded());
        }
    }

    /// Parses an edit from one manifest record.
    ///
    /// Any malformed field is fatal: the caller cannot trust a partially
    /// decoded level structure.
    pub fn decode_from(mut input: &[u8]) -> Result<VersionEdit, VersionError> {
        let mut edit = VersionEdit::new();

        while !input.is_empty() {
            let tag = get_varint32(&mut input)
                .ok_or_else(|| VersionError::Corrupt("truncated edit tag".into()))?;
            match tag {
                TAG_COMPARATOR => {
                    let name = get_length_prefixed_slice(&mut input)
                        .ok_or_else(|| VersionError::Corrupt("bad comparator name".into()))?;
                    let name = std::str::from_utf8(name)
                        .map_err(|_| VersionError::Corrupt("comparator name not utf-8".into()))?;
                    edit.comparator_name = Some(name.to_string());
                }
                TAG_LOG_NUMBER => {
                    edit.log_number = Some(decode_u64(&mut input, "log number")?);
                }
                TAG_PREV_LOG_NUMBER => {
                    edit.prev_log_number = Some(decode_u64(&mut input, "prev log number")?);
                }
                TAG_NEXT_FILE_NUMBER => {
                    edit.next_file_number = Some(decode_u64(&mut input, "next file number")?);
                }
                TAG_LAST_SEQUENCE => {
                    edit.last_sequence = Some(decode_u64(&mut input, "last sequence")?);
                }
                TAG_COMPACT_POINTER => {
                    let level = decode_level(&mut input)?;
                    let key = get_length_prefixed_slice(&mut input)
                        .ok_or_else(|| VersionError::Corrupt("bad compact pointer".into()))?;
                    edit.compact_pointers.push((level, InternalKey::decode_from(key)));
                }
                TAG_DELETED_FILE => {
                    let level = decode_level(&mut input)?;
                    let number = decode_u64(&mut input, "deleted file number")?;
                    edit.deleted_files.push((level, number));
                }
                TAG_NEW_FILE => {
                    let level = decode_level(&mut input)?;
                    let number = decode_u64(&mut input, "new file number")?;
                    let file_size = decode_u64(&mut input, "file size")?;
                    let smallest = get_length_prefixed_slice(&mut input)
                        .ok_or_else(|| VersionError::Corrupt("bad smallest key".into()))?;
                    let largest = get_length_prefixed_slice(&mut input)
                        .ok_or_else(|| VersionError::Corrupt("bad largest key".into()))?;
                    edit.new_files.push(NewFile {
                        level,
                        number,
                        file_size,
                        smallest: InternalKey::decode_from(smallest),
                        largest: InternalKey::decode_from(largest),
                    });
                }
                other => {
                    return Err(VersionError::Corrupt(format!(
                        "unknown edit tag: {other}"
                    )));
                }
            }
        }

        Ok(edit)
    }
}

fn decode_u64(input: &mut &[u8], what: &str) -> Result<u64, VersionError> {
    get_varint64(input).ok_or_else(|| VersionError::Corrupt(format!("bad {what}")))
}

fn decode_level(input: &mut &[u8]) -> Result<usize, VersionError> {
    let level = get_varint32(input)
        .ok_or_else(|| VersionError::Corrupt("truncated level".into()))? as usize;
    if level >= NUM_LEVELS {
        return Err(VersionError::Corrupt(format!("level out of range: {level}")));
    }
    Ok(level)
}
