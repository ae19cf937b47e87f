//! Manifest log plumbing: appending version edits, flipping the `CURRENT`
//! pointer, and replaying the whole log back into a level structure.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use format::InternalKey;
use log::{info, warn};

use crate::{FileMetadata, VersionEdit, VersionError, NUM_LEVELS};

/// Name of the manifest log with the given file number.
pub fn manifest_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{number:06}"))
}

/// Name of the pointer file naming the active manifest.
pub fn current_file_name(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

/// Points `CURRENT` at `MANIFEST-<number>`.
///
/// Written to a temp file, fsynced, then renamed over the old pointer so
/// a crash leaves either the old or the new target, never a torn one.
pub fn set_current_file(dir: &Path, manifest_number: u64) -> Result<(), VersionError> {
    let tmp_path = dir.join(format!("CURRENT.{manifest_number:06}.tmp"));
    let contents = format!("MANIFEST-{manifest_number:06}\n");

    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp_path, current_file_name(dir)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Appends version edits to a manifest log, one WAL-framed record each.
pub struct ManifestWriter {
    log: wal::Writer<File>,
    number: u64,
    /// Scratch buffer reused across appends.
    buf: Vec<u8>,
}

impl ManifestWriter {
    /// Creates a fresh manifest log `MANIFEST-<number>` in `dir`.
    ///
    /// The caller is responsible for pointing `CURRENT` at it (after
    /// writing an initial snapshot edit).
    pub fn create(dir: &Path, number: u64) -> Result<ManifestWriter, VersionError> {
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(manifest_file_name(dir, number))?;
        Ok(ManifestWriter {
            log: wal::Writer::new(file),
            number,
            buf: Vec::new(),
        })
    }

    /// The manifest's file number.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Appends one edit and syncs it to disk. The edit is durable when
    /// this returns.
    pub fn append(&mut self, edit: &VersionEdit) -> Result<(), VersionError> {
        self.buf.clear();
        edit.encode_to(&mut self.buf);
        self.log.add_record(&self.buf)?;
        self.log.flush()?;
        self.log.get_ref().sync_all()?;
        Ok(())
    }
}

/// The level structure reconstructed by replaying a manifest.
#[derive(Debug)]
pub struct RecoveredState {
    pub comparator_name: Option<String>,
    pub log_number: u64,
    pub prev_log_number: u64,
    pub next_file_number: u64,
    pub last_sequence: u64,
    /// Table files per level. Level 0 is ordered newest first; deeper
    /// levels by smallest key.
    pub files: Vec<Vec<Arc<FileMetadata>>>,
    /// Per-level compaction resume hints.
    pub compact_pointers: Vec<Option<InternalKey>>,
}

/// Captures reader corruption reports so replay can turn them into a
/// fatal error: a manifest with an unreadable record cannot be trusted.
#[derive(Clone, Default)]
struct StrictReporter {
    corruption: Arc<Mutex<Option<String>>>,
}

impl wal::Reporter for StrictReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        let mut slot = self.corruption.lock().unwrap();
        if slot.is_none() {
            *slot = Some(format!("{reason} ({bytes} bytes)"));
        }
    }
}

/// Replays the manifest named by `CURRENT` and rebuilds the level
/// structure.
///
/// # Errors
///
/// Any decode failure refuses to open the store: a missing `CURRENT`,
/// an unreadable record, a malformed edit, or a manifest that never
/// established the required counters.
pub fn recover(dir: &Path) -> Result<RecoveredState, VersionError> {
    let current = fs::read_to_string(current_file_name(dir))?;
    let manifest_name = current.trim_end_matches('\n');
    if manifest_name.is_empty() || current == manifest_name {
        return Err(VersionError::Corrupt(
            "CURRENT does not end with a newline".into(),
        ));
    }

    let manifest_path = dir.join(manifest_name);
    let file = File::open(&manifest_path)?;
    let reporter = StrictReporter::default();
    let mut reader = wal::Reader::new(
        BufReader::new(file),
        Some(Box::new(reporter.clone())),
        true,
        0,
    );

    let mut builder = LevelBuilder::new();
    let mut comparator_name = None;
    let mut log_number = None;
    let mut prev_log_number = None;
    let mut next_file_number = None;
    let mut last_sequence = None;
    let mut compact_pointers: Vec<Option<InternalKey>> = vec![None; NUM_LEVELS];

    let mut record = Vec::new();
    let mut edits = 0usize;
    while reader.read_record(&mut record) {
        let edit = VersionEdit::decode_from(&record)?;

        if edit.comparator_name.is_some() {
            comparator_name = edit.comparator_name.clone();
        }
        if let Some(n) = edit.log_number {
            log_number = Some(n);
        }
        if let Some(n) = edit.prev_log_number {
            prev_log_number = Some(n);
        }
        if let Some(n) = edit.next_file_number {
            next_file_number = Some(n);
        }
        if let Some(seq) = edit.last_sequence {
            last_sequence = Some(seq);
        }
        for (level, key) in &edit.compact_pointers {
            compact_pointers[*level] = Some(key.clone());
        }

        builder.apply(&edit);
        edits += 1;
    }

    // a reported corruption is fatal here, unlike WAL replay
    if let Some(reason) = reporter.corruption.lock().unwrap().take() {
        warn!("manifest {}: {reason}", manifest_path.display());
        return Err(VersionError::Corrupt(reason));
    }

    let next_file_number = next_file_number
        .ok_or_else(|| VersionError::Corrupt("no next-file-number entry in manifest".into()))?;
    let log_number = log_number
        .ok_or_else(|| VersionError::Corrupt("no log-number entry in manifest".into()))?;
    let last_sequence = last_sequence
        .ok_or_else(|| VersionError::Corrupt("no last-sequence entry in manifest".into()))?;

    let files = builder.finish();
    info!(
        "recovered manifest {}: {} edits, {} files, last sequence {}",
        manifest_path.display(),
        edits,
        files.iter().map(Vec::len).sum::<usize>(),
        last_sequence
    );

    Ok(RecoveredState {
        comparator_name,
        log_number,
        prev_log_number: prev_log_number.unwrap_or(0),
        next_file_number,
        last_sequence,
        files,
        compact_pointers,
    })
}

/// Accumulates edits into per-level file sets.
struct LevelBuilder {
    levels: Vec<std::collections::BTreeMap<u64, Arc<FileMetadata>>>,
}

impl LevelBuilder {
    fn new() -> LevelBuilder {
        LevelBuilder {
            levels: (0..NUM_LEVELS).map(|_| Default::default()).collect(),
        }
    }

    fn apply(&mut self, edit: &VersionEdit) {
        for (level, number) in &edit.deleted_files {
            self.levels[*level].remove(number);
        }
        for f in &edit.new_files {
            self.levels[f.level].insert(
                f.number,
                FileMetadata::new(f.number, f.file_size, f.smallest.clone(), f.largest.clone()),
            );
        }
    }

    fn finish(self) -> Vec<Vec<Arc<FileMetadata>>> {
        self.levels
            .into_iter()
            .enumerate()
            .map(|(level, files)| {
                let mut files: Vec<_> = files.into_values().collect();
                if level == 0 {
                    // newest first: higher file numbers shadow lower ones
                    files.sort_by(|a, b| b.number.cmp(&a.number));
                } else {
                    files.sort_by(|a, b| a.smallest.encoded().cmp(b.smallest.encoded()));
                }
                files
            })
            .collect()
    }
}
