//! WAL replay on open.
//!
//! Corruption here is recoverable by design: the log's tail is expected
//! to be torn after a crash. Skipped regions are logged and replay keeps
//! whatever was readable before them. A batch that fails its own
//! integrity checks aborts only that batch's replay.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::warn;
use memtable::MemTable;

use crate::batch::BATCH_HEADER_SIZE;
use crate::error::Result;
use crate::WriteBatch;

/// Forwards reader corruption reports to the log.
struct LogReporter {
    path: String,
}

impl wal::Reporter for LogReporter {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        warn!("wal {}: dropping {bytes} bytes: {reason}", self.path);
    }
}

/// Replays the log at `path` into `mem`, returning the highest sequence
/// number applied (or `None` if the log is absent or empty).
pub(crate) fn replay_log(
    path: &Path,
    mem: &MemTable,
    verify_checksums: bool,
) -> Result<Option<u64>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let reporter = LogReporter {
        path: path.display().to_string(),
    };
    let mut reader = wal::Reader::new(
        BufReader::new(file),
        Some(Box::new(reporter)),
        verify_checksums,
        0,
    );

    let mut record = Vec::new();
    let mut batch = WriteBatch::new();
    let mut max_sequence = None;

    while reader.read_record(&mut record) {
        if record.len() < BATCH_HEADER_SIZE {
            warn!(
                "wal {}: dropping undersized record ({} bytes)",
                path.display(),
                record.len()
            );
            continue;
        }
        if batch.set_contents(&record).is_err() {
            continue;
        }

        match batch.insert_into(mem) {
            Ok(()) => {
                if batch.count() > 0 {
                    let last = batch.sequence() + u64::from(batch.count()) - 1;
                    max_sequence = Some(max_sequence.map_or(last, |m: u64| m.max(last)));
                }
            }
            // a corrupt batch aborts only its own replay
            Err(e) => warn!("wal {}: dropping batch: {e}", path.display()),
        }
    }

    Ok(max_sequence)
}
