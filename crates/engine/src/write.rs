//! Write path: the single-writer group-commit queue, memtable rotation,
//! and the flush that turns a retired memtable into a table file.
//!
//! Every writer joins a queue. The front writer becomes the **leader**:
//! it merges the queued batches into one, stamps sequence numbers,
//! appends a single WAL record, applies the merged batch to the
//! memtable, then hands each queued writer the shared outcome and
//! promotes the next leader. One writer is active at a time; everyone
//! else is parked on their ticket.

use std::fs::{self, File};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, info, warn};
use memtable::MemTable;
use version::{FileMetadata, VersionEdit};

use crate::error::Result;
use crate::{log_file_name, Db, TableLoader, WriteBatch};

/// Most batches merged into one commit.
const MAX_GROUP_COUNT: usize = 32;

/// Byte ceiling for a merged commit.
const MAX_GROUP_BYTES: usize = 1 << 20;

/// One queued write.
pub(crate) struct Ticket {
    /// Taken by the leader when the batch joins a commit group.
    batch: Mutex<Option<WriteBatch>>,
    state: Mutex<TicketState>,
    cv: Condvar,
}

#[derive(Default)]
struct TicketState {
    done: bool,
    result: Option<Result<()>>,
    /// Set when this ticket is promoted to lead the next group.
    leader: bool,
}

impl Ticket {
    fn new(batch: WriteBatch) -> Ticket {
        Ticket {
            batch: Mutex::new(Some(batch)),
            state: Mutex::new(TicketState::default()),
            cv: Condvar::new(),
        }
    }
}

impl<L: TableLoader> Db<L> {
    /// Inserts `key -> value`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    /// Deletes `key` by writing a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    /// Applies `batch` atomically: logged to the WAL, then applied to the
    /// memtable, with sequence numbers assigned contiguously in batch
    /// order.
    ///
    /// Concurrent callers are merged into group commits; every writer in
    /// a group observes the same outcome.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        let ticket = Arc::new(Ticket::new(batch));

        let immediately_leading = {
            let mut queue = self.writers.lock().unwrap();
            queue.push_back(Arc::clone(&ticket));
            queue.len() == 1
        };

        if !immediately_leading {
            let mut state = ticket.state.lock().unwrap();
            while !state.done && !state.leader {
                state = ticket.cv.wait(state).unwrap();
            }
            if state.done {
                // a leader committed our batch for us
                return state.result.take().unwrap_or(Ok(()));
            }
            // promoted: fall through and lead the next group
        }

        self.lead_group(&ticket)
    }

    /// Runs one commit group with `leader` at the front of the queue.
    fn lead_group(&self, leader: &Arc<Ticket>) -> Result<()> {
        let room = self.make_room_for_write();

        // group members are whatever is queued right now, leader first
        let group: Vec<Arc<Ticket>> = {
            let queue = self.writers.lock().unwrap();
            debug_assert!(Arc::ptr_eq(&queue[0], leader));
            let mut bytes = 0usize;
            queue
                .iter()
                .take(MAX_GROUP_COUNT)
                .take_while(|t| {
                    let size = t
                        .batch
                        .lock()
                        .unwrap()
                        .as_ref()
                        .map_or(0, WriteBatch::approximate_size);
                    bytes += size;
                    bytes <= MAX_GROUP_BYTES || Arc::ptr_eq(t, leader)
                })
                .cloned()
                .collect()
        };

        let result = match room {
            Ok(()) => self.commit_group(&group),
            Err(e) => Err(e),
        };

        // deliver the shared outcome and promote the next leader
        {
            let mut queue = self.writers.lock().unwrap();
            for ticket in &group {
                let popped = queue.pop_front();
                debug_assert!(popped.is_some());
                if !Arc::ptr_eq(ticket, leader) {
                    let mut state = ticket.state.lock().unwrap();
                    state.done = true;
                    state.result = Some(result.clone());
                    ticket.cv.notify_one();
                }
            }
            if let Some(next) = queue.front() {
                let mut state = next.state.lock().unwrap();
                state.leader = true;
                next.cv.notify_one();
            }
        }

        result
    }

    /// Merges the group into one batch, logs it, applies it.
    fn commit_group(&self, group: &[Arc<Ticket>]) -> Result<()> {
        let mut merged: Option<WriteBatch> = None;
        for ticket in group {
            if let Some(batch) = ticket.batch.lock().unwrap().take() {
                match merged.as_mut() {
                    None => merged = Some(batch),
                    Some(m) => m.append(&batch),
                }
            }
        }
        let mut batch = match merged {
            Some(b) if !b.is_empty() => b,
            // an all-empty group still commits (and syncs) vacuously
            _ => return Ok(()),
        };

        let base = self.last_sequence.load(Ordering::Acquire);
        batch.set_sequence(base + 1);
        let count = u64::from(batch.count());

        // log before memtable: the order that makes recovery possible
        {
            let mut wal = self.wal.lock().unwrap();
            wal.log.add_record(batch.contents())?;
            wal.log.flush()?;
            if self.options.wal_sync {
                wal.log.get_ref().sync_all()?;
            }
        }

        let mem = self.mem.read().unwrap().clone();
        batch.insert_into(&mem)?;

        self.last_sequence.store(base + count, Ordering::Release);
        Ok(())
    }

    /// Rotates the memtable when it outgrows the write buffer, flushing
    /// the retired table synchronously.
    fn make_room_for_write(&self) -> Result<()> {
        // finish a flush that failed on an earlier rotation first; its
        // data is still only in the retired memtable and the old log
        let pending = self
            .imm
            .read()
            .unwrap()
            .as_ref()
            .map(|r| (Arc::clone(&r.mem), r.log_number));
        if let Some((mem, log_number)) = pending {
            self.flush_memtable(&mem, log_number)?;
            self.remove_obsolete_logs(log_number.saturating_sub(1));
            *self.imm.write().unwrap() = None;
        }

        let usage = self.mem.read().unwrap().approximate_memory_usage();
        if usage < self.options.write_buffer_size {
            return Ok(());
        }

        let new_log_number = self.versions.lock().unwrap().new_file_number();
        let old_log_number;

        let log_file = File::create(log_file_name(&self.dir, new_log_number))?;
        {
            let mut wal = self.wal.lock().unwrap();
            // everything in the old log must be durable before the
            // memtable it mirrors is considered flushable
            wal.log.flush()?;
            wal.log.get_ref().sync_all()?;
            old_log_number = wal.log_number;
            wal.log = wal::Writer::new(log_file);
            wal.log_number = new_log_number;
        }

        let retired = {
            let mut mem = self.mem.write().unwrap();
            let retired = Arc::clone(&*mem);
            *mem = Arc::new(MemTable::new(self.icmp.clone()));
            retired
        };
        *self.imm.write().unwrap() = Some(crate::RetiredMemTable {
            mem: Arc::clone(&retired),
            log_number: new_log_number,
        });
        debug!("rotated memtable ({usage} bytes) to log {new_log_number}, flushing");

        // on failure the retired table stays readable (and replayable
        // from the old log); the next write retries the flush
        self.flush_memtable(&retired, new_log_number)?;
        self.remove_obsolete_logs(old_log_number);
        *self.imm.write().unwrap() = None;
        Ok(())
    }

    /// Builds a table file from `mem` and records the flush in the
    /// manifest. `log_number` is the log covering writes newer than this
    /// memtable.
    fn flush_memtable(&self, mem: &MemTable, log_number: u64) -> Result<()> {
        if mem.is_empty() {
            return Ok(());
        }

        let file_number = self.versions.lock().unwrap().new_file_number();
        let built = self.factory.build_table(&self.dir, file_number, &mut mem.iter())?;
        info!(
            "flushed memtable to table {file_number} ({} bytes, {} entries)",
            built.file_size,
            mem.len()
        );

        let mut edit = VersionEdit::new();
        edit.set_log_number(log_number)
            .set_last_sequence(self.last_sequence.load(Ordering::Acquire));
        edit.add_file(
            0,
            file_number,
            built.file_size,
            built.smallest.clone(),
            built.largest.clone(),
        );

        let mut versions = self.versions.lock().unwrap();
        edit.set_next_file(versions.next_file_number);
        versions.manifest.append(&edit)?;
        versions.files[0].insert(
            0,
            FileMetadata::new(file_number, built.file_size, built.smallest, built.largest),
        );
        Ok(())
    }

    /// Deletes log files superseded by `current_log_number`.
    fn remove_obsolete_logs(&self, up_to: u64) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot scan {} for old logs: {e}", self.dir.display());
                return;
            }
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(number) = crate::parse_log_file_name(name) {
                    if number <= up_to {
                        match fs::remove_file(entry.path()) {
                            Ok(()) => debug!("removed obsolete log {name}"),
                            Err(e) => warn!("cannot remove log {name}: {e}"),
                        }
                    }
                }
            }
        }
    }
}
