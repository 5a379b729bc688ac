//! WAL manager: appends frames, enforces write-ahead durability, and replays
//! the log into the storage file on startup.

use super::record::{Lsn, WalFrame, WalPayload};
use crate::error::Result;
use crate::storage::disk::StorageFile;
use crate::storage::page::{PageData, PageId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Fsync after every append. Turning this off loses the durability
    /// guarantee and is only meant for tests.
    pub sync_on_write: bool,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self { sync_on_write: true }
    }
}

struct WalState {
    file: File,
    next_lsn: Lsn,
}

/// Append-only log over a single sidecar file, truncated at checkpoint.
pub struct WalManager {
    state: Mutex<WalState>,
    options: WalOptions,
}

/// What `recover` found and applied.
#[derive(Debug, Default, PartialEq)]
pub struct RecoverySummary {
    pub committed_transactions: usize,
    pub replayed_pages: usize,
    pub next_lsn: Lsn,
}

impl WalManager {
    /// Open (or create) the log file. `start_lsn` continues the sequence
    /// established before the last truncation; recovery computes it.
    pub fn open(path: &Path, options: WalOptions, start_lsn: Lsn) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            state: Mutex::new(WalState {
                file,
                next_lsn: start_lsn.next(),
            }),
            options,
        })
    }

    /// Append a page after-image for a transaction.
    pub fn append_page_image(
        &self,
        transaction_id: u64,
        page_id: PageId,
        image: &PageData,
    ) -> Result<Lsn> {
        self.append(|lsn| WalFrame::page_image(lsn, transaction_id, page_id.0, image))
    }

    /// Append the commit marker that makes a transaction's frames effective.
    pub fn append_commit(&self, transaction_id: u64) -> Result<Lsn> {
        self.append(|lsn| WalFrame::commit(lsn, transaction_id))
    }

    /// Record a checkpoint and truncate the log. Callers must have applied
    /// and synced every committed frame to the storage file first.
    pub fn checkpoint(&self) -> Result<Lsn> {
        let mut state = self.state.lock();
        let lsn = state.next_lsn;
        state.next_lsn = lsn.next();

        let bytes = WalFrame::checkpoint(lsn).encode()?;
        state.file.write_all(&bytes)?;
        state.file.sync_all()?;

        state.file.set_len(0)?;
        state.file.sync_all()?;
        Ok(lsn)
    }

    /// Current log size in bytes; drives the auto-checkpoint policy.
    pub fn size(&self) -> Result<u64> {
        Ok(self.state.lock().file.metadata()?.len())
    }

    fn append(&self, make: impl FnOnce(Lsn) -> WalFrame) -> Result<Lsn> {
        let mut state = self.state.lock();
        let lsn = state.next_lsn;
        state.next_lsn = lsn.next();

        let bytes = make(lsn).encode()?;
        state.file.write_all(&bytes)?;
        if self.options.sync_on_write {
            state.file.sync_all()?;
        }
        Ok(lsn)
    }

    /// Replay the log into the storage file, then truncate it.
    ///
    /// Committed transactions are redone in commit order; frames from
    /// transactions with no commit marker are discarded. A torn frame at the
    /// tail ends the scan; a checksum mismatch anywhere is `Corruption` and
    /// aborts recovery without touching the storage file.
    pub fn recover(path: &Path, storage: &mut StorageFile) -> Result<RecoverySummary> {
        let mut buf = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut buf)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RecoverySummary::default())
            }
            Err(e) => return Err(e.into()),
        }

        let mut pending: std::collections::HashMap<u64, Vec<(u32, Box<PageData>)>> =
            std::collections::HashMap::new();
        let mut committed: Vec<(u32, Box<PageData>)> = Vec::new();
        let mut committed_transactions = 0usize;
        let mut max_lsn = Lsn(0);

        let mut offset = 0usize;
        while offset < buf.len() {
            let Some((frame, used)) = WalFrame::decode(&buf[offset..])? else {
                log::warn!(
                    "wal ends with a torn frame at byte {offset}; discarding the tail"
                );
                break;
            };
            offset += used;
            max_lsn = max_lsn.max(frame.lsn);

            match frame.payload {
                WalPayload::PageImage { .. } => {
                    let transaction_id = frame.transaction_id;
                    if let Some((page_id, image)) = frame.into_page_image()? {
                        pending
                            .entry(transaction_id)
                            .or_default()
                            .push((page_id, image));
                    }
                }
                WalPayload::Commit => {
                    if let Some(frames) = pending.remove(&frame.transaction_id) {
                        committed.extend(frames);
                    }
                    committed_transactions += 1;
                }
                WalPayload::Checkpoint => {
                    // Everything before this marker already reached the
                    // storage file; replaying it again would be idempotent
                    // but pointless.
                    committed.clear();
                    pending.clear();
                }
            }
        }

        let replayed_pages = committed.len();
        for (page_id, image) in committed {
            storage.write_page(PageId(page_id), &image)?;
        }
        if replayed_pages > 0 {
            storage.sync()?;
        }
        if replayed_pages > 0 || committed_transactions > 0 {
            log::info!(
                "recovered {committed_transactions} committed transaction(s), \
                 {replayed_pages} page image(s) replayed"
            );
        }

        // The log's work is done; start it fresh.
        let file = OpenOptions::new().write(true).create(true).open(path)?;
        file.set_len(0)?;
        file.sync_all()?;

        Ok(RecoverySummary {
            committed_transactions,
            replayed_pages,
            next_lsn: max_lsn,
        })
    }
}
