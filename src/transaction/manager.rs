//! Transaction manager: coordinates snapshots, the single writer slot, the
//! commit protocol, and checkpoints.
//!
//! A transaction reads pages in this order: its own write set, then the
//! newest committed version at or before its snapshot, then the page cache.
//! Mutations stage page copies in the write set; the first mutation claims
//! the writer slot, which serializes writers without blocking readers.
//!
//! Commit protocol: validate the write set against commits newer than the
//! snapshot (first committer wins), append every staged page to the WAL,
//! append the commit marker, fsync, then publish the pages to the version
//! store under a fresh commit sequence.

use crate::access::PageStore;
use crate::error::{Error, Result};
use crate::storage::buffer::PageCache;
use crate::storage::disk::{encode_free_page, free_page_next, Header};
use crate::storage::page::{PageData, PageId};
use crate::storage::wal::WalManager;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::id::{TransactionId, TransactionIdGenerator};
use super::state::TransactionState;
use super::version::{Sequence, VersionStore};

#[derive(Debug, Clone)]
pub struct TransactionManagerOptions {
    /// How long a transaction's first mutation may wait for the writer slot
    /// before giving up with `Conflict`.
    pub writer_wait: Duration,
}

impl Default for TransactionManagerOptions {
    fn default() -> Self {
        Self {
            writer_wait: Duration::from_secs(5),
        }
    }
}

struct Shared {
    cache: PageCache,
    wal: WalManager,
    versions: VersionStore,
    ids: TransactionIdGenerator,
    last_commit: AtomicU64,
    writer: Mutex<Option<TransactionId>>,
    writer_released: Condvar,
    active: Mutex<HashSet<TransactionId>>,
    options: TransactionManagerOptions,
}

#[derive(Clone)]
pub struct TransactionManager {
    shared: Arc<Shared>,
}

impl TransactionManager {
    pub fn new(cache: PageCache, wal: WalManager, options: TransactionManagerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache,
                wal,
                versions: VersionStore::new(),
                ids: TransactionIdGenerator::new(),
                last_commit: AtomicU64::new(0),
                writer: Mutex::new(None),
                writer_released: Condvar::new(),
                active: Mutex::new(HashSet::new()),
                options,
            }),
        }
    }

    /// Start a transaction against a snapshot of the last committed state.
    pub fn begin(&self) -> Transaction {
        let id = self.shared.ids.next();
        let snapshot = self.shared.last_commit.load(Ordering::SeqCst);
        self.shared.active.lock().insert(id);
        log::debug!("{id} begins at sequence {snapshot}");
        Transaction {
            shared: Arc::clone(&self.shared),
            id,
            snapshot,
            state: TransactionState::Active,
            writes: HashMap::new(),
            write_order: Vec::new(),
            holds_writer: false,
        }
    }

    /// Apply all committed versions to the storage file and truncate the
    /// WAL. Requires quiescence: returns `Ok(false)` without doing anything
    /// when any transaction is live.
    pub fn checkpoint(&self) -> Result<bool> {
        let active = self.shared.active.lock();
        if !active.is_empty() {
            return Ok(false);
        }

        // Holding the active-set lock keeps new transactions out for the
        // duration; the version store is therefore stable.
        let pages = self.shared.versions.latest_pages();
        if pages.is_empty() && self.shared.wal.size()? == 0 {
            return Ok(true);
        }

        let flushed = pages.len();
        for (page_id, image) in pages {
            self.shared.cache.put(page_id, image)?;
        }
        self.shared.cache.flush_all()?;
        self.shared.cache.sync()?;
        let lsn = self.shared.wal.checkpoint()?;
        self.shared.versions.clear();
        log::info!("checkpoint at {lsn}: {flushed} page(s) flushed");
        Ok(true)
    }

    /// Checkpoint once the WAL outgrows `threshold` bytes, if quiescent.
    pub fn maybe_checkpoint(&self, threshold: u64) -> Result<bool> {
        if self.shared.wal.size()? >= threshold {
            self.checkpoint()
        } else {
            Ok(false)
        }
    }

    /// Number of live transactions, for diagnostics and tests.
    pub fn active_count(&self) -> usize {
        self.shared.active.lock().len()
    }
}

/// Marker for [`Transaction::rollback_to`], capturing the staged pages at
/// one point in time.
pub struct SavePoint {
    writes: HashMap<PageId, Arc<PageData>>,
    write_order: Vec<PageId>,
}

/// A running transaction. Dropping it without committing aborts it.
pub struct Transaction {
    shared: Arc<Shared>,
    id: TransactionId,
    snapshot: Sequence,
    state: TransactionState,
    writes: HashMap<PageId, Arc<PageData>>,
    write_order: Vec<PageId>,
    holds_writer: bool,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn snapshot(&self) -> Sequence {
        self.snapshot
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether any pages have been staged.
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    /// Decoded header page as this transaction sees it.
    pub fn header(&mut self) -> Result<Header> {
        let image = self.read(PageId::HEADER)?;
        Header::decode(&image)
    }

    /// Stage a new header page image.
    pub fn set_header(&mut self, header: &Header) -> Result<()> {
        self.write(PageId::HEADER, header.encode()?)
    }

    /// Snapshot of the staged pages, for statement-level rollback. Cheap:
    /// the page images are shared, only the map is copied.
    pub fn savepoint(&self) -> SavePoint {
        SavePoint {
            writes: self.writes.clone(),
            write_order: self.write_order.clone(),
        }
    }

    /// Drop everything staged after `savepoint` was taken.
    pub fn rollback_to(&mut self, savepoint: SavePoint) {
        self.writes = savepoint.writes;
        self.write_order = savepoint.write_order;
    }

    /// Commit: validate, log, fsync, publish.
    pub fn commit(mut self) -> Result<()> {
        if self.writes.is_empty() {
            self.finish(TransactionState::Committed);
            return Ok(());
        }

        self.state = TransactionState::Committing;

        // First committer wins: any page we staged that someone committed
        // after our snapshot invalidates us.
        let conflict = self.writes.keys().copied().find(|page_id| {
            matches!(
                self.shared.versions.latest_sequence(*page_id),
                Some(seq) if seq > self.snapshot
            )
        });
        if let Some(page_id) = conflict {
            self.finish(TransactionState::Aborted);
            return Err(Error::Conflict(format!(
                "{page_id} was modified after this transaction began"
            )));
        }

        // Write-ahead: every staged page, then the commit marker, all
        // durable before anything becomes visible.
        for page_id in &self.write_order {
            let image = &self.writes[page_id];
            self.shared
                .wal
                .append_page_image(self.id.0, *page_id, image)?;
        }
        self.shared.wal.append_commit(self.id.0)?;

        let sequence = self.shared.last_commit.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.versions.publish(sequence, self.writes.drain());
        log::debug!("{} committed at sequence {sequence}", self.id);

        self.finish(TransactionState::Committed);
        Ok(())
    }

    /// Discard all staged pages. Nothing of this transaction survives.
    pub fn abort(mut self) -> Result<()> {
        log::debug!("{} aborted", self.id);
        self.finish(TransactionState::Aborted);
        Ok(())
    }

    fn finish(&mut self, state: TransactionState) {
        self.writes.clear();
        self.write_order.clear();
        if self.holds_writer {
            let mut writer = self.shared.writer.lock();
            if *writer == Some(self.id) {
                *writer = None;
            }
            self.holds_writer = false;
            drop(writer);
            self.shared.writer_released.notify_all();
        }
        self.shared.active.lock().remove(&self.id);
        self.state = state;
    }

    /// Claim the writer slot, blocking up to the configured wait.
    fn ensure_writer(&mut self) -> Result<()> {
        if self.holds_writer {
            return Ok(());
        }
        let mut writer = self.shared.writer.lock();
        let deadline = std::time::Instant::now() + self.shared.options.writer_wait;
        while writer.is_some() {
            if self
                .shared
                .writer_released
                .wait_until(&mut writer, deadline)
                .timed_out()
            {
                return Err(Error::Conflict(
                    "timed out waiting for the writer slot".into(),
                ));
            }
        }
        *writer = Some(self.id);
        self.holds_writer = true;
        Ok(())
    }
}

impl PageStore for Transaction {
    fn read(&mut self, page_id: PageId) -> Result<Arc<PageData>> {
        if let Some(image) = self.writes.get(&page_id) {
            return Ok(image.clone());
        }
        if let Some(image) = self.shared.versions.latest_at(page_id, self.snapshot) {
            return Ok(image);
        }
        self.shared.cache.fetch(page_id)
    }

    fn write(&mut self, page_id: PageId, image: Box<PageData>) -> Result<()> {
        self.ensure_writer()?;
        if !self.writes.contains_key(&page_id) {
            self.write_order.push(page_id);
        }
        self.writes.insert(page_id, Arc::from(image));
        Ok(())
    }

    fn allocate(&mut self) -> Result<PageId> {
        let mut header = self.header()?;
        let page_id = match header.free_head {
            Some(free) => {
                let image = self.read(free)?;
                header.free_head = free_page_next(&image)?;
                free
            }
            None => {
                let fresh = PageId(header.page_count);
                header.page_count += 1;
                fresh
            }
        };
        self.set_header(&header)?;
        Ok(page_id)
    }

    fn free(&mut self, page_id: PageId) -> Result<()> {
        let mut header = self.header()?;
        self.write(page_id, encode_free_page(header.free_head))?;
        header.free_head = Some(page_id);
        self.set_header(&header)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            log::debug!("{} dropped while {}; aborting", self.id, self.state);
            self.finish(TransactionState::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::StorageFile;
    use crate::storage::page::PAGE_SIZE;
    use crate::storage::wal::{Lsn, WalOptions};
    use tempfile::TempDir;

    fn test_manager() -> (TransactionManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = StorageFile::create(&dir.path().join("t.qdb")).unwrap();
        let cache = PageCache::new(storage, 64);
        let wal = WalManager::open(
            &dir.path().join("t.wal"),
            WalOptions {
                sync_on_write: false,
            },
            Lsn(0),
        )
        .unwrap();
        let manager = TransactionManager::new(cache, wal, TransactionManagerOptions::default());
        (manager, dir)
    }

    fn image(fill: u8) -> Box<PageData> {
        Box::new([fill; PAGE_SIZE])
    }

    /// Allocate a page holding `fill` bytes and commit; returns the page id.
    fn seed_page(manager: &TransactionManager, fill: u8) -> PageId {
        let mut tx = manager.begin();
        let page_id = tx.allocate().unwrap();
        tx.write(page_id, image(fill)).unwrap();
        tx.commit().unwrap();
        page_id
    }

    #[test]
    fn test_read_your_own_writes_before_commit() -> Result<()> {
        let (manager, _dir) = test_manager();
        let mut tx = manager.begin();
        let page_id = tx.allocate()?;
        tx.write(page_id, image(0x5a))?;

        assert_eq!(tx.read(page_id)?[0], 0x5a);
        Ok(())
    }

    #[test]
    fn test_commit_publishes_to_later_transactions() -> Result<()> {
        let (manager, _dir) = test_manager();
        let page_id = seed_page(&manager, 0x11);

        let mut reader = manager.begin();
        assert_eq!(reader.read(page_id)?[0], 0x11);
        Ok(())
    }

    #[test]
    fn test_snapshot_isolation() -> Result<()> {
        let (manager, _dir) = test_manager();
        let page_id = seed_page(&manager, 1);

        let mut old_reader = manager.begin();
        assert_eq!(old_reader.read(page_id)?[0], 1);

        // A later writer overwrites the page and commits.
        let mut writer = manager.begin();
        writer.write(page_id, image(2))?;
        writer.commit()?;

        // The old snapshot still sees the original image.
        assert_eq!(old_reader.read(page_id)?[0], 1);

        // A fresh transaction sees the new one.
        let mut fresh = manager.begin();
        assert_eq!(fresh.read(page_id)?[0], 2);
        Ok(())
    }

    #[test]
    fn test_first_committer_wins() -> Result<()> {
        let (manager, _dir) = test_manager();
        let page_id = seed_page(&manager, 0);

        let a = manager.begin();
        let b = manager.begin();

        // B stages and commits first.
        let mut b = b;
        b.write(page_id, image(0xb0))?;
        b.commit()?;

        // A staged against the same page; its commit must conflict.
        let mut a = a;
        a.write(page_id, image(0xa0))?;
        let err = a.commit().unwrap_err();
        assert!(err.is_retryable(), "expected Conflict, got {err}");

        let mut fresh = manager.begin();
        assert_eq!(fresh.read(page_id)?[0], 0xb0);
        Ok(())
    }

    #[test]
    fn test_writer_slot_times_out() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let storage = StorageFile::create(&dir.path().join("t.qdb")).unwrap();
        let cache = PageCache::new(storage, 64);
        let wal = WalManager::open(
            &dir.path().join("t.wal"),
            WalOptions {
                sync_on_write: false,
            },
            Lsn(0),
        )?;
        let manager = TransactionManager::new(
            cache,
            wal,
            TransactionManagerOptions {
                writer_wait: Duration::from_millis(20),
            },
        );
        let page_id = seed_page(&manager, 0);

        let mut holder = manager.begin();
        holder.write(page_id, image(1))?;

        let mut blocked = manager.begin();
        let err = blocked.write(page_id, image(2)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        holder.commit()?;
        Ok(())
    }

    #[test]
    fn test_writer_slot_passes_on_commit() -> Result<()> {
        let (manager, _dir) = test_manager();
        let page_id = seed_page(&manager, 0);

        let mut holder = manager.begin();
        holder.write(page_id, image(1))?;

        let manager2 = manager.clone();
        let waiter = std::thread::spawn(move || {
            let mut tx = manager2.begin();
            // Blocks until the holder commits, then conflicts at commit
            // because the holder already rewrote the page.
            tx.write(page_id, image(2)).unwrap();
            tx.commit()
        });

        std::thread::sleep(Duration::from_millis(50));
        holder.commit()?;

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(Error::Conflict(_))));
        Ok(())
    }

    #[test]
    fn test_abort_discards_everything() -> Result<()> {
        let (manager, _dir) = test_manager();

        let mut tx = manager.begin();
        let page_id = tx.allocate()?;
        tx.write(page_id, image(9))?;
        tx.abort()?;

        // The allocation never happened: the header still counts one page.
        let mut fresh = manager.begin();
        assert_eq!(fresh.header()?.page_count, 1);
        assert!(fresh.read(page_id).is_err());
        Ok(())
    }

    #[test]
    fn test_drop_aborts() -> Result<()> {
        let (manager, _dir) = test_manager();

        {
            let mut tx = manager.begin();
            let page_id = tx.allocate()?;
            tx.write(page_id, image(9))?;
            // Dropped without commit.
        }
        assert_eq!(manager.active_count(), 0);

        let mut fresh = manager.begin();
        assert_eq!(fresh.header()?.page_count, 1);
        Ok(())
    }

    #[test]
    fn test_free_list_reuses_pages() -> Result<()> {
        let (manager, _dir) = test_manager();
        let page_id = seed_page(&manager, 1);

        let mut tx = manager.begin();
        tx.free(page_id)?;
        tx.commit()?;

        let mut tx = manager.begin();
        let reused = tx.allocate()?;
        assert_eq!(reused, page_id);
        // Reuse popped the list: the next allocation extends the file.
        let fresh = tx.allocate()?;
        assert_eq!(fresh.0, tx.header()?.page_count - 1);
        tx.abort()?;
        Ok(())
    }

    #[test]
    fn test_savepoint_rolls_back_partial_statement() -> Result<()> {
        let (manager, _dir) = test_manager();
        let page_a = seed_page(&manager, 0);

        let mut tx = manager.begin();
        tx.write(page_a, image(1))?;

        let savepoint = tx.savepoint();
        let page_b = tx.allocate()?;
        tx.write(page_b, image(2))?;
        tx.rollback_to(savepoint);

        // The earlier write survives, the later allocation does not.
        assert_eq!(tx.read(page_a)?[0], 1);
        assert_eq!(tx.header()?.page_count, page_b.0);
        tx.commit()?;

        let mut fresh = manager.begin();
        assert_eq!(fresh.read(page_a)?[0], 1);
        Ok(())
    }

    #[test]
    fn test_checkpoint_requires_quiescence() -> Result<()> {
        let (manager, _dir) = test_manager();
        seed_page(&manager, 1);

        let live = manager.begin();
        assert!(!manager.checkpoint()?);
        drop(live);
        assert!(manager.checkpoint()?);
        Ok(())
    }

    #[test]
    fn test_checkpoint_flushes_and_truncates() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("t.qdb");
        let wal_path = dir.path().join("t.wal");

        let storage = StorageFile::create(&db_path).unwrap();
        let cache = PageCache::new(storage, 64);
        let wal = WalManager::open(
            &wal_path,
            WalOptions {
                sync_on_write: false,
            },
            Lsn(0),
        )?;
        let manager = TransactionManager::new(cache, wal, TransactionManagerOptions::default());

        let page_id = seed_page(&manager, 0x77);
        assert!(manager.checkpoint()?);
        assert_eq!(std::fs::metadata(&wal_path)?.len(), 0);

        // The storage file alone now carries the committed page.
        let mut reopened = StorageFile::open(&db_path)?;
        let mut buf = [0u8; PAGE_SIZE];
        reopened.read_page(page_id, &mut buf)?;
        assert_eq!(buf[0], 0x77);
        Ok(())
    }
}
