pub mod lru;
pub mod replacer;

use crate::error::{Error, Result};
use crate::storage::disk::StorageFile;
use crate::storage::page::{PageData, PageId};
use lru::LruReplacer;
use parking_lot::{Mutex, RwLock};
use replacer::Replacer;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory cache of storage-file pages with dirty tracking.
///
/// Pages are shared as `Arc<PageData>`: concurrent fetches of the same page
/// observe the same image, and a transaction publishing a committed copy
/// hands the same allocation to the cache. Eviction is LRU restricted to
/// clean pages; a dirty page must be flushed before its slot is reclaimed.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    slots: RwLock<HashMap<PageId, Slot>>,
    replacer: Mutex<Box<dyn Replacer>>,
    disk: Mutex<StorageFile>,
    capacity: usize,
}

#[derive(Clone)]
struct Slot {
    image: Arc<PageData>,
    dirty: bool,
}

impl PageCache {
    pub fn new(disk: StorageFile, capacity: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                slots: RwLock::new(HashMap::with_capacity(capacity)),
                replacer: Mutex::new(Box::new(LruReplacer::new())),
                disk: Mutex::new(disk),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Fetch a page, reading it from the storage file on a miss.
    pub fn fetch(&self, page_id: PageId) -> Result<Arc<PageData>> {
        {
            let slots = self.inner.slots.read();
            if let Some(slot) = slots.get(&page_id) {
                self.inner.replacer.lock().record_access(page_id);
                return Ok(slot.image.clone());
            }
        }

        let mut slots = self.inner.slots.write();
        // Another thread may have loaded it while we waited.
        if let Some(slot) = slots.get(&page_id) {
            self.inner.replacer.lock().record_access(page_id);
            return Ok(slot.image.clone());
        }

        self.make_room(&mut slots)?;

        let mut buf = Box::new([0u8; crate::storage::page::PAGE_SIZE]);
        self.inner.disk.lock().read_page(page_id, &mut buf)?;
        let image: Arc<PageData> = Arc::from(buf);

        slots.insert(
            page_id,
            Slot {
                image: image.clone(),
                dirty: false,
            },
        );
        self.inner.replacer.lock().record_access(page_id);
        Ok(image)
    }

    /// Install a new image for a page and mark it dirty. Used when applying
    /// committed transactions at checkpoint time.
    pub fn put(&self, page_id: PageId, image: Arc<PageData>) -> Result<()> {
        let mut slots = self.inner.slots.write();
        if !slots.contains_key(&page_id) {
            self.make_room(&mut slots)?;
        }
        slots.insert(page_id, Slot { image, dirty: true });
        self.inner.replacer.lock().record_access(page_id);
        Ok(())
    }

    /// Write a single dirty page back to the storage file.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let mut slots = self.inner.slots.write();
        if let Some(slot) = slots.get_mut(&page_id) {
            if slot.dirty {
                self.inner.disk.lock().write_page(page_id, &slot.image)?;
                slot.dirty = false;
            }
        }
        Ok(())
    }

    /// Write every dirty page back to the storage file.
    pub fn flush_all(&self) -> Result<()> {
        let mut slots = self.inner.slots.write();
        let mut disk = self.inner.disk.lock();
        for (page_id, slot) in slots.iter_mut() {
            if slot.dirty {
                disk.write_page(*page_id, &slot.image)?;
                slot.dirty = false;
            }
        }
        Ok(())
    }

    /// Make all flushed pages durable.
    pub fn sync(&self) -> Result<()> {
        self.inner.disk.lock().sync()
    }

    /// Number of resident pages, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.inner.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict until a free slot exists. Prefers clean victims; falls back to
    /// flushing the coldest dirty page first, so dirty data is never lost.
    fn make_room(&self, slots: &mut HashMap<PageId, Slot>) -> Result<()> {
        while slots.len() >= self.inner.capacity {
            let mut replacer = self.inner.replacer.lock();
            let victim = replacer.evict(&|p| slots.get(&p).map(|s| !s.dirty).unwrap_or(true));
            match victim {
                Some(page_id) => {
                    slots.remove(&page_id);
                }
                None => {
                    // Everything resident is dirty: flush the coldest page,
                    // then evict it.
                    let page_id = replacer.evict(&|_| true).ok_or_else(|| {
                        Error::Internal("page cache full with no resident pages".into())
                    })?;
                    if let Some(slot) = slots.remove(&page_id) {
                        if slot.dirty {
                            log::debug!("evicting dirty {page_id} after forced flush");
                            self.inner.disk.lock().write_page(page_id, &slot.image)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
