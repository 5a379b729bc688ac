//! Committed page versions not yet checkpointed into the storage file.
//!
//! Each commit publishes its staged pages under a commit sequence number.
//! Readers resolve a page as the newest version at or before their snapshot;
//! missing both means the storage file already holds the right image.

use crate::storage::page::{PageData, PageId};
use dashmap::DashMap;
use std::sync::Arc;

/// Commit sequence number. 0 is the state of the storage file itself.
pub type Sequence = u64;

#[derive(Default)]
pub struct VersionStore {
    pages: DashMap<PageId, Vec<(Sequence, Arc<PageData>)>>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish one commit's pages. Sequences arrive in increasing order, so
    /// each per-page version list stays sorted by construction.
    pub fn publish(&self, sequence: Sequence, pages: impl IntoIterator<Item = (PageId, Arc<PageData>)>) {
        for (page_id, image) in pages {
            self.pages.entry(page_id).or_default().push((sequence, image));
        }
    }

    /// Newest version of `page_id` visible at `snapshot`.
    pub fn latest_at(&self, page_id: PageId, snapshot: Sequence) -> Option<Arc<PageData>> {
        let versions = self.pages.get(&page_id)?;
        versions
            .iter()
            .rev()
            .find(|(seq, _)| *seq <= snapshot)
            .map(|(_, image)| image.clone())
    }

    /// Sequence of the newest committed version of `page_id`, if any.
    pub fn latest_sequence(&self, page_id: PageId) -> Option<Sequence> {
        self.pages.get(&page_id).and_then(|v| v.last().map(|(s, _)| *s))
    }

    /// Newest version of every page, for checkpointing.
    pub fn latest_pages(&self) -> Vec<(PageId, Arc<PageData>)> {
        self.pages
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .last()
                    .map(|(_, image)| (*entry.key(), image.clone()))
            })
            .collect()
    }

    /// Forget everything; valid only after a checkpoint has flushed the
    /// newest versions to the storage file and no snapshot needs the rest.
    pub fn clear(&self) {
        self.pages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
