//! Access layer: typed values, order-preserving key encoding, and the B-tree
//! that maps keys to rows.
//!
//! The B-tree never talks to the cache or the disk directly. It reaches pages
//! through the [`PageStore`] seam, which a transaction implements with its
//! write set and snapshot; tests implement it with a plain map.

pub mod btree;
pub mod key;
pub mod value;

use crate::error::Result;
use crate::storage::page::{PageData, PageId};
use std::sync::Arc;

/// Page access as seen by the B-tree: reads resolve against the caller's
/// consistent view, writes are staged (never applied in place), and
/// allocation/release go through the caller's free-list bookkeeping.
pub trait PageStore {
    fn read(&mut self, page_id: PageId) -> Result<Arc<PageData>>;
    fn write(&mut self, page_id: PageId, image: Box<PageData>) -> Result<()>;
    fn allocate(&mut self) -> Result<PageId>;
    fn free(&mut self, page_id: PageId) -> Result<()>;
}

pub use btree::{BTree, RangeScan};
pub use key::{decode_key, encode_key};
pub use value::{deserialize_row, serialize_row, DataType, Value};
