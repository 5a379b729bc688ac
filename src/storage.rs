//! Storage layer: the durable foundation everything else builds on.
//!
//! - **Page**: fixed-size (4KB) blocks of data, the basic unit of I/O
//! - **StorageFile**: reads/writes pages, owns the header page and free list
//! - **PageCache**: in-memory cache with clean-only LRU eviction
//! - **WAL**: append-only redo log that makes commits atomic and durable

pub mod buffer;
pub mod disk;
pub mod page;
pub mod wal;

pub use buffer::PageCache;
pub use disk::{Header, StorageFile};
pub use page::{PageData, PageId, PAGE_SIZE};
