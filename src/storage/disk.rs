//! Storage file: fixed-size pages behind a single file handle, with a
//! checksummed header page and a free list threaded through the pages.

use crate::error::{Error, Result};
use crate::storage::page::{PageData, PageId, PAGE_SIZE, PAGE_TYPE_FREE};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"QRTZ";
const FORMAT_VERSION: u32 = 1;

/// Fixed fields of the header page before the catalog bytes begin.
const HEADER_FIXED: usize = 28;

/// Maximum number of bytes the table directory may occupy.
pub const MAX_CATALOG_BYTES: usize = PAGE_SIZE - HEADER_FIXED;

/// Decoded header page: file-wide metadata plus the raw table directory.
///
/// The directory bytes are opaque here; `catalog` owns their layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub page_count: u32,
    pub free_head: Option<PageId>,
    pub catalog: Vec<u8>,
}

impl Header {
    /// Header of a freshly created file: just the header page itself.
    pub fn empty() -> Self {
        Self {
            page_count: 1,
            free_head: None,
            catalog: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Box<PageData>> {
        if self.catalog.len() > MAX_CATALOG_BYTES {
            return Err(Error::Schema(format!(
                "table directory overflows the header page ({} bytes, max {})",
                self.catalog.len(),
                MAX_CATALOG_BYTES
            )));
        }

        let mut data = Box::new([0u8; PAGE_SIZE]);
        data[0..4].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut data[4..8], FORMAT_VERSION);
        LittleEndian::write_u32(&mut data[8..12], PAGE_SIZE as u32);
        LittleEndian::write_u32(&mut data[12..16], self.page_count);
        LittleEndian::write_u32(&mut data[16..20], PageId::encode_opt(self.free_head));
        LittleEndian::write_u32(&mut data[20..24], self.catalog.len() as u32);
        data[HEADER_FIXED..HEADER_FIXED + self.catalog.len()].copy_from_slice(&self.catalog);

        let crc = header_crc(&data);
        LittleEndian::write_u32(&mut data[24..28], crc);
        Ok(data)
    }

    pub fn decode(data: &PageData) -> Result<Self> {
        if &data[0..4] != MAGIC {
            return Err(Error::Corruption("bad magic number in header page".into()));
        }
        let version = LittleEndian::read_u32(&data[4..8]);
        if version != FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported format version {}",
                version
            )));
        }
        let page_size = LittleEndian::read_u32(&data[8..12]) as usize;
        if page_size != PAGE_SIZE {
            return Err(Error::Corruption(format!(
                "file page size {} does not match engine page size {}",
                page_size, PAGE_SIZE
            )));
        }
        let catalog_len = LittleEndian::read_u32(&data[20..24]) as usize;
        if catalog_len > MAX_CATALOG_BYTES {
            return Err(Error::Corruption("header catalog length out of range".into()));
        }
        let stored_crc = LittleEndian::read_u32(&data[24..28]);
        if stored_crc != header_crc(data) {
            return Err(Error::Corruption("header page checksum mismatch".into()));
        }

        Ok(Self {
            page_count: LittleEndian::read_u32(&data[12..16]),
            free_head: PageId::decode_opt(LittleEndian::read_u32(&data[16..20])),
            catalog: data[HEADER_FIXED..HEADER_FIXED + catalog_len].to_vec(),
        })
    }
}

/// CRC over everything except the checksum slot itself.
fn header_crc(data: &PageData) -> u32 {
    let catalog_len = LittleEndian::read_u32(&data[20..24]) as usize;
    let catalog_len = catalog_len.min(MAX_CATALOG_BYTES);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data[0..24]);
    hasher.update(&data[HEADER_FIXED..HEADER_FIXED + catalog_len]);
    hasher.finalize()
}

/// Image of a page on the free list: type tag plus the next-free pointer.
pub fn encode_free_page(next: Option<PageId>) -> Box<PageData> {
    let mut data = Box::new([0u8; PAGE_SIZE]);
    data[0] = PAGE_TYPE_FREE;
    LittleEndian::write_u32(&mut data[4..8], PageId::encode_opt(next));
    data
}

pub fn free_page_next(data: &PageData) -> Result<Option<PageId>> {
    if data[0] != PAGE_TYPE_FREE {
        return Err(Error::Corruption(format!(
            "page on the free list has type tag {}",
            data[0]
        )));
    }
    Ok(PageId::decode_opt(LittleEndian::read_u32(&data[4..8])))
}

/// Byte-addressable page file. All durability decisions (when to `sync`)
/// belong to the callers; writes here only reach the OS.
pub struct StorageFile {
    file: File,
}

impl StorageFile {
    /// Create a new storage file with an empty header page.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut storage = Self { file };
        storage.write_page(PageId::HEADER, &*Header::empty().encode()?)?;
        storage.sync()?;
        Ok(storage)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut PageData) -> Result<()> {
        let offset = page_offset(page_id);
        let file_size = self.file.metadata()?.len();
        if offset + PAGE_SIZE as u64 > file_size {
            return Err(Error::Internal(format!(
                "read of {} past end of file ({} bytes)",
                page_id, file_size
            )));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &PageData) -> Result<()> {
        let offset = page_offset(page_id);
        let file_size = self.file.metadata()?.len();
        if offset >= file_size {
            self.file.set_len(offset + PAGE_SIZE as u64)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Make all prior writes durable.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn num_pages(&self) -> Result<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }
}

fn page_offset(page_id: PageId) -> u64 {
    page_id.0 as u64 * PAGE_SIZE as u64
}
