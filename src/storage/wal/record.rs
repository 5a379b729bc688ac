//! WAL frame types and their on-disk framing.
//!
//! Every frame is written as `[len: u32][crc32: u32][bincode payload]`. The
//! checksum covers the serialized payload; a mismatch on a complete frame is
//! corruption, while a truncated frame at the end of the log marks the point
//! where a crash cut the file short.

use crate::error::{Error, Result};
use crate::storage::page::{PageData, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log sequence number: strictly increasing across every frame.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Lsn(pub u64);

impl Lsn {
    pub fn next(&self) -> Lsn {
        Lsn(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn {}", self.0)
    }
}

/// What a frame records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalPayload {
    /// After-image of a page staged by the transaction. Redo-only: there is
    /// no before-image because uncommitted changes never reach the file.
    PageImage { page_id: u32, image: Vec<u8> },
    /// The transaction's frames up to here are durable and take effect.
    Commit,
    /// All earlier frames have been applied to the storage file.
    Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalFrame {
    pub lsn: Lsn,
    pub transaction_id: u64,
    pub payload: WalPayload,
}

impl WalFrame {
    pub fn page_image(lsn: Lsn, transaction_id: u64, page_id: u32, image: &PageData) -> Self {
        Self {
            lsn,
            transaction_id,
            payload: WalPayload::PageImage {
                page_id,
                image: image.to_vec(),
            },
        }
    }

    pub fn commit(lsn: Lsn, transaction_id: u64) -> Self {
        Self {
            lsn,
            transaction_id,
            payload: WalPayload::Commit,
        }
    }

    pub fn checkpoint(lsn: Lsn) -> Self {
        Self {
            lsn,
            transaction_id: 0,
            payload: WalPayload::Checkpoint,
        }
    }

    /// Serialize with length prefix and checksum.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| Error::Internal(format!("wal frame serialization failed: {e}")))?;
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode one frame from `input`, returning it and the bytes consumed.
    ///
    /// `Ok(None)` means the input ends mid-frame (a torn tail). A checksum
    /// mismatch on a complete frame is `Corruption`.
    pub fn decode(input: &[u8]) -> Result<Option<(WalFrame, usize)>> {
        if input.len() < 8 {
            return Ok(None);
        }
        let len = u32::from_le_bytes(input[0..4].try_into().unwrap()) as usize;
        let stored_crc = u32::from_le_bytes(input[4..8].try_into().unwrap());
        if len > MAX_FRAME_BODY {
            return Err(Error::Corruption(format!(
                "wal frame length {len} exceeds maximum"
            )));
        }
        if input.len() < 8 + len {
            return Ok(None);
        }

        let body = &input[8..8 + len];
        if crc32fast::hash(body) != stored_crc {
            return Err(Error::Corruption("wal frame checksum mismatch".into()));
        }
        let frame: WalFrame = bincode::deserialize(body)
            .map_err(|e| Error::Corruption(format!("undecodable wal frame: {e}")))?;
        Ok(Some((frame, 8 + len)))
    }

    /// The page image carried by this frame, if any, checked for size.
    pub fn into_page_image(self) -> Result<Option<(u32, Box<PageData>)>> {
        match self.payload {
            WalPayload::PageImage { page_id, image } => {
                let image: Box<PageData> = image
                    .into_boxed_slice()
                    .try_into()
                    .map_err(|_| Error::Corruption("wal page image has wrong length".into()))?;
                Ok(Some((page_id, image)))
            }
            _ => Ok(None),
        }
    }
}

/// Generous bound on a frame body: one page plus framing slack.
const MAX_FRAME_BODY: usize = PAGE_SIZE + 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() -> Result<()> {
        let image = [7u8; PAGE_SIZE];
        let frame = WalFrame::page_image(Lsn(3), 11, 42, &image);
        let bytes = frame.encode()?;

        let (decoded, consumed) = WalFrame::decode(&bytes)?.expect("complete frame");
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
        Ok(())
    }

    #[test]
    fn test_torn_tail_is_not_corruption() -> Result<()> {
        let bytes = WalFrame::commit(Lsn(1), 5).encode()?;
        assert!(WalFrame::decode(&bytes[..bytes.len() - 1])?.is_none());
        assert!(WalFrame::decode(&bytes[..3])?.is_none());
        Ok(())
    }

    #[test]
    fn test_bit_flip_is_corruption() -> Result<()> {
        let mut bytes = WalFrame::commit(Lsn(1), 5).encode()?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            WalFrame::decode(&bytes),
            Err(Error::Corruption(_))
        ));
        Ok(())
    }

    #[test]
    fn test_page_image_size_check() {
        let frame = WalFrame {
            lsn: Lsn(1),
            transaction_id: 1,
            payload: WalPayload::PageImage {
                page_id: 3,
                image: vec![0u8; 100],
            },
        };
        assert!(frame.into_page_image().is_err());
    }

    #[test]
    fn test_consecutive_frames_decode() -> Result<()> {
        let a = WalFrame::commit(Lsn(1), 1).encode()?;
        let b = WalFrame::checkpoint(Lsn(2)).encode()?;
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let (first, used) = WalFrame::decode(&stream)?.unwrap();
        assert_eq!(first.payload, WalPayload::Commit);
        let (second, _) = WalFrame::decode(&stream[used..])?.unwrap();
        assert_eq!(second.payload, WalPayload::Checkpoint);
        Ok(())
    }
}
