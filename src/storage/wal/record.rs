//! WAL record types and their on-disk encoding.
//!
//! Every record travels in a frame: `body_len u32 | body | xxh3(body) u64`.
//! Bodies start with a kind tag:
//!
//! * page image: `1 | transaction_id u64 | page_id u64 | length u32 |
//!   has_before u8 | before? | after | lsn u64`
//! * commit marker: `2 | transaction_id u64 | lsn u64`

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};
use crate::storage::page::{zeroed_page, PageBuf, PageId, PAGE_SIZE};
use crate::transaction::TransactionId;

const KIND_PAGE: u8 = 1;
const KIND_COMMIT: u8 = 2;

pub const FRAME_HEADER_SIZE: usize = 4;
pub const FRAME_TRAILER_SIZE: usize = 8;
/// Largest body a frame may carry: a page record with both images.
pub const MAX_BODY_SIZE: usize = 1 + 8 + 8 + 4 + 1 + 2 * PAGE_SIZE + 8;

/// Log Sequence Number - a unique identifier for WAL records.
/// LSNs are monotonically increasing and used to order log records.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Get the next LSN.
    pub fn next(&self) -> Self {
        Lsn(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN({})", self.0)
    }
}

/// A logged page mutation: the page image before and after the transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub transaction_id: TransactionId,
    pub page_id: PageId,
    /// `None` for pages that did not exist before the transaction.
    pub before: Option<Box<PageBuf>>,
    pub after: Box<PageBuf>,
    pub lsn: Lsn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    Page(PageRecord),
    Commit {
        transaction_id: TransactionId,
        lsn: Lsn,
    },
}

impl WalRecord {
    pub fn lsn(&self) -> Lsn {
        match self {
            WalRecord::Page(record) => record.lsn,
            WalRecord::Commit { lsn, .. } => *lsn,
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        match self {
            WalRecord::Page(record) => record.transaction_id,
            WalRecord::Commit { transaction_id, .. } => *transaction_id,
        }
    }

    /// Encode a page record frame without building an owned record.
    pub fn encode_page_frame(
        transaction_id: TransactionId,
        page_id: PageId,
        before: Option<&PageBuf>,
        after: &PageBuf,
        lsn: Lsn,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let mut body = Vec::with_capacity(MAX_BODY_SIZE);
        body.write_u8(KIND_PAGE)?;
        body.write_u64::<LittleEndian>(transaction_id.value())?;
        body.write_u64::<LittleEndian>(page_id.0)?;
        body.write_u32::<LittleEndian>(PAGE_SIZE as u32)?;
        match before {
            Some(image) => {
                body.write_u8(1)?;
                body.extend_from_slice(image);
            }
            None => body.write_u8(0)?,
        }
        body.extend_from_slice(after);
        body.write_u64::<LittleEndian>(lsn.0)?;
        Self::wrap_frame(&body, out)
    }

    pub fn encode_commit_frame(
        transaction_id: TransactionId,
        lsn: Lsn,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let mut body = Vec::with_capacity(17);
        body.write_u8(KIND_COMMIT)?;
        body.write_u64::<LittleEndian>(transaction_id.value())?;
        body.write_u64::<LittleEndian>(lsn.0)?;
        Self::wrap_frame(&body, out)
    }

    pub fn encode_frame(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            WalRecord::Page(record) => Self::encode_page_frame(
                record.transaction_id,
                record.page_id,
                record.before.as_deref(),
                &record.after,
                record.lsn,
                out,
            ),
            WalRecord::Commit {
                transaction_id,
                lsn,
            } => Self::encode_commit_frame(*transaction_id, *lsn, out),
        }
    }

    fn wrap_frame(body: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<LittleEndian>(body.len() as u32)?;
        out.extend_from_slice(body);
        out.write_u64::<LittleEndian>(xxh3_64(body))?;
        Ok(())
    }

    /// Decode a frame body whose checksum has already been verified.
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body);
        let record = match cursor.read_u8()? {
            KIND_PAGE => {
                let transaction_id = TransactionId::new(cursor.read_u64::<LittleEndian>()?);
                let page_id = PageId(cursor.read_u64::<LittleEndian>()?);
                let length = cursor.read_u32::<LittleEndian>()? as usize;
                if length != PAGE_SIZE {
                    return Err(Error::corruption(format!(
                        "WAL page image of {} bytes, expected {}",
                        length, PAGE_SIZE
                    )));
                }
                let before = match cursor.read_u8()? {
                    0 => None,
                    _ => {
                        let mut image = zeroed_page();
                        cursor.read_exact(image.as_mut())?;
                        Some(image)
                    }
                };
                let mut after = zeroed_page();
                cursor.read_exact(after.as_mut())?;
                let lsn = Lsn(cursor.read_u64::<LittleEndian>()?);
                WalRecord::Page(PageRecord {
                    transaction_id,
                    page_id,
                    before,
                    after,
                    lsn,
                })
            }
            KIND_COMMIT => WalRecord::Commit {
                transaction_id: TransactionId::new(cursor.read_u64::<LittleEndian>()?),
                lsn: Lsn(cursor.read_u64::<LittleEndian>()?),
            },
            other => {
                return Err(Error::corruption(format!("unknown WAL record kind {}", other)));
            }
        };

        if cursor.position() as usize != body.len() {
            return Err(Error::corruption("trailing bytes in WAL record"));
        }
        Ok(record)
    }

    pub fn body_checksum(body: &[u8]) -> u64 {
        xxh3_64(body)
    }
}
