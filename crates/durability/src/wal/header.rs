//! The WAL region's own small header: slot geometry and the circular
//! window's bounds (§3 "WAL entry", §4.6).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sharpcore_core::{Error, Lsn, Result};
use std::io::Cursor;

use super::entry::SLOT_SIZE;

/// Fixed on-disk size of the WAL header.
pub const WAL_HEADER_SIZE: usize = 128;
const MAGIC: [u8; 4] = *b"SCWL";
const CHECKSUM_LEN: usize = 32;

/// Circular WAL geometry and replay bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub slot_count: u64,
    /// Index of the oldest live slot.
    pub head: u64,
    /// Index one past the newest live slot.
    pub tail: u64,
    pub next_lsn: Lsn,
    pub last_checkpoint_lsn: Lsn,
}

impl WalHeader {
    pub fn new(slot_count: u64) -> Self {
        WalHeader {
            slot_count,
            head: 0,
            tail: 0,
            next_lsn: 1,
            last_checkpoint_lsn: 0,
        }
    }

    /// Whether the circular region currently holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Number of live slots currently occupied.
    pub fn len(&self) -> u64 {
        if self.tail >= self.head {
            self.tail - self.head
        } else {
            self.slot_count - self.head + self.tail
        }
    }

    pub fn to_bytes(&self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = Vec::with_capacity(WAL_HEADER_SIZE);
        buf.extend_from_slice(&MAGIC);
        buf.write_u32::<LittleEndian>(SLOT_SIZE as u32).unwrap();
        buf.write_u64::<LittleEndian>(self.slot_count).unwrap();
        buf.write_u64::<LittleEndian>(self.head).unwrap();
        buf.write_u64::<LittleEndian>(self.tail).unwrap();
        buf.write_u64::<LittleEndian>(self.next_lsn).unwrap();
        buf.write_u64::<LittleEndian>(self.last_checkpoint_lsn)
            .unwrap();

        let checksum = sharpcore_storage::sha256(&buf);
        buf.resize(WAL_HEADER_SIZE - CHECKSUM_LEN, 0);
        buf.extend_from_slice(&checksum);
        let mut out = [0u8; WAL_HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn from_bytes(bytes: &[u8; WAL_HEADER_SIZE]) -> Result<Self> {
        let body = &bytes[..WAL_HEADER_SIZE - CHECKSUM_LEN];
        let stored = &bytes[WAL_HEADER_SIZE - CHECKSUM_LEN..];
        if sharpcore_storage::sha256(body) != stored {
            return Err(Error::Corrupt("WAL header checksum mismatch".into()));
        }

        let mut cur = Cursor::new(body);
        let mut magic = [0u8; 4];
        std::io::Read::read_exact(&mut cur, &mut magic)?;
        if magic != MAGIC {
            return Err(Error::Corrupt("bad magic in WAL header".into()));
        }
        let slot_size = cur.read_u32::<LittleEndian>()?;
        if slot_size as usize != SLOT_SIZE {
            return Err(Error::Corrupt("WAL slot size mismatch".into()));
        }
        let slot_count = cur.read_u64::<LittleEndian>()?;
        let head = cur.read_u64::<LittleEndian>()?;
        let tail = cur.read_u64::<LittleEndian>()?;
        let next_lsn = cur.read_u64::<LittleEndian>()?;
        let last_checkpoint_lsn = cur.read_u64::<LittleEndian>()?;

        Ok(WalHeader {
            slot_count,
            head,
            tail,
            next_lsn,
            last_checkpoint_lsn,
        })
    }
}
