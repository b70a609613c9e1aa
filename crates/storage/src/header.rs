//! The 512-byte fixed file header (§3 "File header", §6 "File format").
//!
//! Layout mirrors the spec exactly: magic+version, page size, header
//! size, encryption mode, key id, nonce, the four region
//! offset/length pairs, last transaction id, last checkpoint LSN, file
//! size, allocated pages, a file-level SHA-256, and a small statistics
//! block. Everything is little-endian, as required by §6.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sharpcore_core::{Error, Lsn, PageId, Result, TxnId};
use std::io::Cursor;

/// Fixed on-disk header size in bytes.
pub const HEADER_SIZE: usize = 512;

/// Magic bytes identifying a SharpCoreDB file: `"SCDB"` followed by the
/// little-endian format version (1).
pub const MAGIC: [u8; 8] = [b'S', b'C', b'D', b'B', 0x10, 0x00, 0x00, 0x00];

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Encryption mode declared by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// No encryption; blocks are stored plaintext.
    None = 0,
    /// AES-256-GCM envelope per block (§4.1).
    Aes256Gcm = 1,
}

impl EncryptionMode {
    fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(EncryptionMode::None),
            1 => Ok(EncryptionMode::Aes256Gcm),
            other => Err(Error::Corrupt(format!("unknown encryption mode {other}"))),
        }
    }
}

/// Running file statistics persisted in the header (§3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub total_records: u64,
    pub total_deletes: u64,
    pub last_vacuum_us: i64,
    /// Fragmentation estimate in basis points (0..=10000).
    pub fragmentation_bp: u32,
}

/// A `(offset, length)` region descriptor used for the fixed regions
/// named by the header (registry, FSM, WAL, table directory).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Region {
    pub offset: u64,
    pub length: u64,
}

/// The parsed, in-memory form of the 512-byte file header.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub page_size: u32,
    pub encryption_mode: EncryptionMode,
    pub key_id: u64,
    pub salt: [u8; 16],
    pub registry: Region,
    pub fsm: Region,
    pub wal: Region,
    pub table_directory: Region,
    pub last_txn_id: TxnId,
    pub last_checkpoint_lsn: Lsn,
    pub file_size: u64,
    pub allocated_pages: u64,
    pub stats: FileStats,
}

impl FileHeader {
    /// Build a fresh header for a newly created file.
    pub fn new(page_size: u32, encryption_mode: EncryptionMode, salt: [u8; 16]) -> Self {
        FileHeader {
            page_size,
            encryption_mode,
            key_id: 1,
            salt,
            registry: Region::default(),
            fsm: Region::default(),
            wal: Region::default(),
            table_directory: Region::default(),
            last_txn_id: 0,
            last_checkpoint_lsn: 0,
            file_size: HEADER_SIZE as u64,
            allocated_pages: 0,
            stats: FileStats::default(),
        }
    }

    /// The number of pages the header's own region occupies at the head
    /// of the file, expressed in the file's page size, for callers that
    /// round the first usable page up.
    pub fn header_pages(&self) -> u64 {
        (HEADER_SIZE as u64 + self.page_size as u64 - 1) / self.page_size as u64
    }

    /// Serialize to exactly [`HEADER_SIZE`] bytes, with a trailing
    /// SHA-256 over everything that precedes it.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&MAGIC);
        buf.write_u32::<LittleEndian>(FORMAT_VERSION).unwrap();
        buf.write_u32::<LittleEndian>(self.page_size).unwrap();
        buf.write_u32::<LittleEndian>(HEADER_SIZE as u32).unwrap();
        buf.write_u8(self.encryption_mode as u8).unwrap();
        buf.write_u64::<LittleEndian>(self.key_id).unwrap();
        buf.extend_from_slice(&self.salt);
        for region in [&self.registry, &self.fsm, &self.wal, &self.table_directory] {
            buf.write_u64::<LittleEndian>(region.offset).unwrap();
            buf.write_u64::<LittleEndian>(region.length).unwrap();
        }
        buf.write_u64::<LittleEndian>(self.last_txn_id).unwrap();
        buf.write_u64::<LittleEndian>(self.last_checkpoint_lsn)
            .unwrap();
        buf.write_u64::<LittleEndian>(self.file_size).unwrap();
        buf.write_u64::<LittleEndian>(self.allocated_pages).unwrap();
        buf.write_u64::<LittleEndian>(self.stats.total_records)
            .unwrap();
        buf.write_u64::<LittleEndian>(self.stats.total_deletes)
            .unwrap();
        buf.write_i64::<LittleEndian>(self.stats.last_vacuum_us)
            .unwrap();
        buf.write_u32::<LittleEndian>(self.stats.fragmentation_bp)
            .unwrap();

        // Checksum over everything written so far, then pad, then place
        // the checksum in the last 32 bytes of the header.
        let checksum = crate::checksum::sha256(&buf);
        buf.resize(HEADER_SIZE - 32, 0);
        buf.extend_from_slice(&checksum);
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Parse and validate a header, verifying its embedded checksum.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let body = &bytes[..HEADER_SIZE - 32];
        let stored_checksum = &bytes[HEADER_SIZE - 32..];
        let computed = crate::checksum::sha256(body);
        if computed != stored_checksum {
            return Err(Error::Corrupt("file header checksum mismatch".into()));
        }

        let mut cur = Cursor::new(&bytes[..]);
        let mut magic = [0u8; 8];
        std::io::Read::read_exact(&mut cur, &mut magic)?;
        if magic != MAGIC {
            return Err(Error::Corrupt("bad magic in file header".into()));
        }
        let page_size = cur.read_u32::<LittleEndian>()?;
        let header_size = cur.read_u32::<LittleEndian>()?;
        if header_size as usize != HEADER_SIZE {
            return Err(Error::Corrupt("unexpected header size field".into()));
        }
        let encryption_mode = EncryptionMode::from_u8(cur.read_u8()?)?;
        let key_id = cur.read_u64::<LittleEndian>()?;
        let mut salt = [0u8; 16];
        std::io::Read::read_exact(&mut cur, &mut salt)?;

        let mut read_region = |cur: &mut Cursor<&[u8]>| -> Result<Region> {
            Ok(Region {
                offset: cur.read_u64::<LittleEndian>()?,
                length: cur.read_u64::<LittleEndian>()?,
            })
        };
        let registry = read_region(&mut cur)?;
        let fsm = read_region(&mut cur)?;
        let wal = read_region(&mut cur)?;
        let table_directory = read_region(&mut cur)?;

        let last_txn_id = cur.read_u64::<LittleEndian>()?;
        let last_checkpoint_lsn = cur.read_u64::<LittleEndian>()?;
        let file_size = cur.read_u64::<LittleEndian>()?;
        let allocated_pages = cur.read_u64::<LittleEndian>()?;
        let total_records = cur.read_u64::<LittleEndian>()?;
        let total_deletes = cur.read_u64::<LittleEndian>()?;
        let last_vacuum_us = cur.read_i64::<LittleEndian>()?;
        let fragmentation_bp = cur.read_u32::<LittleEndian>()?;

        Ok(FileHeader {
            page_size,
            encryption_mode,
            key_id,
            salt,
            registry,
            fsm,
            wal,
            table_directory,
            last_txn_id,
            last_checkpoint_lsn,
            file_size,
            allocated_pages,
            stats: FileStats {
                total_records,
                total_deletes,
                last_vacuum_us,
                fragmentation_bp,
            },
        })
    }

    /// Compute the page id of the first data page, i.e. the page
    /// immediately after the header.
    pub fn first_data_page(&self) -> PageId {
        self.header_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut header = FileHeader::new(4096, EncryptionMode::None, [7u8; 16]);
        header.last_txn_id = 42;
        header.last_checkpoint_lsn = 99;
        header.registry = Region {
            offset: 512,
            length: 4096,
        };
        let bytes = header.to_bytes();
        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn tampered_header_fails_checksum() {
        let header = FileHeader::new(4096, EncryptionMode::None, [1u8; 16]);
        let mut bytes = header.to_bytes();
        bytes[20] ^= 0xFF;
        assert!(FileHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn encryption_mode_mismatch_is_detected_from_plaintext_header() {
        let header = FileHeader::new(4096, EncryptionMode::Aes256Gcm, [1u8; 16]);
        let bytes = header.to_bytes();
        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.encryption_mode, EncryptionMode::Aes256Gcm);
    }
}
