//! File-backed [`sharpcore_durability::wal::SlotIo`]: the WAL region is
//! a fixed-size run of 4096-byte slots starting at a byte offset inside
//! the same file the rest of the database lives in. Kept as a plain
//! `File` handle rather than going through [`sharpcore_storage`]'s
//! page cache because WAL slots are always 4096 bytes regardless of
//! the configured page size, and every WAL write must bypass any
//! write-behind delay.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use sharpcore_core::{Error, Result};
use sharpcore_durability::wal::SlotIo;

const SLOT_SIZE: usize = 4096;

pub struct FileSlotIo {
    file: Mutex<File>,
    base_offset: u64,
    slot_count: u64,
}

impl FileSlotIo {
    pub fn new(file: File, base_offset: u64, slot_count: u64) -> Self {
        FileSlotIo {
            file: Mutex::new(file),
            base_offset,
            slot_count,
        }
    }

    fn check_index(&self, index: u64) -> Result<()> {
        if index >= self.slot_count {
            return Err(Error::InvalidArgument("WAL slot index out of range".into()));
        }
        Ok(())
    }

    /// Force every slot written so far to stable storage. Called on the
    /// commit path so a caller's `append_write`/`append` pair is durable
    /// before the transaction is reported committed.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().unwrap().sync_data()?;
        Ok(())
    }
}

impl SlotIo for FileSlotIo {
    fn read_slot(&self, index: u64) -> Result<[u8; SLOT_SIZE]> {
        self.check_index(index)?;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(self.base_offset + index * SLOT_SIZE as u64))?;
        let mut buf = [0u8; SLOT_SIZE];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_slot(&self, index: u64, slot: &[u8; SLOT_SIZE]) -> Result<()> {
        self.check_index(index)?;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(self.base_offset + index * SLOT_SIZE as u64))?;
        file.write_all(slot)?;
        Ok(())
    }
}
