//! Fixed-size pages and the slotted-page layout used by the page-based
//! and hybrid storage modes (§4.4 "Slotted page").
//!
//! # Slotted page layout
//!
//! ```text
//! ┌──────────────────┬───────────────────┬──────────────────────┐
//! │ Page header (16)  │ Slot directory    │ Free space           │
//! │                   │ (grows forward)   │                      │
//! ├───────────────────┴───────────────────┴──────────────────────┤
//! │                     Record bytes (grow backward from the end) │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The invariant enforced throughout is
//! `free_space_start + record_bytes <= slot_directory_start`: the slot
//! directory grows forward from the header while record bytes are
//! appended backward from the end of the page, and the two must never
//! cross.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sharpcore_core::{Error, Result};
use std::io::Cursor;

/// Size in bytes of the fixed page header.
pub const PAGE_HEADER_SIZE: usize = 16;
/// Size in bytes of one slot directory entry: `(offset: u16, length: u16)`.
pub const SLOT_ENTRY_SIZE: usize = 4;
/// Sentinel offset marking a slot as a tombstone (§4.4 "tombstone").
const TOMBSTONE_OFFSET: u16 = u16::MAX;

/// A raw, fixed-size page buffer.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: Vec<u8>,
}

impl Page {
    pub fn new(page_size: u32) -> Self {
        Page {
            data: vec![0u8; page_size as usize],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Page { data: bytes }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// One entry in a slotted page's slot directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    /// Byte offset of the record within the page, or [`TOMBSTONE_OFFSET`]
    /// if this slot has been deleted.
    pub offset: u16,
    pub length: u16,
}

impl SlotEntry {
    pub fn is_tombstone(&self) -> bool {
        self.offset == TOMBSTONE_OFFSET
    }
}

/// A view over a page that understands the slotted layout: a small
/// header, a forward-growing slot directory, and backward-growing
/// record storage.
pub struct SlottedPage<'a> {
    page: &'a mut Page,
}

impl<'a> SlottedPage<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        SlottedPage { page }
    }

    /// Initialize an empty slotted page layout in-place.
    pub fn init(page: &mut Page) {
        let size = page.size();
        let mut cur = Cursor::new(&mut page.data[..PAGE_HEADER_SIZE]);
        cur.write_u16::<LittleEndian>(0).unwrap(); // slot_count
        cur.write_u16::<LittleEndian>(PAGE_HEADER_SIZE as u16)
            .unwrap(); // slot_directory_start
        cur.write_u16::<LittleEndian>(size as u16).unwrap(); // free_space_end (record bytes grow down from here)
        cur.write_u16::<LittleEndian>(0).unwrap(); // reserved
        cur.write_u32::<LittleEndian>(0).unwrap(); // generation
        cur.write_u32::<LittleEndian>(0).unwrap(); // reserved
    }

    fn slot_count(&self) -> u16 {
        (&self.page.data[0..2]).read_u16::<LittleEndian>().unwrap()
    }

    fn set_slot_count(&mut self, count: u16) {
        (&mut self.page.data[0..2])
            .write_u16::<LittleEndian>(count)
            .unwrap();
    }

    fn free_space_end(&self) -> u16 {
        (&self.page.data[4..6]).read_u16::<LittleEndian>().unwrap()
    }

    fn set_free_space_end(&mut self, offset: u16) {
        (&mut self.page.data[4..6])
            .write_u16::<LittleEndian>(offset)
            .unwrap();
    }

    fn slot_directory_start(&self) -> usize {
        PAGE_HEADER_SIZE
    }

    fn slot_offset(&self, index: u16) -> usize {
        self.slot_directory_start() + index as usize * SLOT_ENTRY_SIZE
    }

    /// Number of live or tombstoned slots.
    pub fn len(&self) -> u16 {
        self.slot_count()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_count() == 0
    }

    /// Bytes available for a new record plus its slot entry, respecting
    /// the `free_space_start + record_bytes <= slot_directory_start`
    /// invariant.
    pub fn free_space(&self) -> usize {
        let directory_end = self.slot_directory_start() + self.slot_count() as usize * SLOT_ENTRY_SIZE;
        let record_area_start = self.free_space_end() as usize;
        record_area_start.saturating_sub(directory_end)
    }

    pub fn get_slot(&self, index: u16) -> Option<SlotEntry> {
        if index >= self.slot_count() {
            return None;
        }
        let off = self.slot_offset(index);
        let entry_bytes = &self.page.data[off..off + SLOT_ENTRY_SIZE];
        Some(SlotEntry {
            offset: (&entry_bytes[0..2]).read_u16::<LittleEndian>().unwrap(),
            length: (&entry_bytes[2..4]).read_u16::<LittleEndian>().unwrap(),
        })
    }

    fn write_slot(&mut self, index: u16, entry: SlotEntry) {
        let off = self.slot_offset(index);
        (&mut self.page.data[off..off + 2])
            .write_u16::<LittleEndian>(entry.offset)
            .unwrap();
        (&mut self.page.data[off + 2..off + 4])
            .write_u16::<LittleEndian>(entry.length)
            .unwrap();
    }

    /// Read a record's bytes given its slot index. Returns `None` if the
    /// slot is out of range or tombstoned.
    pub fn read_record(&self, index: u16) -> Option<&[u8]> {
        let slot = self.get_slot(index)?;
        if slot.is_tombstone() {
            return None;
        }
        let start = slot.offset as usize;
        let end = start + slot.length as usize;
        self.page.data.get(start..end)
    }

    /// Append a new record, returning its slot index. Fails with
    /// [`Error::OutOfSpace`] if the page cannot hold it without
    /// violating the slot-directory/record-area boundary invariant.
    pub fn insert_record(&mut self, bytes: &[u8]) -> Result<u16> {
        let needed = bytes.len() + SLOT_ENTRY_SIZE;
        if self.free_space() < needed {
            return Err(Error::OutOfSpace(
                "slotted page has no room for record".into(),
            ));
        }
        let new_offset = self.free_space_end() as usize - bytes.len();
        self.page.data[new_offset..new_offset + bytes.len()].copy_from_slice(bytes);
        self.set_free_space_end(new_offset as u16);

        let index = self.slot_count();
        self.set_slot_count(index + 1);
        self.write_slot(
            index,
            SlotEntry {
                offset: new_offset as u16,
                length: bytes.len() as u16,
            },
        );
        Ok(index)
    }

    /// In-place update, used when the new record is no larger than the
    /// one it replaces (§4.4 "PageBased in-place update"). Callers must
    /// fall back to tombstone-and-reinsert when the record has grown.
    pub fn update_in_place(&mut self, index: u16, bytes: &[u8]) -> Result<()> {
        let slot = self
            .get_slot(index)
            .ok_or_else(|| Error::InvalidArgument("slot index out of range".into()))?;
        if bytes.len() > slot.length as usize {
            return Err(Error::InvalidArgument(
                "update_in_place requires bytes.len() <= existing record length".into(),
            ));
        }
        let start = slot.offset as usize;
        self.page.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.write_slot(
            index,
            SlotEntry {
                offset: slot.offset,
                length: bytes.len() as u16,
            },
        );
        Ok(())
    }

    /// Mark a slot as deleted without reclaiming its bytes; compaction
    /// happens at VACUUM time (§4.9).
    pub fn tombstone(&mut self, index: u16) -> Result<()> {
        let _ = self
            .get_slot(index)
            .ok_or_else(|| Error::InvalidArgument("slot index out of range".into()))?;
        self.write_slot(
            index,
            SlotEntry {
                offset: TOMBSTONE_OFFSET,
                length: 0,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_read_record_round_trips() {
        let mut page = Page::new(256);
        SlottedPage::init(&mut page);
        let mut slotted = SlottedPage::new(&mut page);
        let idx = slotted.insert_record(b"hello").unwrap();
        assert_eq!(slotted.read_record(idx), Some(&b"hello"[..]));
    }

    #[test]
    fn tombstoned_record_reads_as_none() {
        let mut page = Page::new(256);
        SlottedPage::init(&mut page);
        let mut slotted = SlottedPage::new(&mut page);
        let idx = slotted.insert_record(b"hello").unwrap();
        slotted.tombstone(idx).unwrap();
        assert_eq!(slotted.read_record(idx), None);
    }

    #[test]
    fn update_in_place_requires_fitting_length() {
        let mut page = Page::new(256);
        SlottedPage::init(&mut page);
        let mut slotted = SlottedPage::new(&mut page);
        let idx = slotted.insert_record(b"hello").unwrap();
        assert!(slotted.update_in_place(idx, b"hi").is_ok());
        assert_eq!(slotted.read_record(idx), Some(&b"hi"[..]));
        assert!(slotted.update_in_place(idx, b"way too long now").is_err());
    }

    #[test]
    fn insert_fails_when_page_full() {
        let mut page = Page::new(PAGE_HEADER_SIZE + SLOT_ENTRY_SIZE + 4);
        SlottedPage::init(&mut page);
        let mut slotted = SlottedPage::new(&mut page);
        assert!(slotted.insert_record(&[0u8; 4]).is_ok());
        assert!(slotted.insert_record(&[0u8; 4]).is_err());
    }

    #[test]
    fn free_space_shrinks_as_records_are_added() {
        let mut page = Page::new(256);
        SlottedPage::init(&mut page);
        let mut slotted = SlottedPage::new(&mut page);
        let before = slotted.free_space();
        slotted.insert_record(b"abc").unwrap();
        assert!(slotted.free_space() < before);
    }
}
