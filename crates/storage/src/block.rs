//! Block descriptors (§3 "Block").
//!
//! A block is a named, contiguous run of pages holding one logical
//! artifact. The registry (`registry.rs`) persists an array of these
//! entries; everything else in the engine addresses storage by block
//! name, never by raw offset.

use sharpcore_core::{BlockName, PageId};

/// What kind of artifact a block holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BlockType {
    Registry,
    Fsm,
    Wal,
    TableDirectory,
    Heap,
    HashIndex,
    BTreeIndex,
}

impl BlockType {
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            BlockType::Registry => 0,
            BlockType::Fsm => 1,
            BlockType::Wal => 2,
            BlockType::TableDirectory => 3,
            BlockType::Heap => 4,
            BlockType::HashIndex => 5,
            BlockType::BTreeIndex => 6,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => BlockType::Registry,
            1 => BlockType::Fsm,
            2 => BlockType::Wal,
            3 => BlockType::TableDirectory,
            4 => BlockType::Heap,
            5 => BlockType::HashIndex,
            6 => BlockType::BTreeIndex,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// Block flags, packed into a single byte in the registry entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
    pub struct BlockFlags: u8 {
        const DIRTY      = 0b0000_0001;
        const ENCRYPTED  = 0b0000_0010;
        const DELETED    = 0b0000_0100;
        const IMMUTABLE  = 0b0000_1000;
        const SPARSE     = 0b0001_0000;
    }
}

/// A block's full descriptor, as stored in the registry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlockEntry {
    pub name: BlockName,
    pub block_type: BlockType,
    /// Page id of the first page in this block's extent.
    pub start_page: PageId,
    /// Length in pages; always page-aligned.
    pub length_pages: u64,
    /// SHA-256 over the block's decrypted contents, updated on write.
    pub checksum: [u8; 32],
    pub flags: BlockFlags,
    /// Bumped every time the block's contents are sealed, feeding the
    /// crypto envelope's nonce derivation (§4.1).
    pub generation: u64,
}

impl BlockEntry {
    pub fn offset(&self, page_size: u32) -> u64 {
        self.start_page * page_size as u64
    }

    pub fn length_bytes(&self, page_size: u32) -> u64 {
        self.length_pages * page_size as u64
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(BlockFlags::DELETED)
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(BlockFlags::ENCRYPTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_tag_roundtrip() {
        for ty in [
            BlockType::Registry,
            BlockType::Fsm,
            BlockType::Wal,
            BlockType::TableDirectory,
            BlockType::Heap,
            BlockType::HashIndex,
            BlockType::BTreeIndex,
        ] {
            assert_eq!(BlockType::from_tag(ty.to_tag()), Some(ty));
        }
    }

    #[test]
    fn flags_combine() {
        let flags = BlockFlags::DIRTY | BlockFlags::ENCRYPTED;
        assert!(flags.contains(BlockFlags::DIRTY));
        assert!(flags.contains(BlockFlags::ENCRYPTED));
        assert!(!flags.contains(BlockFlags::DELETED));
    }

    #[test]
    fn flags_insert_and_remove() {
        let mut flags = BlockFlags::empty();
        flags.insert(BlockFlags::DIRTY);
        assert!(flags.contains(BlockFlags::DIRTY));
        flags.remove(BlockFlags::DIRTY);
        assert!(!flags.contains(BlockFlags::DIRTY));
    }
}
