//! The repair path (§4.2, §7): recovering a usable file header when
//! the primary at offset 0 fails its checksum.
//!
//! At every checkpoint the header is additionally mirrored onto the
//! last page of the file, the way a superblock backup works.
//! [`mirror_header`] writes that copy; [`recover_header`] reads the
//! primary and falls back to it, for callers that already have a
//! `FileStorageProvider` (and so already know the page size) open.
//! Bootstrapping a provider in the first place, when the primary header
//! itself is what's corrupt and the page size isn't known yet, is
//! handled inline by `FileStorageProvider::open`, which tries every
//! page size §6 allows to locate the mirror. Reconstructing the block
//! registry from the WAL's own page-alloc/page-free history (the other
//! half of §7) lives in
//! `sharpcore_durability::recovery::repair_registry_from_wal`, since it
//! has no use for anything in this crate beyond `BlockEntry`.

use sharpcore_core::{Error, Result};

use crate::header::{FileHeader, HEADER_SIZE};
use crate::page::Page;
use crate::provider::FileStorageProvider;

/// Write `header` into the last page of the file. Called by the facade
/// at every checkpoint, after the primary header at offset 0 has
/// already been rewritten with the same contents.
pub fn mirror_header(provider: &FileStorageProvider, header: &FileHeader, total_pages: u64) -> Result<()> {
    if total_pages == 0 {
        return Err(Error::InvalidArgument("cannot mirror a header into a zero-page file".into()));
    }
    let page_size = provider.page_size();
    let mut page = Page::new(page_size);
    let bytes = header.to_bytes();
    page.data[..bytes.len()].copy_from_slice(&bytes);
    let offset = (total_pages - 1) * page_size as u64;
    provider.write_page_sync(offset, &page)
}

/// Read the backup header mirrored at the last page of the file,
/// without consulting the primary.
pub fn read_mirror(provider: &FileStorageProvider, total_pages: u64) -> Result<FileHeader> {
    if total_pages == 0 {
        return Err(Error::Corrupt("file has no pages to hold a backup header".into()));
    }
    let page_size = provider.page_size();
    let offset = (total_pages - 1) * page_size as u64;
    let page = provider.read_page(offset)?;
    let mut bytes = [0u8; HEADER_SIZE];
    bytes.copy_from_slice(&page.data[..HEADER_SIZE]);
    FileHeader::from_bytes(&bytes)
}

/// Read the primary header at offset 0, falling back to the backup
/// mirror at the last page of the file if the primary fails its
/// checksum (§7 step 1, run before the WAL is even opened).
pub fn recover_header(provider: &FileStorageProvider, total_pages: u64) -> Result<FileHeader> {
    let region = provider.read_header_region(HEADER_SIZE as u64)?;
    let mut primary = [0u8; HEADER_SIZE];
    primary.copy_from_slice(&region[..HEADER_SIZE]);
    match FileHeader::from_bytes(&primary) {
        Ok(header) => Ok(header),
        Err(primary_err) => read_mirror(provider, total_pages).map_err(|mirror_err| {
            Error::Corrupt(format!(
                "primary header corrupt ({primary_err}) and backup mirror also failed ({mirror_err})"
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::EncryptionMode;
    use tempfile::tempdir;

    #[test]
    fn mirror_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.scdb");
        let header = FileHeader::new(64, EncryptionMode::None, [9u8; 16]);
        let provider = FileStorageProvider::create(&path, &header, 4).unwrap();

        mirror_header(&provider, &header, 4).unwrap();
        let recovered = read_mirror(&provider, 4).unwrap();
        assert_eq!(recovered, header);
    }

    #[test]
    fn recover_header_prefers_primary_when_intact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.scdb");
        let header = FileHeader::new(64, EncryptionMode::None, [1u8; 16]);
        let provider = FileStorageProvider::create(&path, &header, 4).unwrap();

        let mut stale = header.clone();
        stale.last_txn_id = 999;
        mirror_header(&provider, &stale, 4).unwrap();

        let recovered = recover_header(&provider, 4).unwrap();
        assert_eq!(recovered.last_txn_id, 0);
    }

    #[test]
    fn recover_header_falls_back_to_mirror_when_primary_is_torn() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.scdb");
        let header = FileHeader::new(64, EncryptionMode::None, [2u8; 16]);
        let provider = FileStorageProvider::create(&path, &header, 4).unwrap();
        mirror_header(&provider, &header, 4).unwrap();

        let mut torn = Page::new(64);
        torn.data[0] = 0xFF;
        provider.write_page_sync(0, &torn).unwrap();

        let recovered = recover_header(&provider, 4).unwrap();
        assert_eq!(recovered, header);
    }

    #[test]
    fn recover_header_errors_when_both_copies_are_torn() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.scdb");
        let header = FileHeader::new(64, EncryptionMode::None, [3u8; 16]);
        let provider = FileStorageProvider::create(&path, &header, 4).unwrap();

        let mut torn = Page::new(64);
        torn.data[0] = 0xFF;
        provider.write_page_sync(0, &torn).unwrap();
        provider.write_page_sync(3 * 64, &torn).unwrap();

        assert!(recover_header(&provider, 4).is_err());
    }
}
