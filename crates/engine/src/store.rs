//! The page-source abstraction every heap engine is built over.
//!
//! Mirrors the teacher's habit of putting storage behind a narrow trait
//! (`strata-durability`'s `DurabilityBackend`) so engine logic can be
//! exercised without a real file: production wiring (`sharpcore-api`)
//! backs this with [`sharpcore_storage::PageCache`] fronting a
//! [`sharpcore_storage::FileStorageProvider`] plus a
//! [`sharpcore_storage::FreeSpaceMap`] for allocation; tests use
//! [`InMemoryPageStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sharpcore_core::{Error, PageId, Result};
use sharpcore_storage::{Page, SlottedPage};

/// One block's page-level storage: read, write, allocate, and free.
/// Implementors own whatever durability/caching sits underneath; the
/// heap and index engines only ever see pages.
pub trait PageStore: Send + Sync {
    fn page_size(&self) -> u32;
    fn read_page(&self, page_id: PageId) -> Result<Page>;
    fn write_page(&self, page_id: PageId, page: &Page) -> Result<()>;
    /// Allocate a fresh, zeroed page and return its id.
    fn allocate_page(&self) -> Result<PageId>;
    fn free_page(&self, page_id: PageId) -> Result<()>;
    fn page_count(&self) -> u64;
}

/// A bump-allocating, freelist-reusing in-memory page store, used by
/// engine unit tests and by the append-only engine's scratch block
/// during VACUUM before the rewritten block is committed.
pub struct InMemoryPageStore {
    page_size: u32,
    pages: Mutex<Vec<Option<Page>>>,
    next: AtomicU64,
    freelist: Mutex<Vec<PageId>>,
}

impl InMemoryPageStore {
    pub fn new(page_size: u32) -> Self {
        InMemoryPageStore {
            page_size,
            pages: Mutex::new(Vec::new()),
            next: AtomicU64::new(0),
            freelist: Mutex::new(Vec::new()),
        }
    }
}

impl PageStore for InMemoryPageStore {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read_page(&self, page_id: PageId) -> Result<Page> {
        self.pages
            .lock()
            .unwrap()
            .get(page_id as usize)
            .and_then(|slot| slot.clone())
            .ok_or_else(|| Error::NotFound(format!("page {page_id} not allocated")))
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<()> {
        let mut pages = self.pages.lock().unwrap();
        let slot = pages
            .get_mut(page_id as usize)
            .ok_or_else(|| Error::NotFound(format!("page {page_id} not allocated")))?;
        *slot = Some(page.clone());
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        if let Some(reused) = self.freelist.lock().unwrap().pop() {
            let mut page = Page::new(self.page_size);
            SlottedPage::init(&mut page);
            self.pages.lock().unwrap()[reused as usize] = Some(page);
            return Ok(reused);
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let mut page = Page::new(self.page_size);
        SlottedPage::init(&mut page);
        self.pages.lock().unwrap().push(Some(page));
        Ok(id)
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        let mut pages = self.pages.lock().unwrap();
        let slot = pages
            .get_mut(page_id as usize)
            .ok_or_else(|| Error::NotFound(format!("page {page_id} not allocated")))?;
        *slot = None;
        self.freelist.lock().unwrap().push(page_id);
        Ok(())
    }

    fn page_count(&self) -> u64 {
        self.pages.lock().unwrap().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_read_write_round_trips() {
        let store = InMemoryPageStore::new(256);
        let id = store.allocate_page().unwrap();
        let mut page = store.read_page(id).unwrap();
        {
            let mut slotted = SlottedPage::new(&mut page);
            slotted.insert_record(b"hi").unwrap();
        }
        store.write_page(id, &page).unwrap();
        let mut reread = store.read_page(id).unwrap();
        let slotted = SlottedPage::new(&mut reread);
        assert_eq!(slotted.read_record(0), Some(&b"hi"[..]));
    }

    #[test]
    fn freed_page_id_is_reused() {
        let store = InMemoryPageStore::new(256);
        let a = store.allocate_page().unwrap();
        store.free_page(a).unwrap();
        let b = store.allocate_page().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reading_unallocated_page_errors() {
        let store = InMemoryPageStore::new(256);
        assert!(store.read_page(0).is_err());
    }
}
