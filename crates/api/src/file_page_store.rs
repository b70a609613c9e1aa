//! Wires [`sharpcore_engine::store::PageStore`] over the real on-disk
//! stack: a [`FileStorageProvider`] for I/O, a [`PageCache`] fronting
//! it, and a shared [`FreeSpaceMap`]/[`BlockRegistry`] pair for
//! allocation and block bookkeeping. One `FilePageStore` serves one
//! table's block; logical page ids are block-relative (page 0 is the
//! block's own header page), translated to file-global pages through
//! the block's registry entry.
//!
//! When opened with a master key, every physical page is sealed with
//! the per-block crypto envelope (§4.1) before it reaches the
//! provider, and opened on the way back. The nonce travels inside the
//! sealed bytes themselves (`[nonce:12][ciphertext][tag:16]`), so a
//! reader never needs to know which generation a page was last written
//! under — only the writer does, to make sure overwriting the same
//! logical page never reuses a nonce. `PageStore::page_size` reports
//! the logical, plaintext page size callers actually get — smaller
//! than the provider's physical page size by that envelope's overhead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sharpcore_core::{Error, PageId, Result};
use sharpcore_durability::{block_id_for, open_block, seal_block, MasterKey, NONCE_LEN, TAG_LEN};
use sharpcore_storage::{
    BlockEntry, BlockRegistry, CacheKey, FileStorageProvider, FitStrategy, FreeSpaceMap, Page,
    PageCache, PageWriter, SlottedPage,
};
use sharpcore_engine::PageStore;

/// A page store backing one named block in the shared file.
pub struct FilePageStore {
    provider: Arc<FileStorageProvider>,
    cache: Arc<PageCache>,
    registry: Arc<BlockRegistry>,
    fsm: Arc<std::sync::Mutex<FreeSpaceMap>>,
    block: String,
    physical_page_size: u32,
    logical_page_size: u32,
    master_key: Option<MasterKey>,
    key_id: u64,
    next_logical: AtomicU64,
}

impl FilePageStore {
    /// Open a plaintext page store over `block`.
    pub fn new(
        provider: Arc<FileStorageProvider>,
        cache: Arc<PageCache>,
        registry: Arc<BlockRegistry>,
        fsm: Arc<std::sync::Mutex<FreeSpaceMap>>,
        block: impl Into<String>,
    ) -> Result<Self> {
        Self::with_crypto(provider, cache, registry, fsm, block, None)
    }

    /// Open a page store whose pages are sealed under `master_key`/
    /// `key_id` on every write and verified on every read.
    pub fn with_crypto(
        provider: Arc<FileStorageProvider>,
        cache: Arc<PageCache>,
        registry: Arc<BlockRegistry>,
        fsm: Arc<std::sync::Mutex<FreeSpaceMap>>,
        block: impl Into<String>,
        crypto: Option<(MasterKey, u64)>,
    ) -> Result<Self> {
        let block = block.into();
        let physical_page_size = provider.page_size();
        let entry = registry
            .get(&block)
            .ok_or_else(|| Error::NotFound(format!("block {block:?} not registered")))?;
        let overhead = Self::crypto_overhead(crypto.is_some());
        if overhead >= physical_page_size {
            return Err(Error::InvalidArgument(
                "page size too small to hold the crypto envelope overhead".into(),
            ));
        }
        let (master_key, key_id) = match crypto {
            Some((key, id)) => (Some(key), id),
            None => (None, 0),
        };
        Ok(FilePageStore {
            provider,
            cache,
            registry,
            fsm,
            block,
            physical_page_size,
            logical_page_size: physical_page_size - overhead,
            master_key,
            key_id,
            next_logical: AtomicU64::new(entry.length_pages),
        })
    }

    fn crypto_overhead(encrypted: bool) -> u32 {
        if encrypted {
            NONCE_LEN as u32 + TAG_LEN as u32
        } else {
            0
        }
    }

    fn entry(&self) -> Result<BlockEntry> {
        self.registry
            .get(&self.block)
            .ok_or_else(|| Error::NotFound(format!("block {:?} not registered", self.block)))
    }

    /// Bump the block's generation counter and persist the new value,
    /// so the nonce derived for this write never repeats for this
    /// block even if the same logical page is overwritten.
    fn next_generation(&self) -> Result<u64> {
        let mut entry = self.entry()?;
        entry.generation += 1;
        let generation = entry.generation;
        self.registry.put(entry);
        Ok(generation)
    }

    fn seal_physical(&self, page_id: PageId, plaintext: &[u8]) -> Result<Vec<u8>> {
        match &self.master_key {
            None => Ok(plaintext.to_vec()),
            Some(key) => {
                let generation = self.next_generation()?;
                Ok(seal_block(
                    key,
                    self.key_id,
                    block_id_for(&self.block),
                    generation,
                    page_id,
                    plaintext,
                ))
            }
        }
    }

    fn open_physical(&self, page_id: PageId, physical: &[u8]) -> Result<Vec<u8>> {
        match &self.master_key {
            None => Ok(physical.to_vec()),
            Some(key) => {
                open_block(key, self.key_id, block_id_for(&self.block), page_id, physical).map_err(
                    |_| {
                        Error::TamperDetected(format!(
                            "block {:?} page {page_id} failed AEAD verification",
                            self.block
                        ))
                    },
                )
            }
        }
    }

    /// Extend the block's contiguous extent to at least `needed_pages`,
    /// copying every existing page to the new extent and repointing the
    /// registry. The copy moves physical bytes verbatim: each page's
    /// logical id (and therefore the AAD it was sealed under) doesn't
    /// change when the block merely gets a bigger extent, so a raw copy
    /// stays verifiable without re-sealing.
    fn grow_block(&self, needed_pages: u64) -> Result<BlockEntry> {
        let mut entry = self.entry()?;
        if needed_pages <= entry.length_pages {
            return Ok(entry);
        }
        let mut fsm = self.fsm.lock().unwrap();
        let new_len = needed_pages.next_power_of_two().max(16);
        let new_total = FreeSpaceMap::next_growth_target(fsm.total_pages(), new_len);
        if new_total > fsm.total_pages() {
            fsm.grow_to(new_total);
            self.provider.grow_file(new_total)?;
        }
        let new_start = fsm.allocate(new_len, FitStrategy::First)?;

        for i in 0..entry.length_pages {
            let old_offset = sharpcore_storage::page_offset(entry.start_page + i, self.physical_page_size);
            let page = self.provider.read_page(old_offset)?;
            let new_offset = sharpcore_storage::page_offset(new_start + i, self.physical_page_size);
            self.provider.write_page_sync(new_offset, &page)?;
        }
        fsm.free(entry.start_page, entry.length_pages);

        entry.start_page = new_start;
        entry.length_pages = new_len;
        entry.generation += 1;
        self.registry.put(entry.clone());
        Ok(entry)
    }

    fn key(&self, page_id: PageId) -> CacheKey {
        CacheKey {
            block: self.block.clone(),
            page_id,
        }
    }
}

impl PageWriter for FilePageStore {
    fn write_page(&self, block: &str, page_id: PageId, page: &Page) -> Result<()> {
        let entry = self.entry()?;
        let offset = sharpcore_storage::page_offset(entry.start_page + page_id, self.physical_page_size);
        let physical = self.seal_physical(page_id, &page.data)?;
        self.provider.write_page_queued(offset, &Page::from_bytes(physical));
        let _ = block;
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> u32 {
        self.logical_page_size
    }

    fn read_page(&self, page_id: PageId) -> Result<Page> {
        let key = self.key(page_id);
        if let Some(page) = self.cache.get(&key) {
            return Ok(page);
        }
        let entry = self.entry()?;
        if page_id >= entry.length_pages {
            return Err(Error::NotFound(format!(
                "page {page_id} not allocated in block {:?}",
                self.block
            )));
        }
        let offset = sharpcore_storage::page_offset(entry.start_page + page_id, self.physical_page_size);
        let physical = self.provider.read_page(offset)?;
        let plaintext = self.open_physical(page_id, &physical.data)?;
        let page = Page::from_bytes(plaintext);
        self.cache.insert(key, page.clone(), false, self)?;
        Ok(page)
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<()> {
        let key = self.key(page_id);
        self.cache.insert(key, page.clone(), true, self)
    }

    fn allocate_page(&self) -> Result<PageId> {
        let page_id = self.next_logical.fetch_add(1, Ordering::SeqCst);
        self.grow_block(page_id + 1)?;
        let mut page = Page::new(self.logical_page_size);
        SlottedPage::init(&mut page);
        PageStore::write_page(self, page_id, &page)?;
        Ok(page_id)
    }

    fn free_page(&self, page_id: PageId) -> Result<()> {
        self.cache.invalidate_block(&self.block);
        let _ = page_id;
        Ok(())
    }

    fn page_count(&self) -> u64 {
        self.entry().map(|e| e.length_pages).unwrap_or(0)
    }
}
