//! Sharded page cache (§4.5).
//!
//! Keyed by `(block name, page id)` and backed by a [`DashMap`] the way
//! the teacher's sharded store uses `DashMap` for lock-free reads and
//! per-key-sharded writes (`storage/src/sharded.rs`). LRU order is
//! tracked with a `VecDeque` pushed-to-front on every touch, mirroring
//! that same file's `VersionChain` push-front idiom, guarded by its own
//! lock so eviction never contends with the page map itself.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use sharpcore_core::{Error, PageId, Result};

use crate::page::Page;

/// Identifies one cached page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub block: String,
    pub page_id: PageId,
}

struct CacheEntry {
    page: Page,
    dirty: bool,
    pins: u32,
}

/// A provider the cache write-back path flushes dirty pages through;
/// implemented by the single-file storage provider.
pub trait PageWriter: Send + Sync {
    fn write_page(&self, block: &str, page_id: PageId, page: &Page) -> Result<()>;
}

/// Sharded LRU page cache.
pub struct PageCache {
    capacity: usize,
    entries: DashMap<CacheKey, CacheEntry>,
    /// Most-recently-used keys at the front. Guarded separately from
    /// `entries` so readers touching `entries` alone via DashMap's
    /// internal sharding don't serialize on LRU bookkeeping.
    lru: Mutex<VecDeque<CacheKey>>,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        PageCache {
            capacity,
            entries: DashMap::new(),
            lru: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn touch(&self, key: &CacheKey) {
        let mut lru = self.lru.lock();
        if let Some(pos) = lru.iter().position(|k| k == key) {
            lru.remove(pos);
        }
        lru.push_front(key.clone());
    }

    /// Fetch a cached page's contents, if present, marking it most
    /// recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Page> {
        let page = self.entries.get(key).map(|e| e.page.clone());
        if page.is_some() {
            self.touch(key);
        }
        page
    }

    /// Insert or replace a page, evicting the least-recently-used
    /// unpinned entry if the cache is at capacity.
    pub fn insert(&self, key: CacheKey, page: Page, dirty: bool, writer: &dyn PageWriter) -> Result<()> {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one(writer)?;
        }
        self.entries.insert(
            key.clone(),
            CacheEntry {
                page,
                dirty,
                pins: 0,
            },
        );
        self.touch(&key);
        Ok(())
    }

    /// Pin a page so it cannot be evicted while in use.
    pub fn pin(&self, key: &CacheKey) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("page {key:?} not cached")))?;
        entry.pins += 1;
        Ok(())
    }

    /// Unpin a previously pinned page.
    pub fn unpin(&self, key: &CacheKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.pins = entry.pins.saturating_sub(1);
        }
    }

    /// Mark a cached page dirty (caller has mutated its contents
    /// in-place via `get` + re-`insert`, or flags it after a write).
    pub fn mark_dirty(&self, key: &CacheKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.dirty = true;
        }
    }

    pub fn is_dirty(&self, key: &CacheKey) -> bool {
        self.entries.get(key).map(|e| e.dirty).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict one unpinned, least-recently-used page, writing it back
    /// first if dirty. Returns `Err(Error::Busy)` if every cached page
    /// is currently pinned.
    fn evict_one(&self, writer: &dyn PageWriter) -> Result<()> {
        let mut lru = self.lru.lock();
        let victim_index = lru.iter().rposition(|key| {
            self.entries
                .get(key)
                .map(|e| e.pins == 0)
                .unwrap_or(false)
        });
        let Some(index) = victim_index else {
            return Err(Error::Busy("page cache full, every page pinned".into()));
        };
        let key = lru.remove(index).unwrap();
        drop(lru);

        if let Some((_, entry)) = self.entries.remove(&key) {
            if entry.dirty {
                writer.write_page(&key.block, key.page_id, &entry.page)?;
            }
        }
        Ok(())
    }

    /// Flush every dirty page through `writer`, leaving entries cached
    /// but clean. Used by checkpoint and by graceful shutdown.
    pub fn flush_all(&self, writer: &dyn PageWriter) -> Result<()> {
        let keys: Vec<CacheKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let dirty_page = self
                .entries
                .get(&key)
                .filter(|e| e.dirty)
                .map(|e| e.page.clone());
            if let Some(page) = dirty_page {
                writer.write_page(&key.block, key.page_id, &page)?;
                if let Some(mut entry) = self.entries.get_mut(&key) {
                    entry.dirty = false;
                }
            }
        }
        Ok(())
    }

    /// Drop every cached entry belonging to `block`, without writing
    /// back — used after a block is deleted or replaced wholesale
    /// (e.g. append-only VACUUM's atomic block swap).
    pub fn invalidate_block(&self, block: &str) {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.block == block)
            .collect();
        let mut lru = self.lru.lock();
        for key in keys {
            self.entries.remove(&key);
            if let Some(pos) = lru.iter().position(|k| k == &key) {
                lru.remove(pos);
            }
        }
    }
}
