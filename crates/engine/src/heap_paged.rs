//! Page-based heap engine (§4.7): slotted pages with in-place update.
//!
//! Page 0 of the block is reserved as a header page holding the
//! free-list head; every other page is a [`SlottedPage`]. "Find a page
//! with room" is O(1) via a coarse free-space-bucket index keyed by
//! `>= 25% / >= 50% / >= 75% free`, rather than scanning every page —
//! the same bucket-not-exact-byte-count trade the teacher's allocator
//! makes for the same reason (`sharpcore_storage::fsm`'s extent
//! tracking over an exact first-fit scan).

use std::collections::BTreeSet;
use std::sync::Mutex;

use dashmap::DashMap;
use sharpcore_core::{
    ColumnType, Error, PageId, Result, RowId, TableSchema, TxnId, Value,
};
use sharpcore_durability::wal::WalOp;
use sharpcore_storage::codec::{decode_row, encode_row};
use sharpcore_storage::{Page, SlottedPage};

use crate::store::PageStore;
use crate::wal_support::WalAppender;

/// Coarse free-space classes used for O(1) "find page with room."
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Bucket {
    Ge75,
    Ge50,
    Ge25,
    Full,
}

fn bucket_for(free_ratio: f64) -> Bucket {
    if free_ratio >= 0.75 {
        Bucket::Ge75
    } else if free_ratio >= 0.50 {
        Bucket::Ge50
    } else if free_ratio >= 0.25 {
        Bucket::Ge25
    } else {
        Bucket::Full
    }
}

/// Row location within the heap: which page, which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    pub page_id: PageId,
    pub slot: u16,
}

/// A page-based heap backing one table.
pub struct PagedHeapEngine<S: PageStore> {
    store: S,
    schema: TableSchema,
    block_id: u64,
    row_index: DashMap<RowId, RowLocation>,
    buckets: Mutex<[BTreeSet<PageId>; 4]>,
    next_rid: Mutex<RowId>,
}

impl<S: PageStore> PagedHeapEngine<S> {
    pub fn new(store: S, schema: TableSchema, block_id: u64) -> Self {
        PagedHeapEngine {
            store,
            schema,
            block_id,
            row_index: DashMap::new(),
            buckets: Mutex::new([
                BTreeSet::new(),
                BTreeSet::new(),
                BTreeSet::new(),
                BTreeSet::new(),
            ]),
            next_rid: Mutex::new(0),
        }
    }

    fn bucket_index(b: Bucket) -> usize {
        match b {
            Bucket::Ge75 => 0,
            Bucket::Ge50 => 1,
            Bucket::Ge25 => 2,
            Bucket::Full => 3,
        }
    }

    fn classify_and_track(&self, page_id: PageId, page: &mut Page) {
        let slotted = SlottedPage::new(page);
        let ratio = slotted.free_space() as f64 / page.size() as f64;
        let bucket = bucket_for(ratio);
        let mut buckets = self.buckets.lock().unwrap();
        for set in buckets.iter_mut() {
            set.remove(&page_id);
        }
        if bucket != Bucket::Full {
            buckets[Self::bucket_index(bucket)].insert(page_id);
        }
    }

    /// A page from the free-list with at least `needed` bytes free,
    /// preferring the tightest-fitting non-empty bucket.
    fn find_page_with_room(&self, needed: usize) -> Option<PageId> {
        let min_bucket = if needed as f64 / self.store.page_size() as f64 >= 0.5 {
            Bucket::Ge75
        } else if needed as f64 / self.store.page_size() as f64 >= 0.25 {
            Bucket::Ge50
        } else {
            Bucket::Ge25
        };
        let buckets = self.buckets.lock().unwrap();
        for bucket in [Bucket::Ge75, Bucket::Ge50, Bucket::Ge25] {
            if bucket > min_bucket {
                continue;
            }
            if let Some(&page_id) = buckets[Self::bucket_index(bucket)].iter().next() {
                return Some(page_id);
            }
        }
        None
    }

    fn alloc_page(&self) -> Result<PageId> {
        let page_id = self.store.allocate_page()?;
        let mut buckets = self.buckets.lock().unwrap();
        buckets[Self::bucket_index(Bucket::Ge75)].insert(page_id);
        Ok(page_id)
    }

    fn next_row_id(&self) -> RowId {
        let mut next = self.next_rid.lock().unwrap();
        let id = *next;
        *next += 1;
        id
    }

    /// Insert one row, returning its assigned row id.
    pub fn insert(
        &self,
        values: &[Value],
        txn_id: TxnId,
        wal: Option<&dyn WalAppender>,
    ) -> Result<RowId> {
        self.schema.validate_row(values)?;
        let column_types: Vec<ColumnType> = self.schema.columns.iter().map(|c| c.ty).collect();
        let bytes = encode_row(&column_types, values)?;

        let page_id = match self.find_page_with_room(bytes.len()) {
            Some(id) => id,
            None => self.alloc_page()?,
        };
        let mut page = self.store.read_page(page_id)?;
        let slot = {
            let mut slotted = SlottedPage::new(&mut page);
            slotted.insert_record(&bytes)?
        };
        self.classify_and_track(page_id, &mut page);
        self.store.write_page(page_id, &page)?;

        let rid = self.next_row_id();
        self.row_index.insert(rid, RowLocation { page_id, slot });

        if let Some(wal) = wal {
            wal.append_write(WalOp::Insert, txn_id, self.block_id, page_id, b"", &bytes)?;
        }
        Ok(rid)
    }

    pub fn get(&self, rid: RowId) -> Result<Option<Vec<Value>>> {
        let Some(loc) = self.row_index.get(&rid).map(|l| *l) else {
            return Ok(None);
        };
        let mut page = self.store.read_page(loc.page_id)?;
        let slotted = SlottedPage::new(&mut page);
        let column_types: Vec<ColumnType> = self.schema.columns.iter().map(|c| c.ty).collect();
        match slotted.read_record(loc.slot) {
            Some(bytes) => Ok(Some(decode_row(&column_types, bytes)?)),
            None => Ok(None),
        }
    }

    /// Update a row: in place if the new encoding fits the existing
    /// slot, otherwise tombstone-and-reinsert so indexes get the new
    /// rid mapping (§4.7 "Update path").
    pub fn update(
        &self,
        rid: RowId,
        values: &[Value],
        txn_id: TxnId,
        wal: Option<&dyn WalAppender>,
    ) -> Result<()> {
        self.schema.validate_row(values)?;
        let Some(loc) = self.row_index.get(&rid).map(|l| *l) else {
            return Err(Error::NotFound(format!("row {rid} not found")));
        };
        let column_types: Vec<ColumnType> = self.schema.columns.iter().map(|c| c.ty).collect();
        let new_bytes = encode_row(&column_types, values)?;

        let mut page = self.store.read_page(loc.page_id)?;
        let before = {
            let slotted = SlottedPage::new(&mut page);
            slotted.read_record(loc.slot).map(|b| b.to_vec())
        }
        .unwrap_or_default();

        let fits = {
            let mut slotted = SlottedPage::new(&mut page);
            slotted.update_in_place(loc.slot, &new_bytes).is_ok()
        };

        if fits {
            self.classify_and_track(loc.page_id, &mut page);
            self.store.write_page(loc.page_id, &page)?;
            if let Some(wal) = wal {
                wal.append_write(WalOp::Update, txn_id, self.block_id, loc.page_id, &before, &new_bytes)?;
            }
            return Ok(());
        }

        // Doesn't fit: tombstone the old slot, insert fresh elsewhere.
        {
            let mut slotted = SlottedPage::new(&mut page);
            slotted.tombstone(loc.slot)?;
        }
        self.classify_and_track(loc.page_id, &mut page);
        self.store.write_page(loc.page_id, &page)?;
        if let Some(wal) = wal {
            wal.append_write(WalOp::Delete, txn_id, self.block_id, loc.page_id, &before, b"")?;
        }

        let new_page_id = match self.find_page_with_room(new_bytes.len()) {
            Some(id) => id,
            None => self.alloc_page()?,
        };
        let mut new_page = self.store.read_page(new_page_id)?;
        let new_slot = {
            let mut slotted = SlottedPage::new(&mut new_page);
            slotted.insert_record(&new_bytes)?
        };
        self.classify_and_track(new_page_id, &mut new_page);
        self.store.write_page(new_page_id, &new_page)?;
        self.row_index.insert(
            rid,
            RowLocation {
                page_id: new_page_id,
                slot: new_slot,
            },
        );
        if let Some(wal) = wal {
            wal.append_write(WalOp::Insert, txn_id, self.block_id, new_page_id, b"", &new_bytes)?;
        }
        Ok(())
    }

    /// Mark a row deleted; its slot stays tombstoned until the page is
    /// compacted.
    pub fn delete(&self, rid: RowId, txn_id: TxnId, wal: Option<&dyn WalAppender>) -> Result<()> {
        let Some((_, loc)) = self.row_index.remove(&rid) else {
            return Err(Error::NotFound(format!("row {rid} not found")));
        };
        let mut page = self.store.read_page(loc.page_id)?;
        let before = {
            let slotted = SlottedPage::new(&mut page);
            slotted.read_record(loc.slot).map(|b| b.to_vec())
        }
        .unwrap_or_default();
        {
            let mut slotted = SlottedPage::new(&mut page);
            slotted.tombstone(loc.slot)?;
        }
        self.classify_and_track(loc.page_id, &mut page);
        self.store.write_page(loc.page_id, &page)?;
        if let Some(wal) = wal {
            wal.append_write(WalOp::Delete, txn_id, self.block_id, loc.page_id, &before, b"")?;
        }
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_index.len()
    }

    pub(crate) fn contains(&self, rid: RowId) -> bool {
        self.row_index.contains_key(&rid)
    }

    /// Insert or overwrite a row at a caller-chosen row id. Used by the
    /// hybrid engine's compactor to hand a row off from the front store
    /// without renumbering it; calling it twice for the same rid
    /// overwrites rather than duplicates, which is what makes
    /// compaction idempotent.
    pub(crate) fn upsert_with_rid(
        &self,
        rid: RowId,
        values: &[Value],
        txn_id: TxnId,
        wal: Option<&dyn WalAppender>,
    ) -> Result<()> {
        if self.row_index.contains_key(&rid) {
            return self.update(rid, values, txn_id, wal);
        }
        self.schema.validate_row(values)?;
        let column_types: Vec<ColumnType> = self.schema.columns.iter().map(|c| c.ty).collect();
        let bytes = encode_row(&column_types, values)?;
        let page_id = match self.find_page_with_room(bytes.len()) {
            Some(id) => id,
            None => self.alloc_page()?,
        };
        let mut page = self.store.read_page(page_id)?;
        let slot = {
            let mut slotted = SlottedPage::new(&mut page);
            slotted.insert_record(&bytes)?
        };
        self.classify_and_track(page_id, &mut page);
        self.store.write_page(page_id, &page)?;
        self.row_index.insert(rid, RowLocation { page_id, slot });
        if let Some(wal) = wal {
            wal.append_write(WalOp::Insert, txn_id, self.block_id, page_id, b"", &bytes)?;
        }
        Ok(())
    }

    /// Rebuild `row_index` and the free-space buckets from a full scan
    /// of the block's pages, in page/slot order. Used after reopening a
    /// table whose row locations aren't themselves persisted — only the
    /// catalog's schema and block name are. Row ids are reassigned
    /// sequentially starting at 0, since the original insertion order
    /// isn't recoverable from the heap alone.
    pub fn rebuild_from_scan(&mut self) -> Result<()> {
        self.row_index.clear();
        for set in self.buckets.lock().unwrap().iter_mut() {
            set.clear();
        }
        let mut next_rid = 0;
        for page_id in 0..self.store.page_count() {
            let mut page = self.store.read_page(page_id)?;
            let slotted = SlottedPage::new(&mut page);
            for slot in 0..slotted.len() {
                if slotted.read_record(slot).is_some() {
                    self.row_index.insert(
                        next_rid,
                        RowLocation {
                            page_id,
                            slot,
                        },
                    );
                    next_rid += 1;
                }
            }
            self.classify_and_track(page_id, &mut page);
        }
        *self.next_rid.lock().unwrap() = next_rid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPageStore;
    use sharpcore_core::{ColumnDef, EngineKind};

    fn schema() -> TableSchema {
        TableSchema::new(
            "widgets",
            vec![
                ColumnDef::new("id", ColumnType::Integer).not_null(),
                ColumnDef::new("label", ColumnType::Text),
            ],
            EngineKind::PageBased,
        )
        .with_primary_key(0)
        .unwrap()
    }

    fn engine() -> PagedHeapEngine<InMemoryPageStore> {
        PagedHeapEngine::new(InMemoryPageStore::new(512), schema(), 1)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let engine = engine();
        let rid = engine
            .insert(&[Value::Integer(1), Value::Text("a".into())], 1, None)
            .unwrap();
        let row = engine.get(rid).unwrap().unwrap();
        assert_eq!(row[0], Value::Integer(1));
    }

    #[test]
    fn update_in_place_keeps_same_location() {
        let engine = engine();
        let rid = engine
            .insert(&[Value::Integer(1), Value::Text("a".into())], 1, None)
            .unwrap();
        let loc_before = *engine.row_index.get(&rid).unwrap();
        engine
            .update(rid, &[Value::Integer(1), Value::Text("b".into())], 1, None)
            .unwrap();
        let loc_after = *engine.row_index.get(&rid).unwrap();
        assert_eq!(loc_before.page_id, loc_after.page_id);
        assert_eq!(engine.get(rid).unwrap().unwrap()[1], Value::Text("b".into()));
    }

    #[test]
    fn update_that_grows_relocates_and_tombstones_old_slot() {
        let engine = engine();
        let rid = engine
            .insert(&[Value::Integer(1), Value::Text("a".into())], 1, None)
            .unwrap();
        let bigger = "x".repeat(400);
        engine
            .update(rid, &[Value::Integer(1), Value::Text(bigger.clone())], 1, None)
            .unwrap();
        assert_eq!(
            engine.get(rid).unwrap().unwrap()[1],
            Value::Text(bigger)
        );
    }

    #[test]
    fn delete_removes_row_from_index() {
        let engine = engine();
        let rid = engine
            .insert(&[Value::Integer(1), Value::Text("a".into())], 1, None)
            .unwrap();
        engine.delete(rid, 1, None).unwrap();
        assert_eq!(engine.get(rid).unwrap(), None);
        assert_eq!(engine.row_count(), 0);
    }

    #[test]
    fn many_inserts_span_multiple_pages() {
        let engine = engine();
        for i in 0..50 {
            engine
                .insert(&[Value::Integer(i), Value::Text("row".into())], 1, None)
                .unwrap();
        }
        assert_eq!(engine.row_count(), 50);
        assert!(engine.store.page_count() > 1);
    }
}
