//! Append-only heap engine (§4.8): a sequential log of versioned
//! records plus an in-memory logical index `rid -> (page, offset)`.
//! Updates append a new version; deletes append a tombstone. VACUUM
//! rewrites live versions into a fresh block and swaps it in via the
//! registry, the way the teacher's `primitives/vector/collection.rs`
//! rebuilds a segment and atomically repoints its manifest entry
//! rather than mutating a live segment in place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use sharpcore_core::{ColumnType, Error, PageId, Result, RowId, TableSchema, TxnId, Value};
use sharpcore_durability::wal::WalOp;
use sharpcore_storage::codec::{decode_row, encode_column, encode_row, ColumnSegment};
use sharpcore_storage::SlottedPage;

use crate::store::PageStore;
use crate::wal_support::WalAppender;

/// Location of one record version within the append-only log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordLocation {
    page_id: PageId,
    slot: u16,
    version: u64,
    deleted: bool,
}

fn encode_versioned(version: u64, deleted: bool, row_bytes: &[u8]) -> Vec<u8> {
    use byteorder::{LittleEndian, WriteBytesExt};
    let mut buf = Vec::with_capacity(9 + row_bytes.len());
    buf.write_u64::<LittleEndian>(version).unwrap();
    buf.write_u8(deleted as u8).unwrap();
    buf.extend_from_slice(row_bytes);
    buf
}

fn decode_versioned(bytes: &[u8]) -> Result<(u64, bool, &[u8])> {
    use byteorder::{LittleEndian, ReadBytesExt};
    if bytes.len() < 9 {
        return Err(Error::Corrupt("versioned record shorter than header".into()));
    }
    let version = (&bytes[0..8]).read_u64::<LittleEndian>()?;
    let deleted = bytes[8] != 0;
    Ok((version, deleted, &bytes[9..]))
}

/// An append-only heap backing one table.
pub struct AppendOnlyHeapEngine<S: PageStore> {
    store: S,
    schema: TableSchema,
    block_id: u64,
    row_index: DashMap<RowId, RecordLocation>,
    tail_page: Mutex<Option<PageId>>,
    next_rid: AtomicU64,
}

impl<S: PageStore> AppendOnlyHeapEngine<S> {
    pub fn new(store: S, schema: TableSchema, block_id: u64) -> Self {
        AppendOnlyHeapEngine {
            store,
            schema,
            block_id,
            row_index: DashMap::new(),
            tail_page: Mutex::new(None),
            next_rid: AtomicU64::new(0),
        }
    }

    fn column_types(&self) -> Vec<ColumnType> {
        self.schema.columns.iter().map(|c| c.ty).collect()
    }

    fn append_to_tail(&self, bytes: &[u8]) -> Result<(PageId, u16)> {
        let mut tail = self.tail_page.lock().unwrap();
        if let Some(page_id) = *tail {
            let mut page = self.store.read_page(page_id)?;
            let slot = {
                let mut slotted = SlottedPage::new(&mut page);
                slotted.insert_record(bytes)
            };
            if let Ok(slot) = slot {
                self.store.write_page(page_id, &page)?;
                return Ok((page_id, slot));
            }
        }
        let page_id = self.store.allocate_page()?;
        let mut page = self.store.read_page(page_id)?;
        let slot = {
            let mut slotted = SlottedPage::new(&mut page);
            slotted.insert_record(bytes)?
        };
        self.store.write_page(page_id, &page)?;
        *tail = Some(page_id);
        Ok((page_id, slot))
    }

    pub fn insert(
        &self,
        values: &[Value],
        txn_id: TxnId,
        wal: Option<&dyn WalAppender>,
    ) -> Result<RowId> {
        self.schema.validate_row(values)?;
        let row_bytes = encode_row(&self.column_types(), values)?;
        let versioned = encode_versioned(0, false, &row_bytes);
        let (page_id, slot) = self.append_to_tail(&versioned)?;

        let rid = self.next_rid.fetch_add(1, Ordering::SeqCst);
        self.row_index.insert(
            rid,
            RecordLocation {
                page_id,
                slot,
                version: 0,
                deleted: false,
            },
        );
        if let Some(wal) = wal {
            wal.append_write(WalOp::Insert, txn_id, self.block_id, page_id, b"", &versioned)?;
        }
        Ok(rid)
    }

    pub fn get(&self, rid: RowId) -> Result<Option<Vec<Value>>> {
        let Some(loc) = self.row_index.get(&rid).map(|l| *l) else {
            return Ok(None);
        };
        if loc.deleted {
            return Ok(None);
        }
        let mut page = self.store.read_page(loc.page_id)?;
        let slotted = SlottedPage::new(&mut page);
        let Some(bytes) = slotted.read_record(loc.slot) else {
            return Ok(None);
        };
        let (_, deleted, row_bytes) = decode_versioned(bytes)?;
        if deleted {
            return Ok(None);
        }
        Ok(Some(decode_row(&self.column_types(), row_bytes)?))
    }

    /// Append a new version of the row; the logical index repoints to
    /// the new location, leaving the old version as dead weight until
    /// VACUUM.
    pub fn update(
        &self,
        rid: RowId,
        values: &[Value],
        txn_id: TxnId,
        wal: Option<&dyn WalAppender>,
    ) -> Result<()> {
        self.schema.validate_row(values)?;
        let Some(old) = self.row_index.get(&rid).map(|l| *l) else {
            return Err(Error::NotFound(format!("row {rid} not found")));
        };
        let row_bytes = encode_row(&self.column_types(), values)?;
        let new_version = old.version + 1;
        let versioned = encode_versioned(new_version, false, &row_bytes);
        let (page_id, slot) = self.append_to_tail(&versioned)?;

        self.row_index.insert(
            rid,
            RecordLocation {
                page_id,
                slot,
                version: new_version,
                deleted: false,
            },
        );
        if let Some(wal) = wal {
            wal.append_write(WalOp::Update, txn_id, self.block_id, page_id, b"", &versioned)?;
        }
        Ok(())
    }

    /// Append a tombstone version; the row id stays in the logical
    /// index so a concurrent reader mid-scan sees `None` rather than a
    /// stale value, but it is dropped entirely at the next VACUUM.
    pub fn delete(&self, rid: RowId, txn_id: TxnId, wal: Option<&dyn WalAppender>) -> Result<()> {
        let Some(old) = self.row_index.get(&rid).map(|l| *l) else {
            return Err(Error::NotFound(format!("row {rid} not found")));
        };
        let new_version = old.version + 1;
        let tombstone = encode_versioned(new_version, true, &[]);
        let (page_id, slot) = self.append_to_tail(&tombstone)?;
        self.row_index.insert(
            rid,
            RecordLocation {
                page_id,
                slot,
                version: new_version,
                deleted: true,
            },
        );
        if let Some(wal) = wal {
            wal.append_write(WalOp::Delete, txn_id, self.block_id, page_id, b"", &tombstone)?;
        }
        Ok(())
    }

    pub fn live_row_count(&self) -> usize {
        self.row_index.iter().filter(|e| !e.deleted).count()
    }

    /// Encode every live column into the segment layout a columnar
    /// promotion persists (§4.11), one segment per schema column, in
    /// row-id order. Empty for a table with no live rows.
    pub fn columnar_snapshot(&self) -> Result<Vec<ColumnSegment>> {
        let mut rows: Vec<(RowId, Vec<Value>)> = Vec::new();
        for entry in self.row_index.iter() {
            if entry.deleted {
                continue;
            }
            let rid = *entry.key();
            if let Some(values) = self.get(rid)? {
                rows.push((rid, values));
            }
        }
        rows.sort_by_key(|(rid, _)| *rid);

        let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); self.schema.columns.len()];
        for (_, values) in &rows {
            for (i, value) in values.iter().enumerate() {
                columns[i].push(value.clone());
            }
        }

        columns
            .into_iter()
            .filter(|column| !column.is_empty())
            .map(|column| encode_column(&column))
            .collect()
    }

    pub(crate) fn contains(&self, rid: RowId) -> bool {
        self.row_index.contains_key(&rid)
    }

    /// Drop a row from the front store's logical index once the hybrid
    /// engine's compactor has durably copied it into a back store. The
    /// log bytes already on disk are left alone; only the in-memory
    /// pointer goes away, so a later `get` falls through to the back
    /// store.
    pub(crate) fn evict_compacted(&self, rid: RowId) {
        self.row_index.remove(&rid);
    }

    /// Rewrite every live row into a fresh block, dropping dead
    /// versions and tombstones, and atomically swap the logical index
    /// over to it. Callers commit the new block id to the registry
    /// before calling this; on success the old block's pages are the
    /// caller's to reclaim.
    pub fn vacuum(&mut self, fresh_store: S) -> Result<()> {
        let live: Vec<(RowId, RecordLocation)> = self
            .row_index
            .iter()
            .filter(|e| !e.deleted)
            .map(|e| (*e.key(), *e.value()))
            .collect();

        let rewritten = AppendOnlyHeapEngine {
            store: fresh_store,
            schema: self.schema.clone(),
            block_id: self.block_id,
            row_index: DashMap::new(),
            tail_page: Mutex::new(None),
            next_rid: AtomicU64::new(0),
        };

        for (rid, loc) in live {
            let mut page = self.store.read_page(loc.page_id)?;
            let slotted = SlottedPage::new(&mut page);
            let Some(bytes) = slotted.read_record(loc.slot) else {
                continue;
            };
            let (version, deleted, row_bytes) = decode_versioned(bytes)?;
            if deleted {
                continue;
            }
            let versioned = encode_versioned(version, false, row_bytes);
            let (page_id, slot) = rewritten.append_to_tail(&versioned)?;
            rewritten.row_index.insert(
                rid,
                RecordLocation {
                    page_id,
                    slot,
                    version,
                    deleted: false,
                },
            );
        }

        self.row_index.clear();
        for entry in rewritten.row_index.iter() {
            self.row_index.insert(*entry.key(), *entry.value());
        }
        *self.tail_page.lock().unwrap() = *rewritten.tail_page.lock().unwrap();
        self.store = rewritten.store;
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
            "events",
            vec![ColumnDef::new("payload", ColumnType::Text)],
            EngineKind::AppendOnly,
        )
    }

    fn engine() -> AppendOnlyHeapEngine<InMemoryPageStore> {
        AppendOnlyHeapEngine::new(InMemoryPageStore::new(512), schema(), 1)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let engine = engine();
        let rid = engine.insert(&[Value::Text("a".into())], 1, None).unwrap();
        assert_eq!(engine.get(rid).unwrap().unwrap()[0], Value::Text("a".into()));
    }

    #[test]
    fn update_creates_a_new_version_without_losing_the_old() {
        let engine = engine();
        let rid = engine.insert(&[Value::Text("a".into())], 1, None).unwrap();
        engine.update(rid, &[Value::Text("b".into())], 1, None).unwrap();
        assert_eq!(engine.get(rid).unwrap().unwrap()[0], Value::Text("b".into()));
    }

    #[test]
    fn delete_makes_the_row_invisible() {
        let engine = engine();
        let rid = engine.insert(&[Value::Text("a".into())], 1, None).unwrap();
        engine.delete(rid, 1, None).unwrap();
        assert_eq!(engine.get(rid).unwrap(), None);
        assert_eq!(engine.live_row_count(), 0);
    }

    #[test]
    fn vacuum_drops_dead_versions_but_keeps_live_data() {
        let mut engine = engine();
        let rid1 = engine.insert(&[Value::Text("keep".into())], 1, None).unwrap();
        let rid2 = engine.insert(&[Value::Text("gone".into())], 1, None).unwrap();
        engine.update(rid1, &[Value::Text("keep-v2".into())], 1, None).unwrap();
        engine.delete(rid2, 1, None).unwrap();

        engine.vacuum(InMemoryPageStore::new(512)).unwrap();

        assert_eq!(engine.get(rid1).unwrap().unwrap()[0], Value::Text("keep-v2".into()));
        assert_eq!(engine.get(rid2).unwrap(), None);
        assert_eq!(engine.live_row_count(), 1);
    }
}
