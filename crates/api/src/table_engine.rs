//! Dispatches a table's row operations to whichever storage engine its
//! schema names (§2, §4.7-§4.9), and keeps that table's secondary
//! indexes in step with every mutation (§4.10).

use std::sync::Mutex;

use sharpcore_core::{Result, RowId, TableSchema, TxnId, Value};
use sharpcore_engine::{
    AppendOnlyHeapEngine, BTreeIndex, BatchUpdateScope, HashIndex, HybridEngine, PagedHeapEngine,
    WalAppender,
};

use crate::catalog::IndexKind;
use crate::file_page_store::FilePageStore;

/// One table's row-storage engine, picked by its declared `EngineKind`.
pub enum TableEngine {
    Paged(PagedHeapEngine<FilePageStore>),
    AppendOnly(AppendOnlyHeapEngine<FilePageStore>),
    Hybrid(HybridEngine<FilePageStore, FilePageStore>),
}

impl TableEngine {
    pub fn insert(
        &self,
        values: &[Value],
        txn_id: TxnId,
        wal: Option<&dyn WalAppender>,
    ) -> Result<RowId> {
        match self {
            TableEngine::Paged(e) => e.insert(values, txn_id, wal),
            TableEngine::AppendOnly(e) => e.insert(values, txn_id, wal),
            TableEngine::Hybrid(e) => e.insert(values, txn_id, wal),
        }
    }

    pub fn get(&self, rid: RowId) -> Result<Option<Vec<Value>>> {
        match self {
            TableEngine::Paged(e) => e.get(rid),
            TableEngine::AppendOnly(e) => e.get(rid),
            TableEngine::Hybrid(e) => e.get(rid),
        }
    }

    pub fn update(
        &self,
        rid: RowId,
        values: &[Value],
        txn_id: TxnId,
        wal: Option<&dyn WalAppender>,
    ) -> Result<()> {
        match self {
            TableEngine::Paged(e) => e.update(rid, values, txn_id, wal),
            TableEngine::AppendOnly(e) => e.update(rid, values, txn_id, wal),
            TableEngine::Hybrid(e) => e.update(rid, values, txn_id, wal),
        }
    }

    pub fn delete(&self, rid: RowId, txn_id: TxnId, wal: Option<&dyn WalAppender>) -> Result<()> {
        match self {
            TableEngine::Paged(e) => e.delete(rid, txn_id, wal),
            TableEngine::AppendOnly(e) => e.delete(rid, txn_id, wal),
            TableEngine::Hybrid(e) => e.delete(rid, txn_id, wal),
        }
    }
}

/// A table's engine plus any number of hash and btree secondary
/// indexes, kept in sync on every mutation, and a batch-update scope
/// that defers index maintenance while one is open (§4.10).
pub struct TableRuntime {
    pub schema: TableSchema,
    pub engine: TableEngine,
    hash_indexes: Vec<(String, Mutex<HashIndex>)>,
    btree_indexes: Vec<(String, Mutex<BTreeIndex>)>,
    pub batch: BatchUpdateScope,
}

impl TableRuntime {
    pub fn new(schema: TableSchema, engine: TableEngine) -> Self {
        TableRuntime {
            schema,
            engine,
            hash_indexes: Vec::new(),
            btree_indexes: Vec::new(),
            batch: BatchUpdateScope::new(),
        }
    }

    fn collation_of(&self, column: &str) -> sharpcore_core::Collation {
        self.schema
            .column_index(column)
            .map(|i| self.schema.columns[i].collation.clone())
            .unwrap_or(sharpcore_core::Collation::Binary)
    }

    pub fn add_hash_index(&mut self, column: impl Into<String>) {
        let column = column.into();
        let collation = self.collation_of(&column);
        self.hash_indexes.push((column, Mutex::new(HashIndex::new(collation))));
    }

    pub fn add_btree_index(&mut self, column: impl Into<String>) {
        let column = column.into();
        let collation = self.collation_of(&column);
        self.btree_indexes
            .push((column, Mutex::new(BTreeIndex::new(collation, 64))));
    }

    pub fn index_kinds(&self) -> Vec<(String, IndexKind)> {
        let mut out = Vec::new();
        for (col, _) in &self.hash_indexes {
            out.push((col.clone(), IndexKind::Hash));
        }
        for (col, _) in &self.btree_indexes {
            out.push((col.clone(), IndexKind::BTree));
        }
        out
    }

    fn index_insert(&self, values: &[Value], rid: RowId) -> Result<()> {
        for (col, idx) in &self.hash_indexes {
            if let Some(i) = self.schema.column_index(col) {
                if self.batch.is_active() {
                    self.batch.defer_insert(col.as_str(), values[i].clone(), rid)?;
                } else {
                    idx.lock().unwrap().insert(&values[i], rid);
                }
            }
        }
        for (col, idx) in &self.btree_indexes {
            if let Some(i) = self.schema.column_index(col) {
                if self.batch.is_active() {
                    self.batch.defer_insert(col.as_str(), values[i].clone(), rid)?;
                } else {
                    idx.lock().unwrap().insert(&values[i], rid);
                }
            }
        }
        Ok(())
    }

    fn index_remove(&self, values: &[Value], rid: RowId) -> Result<()> {
        for (col, idx) in &self.hash_indexes {
            if let Some(i) = self.schema.column_index(col) {
                if self.batch.is_active() {
                    self.batch.defer_remove(col.as_str(), values[i].clone(), rid)?;
                } else {
                    idx.lock().unwrap().remove(&values[i], rid);
                }
            }
        }
        for (col, idx) in &self.btree_indexes {
            if let Some(i) = self.schema.column_index(col) {
                if self.batch.is_active() {
                    self.batch.defer_remove(col.as_str(), values[i].clone(), rid)?;
                } else {
                    idx.lock().unwrap().remove(&values[i], rid);
                }
            }
        }
        Ok(())
    }

    pub fn insert(
        &self,
        values: &[Value],
        txn_id: TxnId,
        wal: Option<&dyn WalAppender>,
    ) -> Result<RowId> {
        let rid = self.engine.insert(values, txn_id, wal)?;
        self.index_insert(values, rid)?;
        Ok(rid)
    }

    pub fn get(&self, rid: RowId) -> Result<Option<Vec<Value>>> {
        self.engine.get(rid)
    }

    pub fn update(
        &self,
        rid: RowId,
        values: &[Value],
        txn_id: TxnId,
        wal: Option<&dyn WalAppender>,
    ) -> Result<()> {
        let before = self.engine.get(rid)?;
        self.engine.update(rid, values, txn_id, wal)?;
        if let Some(before) = before {
            self.index_remove(&before, rid)?;
        }
        self.index_insert(values, rid)?;
        Ok(())
    }

    pub fn delete(&self, rid: RowId, txn_id: TxnId, wal: Option<&dyn WalAppender>) -> Result<()> {
        let before = self.engine.get(rid)?;
        self.engine.delete(rid, txn_id, wal)?;
        if let Some(before) = before {
            self.index_remove(&before, rid)?;
        }
        Ok(())
    }

    /// Flush deferred index ops and end the batch scope.
    pub fn end_batch(&self, wal: Option<&dyn WalAppender>) -> Result<Option<sharpcore_core::Lsn>> {
        let mut hash_guards: Vec<_> = self
            .hash_indexes
            .iter()
            .map(|(col, idx)| (col.as_str(), idx.lock().unwrap()))
            .collect();
        let mut btree_guards: Vec<_> = self
            .btree_indexes
            .iter()
            .map(|(col, idx)| (col.as_str(), idx.lock().unwrap()))
            .collect();
        let mut hash_slice: Vec<_> = hash_guards
            .iter_mut()
            .map(|(col, guard)| (*col, &mut **guard))
            .collect();
        let mut btree_slice: Vec<_> = btree_guards
            .iter_mut()
            .map(|(col, guard)| (*col, &mut **guard))
            .collect();
        self.batch.end(&mut hash_slice, &mut btree_slice, wal)
    }

    pub fn cancel_batch(&self, wal: Option<&dyn WalAppender>) -> Result<()> {
        self.batch.cancel(wal)
    }
}

impl std::fmt::Debug for TableRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRuntime")
            .field("table", &self.schema.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharpcore_core::{ColumnDef, ColumnType, EngineKind};
    use sharpcore_engine::InMemoryPageStore;

    fn widgets_runtime() -> TableRuntime {
        let schema = TableSchema::new(
            "widgets",
            vec![
                ColumnDef::new("id", ColumnType::Integer).not_null(),
                ColumnDef::new("label", ColumnType::Text),
            ],
            EngineKind::PageBased,
        )
        .with_primary_key(0)
        .unwrap();
        let store = InMemoryPageStore::new(4096);
        let engine = TableEngine::Paged(PagedHeapEngine::new(store, schema.clone(), 1));
        let mut runtime = TableRuntime::new(schema, engine);
        runtime.add_hash_index("label");
        runtime
    }

    #[test]
    fn insert_updates_hash_index_immediately_outside_a_batch() {
        let runtime = widgets_runtime();
        let rid = runtime
            .insert(&[Value::Integer(1), Value::Text("a".into())], 1, None)
            .unwrap();
        let (_, idx) = &runtime.hash_indexes[0];
        assert_eq!(idx.lock().unwrap().lookup(&Value::Text("a".into())), &[rid]);
    }

    #[test]
    fn batch_defers_index_writes_until_end() {
        let runtime = widgets_runtime();
        runtime.batch.begin(1, None).unwrap();
        let rid = runtime
            .insert(&[Value::Integer(1), Value::Text("a".into())], 1, None)
            .unwrap();
        {
            let (_, idx) = &runtime.hash_indexes[0];
            assert!(idx.lock().unwrap().lookup(&Value::Text("a".into())).is_empty());
        }
        runtime.end_batch(None).unwrap();
        let (_, idx) = &runtime.hash_indexes[0];
        assert_eq!(idx.lock().unwrap().lookup(&Value::Text("a".into())), &[rid]);
    }

    #[test]
    fn delete_removes_the_row_from_its_index() {
        let runtime = widgets_runtime();
        let rid = runtime
            .insert(&[Value::Integer(1), Value::Text("a".into())], 1, None)
            .unwrap();
        runtime.delete(rid, 1, None).unwrap();
        let (_, idx) = &runtime.hash_indexes[0];
        assert!(idx.lock().unwrap().lookup(&Value::Text("a".into())).is_empty());
    }

    #[test]
    fn multiple_indexes_on_different_columns_each_receive_only_their_own_column() {
        let mut runtime = widgets_runtime();
        runtime.add_btree_index("id");
        let rid = runtime
            .insert(&[Value::Integer(1), Value::Text("a".into())], 1, None)
            .unwrap();
        let (_, hash) = &runtime.hash_indexes[0];
        let (_, btree) = &runtime.btree_indexes[0];
        assert_eq!(hash.lock().unwrap().lookup(&Value::Text("a".into())), &[rid]);
        assert_eq!(btree.lock().unwrap().lookup(&Value::Integer(1)), &[rid]);
    }
}
