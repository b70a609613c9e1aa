//! Batch-update scope (spec §4.10's tail, §5 "Transaction discipline"):
//! every mutating statement is its own transaction unless wrapped in
//! `begin_batch_update`/`end_batch_update`, which defers index
//! maintenance to the end of the batch and gives bulk loads a single
//! rollback point. Scopes are single-writer and cannot nest; row
//! writes made during the batch carry the batch's txn id so
//! [`sharpcore_durability::recovery::recover`]'s group-by-txn-id replay
//! applies or undoes the whole batch atomically.

use std::mem;
use std::sync::Mutex;

use sharpcore_core::{Error, Lsn, Result, RowId, TxnId, Value};
use sharpcore_durability::wal::WalOp;

use crate::btree_index::BTreeIndex;
use crate::hash_index::HashIndex;
use crate::wal_support::WalAppender;

enum DeferredOp {
    Insert(String, Value, RowId),
    Remove(String, Value, RowId),
}

/// The single in-flight batch scope for one table's indexes.
pub struct BatchUpdateScope {
    active_txn: Mutex<Option<TxnId>>,
    pending: Mutex<Vec<DeferredOp>>,
}

impl Default for BatchUpdateScope {
    fn default() -> Self {
        BatchUpdateScope {
            active_txn: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }
}

impl BatchUpdateScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active_txn.lock().unwrap().is_some()
    }

    /// The batch's own txn id, if one is open. Row writes made while a
    /// batch is active must carry this id rather than a fresh one, so
    /// recovery's group-by-txn-id replay sees the whole batch under one
    /// `Begin`/`Commit` pair.
    pub fn active_txn(&self) -> Option<TxnId> {
        *self.active_txn.lock().unwrap()
    }

    /// Open the scope under `txn_id`. Fails with `Busy` if a batch is
    /// already open on this table — scopes are single-writer and
    /// nested batches are forbidden.
    pub fn begin(&self, txn_id: TxnId, wal: Option<&dyn WalAppender>) -> Result<()> {
        let mut active = self.active_txn.lock().unwrap();
        if active.is_some() {
            return Err(Error::Busy(
                "a batch update is already in progress on this table".into(),
            ));
        }
        *active = Some(txn_id);
        if let Some(wal) = wal {
            wal.append_write(WalOp::Begin, txn_id, 0, 0, b"", b"")?;
        }
        Ok(())
    }

    fn require_active_txn(&self) -> Result<TxnId> {
        self.active_txn
            .lock()
            .unwrap()
            .ok_or_else(|| Error::InvalidArgument("no batch update in progress".into()))
    }

    /// Queue an index insert instead of applying it immediately. The
    /// row itself must already have been written (with the batch's
    /// txn id) before calling this. `column` is the schema column the
    /// value came from, so [`Self::end`] applies it only to indexes on
    /// that column.
    pub fn defer_insert(&self, column: impl Into<String>, value: Value, rid: RowId) -> Result<()> {
        self.require_active_txn()?;
        self.pending
            .lock()
            .unwrap()
            .push(DeferredOp::Insert(column.into(), value, rid));
        Ok(())
    }

    pub fn defer_remove(&self, column: impl Into<String>, value: Value, rid: RowId) -> Result<()> {
        self.require_active_txn()?;
        self.pending
            .lock()
            .unwrap()
            .push(DeferredOp::Remove(column.into(), value, rid));
        Ok(())
    }

    /// Flush every deferred index mutation, commit the WAL scope, and
    /// release the single-writer slot. A table may carry any number of
    /// hash and btree indexes; each deferred op applies only to the
    /// index(es) declared on its column.
    pub fn end(
        &self,
        hash: &mut [(&str, &mut HashIndex)],
        btree: &mut [(&str, &mut BTreeIndex)],
        wal: Option<&dyn WalAppender>,
    ) -> Result<Option<Lsn>> {
        let txn_id = self
            .active_txn
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::InvalidArgument("no batch update in progress".into()))?;

        for op in mem::take(&mut *self.pending.lock().unwrap()) {
            match op {
                DeferredOp::Insert(column, value, rid) => {
                    for (col, idx) in hash.iter_mut() {
                        if *col == column {
                            idx.insert(&value, rid);
                        }
                    }
                    for (col, idx) in btree.iter_mut() {
                        if *col == column {
                            idx.insert(&value, rid);
                        }
                    }
                }
                DeferredOp::Remove(column, value, rid) => {
                    for (col, idx) in hash.iter_mut() {
                        if *col == column {
                            idx.remove(&value, rid);
                        }
                    }
                    for (col, idx) in btree.iter_mut() {
                        if *col == column {
                            idx.remove(&value, rid);
                        }
                    }
                }
            }
        }

        match wal {
            Some(wal) => Ok(Some(wal.append_write(WalOp::Commit, txn_id, 0, 0, b"", b"")?)),
            None => Ok(None),
        }
    }

    /// Discard every deferred index mutation and write an abort record
    /// so recovery skips the whole batch's row writes too.
    pub fn cancel(&self, wal: Option<&dyn WalAppender>) -> Result<()> {
        let txn_id = self
            .active_txn
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::InvalidArgument("no batch update in progress".into()))?;
        self.pending.lock().unwrap().clear();
        if let Some(wal) = wal {
            wal.append_write(WalOp::Abort, txn_id, 0, 0, b"", b"")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharpcore_core::Collation;

    #[test]
    fn nested_batch_is_rejected_with_busy() {
        let scope = BatchUpdateScope::new();
        scope.begin(1, None).unwrap();
        assert!(matches!(scope.begin(2, None), Err(Error::Busy(_))));
    }

    #[test]
    fn deferred_inserts_apply_to_indexes_on_end() {
        let scope = BatchUpdateScope::new();
        scope.begin(1, None).unwrap();
        scope.defer_insert("name", Value::Integer(1), 100).unwrap();
        scope.defer_insert("name", Value::Integer(2), 101).unwrap();

        let mut hash = HashIndex::new(Collation::Binary);
        scope.end(&mut [("name", &mut hash)], &mut [], None).unwrap();

        assert_eq!(hash.lookup(&Value::Integer(1)), &[100]);
        assert_eq!(hash.lookup(&Value::Integer(2)), &[101]);
        assert!(!scope.is_active());
    }

    #[test]
    fn deferred_ops_skip_indexes_on_other_columns() {
        let scope = BatchUpdateScope::new();
        scope.begin(1, None).unwrap();
        scope.defer_insert("name", Value::Integer(1), 100).unwrap();

        let mut name_hash = HashIndex::new(Collation::Binary);
        let mut age_hash = HashIndex::new(Collation::Binary);
        scope
            .end(
                &mut [("name", &mut name_hash), ("age", &mut age_hash)],
                &mut [],
                None,
            )
            .unwrap();

        assert_eq!(name_hash.lookup(&Value::Integer(1)), &[100]);
        assert!(age_hash.lookup(&Value::Integer(1)).is_empty());
    }

    #[test]
    fn cancel_discards_deferred_work_and_frees_the_slot() {
        let scope = BatchUpdateScope::new();
        scope.begin(1, None).unwrap();
        scope.defer_insert("name", Value::Integer(1), 100).unwrap();
        scope.cancel(None).unwrap();

        let mut hash = HashIndex::new(Collation::Binary);
        scope.begin(2, None).unwrap();
        scope.end(&mut [("name", &mut hash)], &mut [], None).unwrap();
        assert!(hash.lookup(&Value::Integer(1)).is_empty());
    }

    #[test]
    fn deferring_without_an_open_batch_is_rejected() {
        let scope = BatchUpdateScope::new();
        assert!(scope.defer_insert("name", Value::Integer(1), 1).is_err());
    }

    #[test]
    fn end_without_an_open_batch_is_rejected() {
        let scope = BatchUpdateScope::new();
        assert!(scope.end(&mut [], &mut [], None).is_err());
    }
}
