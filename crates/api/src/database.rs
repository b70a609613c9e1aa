//! The `Database` facade (§4.1): owns the file, the table catalog, and
//! every open table's engine + indexes, and drives the lifecycle state
//! machine through open/recover/close.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use sharpcore_core::{
    BlockName, CancellationToken, EngineKind, Error, Result, RowId, TableSchema, TxnId, Value,
};
use sharpcore_durability::wal::{CircularWal, GroupCommitter, WalOp};
use sharpcore_durability::{block_id_for, recover, MasterKey};
use sharpcore_engine::WalAppender;
use sharpcore_storage::{
    mirror_header, BlockEntry, BlockFlags, BlockRegistry, BlockType, EncryptionMode, FileHeader,
    FileStorageProvider, FreeSpaceMap, PageCache, Region, HEADER_SIZE,
};
use tracing::{info, warn};

use crate::catalog::{IndexKind, TableCatalog};
use crate::config::{SharpConfig, VacuumMode};
use crate::file_page_store::FilePageStore;
use crate::file_slot_io::FileSlotIo;
use crate::persistence;
use crate::stats::DatabaseStats;
use crate::state::StateMachine;
use crate::statement::{RowOp, Statement};
use crate::table_engine::{TableEngine, TableRuntime};

const SLOT_SIZE: u64 = 4096;

/// An open database file and every table it currently serves.
pub struct Database {
    state: StateMachine,
    config: SharpConfig,
    catalog: TableCatalog,
    tables: DashMap<String, TableRuntime>,
    provider: Arc<FileStorageProvider>,
    cache: Arc<PageCache>,
    registry: Arc<BlockRegistry>,
    fsm: Arc<Mutex<FreeSpaceMap>>,
    wal: Arc<CircularWal<FileSlotIo>>,
    master_key: Option<MasterKey>,
    /// Batches commit-path `fsync`s across concurrent committers
    /// (§4.6 group commit); dropping the last handle shuts its
    /// flusher thread down.
    group_committer: Arc<GroupCommitter>,
    next_txn: AtomicU64,
    /// Kept up to date for [`Self::checkpoint`] to rewrite the primary
    /// header and its backup mirror from (§7).
    header: Mutex<FileHeader>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

fn heap_block_id(name: &str) -> u64 {
    block_id_for(name)
}

fn start_group_committer(
    wal: &Arc<CircularWal<FileSlotIo>>,
    config: sharpcore_durability::wal::GroupCommitConfig,
) -> Arc<GroupCommitter> {
    let wal = wal.clone();
    let (committer, _handle) = GroupCommitter::start(config, move || wal.io().sync());
    committer
}

impl Database {
    /// Create a brand-new database file at `path`. `password` is
    /// ignored unless `config.encrypted` is set.
    pub fn create(path: &Path, config: SharpConfig, password: &str) -> Result<Self> {
        config.validate()?;
        let state = StateMachine::new();
        state.begin_open()?;

        let salt = {
            let mut s = [0u8; 16];
            let digest = sharpcore_storage::sha256(path.to_string_lossy().as_bytes());
            s.copy_from_slice(&digest[..16]);
            s
        };
        let encryption_mode = if config.encrypted {
            EncryptionMode::Aes256Gcm
        } else {
            EncryptionMode::None
        };
        let mut header = FileHeader::new(config.page_size, encryption_mode, salt);

        let page_size = config.page_size as u64;
        let wal_bytes = config.wal.wal_buffer_size;
        let wal_slots = wal_bytes / SLOT_SIZE;
        let header_pages = header.header_pages();
        let registry_pages =
            persistence::region_pages(persistence::REGISTRY_REGION_BYTES, config.page_size);
        let wal_page_len = persistence::region_pages(wal_bytes, config.page_size);
        let table_directory_pages = persistence::region_pages(
            persistence::TABLE_DIRECTORY_REGION_BYTES,
            config.page_size,
        );

        header.registry = Region {
            offset: header_pages * page_size,
            length: registry_pages * page_size,
        };
        header.wal.offset = header.registry.offset + header.registry.length;
        header.wal.length = wal_bytes;
        header.table_directory = Region {
            offset: header.wal.offset + wal_page_len * page_size,
            length: table_directory_pages * page_size,
        };

        let first_free = header_pages + registry_pages + wal_page_len + table_directory_pages;
        let initial_pages = first_free + config.pre_allocation_min_pages;

        let provider = Arc::new(FileStorageProvider::create(path, &header, initial_pages)?);
        let cache = Arc::new(PageCache::new(config.page_cache_capacity));
        let registry = Arc::new(BlockRegistry::new());
        let fsm = Arc::new(Mutex::new(FreeSpaceMap::new(initial_pages, first_free)));

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let slot_io = FileSlotIo::new(file, header.wal.offset, wal_slots);
        let wal = Arc::new(CircularWal::new(slot_io, wal_slots));

        let master_key = if config.encrypted {
            Some(MasterKey::derive(password, &header.salt))
        } else {
            None
        };
        let key_ref = master_key.as_ref().map(|k| (k, header.key_id));

        // An empty registry and catalog land immediately so a later
        // `open` always finds a well-formed frame in both regions,
        // even if this handle is dropped before its first checkpoint.
        persistence::save_registry(&provider, header.registry, &registry, 0, key_ref)?;
        persistence::save_catalog(
            &provider,
            header.table_directory,
            &TableCatalog::new(),
            0,
            key_ref,
        )?;
        provider.sync_all()?;

        let group_committer = start_group_committer(&wal, config.group_commit);

        state.finish_open();
        info!(path = %path.display(), "created database");

        Ok(Database {
            state,
            config,
            catalog: TableCatalog::new(),
            tables: DashMap::new(),
            provider,
            cache,
            registry,
            fsm,
            wal,
            master_key,
            group_committer,
            next_txn: AtomicU64::new(1),
            header: Mutex::new(header),
        })
    }

    /// Open an existing database file, replaying the WAL and rebuilding
    /// every table's row index before becoming available (§4.6
    /// "Recovery"). `password` is ignored unless the file's header
    /// declares itself encrypted.
    pub fn open(path: &Path, config: SharpConfig, password: &str) -> Result<Self> {
        config.validate()?;
        let state = StateMachine::new();
        state.begin_open()?;

        let (provider, header) = FileStorageProvider::open(path)?;
        let provider = Arc::new(provider);
        let cache = Arc::new(PageCache::new(config.page_cache_capacity));

        let header_is_encrypted = matches!(header.encryption_mode, EncryptionMode::Aes256Gcm);
        if config.encrypted != header_is_encrypted {
            return Err(Error::Corrupt(
                "config's `encrypted` flag doesn't match this file's encryption mode".into(),
            ));
        }

        let master_key = if config.encrypted {
            Some(MasterKey::derive(password, &header.salt))
        } else {
            None
        };
        let key_ref = master_key.as_ref().map(|k| (k, header.key_id));

        // The registry loads before the catalog, so a wrong password
        // surfaces here as `WrongPassword` (§4.1: "auth tag mismatch on
        // the registry block") rather than somewhere deeper in a
        // table's first page read.
        let registry = Arc::new(persistence::load_registry(&provider, header.registry, key_ref)?);
        let catalog = persistence::load_catalog(&provider, header.table_directory, key_ref)?;

        let first_data_page = (header.table_directory.offset + header.table_directory.length)
            / header.page_size as u64;
        let mut fsm = FreeSpaceMap::new(header.allocated_pages.max(first_data_page), first_data_page);
        for entry in registry.snapshot_entries() {
            fsm.reserve(entry.start_page, entry.length_pages);
        }
        let fsm = Arc::new(Mutex::new(fsm));

        let wal_slots = header.wal.length / SLOT_SIZE;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let slot_io = FileSlotIo::new(file, header.wal.offset, wal_slots);
        let wal = Arc::new(CircularWal::new(slot_io, wal_slots));

        state.begin_recovery();
        let plan = recover(&wal)?;
        if !plan.actions.is_empty() {
            warn!(steps = plan.actions.len(), "replaying uncheckpointed WAL entries");
            // Every action here is structural: the registry and table
            // directory are both durable as of the last checkpoint, and
            // each table's engine rebuilds its own row index from a
            // heap scan below. Rows written to an append-only or hybrid
            // front store after that checkpoint are the one gap this
            // doesn't close (see DESIGN.md).
        }

        let group_committer = start_group_committer(&wal, config.group_commit);

        state.finish_open();

        let db = Database {
            state,
            config,
            catalog,
            tables: DashMap::new(),
            provider,
            cache,
            registry,
            fsm,
            wal,
            master_key,
            group_committer,
            next_txn: AtomicU64::new(header.last_txn_id + 1),
            header: Mutex::new(header),
        };
        db.rebuild_tables()?;

        info!(path = %path.display(), "opened database");
        Ok(db)
    }

    /// Reconstruct every table's engine and secondary-index structure
    /// from the reloaded catalog. Paged and hybrid tables recover their
    /// row index from a heap scan; append-only tables start with an
    /// empty one (their on-disk record format doesn't carry the row id,
    /// so a scan can't recover it — see DESIGN.md).
    fn rebuild_tables(&self) -> Result<()> {
        for entry in self.catalog.snapshot() {
            let schema = entry.schema.clone();
            let block_id = heap_block_id(&entry.heap_block);
            let front_store = self.make_store(&entry.heap_block)?;

            let engine = match schema.engine {
                EngineKind::PageBased => {
                    let mut engine =
                        sharpcore_engine::PagedHeapEngine::new(front_store, schema.clone(), block_id);
                    engine.rebuild_from_scan()?;
                    TableEngine::Paged(engine)
                }
                EngineKind::AppendOnly => TableEngine::AppendOnly(
                    sharpcore_engine::AppendOnlyHeapEngine::new(front_store, schema.clone(), block_id),
                ),
                EngineKind::Hybrid => {
                    let back_block = entry
                        .back_block
                        .clone()
                        .expect("hybrid table entries always carry a back block");
                    let back_store = self.make_store(&back_block)?;
                    let mut engine = sharpcore_engine::HybridEngine::new(
                        front_store,
                        back_store,
                        schema.clone(),
                        block_id,
                    );
                    engine.rebuild_back_from_scan()?;
                    TableEngine::Hybrid(engine)
                }
            };

            let mut runtime = TableRuntime::new(schema, engine);
            for idx in &entry.indexes {
                match idx.kind {
                    IndexKind::Hash => runtime.add_hash_index(idx.column.clone()),
                    IndexKind::BTree => runtime.add_btree_index(idx.column.clone()),
                }
            }
            self.tables.insert(entry.schema.name.clone(), runtime);
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.state.begin_close()?;
        self.checkpoint()?;
        self.state.finish_close();
        Ok(())
    }

    /// Flush every dirty page, persist the registry and table catalog,
    /// reclaim checkpointed WAL slots, and rewrite the primary header
    /// plus its backup mirror (§4.6 step 5, §7). Safe to call while the
    /// database stays open; `close` also runs it on the way out.
    pub fn checkpoint(&self) -> Result<()> {
        self.cache.flush_all(&NullWriter)?;
        self.provider.flush_pending()?;

        let checkpoint_lsn = self.wal.header().last_checkpoint_lsn.max(
            self.wal
                .scan_live()?
                .iter()
                .map(|e| e.lsn)
                .max()
                .unwrap_or(0),
        );
        self.wal.checkpoint(checkpoint_lsn)?;

        let total_pages = self.fsm.lock().unwrap().total_pages();
        let mut header = self.header.lock().unwrap();
        header.last_txn_id = self.next_txn.load(Ordering::SeqCst).saturating_sub(1);
        header.last_checkpoint_lsn = checkpoint_lsn;
        header.allocated_pages = total_pages;

        let key_ref = self.master_key.as_ref().map(|k| (k, header.key_id));
        let generation = self.registry.generation();
        persistence::save_registry(
            &self.provider,
            header.registry,
            &self.registry,
            generation,
            key_ref,
        )?;
        persistence::save_catalog(
            &self.provider,
            header.table_directory,
            &self.catalog,
            generation,
            key_ref,
        )?;

        self.provider.write_page_sync(0, &{
            let mut page = sharpcore_storage::Page::new(self.config.page_size);
            let bytes = header.to_bytes();
            page.data[..HEADER_SIZE].copy_from_slice(&bytes);
            page
        })?;
        mirror_header(&self.provider, &header, total_pages)?;
        self.provider.sync_all()?;
        Ok(())
    }

    fn next_txn_id(&self) -> TxnId {
        self.next_txn.fetch_add(1, Ordering::SeqCst)
    }

    fn wal_appender(&self) -> Option<&dyn WalAppender> {
        Some(self.wal.as_ref() as &dyn WalAppender)
    }

    fn alloc_block(&self, name: &str, block_type: BlockType, initial_pages: u64) -> Result<()> {
        let block_name = BlockName::new(name)?;
        let mut fsm = self.fsm.lock().unwrap();
        let start = fsm.allocate(initial_pages, self.config.extent_allocation_strategy)?;
        self.registry.put(BlockEntry {
            name: block_name,
            block_type,
            start_page: start,
            length_pages: initial_pages,
            checksum: [0u8; 32],
            flags: BlockFlags::empty(),
            generation: 0,
        });
        Ok(())
    }

    fn make_store(&self, block: &str) -> Result<FilePageStore> {
        let crypto = self
            .master_key
            .clone()
            .map(|key| (key, self.header.lock().unwrap().key_id));
        FilePageStore::with_crypto(
            self.provider.clone(),
            self.cache.clone(),
            self.registry.clone(),
            self.fsm.clone(),
            block,
            crypto,
        )
    }

    /// Declare a new table and allocate its storage.
    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        self.state.require_open()?;
        if self.config.read_only {
            return Err(Error::ReadOnly);
        }
        let name = schema.name.clone();
        let engine_kind = schema.engine;
        self.catalog.create_table(schema.clone())?;
        let entry = self.catalog.get(&name)?;

        self.alloc_block(&entry.heap_block, BlockType::Heap, 4)?;
        let front_store = self.make_store(&entry.heap_block)?;
        let block_id = heap_block_id(&entry.heap_block);

        let engine = match engine_kind {
            EngineKind::PageBased => {
                TableEngine::Paged(sharpcore_engine::PagedHeapEngine::new(
                    front_store,
                    schema.clone(),
                    block_id,
                ))
            }
            EngineKind::AppendOnly => {
                TableEngine::AppendOnly(sharpcore_engine::AppendOnlyHeapEngine::new(
                    front_store,
                    schema.clone(),
                    block_id,
                ))
            }
            EngineKind::Hybrid => {
                let back_block = entry.back_block.clone().expect("hybrid table has a back block");
                self.alloc_block(&back_block, BlockType::Heap, 4)?;
                let back_store = self.make_store(&back_block)?;
                TableEngine::Hybrid(sharpcore_engine::HybridEngine::new(
                    front_store,
                    back_store,
                    schema.clone(),
                    block_id,
                ))
            }
        };

        self.tables.insert(name, TableRuntime::new(schema, engine));
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.state.require_open()?;
        self.catalog.drop_table(name)?;
        self.tables.remove(name);
        Ok(())
    }

    /// Add a secondary index on `column`, rebuilt from a full scan of
    /// the table's current rows (indexes are not persisted; §4.10).
    pub fn create_index(&self, table: &str, column: &str, kind: IndexKind) -> Result<()> {
        self.state.require_open()?;
        self.catalog.add_index(table, column, kind)?;
        let mut runtime = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("table {table:?}")))?;
        match kind {
            IndexKind::Hash => runtime.add_hash_index(column),
            IndexKind::BTree => runtime.add_btree_index(column),
        }
        Ok(())
    }

    fn runtime(&self, table: &str) -> Result<dashmap::mapref::one::Ref<'_, String, TableRuntime>> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::NotFound(format!("table {table:?}")))
    }

    pub fn insert(&self, table: &str, values: Vec<Value>) -> Result<RowId> {
        self.state.require_open()?;
        if self.config.read_only {
            return Err(Error::ReadOnly);
        }
        let runtime = self.runtime(table)?;
        let batch_txn = runtime.batch.active_txn();
        let txn_id = batch_txn.unwrap_or_else(|| self.next_txn_id());
        let rid = runtime.insert(&values, txn_id, self.wal_appender())?;
        if batch_txn.is_some() {
            return Ok(rid);
        }
        self.wal
            .append_write(WalOp::Commit, txn_id, 0, 0, b"", b"")?;
        self.group_committer.commit()?;
        Ok(rid)
    }

    pub fn get(&self, table: &str, rid: RowId) -> Result<Option<Vec<Value>>> {
        self.state.require_open()?;
        self.runtime(table)?.get(rid)
    }

    pub fn update(&self, table: &str, rid: RowId, values: Vec<Value>) -> Result<()> {
        self.state.require_open()?;
        if self.config.read_only {
            return Err(Error::ReadOnly);
        }
        let runtime = self.runtime(table)?;
        let batch_txn = runtime.batch.active_txn();
        let txn_id = batch_txn.unwrap_or_else(|| self.next_txn_id());
        runtime.update(rid, &values, txn_id, self.wal_appender())?;
        if batch_txn.is_none() {
            self.wal
                .append_write(WalOp::Commit, txn_id, 0, 0, b"", b"")?;
            self.group_committer.commit()?;
        }
        Ok(())
    }

    pub fn delete(&self, table: &str, rid: RowId) -> Result<()> {
        self.state.require_open()?;
        if self.config.read_only {
            return Err(Error::ReadOnly);
        }
        let runtime = self.runtime(table)?;
        let batch_txn = runtime.batch.active_txn();
        let txn_id = batch_txn.unwrap_or_else(|| self.next_txn_id());
        runtime.delete(rid, txn_id, self.wal_appender())?;
        if batch_txn.is_none() {
            self.wal
                .append_write(WalOp::Commit, txn_id, 0, 0, b"", b"")?;
            self.group_committer.commit()?;
        }
        Ok(())
    }

    /// Apply a pre-planned statement (§1: parsing/planning is an
    /// external collaborator's job, this is where its output lands).
    pub fn execute(&self, stmt: &dyn Statement) -> Result<Option<RowId>> {
        match stmt.op() {
            RowOp::Insert(values) => self.insert(stmt.table(), values).map(Some),
            RowOp::Update { rid, values } => {
                self.update(stmt.table(), rid, values)?;
                Ok(None)
            }
            RowOp::Delete { rid } => {
                self.delete(stmt.table(), rid)?;
                Ok(None)
            }
        }
    }

    /// Run a batch of statements inside one open batch-update scope
    /// per table touched, honoring `token` between statements.
    pub fn execute_batch(
        &self,
        table: &str,
        statements: &[Box<dyn Statement>],
        token: Option<&CancellationToken>,
    ) -> Result<Vec<Option<RowId>>> {
        self.begin_batch_update(table)?;
        let mut out = Vec::with_capacity(statements.len());
        for stmt in statements {
            if let Some(token) = token {
                if let Err(e) = token.check() {
                    self.cancel_batch_update(table)?;
                    return Err(e);
                }
            }
            match self.execute(stmt.as_ref()) {
                Ok(rid) => out.push(rid),
                Err(e) => {
                    self.cancel_batch_update(table)?;
                    return Err(e);
                }
            }
        }
        self.end_batch_update(table)?;
        Ok(out)
    }

    pub fn begin_batch_update(&self, table: &str) -> Result<()> {
        self.state.require_open()?;
        let runtime = self.runtime(table)?;
        let txn_id = self.next_txn_id();
        runtime.batch.begin(txn_id, self.wal_appender())
    }

    pub fn end_batch_update(&self, table: &str) -> Result<()> {
        let lsn = self.runtime(table)?.end_batch(self.wal_appender())?;
        if lsn.is_some() {
            self.group_committer.commit()?;
        }
        Ok(())
    }

    pub fn cancel_batch_update(&self, table: &str) -> Result<()> {
        self.runtime(table)?.cancel_batch(self.wal_appender())
    }

    /// Reclaim space. Hybrid tables drain their front store into the
    /// back store; append-only tables rewrite their live rows into a
    /// fresh block and swap it in via the registry; page-based tables
    /// already reclaim tombstoned slots on the next insert, so this is
    /// a no-op for them under `Incremental` mode. Returns the number of
    /// rows the call touched (compacted, or left live after rewriting).
    pub fn vacuum(&self, table: &str, token: Option<&CancellationToken>) -> Result<usize> {
        self.state.require_open()?;
        if let Some(token) = token {
            token.check()?;
        }
        let budget = match self.config.vacuum_mode {
            VacuumMode::Incremental => 64 * 1024,
            VacuumMode::Full => usize::MAX,
        };
        let mut runtime = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("table {table:?}")))?;
        match &mut runtime.engine {
            TableEngine::Hybrid(engine) => {
                let txn_id = self.next_txn_id();
                engine.compact_cycle(budget, txn_id, self.wal_appender())
            }
            TableEngine::Paged(_) => Ok(0),
            TableEngine::AppendOnly(engine) => {
                let old_name = self.catalog.get(table)?.heap_block;
                let old_entry = self.registry.remove(&old_name).ok_or_else(|| {
                    Error::NotFound(format!("block {old_name:?} not registered"))
                })?;
                self.fsm
                    .lock()
                    .unwrap()
                    .free(old_entry.start_page, old_entry.length_pages);
                self.alloc_block(&old_name, BlockType::Heap, 4)?;
                let fresh_store = self.make_store(&old_name)?;
                engine.vacuum(fresh_store)?;
                self.catalog.set_heap_block(table, old_name)?;
                Ok(engine.live_row_count())
            }
        }
    }

    /// Encode an append-only table's live rows into per-column segments
    /// (§4.11's columnar promotion path). Only valid for tables declared
    /// `EngineKind::AppendOnly`.
    pub fn columnar_snapshot(
        &self,
        table: &str,
    ) -> Result<Vec<sharpcore_storage::codec::ColumnSegment>> {
        self.state.require_open()?;
        match &self.runtime(table)?.engine {
            TableEngine::AppendOnly(engine) => engine.columnar_snapshot(),
            _ => Err(Error::InvalidArgument(format!(
                "table {table:?} is not append-only; columnar snapshots only apply to append-only heaps"
            ))),
        }
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats::from_file_stats(
            Default::default(),
            self.catalog.table_count(),
            self.cache.len(),
        )
    }

    pub fn table_names(&self) -> Vec<String> {
        self.catalog.table_names()
    }
}

/// A writer used only to flush the cache on close, where every page is
/// already queued through its owning [`FilePageStore`]; nothing here
/// needs to redo that routing.
struct NullWriter;

impl sharpcore_storage::PageWriter for NullWriter {
    fn write_page(&self, _block: &str, _page_id: sharpcore_core::PageId, _page: &sharpcore_storage::Page) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharpcore_core::{ColumnDef, ColumnType};
    use tempfile::tempdir;

    fn widgets_schema() -> TableSchema {
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

    #[test]
    fn create_open_table_insert_and_get_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("widgets.scdb");
        let db = Database::create(&path, SharpConfig::new(), "").unwrap();
        db.create_table(widgets_schema()).unwrap();
        let rid = db
            .insert("widgets", vec![Value::Integer(1), Value::Text("a".into())])
            .unwrap();
        let row = db.get("widgets", rid).unwrap().unwrap();
        assert_eq!(row[0], Value::Integer(1));
        db.close().unwrap();
    }

    #[test]
    fn read_only_config_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.scdb");
        let db = Database::create(&path, SharpConfig::new().with_read_only(true), "").unwrap();
        db.create_table(widgets_schema()).unwrap();
        assert!(db
            .insert("widgets", vec![Value::Integer(1), Value::Text("a".into())])
            .is_err());
    }

    #[test]
    fn checkpoint_rewrites_primary_header_and_its_mirror() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.scdb");
        let db = Database::create(&path, SharpConfig::new(), "").unwrap();
        db.create_table(widgets_schema()).unwrap();
        db.insert("widgets", vec![Value::Integer(1), Value::Text("a".into())])
            .unwrap();
        db.checkpoint().unwrap();

        let total_pages = db.fsm.lock().unwrap().total_pages();
        let mirrored = sharpcore_storage::read_mirror(&db.provider, total_pages).unwrap();
        let primary = db.header.lock().unwrap().clone();
        assert_eq!(mirrored, primary);
    }

    #[test]
    fn reopen_falls_back_to_header_mirror_when_primary_is_torn() {
        use std::fs::OpenOptions;
        use std::io::{Seek, SeekFrom, Write};

        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.scdb");
        let db = Database::create(&path, SharpConfig::new(), "").unwrap();
        db.create_table(widgets_schema()).unwrap();
        let rid = db
            .insert("widgets", vec![Value::Integer(1), Value::Text("a".into())])
            .unwrap();
        db.checkpoint().unwrap();
        drop(db);

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&[0xFFu8; 64]).unwrap();
        file.sync_all().unwrap();
        drop(file);

        let db = Database::open(&path, SharpConfig::new(), "").unwrap();
        assert_eq!(db.table_names(), vec!["widgets".to_string()]);
        let row = db.get("widgets", rid).unwrap().unwrap();
        assert_eq!(row[0], Value::Integer(1));
    }

    #[test]
    fn batch_update_defers_until_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.scdb");
        let db = Database::create(&path, SharpConfig::new(), "").unwrap();
        db.create_table(widgets_schema()).unwrap();
        db.create_index("widgets", "label", IndexKind::Hash).unwrap();
        db.begin_batch_update("widgets").unwrap();
        db.insert("widgets", vec![Value::Integer(1), Value::Text("a".into())])
            .unwrap();
        db.end_batch_update("widgets").unwrap();
    }

    #[test]
    fn reopen_restores_tables_and_rows_from_the_catalog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.scdb");
        let db = Database::create(&path, SharpConfig::new(), "").unwrap();
        db.create_table(widgets_schema()).unwrap();
        let rid = db
            .insert("widgets", vec![Value::Integer(7), Value::Text("b".into())])
            .unwrap();
        db.close().unwrap();
        drop(db);

        let reopened = Database::open(&path, SharpConfig::new(), "").unwrap();
        assert_eq!(reopened.table_names(), vec!["widgets".to_string()]);
        let row = reopened.get("widgets", rid).unwrap().unwrap();
        assert_eq!(row[0], Value::Integer(7));
    }

    #[test]
    fn encrypted_database_round_trips_with_correct_password_and_rejects_wrong_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.scdb");
        let config = SharpConfig::new().with_encrypted(true);

        let db = Database::create(&path, config.clone(), "p").unwrap();
        db.create_table(widgets_schema()).unwrap();
        db.insert("widgets", vec![Value::Integer(1), Value::Text("a".into())])
            .unwrap();
        db.close().unwrap();
        drop(db);

        let reopened = Database::open(&path, config.clone(), "p").unwrap();
        assert_eq!(reopened.table_names(), vec!["widgets".to_string()]);
        assert_eq!(
            reopened.get("widgets", 0).unwrap().unwrap()[0],
            Value::Integer(1)
        );
        drop(reopened);

        let err = Database::open(&path, config, "q").unwrap_err();
        assert!(matches!(err, Error::WrongPassword));
    }

    #[test]
    fn encryption_mode_mismatch_against_the_header_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mismatch.scdb");
        Database::create(&path, SharpConfig::new().with_encrypted(true), "p")
            .unwrap()
            .close()
            .unwrap();

        let err = Database::open(&path, SharpConfig::new(), "").unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn vacuuming_an_append_only_table_drops_dead_versions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("append.scdb");
        let db = Database::create(&path, SharpConfig::new(), "").unwrap();
        db.create_table(TableSchema::new(
            "events",
            vec![ColumnDef::new("payload", ColumnType::Text)],
            EngineKind::AppendOnly,
        ))
        .unwrap();

        let rid = db.insert("events", vec![Value::Text("keep".into())]).unwrap();
        db.update("events", rid, vec![Value::Text("keep-v2".into())])
            .unwrap();
        let gone = db.insert("events", vec![Value::Text("gone".into())]).unwrap();
        db.delete("events", gone).unwrap();

        let live = db.vacuum("events", None).unwrap();
        assert_eq!(live, 1);
        assert_eq!(
            db.get("events", rid).unwrap().unwrap()[0],
            Value::Text("keep-v2".into())
        );
        assert_eq!(db.get("events", gone).unwrap(), None);
    }
}
