//! On-disk persistence for the block registry and the table catalog
//! (§4.2, §4.1 "Owns the table catalog"). Both live in fixed-size
//! regions carved out of the file at create time (`FileHeader::registry`
//! and `FileHeader::table_directory`) and are rewritten in full on every
//! checkpoint — there is no incremental update path, the same way the
//! registry's own background flush rewrites its whole snapshot rather
//! than diffing entries.
//!
//! Each region holds one self-describing frame:
//! `[generation:8 LE][payload_len:8 LE][payload]`. When the database is
//! encrypted, `payload` is itself a sealed envelope
//! (`sharpcore_durability::seal_block`) keyed off a synthetic block id
//! derived from a fixed name, since neither region is a block the
//! registry itself knows about.

use sharpcore_core::{Error, Result};
use sharpcore_durability::{block_id_for, open_block, seal_block, MasterKey};
use sharpcore_storage::{BlockEntry, BlockRegistry, FileStorageProvider, Region};

use crate::catalog::{TableCatalog, TableEntry};

const FRAME_HEADER_LEN: usize = 16;
const REGISTRY_SYNTHETIC_BLOCK: &str = "__registry__";
const TABLE_DIRECTORY_SYNTHETIC_BLOCK: &str = "__table_directory__";

/// Fixed size of the registry region `Database::create` carves out of
/// the file. Generous enough for thousands of block descriptors plus
/// the frame header and, when encrypted, the crypto envelope overhead.
pub const REGISTRY_REGION_BYTES: u64 = 64 * 1024;
/// Fixed size of the table directory region. A table entry's schema
/// dominates its size; this comfortably holds hundreds of tables.
pub const TABLE_DIRECTORY_REGION_BYTES: u64 = 256 * 1024;

/// Round `bytes` up to a whole number of `page_size`-sized pages.
pub fn region_pages(bytes: u64, page_size: u32) -> u64 {
    (bytes + page_size as u64 - 1) / page_size as u64
}

fn write_blob(
    provider: &FileStorageProvider,
    region: Region,
    generation: u64,
    key: Option<(&MasterKey, u64)>,
    synthetic_block: &str,
    payload: &[u8],
) -> Result<()> {
    let body = match key {
        Some((master_key, key_id)) => seal_block(
            master_key,
            key_id,
            block_id_for(synthetic_block),
            generation,
            0,
            payload,
        ),
        None => payload.to_vec(),
    };
    let framed_len = FRAME_HEADER_LEN + body.len();
    if framed_len as u64 > region.length {
        return Err(Error::OutOfSpace(format!(
            "{synthetic_block} blob of {framed_len} bytes exceeds its {}-byte region",
            region.length
        )));
    }
    let mut framed = Vec::with_capacity(framed_len);
    framed.extend_from_slice(&generation.to_le_bytes());
    framed.extend_from_slice(&(body.len() as u64).to_le_bytes());
    framed.extend_from_slice(&body);
    provider.write_raw(region.offset, &framed)
}

fn read_blob(
    provider: &FileStorageProvider,
    region: Region,
    key: Option<(&MasterKey, u64)>,
    synthetic_block: &str,
) -> Result<Vec<u8>> {
    let framed = provider.read_raw(region.offset, region.length as usize)?;
    if framed.len() < FRAME_HEADER_LEN {
        return Err(Error::Corrupt(format!(
            "{synthetic_block} blob shorter than its frame header"
        )));
    }
    let generation = u64::from_le_bytes(framed[0..8].try_into().unwrap());
    let body_len = u64::from_le_bytes(framed[8..16].try_into().unwrap()) as usize;
    let body = framed.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + body_len).ok_or_else(|| {
        Error::Corrupt(format!(
            "{synthetic_block} blob shorter than its declared payload length"
        ))
    })?;
    match key {
        Some((master_key, key_id)) => open_block(
            master_key,
            key_id,
            block_id_for(synthetic_block),
            0,
            body,
        )
        .map_err(|e| match e {
            Error::TamperDetected(_) => Error::WrongPassword,
            other => other,
        }),
        None => {
            let _ = generation;
            Ok(body.to_vec())
        }
    }
}

/// Serialize every block descriptor into the registry region. Called at
/// the end of `Database::create` (with an empty registry) and on every
/// checkpoint thereafter.
pub fn save_registry(
    provider: &FileStorageProvider,
    region: Region,
    registry: &BlockRegistry,
    generation: u64,
    key: Option<(&MasterKey, u64)>,
) -> Result<()> {
    let entries = registry.snapshot_entries();
    let payload = bincode::serialize(&entries)
        .map_err(|e| Error::Corrupt(format!("failed to serialize block registry: {e}")))?;
    write_blob(
        provider,
        region,
        generation,
        key,
        REGISTRY_SYNTHETIC_BLOCK,
        &payload,
    )?;
    registry.mark_clean();
    Ok(())
}

/// Rebuild the in-memory registry from its persisted region, used once
/// on `Database::open` before any block is looked up.
pub fn load_registry(
    provider: &FileStorageProvider,
    region: Region,
    key: Option<(&MasterKey, u64)>,
) -> Result<BlockRegistry> {
    let payload = read_blob(provider, region, key, REGISTRY_SYNTHETIC_BLOCK)?;
    if payload.is_empty() {
        return Ok(BlockRegistry::new());
    }
    let entries: Vec<BlockEntry> = bincode::deserialize(&payload)
        .map_err(|e| Error::Corrupt(format!("failed to deserialize block registry: {e}")))?;
    Ok(BlockRegistry::from_entries(entries))
}

/// Serialize every table entry into the table directory region.
pub fn save_catalog(
    provider: &FileStorageProvider,
    region: Region,
    catalog: &TableCatalog,
    generation: u64,
    key: Option<(&MasterKey, u64)>,
) -> Result<()> {
    let entries = catalog.snapshot();
    let payload = bincode::serialize(&entries)
        .map_err(|e| Error::Corrupt(format!("failed to serialize table catalog: {e}")))?;
    write_blob(
        provider,
        region,
        generation,
        key,
        TABLE_DIRECTORY_SYNTHETIC_BLOCK,
        &payload,
    )
}

/// Rebuild the table catalog from its persisted region, used once on
/// `Database::open`. Callers still need to rebuild each table's engine
/// row index from a heap scan; this only restores the name -> schema +
/// block-name mapping.
pub fn load_catalog(
    provider: &FileStorageProvider,
    region: Region,
    key: Option<(&MasterKey, u64)>,
) -> Result<TableCatalog> {
    let payload = read_blob(provider, region, key, TABLE_DIRECTORY_SYNTHETIC_BLOCK)?;
    if payload.is_empty() {
        return Ok(TableCatalog::new());
    }
    let entries: Vec<TableEntry> = bincode::deserialize(&payload)
        .map_err(|e| Error::Corrupt(format!("failed to deserialize table catalog: {e}")))?;
    Ok(TableCatalog::from_entries(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharpcore_core::{ColumnDef, ColumnType, EngineKind, TableSchema};
    use sharpcore_storage::{EncryptionMode, FileHeader};
    use tempfile::tempdir;

    fn provider_with_region(dir: &tempfile::TempDir, region_len: u64) -> (FileStorageProvider, Region) {
        let path = dir.path().join("test.scdb");
        let header = FileHeader::new(4096, EncryptionMode::None, [0u8; 16]);
        let provider = FileStorageProvider::create(&path, &header, 16).unwrap();
        (provider, Region { offset: 4096, length: region_len })
    }

    #[test]
    fn empty_registry_round_trips_without_encryption() {
        let dir = tempdir().unwrap();
        let (provider, region) = provider_with_region(&dir, 4096);
        let registry = BlockRegistry::new();
        save_registry(&provider, region, &registry, 1, None).unwrap();
        let reloaded = load_registry(&provider, region, None).unwrap();
        assert!(reloaded.list("").is_empty());
    }

    #[test]
    fn catalog_round_trips_with_encryption() {
        let dir = tempdir().unwrap();
        let (provider, region) = provider_with_region(&dir, 4096);
        let catalog = TableCatalog::new();
        catalog
            .create_table(
                TableSchema::new(
                    "widgets",
                    vec![ColumnDef::new("id", ColumnType::Integer).not_null()],
                    EngineKind::PageBased,
                )
                .with_primary_key(0)
                .unwrap(),
            )
            .unwrap();

        let key = MasterKey::derive("hunter2", &[7u8; 16]);
        save_catalog(&provider, region, &catalog, 1, Some((&key, 1))).unwrap();

        let reloaded = load_catalog(&provider, region, Some((&key, 1))).unwrap();
        assert!(reloaded.contains("widgets"));

        let wrong_key = MasterKey::derive("wrong", &[7u8; 16]);
        assert!(matches!(
            load_catalog(&provider, region, Some((&wrong_key, 1))),
            Err(Error::WrongPassword)
        ));
    }

    #[test]
    fn blob_larger_than_region_is_rejected() {
        let dir = tempdir().unwrap();
        let (provider, region) = provider_with_region(&dir, 32);
        let catalog = TableCatalog::new();
        for i in 0..10 {
            catalog
                .create_table(
                    TableSchema::new(
                        format!("table_{i}"),
                        vec![ColumnDef::new("id", ColumnType::Integer).not_null()],
                        EngineKind::PageBased,
                    )
                    .with_primary_key(0)
                    .unwrap(),
                )
                .unwrap();
        }
        assert!(save_catalog(&provider, region, &catalog, 1, None).is_err());
    }
}
