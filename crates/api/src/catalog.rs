//! The table catalog: table name to schema, plus the block names each
//! table's heap and secondary indexes live in (§4.1 "Owns the table
//! catalog (name -> schema + block names)...").

use dashmap::DashMap;
use sharpcore_core::{Error, Result, TableSchema};

/// Which in-memory secondary index structure backs an indexed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IndexKind {
    Hash,
    BTree,
}

/// One indexed column: which structure, and which block its heap-scan
/// rebuild (indexes are not persisted; see [`TableEntry`]) draws from.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IndexEntry {
    pub column: String,
    pub kind: IndexKind,
}

/// Everything the catalog knows about one table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TableEntry {
    pub schema: TableSchema,
    /// Name of the block holding this table's heap (front block, for
    /// hybrid tables).
    pub heap_block: String,
    /// Name of the back-store block, only populated for hybrid tables.
    pub back_block: Option<String>,
    pub indexes: Vec<IndexEntry>,
}

impl TableEntry {
    fn block_name_for(table: &str) -> String {
        format!("heap:{table}")
    }

    fn back_block_name_for(table: &str) -> String {
        format!("back:{table}")
    }
}

/// Name -> [`TableEntry`] map, safe to share across threads without an
/// outer lock (mirrors the rest of the facade's `DashMap`-backed state).
#[derive(Default)]
pub struct TableCatalog {
    tables: DashMap<String, TableEntry>,
}

impl TableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new table, deriving its block names from its name.
    /// Secondary indexes start empty; callers add them with
    /// [`TableCatalog::add_index`] once the index structure exists.
    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        if self.tables.contains_key(&schema.name) {
            return Err(Error::AlreadyExists(format!("table {:?}", schema.name)));
        }
        let heap_block = TableEntry::block_name_for(&schema.name);
        let back_block = matches!(schema.engine, sharpcore_core::EngineKind::Hybrid)
            .then(|| TableEntry::back_block_name_for(&schema.name));
        self.tables.insert(
            schema.name.clone(),
            TableEntry {
                schema,
                heap_block,
                back_block,
                indexes: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<TableEntry> {
        self.tables
            .remove(name)
            .map(|(_, entry)| entry)
            .ok_or_else(|| Error::NotFound(format!("table {name:?}")))
    }

    pub fn get(&self, name: &str) -> Result<TableEntry> {
        self.tables
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::NotFound(format!("table {name:?}")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|e| e.key().clone()).collect()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Record that `column` now has a secondary index of `kind`. Errors
    /// if the column is already indexed or doesn't exist.
    pub fn add_index(&self, table: &str, column: &str, kind: IndexKind) -> Result<()> {
        let mut entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("table {table:?}")))?;
        if entry.schema.column_index(column).is_none() {
            return Err(Error::NotFound(format!("column {column:?}")));
        }
        if entry.indexes.iter().any(|idx| idx.column == column) {
            return Err(Error::AlreadyExists(format!(
                "index on {table}.{column}"
            )));
        }
        entry.indexes.push(IndexEntry {
            column: column.to_string(),
            kind,
        });
        Ok(())
    }

    /// Every table entry, for persisting the catalog to the table
    /// directory region on checkpoint.
    pub fn snapshot(&self) -> Vec<TableEntry> {
        self.tables.iter().map(|e| e.value().clone()).collect()
    }

    /// Rebuild a catalog from a previously persisted snapshot (used on
    /// open, after the storage provider decodes the table directory
    /// blob).
    pub fn from_entries(entries: Vec<TableEntry>) -> Self {
        let tables = DashMap::new();
        for entry in entries {
            tables.insert(entry.schema.name.clone(), entry);
        }
        TableCatalog { tables }
    }

    /// Repoint a table's heap block, e.g. after VACUUM rewrites an
    /// append-only table into a fresh block.
    pub fn set_heap_block(&self, table: &str, heap_block: impl Into<String>) -> Result<()> {
        let mut entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("table {table:?}")))?;
        entry.heap_block = heap_block.into();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharpcore_core::{ColumnDef, ColumnType, EngineKind};

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
    fn create_then_get_round_trips() {
        let catalog = TableCatalog::new();
        catalog.create_table(widgets_schema()).unwrap();
        let entry = catalog.get("widgets").unwrap();
        assert_eq!(entry.heap_block, "heap:widgets");
        assert!(entry.back_block.is_none());
    }

    #[test]
    fn duplicate_table_name_rejected() {
        let catalog = TableCatalog::new();
        catalog.create_table(widgets_schema()).unwrap();
        assert!(catalog.create_table(widgets_schema()).is_err());
    }

    #[test]
    fn hybrid_table_gets_a_back_block() {
        let catalog = TableCatalog::new();
        let schema = TableSchema::new(
            "events",
            vec![ColumnDef::new("id", ColumnType::Integer).not_null()],
            EngineKind::Hybrid,
        );
        catalog.create_table(schema).unwrap();
        let entry = catalog.get("events").unwrap();
        assert_eq!(entry.back_block.as_deref(), Some("back:events"));
    }

    #[test]
    fn drop_removes_and_returns_entry() {
        let catalog = TableCatalog::new();
        catalog.create_table(widgets_schema()).unwrap();
        let entry = catalog.drop_table("widgets").unwrap();
        assert_eq!(entry.schema.name, "widgets");
        assert!(catalog.get("widgets").is_err());
    }

    #[test]
    fn add_index_rejects_unknown_column_and_duplicates() {
        let catalog = TableCatalog::new();
        catalog.create_table(widgets_schema()).unwrap();
        assert!(catalog.add_index("widgets", "nope", IndexKind::Hash).is_err());
        catalog.add_index("widgets", "label", IndexKind::Hash).unwrap();
        assert!(catalog.add_index("widgets", "label", IndexKind::BTree).is_err());
    }
}
