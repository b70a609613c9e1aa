//! Table schema types (§3 "Row", §6 "CREATE TABLE").

use crate::collation::Collation;
use crate::value::{ColumnType, Value};
use crate::Error;

/// Which storage engine backs a table (§2, §4.7–§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EngineKind {
    /// Sequential log of versioned records; no in-place update.
    AppendOnly,
    /// Slotted pages with in-place update.
    PageBased,
    /// WAL-front store draining into a paged back store.
    Hybrid,
}

/// One column's declaration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub collation: Collation,
    /// Required for `ColumnType::Vector`; the fixed dimension every
    /// value in this column must have.
    pub vector_dim: Option<u32>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            ty,
            nullable: true,
            default: None,
            collation: Collation::Binary,
            vector_dim: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, v: Value) -> Self {
        self.default = Some(v);
        self
    }

    pub fn with_collation(mut self, c: Collation) -> Self {
        self.collation = c;
        self
    }

    pub fn with_vector_dim(mut self, dim: u32) -> Self {
        self.vector_dim = Some(dim);
        self
    }

    /// Validate a candidate value against this column's type, nullability,
    /// and (for vectors) declared dimension.
    pub fn validate(&self, value: &Value) -> Result<(), Error> {
        if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            return Err(Error::InvalidArgument(format!(
                "column {:?} is NOT NULL",
                self.name
            )));
        }
        let got = value.column_type();
        if got != Some(self.ty) {
            return Err(Error::InvalidArgument(format!(
                "column {:?} expects {:?}, got {:?}",
                self.name, self.ty, got
            )));
        }
        if let (ColumnType::Vector, Value::Vector(v)) = (self.ty, value) {
            if let Some(dim) = self.vector_dim {
                if v.len() != dim as usize {
                    return Err(Error::InvalidArgument(format!(
                        "column {:?} expects vector dimension {}, got {}",
                        self.name,
                        dim,
                        v.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A table's declared schema: column order, types, and the (at most one)
/// primary key.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Index into `columns` of the primary key column, if any.
    pub primary_key: Option<usize>,
    pub engine: EngineKind,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>, engine: EngineKind) -> Self {
        TableSchema {
            name: name.into(),
            columns,
            primary_key: None,
            engine,
        }
    }

    pub fn with_primary_key(mut self, column_index: usize) -> Result<Self, Error> {
        if column_index >= self.columns.len() {
            return Err(Error::InvalidArgument(
                "primary key column index out of range".into(),
            ));
        }
        self.primary_key = Some(column_index);
        Ok(self)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn primary_key_column(&self) -> Option<&ColumnDef> {
        self.primary_key.map(|i| &self.columns[i])
    }

    /// Validate a full row against this schema: column count, per-column
    /// type/nullability, and (if present) that the primary key cell is
    /// non-null.
    pub fn validate_row(&self, cells: &[Value]) -> Result<(), Error> {
        if cells.len() != self.columns.len() {
            return Err(Error::InvalidArgument(format!(
                "expected {} cells, got {}",
                self.columns.len(),
                cells.len()
            )));
        }
        for (col, cell) in self.columns.iter().zip(cells) {
            col.validate(cell)?;
        }
        if let Some(pk) = self.primary_key {
            if cells[pk].is_null() {
                return Err(Error::InvalidArgument(
                    "primary key column must not be null".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                ColumnDef::new("id", ColumnType::Integer).not_null(),
                ColumnDef::new("name", ColumnType::Text),
            ],
            EngineKind::PageBased,
        )
        .with_primary_key(0)
        .unwrap()
    }

    #[test]
    fn validates_matching_row() {
        let schema = users_schema();
        assert!(schema
            .validate_row(&[Value::Integer(1), Value::Text("Alice".into())])
            .is_ok());
    }

    #[test]
    fn rejects_null_primary_key() {
        let schema = users_schema();
        assert!(schema
            .validate_row(&[Value::Null, Value::Text("Alice".into())])
            .is_err());
    }

    #[test]
    fn rejects_wrong_arity() {
        let schema = users_schema();
        assert!(schema.validate_row(&[Value::Integer(1)]).is_err());
    }

    #[test]
    fn rejects_wrong_type() {
        let schema = users_schema();
        assert!(schema
            .validate_row(&[Value::Text("1".into()), Value::Text("Alice".into())])
            .is_err());
    }

    #[test]
    fn vector_dimension_is_enforced() {
        let col = ColumnDef::new("embedding", ColumnType::Vector).with_vector_dim(3);
        assert!(col.validate(&Value::Vector(vec![1.0, 2.0, 3.0])).is_ok());
        assert!(col.validate(&Value::Vector(vec![1.0, 2.0])).is_err());
    }
}
