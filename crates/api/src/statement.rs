//! The seam the (external) SQL parser/planner plugs into (§1 "Out of
//! scope: SQL parsing and planning... supplies parsed statements and
//! parameter bindings"). `sharpcore-api` never parses SQL text itself;
//! it defines `Statement`, `Binding`, and `QueryRow` so a host crate's
//! parser can hand the facade an already-planned operation.

use sharpcore_core::{RowId, Value};

/// A parameter value bound into a statement, either by `@name` or by
/// position — the facade only ever sees the resolved value.
pub trait Binding {
    fn into_value(self) -> Value;
}

impl Binding for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl Binding for i64 {
    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl Binding for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl Binding for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

/// What a planned statement does to a table's rows. The facade applies
/// this directly; it never derives it from SQL text (predicate
/// evaluation and projection are the external query-execution layer's
/// job per spec scope).
#[derive(Debug, Clone)]
pub enum RowOp {
    Insert(Vec<Value>),
    Update { rid: RowId, values: Vec<Value> },
    Delete { rid: RowId },
}

/// A single planned statement, targeting one table.
pub trait Statement: Send + Sync {
    fn table(&self) -> &str;
    fn op(&self) -> RowOp;
}

/// A concrete `Statement` the facade (and its tests) can build
/// directly without a real external parser in the loop.
pub struct RowStatement {
    pub table: String,
    pub row_op: RowOp,
}

impl RowStatement {
    pub fn insert(table: impl Into<String>, values: Vec<Value>) -> Self {
        RowStatement {
            table: table.into(),
            row_op: RowOp::Insert(values),
        }
    }

    pub fn update(table: impl Into<String>, rid: RowId, values: Vec<Value>) -> Self {
        RowStatement {
            table: table.into(),
            row_op: RowOp::Update { rid, values },
        }
    }

    pub fn delete(table: impl Into<String>, rid: RowId) -> Self {
        RowStatement {
            table: table.into(),
            row_op: RowOp::Delete { rid },
        }
    }
}

impl Statement for RowStatement {
    fn table(&self) -> &str {
        &self.table
    }

    fn op(&self) -> RowOp {
        self.row_op.clone()
    }
}

/// One row of a query result. An external query-execution layer
/// implements this over whatever projection/predicate machinery it
/// carries; the blanket impl below lets the facade's own table scans
/// (full rows, no projection) satisfy it directly.
pub trait QueryRow: Send {
    fn values(&self) -> &[Value];
}

impl QueryRow for Vec<Value> {
    fn values(&self) -> &[Value] {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_statement_round_trips_its_op() {
        let stmt = RowStatement::insert("widgets", vec![Value::Integer(1)]);
        assert_eq!(stmt.table(), "widgets");
        assert!(matches!(stmt.op(), RowOp::Insert(_)));
    }

    #[test]
    fn bindings_convert_to_values() {
        assert_eq!(42i64.into_value(), Value::Integer(42));
        assert_eq!("hi".into_value(), Value::Text("hi".into()));
    }
}
