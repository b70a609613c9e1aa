//! The typed cell value model (§3 "Row").
//!
//! A row is a tuple of typed cells. `Value::Null` is a distinct cell
//! value usable under any [`ColumnType`] whose column declares
//! `nullable`. The row codec (in `sharpcore-storage`) maps each
//! [`ColumnType`] to a fixed `type_tag` byte; those tags are defined here
//! so storage and engine agree on the wire representation without a
//! dependency cycle.

use std::cmp::Ordering;

use crate::collation::Collation;

/// Fixed 16-byte decimal representation (scaled integer, see
/// `sharpcore-storage::codec` for the exact layout).
pub type Decimal16 = [u8; 16];

/// The declared type of a column (§3 "Row": "integer, floating, decimal,
/// text, boolean, datetime, blob, ULID, GUID, and vector").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    Integer = 1,
    Float = 2,
    Decimal = 3,
    Text = 4,
    Boolean = 5,
    /// Microseconds since the Unix epoch, UTC.
    DateTime = 6,
    Blob = 7,
    Ulid = 8,
    Guid = 9,
    /// Fixed-dimension float sequence; the dimension lives on the
    /// column definition, not the tag.
    Vector = 10,
}

impl ColumnType {
    /// Round-trip a raw wire tag back into a [`ColumnType`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => ColumnType::Integer,
            2 => ColumnType::Float,
            3 => ColumnType::Decimal,
            4 => ColumnType::Text,
            5 => ColumnType::Boolean,
            6 => ColumnType::DateTime,
            7 => ColumnType::Blob,
            8 => ColumnType::Ulid,
            9 => ColumnType::Guid,
            10 => ColumnType::Vector,
            _ => return None,
        })
    }

    /// The wire tag for this type.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A single typed cell value. `Null` is distinct from e.g. an empty
/// string or a zero integer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Decimal(Decimal16),
    Text(String),
    Boolean(bool),
    /// Microseconds since the Unix epoch, UTC.
    DateTime(i64),
    Blob(Vec<u8>),
    Ulid(u128),
    Guid(u128),
    Vector(Vec<f32>),
}

impl Value {
    /// The [`ColumnType`] this value's tag would round-trip through, or
    /// `None` for `Null` (nulls carry the owning column's type tag, not
    /// their own).
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Decimal(_) => Some(ColumnType::Decimal),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::DateTime(_) => Some(ColumnType::DateTime),
            Value::Blob(_) => Some(ColumnType::Blob),
            Value::Ulid(_) => Some(ColumnType::Ulid),
            Value::Guid(_) => Some(ColumnType::Guid),
            Value::Vector(_) => Some(ColumnType::Vector),
        }
    }

    /// Whether this value is the null marker.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Compare two values of the same declared type under a collation,
    /// for index ordering. `Text` comparisons defer to the collation;
    /// every other type compares by native ordering, and `Null` sorts
    /// before every non-null value (matching most SQL collation rules).
    pub fn compare(&self, other: &Value, collation: &Collation) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Ulid(a), Value::Ulid(b)) => a.cmp(b),
            (Value::Guid(a), Value::Guid(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => collation.compare(a, b),
            (Value::Vector(a), Value::Vector(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            // Mismatched variants: order by tag so indexes stay total.
            _ => self
                .column_type()
                .map(ColumnType::tag)
                .cmp(&other.column_type().map(ColumnType::tag)),
        }
    }

    /// Normalize a value into a hashable/orderable index key. Text keys
    /// go through the column's collation; every other type hashes its
    /// natural bit pattern.
    pub fn index_key(&self, collation: &Collation) -> IndexKey {
        match self {
            Value::Text(s) => IndexKey::Text(collation.normalize_key(s)),
            other => IndexKey::Raw(format!("{other:?}")),
        }
    }
}

/// A normalized key used by the hash and B-tree indexes. Keeping this as
/// a distinct type (rather than reusing `Value`) means two cells the
/// collation considers equal always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    Text(String),
    Raw(String),
}
