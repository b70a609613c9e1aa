//! Shared types for SharpCoreDB: error kinds, identifiers, the typed cell
//! value model, collation rules, table schema, and cooperative
//! cancellation. Every other crate in the workspace depends on this one
//! and nothing in here depends back on them.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

#[allow(missing_docs)]
pub mod cancel;
#[allow(missing_docs)]
pub mod collation;
#[allow(missing_docs)]
pub mod error;
#[allow(missing_docs)]
pub mod ids;
#[allow(missing_docs)]
pub mod schema;
#[allow(missing_docs)]
pub mod value;

pub use cancel::CancellationToken;
pub use collation::Collation;
pub use error::{Error, Result};
pub use ids::{BlockName, Lsn, PageId, RowId, TxnId, BLOCK_NAME_MAX_LEN};
pub use schema::{ColumnDef, EngineKind, TableSchema};
pub use value::{ColumnType, Decimal16, IndexKey, Value};
