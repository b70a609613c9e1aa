//! SharpCoreDB's embeddable facade: configuration, the table catalog,
//! per-table storage engines and secondary indexes, and the
//! `Database` handle that ties them to a single on-disk file.
//!
//! SQL parsing and planning are explicitly out of scope (§1); this
//! crate exposes [`statement::Statement`]/[`statement::Binding`]/
//! [`statement::QueryRow`] as the seam an external SQL layer plugs
//! pre-planned operations through, plus direct row/catalog/batch/
//! vacuum methods on [`database::Database`] for callers that don't
//! need SQL at all.

#![warn(missing_docs)]

#[allow(missing_docs)]
pub mod catalog;
#[allow(missing_docs)]
pub mod config;
#[allow(missing_docs)]
pub mod database;
#[allow(missing_docs)]
pub mod file_page_store;
#[allow(missing_docs)]
pub mod file_slot_io;
#[allow(missing_docs)]
pub mod persistence;
#[allow(missing_docs)]
pub mod state;
#[allow(missing_docs)]
pub mod statement;
#[allow(missing_docs)]
pub mod stats;
#[allow(missing_docs)]
pub mod table_engine;

pub use catalog::{IndexEntry, IndexKind, TableCatalog, TableEntry};
pub use config::{SharpConfig, VacuumMode};
pub use database::Database;
pub use file_page_store::FilePageStore;
pub use file_slot_io::FileSlotIo;
pub use state::{DbState, StateMachine};
pub use statement::{Binding, QueryRow, RowOp, RowStatement, Statement};
pub use stats::DatabaseStats;
pub use table_engine::{TableEngine, TableRuntime};
