//! Storage engines backing SharpCoreDB tables: page-based and
//! append-only heaps, their hybrid composition, the hash and B-tree
//! index flavors that sit over them, and the batch-update scope that
//! defers index maintenance across a burst of writes.
//!
//! Every engine is generic over [`store::PageStore`] so it can be
//! exercised against [`store::InMemoryPageStore`] in unit tests without
//! the full file-backed storage stack; `sharpcore-api` wires the same
//! engines over a real file.

#![warn(missing_docs)]

pub mod batch;
pub mod btree_index;
pub mod hash_index;
pub mod heap_append;
pub mod heap_paged;
pub mod hybrid;
pub mod store;
pub mod wal_support;

pub use batch::BatchUpdateScope;
pub use btree_index::BTreeIndex;
pub use hash_index::HashIndex;
pub use heap_append::AppendOnlyHeapEngine;
pub use heap_paged::{PagedHeapEngine, RowLocation};
pub use hybrid::HybridEngine;
pub use store::{InMemoryPageStore, PageStore};
pub use wal_support::{encode_before_after, WalAppender};
