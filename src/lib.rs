//! SharpCoreDB: embeddable single-file relational store with ACID
//! semantics and encryption at rest. This crate re-exports the
//! public facade from `sharpcore-api`.

pub use sharpcore_api::*;

pub use sharpcore_core as core;
pub use sharpcore_durability as durability;
pub use sharpcore_engine as engine;
pub use sharpcore_storage as storage;
