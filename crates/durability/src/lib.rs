//! Durability layer: the crypto envelope, the write-ahead log, crash
//! recovery, and the repair path.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

#[allow(missing_docs)]
pub mod config;
#[allow(missing_docs)]
pub mod crypto;
#[allow(missing_docs)]
pub mod recovery;
#[allow(missing_docs)]
pub mod testing;
#[allow(missing_docs)]
pub mod wal;

pub use config::{DurabilityConfig, WalConfig, WalConfigError};
pub use crypto::{
    block_id_for, open_block, seal_block, CryptoMode, MasterKey, KEY_LEN, NONCE_LEN,
    PBKDF2_ITERATIONS, TAG_LEN,
};
pub use recovery::{recover, repair_registry_from_wal, ReplayAction, RecoveryPlan};
pub use testing::{inject_and_recover, CrashPoint, ReferenceModel};
