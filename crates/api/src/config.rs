//! `SharpConfig`: every configuration knob named in spec §6, mirroring
//! the builder pattern [`sharpcore_durability::config::WalConfig`]
//! already uses for the WAL's own options.

use sharpcore_core::{EngineKind, Error, Result};
use sharpcore_durability::wal::GroupCommitConfig;
use sharpcore_durability::{CryptoMode, DurabilityConfig, WalConfig};
use sharpcore_storage::FitStrategy;

/// How aggressively VACUUM reclaims space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VacuumMode {
    /// Reclaim a bounded amount of space per call.
    Incremental,
    /// Rewrite the whole block in one pass.
    Full,
}

/// Every knob a caller can set when opening a database.
#[derive(Debug, Clone)]
pub struct SharpConfig {
    pub storage_engine: EngineKind,
    pub encrypted: bool,
    pub page_size: u32,
    pub page_cache_capacity: usize,
    pub wal: WalConfig,
    /// Batching knobs for the commit-path flusher (§4.6 group commit);
    /// shared by every committing transaction on this `Database`.
    pub group_commit: GroupCommitConfig,
    pub write_behind_batch_size: usize,
    pub write_behind_max_wait_ms: u64,
    pub extent_allocation_strategy: FitStrategy,
    pub pre_allocation_min_pages: u64,
    pub vacuum_mode: VacuumMode,
    pub read_only: bool,
}

impl Default for SharpConfig {
    fn default() -> Self {
        SharpConfig {
            storage_engine: EngineKind::PageBased,
            encrypted: false,
            page_size: 4096,
            page_cache_capacity: 10_000,
            wal: WalConfig::default(),
            group_commit: GroupCommitConfig::default(),
            write_behind_batch_size: 64,
            write_behind_max_wait_ms: 20,
            extent_allocation_strategy: FitStrategy::First,
            pre_allocation_min_pages: 256,
            vacuum_mode: VacuumMode::Incremental,
            read_only: false,
        }
    }
}

impl SharpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage_engine(mut self, engine: EngineKind) -> Self {
        self.storage_engine = engine;
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_page_cache_capacity(mut self, capacity: usize) -> Self {
        self.page_cache_capacity = capacity;
        self
    }

    pub fn with_wal_config(mut self, wal: WalConfig) -> Self {
        self.wal = wal;
        self
    }

    pub fn with_group_commit_config(mut self, group_commit: GroupCommitConfig) -> Self {
        self.group_commit = group_commit;
        self
    }

    pub fn with_write_behind_batch_size(mut self, entries: usize) -> Self {
        self.write_behind_batch_size = entries;
        self
    }

    pub fn with_write_behind_max_wait_ms(mut self, ms: u64) -> Self {
        self.write_behind_max_wait_ms = ms;
        self
    }

    pub fn with_extent_allocation_strategy(mut self, strategy: FitStrategy) -> Self {
        self.extent_allocation_strategy = strategy;
        self
    }

    pub fn with_pre_allocation_min_pages(mut self, pages: u64) -> Self {
        self.pre_allocation_min_pages = pages;
        self
    }

    pub fn with_vacuum_mode(mut self, mode: VacuumMode) -> Self {
        self.vacuum_mode = mode;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn durability(&self) -> DurabilityConfig {
        DurabilityConfig::default()
            .with_wal(self.wal.clone())
            .with_crypto_mode(if self.encrypted {
                CryptoMode::Aes256Gcm
            } else {
                CryptoMode::NoEncrypt
            })
    }

    /// Validate cross-field constraints the builder methods can't catch
    /// individually (page size must be one of the three the file format
    /// supports; the WAL buffer has its own `validate()`).
    pub fn validate(&self) -> Result<()> {
        if ![2048, 4096, 8192].contains(&self.page_size) {
            return Err(Error::InvalidArgument(format!(
                "page_size must be 2048, 4096, or 8192, got {}",
                self.page_size
            )));
        }
        if self.page_cache_capacity == 0 {
            return Err(Error::InvalidArgument(
                "page_cache_capacity must be > 0".into(),
            ));
        }
        self.wal
            .validate()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SharpConfig::new().validate().is_ok());
    }

    #[test]
    fn rejects_unsupported_page_size() {
        let config = SharpConfig::new().with_page_size(3000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn encrypted_flag_selects_aes_crypto_mode() {
        let config = SharpConfig::new().with_encrypted(true);
        assert_eq!(config.durability().crypto_mode, CryptoMode::Aes256Gcm);
    }
}
