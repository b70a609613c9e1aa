//! Durability-layer configuration: WAL sizing, group commit tuning, and
//! the crypto mode a database was opened with (§6 "Configuration
//! options": `wal_buffer_size`, `group_commit_*`, `encrypted`).

use std::time::Duration;

use sharpcore_core::Error;

use crate::crypto::CryptoMode;
use crate::wal::GroupCommitConfig;

/// WAL region sizing and commit-batching knobs.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Total size in bytes of the circular WAL region (must be a
    /// multiple of the 4096-byte slot size).
    pub wal_buffer_size: u64,
    /// Whether concurrent commits are batched into a single flush.
    pub group_commit_enabled: bool,
    pub group_commit: GroupCommitConfig,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            wal_buffer_size: 16 * 1024 * 1024,
            group_commit_enabled: true,
            group_commit: GroupCommitConfig::default(),
        }
    }
}

impl WalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wal_buffer_size(mut self, bytes: u64) -> Self {
        self.wal_buffer_size = bytes;
        self
    }

    pub fn with_group_commit_enabled(mut self, enabled: bool) -> Self {
        self.group_commit_enabled = enabled;
        self
    }

    pub fn with_group_commit_max_size(mut self, entries: usize) -> Self {
        self.group_commit.max_group_size = entries;
        self
    }

    pub fn with_group_commit_max_wait_us(mut self, micros: u64) -> Self {
        self.group_commit.max_wait = Duration::from_micros(micros);
        self
    }

    /// Small WAL region and a short group-commit window, for fast test
    /// runs.
    pub fn for_testing() -> Self {
        WalConfig {
            wal_buffer_size: 256 * 1024,
            group_commit_enabled: true,
            group_commit: GroupCommitConfig {
                max_group_size: 8,
                max_wait: Duration::from_micros(200),
            },
        }
    }

    /// Strict mode: group commit disabled, every commit flushes alone.
    /// Higher latency per commit, lowest possible window of loss.
    pub fn strict() -> Self {
        WalConfig {
            group_commit_enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), WalConfigError> {
        const SLOT_SIZE: u64 = crate::wal::SLOT_SIZE as u64;
        if self.wal_buffer_size < SLOT_SIZE * 4 {
            return Err(WalConfigError::BufferTooSmall);
        }
        if self.wal_buffer_size % SLOT_SIZE != 0 {
            return Err(WalConfigError::BufferNotSlotAligned);
        }
        if self.group_commit.max_group_size == 0 {
            return Err(WalConfigError::ZeroGroupSize);
        }
        Ok(())
    }
}

/// WAL configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalConfigError {
    #[error("WAL buffer must hold at least 4 slots")]
    BufferTooSmall,
    #[error("WAL buffer size must be a multiple of the slot size")]
    BufferNotSlotAligned,
    #[error("group commit max size must be at least 1")]
    ZeroGroupSize,
}

/// Durability-layer config: WAL sizing plus the crypto mode a database
/// was created or opened with. The password itself is never stored
/// here; callers pass it once at open time and it's consumed into a
/// [`crate::crypto::MasterKey`] immediately.
#[derive(Debug, Clone)]
pub struct DurabilityConfig {
    pub wal: WalConfig,
    pub crypto_mode: CryptoMode,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        DurabilityConfig {
            wal: WalConfig::default(),
            crypto_mode: CryptoMode::NoEncrypt,
        }
    }
}

impl DurabilityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encrypted() -> Self {
        DurabilityConfig {
            crypto_mode: CryptoMode::Aes256Gcm,
            ..Self::default()
        }
    }

    pub fn with_wal(mut self, wal: WalConfig) -> Self {
        self.wal = wal;
        self
    }

    pub fn with_crypto_mode(mut self, mode: CryptoMode) -> Self {
        self.crypto_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.wal
            .validate()
            .map_err(|e| Error::InvalidArgument(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(DurabilityConfig::default().validate().is_ok());
    }

    #[test]
    fn misaligned_buffer_is_rejected() {
        let wal = WalConfig::new().with_wal_buffer_size(5000);
        assert_eq!(wal.validate(), Err(WalConfigError::BufferNotSlotAligned));
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let wal = WalConfig::new().with_wal_buffer_size(4096);
        assert_eq!(wal.validate(), Err(WalConfigError::BufferTooSmall));
    }

    #[test]
    fn strict_mode_disables_group_commit() {
        let wal = WalConfig::strict();
        assert!(!wal.group_commit_enabled);
    }

    #[test]
    fn for_testing_uses_a_small_buffer() {
        let wal = WalConfig::for_testing();
        assert!(wal.wal_buffer_size < WalConfig::default().wal_buffer_size);
        assert!(wal.validate().is_ok());
    }

    #[test]
    fn builder_overrides_group_commit_tuning() {
        let wal = WalConfig::new()
            .with_group_commit_max_size(16)
            .with_group_commit_max_wait_us(500);
        assert_eq!(wal.group_commit.max_group_size, 16);
        assert_eq!(wal.group_commit.max_wait, Duration::from_micros(500));
    }
}
