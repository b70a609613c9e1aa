//! `DatabaseStats` (§3 persisted file statistics, exposed live through
//! the facade per SPEC_FULL.md's "DatabaseStats snapshot" addition).

use sharpcore_storage::FileStats;

/// A point-in-time snapshot of database-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub total_records: u64,
    pub total_deletes: u64,
    pub last_vacuum_us: i64,
    /// Fragmentation estimate in basis points (0..=10000).
    pub fragmentation_bp: u32,
    pub table_count: usize,
    pub page_cache_len: usize,
}

impl DatabaseStats {
    pub fn from_file_stats(file_stats: FileStats, table_count: usize, page_cache_len: usize) -> Self {
        DatabaseStats {
            total_records: file_stats.total_records,
            total_deletes: file_stats.total_deletes,
            last_vacuum_us: file_stats.last_vacuum_us,
            fragmentation_bp: file_stats.fragmentation_bp,
            table_count,
            page_cache_len,
        }
    }
}
