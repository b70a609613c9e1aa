//! Identifiers shared across every layer: page ids, LSNs, row ids, and the
//! bounded block name carried in the block registry (§3 "Block").

use std::fmt;

/// Maximum length in bytes of a block name (`"SCDB"` file format, §3).
pub const BLOCK_NAME_MAX_LEN: usize = 31;

/// Fixed-size unit of allocation and I/O, addressed by a 64-bit id.
pub type PageId = u64;

/// Monotonically increasing Log Sequence Number.
pub type Lsn = u64;

/// Identifier of a transaction (one per mutating statement, or one per
/// `begin_batch_update`/`end_batch_update` scope).
pub type TxnId = u64;

/// Identifier of a row within a table, assigned by the engine on insert.
pub type RowId = u64;

/// A named, page-aligned region of the file (§3 "Block"). The name is
/// UTF-8 and bounded to [`BLOCK_NAME_MAX_LEN`] bytes so it fits in a
/// fixed-size registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BlockName(String);

impl BlockName {
    /// Build a validated block name, rejecting names that would not fit
    /// in a fixed-size registry entry.
    pub fn new(name: impl Into<String>) -> Result<Self, crate::Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidArgument(
                "block name must not be empty".into(),
            ));
        }
        if name.len() > BLOCK_NAME_MAX_LEN {
            return Err(crate::Error::InvalidArgument(format!(
                "block name {name:?} exceeds {BLOCK_NAME_MAX_LEN} bytes"
            )));
        }
        Ok(BlockName(name))
    }

    /// Borrow the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlockName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_names() {
        let too_long = "x".repeat(BLOCK_NAME_MAX_LEN + 1);
        assert!(BlockName::new(too_long).is_err());
    }

    #[test]
    fn accepts_max_length_name() {
        let exact = "x".repeat(BLOCK_NAME_MAX_LEN);
        assert!(BlockName::new(exact).is_ok());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(BlockName::new("").is_err());
    }
}
