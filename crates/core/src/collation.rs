//! String collation rules (§3 "per-column collation", §4.10, glossary).
//!
//! Collation governs how two text cells compare for index ordering and
//! lookup. Hash and B-tree indexes both normalize a key through the
//! owning column's collation before hashing or comparing it.

use std::cmp::Ordering;

/// A rule governing string comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Collation {
    /// Exact byte-for-byte comparison.
    Binary,
    /// Case-insensitive comparison (ASCII + simple Unicode case folding).
    NoCase,
    /// Binary comparison after trailing whitespace is trimmed from both
    /// sides.
    RTrim,
    /// Unicode-aware comparison using default case folding and
    /// normalization-insensitive equality.
    Unicode,
    /// Locale-aware comparison; the locale tag (e.g. `"en-US"`) is kept
    /// for downstream collation tables but SharpCoreDB's core only
    /// guarantees the `Unicode` fallback ordering for it, since locale
    /// tailoring tables are a host concern.
    Locale(String),
}

impl Collation {
    /// Normalize a string the way this collation would before hashing or
    /// storing it as an index key, so two differently-cased (etc.)
    /// strings that the collation considers equal normalize identically.
    pub fn normalize_key(&self, s: &str) -> String {
        match self {
            Collation::Binary => s.to_string(),
            Collation::NoCase => s.to_lowercase(),
            Collation::RTrim => s.trim_end().to_string(),
            Collation::Unicode | Collation::Locale(_) => s.to_lowercase(),
        }
    }

    /// Compare two strings under this collation.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            Collation::Binary => a.cmp(b),
            Collation::NoCase => a.to_lowercase().cmp(&b.to_lowercase()),
            Collation::RTrim => a.trim_end().cmp(b.trim_end()),
            Collation::Unicode | Collation::Locale(_) => {
                a.to_lowercase().cmp(&b.to_lowercase())
            }
        }
    }

    /// Whether two strings are equal under this collation.
    pub fn equal(&self, a: &str, b: &str) -> bool {
        self.compare(a, b) == Ordering::Equal
    }
}

impl Default for Collation {
    fn default() -> Self {
        Collation::Binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nocase_matches_differently_cased_strings() {
        assert!(Collation::NoCase.equal("alice", "ALICE"));
        assert!(Collation::NoCase.equal("Alice", "alice"));
    }

    #[test]
    fn binary_requires_exact_match() {
        assert!(!Collation::Binary.equal("alice", "ALICE"));
        assert!(Collation::Binary.equal("alice", "alice"));
    }

    #[test]
    fn rtrim_ignores_trailing_whitespace() {
        assert!(Collation::RTrim.equal("alice  ", "alice"));
        assert!(!Collation::RTrim.equal(" alice", "alice"));
    }

    #[test]
    fn p9_property_binary_vs_nocase() {
        // P9 — for two strings differing only by case, NoCase finds
        // both, Binary finds only the exact match.
        let candidates = ["alice", "ALICE", "Alice"];
        let binary_matches = candidates
            .iter()
            .filter(|c| Collation::Binary.equal(c, "alice"))
            .count();
        let nocase_matches = candidates
            .iter()
            .filter(|c| Collation::NoCase.equal(c, "alice"))
            .count();
        assert_eq!(binary_matches, 1);
        assert_eq!(nocase_matches, 3);
    }
}
