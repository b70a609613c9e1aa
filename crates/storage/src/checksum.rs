//! SHA-256 checksums used for the file header, block registry entries,
//! and block contents (§3, §4.1).

use sha2::{Digest, Sha256};

/// Size in bytes of a SHA-256 digest.
pub const SHA256_LEN: usize = 32;

/// Compute the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; SHA256_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; SHA256_LEN];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_known_digest() {
        let digest = sha256(b"");
        // Well-known SHA-256("") prefix.
        assert_eq!(digest[0], 0xe3);
        assert_eq!(digest[1], 0xb0);
    }

    #[test]
    fn differing_inputs_differ() {
        assert_ne!(sha256(b"a"), sha256(b"b"));
    }
}
