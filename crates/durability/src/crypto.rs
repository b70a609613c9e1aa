//! The per-block crypto envelope (§4.1).
//!
//! Key derivation is PBKDF2-HMAC-SHA256 over the user's password and
//! the file's salt, producing a 32 B master key. Every block is sealed
//! independently with AES-256-GCM; the nonce is deterministic —
//! `SHA-256(key_id || block_id || generation)[..12]` — so no nonce ever
//! repeats for a given key as long as `generation` only increases,
//! which the registry already guarantees (§4.2). A "no encrypt" mode
//! exists for benchmarking and bypasses sealing entirely, the same way
//! betrusted's pddb backend treats its AEAD layer as a swappable
//! `Aead` implementation rather than hand-rolling one
//! (`betrusted-io-xous-core/services/pddb/src/backend/key.rs`).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use sharpcore_core::Error;

/// Length in bytes of the derived master key.
pub const KEY_LEN: usize = 32;
/// Length in bytes of the AES-GCM nonce.
pub const NONCE_LEN: usize = 12;
/// Length in bytes of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;
/// PBKDF2 iteration count for master key derivation.
pub const PBKDF2_ITERATIONS: u32 = 210_000;

/// A derived 256-bit master key. Never serialized; held only in memory
/// for the lifetime of an open, encrypted database.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Derive the master key from a password and the file's stored
    /// salt.
    pub fn derive(password: &str, salt: &[u8; 16]) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        MasterKey(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// Whether blocks are sealed on write and verified on read, or passed
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMode {
    /// Benchmarking/testing bypass; must match a header declaring no
    /// encryption.
    NoEncrypt,
    /// AES-256-GCM per block; must match a header declaring
    /// encryption.
    Aes256Gcm,
}

/// Derive the block id used in nonce derivation from a block's name.
/// Hashing the name (rather than its current page offset) keeps the id
/// stable across relocation.
pub fn block_id_for(name: &str) -> u64 {
    let digest = sharpcore_storage::sha256(name.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

fn derive_nonce(key_id: u64, block_id: u64, generation: u64, page_id: u64) -> [u8; NONCE_LEN] {
    let mut input = Vec::with_capacity(32);
    input.extend_from_slice(&key_id.to_le_bytes());
    input.extend_from_slice(&block_id.to_le_bytes());
    input.extend_from_slice(&generation.to_le_bytes());
    input.extend_from_slice(&page_id.to_le_bytes());
    let digest = sharpcore_storage::sha256(&input);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    nonce
}

/// Seal a block's plaintext contents, producing `[nonce:12][ciphertext][tag:16]`
/// per the file-format layout (§6). `page_id` folds into the nonce so
/// sealing more than one page under the same `(key_id, block_id,
/// generation)` — every page in a block shares its generation — never
/// reuses a nonce; pass `0` for single-page artifacts like the
/// registry or table directory blob.
pub fn seal_block(
    key: &MasterKey,
    key_id: u64,
    block_id: u64,
    generation: u64,
    page_id: u64,
    plaintext: &[u8],
) -> Vec<u8> {
    let nonce_bytes = derive_nonce(key_id, block_id, generation, page_id);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = key
        .cipher()
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &aad_for(block_id, page_id),
            },
        )
        .expect("AES-256-GCM encryption of a bounded in-memory block cannot fail");

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

/// Open a sealed block, verifying its authentication tag. Returns
/// `Error::TamperDetected` on any verification failure; callers on the
/// registry block specifically should report `WrongPassword` instead
/// when this is the very first block opened after deriving the key
/// (see [`crate::recovery`]).
pub fn open_block(
    key: &MasterKey,
    key_id: u64,
    block_id: u64,
    page_id: u64,
    sealed: &[u8],
) -> Result<Vec<u8>, Error> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::Corrupt("sealed block shorter than envelope overhead".into()));
    }
    let (nonce_bytes, rest) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    key.cipher()
        .decrypt(
            nonce,
            Payload {
                msg: rest,
                aad: &aad_for(block_id, page_id),
            },
        )
        .map_err(|_| Error::TamperDetected(format!("block {block_id:#x} failed AEAD verification")))
}

/// Authenticated-but-not-encrypted data binding a sealed envelope to the
/// exact block and page it belongs to, so copying one page's bytes over
/// another's on disk fails verification instead of silently decrypting.
fn aad_for(block_id: u64, page_id: u64) -> [u8; 16] {
    let mut aad = [0u8; 16];
    aad[..8].copy_from_slice(&block_id.to_le_bytes());
    aad[8..].copy_from_slice(&page_id.to_le_bytes());
    aad
}
