//! Bridges heap/index engines to the write-ahead log without engine
//! code depending on a concrete [`sharpcore_durability::wal::CircularWal`]
//! instantiation. Every engine method that mutates a page accepts an
//! `Option<&dyn WalAppender>`: `None` runs the engine purely in memory
//! (used by engine unit tests), `Some` is how `sharpcore-api` wires a
//! live WAL in.

use sharpcore_core::{Lsn, PageId, Result, TxnId};
use sharpcore_durability::wal::{SlotIo, WalOp};

/// Encode a before/after image pair the way
/// [`sharpcore_durability::recovery::split_before_after`] expects to
/// decode them back.
pub fn encode_before_after(before: &[u8], after: &[u8]) -> Vec<u8> {
    use byteorder::{LittleEndian, WriteBytesExt};
    let mut buf = Vec::with_capacity(8 + before.len() + after.len());
    buf.write_u32::<LittleEndian>(before.len() as u32).unwrap();
    buf.extend_from_slice(before);
    buf.write_u32::<LittleEndian>(after.len() as u32).unwrap();
    buf.extend_from_slice(after);
    buf
}

/// What an engine needs from the durability layer to record a write.
pub trait WalAppender: Send + Sync {
    fn append_write(
        &self,
        op: WalOp,
        txn_id: TxnId,
        block_id: u64,
        page_id: PageId,
        before: &[u8],
        after: &[u8],
    ) -> Result<Lsn>;
}

impl<S: SlotIo> WalAppender for sharpcore_durability::wal::CircularWal<S> {
    fn append_write(
        &self,
        op: WalOp,
        txn_id: TxnId,
        block_id: u64,
        page_id: PageId,
        before: &[u8],
        after: &[u8],
    ) -> Result<Lsn> {
        self.append(op, txn_id, block_id, page_id, 0, encode_before_after(before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_after_round_trips_through_recovery_split() {
        let encoded = encode_before_after(b"old", b"new");
        let (before, after) = sharpcore_durability::recovery::split_before_after(&encoded).unwrap();
        assert_eq!(before, b"old");
        assert_eq!(after, b"new");
    }
}
