//! The WAL entry format: one fixed 4096-byte slot per entry (§3 "WAL
//! entry", §4.6). A payload too large for one slot chains across
//! consecutive slots with the continuation flag set on every slot but
//! the last.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sharpcore_core::{Error, Lsn, PageId, Result, TxnId};
use std::io::Cursor;

/// Fixed size of one WAL slot, matching the page size convention so
/// slots and pages share an allocation granularity.
pub const SLOT_SIZE: usize = 4096;
/// Bytes of trailing checksum reserved at the end of every slot.
const CHECKSUM_LEN: usize = 32;
/// Fixed-width header preceding the payload in every slot.
const ENTRY_HEADER_LEN: usize = 46;
/// Largest payload a single slot can carry.
pub const MAX_PAYLOAD_LEN: usize = SLOT_SIZE - CHECKSUM_LEN - ENTRY_HEADER_LEN;

/// What kind of change (or control record) a WAL entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOp {
    Insert,
    Update,
    Delete,
    Checkpoint,
    Begin,
    Commit,
    Abort,
    PageAlloc,
    PageFree,
}

impl WalOp {
    fn to_tag(self) -> u8 {
        match self {
            WalOp::Insert => 0,
            WalOp::Update => 1,
            WalOp::Delete => 2,
            WalOp::Checkpoint => 3,
            WalOp::Begin => 4,
            WalOp::Commit => 5,
            WalOp::Abort => 6,
            WalOp::PageAlloc => 7,
            WalOp::PageFree => 8,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => WalOp::Insert,
            1 => WalOp::Update,
            2 => WalOp::Delete,
            3 => WalOp::Checkpoint,
            4 => WalOp::Begin,
            5 => WalOp::Commit,
            6 => WalOp::Abort,
            7 => WalOp::PageAlloc,
            8 => WalOp::PageFree,
            other => return Err(Error::Corrupt(format!("unknown WAL op tag {other}"))),
        })
    }
}

/// One logical WAL record, already reassembled from however many
/// physical slots it spanned.
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub timestamp_us: i64,
    pub op: WalOp,
    pub block_id: u64,
    pub page_id: PageId,
    pub payload: Vec<u8>,
}

/// Encode `entry` into one or more fixed-size slots.
pub fn encode_entry(entry: &WalEntry) -> Vec<[u8; SLOT_SIZE]> {
    let chunks: Vec<&[u8]> = if entry.payload.is_empty() {
        vec![&[]]
    } else {
        entry.payload.chunks(MAX_PAYLOAD_LEN).collect()
    };
    let last = chunks.len() - 1;

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| encode_slot(entry, chunk, i != last))
        .collect()
}

fn encode_slot(entry: &WalEntry, payload: &[u8], continuation: bool) -> [u8; SLOT_SIZE] {
    let mut buf = Vec::with_capacity(SLOT_SIZE - CHECKSUM_LEN);
    buf.write_u64::<LittleEndian>(entry.lsn).unwrap();
    buf.write_u64::<LittleEndian>(entry.txn_id).unwrap();
    buf.write_i64::<LittleEndian>(entry.timestamp_us).unwrap();
    buf.write_u8(entry.op.to_tag()).unwrap();
    buf.write_u8(continuation as u8).unwrap();
    buf.write_u64::<LittleEndian>(entry.block_id).unwrap();
    buf.write_u64::<LittleEndian>(entry.page_id).unwrap();
    buf.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    buf.extend_from_slice(payload);
    buf.resize(SLOT_SIZE - CHECKSUM_LEN, 0);

    let checksum = sharpcore_storage::sha256(&buf);
    let mut slot = [0u8; SLOT_SIZE];
    slot[..SLOT_SIZE - CHECKSUM_LEN].copy_from_slice(&buf);
    slot[SLOT_SIZE - CHECKSUM_LEN..].copy_from_slice(&checksum);
    slot
}

/// The result of decoding a single physical slot.
pub struct DecodedSlot {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub timestamp_us: i64,
    pub op: WalOp,
    pub block_id: u64,
    pub page_id: PageId,
    pub payload: Vec<u8>,
    pub continuation: bool,
}

/// Decode and checksum-verify a single slot. A checksum mismatch means
/// either the slot was never written (zeroed/garbage) or the write was
/// torn — recovery treats both as "end of valid log" (§4.6 step 4).
pub fn decode_slot(slot: &[u8; SLOT_SIZE]) -> Result<DecodedSlot> {
    let body = &slot[..SLOT_SIZE - CHECKSUM_LEN];
    let stored_checksum = &slot[SLOT_SIZE - CHECKSUM_LEN..];
    if sharpcore_storage::sha256(body) != stored_checksum {
        return Err(Error::Corrupt("WAL slot checksum mismatch".into()));
    }

    let mut cur = Cursor::new(body);
    let lsn = cur.read_u64::<LittleEndian>()?;
    let txn_id = cur.read_u64::<LittleEndian>()?;
    let timestamp_us = cur.read_i64::<LittleEndian>()?;
    let op = WalOp::from_tag(cur.read_u8()?)?;
    let continuation = cur.read_u8()? != 0;
    let block_id = cur.read_u64::<LittleEndian>()?;
    let page_id = cur.read_u64::<LittleEndian>()?;
    let payload_len = cur.read_u32::<LittleEndian>()? as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(Error::Corrupt("WAL slot declares oversized payload".into()));
    }
    let start = cur.position() as usize;
    let payload = body
        .get(start..start + payload_len)
        .ok_or_else(|| Error::Corrupt("WAL slot payload runs past its bounds".into()))?
        .to_vec();

    Ok(DecodedSlot {
        lsn,
        txn_id,
        timestamp_us,
        op,
        block_id,
        page_id,
        payload,
        continuation,
    })
}

/// Reassemble a run of decoded slots (a continuation chain terminated
/// by a non-continuation slot) into one logical entry.
pub fn reassemble(slots: &[DecodedSlot]) -> Result<WalEntry> {
    let first = slots
        .first()
        .ok_or_else(|| Error::Corrupt("empty slot chain".into()))?;
    let mut payload = Vec::new();
    for slot in slots {
        payload.extend_from_slice(&slot.payload);
    }
    Ok(WalEntry {
        lsn: first.lsn,
        txn_id: first.txn_id,
        timestamp_us: first.timestamp_us,
        op: first.op,
        block_id: first.block_id,
        page_id: first.page_id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: Vec<u8>) -> WalEntry {
        WalEntry {
            lsn: 7,
            txn_id: 3,
            timestamp_us: 1_700_000_000,
            op: WalOp::Insert,
            block_id: 99,
            page_id: 5,
            payload,
        }
    }

    #[test]
    fn single_slot_round_trips() {
        let entry = sample(b"hello".to_vec());
        let slots = encode_entry(&entry);
        assert_eq!(slots.len(), 1);
        let decoded = decode_slot(&slots[0]).unwrap();
        assert!(!decoded.continuation);
        let reassembled = reassemble(&[decoded]).unwrap();
        assert_eq!(reassembled, entry);
    }

    #[test]
    fn oversized_payload_spans_multiple_slots() {
        let payload = vec![0xAB; MAX_PAYLOAD_LEN * 2 + 10];
        let entry = sample(payload.clone());
        let slots = encode_entry(&entry);
        assert_eq!(slots.len(), 3);

        let decoded: Vec<DecodedSlot> = slots.iter().map(|s| decode_slot(s).unwrap()).collect();
        assert!(decoded[0].continuation);
        assert!(decoded[1].continuation);
        assert!(!decoded[2].continuation);

        let reassembled = reassemble(&decoded).unwrap();
        assert_eq!(reassembled.payload, payload);
    }

    #[test]
    fn corrupted_slot_fails_checksum() {
        let entry = sample(b"hello".to_vec());
        let mut slots = encode_entry(&entry);
        slots[0][10] ^= 0xFF;
        assert!(decode_slot(&slots[0]).is_err());
    }

    #[test]
    fn zeroed_slot_is_treated_as_unwritten() {
        let slot = [0u8; SLOT_SIZE];
        assert!(decode_slot(&slot).is_err());
    }
}
