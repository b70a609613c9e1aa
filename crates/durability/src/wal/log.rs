//! The circular WAL region: slot storage, append, and scanning
//! (§3 "WAL entry", §4.6).

use std::sync::{Arc, Mutex};

use sharpcore_core::{Error, Lsn, Result};

use super::entry::{decode_slot, encode_entry, reassemble, DecodedSlot, WalEntry, WalOp, SLOT_SIZE};
use super::header::WalHeader;

/// Backing storage for WAL slots, implemented by the single-file
/// storage provider; kept as a trait so the circular log logic can be
/// tested without a real file.
pub trait SlotIo: Send + Sync {
    fn read_slot(&self, index: u64) -> Result<[u8; SLOT_SIZE]>;
    fn write_slot(&self, index: u64, slot: &[u8; SLOT_SIZE]) -> Result<()>;
}

/// Lets a `CircularWal<Arc<dyn SlotIo>>` (or `Arc<FileSlotIo>`) be
/// shared between the engine's own WAL handle and a `GroupCommitter`'s
/// background flush thread without cloning the underlying file.
impl<T: SlotIo + ?Sized> SlotIo for Arc<T> {
    fn read_slot(&self, index: u64) -> Result<[u8; SLOT_SIZE]> {
        (**self).read_slot(index)
    }

    fn write_slot(&self, index: u64, slot: &[u8; SLOT_SIZE]) -> Result<()> {
        (**self).write_slot(index, slot)
    }
}

/// An in-memory [`SlotIo`] used by tests and by the no-encrypt
/// benchmarking mode before a real file exists.
pub struct MemorySlotIo {
    slots: Mutex<Vec<[u8; SLOT_SIZE]>>,
}

impl MemorySlotIo {
    pub fn new(slot_count: u64) -> Self {
        MemorySlotIo {
            slots: Mutex::new(vec![[0u8; SLOT_SIZE]; slot_count as usize]),
        }
    }

    /// Flip a bit in a slot's body, simulating a torn write: the slot no
    /// longer matches its trailing checksum. Used by crash-injection
    /// tests.
    pub fn corrupt_slot(&self, index: u64) {
        if let Some(slot) = self.slots.lock().unwrap().get_mut(index as usize) {
            slot[0] ^= 0xFF;
        }
    }

    /// Zero every slot from `index` onward, simulating a crash that cut
    /// the log off before those slots were ever written.
    pub fn truncate_from(&self, index: u64) {
        for slot in self.slots.lock().unwrap().iter_mut().skip(index as usize) {
            *slot = [0u8; SLOT_SIZE];
        }
    }
}

impl SlotIo for MemorySlotIo {
    fn read_slot(&self, index: u64) -> Result<[u8; SLOT_SIZE]> {
        self.slots
            .lock()
            .unwrap()
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::InvalidArgument("WAL slot index out of range".into()))
    }

    fn write_slot(&self, index: u64, slot: &[u8; SLOT_SIZE]) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let entry = slots
            .get_mut(index as usize)
            .ok_or_else(|| Error::InvalidArgument("WAL slot index out of range".into()))?;
        *entry = *slot;
        Ok(())
    }
}

/// The circular WAL: slot geometry plus the single mutex protecting
/// append/checkpoint bookkeeping. Reads (recovery scan) don't need the
/// mutex since they run before concurrent writers exist.
pub struct CircularWal<S: SlotIo> {
    header: Mutex<WalHeader>,
    io: S,
}

impl<S: SlotIo> CircularWal<S> {
    pub fn new(io: S, slot_count: u64) -> Self {
        CircularWal {
            header: Mutex::new(WalHeader::new(slot_count)),
            io,
        }
    }

    pub fn from_header(io: S, header: WalHeader) -> Self {
        CircularWal {
            header: Mutex::new(header),
            io,
        }
    }

    pub fn header(&self) -> WalHeader {
        *self.header.lock().unwrap()
    }

    /// Direct access to the backing slot storage, for crash-injection
    /// tests that need to corrupt or truncate slots out-of-band.
    pub fn io(&self) -> &S {
        &self.io
    }

    /// Append a logical entry, splitting across slots if its payload
    /// doesn't fit one. Returns the assigned LSN.
    pub fn append(
        &self,
        op: WalOp,
        txn_id: u64,
        block_id: u64,
        page_id: u64,
        timestamp_us: i64,
        payload: Vec<u8>,
    ) -> Result<Lsn> {
        let mut header = self.header.lock().unwrap();
        let lsn = header.next_lsn;
        let entry = WalEntry {
            lsn,
            txn_id,
            timestamp_us,
            op,
            block_id,
            page_id,
            payload,
        };
        let slots = encode_entry(&entry);

        let needed = slots.len() as u64;
        let free = header.slot_count - header.len() - 1; // keep one slot as a head/tail sentinel gap
        if needed > free {
            return Err(Error::OutOfSpace(
                "WAL circular region full; checkpoint required".into(),
            ));
        }

        for slot in &slots {
            self.io.write_slot(header.tail, slot)?;
            header.tail = (header.tail + 1) % header.slot_count;
        }
        header.next_lsn += 1;
        Ok(lsn)
    }

    /// Scan every live entry from `head` to `tail`, reassembling
    /// continuation chains, and stopping at the first slot that fails
    /// checksum verification (torn write or end of valid log).
    pub fn scan_live(&self) -> Result<Vec<WalEntry>> {
        let header = self.header();
        let mut entries = Vec::new();
        let mut pending: Vec<DecodedSlot> = Vec::new();
        let mut index = header.head;

        while index != header.tail {
            let raw = self.io.read_slot(index)?;
            let decoded = match decode_slot(&raw) {
                Ok(d) => d,
                Err(_) => break, // torn write: everything after is assumed invalid
            };
            let continuation = decoded.continuation;
            pending.push(decoded);
            if !continuation {
                entries.push(reassemble(&pending)?);
                pending.clear();
            }
            index = (index + 1) % header.slot_count;
        }
        Ok(entries)
    }

    /// Advance `head` past every entry up to and including
    /// `checkpoint_lsn`, reclaiming their slots, and record the new
    /// checkpoint LSN. Callers must have already durably flushed every
    /// dirty page covered by the checkpoint.
    pub fn checkpoint(&self, checkpoint_lsn: Lsn) -> Result<()> {
        let entries = self.scan_live()?;
        let mut header = self.header.lock().unwrap();

        let mut advanced = header.head;
        let mut index = header.head;
        for entry in &entries {
            let slot_span = super::entry::encode_entry(entry).len() as u64;
            if entry.lsn <= checkpoint_lsn {
                index = (index + slot_span) % header.slot_count;
                advanced = index;
            } else {
                break;
            }
        }
        header.head = advanced;
        header.last_checkpoint_lsn = checkpoint_lsn;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wal() -> CircularWal<MemorySlotIo> {
        CircularWal::new(MemorySlotIo::new(64), 64)
    }

    #[test]
    fn append_then_scan_round_trips() {
        let wal = wal();
        let lsn = wal
            .append(WalOp::Insert, 1, 10, 0, 123, b"row bytes".to_vec())
            .unwrap();
        let entries = wal.scan_live().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].lsn, lsn);
        assert_eq!(entries[0].payload, b"row bytes");
    }

    #[test]
    fn lsns_are_strictly_monotonic() {
        let wal = wal();
        let l1 = wal.append(WalOp::Begin, 1, 0, 0, 0, vec![]).unwrap();
        let l2 = wal.append(WalOp::Commit, 1, 0, 0, 0, vec![]).unwrap();
        assert!(l2 > l1);
    }

    #[test]
    fn checkpoint_reclaims_slots_up_to_the_given_lsn() {
        let wal = wal();
        let l1 = wal.append(WalOp::Begin, 1, 0, 0, 0, vec![]).unwrap();
        let _l2 = wal.append(WalOp::Commit, 1, 0, 0, 0, vec![]).unwrap();
        wal.checkpoint(l1).unwrap();
        let header = wal.header();
        assert_eq!(header.head, 1);
        assert_eq!(header.last_checkpoint_lsn, l1);
    }

    #[test]
    fn full_region_rejects_further_appends() {
        let wal = CircularWal::new(MemorySlotIo::new(4), 4);
        wal.append(WalOp::Insert, 1, 0, 0, 0, vec![]).unwrap();
        wal.append(WalOp::Insert, 1, 0, 0, 0, vec![]).unwrap();
        wal.append(WalOp::Insert, 1, 0, 0, 0, vec![]).unwrap();
        assert!(wal.append(WalOp::Insert, 1, 0, 0, 0, vec![]).is_err());
    }

    #[test]
    fn scan_stops_at_first_torn_slot() {
        let wal = wal();
        wal.append(WalOp::Insert, 1, 0, 0, 0, b"a".to_vec()).unwrap();
        wal.append(WalOp::Insert, 1, 0, 0, 0, b"b".to_vec()).unwrap();
        // Corrupt the second slot directly through the backing store.
        let mut raw = wal.io.read_slot(1).unwrap();
        raw[10] ^= 0xFF;
        wal.io.write_slot(1, &raw).unwrap();

        let entries = wal.scan_live().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, b"a");
    }
}
