//! Write-ahead log: fixed-slot entries in a circular region, group
//! commit, and checkpointing (§4.6).

mod entry;
mod group_commit;
mod header;
mod log;

pub use entry::{
    decode_slot, encode_entry, reassemble, DecodedSlot, WalEntry, WalOp, MAX_PAYLOAD_LEN, SLOT_SIZE,
};
pub use group_commit::{GroupCommitConfig, GroupCommitter};
pub use header::{WalHeader, WAL_HEADER_SIZE};
pub use log::{CircularWal, MemorySlotIo, SlotIo};
