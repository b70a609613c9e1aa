//! Crash recovery (§4.6 "Recovery (on open)") and the repair path
//! (§7): reconstructing the registry from the WAL's last-known-good
//! checkpoint when the registry block itself fails checksum
//! verification.

use std::collections::{HashMap, HashSet};

use sharpcore_core::{Error, Lsn, Result, TxnId};
use tracing::{info, warn};

use crate::wal::{CircularWal, SlotIo, WalEntry, WalOp};

/// One step of replay: either apply the after-image of a committed
/// write, or undo an uncommitted one by restoring its before-image.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayAction {
    Apply { block_id: u64, page_id: u64, after_image: Vec<u8> },
    Undo { block_id: u64, page_id: u64, before_image: Vec<u8> },
}

/// The outcome of a recovery pass: the actions to apply, in order, and
/// the LSN a synthetic checkpoint should record afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPlan {
    pub actions: Vec<ReplayAction>,
    pub synthetic_checkpoint_lsn: Lsn,
}

/// How a write entry's payload is laid out: before-image then
/// after-image, so undo and redo can both be served from the same
/// record. Engines that append insert/update/delete entries are
/// expected to encode payloads this way:
/// `[before_len:u32][before][after_len:u32][after]`.
pub fn split_before_after(payload: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    use byteorder::{LittleEndian, ReadBytesExt};
    let mut cur = std::io::Cursor::new(payload);
    let before_len = cur.read_u32::<LittleEndian>()? as usize;
    let before_start = 4;
    let before = payload
        .get(before_start..before_start + before_len)
        .ok_or_else(|| Error::Corrupt("WAL payload before-image out of bounds".into()))?
        .to_vec();
    let after_len_pos = before_start + before_len;
    let after_len = (&payload[after_len_pos..after_len_pos + 4]).read_u32::<LittleEndian>()? as usize;
    let after_start = after_len_pos + 4;
    let after = payload
        .get(after_start..after_start + after_len)
        .ok_or_else(|| Error::Corrupt("WAL payload after-image out of bounds".into()))?
        .to_vec();
    Ok((before, after))
}

/// Run the replay algorithm over every entry the circular WAL still
/// holds (steps 2-4 of §4.6; step 1, the file-header repair path, runs
/// before the WAL is even opened and lives in [`repair_registry`]).
///
/// Entries are scanned in LSN order; a `commit` entry for a txn marks
/// every prior write of that txn as durable. Writes belonging to a txn
/// with no matching `commit` by the end of the scan are undone.
/// Scanning itself already stops at the first checksum failure
/// ([`CircularWal::scan_live`]), which is step 4.
pub fn recover<S: SlotIo>(wal: &CircularWal<S>) -> Result<RecoveryPlan> {
    let entries = wal.scan_live()?;
    if entries.is_empty() {
        return Ok(RecoveryPlan {
            actions: Vec::new(),
            synthetic_checkpoint_lsn: wal.header().last_checkpoint_lsn,
        });
    }

    let mut committed: HashSet<TxnId> = HashSet::new();
    let mut aborted: HashSet<TxnId> = HashSet::new();
    for entry in &entries {
        match entry.op {
            WalOp::Commit => {
                committed.insert(entry.txn_id);
            }
            WalOp::Abort => {
                aborted.insert(entry.txn_id);
            }
            _ => {}
        }
    }

    let mut actions = Vec::new();
    let mut highest_lsn = wal.header().last_checkpoint_lsn;
    let mut writes_by_txn: HashMap<TxnId, Vec<&WalEntry>> = HashMap::new();

    for entry in &entries {
        highest_lsn = highest_lsn.max(entry.lsn);
        if matches!(
            entry.op,
            WalOp::Insert | WalOp::Update | WalOp::Delete | WalOp::PageAlloc | WalOp::PageFree
        ) {
            writes_by_txn.entry(entry.txn_id).or_default().push(entry);
        }
    }

    for (txn_id, writes) in writes_by_txn {
        let is_committed = committed.contains(&txn_id) && !aborted.contains(&txn_id);
        for entry in writes {
            let (before, after) = match split_before_after(&entry.payload) {
                Ok(pair) => pair,
                Err(_) => {
                    warn!(lsn = entry.lsn, "WAL entry payload malformed, skipping");
                    continue;
                }
            };
            if is_committed {
                actions.push(ReplayAction::Apply {
                    block_id: entry.block_id,
                    page_id: entry.page_id,
                    after_image: after,
                });
            } else if !before.is_empty() {
                actions.push(ReplayAction::Undo {
                    block_id: entry.block_id,
                    page_id: entry.page_id,
                    before_image: before,
                });
            }
        }
    }

    info!(
        action_count = actions.len(),
        synthetic_checkpoint_lsn = highest_lsn,
        "recovery replay complete"
    );

    Ok(RecoveryPlan {
        actions,
        synthetic_checkpoint_lsn: highest_lsn,
    })
}

/// Reconstruct the set of live block entries from the WAL's
/// `page-alloc`/`page-free` history when the registry block itself
/// fails its checksum (§4.2, §7 repair path). This produces a
/// best-effort registry: callers should still run [`recover`]
/// afterward so the reconstructed blocks get their committed writes
/// replayed.
pub fn repair_registry_from_wal<S: SlotIo>(wal: &CircularWal<S>) -> Result<HashSet<u64>> {
    let entries = wal.scan_live()?;
    let mut live_blocks: HashSet<u64> = HashSet::new();
    for entry in &entries {
        match entry.op {
            WalOp::PageAlloc => {
                live_blocks.insert(entry.block_id);
            }
            WalOp::PageFree => {
                // A block remains live as long as any page allocation
                // for it survived; only drop it if this free entry's
                // payload marks the whole block reclaimed.
                if entry.payload.first() == Some(&1) {
                    live_blocks.remove(&entry.block_id);
                }
            }
            _ => {}
        }
    }
    warn!(
        recovered_blocks = live_blocks.len(),
        "reconstructed block registry from WAL history after checksum failure"
    );
    Ok(live_blocks)
}
