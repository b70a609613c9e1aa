//! The block registry (§4.2).
//!
//! The registry maps block names to their descriptors and is itself
//! persisted as a block (type `Registry`, §3). Reads are lock-free
//! against a snapshot obtained via an atomic pointer swap; writers
//! serialize through a single mutex. A background thread coalesces
//! writes into a batched flush every 100ms or every 50 mutations,
//! whichever comes first — the same shape as the teacher's
//! `TTLCleaner` background-thread idiom (`storage/src/cleaner.rs`),
//! adapted here to coalesce registry flushes instead of expiring keys.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sharpcore_core::Result;

use crate::block::BlockEntry;

/// How often the background coalescing timer checks for pending writes.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// How many mutations accumulate before an immediate flush is triggered.
pub const FLUSH_MUTATION_THRESHOLD: usize = 50;

/// An immutable snapshot of the registry's contents, handed to readers.
type Snapshot = Arc<HashMap<String, BlockEntry>>;

/// In-memory index over block descriptors, backed by the on-disk
/// registry block.
pub struct BlockRegistry {
    /// Snapshot readers see; swapped atomically on every write.
    snapshot: RwLock<Snapshot>,
    /// Serializes writers; readers never take this lock.
    write_lock: std::sync::Mutex<()>,
    dirty: AtomicBool,
    generation: AtomicU64,
    mutations_since_flush: AtomicU64,
}

impl BlockRegistry {
    /// Build an empty registry (used when creating a new file).
    pub fn new() -> Self {
        BlockRegistry {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            write_lock: std::sync::Mutex::new(()),
            dirty: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            mutations_since_flush: AtomicU64::new(0),
        }
    }

    /// Rebuild a registry from a previously persisted set of entries
    /// (used on open, after the storage provider decodes the registry
    /// block).
    pub fn from_entries(entries: Vec<BlockEntry>) -> Self {
        let registry = Self::new();
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            map.insert(entry.name.as_str().to_string(), entry);
        }
        *registry.snapshot.write().unwrap() = Arc::new(map);
        registry
    }

    /// O(1) average lookup against the current snapshot; never blocks on
    /// a concurrent writer beyond an uncontended `RwLock::read`.
    pub fn get(&self, name: &str) -> Option<BlockEntry> {
        self.snapshot.read().unwrap().get(name).cloned()
    }

    /// List every block whose name starts with `prefix`.
    pub fn list(&self, prefix: &str) -> Vec<BlockEntry> {
        self.snapshot
            .read()
            .unwrap()
            .values()
            .filter(|e| e.name.as_str().starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Insert or replace a block's descriptor, marking the registry
    /// dirty and bumping the generation counter.
    pub fn put(&self, entry: BlockEntry) {
        let _guard = self.write_lock.lock().unwrap();
        let mut map = (**self.snapshot.read().unwrap()).clone();
        map.insert(entry.name.as_str().to_string(), entry);
        *self.snapshot.write().unwrap() = Arc::new(map);
        self.mark_dirty();
    }

    /// Remove a block's descriptor.
    pub fn remove(&self, name: &str) -> Option<BlockEntry> {
        let _guard = self.write_lock.lock().unwrap();
        let mut map = (**self.snapshot.read().unwrap()).clone();
        let removed = map.remove(name);
        if removed.is_some() {
            *self.snapshot.write().unwrap() = Arc::new(map);
            self.mark_dirty();
        }
        removed
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.mutations_since_flush.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether the mutation-count threshold has been reached (used by
    /// the background coalescing timer and by tests).
    pub fn should_flush(&self) -> bool {
        self.is_dirty()
            && self.mutations_since_flush.load(Ordering::SeqCst)
                >= FLUSH_MUTATION_THRESHOLD as u64
    }

    /// Snapshot the current entries for serialization. Synchronous and
    /// idempotent: calling it twice without an intervening write returns
    /// the same entries and does not re-mark the registry dirty.
    pub fn snapshot_entries(&self) -> Vec<BlockEntry> {
        self.snapshot.read().unwrap().values().cloned().collect()
    }

    /// Mark the registry clean after a caller has durably persisted
    /// `snapshot_entries()`'s output.
    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::SeqCst);
        self.mutations_since_flush.store(0, Ordering::SeqCst);
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A sink the registry's background timer flushes into. Implemented by
/// the storage provider; kept as a trait so the registry has no direct
/// dependency on file I/O.
pub trait RegistrySink: Send + Sync {
    fn flush_registry(&self, entries: &[BlockEntry]) -> Result<()>;
}

/// Background coalescing timer: wakes every [`FLUSH_INTERVAL`] and
/// flushes the registry if it is dirty, regardless of the mutation
/// count, so a flush is never more than `FLUSH_INTERVAL` stale.
pub struct RegistryFlusher {
    shutdown: Arc<AtomicBool>,
}

impl RegistryFlusher {
    /// Start the background timer. Returns a handle to stop it and the
    /// thread's `JoinHandle`.
    pub fn start(
        registry: Arc<BlockRegistry>,
        sink: Arc<dyn RegistrySink>,
    ) -> (Self, JoinHandle<()>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let handle = thread::spawn(move || {
            while !shutdown_clone.load(Ordering::Relaxed) {
                thread::sleep(FLUSH_INTERVAL);
                if registry.is_dirty() {
                    let entries = registry.snapshot_entries();
                    if sink.flush_registry(&entries).is_ok() {
                        registry.mark_clean();
                    }
                }
            }
        });

        (RegistryFlusher { shutdown }, handle)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Flush the registry synchronously, for callers that need an immediate,
/// on-demand flush (e.g. end of transaction) rather than waiting on the
/// background timer. Idempotent: a no-op if the registry is already
/// clean.
pub fn flush_now(registry: &BlockRegistry, sink: &dyn RegistrySink) -> Result<()> {
    if !registry.is_dirty() {
        return Ok(());
    }
    let entries = registry.snapshot_entries();
    sink.flush_registry(&entries)?;
    registry.mark_clean();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockFlags, BlockType};
    use sharpcore_core::BlockName;
    use std::sync::Mutex as StdMutex;

    fn entry(name: &str) -> BlockEntry {
        BlockEntry {
            name: BlockName::new(name).unwrap(),
            block_type: BlockType::Heap,
            start_page: 1,
            length_pages: 1,
            checksum: [0u8; 32],
            flags: BlockFlags::empty(),
            generation: 0,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let registry = BlockRegistry::new();
        registry.put(entry("users"));
        assert!(registry.get("users").is_some());
        assert!(registry.is_dirty());
    }

    #[test]
    fn remove_clears_entry() {
        let registry = BlockRegistry::new();
        registry.put(entry("users"));
        assert!(registry.remove("users").is_some());
        assert!(registry.get("users").is_none());
    }

    #[test]
    fn list_filters_by_prefix() {
        let registry = BlockRegistry::new();
        registry.put(entry("users_heap"));
        registry.put(entry("users_idx_name"));
        registry.put(entry("orders_heap"));
        assert_eq!(registry.list("users_").len(), 2);
    }

    #[test]
    fn generation_increments_on_every_mutation() {
        let registry = BlockRegistry::new();
        assert_eq!(registry.generation(), 0);
        registry.put(entry("a"));
        assert_eq!(registry.generation(), 1);
        registry.put(entry("b"));
        assert_eq!(registry.generation(), 2);
    }

    #[test]
    fn should_flush_after_threshold_mutations() {
        let registry = BlockRegistry::new();
        for i in 0..FLUSH_MUTATION_THRESHOLD - 1 {
            registry.put(entry(&format!("b{i}")));
        }
        assert!(!registry.should_flush());
        registry.put(entry("last"));
        assert!(registry.should_flush());
    }

    struct RecordingSink {
        flushes: StdMutex<Vec<usize>>,
    }

    impl RegistrySink for RecordingSink {
        fn flush_registry(&self, entries: &[BlockEntry]) -> Result<()> {
            self.flushes.lock().unwrap().push(entries.len());
            Ok(())
        }
    }

    #[test]
    fn flush_now_is_idempotent() {
        let registry = BlockRegistry::new();
        registry.put(entry("a"));
        let sink = RecordingSink {
            flushes: StdMutex::new(Vec::new()),
        };
        flush_now(&registry, &sink).unwrap();
        flush_now(&registry, &sink).unwrap();
        assert_eq!(sink.flushes.lock().unwrap().len(), 1);
    }

    #[test]
    fn from_entries_reconstructs_lookup() {
        let registry = BlockRegistry::from_entries(vec![entry("users")]);
        assert!(registry.get("users").is_some());
        assert!(!registry.is_dirty());
    }
}
