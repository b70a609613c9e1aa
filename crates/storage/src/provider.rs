//! The single-file storage provider (§4.6).
//!
//! A SharpCoreDB file is one flat file: a fixed header, a mmap'd
//! region covering the header and registry so reads never pay a
//! syscall, and everything else read and written through page-sized
//! I/O. Writes go through a write-behind queue drained by a worker
//! loop and amortized into a single `fsync` per drain, the way the
//! teacher's mmap vector cache treats its backing file as the
//! authoritative store and keeps an in-memory index on top
//! (`engine/src/primitives/vector/mmap.rs`).

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write as IoWrite};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use memmap2::{Mmap, MmapOptions};
use sharpcore_core::{Error, PageId, Result};
use tracing::{debug, warn};

use crate::header::{FileHeader, HEADER_SIZE};
use crate::page::Page;

/// A page write queued for the background write-behind worker.
struct PendingWrite {
    offset: u64,
    bytes: Vec<u8>,
}

/// How often the write-behind worker wakes to drain pending writes even
/// if the queue hasn't hit its size threshold.
const DRAIN_INTERVAL: Duration = Duration::from_millis(20);
/// Queue depth that triggers an immediate drain instead of waiting for
/// the next timer tick.
const DRAIN_QUEUE_THRESHOLD: usize = 64;

/// Owns the backing file and serves page-level reads and writes.
pub struct FileStorageProvider {
    file: Mutex<File>,
    /// Read-only mmap over the header + registry region, refreshed
    /// whenever that region is rewritten.
    header_map: Mutex<Option<Mmap>>,
    page_size: u32,
    pending: Mutex<VecDeque<PendingWrite>>,
}

impl FileStorageProvider {
    /// Create a brand-new file, pre-allocating `initial_pages` worth of
    /// space. Falls back to a plain `set_len` (no mmap of the
    /// pre-allocated region) if the platform can't grow a file that's
    /// concurrently mmap'd without invalidating the mapping.
    pub fn create(path: &Path, header: &FileHeader, initial_pages: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&header.to_bytes())?;
        let total_bytes = initial_pages * header.page_size as u64;
        file.set_len(total_bytes.max(HEADER_SIZE as u64))?;
        file.flush()?;

        Ok(FileStorageProvider {
            file: Mutex::new(file),
            header_map: Mutex::new(None),
            page_size: header.page_size,
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// Open an existing file and validate its header.
    ///
    /// If the primary header at offset 0 fails its checksum, falls back
    /// to the backup copy mirrored onto the file's last page at every
    /// checkpoint (§7 repair path, step 1). Locating that mirror needs
    /// the page size the corrupt primary could have told us, so this
    /// tries each page size §6 allows (2048/4096/8192) until one yields
    /// a page-aligned, checksum-valid header.
    pub fn open(path: &Path) -> Result<(Self, FileHeader)> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header_bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;

        let header = match FileHeader::from_bytes(&header_bytes) {
            Ok(header) => header,
            Err(primary_err) => {
                warn!(?primary_err, "primary file header failed checksum, trying backup mirror");
                recover_header_by_scanning_mirror(&mut file)?
            }
        };

        let provider = FileStorageProvider {
            file: Mutex::new(file),
            header_map: Mutex::new(None),
            page_size: header.page_size,
            pending: Mutex::new(VecDeque::new()),
        };
        Ok((provider, header))
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Refresh the mmap over the header + registry region. Must be
    /// called after any write to that region lands on disk.
    pub fn remap_header_region(&self, region_len: u64) -> Result<()> {
        let file = self.file.lock().unwrap();
        let map = unsafe {
            MmapOptions::new()
                .len(region_len as usize)
                .map(&*file)
                .map_err(Error::Io)?
        };
        *self.header_map.lock().unwrap() = Some(map);
        Ok(())
    }

    /// Read `region_len` bytes from the mmap'd header region, falling
    /// back to a direct read if the mapping hasn't been established
    /// yet.
    pub fn read_header_region(&self, region_len: u64) -> Result<Vec<u8>> {
        if let Some(map) = self.header_map.lock().unwrap().as_ref() {
            return Ok(map[..region_len as usize].to_vec());
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; region_len as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a single page synchronously, bypassing the write-behind
    /// queue (checked first so a page just written but not yet flushed
    /// is still visible).
    pub fn read_page(&self, offset: u64) -> Result<Page> {
        if let Some(bytes) = self.pending_bytes_at(offset) {
            return Ok(Page::from_bytes(bytes));
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; self.page_size as usize];
        file.read_exact(&mut buf)?;
        Ok(Page::from_bytes(buf))
    }

    fn pending_bytes_at(&self, offset: u64) -> Option<Vec<u8>> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|w| w.offset == offset)
            .map(|w| w.bytes.clone())
    }

    /// Queue a page for write-behind. Returns immediately; durability
    /// is only guaranteed after [`Self::flush_pending`] or the
    /// background worker's next drain.
    pub fn write_page_queued(&self, offset: u64, page: &Page) {
        self.pending.lock().unwrap().push_back(PendingWrite {
            offset,
            bytes: page.data.clone(),
        });
    }

    /// Write a page synchronously, bypassing the queue. Used for the
    /// header and other regions that must never be delayed behind the
    /// background worker.
    pub fn write_page_sync(&self, offset: u64, page: &Page) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        Ok(())
    }

    /// Drain every queued write and issue a single amortized `fsync`.
    /// The four-step loop is: (1) snapshot the queue, (2) apply each
    /// write with `pwrite`-style seek+write, (3) `sync_data` once,
    /// (4) clear the drained entries.
    pub fn flush_pending(&self) -> Result<usize> {
        let batch: Vec<PendingWrite> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain(..).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }
        let mut file = self.file.lock().unwrap();
        for write in &batch {
            file.seek(SeekFrom::Start(write.offset))?;
            file.write_all(&write.bytes)?;
        }
        file.sync_data()?;
        debug!(count = batch.len(), "flushed write-behind queue");
        Ok(batch.len())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Grow the file to hold `new_total_pages`, matching the free-space
    /// map's exponential growth target.
    pub fn grow_file(&self, new_total_pages: u64) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.set_len(new_total_pages * self.page_size as u64)?;
        Ok(())
    }

    pub fn sync_all(&self) -> Result<()> {
        self.file.lock().unwrap().sync_all()?;
        Ok(())
    }

    /// Write a variable-length, non-page-aligned region, bypassing the
    /// write-behind queue. Used for the registry and table directory
    /// blobs, which aren't page-sized.
    pub fn write_raw(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Read `len` bytes starting at `offset`, bypassing the write-behind
    /// queue and the header mmap.
    pub fn read_raw(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Background worker draining the write-behind queue on a timer or
/// once it crosses [`DRAIN_QUEUE_THRESHOLD`] entries, using the same
/// `Arc<AtomicBool>` shutdown-flag idiom as the registry's coalescing
/// flush timer.
pub struct WriteBehindWorker {
    shutdown: Arc<AtomicBool>,
}

impl WriteBehindWorker {
    pub fn start(provider: Arc<FileStorageProvider>) -> (Self, JoinHandle<()>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let handle = thread::spawn(move || {
            while !shutdown_clone.load(Ordering::Relaxed) {
                thread::sleep(DRAIN_INTERVAL);
                if provider.pending_len() >= DRAIN_QUEUE_THRESHOLD || provider.pending_len() > 0 {
                    if let Err(err) = provider.flush_pending() {
                        warn!(?err, "write-behind drain failed");
                    }
                }
            }
            let _ = provider.flush_pending();
        });

        (WriteBehindWorker { shutdown }, handle)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

pub fn page_offset(page_id: PageId, page_size: u32) -> u64 {
    page_id * page_size as u64
}

/// Page sizes §6 "File format" allows; tried in order when the primary
/// header is gone and only the page size itself says where its backup
/// mirror lives.
const CANDIDATE_PAGE_SIZES: [u64; 3] = [2048, 4096, 8192];

/// Scan the tail of the file for a backup header mirror, trying every
/// page size the format allows to find where the last page starts.
fn recover_header_by_scanning_mirror(file: &mut File) -> Result<FileHeader> {
    let file_len = file.metadata()?.len();
    for page_size in CANDIDATE_PAGE_SIZES {
        if file_len < page_size {
            continue;
        }
        let total_pages = file_len / page_size;
        let offset = (total_pages - 1) * page_size;
        file.seek(SeekFrom::Start(offset))?;
        let mut mirror_bytes = [0u8; HEADER_SIZE];
        if file.read_exact(&mut mirror_bytes).is_err() {
            continue;
        }
        if let Ok(header) = FileHeader::from_bytes(&mirror_bytes) {
            if header.page_size as u64 == page_size {
                return Ok(header);
            }
        }
    }
    Err(Error::Corrupt(
        "primary file header is corrupt and no valid backup mirror was found".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::EncryptionMode;
    use tempfile::tempdir;

    #[test]
    fn create_then_open_reads_back_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.scdb");
        let header = FileHeader::new(4096, EncryptionMode::None, [0u8; 16]);
        FileStorageProvider::create(&path, &header, 4).unwrap();

        let (_provider, reopened) = FileStorageProvider::open(&path).unwrap();
        assert_eq!(reopened.page_size, 4096);
    }

    #[test]
    fn queued_write_visible_before_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.scdb");
        let header = FileHeader::new(64, EncryptionMode::None, [0u8; 16]);
        let provider = FileStorageProvider::create(&path, &header, 4).unwrap();

        let mut page = Page::new(64);
        page.data[0] = 0xAB;
        provider.write_page_queued(64, &page);
        let read_back = provider.read_page(64).unwrap();
        assert_eq!(read_back.data[0], 0xAB);
    }

    #[test]
    fn flush_pending_persists_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.scdb");
        let header = FileHeader::new(64, EncryptionMode::None, [0u8; 16]);
        let provider = FileStorageProvider::create(&path, &header, 4).unwrap();

        let mut page = Page::new(64);
        page.data[0] = 0xCD;
        provider.write_page_queued(64, &page);
        assert_eq!(provider.flush_pending().unwrap(), 1);
        assert_eq!(provider.pending_len(), 0);

        let (provider2, _) = FileStorageProvider::open(&path).unwrap();
        let read_back = provider2.read_page(64).unwrap();
        assert_eq!(read_back.data[0], 0xCD);
    }

    #[test]
    fn grow_file_extends_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.scdb");
        let header = FileHeader::new(64, EncryptionMode::None, [0u8; 16]);
        let provider = FileStorageProvider::create(&path, &header, 4).unwrap();
        provider.grow_file(100).unwrap();
        let len = provider.file.lock().unwrap().metadata().unwrap().len();
        assert_eq!(len, 100 * 64);
    }
}
