//! Live Process Memory Port
//!
//! `MemoryPort` implementation for reading and writing a live process via
//! `process-memory`, with a short-lived page cache for scatter fetches.

use super::lookup::{find_module_base, find_process};
use super::region::parse_maps;

use memscatter::{
    page_align, MemoryError, MemoryPort, MemoryResult, PageBatch, Pid, WriteEntry, PAGE_SIZE,
};
use process_memory::{CopyAddress, ProcessHandle, PutAddress, TryIntoProcessHandle};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct CachedPage {
    data: Vec<u8>,
    fetched: Instant,
}

/// Page cache keyed by (pid, page address)
struct PageCache {
    ttl: Duration,
    pages: HashMap<(Pid, u64), CachedPage>,
}

impl PageCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pages: HashMap::new(),
        }
    }

    fn get(&self, pid: Pid, page: u64) -> Option<&[u8]> {
        self.pages
            .get(&(pid, page))
            .filter(|p| p.fetched.elapsed() < self.ttl)
            .map(|p| p.data.as_slice())
    }

    fn insert(&mut self, pid: Pid, page: u64, data: Vec<u8>) {
        if self.ttl.is_zero() {
            return;
        }
        self.prune();
        self.pages.insert(
            (pid, page),
            CachedPage {
                data,
                fetched: Instant::now(),
            },
        );
    }

    /// Drop every expired page
    fn prune(&mut self) {
        let ttl = self.ttl;
        self.pages.retain(|_, p| p.fetched.elapsed() < ttl);
    }

    fn remove(&mut self, pid: Pid, page: u64) {
        self.pages.remove(&(pid, page));
    }

    /// Drop cached pages overlapping a written range
    fn invalidate(&mut self, pid: Pid, address: u64, len: usize) {
        let mut page = page_align(address);
        let end = address.saturating_add(len as u64);
        while page < end {
            self.remove(pid, page);
            page = match page.checked_add(PAGE_SIZE) {
                Some(next) => next,
                None => break,
            };
        }
    }

    fn clear(&mut self) {
        self.pages.clear();
    }
}

/// Memory port for live processes on this machine
pub struct ProcessPort {
    handles: HashMap<Pid, ProcessHandle>,
    cache: PageCache,
}

// SAFETY: a process-memory handle only names the target process (a pid on
// Linux, a process HANDLE on Windows); neither is tied to the opening thread.
unsafe impl Send for ProcessPort {}

impl ProcessPort {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            handles: HashMap::new(),
            cache: PageCache::new(cache_ttl),
        }
    }

    /// Open (or reuse) the handle for a pid
    fn handle(handles: &mut HashMap<Pid, ProcessHandle>, pid: Pid) -> MemoryResult<&ProcessHandle> {
        if !handles.contains_key(&pid) {
            let handle = (pid as process_memory::Pid)
                .try_into_process_handle()
                .map_err(|e| {
                    MemoryError::Device(format!(
                        "failed to attach to process {}: {}. Try running with sudo.",
                        pid, e
                    ))
                })?;
            debug!(pid, "attached to process");
            handles.insert(pid, handle);
        }
        handles
            .get(&pid)
            .ok_or_else(|| MemoryError::Device(format!("no handle for process {}", pid)))
    }
}

impl MemoryPort for ProcessPort {
    fn read_buffer(
        &mut self,
        pid: Pid,
        address: u64,
        size: usize,
        _use_cache: bool,
    ) -> MemoryResult<Vec<u8>> {
        let handle = Self::handle(&mut self.handles, pid)?;
        let mut buffer = vec![0u8; size];
        handle
            .copy_address(address as usize, &mut buffer)
            .map_err(|e| {
                MemoryError::Device(format!(
                    "failed to read {} bytes at {:#x}: {}",
                    size, address, e
                ))
            })?;
        Ok(buffer)
    }

    fn read_pages(
        &mut self,
        pid: Pid,
        pages: &BTreeSet<u64>,
        use_cache: bool,
    ) -> MemoryResult<PageBatch> {
        let handle = Self::handle(&mut self.handles, pid)?;
        let mut batch = PageBatch::new();
        let mut hits = 0usize;

        for &page in pages {
            if use_cache {
                if let Some(data) = self.cache.get(pid, page) {
                    batch.insert(page, data.to_vec());
                    hits += 1;
                    continue;
                }
            }

            let mut data = vec![0u8; PAGE_SIZE as usize];
            match handle.copy_address(page as usize, &mut data) {
                Ok(()) => {
                    self.cache.insert(pid, page, data.clone());
                    batch.insert(page, data);
                }
                Err(e) => {
                    trace!(pid, page, "page read failed: {}", e);
                    self.cache.remove(pid, page);
                    batch.insert_failed(page);
                }
            }
        }

        trace!(pid, pages = pages.len(), cache_hits = hits, "page batch read");
        Ok(batch)
    }

    fn write_buffer(&mut self, pid: Pid, address: u64, data: &[u8]) -> MemoryResult<()> {
        let handle = Self::handle(&mut self.handles, pid)?;
        self.cache.invalidate(pid, address, data.len());
        handle.put_address(address as usize, data).map_err(|e| {
            MemoryError::Device(format!(
                "failed to write {} bytes at {:#x}: {}",
                data.len(),
                address,
                e
            ))
        })?;
        Ok(())
    }

    fn write_batch(&mut self, pid: Pid, entries: &[WriteEntry]) -> MemoryResult<()> {
        let regions = parse_maps(pid).map_err(|e| {
            MemoryError::WriteBatch(format!("failed to read /proc/{}/maps: {}", pid, e))
        })?;

        // Prepare: every write must land in a writable mapping
        for entry in entries {
            let writable = entry.address != 0
                && !entry.data.is_empty()
                && regions.iter().any(|r| {
                    r.is_writable() && r.contains_range(entry.address, entry.data.len())
                });
            if !writable {
                return Err(MemoryError::WriteBatch(format!(
                    "failed to prepare write of {} bytes at {:#x}",
                    entry.data.len(),
                    entry.address
                )));
            }
        }

        let handle = Self::handle(&mut self.handles, pid)
            .map_err(|e| MemoryError::WriteBatch(e.to_string()))?;
        execute_writes(handle, &mut self.cache, pid, entries)
    }

    fn process_id(&mut self, name: &str) -> MemoryResult<Pid> {
        find_process(name)
    }

    fn module_base(&mut self, pid: Pid, module: &str) -> MemoryResult<u64> {
        find_module_base(pid, module)
    }

    fn close(&mut self) {
        debug!(handles = self.handles.len(), "closing process port");
        self.handles.clear();
        self.cache.clear();
    }
}

/// Execute a prepared batch in order. Each entry's cached pages are dropped
/// before it is written, so a failure partway leaves no stale pages.
fn execute_writes(
    handle: &impl PutAddress,
    cache: &mut PageCache,
    pid: Pid,
    entries: &[WriteEntry],
) -> MemoryResult<()> {
    for entry in entries {
        cache.invalidate(pid, entry.address, entry.data.len());
        handle
            .put_address(entry.address as usize, &entry.data)
            .map_err(|e| {
                MemoryError::WriteBatch(format!("write at {:#x} failed: {}", entry.address, e))
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_cache_expiry() {
        let mut cache = PageCache::new(Duration::from_secs(60));
        cache.insert(1, 0x1000, vec![7; 4]);
        assert_eq!(cache.get(1, 0x1000), Some(&[7u8; 4][..]));
        assert!(cache.get(2, 0x1000).is_none());

        let mut expired = PageCache::new(Duration::from_nanos(1));
        expired.insert(1, 0x1000, vec![7; 4]);
        std::thread::sleep(Duration::from_millis(2));
        assert!(expired.get(1, 0x1000).is_none());
    }

    #[test]
    fn test_page_cache_disabled_with_zero_ttl() {
        let mut cache = PageCache::new(Duration::ZERO);
        cache.insert(1, 0x1000, vec![1]);
        assert!(cache.pages.is_empty());
    }

    #[test]
    fn test_page_cache_prunes_expired_on_insert() {
        let mut cache = PageCache::new(Duration::from_millis(1));
        cache.insert(1, 0x1000, vec![0]);
        cache.insert(1, 0x2000, vec![0]);
        std::thread::sleep(Duration::from_millis(5));
        cache.insert(1, 0x3000, vec![0]);
        assert_eq!(cache.pages.len(), 1);
        assert!(cache.pages.contains_key(&(1, 0x3000)));
    }

    #[test]
    fn test_page_cache_invalidate_range() {
        let mut cache = PageCache::new(Duration::from_secs(60));
        for page in [0x1000, 0x2000, 0x3000] {
            cache.insert(1, page, vec![0]);
        }
        cache.invalidate(1, 0x1FFC, 8);
        assert!(cache.get(1, 0x1000).is_none());
        assert!(cache.get(1, 0x2000).is_none());
        assert!(cache.get(1, 0x3000).is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_own_process() {
        let value: u64 = 0x1122_3344_5566_7788;
        let address = &value as *const u64 as u64;
        let pid = std::process::id();

        let mut port = ProcessPort::new(Duration::from_millis(100));
        let bytes = port.read_buffer(pid, address, 8, true).unwrap();
        assert_eq!(bytes, value.to_le_bytes());

        let pages: BTreeSet<u64> = [page_align(address)].into_iter().collect();
        let batch = port.read_pages(pid, &pages, false).unwrap();
        assert!(batch.page(page_align(address)).is_some());
    }

    /// Writer that accepts `accept` writes, then fails
    struct FailingWriter {
        accept: std::cell::Cell<usize>,
    }

    impl PutAddress for FailingWriter {
        fn put_address(&self, _addr: usize, _buf: &[u8]) -> std::io::Result<()> {
            match self.accept.get() {
                0 => Err(std::io::Error::other("write rejected")),
                n => {
                    self.accept.set(n - 1);
                    Ok(())
                }
            }
        }
    }

    #[test]
    fn test_failed_batch_write_leaves_no_stale_pages() {
        let mut cache = PageCache::new(Duration::from_secs(60));
        for page in [0x1000, 0x2000, 0x3000] {
            cache.insert(1, page, vec![0]);
        }
        let writer = FailingWriter {
            accept: std::cell::Cell::new(1),
        };
        let entries = [
            WriteEntry::new(0x1010, vec![1, 2]),
            WriteEntry::new(0x2010, vec![3, 4]),
        ];

        let err = execute_writes(&writer, &mut cache, 1, &entries).unwrap_err();
        assert!(matches!(err, MemoryError::WriteBatch(_)));
        // Written page and the page of the failed write are both dropped
        assert!(cache.get(1, 0x1000).is_none());
        assert!(cache.get(1, 0x2000).is_none());
        assert!(cache.get(1, 0x3000).is_some());
    }
}
