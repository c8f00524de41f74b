//! In-memory port for tests
//!
//! A sparse, page-granular address space. Pages come into existence when
//! bytes are written to them; everything else is unmapped. The mock records
//! every batched fetch so tests can assert on coalescing.

use crate::error::{MemoryError, MemoryResult};
use crate::page::{byte_offset, page_align, pages_for, PAGE_SIZE};
use crate::port::{MemoryPort, PageBatch, Pid, WriteEntry};
use crate::value::FixedValue;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A mock memory port backed by a page map. Ignores pids for memory access.
#[derive(Debug, Default)]
pub struct MockPort {
    pages: HashMap<u64, Vec<u8>>,
    failed_pages: HashSet<u64>,
    protected_pages: HashSet<u64>,
    device_failure: bool,
    fetches: Vec<Vec<u64>>,
    cache_flags: Vec<bool>,
    processes: HashMap<String, Pid>,
    modules: HashMap<(Pid, String), u64>,
    closed: Arc<AtomicBool>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes, mapping any pages they touch
    pub fn put_bytes(&mut self, address: u64, data: &[u8]) {
        let mut written = 0;
        let mut offset = byte_offset(address);
        for page in pages_for(address, data.len()) {
            let count = (data.len() - written).min(PAGE_SIZE as usize - offset);
            let buf = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![0; PAGE_SIZE as usize]);
            buf[offset..offset + count].copy_from_slice(&data[written..written + count]);
            written += count;
            offset = 0;
        }
    }

    pub fn put_value<T: FixedValue>(&mut self, address: u64, value: &T) {
        self.put_bytes(address, &value.encode());
    }

    /// Map an all-zero page
    pub fn map_page(&mut self, page: u64) {
        self.pages
            .entry(page_align(page))
            .or_insert_with(|| vec![0; PAGE_SIZE as usize]);
    }

    /// Current contents of a range, if every page is mapped and readable
    pub fn bytes(&self, address: u64, size: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(size);
        let mut offset = byte_offset(address);
        for page in pages_for(address, size) {
            if self.failed_pages.contains(&page) {
                return None;
            }
            let data = self.pages.get(&page)?;
            let count = (size - out.len()).min(PAGE_SIZE as usize - offset);
            out.extend_from_slice(&data[offset..offset + count]);
            offset = 0;
        }
        Some(out)
    }

    /// Report this page as unreadable in batched fetches
    pub fn fail_page(&mut self, page: u64) {
        self.failed_pages.insert(page_align(page));
    }

    /// Reject writes touching this page
    pub fn protect_page(&mut self, page: u64) {
        self.protected_pages.insert(page_align(page));
    }

    /// Make every device call fail
    pub fn fail_device(&mut self, fail: bool) {
        self.device_failure = fail;
    }

    pub fn add_process(&mut self, name: &str, pid: Pid) {
        self.processes.insert(name.to_lowercase(), pid);
    }

    pub fn add_module(&mut self, pid: Pid, module: &str, base: u64) {
        self.modules.insert((pid, module.to_lowercase()), base);
    }

    /// Page sets requested by each batched fetch, in ascending order
    pub fn fetches(&self) -> &[Vec<u64>] {
        &self.fetches
    }

    /// Cache flag passed to each batched fetch
    pub fn cache_flags(&self) -> &[bool] {
        &self.cache_flags
    }

    /// Set once `close` has been called
    pub fn close_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    fn check_device(&self) -> MemoryResult<()> {
        if self.device_failure {
            return Err(MemoryError::Device("mock device failure".to_string()));
        }
        Ok(())
    }

    fn writable(&self, address: u64, size: usize) -> bool {
        pages_for(address, size)
            .all(|page| self.pages.contains_key(&page) && !self.protected_pages.contains(&page))
    }
}

impl MemoryPort for MockPort {
    fn read_buffer(
        &mut self,
        _pid: Pid,
        address: u64,
        size: usize,
        _use_cache: bool,
    ) -> MemoryResult<Vec<u8>> {
        self.check_device()?;
        self.bytes(address, size).ok_or_else(|| {
            MemoryError::Device(format!("unreadable range {:#x}+{:#x}", address, size))
        })
    }

    fn read_pages(
        &mut self,
        _pid: Pid,
        pages: &BTreeSet<u64>,
        use_cache: bool,
    ) -> MemoryResult<PageBatch> {
        self.check_device()?;
        self.fetches.push(pages.iter().copied().collect());
        self.cache_flags.push(use_cache);

        let mut batch = PageBatch::new();
        for &page in pages {
            match self.pages.get(&page) {
                Some(data) if !self.failed_pages.contains(&page) => batch.insert(page, data.clone()),
                _ => batch.insert_failed(page),
            }
        }
        Ok(batch)
    }

    fn write_buffer(&mut self, _pid: Pid, address: u64, data: &[u8]) -> MemoryResult<()> {
        self.check_device()?;
        if !self.writable(address, data.len()) {
            return Err(MemoryError::Device(format!(
                "write of {} bytes at {:#x} rejected",
                data.len(),
                address
            )));
        }
        self.put_bytes(address, data);
        Ok(())
    }

    fn write_batch(&mut self, _pid: Pid, entries: &[WriteEntry]) -> MemoryResult<()> {
        for entry in entries {
            if entry.address == 0
                || entry.data.is_empty()
                || !self.writable(entry.address, entry.data.len())
            {
                return Err(MemoryError::WriteBatch(format!(
                    "failed to prepare write at {:#x}",
                    entry.address
                )));
            }
        }
        if self.device_failure {
            return Err(MemoryError::WriteBatch("execution failed".to_string()));
        }
        for entry in entries {
            self.put_bytes(entry.address, &entry.data);
        }
        Ok(())
    }

    fn process_id(&mut self, name: &str) -> MemoryResult<Pid> {
        self.processes
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| MemoryError::ProcessNotFound(name.to_string()))
    }

    fn module_base(&mut self, pid: Pid, module: &str) -> MemoryResult<u64> {
        self.modules
            .get(&(pid, module.to_lowercase()))
            .copied()
            .ok_or_else(|| MemoryError::ModuleNotFound {
                pid,
                module: module.to_string(),
            })
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_put_and_read_across_pages() {
        let mut port = MockPort::new();
        port.put_bytes(0x1FFE, &[1, 2, 3, 4]);
        assert_eq!(port.bytes(0x1FFE, 4), Some(vec![1, 2, 3, 4]));
        assert_eq!(port.read_buffer(1, 0x1FFF, 2, true).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_mock_unmapped_read_fails() {
        let mut port = MockPort::new();
        port.put_bytes(0x1000, &[1]);
        assert!(port.read_buffer(1, 0x1FFF, 2, true).is_err());
        assert!(port.bytes(0x5000, 1).is_none());
    }

    #[test]
    fn test_mock_read_pages_reports_each_page() {
        let mut port = MockPort::new();
        port.map_page(0x1000);
        port.map_page(0x2000);
        port.fail_page(0x2000);

        let pages: BTreeSet<u64> = [0x1000, 0x2000, 0x3000].into_iter().collect();
        let batch = port.read_pages(1, &pages, false).unwrap();
        assert!(batch.page(0x1000).is_some());
        assert!(batch.page(0x2000).is_none());
        assert!(batch.page(0x3000).is_none());
        assert_eq!(port.fetches(), &[vec![0x1000, 0x2000, 0x3000]]);
        assert_eq!(port.cache_flags(), &[false]);
    }

    #[test]
    fn test_mock_write_batch_is_all_or_nothing() {
        let mut port = MockPort::new();
        port.map_page(0x1000);
        port.map_page(0x2000);
        port.protect_page(0x2000);

        let entries = vec![
            WriteEntry::value(0x1000, &7u32),
            WriteEntry::value(0x2000, &8u32),
        ];
        assert!(matches!(
            port.write_batch(1, &entries),
            Err(MemoryError::WriteBatch(_))
        ));
        assert_eq!(port.bytes(0x1000, 4), Some(vec![0; 4]));
    }

    #[test]
    fn test_mock_lookups() {
        let mut port = MockPort::new();
        port.add_process("Game.exe", 1234);
        port.add_module(1234, "Game.exe", 0x140000000);

        assert_eq!(port.process_id("game.exe").unwrap(), 1234);
        assert_eq!(port.module_base(1234, "GAME.EXE").unwrap(), 0x140000000);
        assert!(matches!(
            port.process_id("other.exe"),
            Err(MemoryError::ProcessNotFound(_))
        ));
        assert!(matches!(
            port.module_base(1, "Game.exe"),
            Err(MemoryError::ModuleNotFound { pid: 1, .. })
        ));
    }
}
