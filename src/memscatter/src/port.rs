//! Memory Access Port
//!
//! The narrow capability the engine reads through. A port wraps one
//! device or process-access session; it is driven through a
//! [`Session`](crate::Session), which serializes callers.

use crate::error::MemoryResult;
use crate::page::PAGE_SIZE;
use crate::value::FixedValue;
use std::collections::{BTreeSet, HashMap};

/// Process identifier on the target system
pub type Pid = u32;

/// One page returned by a batched fetch
#[derive(Debug, Clone)]
pub struct PageRead {
    pub data: Vec<u8>,
    pub success: bool,
}

/// Result of a batched page fetch, keyed by page-aligned address
#[derive(Debug, Clone, Default)]
pub struct PageBatch {
    pages: HashMap<u64, PageRead>,
}

impl PageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully fetched page
    pub fn insert(&mut self, page: u64, data: Vec<u8>) {
        self.pages.insert(
            page,
            PageRead {
                data,
                success: true,
            },
        );
    }

    /// Record a page the device could not read
    pub fn insert_failed(&mut self, page: u64) {
        self.pages.insert(
            page,
            PageRead {
                data: Vec::new(),
                success: false,
            },
        );
    }

    /// Bytes of a page, only if it was fetched successfully and is complete
    pub fn page(&self, page: u64) -> Option<&[u8]> {
        self.pages
            .get(&page)
            .filter(|p| p.success && p.data.len() == PAGE_SIZE as usize)
            .map(|p| p.data.as_slice())
    }

    pub fn get(&self, page: u64) -> Option<&PageRead> {
        self.pages.get(&page)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &PageRead)> {
        self.pages.iter().map(|(addr, page)| (*addr, page))
    }
}

/// One write in a scatter write batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEntry {
    pub address: u64,
    pub data: Vec<u8>,
}

impl WriteEntry {
    pub fn new(address: u64, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    /// Write the encoding of a fixed-width value
    pub fn value<T: FixedValue>(address: u64, value: &T) -> Self {
        Self::new(address, value.encode())
    }
}

/// Raw access to another process's virtual memory.
///
/// Implementations own the underlying device handle. Methods take
/// `&mut self`; concurrent use is arbitrated by the owning session.
pub trait MemoryPort: Send {
    /// Read one contiguous range. May return fewer bytes than requested;
    /// the session rejects short reads.
    fn read_buffer(
        &mut self,
        pid: Pid,
        address: u64,
        size: usize,
        use_cache: bool,
    ) -> MemoryResult<Vec<u8>>;

    /// Fetch a set of page-aligned pages in one round trip.
    ///
    /// Unreadable pages are reported per page. `Err` means the device call
    /// itself failed.
    fn read_pages(
        &mut self,
        pid: Pid,
        pages: &BTreeSet<u64>,
        use_cache: bool,
    ) -> MemoryResult<PageBatch>;

    /// Write one contiguous range
    fn write_buffer(&mut self, pid: Pid, address: u64, data: &[u8]) -> MemoryResult<()>;

    /// Write several ranges. Every entry is prepared before any is written;
    /// a preparation or execution failure fails the whole batch.
    fn write_batch(&mut self, pid: Pid, entries: &[WriteEntry]) -> MemoryResult<()>;

    /// Look up a process id by executable name
    fn process_id(&mut self, name: &str) -> MemoryResult<Pid>;

    /// Look up the base virtual address of a loaded module
    fn module_base(&mut self, pid: Pid, module: &str) -> MemoryResult<u64>;

    /// Release the device handle. Called once when the owning session ends.
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_batch_success_and_failure() {
        let mut batch = PageBatch::new();
        batch.insert(0x1000, vec![0xAA; PAGE_SIZE as usize]);
        batch.insert_failed(0x2000);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.page(0x1000).map(|p| p[0]), Some(0xAA));
        assert!(batch.page(0x2000).is_none());
        assert!(batch.get(0x2000).is_some());
        assert!(batch.page(0x3000).is_none());
    }

    #[test]
    fn test_page_batch_rejects_short_page() {
        let mut batch = PageBatch::new();
        batch.insert(0x1000, vec![0; 16]);
        assert!(batch.page(0x1000).is_none());
    }

    #[test]
    fn test_write_entry_value() {
        let entry = WriteEntry::value(0x4000, &0x1122_3344u32);
        assert_eq!(entry.address, 0x4000);
        assert_eq!(entry.data, vec![0x44, 0x33, 0x22, 0x11]);
    }
}
