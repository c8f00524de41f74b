//! Scatter rounds
//!
//! A round resolves its entries, coalesces every range they cover into a
//! set of unique pages, issues exactly one batched page fetch and then
//! assembles and decodes each entry independently.

use crate::entry::{EntryFailure, Registry};
use crate::error::MemoryResult;
use crate::page::{byte_offset, pages_for, PAGE_SIZE};
use crate::port::{MemoryPort, PageBatch, Pid};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

/// Counters for one executed round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub entries: usize,
    pub pages: usize,
    pub failed: usize,
}

/// One batched fetch worth of entries
#[derive(Debug, Clone)]
pub struct ScatterRound {
    pid: Pid,
    use_cache: bool,
    keys: Vec<(usize, u32)>,
}

impl ScatterRound {
    pub(crate) fn new(pid: Pid, use_cache: bool) -> Self {
        Self {
            pid,
            use_cache,
            keys: Vec::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn push(&mut self, index: usize, id: u32) {
        self.keys.push((index, id));
    }

    /// Execute the round against `port`. Only a failing device call is an
    /// error; everything else is recorded on the entries.
    pub(crate) fn run(
        &self,
        registry: &mut Registry,
        port: &mut dyn MemoryPort,
    ) -> MemoryResult<RoundStats> {
        for &(index, id) in &self.keys {
            registry.resolve(index, id);
        }

        let pages = self.collect_pages(registry);
        let batch = if pages.is_empty() {
            PageBatch::new()
        } else {
            port.read_pages(self.pid, &pages, self.use_cache)
                .inspect_err(|e| {
                    warn!(pid = self.pid, pages = pages.len(), "page fetch failed: {}", e)
                })?
        };

        let mut stats = RoundStats {
            entries: self.keys.len(),
            pages: pages.len(),
            failed: 0,
        };

        for &(index, id) in &self.keys {
            let Some(entry) = registry.get_mut(index, id) else {
                continue;
            };
            if let Some((address, size)) = entry.read_range() {
                match assemble(&batch, address, size) {
                    Ok(buffer) => entry.set_result(buffer),
                    Err(failure) => entry.set_failed(failure),
                }
            }
            if let Some(failure) = entry.failure() {
                trace!(index, id, %failure, "entry failed");
                stats.failed += 1;
            }
        }

        debug!(
            pid = self.pid,
            entries = stats.entries,
            pages = stats.pages,
            failed = stats.failed,
            "scatter round complete"
        );
        Ok(stats)
    }

    /// Unique pages needed by every entry still eligible for a read
    fn collect_pages(&self, registry: &Registry) -> BTreeSet<u64> {
        self.keys
            .iter()
            .filter_map(|&(index, id)| registry.get(index, id)?.read_range())
            .flat_map(|(address, size)| pages_for(address, size))
            .collect()
    }
}

/// Copy `[address, address + size)` out of a fetched page batch.
///
/// Fails if any page the range needs is missing or unsuccessful; a partial
/// buffer is never returned.
pub(crate) fn assemble(
    batch: &PageBatch,
    address: u64,
    size: usize,
) -> Result<Vec<u8>, EntryFailure> {
    let mut buffer = vec![0u8; size];
    let mut copied = 0usize;
    let mut page_offset = byte_offset(address);

    for page in pages_for(address, size) {
        let data = batch.page(page).ok_or(EntryFailure::PageFetch { page })?;
        let count = (size - copied).min(PAGE_SIZE as usize - page_offset);
        let src = data
            .get(page_offset..page_offset + count)
            .ok_or(EntryFailure::PageFetch { page })?;
        buffer[copied..copied + count].copy_from_slice(src);
        copied += count;
        page_offset = 0;
    }

    if copied != size {
        return Err(EntryFailure::IncompleteAssembly {
            expected: size,
            copied,
        });
    }
    Ok(buffer)
}
