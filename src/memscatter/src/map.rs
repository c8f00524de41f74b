//! Scatter maps
//!
//! A map is an ordered list of rounds sharing one results registry. Rounds
//! run strictly in order so entries can use results from earlier rounds as
//! their address or size.
//!
//! ```
//! use memscatter::mock::MockPort;
//! use memscatter::{PointerValue, ScatterMap, Session};
//!
//! # fn main() -> Result<(), memscatter::MemoryError> {
//! let mut port = MockPort::new();
//! port.put_value(0x14000_0100, &0x2000_0000u64);
//! port.put_value(0x2000_0030, &42u32);
//! let session = Session::new(port);
//!
//! let mut map = ScatterMap::new(1);
//! let world = map.add_round(1, true).add_pointer(0, 0, 0x14000_0100u64, 0)?;
//! map.add_round(1, true).add_value::<u32>(0, 1, world, 0x30)?;
//!
//! let results = session.execute(map)?;
//! assert_eq!(results.pointer(0, 0).map(PointerValue::address), Some(0x2000_0000));
//! assert_eq!(results.get::<u32>(0, 1), Some(42));
//! # Ok(())
//! # }
//! ```

use crate::entry::{
    AddressSource, EntryFailure, EntryRef, PayloadKind, Registry, ScatterEntry, SizeSource,
};
use crate::error::{MemoryError, MemoryResult};
use crate::pointer::PointerValue;
use crate::port::{MemoryPort, Pid};
use crate::round::ScatterRound;
use crate::value::FixedValue;
use std::any::Any;
use tracing::debug;

/// Totals for one map execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScatterStats {
    pub rounds: usize,
    pub entries: usize,
    pub pages_requested: usize,
    pub failed: usize,
}

/// Multi-round scatter read plan
#[derive(Debug)]
pub struct ScatterMap {
    rounds: Vec<ScatterRound>,
    registry: Registry,
}

impl ScatterMap {
    /// Create a map whose registry holds `index_count` index buckets
    pub fn new(index_count: usize) -> Self {
        Self {
            rounds: Vec::new(),
            registry: Registry::with_indexes(index_count),
        }
    }

    pub fn index_count(&self) -> usize {
        self.registry.index_count()
    }

    pub fn rounds(&self) -> &[ScatterRound] {
        &self.rounds
    }

    /// Append a round. Each round is one batched fetch; add another round
    /// whenever a read depends on an earlier read's result.
    pub fn add_round(&mut self, pid: Pid, use_cache: bool) -> RoundBuilder<'_> {
        self.rounds.push(ScatterRound::new(pid, use_cache));
        let round = self.rounds.len() - 1;
        RoundBuilder { map: self, round }
    }

    /// Reopen an existing round to add more entries
    pub fn round(&mut self, round: usize) -> Option<RoundBuilder<'_>> {
        (round < self.rounds.len()).then(|| RoundBuilder { map: self, round })
    }

    /// Run every round in order.
    ///
    /// Consumes the map; results are read-only afterwards. A device failure
    /// aborts the remaining rounds and is returned as the error.
    pub fn execute(mut self, port: &mut dyn MemoryPort) -> MemoryResult<ScatterResults> {
        let mut stats = ScatterStats::default();
        for round in &self.rounds {
            let round_stats = round.run(&mut self.registry, port)?;
            stats.rounds += 1;
            stats.entries += round_stats.entries;
            stats.pages_requested += round_stats.pages;
            stats.failed += round_stats.failed;
        }
        debug!(
            rounds = stats.rounds,
            entries = stats.entries,
            pages = stats.pages_requested,
            failed = stats.failed,
            "scatter map executed"
        );
        Ok(ScatterResults {
            registry: self.registry,
            stats,
        })
    }

    fn check_reference(&self, dep: EntryRef, current: usize) -> MemoryResult<()> {
        let entry = self
            .registry
            .get(dep.index, dep.id)
            .ok_or(MemoryError::UnknownReference {
                index: dep.index,
                id: dep.id,
            })?;
        let round = entry.entry_ref().round;
        if round >= current {
            return Err(MemoryError::SameRoundReference {
                index: dep.index,
                id: dep.id,
                round,
                current,
            });
        }
        Ok(())
    }

    fn insert(
        &mut self,
        at: EntryRef,
        address: AddressSource,
        size: SizeSource,
        offset: u64,
        kind: PayloadKind,
    ) -> MemoryResult<EntryRef> {
        let EntryRef { index, id, round } = at;
        let count = self.registry.index_count();
        let bucket = self
            .registry
            .bucket(index)
            .ok_or(MemoryError::IndexOutOfRange { index, count })?;
        if bucket.contains_key(&id) {
            return Err(MemoryError::DuplicateEntry { index, id });
        }
        if let AddressSource::Entry(dep) = address {
            self.check_reference(dep, round)?;
        }
        if let SizeSource::Entry(dep) = size {
            self.check_reference(dep, round)?;
        }

        let entry = ScatterEntry::new(at, address, offset, size, kind);
        if let Some(bucket) = self.registry.bucket_mut(index) {
            bucket.insert(id, entry);
        }
        self.rounds[round].push(index, id);
        Ok(at)
    }
}

/// Adds entries to one round of a [`ScatterMap`]
pub struct RoundBuilder<'a> {
    map: &'a mut ScatterMap,
    round: usize,
}

impl RoundBuilder<'_> {
    /// Ordinal of this round in the map
    pub fn round(&self) -> usize {
        self.round
    }

    fn at(&self, index: usize, id: u32) -> EntryRef {
        EntryRef {
            index,
            id,
            round: self.round,
        }
    }

    /// Read a fixed-width value of type `T` at `address + offset`
    pub fn add_value<T: FixedValue>(
        &mut self,
        index: usize,
        id: u32,
        address: impl Into<AddressSource>,
        offset: u64,
    ) -> MemoryResult<EntryRef> {
        let at = self.at(index, id);
        self.map.insert(
            at,
            address.into(),
            SizeSource::Literal(T::SIZE),
            offset,
            PayloadKind::value::<T>(),
        )
    }

    /// Read a pointer at `address + offset`; a zero value fails the entry
    pub fn add_pointer(
        &mut self,
        index: usize,
        id: u32,
        address: impl Into<AddressSource>,
        offset: u64,
    ) -> MemoryResult<EntryRef> {
        let at = self.at(index, id);
        self.map.insert(
            at,
            address.into(),
            SizeSource::Literal(PointerValue::SIZE),
            offset,
            PayloadKind::Pointer,
        )
    }

    /// Read `size` bytes at `address + offset` as NUL-terminated text
    pub fn add_text(
        &mut self,
        index: usize,
        id: u32,
        address: impl Into<AddressSource>,
        size: impl Into<SizeSource>,
        offset: u64,
    ) -> MemoryResult<EntryRef> {
        let at = self.at(index, id);
        self.map.insert(
            at,
            address.into(),
            size.into(),
            offset,
            PayloadKind::Text,
        )
    }
}

/// Read-only registry of an executed map
#[derive(Debug)]
pub struct ScatterResults {
    registry: Registry,
    stats: ScatterStats,
}

impl ScatterResults {
    pub fn stats(&self) -> ScatterStats {
        self.stats
    }

    pub fn index_count(&self) -> usize {
        self.registry.index_count()
    }

    pub fn entry(&self, index: usize, id: u32) -> Option<&ScatterEntry> {
        self.registry.get(index, id)
    }

    pub fn lookup(&self, entry: EntryRef) -> Option<&ScatterEntry> {
        self.registry.get(entry.index, entry.id)
    }

    /// Entries of one index bucket, ordered by id
    pub fn index(&self, index: usize) -> impl Iterator<Item = &ScatterEntry> {
        self.registry
            .bucket(index)
            .into_iter()
            .flat_map(|bucket| bucket.values())
    }

    /// Every entry, by index then id
    pub fn iter(&self) -> impl Iterator<Item = &ScatterEntry> {
        self.registry.entries()
    }

    /// Typed result; `None` if absent, failed, or not a `T`
    pub fn get<T: Any + Clone>(&self, index: usize, id: u32) -> Option<T> {
        self.entry(index, id)?.result::<T>()
    }

    pub fn get_ref<T: Any>(&self, index: usize, id: u32) -> Option<&T> {
        self.entry(index, id)?.result_ref::<T>()
    }

    pub fn pointer(&self, index: usize, id: u32) -> Option<PointerValue> {
        self.get::<PointerValue>(index, id)
    }

    pub fn text(&self, index: usize, id: u32) -> Option<&str> {
        self.get_ref::<String>(index, id).map(String::as_str)
    }

    /// True if the entry failed or does not exist
    pub fn is_failed(&self, index: usize, id: u32) -> bool {
        self.entry(index, id).map_or(true, ScatterEntry::is_failed)
    }

    pub fn failure(&self, index: usize, id: u32) -> Option<EntryFailure> {
        self.entry(index, id)?.failure()
    }
}
