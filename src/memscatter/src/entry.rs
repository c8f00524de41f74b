//! Scatter entries
//!
//! One deferred, typed read request. Entries are created through a
//! [`RoundBuilder`](crate::RoundBuilder) and live in the registry of the
//! map that owns them.

use crate::pointer::PointerValue;
use crate::value::FixedValue;
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;

/// Largest byte count a single entry may read
pub const MAX_ENTRY_SIZE: usize = i32::MAX as usize;

type Payload = Box<dyn Any + Send + Sync>;
type DecodeFn = fn(&[u8]) -> Option<Payload>;

/// Handle to an entry in a map's registry, usable as the address or size
/// source of an entry in a later round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef {
    pub(crate) index: usize,
    pub(crate) id: u32,
    pub(crate) round: usize,
}

impl EntryRef {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Ordinal of the round the entry was added to
    pub fn round(&self) -> usize {
        self.round
    }
}

/// Where an entry takes its base address from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    Literal(u64),
    Pointer(PointerValue),
    /// The decoded result of an entry from an earlier round
    Entry(EntryRef),
}

impl From<u64> for AddressSource {
    fn from(address: u64) -> Self {
        AddressSource::Literal(address)
    }
}

impl From<PointerValue> for AddressSource {
    fn from(ptr: PointerValue) -> Self {
        AddressSource::Pointer(ptr)
    }
}

impl From<EntryRef> for AddressSource {
    fn from(entry: EntryRef) -> Self {
        AddressSource::Entry(entry)
    }
}

/// Where a variable-length entry takes its byte count from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSource {
    Literal(usize),
    /// The decoded numeric result of an entry from an earlier round
    Entry(EntryRef),
}

impl From<usize> for SizeSource {
    fn from(size: usize) -> Self {
        SizeSource::Literal(size)
    }
}

impl From<EntryRef> for SizeSource {
    fn from(entry: EntryRef) -> Self {
        SizeSource::Entry(entry)
    }
}

/// Kind of payload an entry decodes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadTag {
    Value,
    Pointer,
    Text,
}

#[derive(Clone, Copy)]
pub(crate) enum PayloadKind {
    Value {
        width: usize,
        decode: DecodeFn,
        type_name: &'static str,
    },
    Pointer,
    Text,
}

impl PayloadKind {
    pub(crate) fn value<T: FixedValue>() -> Self {
        // Pointers read as values still get zero-pointer validation
        if TypeId::of::<T>() == TypeId::of::<PointerValue>() {
            return PayloadKind::Pointer;
        }
        PayloadKind::Value {
            width: T::SIZE,
            decode: decode_boxed::<T>,
            type_name: std::any::type_name::<T>(),
        }
    }
}

impl fmt::Debug for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Value {
                width, type_name, ..
            } => write!(f, "Value({}, {} bytes)", type_name, width),
            PayloadKind::Pointer => write!(f, "Pointer"),
            PayloadKind::Text => write!(f, "Text"),
        }
    }
}

fn decode_boxed<T: FixedValue>(bytes: &[u8]) -> Option<Payload> {
    T::decode(bytes).map(|v| Box::new(v) as Payload)
}

/// Why an entry failed. Recorded on the entry; never returned as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EntryFailure {
    #[error("address resolved to zero")]
    AddressResolution,

    #[error("size resolved to zero")]
    SizeResolution,

    #[error("page {page:#x} missing or unreadable")]
    PageFetch { page: u64 },

    #[error("assembled {copied} of {expected} bytes")]
    IncompleteAssembly { expected: usize, copied: usize },

    #[error("pointer value is zero")]
    PointerValidation,

    #[error("buffer could not be decoded")]
    Decode,
}

/// A single scatter read request and, after execution, its result
pub struct ScatterEntry {
    index: usize,
    id: u32,
    round: usize,
    address: AddressSource,
    offset: u64,
    size: SizeSource,
    kind: PayloadKind,
    resolved: bool,
    failure: Option<EntryFailure>,
    result: Option<Payload>,
}

impl fmt::Debug for ScatterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScatterEntry")
            .field("index", &self.index)
            .field("id", &self.id)
            .field("round", &self.round)
            .field("address", &self.address)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("kind", &self.kind)
            .field("failure", &self.failure)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}

impl ScatterEntry {
    pub(crate) fn new(
        at: EntryRef,
        address: AddressSource,
        offset: u64,
        size: SizeSource,
        kind: PayloadKind,
    ) -> Self {
        Self {
            index: at.index,
            id: at.id,
            round: at.round,
            address,
            offset,
            size,
            kind,
            resolved: false,
            failure: None,
            result: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn entry_ref(&self) -> EntryRef {
        EntryRef {
            index: self.index,
            id: self.id,
            round: self.round,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn address_source(&self) -> AddressSource {
        self.address
    }

    pub fn size_source(&self) -> SizeSource {
        self.size
    }

    pub fn tag(&self) -> PayloadTag {
        match self.kind {
            PayloadKind::Value { .. } => PayloadTag::Value,
            PayloadKind::Pointer => PayloadTag::Pointer,
            PayloadKind::Text => PayloadTag::Text,
        }
    }

    /// Rust type name of a fixed-width value payload
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            PayloadKind::Value { type_name, .. } => type_name,
            PayloadKind::Pointer => std::any::type_name::<PointerValue>(),
            PayloadKind::Text => std::any::type_name::<String>(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn failure(&self) -> Option<EntryFailure> {
        self.failure
    }

    /// Decoded result as `T`, if the entry succeeded and its payload is a `T`
    pub fn result_ref<T: Any>(&self) -> Option<&T> {
        if self.is_failed() {
            return None;
        }
        self.result.as_ref()?.downcast_ref::<T>()
    }

    /// Owned copy of [`result_ref`](Self::result_ref)
    pub fn result<T: Any + Clone>(&self) -> Option<T> {
        self.result_ref::<T>().cloned()
    }

    /// Width imposed by the payload type, if it has one
    pub(crate) fn fixed_width(&self) -> Option<usize> {
        match self.kind {
            PayloadKind::Value { width, .. } => Some(width),
            PayloadKind::Pointer => Some(PointerValue::SIZE),
            PayloadKind::Text => None,
        }
    }

    /// This entry's result read as an address: a pointer payload first,
    /// then a raw numeric one. Zero when unavailable.
    pub(crate) fn address_value(&self) -> u64 {
        if let Some(ptr) = self.result_ref::<PointerValue>() {
            return ptr.address();
        }
        if let Some(v) = self.result_ref::<u64>() {
            return *v;
        }
        self.result_ref::<usize>().map(|v| *v as u64).unwrap_or(0)
    }

    /// This entry's result read as a byte count. Zero when unavailable or
    /// not representable; oversized counts are rejected at resolution.
    pub(crate) fn size_value(&self) -> usize {
        if let Some(v) = self.result_ref::<i32>() {
            return usize::try_from(*v).unwrap_or(0);
        }
        if let Some(v) = self.result_ref::<u32>() {
            return *v as usize;
        }
        if let Some(v) = self.result_ref::<u64>() {
            return usize::try_from(*v).unwrap_or(0);
        }
        if let Some(v) = self.result_ref::<u16>() {
            return *v as usize;
        }
        self.result_ref::<usize>().copied().unwrap_or(0)
    }

    /// Cache the concrete address and size. Later calls keep the first values.
    pub(crate) fn apply_resolution(&mut self, address: u64, size: usize) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        self.address = AddressSource::Literal(address);
        self.size = SizeSource::Literal(size);

        let range_end = address
            .checked_add(self.offset)
            .and_then(|start| start.checked_add(size as u64));
        if address == 0 {
            self.set_failed(EntryFailure::AddressResolution);
        } else if size == 0 || size > MAX_ENTRY_SIZE {
            self.set_failed(EntryFailure::SizeResolution);
        } else if range_end.is_none() {
            self.set_failed(EntryFailure::AddressResolution);
        }
    }

    /// `(address + offset, size)` of a resolved, not-failed entry
    pub(crate) fn read_range(&self) -> Option<(u64, usize)> {
        if !self.resolved || self.is_failed() {
            return None;
        }
        match (self.address, self.size) {
            (AddressSource::Literal(address), SizeSource::Literal(size)) => {
                Some((address.wrapping_add(self.offset), size))
            }
            _ => None,
        }
    }

    /// Mark failed. The first failure wins and any result is dropped.
    pub(crate) fn set_failed(&mut self, failure: EntryFailure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
        self.result = None;
    }

    /// Decode an assembled buffer into this entry's payload type
    pub(crate) fn set_result(&mut self, buffer: Vec<u8>) {
        if self.is_failed() {
            return;
        }
        let decoded = match self.kind {
            PayloadKind::Value { width, decode, .. } => {
                if buffer.len() != width {
                    Err(EntryFailure::Decode)
                } else {
                    decode(&buffer).ok_or(EntryFailure::Decode)
                }
            }
            PayloadKind::Pointer => match u64::decode(&buffer) {
                None => Err(EntryFailure::Decode),
                Some(raw) => PointerValue::new(raw)
                    .map(|p| Box::new(p) as Payload)
                    .ok_or(EntryFailure::PointerValidation),
            },
            PayloadKind::Text => {
                let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
                let text = String::from_utf8_lossy(&buffer[..end]).into_owned();
                Ok(Box::new(text) as Payload)
            }
        };
        match decoded {
            Ok(payload) => self.result = Some(payload),
            Err(failure) => self.set_failed(failure),
        }
    }
}

/// Results registry shared by every round of a map: index -> id -> entry
#[derive(Debug, Default)]
pub(crate) struct Registry {
    buckets: Vec<BTreeMap<u32, ScatterEntry>>,
}

impl Registry {
    pub(crate) fn with_indexes(count: usize) -> Self {
        Self {
            buckets: (0..count).map(|_| BTreeMap::new()).collect(),
        }
    }

    pub(crate) fn index_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn bucket(&self, index: usize) -> Option<&BTreeMap<u32, ScatterEntry>> {
        self.buckets.get(index)
    }

    pub(crate) fn bucket_mut(&mut self, index: usize) -> Option<&mut BTreeMap<u32, ScatterEntry>> {
        self.buckets.get_mut(index)
    }

    pub(crate) fn get(&self, index: usize, id: u32) -> Option<&ScatterEntry> {
        self.buckets.get(index)?.get(&id)
    }

    pub(crate) fn get_mut(&mut self, index: usize, id: u32) -> Option<&mut ScatterEntry> {
        self.buckets.get_mut(index)?.get_mut(&id)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &ScatterEntry> {
        self.buckets.iter().flat_map(|b| b.values())
    }

    fn parse_addr(&self, entry: &ScatterEntry) -> u64 {
        match entry.address {
            AddressSource::Literal(address) => address,
            AddressSource::Pointer(ptr) => ptr.address(),
            AddressSource::Entry(dep) => self
                .get(dep.index, dep.id)
                .map(ScatterEntry::address_value)
                .unwrap_or(0),
        }
    }

    fn parse_size(&self, entry: &ScatterEntry) -> usize {
        if let Some(width) = entry.fixed_width() {
            return width;
        }
        match entry.size {
            SizeSource::Literal(size) => size,
            SizeSource::Entry(dep) => self
                .get(dep.index, dep.id)
                .map(ScatterEntry::size_value)
                .unwrap_or(0),
        }
    }

    /// Resolve an entry's address and size against earlier results. Cached
    /// after the first call.
    pub(crate) fn resolve(&mut self, index: usize, id: u32) -> Option<(u64, usize)> {
        let entry = self.get(index, id)?;
        let (address, size) = (self.parse_addr(entry), self.parse_size(entry));

        let entry = self.get_mut(index, id)?;
        entry.apply_resolution(address, size);
        match (entry.address, entry.size) {
            (AddressSource::Literal(a), SizeSource::Literal(s)) => Some((a, s)),
            _ => None,
        }
    }
}
