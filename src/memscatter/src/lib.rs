//! # memscatter
//!
//! Batched reads of another process's virtual memory through a narrow
//! page-fetch capability.
//!
//! This library provides:
//! - A scatter-read engine that coalesces many small reads into one fetch
//!   of unique pages per round
//! - Multi-round maps where later reads take their address or size from
//!   earlier results (pointer chasing)
//! - Per-entry failure isolation: a bad read never aborts its neighbours
//! - A serialized [`Session`] for single-address reads, writes and pointer
//!   chains
//!
//! ## Module Structure
//!
//! - `page` - page alignment math
//! - `port` - the [`MemoryPort`] trait a device implements
//! - `entry` - scatter entries and their address/size sources
//! - `round` - one coalesced page fetch
//! - `map` - ordered rounds and the results registry
//! - `session` - scoped, serialized ownership of a port
//! - `mock` - in-memory port for tests

pub mod entry;
pub mod error;
pub mod map;
pub mod mock;
pub mod page;
pub mod pointer;
pub mod port;
pub mod round;
pub mod session;
pub mod value;

#[doc(inline)]
pub use entry::{
    AddressSource, EntryFailure, EntryRef, PayloadTag, ScatterEntry, SizeSource, MAX_ENTRY_SIZE,
};
#[doc(inline)]
pub use error::{MemoryError, MemoryResult};
#[doc(inline)]
pub use map::{RoundBuilder, ScatterMap, ScatterResults, ScatterStats};
#[doc(inline)]
pub use page::{byte_offset, page_align, span_pages, PAGE_SIZE};
#[doc(inline)]
pub use pointer::PointerValue;
#[doc(inline)]
pub use port::{MemoryPort, PageBatch, PageRead, Pid, WriteEntry};
#[doc(inline)]
pub use round::{RoundStats, ScatterRound};
#[doc(inline)]
pub use session::Session;
#[doc(inline)]
pub use value::FixedValue;
