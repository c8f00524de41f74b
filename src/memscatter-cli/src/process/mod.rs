//! Live process access
//!
//! Discovery of processes and modules through `/proc` and `sysinfo`, and a
//! `MemoryPort` that reads and writes their memory.

mod lookup;
mod port;
mod region;

pub use lookup::module_size;
pub use port::ProcessPort;
