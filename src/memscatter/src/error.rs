//! Error types for memscatter
//!
//! `MemoryError` covers failures that abort an operation. Per-entry
//! scatter failures never surface here; they are recorded on the entry
//! as an [`EntryFailure`](crate::EntryFailure).

use crate::port::Pid;

/// Errors returned by sessions, ports and map construction
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Device failure: {0}")]
    Device(String),

    #[error("Scatter write failed: {0}")]
    WriteBatch(String),

    #[error("Incomplete read at {address:#x}: requested {requested} bytes, got {actual}")]
    IncompleteRead {
        address: u64,
        requested: usize,
        actual: usize,
    },

    #[error("Null pointer read at {0:#x}")]
    NullPointer(u64),

    #[error("Pointer chain failed at step {step} ({address:#x} + {offset:#x})")]
    PointerChain {
        step: usize,
        address: u64,
        offset: u64,
        #[source]
        source: Box<MemoryError>,
    },

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Module '{module}' not found in process {pid}")]
    ModuleNotFound { pid: Pid, module: String },

    #[error("Index {index} out of range (map declares {count} indexes)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Entry {id} already exists in index {index}")]
    DuplicateEntry { index: usize, id: u32 },

    #[error("Entry ({index}, {id}) does not exist")]
    UnknownReference { index: usize, id: u32 },

    #[error("Entry ({index}, {id}) belongs to round {round}, which does not run before round {current}")]
    SameRoundReference {
        index: usize,
        id: u32,
        round: usize,
        current: usize,
    },

    #[error("Failed to decode {type_name} at {address:#x}")]
    Decode {
        address: u64,
        type_name: &'static str,
    },
}

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_incomplete_read() {
        let err = MemoryError::IncompleteRead {
            address: 0x1000,
            requested: 8,
            actual: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x1000"));
        assert!(msg.contains("8"));
        assert!(msg.contains("4"));
    }

    #[test]
    fn test_error_pointer_chain_keeps_source() {
        use std::error::Error;

        let err = MemoryError::PointerChain {
            step: 2,
            address: 0x2000,
            offset: 0x30,
            source: Box::new(MemoryError::NullPointer(0x2030)),
        };
        assert!(err.to_string().contains("step 2"));
        let source = err.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("0x2030"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MemoryError>();
    }
}
