//! Memory session
//!
//! Owns a [`MemoryPort`] for its whole lifetime and serializes every call
//! into it. The port is closed exactly once, when the session is closed or
//! dropped.

use crate::error::{MemoryError, MemoryResult};
use crate::map::{ScatterMap, ScatterResults};
use crate::pointer::PointerValue;
use crate::port::{MemoryPort, Pid, WriteEntry};
use crate::value::FixedValue;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Serialized access to one device session
pub struct Session<P: MemoryPort> {
    port: Mutex<P>,
}

impl<P: MemoryPort> Session<P> {
    pub fn new(port: P) -> Self {
        debug!("memory session opened");
        Self {
            port: Mutex::new(port),
        }
    }

    /// Exclusive access to the port. Other callers block until the guard drops.
    pub fn lock(&self) -> MutexGuard<'_, P> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// End the session and release the port
    pub fn close(self) {
        drop(self);
    }

    pub fn process_id(&self, name: &str) -> MemoryResult<Pid> {
        self.lock().process_id(name)
    }

    pub fn module_base(&self, pid: Pid, module: &str) -> MemoryResult<u64> {
        self.lock().module_base(pid, module)
    }

    /// Execute a scatter map; the session is held for every round
    pub fn execute(&self, map: ScatterMap) -> MemoryResult<ScatterResults> {
        let mut port = self.lock();
        map.execute(&mut *port)
    }

    /// Read exactly `size` bytes
    pub fn read_buffer(
        &self,
        pid: Pid,
        address: u64,
        size: usize,
        use_cache: bool,
    ) -> MemoryResult<Vec<u8>> {
        let buf = self.lock().read_buffer(pid, address, size, use_cache)?;
        if buf.len() != size {
            return Err(MemoryError::IncompleteRead {
                address,
                requested: size,
                actual: buf.len(),
            });
        }
        Ok(buf)
    }

    pub fn read_value<T: FixedValue>(
        &self,
        pid: Pid,
        address: u64,
        use_cache: bool,
    ) -> MemoryResult<T> {
        let buf = self.read_buffer(pid, address, T::SIZE, use_cache)?;
        T::decode(&buf).ok_or(MemoryError::Decode {
            address,
            type_name: std::any::type_name::<T>(),
        })
    }

    /// Read a pointer, rejecting zero
    pub fn read_ptr(&self, pid: Pid, address: u64, use_cache: bool) -> MemoryResult<PointerValue> {
        let raw = self.read_value::<u64>(pid, address, use_cache)?;
        PointerValue::validate(raw, address)
    }

    /// Follow a pointer chain: at each step read the pointer stored at
    /// `current + offset`. Returns the last pointer read, or `address` when
    /// `offsets` is empty.
    pub fn read_ptr_chain(
        &self,
        pid: Pid,
        address: u64,
        offsets: &[u64],
        use_cache: bool,
    ) -> MemoryResult<u64> {
        let mut ptr = address;
        for (step, &offset) in offsets.iter().enumerate() {
            ptr = self
                .read_ptr(pid, ptr.wrapping_add(offset), use_cache)
                .map_err(|e| MemoryError::PointerChain {
                    step,
                    address: ptr,
                    offset,
                    source: Box::new(e),
                })?
                .address();
        }
        Ok(ptr)
    }

    /// Read `size` bytes and decode up to the first NUL as UTF-8
    pub fn read_string(
        &self,
        pid: Pid,
        address: u64,
        size: usize,
        use_cache: bool,
    ) -> MemoryResult<String> {
        let bytes = self.read_buffer(pid, address, size, use_cache)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn write_buffer(&self, pid: Pid, address: u64, data: &[u8]) -> MemoryResult<()> {
        self.lock().write_buffer(pid, address, data)
    }

    pub fn write_value<T: FixedValue>(&self, pid: Pid, address: u64, value: &T) -> MemoryResult<()> {
        self.write_buffer(pid, address, &value.encode())
    }

    /// All-or-nothing batch write. Any failure is reported as `WriteBatch`.
    pub fn write_batch(&self, pid: Pid, entries: &[WriteEntry]) -> MemoryResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.lock()
            .write_batch(pid, entries)
            .map_err(|e| match e {
                MemoryError::WriteBatch(_) => e,
                other => MemoryError::WriteBatch(other.to_string()),
            })
    }
}

impl<P: MemoryPort> Drop for Session<P> {
    fn drop(&mut self) {
        self.port
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        debug!("memory session closed");
    }
}
