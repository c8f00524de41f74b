//! Validated virtual addresses

use crate::error::{MemoryError, MemoryResult};
use crate::value::FixedValue;
use byteorder::{ByteOrder, LE};
use std::fmt;

/// A virtual address read out of the target process. Zero is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerValue(u64);

impl PointerValue {
    /// Wrap an address, rejecting zero
    pub fn new(address: u64) -> Option<Self> {
        (address != 0).then_some(Self(address))
    }

    /// Wrap an address, returning a `NullPointer` error for zero.
    /// `read_at` is the address the value was read from, for the error message.
    pub fn validate(address: u64, read_at: u64) -> MemoryResult<Self> {
        Self::new(address).ok_or(MemoryError::NullPointer(read_at))
    }

    pub fn address(self) -> u64 {
        self.0
    }

    /// Address plus a field offset
    pub fn offset(self, offset: u64) -> u64 {
        self.0.wrapping_add(offset)
    }
}

impl From<PointerValue> for u64 {
    fn from(ptr: PointerValue) -> Self {
        ptr.0
    }
}

impl fmt::Display for PointerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FixedValue for PointerValue {
    const SIZE: usize = 8;

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        Self::new(LE::read_u64(bytes))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_rejects_zero() {
        assert!(PointerValue::new(0).is_none());
        assert_eq!(PointerValue::new(0x1000).map(u64::from), Some(0x1000));
    }

    #[test]
    fn test_pointer_validate_reports_source_address() {
        match PointerValue::validate(0, 0x4030) {
            Err(MemoryError::NullPointer(at)) => assert_eq!(at, 0x4030),
            other => panic!("expected NullPointer, got {:?}", other),
        }
    }

    #[test]
    fn test_pointer_decode() {
        let bytes = 0x7FF6_0000_1000u64.to_le_bytes();
        let ptr = PointerValue::decode(&bytes).unwrap();
        assert_eq!(ptr.address(), 0x7FF6_0000_1000);
        assert_eq!(ptr.offset(0x30), 0x7FF6_0000_1030);

        assert!(PointerValue::decode(&[0u8; 8]).is_none());
        assert!(PointerValue::decode(&[1u8; 4]).is_none());
    }

    #[test]
    fn test_pointer_display() {
        let ptr = PointerValue::new(0x140000000).unwrap();
        assert_eq!(ptr.to_string(), "0x140000000");
    }
}
