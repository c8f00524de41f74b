//! Fixed-width value codec
//!
//! Values read by reinterpreting a buffer of known width. All target
//! memory is little-endian.

use byteorder::{ByteOrder, LE};

/// A value with a fixed in-memory width that can be decoded from raw bytes.
///
/// Implement this for a `#[repr(C)]` struct to read it in one scatter entry:
///
/// ```
/// use memscatter::FixedValue;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Vector3 {
///     x: f32,
///     y: f32,
///     z: f32,
/// }
///
/// impl FixedValue for Vector3 {
///     const SIZE: usize = 12;
///
///     fn decode(bytes: &[u8]) -> Option<Self> {
///         if bytes.len() != Self::SIZE {
///             return None;
///         }
///         Some(Vector3 {
///             x: f32::decode(&bytes[0..4])?,
///             y: f32::decode(&bytes[4..8])?,
///             z: f32::decode(&bytes[8..12])?,
///         })
///     }
///
///     fn encode(&self) -> Vec<u8> {
///         [self.x.encode(), self.y.encode(), self.z.encode()].concat()
///     }
/// }
///
/// let v = Vector3 { x: 1.0, y: 2.0, z: 3.0 };
/// assert_eq!(Vector3::decode(&v.encode()), Some(v));
/// ```
pub trait FixedValue: Clone + Send + Sync + Sized + 'static {
    /// Width in bytes
    const SIZE: usize;

    /// Decode from exactly `SIZE` bytes; `None` on length mismatch or an
    /// invalid bit pattern
    fn decode(bytes: &[u8]) -> Option<Self>;

    /// Encode to `SIZE` bytes
    fn encode(&self) -> Vec<u8>;
}

macro_rules! fixed_value_le {
    ($($ty:ty => $read:path),* $(,)?) => {
        $(
            impl FixedValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn decode(bytes: &[u8]) -> Option<Self> {
                    if bytes.len() != Self::SIZE {
                        return None;
                    }
                    Some($read(bytes))
                }

                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

fixed_value_le! {
    u16 => LE::read_u16,
    u32 => LE::read_u32,
    u64 => LE::read_u64,
    i16 => LE::read_i16,
    i32 => LE::read_i32,
    i64 => LE::read_i64,
    f32 => LE::read_f32,
    f64 => LE::read_f64,
}

impl FixedValue for u8 {
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b] => Some(*b),
            _ => None,
        }
    }

    fn encode(&self) -> Vec<u8> {
        vec![*self]
    }
}

impl FixedValue for i8 {
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Option<Self> {
        u8::decode(bytes).map(|b| b as i8)
    }

    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl FixedValue for bool {
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Option<Self> {
        u8::decode(bytes).map(|b| b != 0)
    }

    fn encode(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }
}

// Target processes are assumed 64-bit.
impl FixedValue for usize {
    const SIZE: usize = 8;

    fn decode(bytes: &[u8]) -> Option<Self> {
        u64::decode(bytes).and_then(|v| usize::try_from(v).ok())
    }

    fn encode(&self) -> Vec<u8> {
        (*self as u64).to_le_bytes().to_vec()
    }
}

impl<const N: usize> FixedValue for [u8; N] {
    const SIZE: usize = N;

    fn decode(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok()
    }

    fn encode(&self) -> Vec<u8> {
        self.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_little_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(u64::decode(&bytes), Some(0x0807060504030201));
        assert_eq!(u32::decode(&bytes[..4]), Some(0x04030201));
        assert_eq!(u16::decode(&bytes[..2]), Some(0x0201));
        assert_eq!(u8::decode(&bytes[..1]), Some(0x01));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert_eq!(u64::decode(&[0u8; 4]), None);
        assert_eq!(i32::decode(&[0u8; 8]), None);
        assert_eq!(u8::decode(&[]), None);
        assert_eq!(<[u8; 4]>::decode(&[1, 2, 3]), None);
    }

    #[test]
    fn test_signed_and_float() {
        assert_eq!(i32::decode(&(-5i32).to_le_bytes()), Some(-5));
        assert_eq!(i8::decode(&[0xFF]), Some(-1));
        assert_eq!(f32::decode(&1.5f32.to_le_bytes()), Some(1.5));
        assert_eq!(f64::decode(&(-2.25f64).encode()), Some(-2.25));
    }

    #[test]
    fn test_bool_and_arrays() {
        assert_eq!(bool::decode(&[0]), Some(false));
        assert_eq!(bool::decode(&[7]), Some(true));
        assert_eq!(<[u8; 3]>::decode(&[9, 8, 7]), Some([9, 8, 7]));
        assert_eq!([1u8, 2].encode(), vec![1, 2]);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(u64::SIZE, 8);
        assert_eq!(i16::SIZE, 2);
        assert_eq!(f32::SIZE, 4);
        assert_eq!(usize::SIZE, 8);
        assert_eq!(<[u8; 16]>::SIZE, 16);
    }
}
