//! Page math
//!
//! Pure helpers for splitting virtual address ranges into the fixed-size
//! pages a scatter fetch operates on.

/// Size of one device page (4KB)
pub const PAGE_SIZE: u64 = 0x1000;

const PAGE_SHIFT: u32 = 12;

/// Round an address down to the start of its page
#[inline]
pub fn page_align(address: u64) -> u64 {
    address & !(PAGE_SIZE - 1)
}

/// Byte offset of an address within its page
#[inline]
pub fn byte_offset(address: u64) -> usize {
    (address & (PAGE_SIZE - 1)) as usize
}

/// Number of pages covered by `[address, address + size)`
#[inline]
pub fn span_pages(address: u64, size: usize) -> usize {
    // Widened so a size near usize::MAX cannot overflow
    let end = byte_offset(address) as u128 + size as u128 + (PAGE_SIZE - 1) as u128;
    usize::try_from(end >> PAGE_SHIFT).unwrap_or(usize::MAX)
}

/// Page-aligned base addresses covered by `[address, address + size)`, in
/// ascending order. Stops at the top of the address space instead of
/// wrapping to page 0.
pub fn pages_for(address: u64, size: usize) -> impl Iterator<Item = u64> {
    let base = page_align(address);
    (0..span_pages(address, size) as u64)
        .map_while(move |p| p.checked_mul(PAGE_SIZE).and_then(|o| base.checked_add(o)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_align() {
        assert_eq!(page_align(0x1000), 0x1000);
        assert_eq!(page_align(0x1FFF), 0x1000);
        assert_eq!(page_align(0x7FF6_1234_5678), 0x7FF6_1234_5000);
    }

    #[test]
    fn test_byte_offset() {
        assert_eq!(byte_offset(0x1000), 0);
        assert_eq!(byte_offset(0x1008), 8);
        assert_eq!(byte_offset(0x1FFC), 0xFFC);
    }

    #[test]
    fn test_span_pages_within_page() {
        assert_eq!(span_pages(0x1000, 8), 1);
        assert_eq!(span_pages(0x1008, 8), 1);
        assert_eq!(span_pages(0x1000, 0x1000), 1);
    }

    #[test]
    fn test_span_pages_across_boundary() {
        assert_eq!(span_pages(0x1FFC, 8), 2);
        assert_eq!(span_pages(0x1FFC, 4), 1);
        assert_eq!(span_pages(0x1001, 0x1000), 2);
        assert_eq!(span_pages(0x1800, 0x2000), 3);
    }

    #[test]
    fn test_pages_for_lists_each_page() {
        let pages: Vec<u64> = pages_for(0x1FFC, 8).collect();
        assert_eq!(pages, vec![0x1000, 0x2000]);

        let pages: Vec<u64> = pages_for(0x1800, 0x2000).collect();
        assert_eq!(pages, vec![0x1000, 0x2000, 0x3000]);
    }

    #[test]
    fn test_span_pages_huge_size_does_not_overflow() {
        assert_eq!(span_pages(0x1FFC, usize::MAX), (usize::MAX >> 12) + 2);
        assert_eq!(span_pages(0, usize::MAX), (usize::MAX >> 12) + 1);
    }

    #[test]
    fn test_pages_for_never_wraps_to_page_zero() {
        let pages: Vec<u64> = pages_for(0xFFFF_FFFF_FFFF_FFFC, 8).collect();
        assert_eq!(pages, vec![0xFFFF_FFFF_FFFF_F000]);
    }
}
