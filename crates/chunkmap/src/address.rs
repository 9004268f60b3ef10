//! Conversions between pointers and addresses, and alignment of both.
//!
//! Addresses (`usize`) index the pagemap. Pointers carry provenance, and on
//! capability hardware also bounds and permissions, so every helper that
//! moves a pointer does so through `map_addr`/`with_addr` and never through an
//! integer round trip.

/// Address of a pointer.
#[inline(always)]
pub fn address_cast<T>(ptr: *const T) -> usize {
    ptr.addr()
}

/// Pointer with no provenance for `address`.
///
/// Such a pointer can be compared and stored but never dereferenced. Code that
/// needs a usable pointer rederives one through the chunk map instead.
#[inline(always)]
pub const fn pointer_cast<T>(address: usize) -> *mut T {
    core::ptr::without_provenance_mut(address)
}

/// `base` moved forward by `diff` bytes.
#[inline(always)]
pub fn pointer_offset<T>(base: *mut T, diff: usize) -> *mut T {
    base.cast::<u8>().wrapping_add(diff).cast()
}

/// Distance in bytes from `base` up to `cursor`.
#[inline(always)]
pub fn pointer_diff<T, U>(base: *const T, cursor: *const U) -> usize {
    cursor.addr().wrapping_sub(base.addr())
}

/// Whether both `p` and `size` are multiples of `ALIGN`.
#[inline(always)]
pub fn is_aligned_block<const ALIGN: usize>(p: *const u8, size: usize) -> bool {
    const { assert!(ALIGN.is_power_of_two()) };
    (p.addr() | size) & (ALIGN - 1) == 0
}

/// Round `p` down to a multiple of `GRANULE`, keeping its provenance.
#[inline(always)]
pub fn pointer_align_down<const GRANULE: usize, T>(p: *mut T) -> *mut T {
    const { assert!(GRANULE.is_power_of_two()) };
    p.map_addr(|a| a & !(GRANULE - 1))
}

/// Round `p` up to a multiple of `GRANULE`, keeping its provenance.
#[inline(always)]
pub fn pointer_align_up<const GRANULE: usize, T>(p: *mut T) -> *mut T {
    const { assert!(GRANULE.is_power_of_two()) };
    p.map_addr(|a| (a + (GRANULE - 1)) & !(GRANULE - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_pointer_down_and_up() {
        let p: *mut u8 = pointer_cast(0x1234_5678);
        assert_eq!(address_cast(pointer_align_down::<0x1000, u8>(p)), 0x1234_5000);
        assert_eq!(address_cast(pointer_align_up::<0x1000, u8>(p)), 0x1234_6000);

        let aligned: *mut u8 = pointer_cast(0x20_0000);
        assert_eq!(pointer_align_up::<0x20_0000, u8>(aligned), aligned);
        assert_eq!(pointer_align_down::<0x20_0000, u8>(aligned), aligned);
    }

    #[test]
    fn aligned_block_checks_base_and_length() {
        let p: *const u8 = pointer_cast(0x4000);
        assert!(is_aligned_block::<4096>(p, 8192));
        assert!(!is_aligned_block::<4096>(p, 100));
        assert!(!is_aligned_block::<4096>(pointer_cast::<u8>(0x4010), 4096));
    }

    #[test]
    fn offset_and_diff_round_trip() {
        let mut buf = [0u8; 64];
        let base = buf.as_mut_ptr();
        let q = pointer_offset(base, 40);
        assert_eq!(pointer_diff(base, q), 40);
        // Keeps provenance: the offset pointer is still usable.
        unsafe { q.write(7) };
        assert_eq!(buf[40], 7);
    }
}
