use crate::platform;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align `value` down to the previous multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if `value` is aligned to `align`.
#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// log2 of the smallest power of two that is `>= x`.
///
/// Returns `usize::BITS` for values above the largest representable power of
/// two rather than overflowing, so callers can reject them.
#[inline(always)]
pub const fn next_pow2_bits(x: usize) -> u32 {
    if x <= 1 {
        return 0;
    }
    usize::BITS - (x - 1).leading_zeros()
}

/// Smallest power of two that is `>= x`, or `None` if it does not fit.
#[inline(always)]
pub const fn next_pow2(x: usize) -> Option<usize> {
    x.checked_next_power_of_two()
}

/// Runtime page size, queried from the platform on first use.
static PAGE_SIZE_CACHED: AtomicUsize = AtomicUsize::new(0);

/// Get the system page size.
#[inline]
pub fn page_size() -> usize {
    let cached = PAGE_SIZE_CACHED.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let ps = platform::query_page_size();
    let ps = if ps.is_power_of_two() { ps } else { 4096 };
    PAGE_SIZE_CACHED.store(ps, Ordering::Relaxed);
    ps
}
