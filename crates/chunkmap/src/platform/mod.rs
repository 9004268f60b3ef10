//! Operating-system hooks the chunk map needs: reserving address space,
//! committing and returning pages, and dying loudly.

use crate::error::PagemapError;
use crate::util::{align_up, page_size};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod linux;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux as sys;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub use macos as sys;

#[cfg(target_os = "windows")]
pub mod windows;
#[cfg(target_os = "windows")]
pub use windows as sys;

/// Reserve `size` bytes of address space aligned to `align`.
///
/// Where the platform commits lazily the range is immediately usable and
/// reads as zero; elsewhere it must be [`commit`]ted before use.
pub fn reserve(size: usize, align: usize) -> Result<*mut u8, PagemapError> {
    debug_assert!(align == 0 || align.is_power_of_two());
    let size = align_up(size, page_size());
    let align = align.max(page_size());
    let p = unsafe { sys::reserve(size, align) };
    if p.is_null() {
        return Err(PagemapError::ReservationFailed { size });
    }
    debug_assert!(p.addr() & (align - 1) == 0);
    Ok(p)
}

/// Map committed, zeroed read-write memory.
pub fn map_zeroed(size: usize) -> Result<*mut u8, PagemapError> {
    let size = align_up(size, page_size());
    let p = unsafe { sys::map_anonymous(size) };
    if p.is_null() {
        return Err(PagemapError::ReservationFailed { size });
    }
    Ok(p)
}

/// Back a reserved range with memory.
///
/// # Safety
/// `ptr` and `size` must be page-aligned and lie inside a live reservation.
pub unsafe fn commit(ptr: *mut u8, size: usize) -> Result<(), PagemapError> {
    debug_assert!(crate::address::is_aligned_block::<4096>(ptr, size));
    if sys::commit(ptr, size) {
        Ok(())
    } else {
        Err(PagemapError::CommitFailed { size })
    }
}

/// Release the memory behind a range while keeping the reservation.
/// The range must be committed again before it is touched.
///
/// # Safety
/// `ptr` and `size` must be page-aligned and lie inside a live reservation.
pub unsafe fn decommit(ptr: *mut u8, size: usize) {
    debug_assert!(crate::address::is_aligned_block::<4096>(ptr, size));
    sys::decommit(ptr, size);
}

/// Tell the kernel the contents of a range are no longer needed. The range
/// stays accessible.
///
/// # Safety
/// `ptr` and `size` must be page-aligned and lie inside a live reservation.
pub unsafe fn advise_not_needed(ptr: *mut u8, size: usize) {
    debug_assert!(crate::address::is_aligned_block::<4096>(ptr, size));
    sys::advise_not_needed(ptr, size);
}

/// Give a reservation or mapping back to the system.
///
/// # Safety
/// `ptr` must come from [`reserve`] or [`map_zeroed`] with the same `size`.
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    sys::unmap(ptr, align_up(size, page_size()));
}

/// Page size as reported by the operating system.
pub fn query_page_size() -> usize {
    sys::page_size()
}

/// Write `msg` to stderr and abort.
///
/// Reserved for states that mean the allocator's metadata can no longer be
/// trusted. Never allocates.
#[cold]
#[inline(never)]
pub fn error(msg: &str) -> ! {
    sys::write_stderr(msg.as_bytes());
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_honours_alignment() {
        let align = 1 << 21;
        let p = reserve(3 * align, align).unwrap();
        assert_eq!(p.addr() % align, 0);
        unsafe {
            if !crate::config::LAZY_COMMIT {
                commit(p, 3 * align).unwrap();
            }
            p.write(1);
            p.add(3 * align - 1).write(2);
            unmap(p, 3 * align);
        }
    }

    #[test]
    fn reserved_memory_reads_zero() {
        let size = 4 * page_size();
        let p = reserve(size, 0).unwrap();
        unsafe {
            commit(p, size).unwrap();
            for i in (0..size).step_by(512) {
                assert_eq!(p.add(i).read(), 0);
            }
            unmap(p, size);
        }
    }

    #[test]
    fn advise_then_decommit_and_recommit() {
        let size = 2 * page_size();
        let p = map_zeroed(size).unwrap();
        unsafe {
            p.write_bytes(0xAB, size);
            advise_not_needed(p, size);
            // Still mapped after the advice.
            p.write(3);
            decommit(p, size);
            commit(p, size).unwrap();
            p.add(size - 1).write(4);
            assert_eq!(p.add(size - 1).read(), 4);
            unmap(p, size);
        }
    }

    #[test]
    fn page_size_is_sane() {
        let ps = query_page_size();
        assert!(ps >= 4096);
        assert!(ps.is_power_of_two());
    }
}
