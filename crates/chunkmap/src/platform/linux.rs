use core::ptr;

/// Map anonymous read-write memory.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    mmap(size, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS)
}

/// Reserve `size` bytes aligned to `align` without charging them against
/// overcommit. Pages are populated on first touch.
///
/// # Safety
/// `size` and `align` must be page-aligned and non-zero; `align` a power of two.
pub unsafe fn reserve(size: usize, align: usize) -> *mut u8 {
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
    if align <= crate::util::page_size() {
        return mmap(size, flags);
    }
    let Some(request) = size.checked_add(align) else {
        return ptr::null_mut();
    };
    let base = mmap(request, flags);
    if base.is_null() {
        return base;
    }
    // Trim the unaligned head and the tail back off the over-reservation.
    let aligned = base.map_addr(|a| (a + align - 1) & !(align - 1));
    let head = aligned.addr() - base.addr();
    let tail = request - head - size;
    if head != 0 {
        unmap(base, head);
    }
    if tail != 0 {
        unmap(aligned.add(size), tail);
    }
    aligned
}

unsafe fn mmap(size: usize, flags: libc::c_int) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        flags,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// Unmap memory.
///
/// # Safety
/// `ptr` must have been returned by `map_anonymous` or `reserve` with the same `size`.
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

/// Make a range accessible again after `decommit`.
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn commit(ptr: *mut u8, size: usize) -> bool {
    libc::mprotect(
        ptr as *mut libc::c_void,
        size,
        libc::PROT_READ | libc::PROT_WRITE,
    ) == 0
}

/// Drop the pages and make the range inaccessible.
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn decommit(ptr: *mut u8, size: usize) {
    advise_not_needed(ptr, size);
    libc::mprotect(ptr as *mut libc::c_void, size, libc::PROT_NONE);
}

/// Advise kernel that pages can be reclaimed.
/// On Linux, MADV_DONTNEED guarantees zero-filled pages on next access.
///
/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn advise_not_needed(ptr: *mut u8, size: usize) {
    let ret = libc::madvise(ptr as *mut libc::c_void, size, libc::MADV_DONTNEED);
    debug_assert!(ret == 0, "madvise(MADV_DONTNEED) failed");
}

pub fn page_size() -> usize {
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ps > 0 {
        ps as usize
    } else {
        4096
    }
}

/// Write directly to the stderr fd; no allocation.
pub fn write_stderr(msg: &[u8]) {
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
    }
}
