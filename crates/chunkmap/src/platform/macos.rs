use core::ptr;

pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

pub unsafe fn reserve(size: usize, align: usize) -> *mut u8 {
    if align <= crate::util::page_size() {
        return map_anonymous(size);
    }
    let Some(request) = size.checked_add(align) else {
        return ptr::null_mut();
    };
    let base = map_anonymous(request);
    if base.is_null() {
        return base;
    }
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

pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

pub unsafe fn commit(ptr: *mut u8, size: usize) -> bool {
    libc::mprotect(
        ptr as *mut libc::c_void,
        size,
        libc::PROT_READ | libc::PROT_WRITE,
    ) == 0
}

pub unsafe fn decommit(ptr: *mut u8, size: usize) {
    advise_not_needed(ptr, size);
    libc::mprotect(ptr as *mut libc::c_void, size, libc::PROT_NONE);
}

pub unsafe fn advise_not_needed(ptr: *mut u8, size: usize) {
    libc::madvise(ptr as *mut libc::c_void, size, libc::MADV_FREE);
}

pub fn page_size() -> usize {
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ps > 0 { ps as usize } else { 16384 }
}

pub fn write_stderr(msg: &[u8]) {
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
    }
}
