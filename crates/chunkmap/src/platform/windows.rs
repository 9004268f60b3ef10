use core::ffi::c_void;
use core::mem::MaybeUninit;
use core::ptr;
use std::io::Write;

use windows::Win32::System::{Memory, SystemInformation};

pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    Memory::VirtualAlloc(
        None,
        size,
        Memory::MEM_RESERVE | Memory::MEM_COMMIT,
        Memory::PAGE_READWRITE,
    ) as *mut u8
}

/// Reserve without committing. Windows has no lazy commit, so callers must
/// `commit` before touching the range.
pub unsafe fn reserve(size: usize, align: usize) -> *mut u8 {
    let granularity = allocation_granularity();
    if align <= granularity {
        return reserve_at(ptr::null(), size);
    }
    let Some(request) = size.checked_add(align) else {
        return ptr::null_mut();
    };
    // A reservation cannot be trimmed, so find an aligned hole by reserving
    // too much, releasing it, and claiming the aligned part. Another thread
    // may take the hole in between, hence the retries.
    for _ in 0..8 {
        let trial = reserve_at(ptr::null(), request);
        if trial.is_null() {
            return trial;
        }
        let aligned = (trial.addr() + align - 1) & !(align - 1);
        unmap(trial, request);
        let p = reserve_at(aligned as *const c_void, size);
        if !p.is_null() {
            return p;
        }
    }
    ptr::null_mut()
}

unsafe fn reserve_at(addr: *const c_void, size: usize) -> *mut u8 {
    let hint = if addr.is_null() { None } else { Some(addr) };
    Memory::VirtualAlloc(hint, size, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS) as *mut u8
}

pub unsafe fn unmap(ptr: *mut u8, _size: usize) {
    let _ = Memory::VirtualFree(ptr as *mut c_void, 0, Memory::MEM_RELEASE);
}

pub unsafe fn commit(ptr: *mut u8, size: usize) -> bool {
    !Memory::VirtualAlloc(
        Some(ptr as *const c_void),
        size,
        Memory::MEM_COMMIT,
        Memory::PAGE_READWRITE,
    )
    .is_null()
}

pub unsafe fn decommit(ptr: *mut u8, size: usize) {
    let _ = Memory::VirtualFree(ptr as *mut c_void, size, Memory::MEM_DECOMMIT);
}

pub unsafe fn advise_not_needed(ptr: *mut u8, size: usize) {
    Memory::VirtualAlloc(
        Some(ptr as *const c_void),
        size,
        Memory::MEM_RESET,
        Memory::PAGE_READWRITE,
    );
}

fn system_info() -> SystemInformation::SYSTEM_INFO {
    unsafe {
        let mut info = MaybeUninit::uninit();
        SystemInformation::GetSystemInfo(info.as_mut_ptr());
        info.assume_init()
    }
}

fn allocation_granularity() -> usize {
    system_info().dwAllocationGranularity as usize
}

pub fn page_size() -> usize {
    system_info().dwPageSize as usize
}

pub fn write_stderr(msg: &[u8]) {
    let _ = std::io::stderr().write_all(msg);
}
