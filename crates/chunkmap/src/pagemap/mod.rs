//! Address-indexed tables with one cell per granule.
//!
//! Two topologies implement [`Pagemap`]:
//!
//! - [`FlatPagemap`]: one array covering the whole address space, reserved
//!   on first write. Cheap where the platform commits lazily.
//! - [`TreePagemap`]: a radix tree whose nodes are allocated as writes reach
//!   them.
//!
//! The build picks one for [`DefaultPagemap`]; see `build.rs`.

pub mod flat;
pub mod provider;
pub mod tree;

pub use flat::FlatPagemap;
pub use provider::{GlobalPagemap, PagemapProvider};
pub use tree::TreePagemap;

use crate::config::{PagemapConfig, ENTRY_CAPABILITY_POINTER, ENTRY_CLASSIFICATION_BYTE};
use crate::error::PagemapError;
use core::ffi::c_void;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

/// A value that can live in a pagemap cell.
///
/// # Safety
/// The all-zero bit pattern must be a valid `Atomic` holding `DEFAULT`:
/// backends hand out freshly mapped (zeroed) memory as cells.
pub unsafe trait PagemapEntry: Copy + Eq + 'static {
    /// Atomic twin of `Self`, so that a cell is never read torn.
    type Atomic: Sync;

    const DEFAULT: Self;

    /// Encoding tag recorded in [`PagemapConfig::entry_encoding`].
    const ENCODING: u8;

    fn load(cell: &Self::Atomic) -> Self;
    fn store(cell: &Self::Atomic, value: Self);
}

unsafe impl PagemapEntry for u8 {
    type Atomic = AtomicU8;
    const DEFAULT: Self = 0;
    const ENCODING: u8 = ENTRY_CLASSIFICATION_BYTE;

    #[inline(always)]
    fn load(cell: &AtomicU8) -> u8 {
        cell.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn store(cell: &AtomicU8, value: u8) {
        cell.store(value, Ordering::Release)
    }
}

unsafe impl PagemapEntry for *mut u8 {
    type Atomic = AtomicPtr<u8>;
    const DEFAULT: Self = core::ptr::null_mut();
    const ENCODING: u8 = ENTRY_CAPABILITY_POINTER;

    #[inline(always)]
    fn load(cell: &AtomicPtr<u8>) -> *mut u8 {
        cell.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn store(cell: &AtomicPtr<u8>, value: *mut u8) {
        cell.store(value, Ordering::Release)
    }
}

/// A table mapping each `2^GRANULE_BITS`-byte granule of the address space to
/// one `Entry`.
///
/// The low `GRANULE_BITS` of every address are ignored. Cells never written
/// read as `Entry::DEFAULT`, as do addresses beyond `ADDRESS_BITS`.
pub trait Pagemap: Sync {
    type Entry: PagemapEntry;

    const GRANULE_BITS: usize;
    const ADDRESS_BITS: usize;

    /// Layout descriptor used to validate a pagemap shared across modules.
    const CONFIG: PagemapConfig;

    /// Reserve backing storage now rather than on the first write.
    fn init(&self) -> Result<(), PagemapError>;

    fn get(&self, addr: usize) -> Self::Entry;

    fn set(&self, addr: usize, value: Self::Entry);

    /// Set `count` consecutive cells starting at the one containing `addr`.
    /// Not atomic as a whole; each cell is.
    fn set_range(&self, addr: usize, value: Self::Entry, count: usize);

    /// Reinterpret a pagemap received from another module, provided its
    /// descriptor matches ours exactly.
    ///
    /// # Safety
    /// If `config` matches, `pm` must point to a live `Self`.
    unsafe fn cast_to_pagemap<'a>(
        pm: *mut c_void,
        config: &PagemapConfig,
    ) -> Result<&'a Self, PagemapError>
    where
        Self: Sized,
    {
        if *config != Self::CONFIG {
            return Err(PagemapError::AbiMismatch {
                expected: Self::CONFIG,
                found: *config,
            });
        }
        (pm as *const Self)
            .as_ref()
            .ok_or(PagemapError::MissingPagemap)
    }
}

/// Number of cells covering `[addr, addr + count granules)`, or the abort
/// for a range that leaves the covered address space.
#[inline]
fn checked_index_range(addr: usize, count: usize, granule_bits: usize, address_bits: usize) -> usize {
    let index = addr >> granule_bits;
    let limit = 1usize << (address_bits - granule_bits);
    match index.checked_add(count) {
        Some(end) if end <= limit => index,
        _ => crate::platform::error("chunkmap: pagemap write outside covered address space\n"),
    }
}

/// Descriptor for a backend with the given shape.
const fn config_for<T: PagemapEntry>(
    is_flat: bool,
    granule_bits: usize,
    address_bits: usize,
) -> PagemapConfig {
    PagemapConfig {
        version: crate::config::PAGEMAP_VERSION,
        is_flat_pagemap: is_flat,
        sizeof_pointer: core::mem::size_of::<*mut u8>() as u8,
        entry_encoding: T::ENCODING,
        pagemap_bits: granule_bits as u8,
        address_bits: address_bits as u8,
        size_of_entry: core::mem::size_of::<T>() as u8,
    }
}

/// Pagemap topology chosen for this build.
#[cfg(chunkmap_flat_pagemap)]
pub type DefaultPagemap<T> = FlatPagemap<T>;
#[cfg(not(chunkmap_flat_pagemap))]
pub type DefaultPagemap<T> = TreePagemap<T>;
