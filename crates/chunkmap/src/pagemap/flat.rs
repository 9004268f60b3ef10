//! Single-array pagemap.
//!
//! The array covers all of `ADDRESS_BITS`, so lookups are one shift and one
//! load. It is reserved on first write; on lazy-commit platforms only the
//! pages holding touched cells ever become resident.

use super::{checked_index_range, config_for, Pagemap, PagemapEntry};
use crate::config::{PagemapConfig, ADDRESS_BITS as DEFAULT_ADDRESS_BITS, LAZY_COMMIT, SUPERSLAB_BITS};
use crate::error::{self, PagemapError};
use crate::platform;
use crate::util::{align_up, page_size};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Shared with other modules by address, so the field order is part of the
/// layout `PAGEMAP_VERSION` names.
#[repr(C)]
#[derive(Debug)]
pub struct FlatPagemap<
    T: PagemapEntry,
    const GRANULE_BITS: usize = SUPERSLAB_BITS,
    const ADDRESS_BITS: usize = DEFAULT_ADDRESS_BITS,
> {
    /// Cell array (null until the first write or `init`).
    table: AtomicPtr<T::Atomic>,
    _entry: PhantomData<fn() -> T>,
}

impl<T: PagemapEntry, const GRANULE_BITS: usize, const ADDRESS_BITS: usize>
    FlatPagemap<T, GRANULE_BITS, ADDRESS_BITS>
{
    const ENTRIES: usize = 1 << (ADDRESS_BITS - GRANULE_BITS);
    const TABLE_BYTES: usize = Self::ENTRIES * core::mem::size_of::<T::Atomic>();

    const SHAPE_OK: () = assert!(
        GRANULE_BITS > 0 && GRANULE_BITS < ADDRESS_BITS && ADDRESS_BITS <= usize::BITS as usize,
        "pagemap granule must be smaller than the covered address space"
    );

    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        let () = Self::SHAPE_OK;
        FlatPagemap {
            table: AtomicPtr::new(ptr::null_mut()),
            _entry: PhantomData,
        }
    }

    /// Whether the array has been reserved yet.
    pub fn is_initialized(&self) -> bool {
        !self.table.load(Ordering::Acquire).is_null()
    }

    #[inline(always)]
    fn table_or_init(&self) -> *mut T::Atomic {
        let table = self.table.load(Ordering::Acquire);
        if !table.is_null() {
            return table;
        }
        match self.install() {
            Ok(table) => table,
            Err(e) => error::fatal(&e),
        }
    }

    #[cold]
    fn install(&self) -> Result<*mut T::Atomic, PagemapError> {
        let bytes = align_up(Self::TABLE_BYTES, page_size());
        let mem = platform::reserve(bytes, 0)?;
        if !LAZY_COMMIT {
            if let Err(e) = unsafe { platform::commit(mem, bytes) } {
                unsafe { platform::unmap(mem, bytes) };
                return Err(e);
            }
        }
        let table = mem as *mut T::Atomic;
        // Zeroed memory is an array of `T::DEFAULT` cells. If another thread
        // installed first, use theirs.
        match self
            .table
            .compare_exchange(ptr::null_mut(), table, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                log::debug!(
                    "reserved flat pagemap: {} cells, {} bytes at {:p}",
                    Self::ENTRIES,
                    bytes,
                    mem
                );
                Ok(table)
            }
            Err(existing) => {
                unsafe { platform::unmap(mem, bytes) };
                Ok(existing)
            }
        }
    }
}

impl<T: PagemapEntry, const GRANULE_BITS: usize, const ADDRESS_BITS: usize> Pagemap
    for FlatPagemap<T, GRANULE_BITS, ADDRESS_BITS>
{
    type Entry = T;

    const GRANULE_BITS: usize = GRANULE_BITS;
    const ADDRESS_BITS: usize = ADDRESS_BITS;
    const CONFIG: PagemapConfig = config_for::<T>(true, GRANULE_BITS, ADDRESS_BITS);

    fn init(&self) -> Result<(), PagemapError> {
        if !self.is_initialized() {
            self.install()?;
        }
        Ok(())
    }

    #[inline(always)]
    fn get(&self, addr: usize) -> T {
        let index = addr >> GRANULE_BITS;
        if index >= Self::ENTRIES {
            return T::DEFAULT;
        }
        let table = self.table.load(Ordering::Acquire);
        if table.is_null() {
            return T::DEFAULT;
        }
        T::load(unsafe { &*table.add(index) })
    }

    #[inline]
    fn set(&self, addr: usize, value: T) {
        let index = checked_index_range(addr, 1, GRANULE_BITS, ADDRESS_BITS);
        let table = self.table_or_init();
        T::store(unsafe { &*table.add(index) }, value);
    }

    fn set_range(&self, addr: usize, value: T, count: usize) {
        let index = checked_index_range(addr, count, GRANULE_BITS, ADDRESS_BITS);
        let table = self.table_or_init();
        for i in index..index + count {
            T::store(unsafe { &*table.add(i) }, value);
        }
    }
}

impl<T: PagemapEntry, const GRANULE_BITS: usize, const ADDRESS_BITS: usize> Drop
    for FlatPagemap<T, GRANULE_BITS, ADDRESS_BITS>
{
    fn drop(&mut self) {
        let table = *self.table.get_mut();
        if !table.is_null() {
            unsafe { platform::unmap(table as *mut u8, align_up(Self::TABLE_BYTES, page_size())) };
        }
    }
}
