//! Chunk map storing a pointer per granule.
//!
//! Each cell holds a pointer to the start of its region with the code in the
//! low byte, so the map itself can hand back a pointer with the region's
//! provenance for any interior address. Slab cells point at the slab; large
//! allocation cells, body included, point at the head.

use super::{large_code, write_redirect_slide, ChunkMap, ChunkMapSuperslabKind, SlabKind};
use crate::address::{pointer_align_down, pointer_offset};
use crate::pagemap::Pagemap;
use crate::platform;
use crate::util::is_aligned;
use core::ptr;

/// Alignment of every pointer stored in a cell; the code fits below it.
pub const PAGEMAP_PTR_ALIGN: usize = 0x100;

pub struct CapabilityChunkMap<'a, M: Pagemap<Entry = *mut u8>> {
    pagemap: &'a M,
}

impl<'a, M: Pagemap<Entry = *mut u8>> Clone for CapabilityChunkMap<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: Pagemap<Entry = *mut u8>> Copy for CapabilityChunkMap<'a, M> {}

impl<'a, M: Pagemap<Entry = *mut u8>> CapabilityChunkMap<'a, M> {
    const GRANULE_OK: () = assert!(
        (1usize << M::GRANULE_BITS) >= PAGEMAP_PTR_ALIGN
            && M::GRANULE_BITS > ChunkMapSuperslabKind::Mediumslab as usize
            && M::GRANULE_BITS < 64,
        "granule too small to keep a code in the low bits of a region pointer"
    );

    /// The code lives below `PAGEMAP_PTR_ALIGN`, so granules need at least
    /// 8 bits:
    ///
    /// ```
    /// use chunkmap::{CapabilityChunkMap, TreePagemap};
    ///
    /// let pm = TreePagemap::<*mut u8, 8, 32>::new();
    /// let _map = CapabilityChunkMap::new(&pm);
    /// ```
    ///
    /// ```compile_fail
    /// use chunkmap::{CapabilityChunkMap, TreePagemap};
    ///
    /// let pm = TreePagemap::<*mut u8, 7, 32>::new();
    /// let _map = CapabilityChunkMap::new(&pm);
    /// ```
    ///
    /// ```compile_fail
    /// use chunkmap::{CapabilityChunkMap, TreePagemap};
    ///
    /// let pm = TreePagemap::<*mut u8, 2, 32>::new();
    /// let _map = CapabilityChunkMap::new(&pm);
    /// ```
    pub const fn new(pagemap: &'a M) -> Self {
        let () = Self::GRANULE_OK;
        CapabilityChunkMap { pagemap }
    }

    pub fn pagemap(&self) -> &'a M {
        self.pagemap
    }

    #[inline(always)]
    fn tagged(base: *mut u8, code: u8) -> *mut u8 {
        pointer_offset(base, code as usize)
    }
}

impl<'a, M: Pagemap<Entry = *mut u8>> ChunkMap for CapabilityChunkMap<'a, M> {
    const GRANULE_BITS: usize = M::GRANULE_BITS;

    #[inline(always)]
    fn get(&self, addr: usize) -> u8 {
        self.pagemap.get(addr).addr() as u8
    }

    fn getp<const OFFSET: bool>(&self, p: *mut u8) -> *mut u8 {
        let stored = self.pagemap.get(p.addr());
        if stored.is_null() {
            return ptr::null_mut();
        }
        let base = pointer_align_down::<PAGEMAP_PTR_ALIGN, u8>(stored);
        if OFFSET {
            base.with_addr(p.addr())
        } else {
            base
        }
    }

    fn register_slab(&self, slab: *mut u8, kind: SlabKind) {
        debug_assert!(is_aligned(slab.addr(), 1 << M::GRANULE_BITS));
        self.pagemap.set(slab.addr(), Self::tagged(slab, kind.code()));
    }

    fn unregister_slab(&self, slab: *mut u8, kind: SlabKind) {
        if self.get(slab.addr()) != kind.code() {
            platform::error(kind.mismatch_message());
        }
        self.pagemap.set(slab.addr(), ptr::null_mut());
    }

    fn register_large(&self, p: *mut u8, size: usize) {
        let size_bits = large_code(size, M::GRANULE_BITS);
        debug_assert!(is_aligned(p.addr(), 1 << M::GRANULE_BITS));
        self.pagemap.set(p.addr(), Self::tagged(p, size_bits));
        write_redirect_slide(self.pagemap, p.addr(), size_bits, |code| Self::tagged(p, code));
    }

    fn unregister_large(&self, p: *mut u8, size: usize) {
        let size_bits = large_code(size, M::GRANULE_BITS);
        if self.get(p.addr()) != size_bits {
            platform::error("chunkmap: large allocation size does not match its registration\n");
        }
        let count = 1usize << (size_bits as usize - M::GRANULE_BITS);
        self.pagemap.set_range(p.addr(), ptr::null_mut(), count);
    }
}
