use super::{large_code, write_redirect_slide, ChunkKind, ChunkMap, ChunkMapSuperslabKind, SlabKind};
use crate::pagemap::Pagemap;
use crate::platform;
use crate::util::{align_down, is_aligned};
use core::ptr;

/// Chunk map storing one code byte per granule.
pub struct PlainChunkMap<'a, M: Pagemap<Entry = u8>> {
    pagemap: &'a M,
}

impl<'a, M: Pagemap<Entry = u8>> Clone for PlainChunkMap<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: Pagemap<Entry = u8>> Copy for PlainChunkMap<'a, M> {}

impl<'a, M: Pagemap<Entry = u8>> PlainChunkMap<'a, M> {
    const GRANULE_OK: () = assert!(
        M::GRANULE_BITS > ChunkMapSuperslabKind::Mediumslab as usize && M::GRANULE_BITS < 64,
        "large allocation codes would collide with slab tags"
    );

    /// Granules must be wider than 2 bits, or the smallest large-head codes
    /// would read as slab tags:
    ///
    /// ```
    /// use chunkmap::{PlainChunkMap, TreePagemap};
    ///
    /// let pm = TreePagemap::<u8, 3, 32>::new();
    /// let _map = PlainChunkMap::new(&pm);
    /// ```
    ///
    /// ```compile_fail
    /// use chunkmap::{PlainChunkMap, TreePagemap};
    ///
    /// let pm = TreePagemap::<u8, 2, 32>::new();
    /// let _map = PlainChunkMap::new(&pm);
    /// ```
    pub const fn new(pagemap: &'a M) -> Self {
        let () = Self::GRANULE_OK;
        PlainChunkMap { pagemap }
    }

    /// The pagemap the codes live in.
    pub fn pagemap(&self) -> &'a M {
        self.pagemap
    }

    #[inline(always)]
    fn granule() -> usize {
        1 << M::GRANULE_BITS
    }
}

impl<'a, M: Pagemap<Entry = u8>> ChunkMap for PlainChunkMap<'a, M> {
    const GRANULE_BITS: usize = M::GRANULE_BITS;

    #[inline(always)]
    fn get(&self, addr: usize) -> u8 {
        self.pagemap.get(addr)
    }

    /// A byte cell carries no pointer, so the result is derived from `p`.
    fn getp<const OFFSET: bool>(&self, p: *mut u8) -> *mut u8 {
        if OFFSET {
            return p;
        }
        match self.classify(p.addr()) {
            ChunkKind::SmallSlab | ChunkKind::MediumSlab => {
                p.map_addr(|a| align_down(a, Self::granule()))
            }
            ChunkKind::LargeHead { .. } | ChunkKind::LargeBody { .. } => {
                match self.large_head(p.addr()) {
                    Some(head) => p.with_addr(head),
                    None => ptr::null_mut(),
                }
            }
            ChunkKind::NotOurs | ChunkKind::Unused(_) => ptr::null_mut(),
        }
    }

    fn register_slab(&self, slab: *mut u8, kind: SlabKind) {
        debug_assert!(is_aligned(slab.addr(), Self::granule()));
        self.pagemap.set(slab.addr(), kind.code());
    }

    fn unregister_slab(&self, slab: *mut u8, kind: SlabKind) {
        if self.get(slab.addr()) != kind.code() {
            platform::error(kind.mismatch_message());
        }
        self.pagemap.set(slab.addr(), ChunkMapSuperslabKind::NotOurs as u8);
    }

    fn register_large(&self, p: *mut u8, size: usize) {
        let size_bits = large_code(size, M::GRANULE_BITS);
        let head = p.addr();
        debug_assert!(is_aligned(head, Self::granule()));
        self.pagemap.set(head, size_bits);
        write_redirect_slide(self.pagemap, head, size_bits, |code| code);
    }

    fn unregister_large(&self, p: *mut u8, size: usize) {
        let size_bits = large_code(size, M::GRANULE_BITS);
        let head = p.addr();
        if self.get(head) != size_bits {
            platform::error("chunkmap: large allocation size does not match its registration\n");
        }
        let count = 1usize << (size_bits as usize - M::GRANULE_BITS);
        self.pagemap
            .set_range(head, ChunkMapSuperslabKind::NotOurs as u8, count);
    }
}
