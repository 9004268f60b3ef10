//! Chunk classification on top of a pagemap.
//!
//! Every granule of the address space has a one-byte code:
//!
//! | code              | meaning                                              |
//! |-------------------|------------------------------------------------------|
//! | 0                 | not owned by this allocator                          |
//! | 1                 | start of a small-object slab                         |
//! | 2                 | start of a medium-object slab                        |
//! | `G..64`           | first granule of a large allocation of `2^code` bytes |
//! | `64 + d`          | inside a large allocation, at least `2^d` bytes from its head |
//!
//! `G` is the pagemap's granule bits. Body codes form a "redirect slide":
//! the granules `[2^i, 2^(i+1))` after the head all hold `64 + i + G`, so
//! stepping back by `2^(code - 64)` bytes from any body granule lands in an
//! earlier, strictly smaller band, and the head is reached in a logarithmic
//! number of reads.
//!
//! Two realizations share this encoding: [`PlainChunkMap`] stores the code
//! as a byte, [`CapabilityChunkMap`] stores a pointer to the region with the
//! code in its low bits so that a full pointer can be rebuilt from any
//! interior address.

pub mod capability;
pub mod plain;

pub use capability::{CapabilityChunkMap, PAGEMAP_PTR_ALIGN};
pub use plain::PlainChunkMap;

use crate::pagemap::provider::DefaultProvider;
use crate::pagemap::{DefaultPagemap, Pagemap, PagemapProvider};
use crate::platform;
use crate::util::next_pow2_bits;

/// Codes for the three fixed classifications.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkMapSuperslabKind {
    NotOurs = 0,
    Superslab = 1,
    Mediumslab = 2,
}

/// First body code. Heads lie below it, bodies in `[LARGE_BODY_BASE, 128)`.
pub const LARGE_BODY_BASE: u8 = 64;

/// The two slab sizes a granule can start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlabKind {
    Small,
    Medium,
}

impl SlabKind {
    #[inline(always)]
    pub const fn code(self) -> u8 {
        match self {
            SlabKind::Small => ChunkMapSuperslabKind::Superslab as u8,
            SlabKind::Medium => ChunkMapSuperslabKind::Mediumslab as u8,
        }
    }

    const fn mismatch_message(self) -> &'static str {
        match self {
            SlabKind::Small => "chunkmap: unregistering a superslab that is not registered as one\n",
            SlabKind::Medium => "chunkmap: unregistering a mediumslab that is not registered as one\n",
        }
    }
}

/// Decoded meaning of a chunk map code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkKind {
    NotOurs,
    SmallSlab,
    MediumSlab,
    /// First granule of a large allocation of `2^size_bits` bytes.
    LargeHead { size_bits: u8 },
    /// Inside a large allocation; the head is at least `2^distance_bits`
    /// and less than `2^(distance_bits + 1)` bytes back.
    LargeBody { distance_bits: u8 },
    /// A code no registration produces for this granule size.
    Unused(u8),
}

impl ChunkKind {
    pub const fn decode(code: u8, granule_bits: usize) -> ChunkKind {
        match code {
            0 => ChunkKind::NotOurs,
            1 => ChunkKind::SmallSlab,
            2 => ChunkKind::MediumSlab,
            c if c < LARGE_BODY_BASE && c as usize >= granule_bits => ChunkKind::LargeHead { size_bits: c },
            c if c >= LARGE_BODY_BASE && c < 2 * LARGE_BODY_BASE => ChunkKind::LargeBody {
                distance_bits: c - LARGE_BODY_BASE,
            },
            c => ChunkKind::Unused(c),
        }
    }
}

/// Classification of every granule, plus the registration operations that
/// keep it up to date.
///
/// Registrations and lookups of disjoint regions may run concurrently. The
/// caller must not register, unregister and look up the same region at the
/// same time.
pub trait ChunkMap {
    /// log2 of the bytes covered by one code.
    const GRANULE_BITS: usize;

    /// Code for the granule containing `addr`. Never-registered granules
    /// read 0.
    fn get(&self, addr: usize) -> u8;

    #[inline]
    fn classify(&self, addr: usize) -> ChunkKind {
        ChunkKind::decode(self.get(addr), Self::GRANULE_BITS)
    }

    /// Rebuild a pointer from the map: with `OFFSET`, a pointer to `p`'s
    /// address; without, a pointer to the start of the region containing
    /// `p` (the head, for large allocations). Null where nothing is
    /// registered.
    fn getp<const OFFSET: bool>(&self, p: *mut u8) -> *mut u8;

    fn register_slab(&self, slab: *mut u8, kind: SlabKind);

    /// Clear a slab's code. Aborts unless the slab is registered as `kind`.
    fn unregister_slab(&self, slab: *mut u8, kind: SlabKind);

    /// Record `[p, p + next_pow2(size))` as one large allocation.
    /// `p` must be granule-aligned and `size` at least one granule.
    fn register_large(&self, p: *mut u8, size: usize);

    /// Clear every code written by `register_large(p, size)`. Aborts if the
    /// head does not record `size`.
    fn unregister_large(&self, p: *mut u8, size: usize);

    #[inline]
    fn register_small_slab(&self, slab: *mut u8) {
        self.register_slab(slab, SlabKind::Small)
    }

    #[inline]
    fn register_medium_slab(&self, slab: *mut u8) {
        self.register_slab(slab, SlabKind::Medium)
    }

    #[inline]
    fn unregister_small_slab(&self, slab: *mut u8) {
        self.unregister_slab(slab, SlabKind::Small)
    }

    #[inline]
    fn unregister_medium_slab(&self, slab: *mut u8) {
        self.unregister_slab(slab, SlabKind::Medium)
    }

    /// Address of the head of the large allocation containing `addr`,
    /// following the redirect slide. `None` if `addr` is not inside a large
    /// allocation, or the slide is inconsistent.
    fn large_head(&self, addr: usize) -> Option<usize> {
        let mut cursor = addr & !((1usize << Self::GRANULE_BITS) - 1);
        // Each hop lands in a strictly smaller band, so at most one read per
        // body band plus the head.
        for _ in 0..=(LARGE_BODY_BASE as usize - Self::GRANULE_BITS) {
            match self.classify(cursor) {
                ChunkKind::LargeHead { .. } => return Some(cursor),
                ChunkKind::LargeBody { distance_bits } => {
                    let hop = 1usize.checked_shl(distance_bits as u32)?;
                    cursor = cursor.checked_sub(hop)?;
                }
                _ => return None,
            }
        }
        None
    }

    /// log2 of the size of the large allocation containing `addr`.
    fn large_size_bits(&self, addr: usize) -> Option<u8> {
        let head = self.large_head(addr)?;
        match self.classify(head) {
            ChunkKind::LargeHead { size_bits } => Some(size_bits),
            _ => None,
        }
    }
}

/// Head code for a large allocation of `size` bytes. Aborts for sizes the
/// encoding cannot represent.
#[inline]
fn large_code(size: usize, granule_bits: usize) -> u8 {
    let bits = next_pow2_bits(size) as usize;
    if bits < granule_bits || bits >= LARGE_BODY_BASE as usize {
        platform::error("chunkmap: large allocation size cannot be encoded\n");
    }
    bits as u8
}

/// Body codes for a large allocation whose head is at `head`: band `i`
/// covers the `2^i` granules starting `2^i` granules past the head.
fn write_redirect_slide<M: Pagemap>(pm: &M, head: usize, size_bits: u8, encode: impl Fn(u8) -> M::Entry) {
    let g = M::GRANULE_BITS;
    let mut cursor = head + (1usize << g);
    for i in 0..(size_bits as usize - g) {
        let run = 1usize << i;
        pm.set_range(cursor, encode((LARGE_BODY_BASE as usize + i + g) as u8), run);
        cursor += run << g;
    }
}

/// Cell type for this build's chunk map.
#[cfg(not(feature = "rederive"))]
pub type ChunkmapEntry = u8;
#[cfg(feature = "rederive")]
pub type ChunkmapEntry = *mut u8;

/// The process-wide pagemap type. Its layout is what the ABI handshake
/// compares.
pub type ChunkmapPagemap = DefaultPagemap<ChunkmapEntry>;

#[cfg(not(feature = "rederive"))]
pub type DefaultChunkMap = PlainChunkMap<'static, ChunkmapPagemap>;
#[cfg(feature = "rederive")]
pub type DefaultChunkMap = CapabilityChunkMap<'static, ChunkmapPagemap>;

/// Chunk map over the process-wide pagemap, owned or imported according to
/// the build.
#[inline]
pub fn chunkmap() -> DefaultChunkMap {
    DefaultChunkMap::new(DefaultProvider::pagemap())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::PagemapConfig;
    use crate::error::PagemapError;
    use crate::pagemap::FlatPagemap;
    use core::cell::Cell;

    /// Byte pagemap that counts reads.
    pub(crate) struct CountingPagemap {
        inner: FlatPagemap<u8, 21, 40>,
        reads: Cell<usize>,
    }

    // Tests use it from one thread only.
    unsafe impl Sync for CountingPagemap {}

    impl CountingPagemap {
        pub(crate) fn new() -> Self {
            CountingPagemap {
                inner: FlatPagemap::new(),
                reads: Cell::new(0),
            }
        }

        pub(crate) fn take_reads(&self) -> usize {
            self.reads.replace(0)
        }
    }

    impl Pagemap for CountingPagemap {
        type Entry = u8;
        const GRANULE_BITS: usize = 21;
        const ADDRESS_BITS: usize = 40;
        const CONFIG: PagemapConfig = <FlatPagemap<u8, 21, 40> as Pagemap>::CONFIG;

        fn init(&self) -> Result<(), PagemapError> {
            self.inner.init()
        }

        fn get(&self, addr: usize) -> u8 {
            self.reads.set(self.reads.get() + 1);
            self.inner.get(addr)
        }

        fn set(&self, addr: usize, value: u8) {
            self.inner.set(addr, value)
        }

        fn set_range(&self, addr: usize, value: u8, count: usize) {
            self.inner.set_range(addr, value, count)
        }
    }

    #[test]
    fn decode_partitions_the_code_space() {
        assert_eq!(ChunkKind::decode(0, 21), ChunkKind::NotOurs);
        assert_eq!(ChunkKind::decode(1, 21), ChunkKind::SmallSlab);
        assert_eq!(ChunkKind::decode(2, 21), ChunkKind::MediumSlab);
        assert_eq!(ChunkKind::decode(20, 21), ChunkKind::Unused(20));
        assert_eq!(ChunkKind::decode(21, 21), ChunkKind::LargeHead { size_bits: 21 });
        assert_eq!(ChunkKind::decode(63, 21), ChunkKind::LargeHead { size_bits: 63 });
        assert_eq!(ChunkKind::decode(64, 21), ChunkKind::LargeBody { distance_bits: 0 });
        assert_eq!(ChunkKind::decode(127, 21), ChunkKind::LargeBody { distance_bits: 63 });
        assert_eq!(ChunkKind::decode(128, 21), ChunkKind::Unused(128));
        assert_eq!(ChunkKind::decode(255, 21), ChunkKind::Unused(255));
    }

    #[test]
    fn smallest_granule_keeps_heads_above_slab_tags() {
        use crate::pagemap::TreePagemap;

        let pm = TreePagemap::<u8, 3, 32>::new();
        let map = PlainChunkMap::new(&pm);
        map.register_large(crate::address::pointer_cast(64), 8);
        assert_eq!(map.classify(64), ChunkKind::LargeHead { size_bits: 3 });
        map.register_large(crate::address::pointer_cast(128), 16);
        assert_eq!(map.get(128), 4);
        assert_eq!(map.classify(136), ChunkKind::LargeBody { distance_bits: 3 });
        map.register_medium_slab(crate::address::pointer_cast(256));
        assert_eq!(map.classify(256), ChunkKind::MediumSlab);
    }

    #[test]
    fn large_code_rounds_up() {
        assert_eq!(large_code(1 << 21, 21), 21);
        assert_eq!(large_code((1 << 21) + 1, 21), 22);
        assert_eq!(large_code(3 << 21, 21), 23);
    }

    #[test]
    fn head_walk_reads_logarithmically_many_cells() {
        let pm = CountingPagemap::new();
        let map = PlainChunkMap::new(&pm);
        let head = 1usize << 32;
        let size_bits = 31;
        map.register_large(crate::address::pointer_cast(head), 1 << size_bits);
        pm.take_reads();

        let granules = 1usize << (size_bits - 21);
        for k in [1, 2, 3, 7, 100, 513, granules - 1] {
            assert_eq!(map.large_head(head + (k << 21) + 17), Some(head), "granule {}", k);
            let reads = pm.take_reads();
            let bound = (usize::BITS - k.leading_zeros()) as usize + 1;
            assert!(reads <= bound, "granule {} took {} reads, bound {}", k, reads, bound);
        }
    }

    #[test]
    fn global_chunkmap_starts_empty() {
        let map = chunkmap();
        assert_eq!(map.get(0x1000), 0);
        assert_eq!(map.classify(usize::MAX), ChunkKind::NotOurs);
    }
}
