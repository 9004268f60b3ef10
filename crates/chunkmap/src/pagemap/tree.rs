//! Radix-tree pagemap for address spaces too wide to reserve as one array.
//!
//! The cell index (`addr >> GRANULE_BITS`) is split top-down:
//!
//!   [ top | interior ... | leaf ]
//!
//! Leaves are arrays of `2^LEAF_BITS` atomic cells, interior nodes arrays of
//! `2^13` child pointers, each at most `PAGEMAP_NODE_SIZE` bytes. The top
//! level takes whatever bits are left over. Every node, the root included, is
//! mapped on the first write that descends through it and installed with a
//! compare-and-swap on its parent slot, so racing writers agree on a single
//! node and contention is confined to that slot. Reads never allocate.

use super::{checked_index_range, config_for, Pagemap, PagemapEntry};
use crate::config::{PagemapConfig, ADDRESS_BITS as DEFAULT_ADDRESS_BITS, PAGEMAP_NODE_BITS, SUPERSLAB_BITS};
use crate::error::{self, PagemapError};
use crate::platform;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Shared with other modules by address, so the field order is part of the
/// layout `PAGEMAP_VERSION` names.
#[repr(C)]
#[derive(Debug)]
pub struct TreePagemap<
    T: PagemapEntry,
    const GRANULE_BITS: usize = SUPERSLAB_BITS,
    const ADDRESS_BITS: usize = DEFAULT_ADDRESS_BITS,
> {
    /// Top-level node, or the only leaf when the index fits in one.
    root: AtomicPtr<u8>,
    /// Nodes installed so far.
    nodes: AtomicUsize,
    _entry: PhantomData<fn() -> T>,
}

const fn log2(x: usize) -> usize {
    x.trailing_zeros() as usize
}

impl<T: PagemapEntry, const GRANULE_BITS: usize, const ADDRESS_BITS: usize>
    TreePagemap<T, GRANULE_BITS, ADDRESS_BITS>
{
    const INDEX_BITS: usize = ADDRESS_BITS - GRANULE_BITS;

    const LEAF_BITS: usize = {
        let fit = PAGEMAP_NODE_BITS - log2(size_of::<T::Atomic>());
        if fit < Self::INDEX_BITS {
            fit
        } else {
            Self::INDEX_BITS
        }
    };
    const LEAF_ENTRIES: usize = 1 << Self::LEAF_BITS;
    const LEAF_BYTES: usize = Self::LEAF_ENTRIES * size_of::<T::Atomic>();

    const INTERIOR_BITS: usize = PAGEMAP_NODE_BITS - log2(size_of::<AtomicPtr<u8>>());

    /// Interior levels above the leaves, the top one included.
    const LEVELS: usize = (Self::INDEX_BITS - Self::LEAF_BITS).div_ceil(Self::INTERIOR_BITS);

    const TOP_BITS: usize = if Self::LEVELS == 0 {
        0
    } else {
        Self::INDEX_BITS - Self::LEAF_BITS - (Self::LEVELS - 1) * Self::INTERIOR_BITS
    };

    const SHAPE_OK: () = assert!(
        GRANULE_BITS > 0 && GRANULE_BITS < ADDRESS_BITS && ADDRESS_BITS <= usize::BITS as usize,
        "pagemap granule must be smaller than the covered address space"
    );

    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        let () = Self::SHAPE_OK;
        TreePagemap {
            root: AtomicPtr::new(ptr::null_mut()),
            nodes: AtomicUsize::new(0),
            _entry: PhantomData,
        }
    }

    /// Number of nodes (interior and leaf) allocated so far.
    pub fn node_count(&self) -> usize {
        self.nodes.load(Ordering::Relaxed)
    }

    /// Depth of the tree in nodes, leaf included.
    pub const fn depth() -> usize {
        Self::LEVELS + 1
    }

    #[inline(always)]
    const fn interior_bytes(bits: usize) -> usize {
        (1 << bits) * size_of::<AtomicPtr<u8>>()
    }

    /// Find the leaf holding cell `index`. With `create`, missing nodes on the
    /// way are allocated; without, an absent node yields null.
    #[inline]
    fn leaf(&self, index: usize, create: bool) -> Result<*mut T::Atomic, PagemapError> {
        let mut slot = &self.root;
        let mut shift = Self::INDEX_BITS;
        let mut bits = Self::TOP_BITS;
        for _ in 0..Self::LEVELS {
            let node = self.child(slot, Self::interior_bytes(bits), create)?;
            if node.is_null() {
                return Ok(ptr::null_mut());
            }
            shift -= bits;
            let i = (index >> shift) & ((1 << bits) - 1);
            slot = unsafe { &*(node as *const AtomicPtr<u8>).add(i) };
            bits = Self::INTERIOR_BITS;
        }
        let leaf = self.child(slot, Self::LEAF_BYTES, create)?;
        Ok(leaf as *mut T::Atomic)
    }

    #[inline(always)]
    fn child(&self, slot: &AtomicPtr<u8>, bytes: usize, create: bool) -> Result<*mut u8, PagemapError> {
        let node = slot.load(Ordering::Acquire);
        if !node.is_null() || !create {
            return Ok(node);
        }
        self.alloc_node(slot, bytes)
    }

    #[cold]
    fn alloc_node(&self, slot: &AtomicPtr<u8>, bytes: usize) -> Result<*mut u8, PagemapError> {
        // Fresh mappings are zeroed: null children, default cells.
        let mem = platform::map_zeroed(bytes)?;
        // Try to install our new node; if someone else beat us, use theirs
        match slot.compare_exchange(ptr::null_mut(), mem, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                self.nodes.fetch_add(1, Ordering::Relaxed);
                log::trace!("installed {}-byte pagemap node at {:p}", bytes, mem);
                Ok(mem)
            }
            Err(existing) => {
                unsafe { platform::unmap(mem, bytes) };
                log::trace!("discarded pagemap node that lost an install race");
                Ok(existing)
            }
        }
    }

    #[inline]
    fn leaf_or_die(&self, index: usize) -> *mut T::Atomic {
        match self.leaf(index, true) {
            Ok(leaf) => leaf,
            Err(e) => error::fatal(&e),
        }
    }

    /// # Safety
    /// `node` must be null or a node at `depth` owned by this tree, with no
    /// concurrent users.
    unsafe fn free_node(node: *mut u8, depth: usize) {
        if node.is_null() {
            return;
        }
        if depth == Self::LEVELS {
            platform::unmap(node, Self::LEAF_BYTES);
            return;
        }
        let bits = if depth == 0 { Self::TOP_BITS } else { Self::INTERIOR_BITS };
        let children = node as *const AtomicPtr<u8>;
        for i in 0..(1usize << bits) {
            Self::free_node((*children.add(i)).load(Ordering::Relaxed), depth + 1);
        }
        platform::unmap(node, Self::interior_bytes(bits));
    }
}

impl<T: PagemapEntry, const GRANULE_BITS: usize, const ADDRESS_BITS: usize> Pagemap
    for TreePagemap<T, GRANULE_BITS, ADDRESS_BITS>
{
    type Entry = T;

    const GRANULE_BITS: usize = GRANULE_BITS;
    const ADDRESS_BITS: usize = ADDRESS_BITS;
    const CONFIG: PagemapConfig = config_for::<T>(false, GRANULE_BITS, ADDRESS_BITS);

    /// Allocates only the top node; the rest of the tree grows with use.
    fn init(&self) -> Result<(), PagemapError> {
        let bytes = if Self::LEVELS == 0 {
            Self::LEAF_BYTES
        } else {
            Self::interior_bytes(Self::TOP_BITS)
        };
        self.child(&self.root, bytes, true).map(|_| ())
    }

    #[inline]
    fn get(&self, addr: usize) -> T {
        let index = addr >> GRANULE_BITS;
        if index >> Self::INDEX_BITS != 0 {
            return T::DEFAULT;
        }
        match self.leaf(index, false) {
            Ok(leaf) if !leaf.is_null() => {
                T::load(unsafe { &*leaf.add(index & (Self::LEAF_ENTRIES - 1)) })
            }
            _ => T::DEFAULT,
        }
    }

    #[inline]
    fn set(&self, addr: usize, value: T) {
        let index = checked_index_range(addr, 1, GRANULE_BITS, ADDRESS_BITS);
        let leaf = self.leaf_or_die(index);
        T::store(unsafe { &*leaf.add(index & (Self::LEAF_ENTRIES - 1)) }, value);
    }

    fn set_range(&self, addr: usize, value: T, count: usize) {
        let mut index = checked_index_range(addr, count, GRANULE_BITS, ADDRESS_BITS);
        let mut remaining = count;
        while remaining > 0 {
            let leaf = self.leaf_or_die(index);
            let start = index & (Self::LEAF_ENTRIES - 1);
            let run = remaining.min(Self::LEAF_ENTRIES - start);
            for i in start..start + run {
                T::store(unsafe { &*leaf.add(i) }, value);
            }
            index += run;
            remaining -= run;
        }
    }
}

impl<T: PagemapEntry, const GRANULE_BITS: usize, const ADDRESS_BITS: usize> Drop
    for TreePagemap<T, GRANULE_BITS, ADDRESS_BITS>
{
    fn drop(&mut self) {
        let root = *self.root.get_mut();
        unsafe { Self::free_node(root, 0) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    // 28 index bits: one 12-bit top node over 16-bit leaves.
    type TwoLevel = TreePagemap<u8, 12, 40>;
    // 44 index bits: 2 + 13 + 13 interior bits over 16-bit leaves.
    type FourLevel = TreePagemap<u8, 4, 48>;

    #[test]
    fn layout_is_root_then_node_count() {
        let word = size_of::<usize>();
        assert_eq!(core::mem::offset_of!(TwoLevel, root), 0);
        assert_eq!(core::mem::offset_of!(TwoLevel, nodes), word);
        assert_eq!(core::mem::offset_of!(FourLevel, nodes), word);
        assert_eq!(size_of::<TreePagemap<*mut u8, 21, 48>>(), 2 * word);
    }

    #[test]
    fn shape_constants() {
        assert_eq!(TwoLevel::LEAF_BITS, 16);
        assert_eq!(TwoLevel::LEVELS, 1);
        assert_eq!(TwoLevel::TOP_BITS, 12);

        assert_eq!(FourLevel::LEVELS, 3);
        assert_eq!(FourLevel::TOP_BITS, 2);
        assert_eq!(FourLevel::depth(), 4);

        // Eight-byte cells leave room for 2^13 per leaf.
        assert_eq!(TreePagemap::<*mut u8, 21, 48>::LEAF_BITS, 13);
        assert_eq!(TreePagemap::<*mut u8, 21, 48>::LEVELS, 2);
    }

    #[test]
    fn get_on_absent_leaf_does_not_allocate() {
        let pm = FourLevel::new();
        for addr in [0usize, 0x10, 0xdead_beef, (1 << 47) + 12345] {
            assert_eq!(pm.get(addr), 0);
        }
        assert_eq!(pm.node_count(), 0);

        pm.set(0x100, 1);
        let populated = pm.node_count();
        assert_eq!(populated, FourLevel::depth());
        // A read in a different, still absent subtree allocates nothing.
        assert_eq!(pm.get(1 << 46), 0);
        assert_eq!(pm.node_count(), populated);
    }

    #[test]
    fn set_and_get_across_levels() {
        let pm = FourLevel::new();
        let addrs = [0x10usize, 0x20, 1 << 20, 1 << 33, (1 << 47) | 0x30];
        for (i, &a) in addrs.iter().enumerate() {
            pm.set(a, i as u8 + 1);
        }
        for (i, &a) in addrs.iter().enumerate() {
            assert_eq!(pm.get(a), i as u8 + 1, "addr {:#x}", a);
            assert_eq!(pm.get(a | 0xf), i as u8 + 1);
        }
        assert_eq!(pm.get(0x40), 0);
    }

    #[test]
    fn set_range_splits_across_leaves() {
        let pm = TwoLevel::new();
        let leaf_span = TwoLevel::LEAF_ENTRIES << 12;
        let start = leaf_span - (2 << 12);
        pm.set_range(start, 9, 5);

        // Root plus the two leaves either side of the boundary.
        assert_eq!(pm.node_count(), 3);
        assert_eq!(pm.get(start - 1), 0);
        for k in 0..5 {
            assert_eq!(pm.get(start + (k << 12)), 9, "cell {}", k);
        }
        assert_eq!(pm.get(start + (5 << 12)), 0);
    }

    #[test]
    fn init_allocates_only_the_top() {
        let pm = TwoLevel::new();
        pm.init().unwrap();
        assert_eq!(pm.node_count(), 1);
        pm.init().unwrap();
        assert_eq!(pm.node_count(), 1);
    }

    #[test]
    fn single_leaf_tree() {
        // Index fits in one leaf: no interior levels at all.
        let pm = TreePagemap::<u8, 20, 32>::new();
        assert_eq!(TreePagemap::<u8, 20, 32>::LEVELS, 0);
        pm.set(0xfff0_0000, 4);
        assert_eq!(pm.get(0xfff0_0000), 4);
        assert_eq!(pm.node_count(), 1);
    }

    #[test]
    fn config_describes_tree() {
        let c = <TwoLevel as Pagemap>::CONFIG;
        assert!(!c.is_flat_pagemap);
        assert_eq!(c.pagemap_bits, 12);
        assert_ne!(c, <crate::pagemap::FlatPagemap<u8, 12, 40> as Pagemap>::CONFIG);
    }

    #[test]
    fn racing_writers_share_one_leaf() {
        const THREADS: usize = 8;
        let pm = Arc::new(FourLevel::new());
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pm = Arc::clone(&pm);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    // Neighbouring cells in one absent leaf.
                    pm.set((1 << 40) + (t << 4), t as u8 + 1);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pm.node_count(), FourLevel::depth(), "duplicate node installed");
        for t in 0..THREADS {
            assert_eq!(pm.get((1 << 40) + (t << 4)), t as u8 + 1);
        }
    }
}
