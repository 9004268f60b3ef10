//! Build-time configuration.
//!
//! Nothing here is tunable at run time: the cell layout is an ABI shared with
//! any other module that imports our pagemap, so it is fixed when the crate is
//! compiled. Cargo features pick the options and `build.rs` inspects the target.

use core::fmt;

/// log2 of the superslab granule: one pagemap cell per `SUPERSLAB_SIZE` bytes.
pub const SUPERSLAB_BITS: usize = if cfg!(feature = "small-chunks") { 20 } else { 24 };
pub const SUPERSLAB_SIZE: usize = 1 << SUPERSLAB_BITS;

/// Usable virtual address bits covered by the pagemap.
pub const ADDRESS_BITS: usize = if usize::BITS == 64 { 48 } else { 32 };

/// Size of one radix tree node, and the ceiling for a flat table on
/// platforms that would have to commit it eagerly.
pub const PAGEMAP_NODE_BITS: usize = 16;
pub const PAGEMAP_NODE_SIZE: usize = 1 << PAGEMAP_NODE_BITS;

/// Whether reserved address space is only backed once touched.
pub const LAZY_COMMIT: bool = cfg!(chunkmap_lazy_commit);

/// Largest flat table worth committing eagerly.
pub const MAX_FLAT_PAGEMAP_SIZE: usize = PAGEMAP_NODE_SIZE;

/// Bytes per cell of the global chunk map.
pub const CHUNKMAP_ENTRY_SIZE: usize = if cfg!(feature = "rederive") {
    core::mem::size_of::<*mut u8>()
} else {
    1
};

/// Size of a flat table covering the whole address space with the global
/// chunk map's cells.
pub const FLAT_PAGEMAP_BYTES: u128 =
    (1u128 << (ADDRESS_BITS - SUPERSLAB_BITS)) * CHUNKMAP_ENTRY_SIZE as u128;

/// Whether the default pagemap is the flat table (otherwise the radix tree).
/// Without a feature forcing either, the table is flat where commit is lazy
/// or where it fits in `MAX_FLAT_PAGEMAP_SIZE`.
pub const USE_FLAT_PAGEMAP: bool = cfg!(chunkmap_flat_pagemap);

/// Bumped whenever the meaning of `PagemapConfig` or of a cell changes.
pub const PAGEMAP_VERSION: u32 = 1;

/// Cell holds a one-byte classification code.
pub const ENTRY_CLASSIFICATION_BYTE: u8 = 0;
/// Cell holds a pointer whose low byte is the classification code.
pub const ENTRY_CAPABILITY_POINTER: u8 = 1;

/// Description of a pagemap's layout, exchanged with the pagemap pointer
/// when one module hands its pagemap to another. Two modules may only share
/// a pagemap if their descriptors are identical.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagemapConfig {
    pub version: u32,
    pub is_flat_pagemap: bool,
    pub sizeof_pointer: u8,
    pub entry_encoding: u8,
    /// log2 of the bytes covered by one cell.
    pub pagemap_bits: u8,
    pub address_bits: u8,
    pub size_of_entry: u8,
}

impl fmt::Display for PagemapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoding = match self.entry_encoding {
            ENTRY_CLASSIFICATION_BYTE => "byte",
            ENTRY_CAPABILITY_POINTER => "pointer",
            _ => "unknown",
        };
        write!(
            f,
            "v{} {} pagemap, 2^{}-byte cells over {} address bits, {}-byte {} entries, {}-byte pointers",
            self.version,
            if self.is_flat_pagemap { "flat" } else { "tree" },
            self.pagemap_bits,
            self.address_bits,
            self.size_of_entry,
            encoding,
            self.sizeof_pointer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granule_leaves_room_for_slab_tags() {
        assert!(SUPERSLAB_BITS > 2);
        assert!(SUPERSLAB_BITS < ADDRESS_BITS);
        assert_eq!(SUPERSLAB_SIZE, 1 << SUPERSLAB_BITS);
    }

    #[test]
    fn flat_default_follows_commit_cost() {
        if !cfg!(feature = "flat-pagemap") && !cfg!(feature = "tree-pagemap") {
            let small = FLAT_PAGEMAP_BYTES <= MAX_FLAT_PAGEMAP_SIZE as u128;
            assert_eq!(USE_FLAT_PAGEMAP, LAZY_COMMIT || small);
        }
    }

    #[test]
    fn table_size_decides_eager_commit_targets() {
        // 32-bit addresses with 16 MiB granules: 256 byte cells.
        let narrow = 1u128 << (32 - 24);
        assert!(narrow <= MAX_FLAT_PAGEMAP_SIZE as u128);
        // 48-bit addresses with 1 MiB granules: 256 MiB.
        let wide = 1u128 << (48 - 20);
        assert!(wide > MAX_FLAT_PAGEMAP_SIZE as u128);
        assert!(FLAT_PAGEMAP_BYTES >= 1 << (ADDRESS_BITS - SUPERSLAB_BITS));
    }

    #[test]
    fn display_names_topology() {
        let c = PagemapConfig {
            version: PAGEMAP_VERSION,
            is_flat_pagemap: false,
            sizeof_pointer: 8,
            entry_encoding: ENTRY_CLASSIFICATION_BYTE,
            pagemap_bits: 24,
            address_bits: 48,
            size_of_entry: 1,
        };
        let s = c.to_string();
        assert!(s.contains("tree"), "{}", s);
        assert!(s.contains("2^24"), "{}", s);
    }
}
