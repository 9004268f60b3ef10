#![no_main]

use chunkmap::address::pointer_cast;
use chunkmap::{ChunkKind, ChunkMap, PlainChunkMap, TreePagemap};
use libfuzzer_sys::fuzz_target;

/// Fuzz target that interprets a byte slice as chunk map operations and
/// checks the map against a per-granule model.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=small slab, 1=medium slab, 2=large, 3=release)
///   byte 1: slot index
///   byte 2: size in granules, minus one (large only)
///
/// Slot `s` owns the 256 granules starting at `(s + 1) * 256`, so slots
/// never overlap and every registration fits in its slot.
const G: usize = 1 << 21;
const SLOTS: usize = 32;
const SLOT_GRANULES: usize = 256;

#[derive(Clone, Copy)]
enum Live {
    Empty,
    Slab(bool),
    Large(usize),
}

fn slot_base(slot: usize) -> usize {
    (slot + 1) * SLOT_GRANULES * G
}

fuzz_target!(|data: &[u8]| {
    let pm = TreePagemap::<u8, 21, 48>::new();
    let map = PlainChunkMap::new(&pm);
    let mut live = [Live::Empty; SLOTS];

    for op in data.chunks_exact(3) {
        let slot = op[1] as usize % SLOTS;
        let base = slot_base(slot);
        let p = pointer_cast(base);

        // Release whatever the slot holds before reusing it.
        match live[slot] {
            Live::Empty => {}
            Live::Slab(small) => {
                if small {
                    map.unregister_small_slab(p);
                } else {
                    map.unregister_medium_slab(p);
                }
            }
            Live::Large(size) => map.unregister_large(p, size),
        }
        live[slot] = Live::Empty;

        match op[0] & 3 {
            0 => {
                map.register_small_slab(p);
                live[slot] = Live::Slab(true);
            }
            1 => {
                map.register_medium_slab(p);
                live[slot] = Live::Slab(false);
            }
            2 => {
                let size = (op[2] as usize + 1) * G - (op[2] as usize & 7);
                map.register_large(p, size);
                live[slot] = Live::Large(size);
            }
            _ => {}
        }
    }

    for (slot, state) in live.iter().enumerate() {
        let base = slot_base(slot);
        match *state {
            Live::Empty => assert_eq!(map.classify(base), ChunkKind::NotOurs),
            Live::Slab(small) => {
                let want = if small { ChunkKind::SmallSlab } else { ChunkKind::MediumSlab };
                assert_eq!(map.classify(base + G - 1), want);
                assert_eq!(map.classify(base + G), ChunkKind::NotOurs);
            }
            Live::Large(size) => {
                let granules = size.next_power_of_two() / G;
                for k in 0..granules {
                    assert_eq!(map.large_head(base + k * G + 1), Some(base));
                }
                assert_eq!(map.classify(base + granules * G), ChunkKind::NotOurs);
            }
        }
    }
});
