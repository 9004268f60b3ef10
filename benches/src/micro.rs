/// Microbenchmarks for the chunk map.
///
/// Plain `Instant` timing over a private pagemap; run with
/// `cargo run --release -p chunkmap-benches --bin micro`.

use chunkmap::address::pointer_cast;
use chunkmap::{ChunkMap, FlatPagemap, Pagemap, PlainChunkMap, TreePagemap};
use std::hint::black_box;
use std::time::Instant;

const G: usize = 1 << 21;

/// Label for the summary line, from the environment or default.
fn run_name() -> String {
    std::env::var("BENCH_NAME").unwrap_or_else(|_| "default".to_string())
}

/// ns per `get` over a populated stripe.
fn bench_get<M: Pagemap<Entry = u8>>(map: &PlainChunkMap<'_, M>, iterations: usize) -> f64 {
    let start = Instant::now();
    let mut acc = 0u8;
    for i in 0..iterations {
        acc ^= map.get(black_box((i & 1023) * G));
    }
    black_box(acc);
    start.elapsed().as_nanos() as f64 / iterations as f64
}

/// ns per `large_head` lookup from a granule `k` granules past the head.
fn bench_large_head<M: Pagemap<Entry = u8>>(
    map: &PlainChunkMap<'_, M>,
    head: usize,
    k: usize,
    iterations: usize,
) -> f64 {
    let start = Instant::now();
    for _ in 0..iterations {
        black_box(map.large_head(black_box(head + k * G + 64)));
    }
    start.elapsed().as_nanos() as f64 / iterations as f64
}

/// ns per register/unregister pair of a large allocation of `granules`.
fn bench_register_large<M: Pagemap<Entry = u8>>(
    map: &PlainChunkMap<'_, M>,
    granules: usize,
    iterations: usize,
) -> f64 {
    let p = pointer_cast(1usize << 34);
    let start = Instant::now();
    for _ in 0..iterations {
        map.register_large(black_box(p), granules * G);
        map.unregister_large(black_box(p), granules * G);
    }
    start.elapsed().as_nanos() as f64 / iterations as f64
}

/// ns per register/unregister pair of a small slab.
fn bench_register_slab<M: Pagemap<Entry = u8>>(map: &PlainChunkMap<'_, M>, iterations: usize) -> f64 {
    let start = Instant::now();
    for i in 0..iterations {
        let slab = pointer_cast((2048 + (i & 255)) * G);
        map.register_small_slab(black_box(slab));
        map.unregister_small_slab(black_box(slab));
    }
    start.elapsed().as_nanos() as f64 / iterations as f64
}

fn run<M: Pagemap<Entry = u8>>(label: &str, pm: &M, iterations: usize) -> (f64, f64) {
    let map = PlainChunkMap::new(pm);
    let head = 1usize << 33;
    map.register_large(pointer_cast(head), 1 << 31);
    for k in 0..1024 {
        if k % 3 == 0 {
            map.register_small_slab(pointer_cast(k * G));
        }
    }

    println!("--- {} ---", label);
    let get_ns = bench_get(&map, iterations);
    println!("  get:               {:>8.2} ns", get_ns);
    let mut walk_ns = 0.0;
    for &k in &[1usize, 7, 100, 1023] {
        let ns = bench_large_head(&map, head, k, iterations);
        println!("  large_head k={:>4}: {:>8.2} ns", k, ns);
        if k == 1023 {
            walk_ns = ns;
        }
    }
    for &granules in &[1usize, 16, 512] {
        let ns = bench_register_large(&map, granules, iterations / granules.max(16));
        println!("  register_large {:>4} granules: {:>10.1} ns", granules, ns);
    }
    println!("  register_slab:     {:>8.2} ns", bench_register_slab(&map, iterations));
    println!();
    (get_ns, walk_ns)
}

fn main() {
    let iterations = 1_000_000;
    let name = run_name();

    println!("=== chunk map microbenchmarks ({}) ===\n", name);

    let flat = FlatPagemap::<u8, 21, 40>::new();
    let (flat_get, flat_walk) = run("flat pagemap", &flat, iterations);

    let tree = TreePagemap::<u8, 21, 48>::new();
    let (tree_get, tree_walk) = run("tree pagemap", &tree, iterations);

    println!(
        "SUMMARY|{}|flat_get={:.2}|flat_walk={:.2}|tree_get={:.2}|tree_walk={:.2}",
        name, flat_get, flat_walk, tree_get, tree_walk
    );
    println!("tree nodes: {}", tree.node_count());
}
