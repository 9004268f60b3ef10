fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_family = std::env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    let feature = |name: &str| std::env::var_os(format!("CARGO_FEATURE_{}", name)).is_some();

    println!("cargo:rustc-check-cfg=cfg(chunkmap_lazy_commit)");
    println!("cargo:rustc-check-cfg=cfg(chunkmap_flat_pagemap)");
    println!("cargo:rerun-if-changed=build.rs");

    // Unix mmap reservations are only backed by physical pages once touched.
    // Windows needs an explicit MEM_COMMIT, so a flat table there would be
    // committed in full up front.
    let lazy_commit = target_family.split(',').any(|f| f == "unix") && target_os != "emscripten";
    if lazy_commit {
        println!("cargo:rustc-cfg=chunkmap_lazy_commit");
    }

    // Mirrors `config::FLAT_PAGEMAP_BYTES`: a table no bigger than one tree
    // node costs nothing to commit eagerly.
    let pointer_width: usize = std::env::var("CARGO_CFG_TARGET_POINTER_WIDTH")
        .ok()
        .and_then(|w| w.parse().ok())
        .unwrap_or(64);
    let address_bits = if pointer_width == 64 { 48 } else { 32 };
    let granule_bits = if feature("SMALL_CHUNKS") { 20 } else { 24 };
    let entry_size = if feature("REDERIVE") { pointer_width / 8 } else { 1 };
    let table_bytes = (1u128 << (address_bits - granule_bits)) * entry_size as u128;
    let small_table = table_bytes <= 1 << 16;

    let flat = if feature("FLAT_PAGEMAP") {
        true
    } else if feature("TREE_PAGEMAP") {
        false
    } else {
        lazy_commit || small_table
    };
    if flat {
        println!("cargo:rustc-cfg=chunkmap_flat_pagemap");
    }
}
