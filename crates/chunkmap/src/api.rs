//! C ABI for sharing this module's pagemap with other allocator instances
//! in the same process.

use crate::chunkmap::ChunkmapPagemap;
use crate::config::PagemapConfig;
use crate::pagemap::{GlobalPagemap, Pagemap, PagemapProvider};
use core::ffi::c_void;

/// Layout of the pagemap handed out by [`global_pagemap_accessor`].
pub static PAGEMAP_CONFIG: PagemapConfig = <ChunkmapPagemap as Pagemap>::CONFIG;

/// Return this module's global pagemap and, through `config`, its layout
/// descriptor. Importers validate the descriptor before using the pagemap;
/// see `pagemap::provider::import_pagemap`.
///
/// # Safety
/// `config` must be null or valid for a pointer-sized write.
pub unsafe extern "C" fn global_pagemap_accessor(config: *mut *const PagemapConfig) -> *mut c_void {
    let pm = GlobalPagemap::pagemap();
    if !config.is_null() {
        *config = &PAGEMAP_CONFIG;
        debug_assert!(ChunkmapPagemap::cast_to_pagemap(
            pm as *const ChunkmapPagemap as *mut c_void,
            &PAGEMAP_CONFIG
        )
        .is_ok_and(|cast| core::ptr::eq(cast, pm)));
    }
    pm as *const ChunkmapPagemap as *mut c_void
}

/// Exported pagemap accessor.
///
/// # Safety
/// See [`global_pagemap_accessor`].
#[cfg(feature = "expose-pagemap")]
#[no_mangle]
pub unsafe extern "C" fn chunkmap_pagemap_global_get(
    config: *mut *const PagemapConfig,
) -> *mut c_void {
    global_pagemap_accessor(config)
}
