//! Where the process-wide pagemap lives.
//!
//! A module either owns its pagemap ([`GlobalPagemap`]) or borrows one that
//! another module exports ([`ExternalGlobalPagemap`]). Borrowing goes through
//! a C-ABI accessor that returns the pagemap together with its
//! [`PagemapConfig`], and the borrower refuses the pagemap unless the
//! descriptor matches its own layout exactly. Two allocators built with
//! different cell encodings must never write each other's metadata.

use super::Pagemap;
use crate::chunkmap::ChunkmapPagemap;
use crate::config::PagemapConfig;
use crate::error::PagemapError;
use core::ffi::c_void;
use core::ptr;

/// Source of the `'static` pagemap a chunk map is built on.
pub trait PagemapProvider {
    type Map: Pagemap + 'static;

    fn pagemap() -> &'static Self::Map;
}

/// The pagemap owned by this module. Storage is reserved on first write.
static GLOBAL_PAGEMAP: ChunkmapPagemap = ChunkmapPagemap::new();

/// Provider for the pagemap private to this module.
pub struct GlobalPagemap;

impl PagemapProvider for GlobalPagemap {
    type Map = ChunkmapPagemap;

    #[inline(always)]
    fn pagemap() -> &'static ChunkmapPagemap {
        &GLOBAL_PAGEMAP
    }
}

/// Signature of the exported pagemap accessor. Writes the address of the
/// pagemap's descriptor through `config` (when non-null) and returns the
/// pagemap itself.
pub type PagemapAccessor = unsafe extern "C" fn(config: *mut *const PagemapConfig) -> *mut c_void;

/// Fetch a pagemap through `accessor` and check it has layout `M`.
///
/// # Safety
/// `accessor` must follow the [`PagemapAccessor`] contract, and whatever it
/// returns must stay alive for the rest of the process.
pub unsafe fn import_pagemap<M: Pagemap + 'static>(
    accessor: PagemapAccessor,
) -> Result<&'static M, PagemapError> {
    let mut config: *const PagemapConfig = ptr::null();
    let pm = accessor(&mut config);
    let Some(config) = config.as_ref() else {
        return Err(PagemapError::MissingPagemap);
    };
    let map = M::cast_to_pagemap(pm, config)?;
    log::debug!("imported pagemap at {:p}: {}", pm, config);
    Ok(map)
}

#[cfg(feature = "external-pagemap")]
pub use external::ExternalGlobalPagemap;

#[cfg(feature = "external-pagemap")]
mod external {
    use super::{import_pagemap, PagemapProvider};
    use crate::chunkmap::ChunkmapPagemap;
    use crate::config::PagemapConfig;
    use crate::error;
    use core::ffi::c_void;
    use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

    extern "C" {
        fn chunkmap_pagemap_global_get(config: *mut *const PagemapConfig) -> *mut c_void;
    }

    const UNINIT: u8 = 0;
    const INITIALIZING: u8 = 1;
    const READY: u8 = 2;

    static STATE: AtomicU8 = AtomicU8::new(UNINIT);
    static EXTERNAL_PAGEMAP: AtomicPtr<ChunkmapPagemap> = AtomicPtr::new(core::ptr::null_mut());

    /// Provider for a pagemap exported by another module through
    /// `chunkmap_pagemap_global_get`. The first call performs the ABI
    /// handshake; a mismatch is fatal.
    pub struct ExternalGlobalPagemap;

    impl PagemapProvider for ExternalGlobalPagemap {
        type Map = ChunkmapPagemap;

        #[inline(always)]
        fn pagemap() -> &'static ChunkmapPagemap {
            let pm = EXTERNAL_PAGEMAP.load(Ordering::Acquire);
            if !pm.is_null() {
                return unsafe { &*pm };
            }
            handshake()
        }
    }

    #[cold]
    #[inline(never)]
    fn handshake() -> &'static ChunkmapPagemap {
        match STATE.compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {}
            Err(_) => {
                while STATE.load(Ordering::Acquire) != READY {
                    core::hint::spin_loop();
                }
                return unsafe { &*EXTERNAL_PAGEMAP.load(Ordering::Acquire) };
            }
        }

        match unsafe { import_pagemap::<ChunkmapPagemap>(chunkmap_pagemap_global_get) } {
            Ok(pm) => {
                EXTERNAL_PAGEMAP.store(pm as *const ChunkmapPagemap as *mut _, Ordering::Release);
                STATE.store(READY, Ordering::Release);
                pm
            }
            Err(e) => error::fatal(&e),
        }
    }
}

/// Provider selected for this build.
#[cfg(feature = "external-pagemap")]
pub type DefaultProvider = ExternalGlobalPagemap;
#[cfg(not(feature = "external-pagemap"))]
pub type DefaultProvider = GlobalPagemap;
