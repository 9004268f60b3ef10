use crate::config::PagemapConfig;
use crate::platform;

/// Failures the pagemap can report to its owner.
///
/// Tag mismatches and out-of-range writes are not listed: those mean the
/// caller's bookkeeping is corrupt and they abort on the spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PagemapError {
    #[error("failed to reserve {size} bytes of address space")]
    ReservationFailed { size: usize },

    #[error("failed to commit {size} bytes")]
    CommitFailed { size: usize },

    #[error("incorrect ABI of global pagemap: expected {expected}, found {found}")]
    AbiMismatch {
        expected: PagemapConfig,
        found: PagemapConfig,
    },

    #[error("pagemap accessor returned no pagemap")]
    MissingPagemap,
}

impl PagemapError {
    /// Fixed diagnostic for the abort path, where formatting is off limits.
    pub const fn message(&self) -> &'static str {
        match self {
            PagemapError::ReservationFailed { .. } => "chunkmap: out of memory reserving pagemap\n",
            PagemapError::CommitFailed { .. } => "chunkmap: out of memory committing pagemap\n",
            PagemapError::AbiMismatch { .. } => "chunkmap: Incorrect ABI of global pagemap.\n",
            PagemapError::MissingPagemap => "chunkmap: no global pagemap exported\n",
        }
    }
}

/// Log `err` and abort. Used where the pagemap has no fallback for its own
/// bookkeeping storage.
#[cold]
#[inline(never)]
pub fn fatal(err: &PagemapError) -> ! {
    log::error!("{}", err);
    platform::error(err.message())
}
