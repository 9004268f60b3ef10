extern crate libc;

pub mod address;
pub mod api;
pub mod chunkmap;
pub mod config;
pub mod error;
pub mod pagemap;
pub mod platform;
pub mod util;

pub use chunkmap::{
    chunkmap, CapabilityChunkMap, ChunkKind, ChunkMap, ChunkMapSuperslabKind, DefaultChunkMap,
    PlainChunkMap, SlabKind,
};
pub use config::PagemapConfig;
pub use error::PagemapError;
pub use pagemap::{FlatPagemap, Pagemap, TreePagemap};
