//! Registry of compiled artifacts.
//!
//! Tracks which logical sources have been compiled, where their Lua output
//! lives, how fresh it is, and how generated lines map back to the source.
//! The index can be persisted beside the artifacts so error remapping keeps
//! working for output produced by an earlier run.

mod artifact;
mod error;
mod hash;
mod manifest;
mod registry;

pub use crate::position::LineMap;
pub use artifact::{CompiledArtifact, UpdateSignal};
pub use error::{CacheError, Result};
pub use hash::hash_options;
pub use manifest::CacheManifest;
pub use registry::CompilationCache;

/// Cache format version - increment when the manifest layout changes
pub const CACHE_VERSION: u32 = 1;

/// Manifest file name, stored inside the cache root
pub const MANIFEST_FILE_NAME: &str = ".manifest.bin";
