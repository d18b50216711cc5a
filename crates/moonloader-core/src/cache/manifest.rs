use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::fs::{join, Vfs};

use super::{CacheError, CompiledArtifact, Result, CACHE_VERSION, MANIFEST_FILE_NAME};

/// Persisted form of the artifact index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Schema version for cache format
    pub version: u32,

    /// Hash of the compile options the artifacts were produced with
    pub options_hash: String,

    pub artifacts: Vec<CompiledArtifact>,
}

impl CacheManifest {
    pub fn new(options_hash: String) -> Self {
        Self {
            version: CACHE_VERSION,
            options_hash,
            artifacts: Vec::new(),
        }
    }

    pub fn is_version_compatible(&self) -> bool {
        self.version == CACHE_VERSION
    }

    /// Serialize manifest to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(CacheError::from)
    }

    /// Deserialize manifest from binary format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(CacheError::from)
    }

    /// Root-relative location of the manifest for a cache root.
    pub fn path(cache_root: &str) -> String {
        join(cache_root, MANIFEST_FILE_NAME)
    }

    /// Load the manifest stored under `cache_root`.
    ///
    /// Fails when the file is missing, corrupted, written by another cache
    /// version, or produced under different compile options. Callers treat
    /// any failure as a reason to start from an empty cache.
    pub fn load(vfs: &Vfs, cache_root: &str, options_hash: &str) -> Result<Self> {
        let path = Self::path(cache_root);
        if !vfs.file_system().exists(&path) {
            info!("No cache manifest found at {}", path);
            return Err(CacheError::ManifestNotFound);
        }

        let bytes = vfs.read_root_relative(&path)?;
        let manifest = Self::from_bytes(&bytes).inspect_err(|e| {
            warn!("Corrupted cache manifest: {:?}", e);
        })?;

        if !manifest.is_version_compatible() {
            warn!(
                "Cache version mismatch: expected {}, found {}",
                CACHE_VERSION, manifest.version
            );
            return Err(CacheError::VersionMismatch {
                expected: CACHE_VERSION,
                found: manifest.version,
            });
        }

        if manifest.options_hash != options_hash {
            warn!("Compile options changed, discarding cache manifest");
            return Err(CacheError::OptionsMismatch);
        }

        info!(
            "Loaded cache manifest with {} artifacts",
            manifest.artifacts.len()
        );
        Ok(manifest)
    }

    pub fn save(&self, vfs: &Vfs, cache_root: &str) -> Result<()> {
        let fs = vfs.file_system();
        fs.create_dir_all(cache_root)?;
        fs.write(&Self::path(cache_root), &self.to_bytes()?)?;
        Ok(())
    }
}
