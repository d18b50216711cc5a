use rustc_hash::FxHashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::fs::normalize_path;

use super::{CacheManifest, CompiledArtifact, UpdateSignal};

#[derive(Debug, Default)]
struct CacheIndex {
    /// Normalized logical source path -> artifact
    by_source: FxHashMap<String, Arc<CompiledArtifact>>,

    /// Normalized full output path -> normalized logical source path
    by_output: FxHashMap<String, String>,
}

/// Concurrent registry of compiled artifacts, indexed both by logical source
/// path and by the output path runtime errors refer to.
///
/// Both indexes sit behind a single lock so a reader never sees one updated
/// without the other.
#[derive(Debug, Default)]
pub struct CompilationCache {
    index: RwLock<CacheIndex>,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, source_path: &str) -> Option<Arc<CompiledArtifact>> {
        self.read().by_source.get(&normalize_path(source_path)).cloned()
    }

    /// Artifact whose generated Lua lives at `full_output_path`.
    pub fn lookup_by_output_path(&self, full_output_path: &str) -> Option<Arc<CompiledArtifact>> {
        let index = self.read();
        let source_key = index.by_output.get(&normalize_path(full_output_path))?;
        index.by_source.get(source_key).cloned()
    }

    /// Insert or replace the artifact for its source path.
    ///
    /// An artifact previously registered for the same output path under a
    /// different source is evicted. Returns the artifact this one replaced.
    pub fn upsert(
        &self,
        artifact: impl Into<Arc<CompiledArtifact>>,
    ) -> Option<Arc<CompiledArtifact>> {
        let artifact = artifact.into();
        let source_key = normalize_path(&artifact.source_path);
        let output_key = normalize_path(&artifact.full_output_path);

        let mut index = self.write();

        if let Some(owner) = index.by_output.get(&output_key).cloned() {
            if owner != source_key {
                warn!(
                    "{} and {} compile to the same output, evicting {}",
                    owner, source_key, owner
                );
                index.by_source.remove(&owner);
            }
        }

        let previous = index.by_source.insert(source_key.clone(), artifact);
        if let Some(previous) = &previous {
            let previous_output = normalize_path(&previous.full_output_path);
            if previous_output != output_key {
                index.by_output.remove(&previous_output);
            }
        }
        index.by_output.insert(output_key, source_key);

        previous
    }

    pub fn remove(&self, source_path: &str) -> Option<Arc<CompiledArtifact>> {
        let mut index = self.write();
        let removed = index.by_source.remove(&normalize_path(source_path))?;
        index
            .by_output
            .remove(&normalize_path(&removed.full_output_path));
        Some(removed)
    }

    /// True when there is no artifact for the path or the source has been
    /// modified since it was compiled.
    pub fn needs_recompile(&self, source_path: &str, current: &UpdateSignal) -> bool {
        match self.lookup(source_path) {
            Some(artifact) => *current > artifact.update_signal,
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.read().by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every artifact, ordered by source path.
    pub fn artifacts(&self) -> Vec<Arc<CompiledArtifact>> {
        let mut artifacts: Vec<_> = self.read().by_source.values().cloned().collect();
        artifacts.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        artifacts
    }

    pub fn clear(&self) {
        let mut index = self.write();
        index.by_source.clear();
        index.by_output.clear();
    }

    pub fn to_manifest(&self, options_hash: &str) -> CacheManifest {
        let mut manifest = CacheManifest::new(options_hash.to_string());
        manifest.artifacts = self
            .artifacts()
            .iter()
            .map(|artifact| CompiledArtifact::clone(artifact))
            .collect();
        manifest
    }

    /// Register every manifest artifact accepted by `keep`. Returns how many
    /// were restored.
    pub fn restore(
        &self,
        manifest: CacheManifest,
        mut keep: impl FnMut(&CompiledArtifact) -> bool,
    ) -> usize {
        let mut restored = 0;
        for artifact in manifest.artifacts {
            if keep(&artifact) {
                self.upsert(artifact);
                restored += 1;
            } else {
                debug!("Dropping stale manifest entry {}", artifact.source_path);
            }
        }
        restored
    }
}
