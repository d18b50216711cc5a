//! Compile orchestration: staleness check, read, transpile, write, record.

use rayon::prelude::*;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{hash_options, CacheError, CacheManifest, CompilationCache, CompiledArtifact};
use crate::config::LoaderConfig;
use crate::errors::CompileError;
use crate::fs::{join, parent_dir, set_extension, Vfs};
use crate::transpiler::{
    CompileOptions, CompileResult, Dialect, TranspilerAdapter, TARGET_EXTENSION,
};
use crate::watch::FileWatcher;

/// Outcome of precaching a directory.
#[derive(Debug, Default)]
pub struct PrecacheReport {
    pub compiled: Vec<Arc<CompiledArtifact>>,
    pub failed: Vec<CompileError>,
}

pub struct CompilePipeline {
    vfs: Vfs,
    cache: Arc<CompilationCache>,
    adapter: TranspilerAdapter,
    watcher: Arc<dyn FileWatcher>,
    search_path: String,
    cache_root: String,
    options: CompileOptions,
    options_hash: String,
    persist_manifest: bool,
}

impl CompilePipeline {
    pub fn new(
        vfs: Vfs,
        cache: Arc<CompilationCache>,
        adapter: TranspilerAdapter,
        watcher: Arc<dyn FileWatcher>,
        config: &LoaderConfig,
    ) -> Self {
        Self {
            vfs,
            cache,
            adapter,
            watcher,
            search_path: config.search_path.clone(),
            cache_root: config.cache_root.trim_end_matches('/').to_string(),
            options: config.compile_options.clone(),
            options_hash: hash_options(&config.compile_options),
            persist_manifest: config.persist_manifest,
        }
    }

    pub fn cache(&self) -> &Arc<CompilationCache> {
        &self.cache
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    pub fn search_path(&self) -> &str {
        &self.search_path
    }

    pub fn cache_root(&self) -> &str {
        &self.cache_root
    }

    /// Logical path of the Lua file generated for a source.
    pub fn output_path_for(logical_path: &str) -> String {
        set_extension(logical_path, TARGET_EXTENSION)
    }

    /// Compile `logical_path` into the cache root unless the cached artifact
    /// is still fresh. `force` skips the freshness check.
    pub fn compile_file(
        &self,
        logical_path: &str,
        force: bool,
    ) -> Result<Arc<CompiledArtifact>, CompileError> {
        let (artifact, compiled) = self.compile_unsaved(logical_path, force)?;
        if compiled {
            self.persist();
        }
        Ok(artifact)
    }

    /// Compile without saving the manifest. The flag tells whether the
    /// backend ran or a fresh cached artifact was returned.
    fn compile_unsaved(
        &self,
        logical_path: &str,
        force: bool,
    ) -> Result<(Arc<CompiledArtifact>, bool), CompileError> {
        let dialect =
            Dialect::from_path(logical_path).ok_or_else(|| CompileError::UnsupportedDialect {
                path: logical_path.to_string(),
            })?;

        let unreadable = |source: Option<io::Error>| CompileError::SourceUnreadable {
            path: logical_path.to_string(),
            source,
        };

        let signal = self
            .vfs
            .modified_signal(logical_path, &self.search_path)
            .map_err(|e| unreadable(Some(e)))?;

        if !force && !self.cache.needs_recompile(logical_path, &signal) {
            if let Some(artifact) = self.cache.lookup(logical_path) {
                debug!("Cache hit for {}", logical_path);
                return Ok((artifact, false));
            }
        }

        let bytes = self
            .vfs
            .read_bytes(logical_path, &self.search_path)
            .map_err(|e| unreadable(Some(e)))?;
        if bytes.is_empty() {
            return Err(unreadable(None));
        }
        let source = String::from_utf8(bytes)
            .map_err(|e| unreadable(Some(io::Error::new(io::ErrorKind::InvalidData, e))))?;

        self.watcher.watch_file(logical_path, &self.search_path);

        let (lua_code, line_map) = match self.adapter.compile(dialect, &source, &self.options) {
            CompileResult::Success { lua_code, line_map } => (lua_code, line_map),
            CompileResult::Failure {
                message,
                display_message,
                position,
            } => {
                warn!("Failed to compile {}: {}", logical_path, message);
                return Err(CompileError::TranspileFailed {
                    path: logical_path.to_string(),
                    message,
                    display_message,
                    position,
                });
            }
        };

        let output_path = Self::output_path_for(logical_path);
        let write_failed = |source: io::Error| CompileError::WriteFailed {
            path: join(&self.cache_root, &output_path),
            source,
        };
        self.vfs
            .create_directories(parent_dir(&output_path), &self.cache_root)
            .map_err(write_failed)?;
        self.vfs
            .write_bytes(&output_path, &self.cache_root, lua_code.as_bytes())
            .map_err(|e| {
                warn!("Failed to write {}: {}", output_path, e);
                write_failed(e)
            })?;

        let resolved = self
            .vfs
            .resolve(logical_path, &self.search_path)
            .unwrap_or_else(|| logical_path.to_string());
        let artifact = Arc::new(CompiledArtifact {
            source_path: logical_path.to_string(),
            full_source_path: self.root_relative(&resolved),
            full_output_path: self.root_relative(&join(&self.cache_root, &output_path)),
            output_path,
            update_signal: signal,
            dialect,
            line_map,
        });
        self.cache.upsert(Arc::clone(&artifact));
        debug!("Compiled {} -> {}", logical_path, artifact.full_output_path);

        Ok((artifact, true))
    }

    fn persist(&self) {
        if self.persist_manifest {
            if let Err(e) = self.save_manifest() {
                warn!("Failed to save cache manifest: {}", e);
            }
        }
    }

    /// Round-trip through the absolute path so every artifact carries the
    /// host's canonical root-relative spelling.
    fn root_relative(&self, path: &str) -> String {
        let absolute = self.vfs.absolute(path);
        self.vfs
            .path_relative_to_root(&absolute)
            .unwrap_or_else(|| path.replace('\\', "/"))
    }

    pub fn precache_file(&self, logical_path: &str) -> Result<Arc<CompiledArtifact>, CompileError> {
        debug!("Precaching {}", logical_path);
        self.compile_file(logical_path, false)
    }

    /// Compile every MoonScript/YueScript source below a logical directory,
    /// in parallel. Failures are collected; they do not stop the others.
    pub fn precache_dir(&self, logical_dir: &str) -> PrecacheReport {
        let sources: Vec<String> = self
            .vfs
            .walk(logical_dir, &self.search_path)
            .into_iter()
            .filter(|path| Dialect::from_path(path).is_some())
            .collect();

        let results: Vec<_> = sources
            .par_iter()
            .map(|source| {
                debug!("Precaching {}", source);
                self.compile_unsaved(source, false)
            })
            .collect();

        let mut report = PrecacheReport::default();
        let mut any_compiled = false;
        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok((artifact, compiled)) => {
                    any_compiled |= compiled;
                    report.compiled.push(artifact);
                }
                Err(e) => {
                    warn!("Failed to precache {}: {}", source, e);
                    report.failed.push(e);
                }
            }
        }
        if any_compiled {
            self.persist();
        }

        info!(
            "Precached {}: {} compiled, {} failed",
            logical_dir,
            report.compiled.len(),
            report.failed.len()
        );
        report
    }

    /// Compile a string without touching the cache.
    pub fn to_lua(&self, dialect: Dialect, source: &str) -> CompileResult {
        self.adapter.compile(dialect, source, &self.options)
    }

    pub fn save_manifest(&self) -> Result<(), CacheError> {
        self.cache
            .to_manifest(&self.options_hash)
            .save(&self.vfs, &self.cache_root)
    }

    /// Restore the index from the persisted manifest, dropping entries whose
    /// generated file no longer exists.
    pub fn load_manifest(&self) -> Result<usize, CacheError> {
        let manifest = CacheManifest::load(&self.vfs, &self.cache_root, &self.options_hash)?;
        let fs = self.vfs.file_system();
        Ok(self
            .cache
            .restore(manifest, |artifact| fs.exists(&artifact.full_output_path)))
    }

    /// Forget every artifact and delete the cache root.
    pub fn purge(&self) -> io::Result<usize> {
        self.cache.clear();
        let removed = self.vfs.purge(&self.cache_root)?;
        info!("Purged {} cached files from {}", removed, self.cache_root);
        Ok(removed)
    }
}
