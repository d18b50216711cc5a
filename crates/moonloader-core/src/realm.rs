//! One loader context per host script realm.
//!
//! A realm owns its cache, pipeline, watchdog and remapper. Realms never
//! share a cache: logical paths are only unique within one realm's search
//! path.

use rustc_hash::FxHashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CompilationCache, CompiledArtifact};
use crate::config::LoaderConfig;
use crate::diagnostics::{ConsoleDiagnosticHandler, Diagnostic, DiagnosticHandler};
use crate::errors::CompileError;
use crate::fs::{normalize_path, set_extension, FileSystem, Vfs};
use crate::host::{DebugInfo, ErrorReporter, RunReason, ScriptRunner};
use crate::pipeline::{CompilePipeline, PrecacheReport};
use crate::remap::{ErrorRemapper, RemappingReporter};
use crate::transpiler::{CompileResult, Dialect, TranspilerAdapter, TARGET_EXTENSION};
use crate::watch::Watchdog;

/// What the host should do with a script request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptRequest {
    /// Not a managed script, load it as usual
    PassThrough,
    /// Run this Lua logical path instead
    Run(String),
    /// Report the request as failed without running anything
    Suppress,
}

pub struct Realm {
    config: Arc<LoaderConfig>,
    pipeline: CompilePipeline,
    watchdog: Arc<Watchdog>,
    remapper: Arc<ErrorRemapper>,
    runner: Arc<dyn ScriptRunner>,
    diagnostics: Arc<dyn DiagnosticHandler>,
    /// Normalized source paths the host included through `include`
    included: Mutex<FxHashSet<String>>,
}

impl Realm {
    /// Create a realm with production dependencies
    pub fn new(
        config: LoaderConfig,
        file_system: Arc<dyn FileSystem>,
        runner: Arc<dyn ScriptRunner>,
    ) -> Self {
        let adapter = TranspilerAdapter::with_interpreter(&config.lua_interpreter);
        Self::with_dependencies(
            config,
            file_system,
            adapter,
            runner,
            Arc::new(ConsoleDiagnosticHandler::new(true)),
        )
    }

    /// Create a realm with custom dependencies (for testing)
    pub fn with_dependencies(
        config: LoaderConfig,
        file_system: Arc<dyn FileSystem>,
        adapter: TranspilerAdapter,
        runner: Arc<dyn ScriptRunner>,
        diagnostics: Arc<dyn DiagnosticHandler>,
    ) -> Self {
        let config = Arc::new(config);
        let vfs = Vfs::new(file_system, config.search_paths.clone());
        let cache = Arc::new(CompilationCache::new());
        let watchdog = Arc::new(Watchdog::new(vfs.clone(), config.debounce()));
        let pipeline = CompilePipeline::new(
            vfs.clone(),
            Arc::clone(&cache),
            adapter,
            watchdog.clone(),
            &config,
        );
        let remapper = Arc::new(ErrorRemapper::new(cache, vfs, &config));

        let realm = Self {
            config,
            pipeline,
            watchdog,
            remapper,
            runner,
            diagnostics,
            included: Mutex::new(FxHashSet::default()),
        };
        realm.start();
        realm
    }

    /// Either purge the cache root or pick up the artifacts of a previous
    /// run. An unusable manifest purges as well.
    fn start(&self) {
        if self.config.purge_on_start {
            self.purge();
            return;
        }
        match self.pipeline.load_manifest() {
            Ok(restored) => info!("Restored {} cached artifacts", restored),
            Err(CacheError::ManifestNotFound) => {}
            Err(e) => {
                warn!("Discarding cache: {}", e);
                self.purge();
            }
        }
    }

    fn purge(&self) {
        if let Err(e) = self.pipeline.purge() {
            warn!("Failed to purge {}: {}", self.pipeline.cache_root(), e);
        }
    }

    fn included(&self) -> MutexGuard<'_, FxHashSet<String>> {
        self.included.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &CompilePipeline {
        &self.pipeline
    }

    pub fn cache(&self) -> &Arc<CompilationCache> {
        self.pipeline.cache()
    }

    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    pub fn remapper(&self) -> &Arc<ErrorRemapper> {
        &self.remapper
    }

    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticHandler> {
        &self.diagnostics
    }

    /// Wrap the host's error reporter so errors show original locations.
    pub fn reporter(&self, inner: Arc<dyn ErrorReporter>) -> RemappingReporter {
        RemappingReporter::new(inner, Arc::clone(&self.remapper))
    }

    pub fn remap_debug_info(&self, info: &DebugInfo) -> DebugInfo {
        self.remapper.remap_debug_info(info)
    }

    /// The MoonScript/YueScript source behind a requested file, if any. A
    /// `.lua` request is redirected when a source sibling exists.
    pub fn find_source(&self, file: &str) -> Option<String> {
        let vfs = self.pipeline.vfs();
        let search_path = self.pipeline.search_path();
        if Dialect::from_path(file).is_some() {
            return vfs.exists(file, search_path).then(|| file.to_string());
        }
        if !file.to_ascii_lowercase().ends_with(&format!(".{}", TARGET_EXTENSION)) {
            return None;
        }
        Dialect::ALL
            .iter()
            .map(|dialect| set_extension(file, dialect.extension()))
            .find(|candidate| vfs.exists(candidate, search_path))
    }

    fn compile(&self, source: &str) -> Result<Arc<CompiledArtifact>, CompileError> {
        self.pipeline.compile_file(source, false).inspect_err(|e| {
            self.diagnostics.report(Diagnostic::from_compile_error(e));
        })
    }

    /// Decide how the host should serve a script request.
    pub fn prepare_script(&self, file: &str, reason: RunReason) -> ScriptRequest {
        let Some(source) = self.find_source(file) else {
            return ScriptRequest::PassThrough;
        };
        let key = normalize_path(&source);

        match reason {
            RunReason::Include => {
                self.included().insert(key);
            }
            RunReason::Reload => {
                debug!("Ignoring host reload of {}", source);
                return ScriptRequest::Suppress;
            }
            RunReason::MoonReload => {
                if !self.included().contains(&key) {
                    debug!("Not reloading {}: never included", source);
                    return ScriptRequest::Suppress;
                }
            }
            RunReason::Startup => {}
        }

        match self.compile(&source) {
            Ok(artifact) => ScriptRequest::Run(artifact.output_path.clone()),
            Err(_) => ScriptRequest::Suppress,
        }
    }

    /// Drain file changes and re-run every changed script. Call once per
    /// host tick, on the host thread. Returns the reloaded source paths.
    pub fn think(&self) -> Vec<String> {
        self.think_at(Instant::now())
    }

    pub fn think_at(&self, now: Instant) -> Vec<String> {
        let mut reloaded = Vec::new();
        for source in self.watchdog.think(now) {
            if Dialect::from_path(&source).is_none() {
                continue;
            }
            let request = self.prepare_script(&source, RunReason::MoonReload);
            if let ScriptRequest::Run(lua_path) = request {
                info!("Reloading script {}", source);
                if self.runner.run_script(&lua_path) {
                    reloaded.push(source);
                } else {
                    warn!("Failed to run reloaded script {}", lua_path);
                }
            }
        }
        reloaded
    }

    /// Logical path to hand to clients for a file registered for download.
    /// Sources are compiled first and their Lua output is sent instead.
    pub fn client_file(&self, file: &str) -> Result<String, CompileError> {
        match self.find_source(file) {
            Some(source) => self.compile(&source).map(|a| a.output_path.clone()),
            None => Ok(file.to_string()),
        }
    }

    pub fn precache_file(&self, file: &str) -> Result<Arc<CompiledArtifact>, CompileError> {
        self.pipeline.precache_file(file).inspect_err(|e| {
            self.diagnostics.report(Diagnostic::from_compile_error(e));
        })
    }

    pub fn precache_dir(&self, dir: &str) -> PrecacheReport {
        let report = self.pipeline.precache_dir(dir);
        for error in &report.failed {
            self.diagnostics.report(Diagnostic::from_compile_error(error));
        }
        report
    }

    pub fn to_lua(&self, dialect: Dialect, source: &str) -> CompileResult {
        self.pipeline.to_lua(dialect, source)
    }
}
