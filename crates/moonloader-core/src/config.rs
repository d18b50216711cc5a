use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::fs::SearchPaths;
use crate::transpiler::CompileOptions;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "moonloader.yaml";

/// Source excerpt shown under remapped runtime errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcerptOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lines shown before the error line (default: 5)
    #[serde(default = "default_before")]
    pub before: u32,

    /// Lines shown after the error line (default: 2)
    #[serde(default = "default_after")]
    pub after: u32,
}

impl Default for ExcerptOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            before: default_before(),
            after: default_after(),
        }
    }
}

/// Configuration of one loader realm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderConfig {
    /// Root-relative directory compiled Lua is written under. Runtime
    /// errors naming a file below it are remapped.
    #[serde(default = "default_cache_root")]
    pub cache_root: String,

    /// Search-path id sources are resolved against (default: lsv)
    #[serde(default = "default_search_path")]
    pub search_path: String,

    #[serde(default = "default_search_paths")]
    pub search_paths: SearchPaths,

    #[serde(default)]
    pub compile_options: CompileOptions,

    /// Reload cool-down per file in milliseconds (default: 200)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub excerpt: ExcerptOptions,

    /// Rewrite debug introspection records (default: true)
    #[serde(default = "default_true")]
    pub remap_debug_info: bool,

    /// Purge the cache root when the realm starts (default: false)
    #[serde(default)]
    pub purge_on_start: bool,

    /// Save the artifact index after every compile (default: true)
    #[serde(default = "default_true")]
    pub persist_manifest: bool,

    /// Interpreter hosting the transpiler libraries (default: lua)
    #[serde(default = "default_lua_interpreter")]
    pub lua_interpreter: String,
}

fn default_true() -> bool {
    true
}

fn default_before() -> u32 {
    5
}

fn default_after() -> u32 {
    2
}

fn default_cache_root() -> String {
    "cache/moonloader/lua".to_string()
}

fn default_search_path() -> String {
    "lsv".to_string()
}

fn default_search_paths() -> SearchPaths {
    SearchPaths::new().with("lsv", &["lua"])
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_lua_interpreter() -> String {
    "lua".to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            search_path: default_search_path(),
            search_paths: default_search_paths(),
            compile_options: CompileOptions::default(),
            debounce_ms: default_debounce_ms(),
            excerpt: ExcerptOptions::default(),
            remap_debug_info: true,
            purge_on_start: false,
            persist_manifest: true,
            lua_interpreter: default_lua_interpreter(),
        }
    }
}

/// Values given on the command line, applied over the file configuration
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub cache_root: Option<String>,
    pub search_path: Option<String>,
    pub lua_interpreter: Option<String>,
    pub purge_on_start: Option<bool>,
}

impl LoaderConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Write the default configuration to a file
    pub fn init_file(path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(&LoaderConfig::default())?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn merge(&mut self, overrides: &CliOverrides) {
        if let Some(cache_root) = &overrides.cache_root {
            self.cache_root = cache_root.trim_end_matches('/').to_string();
        }
        if let Some(search_path) = &overrides.search_path {
            self.search_path = search_path.clone();
        }
        if let Some(interpreter) = &overrides.lua_interpreter {
            self.lua_interpreter = interpreter.clone();
        }
        if let Some(purge) = overrides.purge_on_start {
            self.purge_on_start = purge;
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
