//! Contracts of the host Lua runtime the loader plugs into.

use serde::{Deserialize, Serialize};

/// Why the host is asking for a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunReason {
    /// An `include` from running Lua code
    Include,
    /// Autorun during realm startup
    Startup,
    /// The host's own file-change reload
    Reload,
    /// A reload issued by the loader after a source changed
    MoonReload,
}

/// Executes Lua in the host realm.
pub trait ScriptRunner: Send + Sync {
    /// Run the Lua file at `logical_path`. Returns false if the host could
    /// not load or run it.
    fn run_script(&self, logical_path: &str) -> bool;
}

/// One frame of a runtime error's call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    pub source: String,
    /// Current line, `-1` when the host does not know it
    pub line: i32,
}

impl StackEntry {
    pub fn new(source: impl Into<String>, line: i32) -> Self {
        Self {
            source: source.into(),
            line,
        }
    }
}

/// A runtime error escaping to the host's error callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuaError {
    pub message: String,
    pub stack: Vec<StackEntry>,
}

impl LuaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
        }
    }

    pub fn with_frame(mut self, source: impl Into<String>, line: i32) -> Self {
        self.stack.push(StackEntry::new(source, line));
        self
    }
}

/// Function introspection record, as returned by `debug.getinfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub source: String,
    pub short_src: String,
    pub currentline: i32,
    pub linedefined: i32,
    pub lastlinedefined: i32,
}

/// The host's error and message channel.
pub trait ErrorReporter: Send + Sync {
    fn lua_error(&self, error: &LuaError);

    /// Plain text on the host's console.
    fn msg(&self, text: &str);
}
