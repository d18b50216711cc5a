//! Compile-cache-remap core of the Moonloader script loader.
//!
//! Transpiles MoonScript and YueScript sources to Lua, persists the output
//! under a cache root that mirrors the source layout, and maps runtime error
//! locations reported against the generated Lua back to the original files.

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod excerpt;
pub mod fs;
pub mod host;
pub mod pipeline;
pub mod position;
pub mod realm;
pub mod remap;
pub mod transpiler;
pub mod watch;

pub use cache::{CompilationCache, CompiledArtifact, LineMap, UpdateSignal};
pub use config::{CliOverrides, ExcerptOptions, LoaderConfig};
pub use diagnostics::{
    CollectingDiagnosticHandler, ConsoleDiagnosticHandler, Diagnostic, DiagnosticHandler,
    DiagnosticLevel, SourceLocation,
};
pub use errors::{CompileError, ConfigError};
pub use fs::{FileSystem, MockFileSystem, RealFileSystem, SearchPaths, Vfs};
pub use host::{DebugInfo, ErrorReporter, LuaError, RunReason, ScriptRunner, StackEntry};
pub use pipeline::{CompilePipeline, PrecacheReport};
pub use realm::{Realm, ScriptRequest};
pub use remap::{ErrorRemapper, RemappedLocation, RemappingReporter};
pub use transpiler::{
    Backend, BackendFault, BackendOutput, CompileOptions, CompileResult, Dialect,
    SourcePosition, TranspilerAdapter,
};
pub use watch::{FileWatcher, Watchdog};
