//! Uniform front over the two transpiler backends.
//!
//! Both dialects compile through [`TranspilerAdapter::compile`], which turns
//! whatever the backend produced into a [`CompileResult`] holding Lua text
//! and a generated-line -> original-line map. How the line map is extracted
//! depends on the [`BackendOutput`] variant and never leaks past this module.

mod moonscript;
mod process;
mod yuescript;

pub use moonscript::lines_from_offsets;
pub use process::{DriverProtocol, ProcessBackend};
pub use yuescript::lines_from_comments;

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use crate::fs::file_extension;
use crate::position::{line_col_to_offset, offset_to_line_col, LineMap};

/// Extension of every generated artifact.
pub const TARGET_EXTENSION: &str = "lua";

/// Source language of a script, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    MoonScript,
    YueScript,
}

impl Dialect {
    pub const ALL: [Dialect; 2] = [Dialect::MoonScript, Dialect::YueScript];

    pub fn extension(self) -> &'static str {
        match self {
            Dialect::MoonScript => "moon",
            Dialect::YueScript => "yue",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.extension().eq_ignore_ascii_case(ext))
    }

    pub fn from_path(path: &str) -> Option<Self> {
        file_extension(path).and_then(Self::from_extension)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::MoonScript => write!(f, "MoonScript"),
            Dialect::YueScript => write!(f, "YueScript"),
        }
    }
}

/// Options forwarded to the backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    /// Return the value of the last root statement (default: true)
    #[serde(default = "default_true")]
    pub implicitly_return_root: bool,

    /// Ask YueScript to annotate generated lines with `-- <line>` (default: true)
    #[serde(default = "default_true")]
    pub reserve_line_numbers: bool,

    /// Lua version the output must run on (default: 5.1)
    #[serde(default = "default_target_lua")]
    pub target_lua: String,
}

fn default_true() -> bool {
    true
}

fn default_target_lua() -> String {
    "5.1".to_string()
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            implicitly_return_root: true,
            reserve_line_numbers: true,
            target_lua: default_target_lua(),
        }
    }
}

/// A location in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl SourcePosition {
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let (line, column) = offset_to_line_col(source, offset);
        Self {
            line,
            column,
            offset,
        }
    }

    pub fn from_line_col(source: &str, line: u32, column: u32) -> Self {
        Self {
            line,
            column,
            offset: line_col_to_offset(source, line, column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    Success {
        lua_code: String,
        line_map: LineMap,
    },
    Failure {
        message: String,
        display_message: String,
        position: Option<SourcePosition>,
    },
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileResult::Success { .. })
    }
}

/// Raw output of a backend, before line-map normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOutput {
    /// Generated line -> 0-based byte offset into the original source.
    OffsetMapped {
        code: String,
        posmap: Vec<(u32, usize)>,
    },
    /// Generated lines carry trailing `-- <original line>` comments.
    LineAnnotated { code: String },
}

/// A compile error reported by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendFault {
    pub message: String,
    pub offset: Option<usize>,
    pub line_col: Option<(u32, u32)>,
    pub display: Option<String>,
}

impl BackendFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn at_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn at_line_col(mut self, line: u32, column: u32) -> Self {
        self.line_col = Some((line, column));
        self
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

/// A transpiler for one dialect.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn transpile(&self, source: &str, options: &CompileOptions)
        -> Result<BackendOutput, BackendFault>;

    /// Human-readable rendering of a fault. Falls back to the message when
    /// this returns `None`.
    fn format_error(&self, fault: &BackendFault, _source: &str) -> Option<String> {
        fault.display.clone()
    }
}

/// Dispatches compile requests to the backend of each dialect.
#[derive(Clone)]
pub struct TranspilerAdapter {
    moonscript: Arc<dyn Backend>,
    yuescript: Arc<dyn Backend>,
}

impl TranspilerAdapter {
    pub fn new(moonscript: Arc<dyn Backend>, yuescript: Arc<dyn Backend>) -> Self {
        Self {
            moonscript,
            yuescript,
        }
    }

    /// Adapter driving both transpilers through an external Lua interpreter.
    pub fn with_interpreter(interpreter: &str) -> Self {
        Self::new(
            Arc::new(ProcessBackend::moonscript(interpreter)),
            Arc::new(ProcessBackend::yuescript(interpreter)),
        )
    }

    pub fn backend(&self, dialect: Dialect) -> &Arc<dyn Backend> {
        match dialect {
            Dialect::MoonScript => &self.moonscript,
            Dialect::YueScript => &self.yuescript,
        }
    }

    /// Compile `source`. Never panics: backend panics, faults and empty
    /// output all come back as [`CompileResult::Failure`].
    pub fn compile(
        &self,
        dialect: Dialect,
        source: &str,
        options: &CompileOptions,
    ) -> CompileResult {
        let backend = self.backend(dialect);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.transpile(source, options)));

        match outcome {
            Ok(Ok(output)) => Self::normalize(backend.as_ref(), output, source),
            Ok(Err(fault)) => Self::failure(backend.as_ref(), fault, source),
            Err(payload) => {
                let message = format!("{} panicked: {}", backend.name(), panic_message(&payload));
                warn!("{}", message);
                CompileResult::Failure {
                    display_message: message.clone(),
                    message,
                    position: None,
                }
            }
        }
    }

    fn normalize(backend: &dyn Backend, output: BackendOutput, source: &str) -> CompileResult {
        let (lua_code, line_map) = match output {
            BackendOutput::OffsetMapped { code, posmap } => {
                let line_map = lines_from_offsets(&posmap, source);
                (code, line_map)
            }
            BackendOutput::LineAnnotated { code } => {
                let line_map = lines_from_comments(&code);
                (code, line_map)
            }
        };

        if lua_code.trim().is_empty() {
            let fault = BackendFault::new(format!("{} produced no output", backend.name()));
            return Self::failure(backend, fault, source);
        }

        CompileResult::Success { lua_code, line_map }
    }

    fn failure(backend: &dyn Backend, mut fault: BackendFault, source: &str) -> CompileResult {
        if fault.message.trim().is_empty() {
            fault.message = format!("{} failed without a message", backend.name());
        }

        let position = match (fault.offset, fault.line_col) {
            (Some(offset), _) => Some(SourcePosition::from_offset(source, offset)),
            (None, Some((line, column))) => {
                Some(SourcePosition::from_line_col(source, line, column))
            }
            (None, None) => None,
        };

        let display_message =
            panic::catch_unwind(AssertUnwindSafe(|| backend.format_error(&fault, source)))
                .ok()
                .flatten()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| fault.message.clone());

        CompileResult::Failure {
            message: fault.message,
            display_message,
            position,
        }
    }
}

pub(crate) fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
