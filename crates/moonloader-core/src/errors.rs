use std::io;
use thiserror::Error;

use crate::transpiler::SourcePosition;

/// Why a source could not be turned into a cached Lua artifact.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{path} is not a MoonScript or YueScript source")]
    UnsupportedDialect { path: String },

    #[error("failed to read {path}")]
    SourceUnreadable {
        path: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("{display_message}")]
    TranspileFailed {
        path: String,
        message: String,
        display_message: String,
        position: Option<SourcePosition>,
    },

    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl CompileError {
    /// Logical path the failure is about.
    pub fn path(&self) -> &str {
        match self {
            CompileError::UnsupportedDialect { path }
            | CompileError::SourceUnreadable { path, .. }
            | CompileError::TranspileFailed { path, .. }
            | CompileError::WriteFailed { path, .. } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
