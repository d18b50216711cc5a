use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::CompileError;

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

/// Position in an original source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl SourceLocation {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}

/// A diagnostic message with location and severity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn error(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            location,
            message: message.into(),
        }
    }

    pub fn warning(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            location,
            message: message.into(),
        }
    }

    pub fn info(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            location,
            message: message.into(),
        }
    }

    /// Compile failures surface as warnings: the host keeps running.
    pub fn from_compile_error(error: &CompileError) -> Self {
        let location = match error {
            CompileError::TranspileFailed {
                path,
                position: Some(position),
                ..
            } => SourceLocation::at(path.as_str(), position.line, position.column),
            other => SourceLocation::file(other.path()),
        };
        Self::warning(location, error.to_string())
    }
}

/// Trait for handling diagnostics
/// This allows for dependency injection and testing with mock handlers
pub trait DiagnosticHandler: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);

    fn error(&self, location: SourceLocation, message: &str) {
        self.report(Diagnostic::error(location, message));
    }

    fn warning(&self, location: SourceLocation, message: &str) {
        self.report(Diagnostic::warning(location, message));
    }

    fn info(&self, location: SourceLocation, message: &str) {
        self.report(Diagnostic::info(location, message));
    }

    fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn error_count(&self) -> usize {
        self.count(DiagnosticLevel::Error)
    }

    fn warning_count(&self) -> usize {
        self.count(DiagnosticLevel::Warning)
    }

    fn count(&self, level: DiagnosticLevel) -> usize {
        self.get_diagnostics()
            .iter()
            .filter(|d| d.level == level)
            .count()
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic>;
}

fn lock(diagnostics: &Mutex<Vec<Diagnostic>>) -> MutexGuard<'_, Vec<Diagnostic>> {
    diagnostics.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Console-based diagnostic handler that prints to stderr
pub struct ConsoleDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
    pretty: bool,
}

impl ConsoleDiagnosticHandler {
    pub fn new(pretty: bool) -> Self {
        Self {
            diagnostics: Mutex::new(Vec::new()),
            pretty,
        }
    }
}

impl DiagnosticHandler for ConsoleDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        let level_str = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => "info",
        };

        if self.pretty {
            eprintln!(
                "\x1b[1m{}\x1b[0m at {}: {}",
                level_str, diagnostic.location, diagnostic.message
            );
        } else {
            eprintln!(
                "{} at {}: {}",
                level_str, diagnostic.location, diagnostic.message
            );
        }

        lock(&self.diagnostics).push(diagnostic);
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }
}

/// Collects all diagnostics without printing
#[derive(Default)]
pub struct CollectingDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        lock(&self.diagnostics).push(diagnostic);
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }
}
