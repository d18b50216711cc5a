//! Mock implementations for testing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use moonloader_core::diagnostics::{Diagnostic, DiagnosticHandler};
use moonloader_core::{
    Backend, BackendFault, BackendOutput, CompileOptions, ErrorReporter, FileWatcher, LuaError,
    ScriptRunner,
};

use crate::fixtures::SYNTAX_ERROR;

/// MoonScript stand-in: one Lua line per source line, mapped by byte
/// offset. Fails at the first [`SYNTAX_ERROR`] marker.
#[derive(Debug, Default)]
pub struct MoonEcho {
    calls: AtomicUsize,
}

impl MoonEcho {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Backend for MoonEcho {
    fn name(&self) -> &str {
        "moon-echo"
    }

    fn transpile(&self, source: &str, _: &CompileOptions) -> Result<BackendOutput, BackendFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(offset) = source.find(SYNTAX_ERROR) {
            return Err(BackendFault::new("Failed to parse")
                .at_offset(offset)
                .with_display(format!("Failed to parse at byte {}", offset)));
        }

        let mut code = String::from("local _moon\n");
        let mut posmap = Vec::new();
        let mut offset = 0;
        for (i, line) in source.split('\n').enumerate() {
            posmap.push((i as u32 + 2, offset));
            code.push_str(line);
            code.push('\n');
            offset += line.len() + 1;
        }
        Ok(BackendOutput::OffsetMapped { code, posmap })
    }
}

/// YueScript stand-in: every source line becomes a `do` block whose last
/// line carries the `-- <line>` annotation.
#[derive(Debug, Default)]
pub struct YueEcho {
    calls: AtomicUsize,
}

impl YueEcho {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Backend for YueEcho {
    fn name(&self) -> &str {
        "yue-echo"
    }

    fn transpile(&self, source: &str, _: &CompileOptions) -> Result<BackendOutput, BackendFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(line) = source.lines().position(|l| l.contains(SYNTAX_ERROR)) {
            return Err(BackendFault::new("unexpected symbol").at_line_col(line as u32 + 1, 1));
        }

        let code = source
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| format!("do\n  {} -- {}\nend\n", line.trim(), i + 1))
            .collect();
        Ok(BackendOutput::LineAnnotated { code })
    }
}

/// Backend that always panics
#[derive(Debug, Default)]
pub struct PanickingBackend;

impl Backend for PanickingBackend {
    fn name(&self) -> &str {
        "panicking"
    }

    fn transpile(&self, _: &str, _: &CompileOptions) -> Result<BackendOutput, BackendFault> {
        panic!("backend blew up")
    }
}

/// Records every script the host was asked to run
#[derive(Debug, Default)]
pub struct RecordingRunner {
    runs: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

impl ScriptRunner for RecordingRunner {
    fn run_script(&self, logical_path: &str) -> bool {
        self.runs.lock().unwrap().push(logical_path.to_string());
        true
    }
}

/// Records what reaches the host's error channel
#[derive(Debug, Default)]
pub struct RecordingReporter {
    errors: Mutex<Vec<LuaError>>,
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn errors(&self) -> Vec<LuaError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn lua_error(&self, error: &LuaError) {
        self.errors.lock().unwrap().push(error.clone());
    }

    fn msg(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

/// Records watch registrations
#[derive(Debug, Default)]
pub struct RecordingWatcher {
    watched: Mutex<Vec<(String, String)>>,
}

impl RecordingWatcher {
    pub fn watched(&self) -> Vec<(String, String)> {
        self.watched.lock().unwrap().clone()
    }
}

impl FileWatcher for RecordingWatcher {
    fn watch_file(&self, logical_path: &str, search_path: &str) {
        self.watched
            .lock()
            .unwrap()
            .push((logical_path.to_string(), search_path.to_string()));
    }
}

/// A mock diagnostic handler that collects diagnostics
#[derive(Debug, Default)]
pub struct MockDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl MockDiagnosticHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl DiagnosticHandler for MockDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic);
    }

    fn get_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap().clone()
    }
}
