use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use crate::position::{nearest_line_at_or_before, LineMap};
use crate::transpiler::Dialect;

/// Staleness token: the source's modification time at full resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UpdateSignal(SystemTime);

impl UpdateSignal {
    pub fn new(time: SystemTime) -> Self {
        Self(time)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }

    pub fn time(&self) -> SystemTime {
        self.0
    }
}

/// One compiled source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    /// Logical path of the source, unique within a realm
    pub source_path: String,

    /// Source path relative to the host root, used for display
    pub full_source_path: String,

    /// Logical path of the generated Lua file
    pub output_path: String,

    /// Root-relative path of the generated Lua file; runtime errors name
    /// artifacts by this path
    pub full_output_path: String,

    pub update_signal: UpdateSignal,

    pub dialect: Dialect,

    pub line_map: LineMap,
}

impl CompiledArtifact {
    /// Original line for a generated line, resolving gaps to the nearest
    /// mapped line at or before it.
    pub fn original_line(&self, generated_line: u32) -> Option<u32> {
        nearest_line_at_or_before(&self.line_map, generated_line)
    }
}
