//! Runtime error remapping.
//!
//! Errors raised by compiled scripts name the generated Lua file under the
//! cache root. [`ErrorRemapper`] rewrites those locations to the original
//! MoonScript/YueScript file and line. Anything not under the cache root is
//! passed through untouched, and an internal panic degrades to pass-through
//! as well: this code runs inside the host's error callback.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};
use tracing::warn;

use crate::cache::{CompilationCache, CompiledArtifact};
use crate::config::{ExcerptOptions, LoaderConfig};
use crate::excerpt::render_source_excerpt;
use crate::fs::{normalize_path, Vfs};
use crate::host::{DebugInfo, ErrorReporter, LuaError, StackEntry};
use crate::transpiler::panic_message;

/// `<source>:<line>:` at the start of a message, with the whitespace that
/// separates it from the rest
static LEADING_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?):(\d+):(\s*)").expect("leading location pattern is valid")
});

/// `<source>:<line>:` or `<source>:<line>>` (as in `function <x.lua:5>`)
/// anywhere in a message
static EMBEDDED_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s:()'"\[\]<>]+):(\d+)([:>])"#).expect("embedded location pattern is valid")
});

/// Where a remapped error really happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemappedLocation {
    /// Root-relative path of the original source
    pub source: String,
    /// Logical path of the original source
    pub source_path: String,
    pub line: u32,
    /// Remainder of the error message after the location
    pub message: String,
}

fn guarded<T>(operation: impl FnOnce() -> T, fallback: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(operation)) {
        Ok(value) => value,
        Err(payload) => {
            warn!("Error remapping panicked: {}", panic_message(&payload));
            fallback()
        }
    }
}

pub struct ErrorRemapper {
    cache: Arc<CompilationCache>,
    vfs: Vfs,
    search_path: String,
    /// Normalized cache root with a trailing `/`
    prefix: String,
    excerpt: ExcerptOptions,
    remap_debug_info: bool,
}

impl ErrorRemapper {
    pub fn new(cache: Arc<CompilationCache>, vfs: Vfs, config: &LoaderConfig) -> Self {
        Self {
            cache,
            vfs,
            search_path: config.search_path.clone(),
            prefix: format!("{}/", normalize_path(&config.cache_root).trim_end_matches('/')),
            excerpt: config.excerpt.clone(),
            remap_debug_info: config.remap_debug_info,
        }
    }

    pub fn cache(&self) -> &Arc<CompilationCache> {
        &self.cache
    }

    /// Artifact behind a chunk name, if the name points into the cache root.
    fn managed_artifact(&self, source: &str) -> Option<(bool, Arc<CompiledArtifact>)> {
        let (at, path) = match source.strip_prefix('@') {
            Some(path) => (true, path),
            None => (false, source),
        };
        if !normalize_path(path).starts_with(&self.prefix) {
            return None;
        }
        self.cache.lookup_by_output_path(path).map(|a| (at, a))
    }

    /// Original line, or `None` when the line precedes every mapping.
    fn remap_line(artifact: &CompiledArtifact, line: i32) -> Option<i32> {
        if line <= 0 {
            return None;
        }
        artifact
            .original_line(line as u32)
            .and_then(|l| i32::try_from(l).ok())
    }

    fn stack_entry(&self, source: &str, line: i32) -> (String, i32) {
        match self.managed_artifact(source) {
            Some((at, artifact)) => {
                let source = if at {
                    format!("@{}", artifact.full_source_path)
                } else {
                    artifact.full_source_path.clone()
                };
                (source, Self::remap_line(&artifact, line).unwrap_or(line))
            }
            None => (source.to_string(), line),
        }
    }

    /// Rewrite one stack frame. Frames outside the cache root, and frames
    /// whose artifact is unknown, come back unchanged.
    pub fn remap_stack_entry(&self, source: &str, line: i32) -> (String, i32) {
        guarded(
            || self.stack_entry(source, line),
            || (source.to_string(), line),
        )
    }

    fn embedded_locations<'a>(&self, text: &'a str) -> Cow<'a, str> {
        EMBEDDED_LOCATION.replace_all(text, |caps: &Captures| {
            let line = match caps[2].parse::<i32>() {
                Ok(line) => line,
                Err(_) => return caps[0].to_string(),
            };
            let (source, line) = self.stack_entry(&caps[1], line);
            format!("{}:{}{}", source, line, &caps[3])
        })
    }

    fn error_message(&self, message: &str) -> (String, Option<RemappedLocation>) {
        let Some(caps) = LEADING_LOCATION.captures(message) else {
            return (self.embedded_locations(message).into_owned(), None);
        };

        let source = &caps[1];
        let separator = &caps[3];
        let managed = caps[2]
            .parse::<i32>()
            .ok()
            .and_then(|line| self.managed_artifact(source).map(|(at, a)| (at, a, line)));
        match managed {
            Some((at, artifact, line)) => {
                let rest = self.embedded_locations(&message[caps[0].len()..]).into_owned();
                let display = if at {
                    format!("@{}", artifact.full_source_path)
                } else {
                    artifact.full_source_path.clone()
                };
                // An unmapped line keeps its number but has no location
                let Some(original) = Self::remap_line(&artifact, line) else {
                    return (format!("{}:{}:{}{}", display, line, separator, rest), None);
                };
                let location = RemappedLocation {
                    source: artifact.full_source_path.clone(),
                    source_path: artifact.source_path.clone(),
                    line: original as u32,
                    message: rest.clone(),
                };
                (
                    format!("{}:{}:{}{}", display, original, separator, rest),
                    Some(location),
                )
            }
            // Not a compiled script; its locations may still be embedded
            None => (self.embedded_locations(message).into_owned(), None),
        }
    }

    /// Rewrite the leading `<source>:<line>:` of an error message and every
    /// location embedded after it. The leading location, when it belonged
    /// to a compiled script, is returned for excerpt rendering.
    pub fn remap_error_message(&self, message: &str) -> (String, Option<RemappedLocation>) {
        guarded(|| self.error_message(message), || (message.to_string(), None))
    }

    /// Remap a runtime error's message and every frame of its stack.
    pub fn remap_error(&self, error: &LuaError) -> (LuaError, Option<RemappedLocation>) {
        guarded(
            || {
                let (message, location) = self.error_message(&error.message);
                let stack = error
                    .stack
                    .iter()
                    .map(|entry| {
                        let (source, line) = self.stack_entry(&entry.source, entry.line);
                        StackEntry { source, line }
                    })
                    .collect();
                (LuaError { message, stack }, location)
            },
            || (error.clone(), None),
        )
    }

    /// Rewrite a `debug.getinfo` record so scripts inspecting themselves see
    /// original coordinates.
    pub fn remap_debug_info(&self, info: &DebugInfo) -> DebugInfo {
        if !self.remap_debug_info {
            return info.clone();
        }
        guarded(
            || {
                let artifact = self
                    .managed_artifact(&info.source)
                    .or_else(|| self.managed_artifact(&info.short_src));
                let Some((_, artifact)) = artifact else {
                    return info.clone();
                };
                DebugInfo {
                    source: self.stack_entry(&info.source, 0).0,
                    short_src: self.stack_entry(&info.short_src, 0).0,
                    currentline: Self::remap_line(&artifact, info.currentline)
                        .unwrap_or(info.currentline),
                    linedefined: Self::remap_line(&artifact, info.linedefined)
                        .unwrap_or(info.linedefined),
                    lastlinedefined: Self::remap_line(&artifact, info.lastlinedefined)
                        .unwrap_or(info.lastlinedefined),
                }
            },
            || info.clone(),
        )
    }

    /// Source lines around a remapped location, if the source is readable.
    pub fn excerpt(&self, location: &RemappedLocation) -> Option<String> {
        if !self.excerpt.enabled {
            return None;
        }
        guarded(
            || {
                let bytes = self
                    .vfs
                    .read_bytes(&location.source_path, &self.search_path)
                    .ok()?;
                let source = String::from_utf8_lossy(&bytes);
                render_source_excerpt(
                    &source,
                    location.line,
                    self.excerpt.before,
                    self.excerpt.after,
                )
            },
            || None,
        )
    }
}

/// Error reporter decorator: remaps every error before handing it to the
/// wrapped reporter, then prints an excerpt of the original source.
pub struct RemappingReporter {
    inner: Arc<dyn ErrorReporter>,
    remapper: Arc<ErrorRemapper>,
}

impl RemappingReporter {
    pub fn new(inner: Arc<dyn ErrorReporter>, remapper: Arc<ErrorRemapper>) -> Self {
        Self { inner, remapper }
    }
}

impl ErrorReporter for RemappingReporter {
    fn lua_error(&self, error: &LuaError) {
        let (remapped, location) = self.remapper.remap_error(error);
        self.inner.lua_error(&remapped);
        if let Some(excerpt) = location.and_then(|l| self.remapper.excerpt(&l)) {
            self.inner.msg(&excerpt);
        }
    }

    fn msg(&self, text: &str) {
        self.inner.msg(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LineMap, UpdateSignal};
    use crate::fs::{MockFileSystem, SearchPaths};
    use crate::transpiler::Dialect;
    use std::sync::Mutex;

    const BAR_LUA: &str = "cache/moonloader/lua/foo/bar.lua";

    fn remapper() -> (Arc<MockFileSystem>, ErrorRemapper) {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file(
            "lua/foo/bar.moon",
            "a = 1\nb = 2\nc = ->\n  error 'boom'\nd = 4\ne = 5\n",
        );
        let config = LoaderConfig::default();
        let vfs = Vfs::new(fs.clone(), config.search_paths.clone());
        let cache = Arc::new(CompilationCache::new());
        cache.upsert(CompiledArtifact {
            source_path: "foo/bar.moon".to_string(),
            full_source_path: "foo/bar.moon".to_string(),
            output_path: "foo/bar.lua".to_string(),
            full_output_path: BAR_LUA.to_string(),
            update_signal: UpdateSignal::from_secs(1),
            dialect: Dialect::MoonScript,
            line_map: LineMap::from([(5, 3), (7, 4), (9, 6)]),
        });
        (fs, ErrorRemapper::new(cache, vfs, &config))
    }

    #[test]
    fn test_stack_entry_exact_line() {
        let (_, remapper) = remapper();
        assert_eq!(
            remapper.remap_stack_entry(BAR_LUA, 7),
            ("foo/bar.moon".to_string(), 4)
        );
    }

    #[test]
    fn test_stack_entry_nearest_preceding_line() {
        let (_, remapper) = remapper();
        assert_eq!(
            remapper.remap_stack_entry(BAR_LUA, 6),
            ("foo/bar.moon".to_string(), 3)
        );
    }

    #[test]
    fn test_stack_entry_before_first_mapping_keeps_line() {
        let (_, remapper) = remapper();
        assert_eq!(
            remapper.remap_stack_entry(BAR_LUA, 2),
            ("foo/bar.moon".to_string(), 2)
        );
    }

    #[test]
    fn test_stack_entry_at_prefix_and_case() {
        let (_, remapper) = remapper();
        assert_eq!(
            remapper.remap_stack_entry("@Cache/MoonLoader/lua/foo/bar.lua", 9),
            ("@foo/bar.moon".to_string(), 6)
        );
    }

    #[test]
    fn test_stack_entry_pass_through() {
        let (_, remapper) = remapper();
        assert_eq!(
            remapper.remap_stack_entry("lua/autorun/plain.lua", 7),
            ("lua/autorun/plain.lua".to_string(), 7)
        );
        assert_eq!(
            remapper.remap_stack_entry("cache/moonloader/lua/unknown.lua", 7),
            ("cache/moonloader/lua/unknown.lua".to_string(), 7)
        );
        assert_eq!(remapper.remap_stack_entry("[C]", -1), ("[C]".to_string(), -1));
    }

    #[test]
    fn test_stack_entry_is_idempotent() {
        let (_, remapper) = remapper();
        let (source, line) = remapper.remap_stack_entry(BAR_LUA, 7);
        assert_eq!(remapper.remap_stack_entry(&source, line), (source, line));
    }

    #[test]
    fn test_message_leading_location() {
        let (_, remapper) = remapper();
        let (message, location) =
            remapper.remap_error_message(&format!("{}:7: attempt to call a nil value", BAR_LUA));
        assert_eq!(message, "foo/bar.moon:4: attempt to call a nil value");
        assert_eq!(
            location,
            Some(RemappedLocation {
                source: "foo/bar.moon".to_string(),
                source_path: "foo/bar.moon".to_string(),
                line: 4,
                message: "attempt to call a nil value".to_string(),
            })
        );
    }

    #[test]
    fn test_message_before_first_mapping_has_no_location() {
        let (_, remapper) = remapper();
        let (message, location) = remapper.remap_error_message(&format!("{}:2: boom", BAR_LUA));
        assert_eq!(message, "foo/bar.moon:2: boom");
        assert_eq!(location, None);
    }

    #[test]
    fn test_message_leading_location_without_space() {
        let (_, remapper) = remapper();
        let (message, location) = remapper.remap_error_message(&format!("{}:7:boom", BAR_LUA));
        assert_eq!(message, "foo/bar.moon:4:boom");
        assert_eq!(location.map(|l| (l.line, l.message)), Some((4, "boom".to_string())));

        let (message, _) = remapper.remap_error_message("lua/autorun/init.lua:3:boom");
        assert_eq!(message, "lua/autorun/init.lua:3:boom");
    }

    #[test]
    fn test_message_function_definition_location() {
        let (_, remapper) = remapper();
        let (message, _) = remapper.remap_error_message(&format!(
            "\t{}:7: in function <{}:9>",
            BAR_LUA, BAR_LUA
        ));
        assert_eq!(message, "\tfoo/bar.moon:4: in function <foo/bar.moon:6>");

        let (message, _) = remapper.remap_error_message("in function <lua/autorun/init.lua:5>");
        assert_eq!(message, "in function <lua/autorun/init.lua:5>");
    }

    #[test]
    fn test_message_nested_locations() {
        let (_, remapper) = remapper();
        let (message, location) = remapper.remap_error_message(&format!(
            "lua/autorun/init.lua:3: bad argument #1 to 'x' ({}:9: expected string)",
            BAR_LUA
        ));
        assert_eq!(
            message,
            "lua/autorun/init.lua:3: bad argument #1 to 'x' (foo/bar.moon:6: expected string)"
        );
        assert!(location.is_none());
    }

    #[test]
    fn test_message_without_location() {
        let (_, remapper) = remapper();
        assert_eq!(
            remapper.remap_error_message("out of memory"),
            ("out of memory".to_string(), None)
        );
    }

    #[test]
    fn test_remap_error_rewrites_stack() {
        let (_, remapper) = remapper();
        let error = LuaError::new(format!("{}:7: boom", BAR_LUA))
            .with_frame("[C]", -1)
            .with_frame(BAR_LUA, 7)
            .with_frame("lua/autorun/init.lua", 12);
        let (remapped, location) = remapper.remap_error(&error);
        assert_eq!(remapped.message, "foo/bar.moon:4: boom");
        assert_eq!(
            remapped.stack,
            vec![
                StackEntry::new("[C]", -1),
                StackEntry::new("foo/bar.moon", 4),
                StackEntry::new("lua/autorun/init.lua", 12),
            ]
        );
        assert_eq!(location.map(|l| l.line), Some(4));
    }

    #[test]
    fn test_recompile_uses_new_line_map() {
        let (_, remapper) = remapper();
        let current = remapper.cache().lookup("foo/bar.moon").unwrap();
        let mut artifact = CompiledArtifact::clone(&current);
        artifact.line_map = LineMap::from([(7, 40)]);
        artifact.update_signal = UpdateSignal::from_secs(2);
        remapper.cache().upsert(artifact);

        assert_eq!(
            remapper.remap_stack_entry(BAR_LUA, 7),
            ("foo/bar.moon".to_string(), 40)
        );
    }

    #[test]
    fn test_debug_info() {
        let (_, remapper) = remapper();
        let info = DebugInfo {
            source: format!("@{}", BAR_LUA),
            short_src: BAR_LUA.to_string(),
            currentline: 7,
            linedefined: 5,
            lastlinedefined: 9,
        };
        assert_eq!(
            remapper.remap_debug_info(&info),
            DebugInfo {
                source: "@foo/bar.moon".to_string(),
                short_src: "foo/bar.moon".to_string(),
                currentline: 4,
                linedefined: 3,
                lastlinedefined: 6,
            }
        );

        let native = DebugInfo {
            source: "=[C]".to_string(),
            short_src: "[C]".to_string(),
            currentline: -1,
            ..DebugInfo::default()
        };
        assert_eq!(remapper.remap_debug_info(&native), native);
    }

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<LuaError>>,
        messages: Mutex<Vec<String>>,
    }

    impl ErrorReporter for Recorder {
        fn lua_error(&self, error: &LuaError) {
            self.errors.lock().unwrap().push(error.clone());
        }

        fn msg(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }
    }

    #[test]
    fn test_reporter_prints_excerpt() {
        let (_, remapper) = remapper();
        let recorder = Arc::new(Recorder::default());
        let reporter = RemappingReporter::new(recorder.clone(), Arc::new(remapper));

        reporter.lua_error(&LuaError::new(format!("{}:7: boom", BAR_LUA)).with_frame(BAR_LUA, 7));

        let errors = recorder.errors.lock().unwrap();
        assert_eq!(errors[0].message, "foo/bar.moon:4: boom");
        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains(">"));
        assert!(messages[0].contains("error 'boom'"));
    }

    #[test]
    fn test_reporter_skips_excerpt_for_unmapped_line() {
        let (_, remapper) = remapper();
        let recorder = Arc::new(Recorder::default());
        let reporter = RemappingReporter::new(recorder.clone(), Arc::new(remapper));

        reporter.lua_error(&LuaError::new(format!("{}:3: boom", BAR_LUA)).with_frame(BAR_LUA, 3));

        let errors = recorder.errors.lock().unwrap();
        assert_eq!(errors[0].message, "foo/bar.moon:3: boom");
        assert_eq!(errors[0].stack, vec![StackEntry::new("foo/bar.moon", 3)]);
        assert!(recorder.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reporter_passes_plain_errors_through() {
        let (_, remapper) = remapper();
        let recorder = Arc::new(Recorder::default());
        let reporter = RemappingReporter::new(recorder.clone(), Arc::new(remapper));

        let error =
            LuaError::new("lua/autorun/init.lua:1: boom").with_frame("lua/autorun/init.lua", 1);
        reporter.lua_error(&error);

        assert_eq!(recorder.errors.lock().unwrap()[0], error);
        assert!(recorder.messages.lock().unwrap().is_empty());
    }
}
