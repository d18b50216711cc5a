use std::sync::Arc;

use moonloader_core::{DebugInfo, ErrorReporter, LuaError, RunReason, StackEntry};
use moonloader_test_helpers::fixtures::{addon_tree, TestRealm};
use moonloader_test_helpers::mocks::{PanickingBackend, RecordingReporter};

const COUNTER_LUA: &str = "cache/moonloader/lua/autorun/counter.lua";

fn compiled_realm() -> TestRealm {
    let t = TestRealm::new(addon_tree());
    t.realm.prepare_script("autorun/counter.moon", RunReason::Include);
    t
}

#[test]
fn test_runtime_error_points_at_original_source() {
    let t = compiled_realm();
    let host = RecordingReporter::new();
    let reporter = t.realm.reporter(host.clone());

    reporter.lua_error(
        &LuaError::new(format!("{}:8: overflow", COUNTER_LUA))
            .with_frame("[C]", -1)
            .with_frame(COUNTER_LUA, 8)
            .with_frame(COUNTER_LUA, 1)
            .with_frame("lua/autorun/plain.lua", 3),
    );

    let errors = host.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "lua/autorun/counter.moon:7: overflow");
    assert_eq!(
        errors[0].stack,
        vec![
            StackEntry::new("[C]", -1),
            StackEntry::new("lua/autorun/counter.moon", 7),
            StackEntry::new("lua/autorun/counter.moon", 1),
            StackEntry::new("lua/autorun/plain.lua", 3),
        ]
    );

    let messages = host.messages();
    assert_eq!(messages.len(), 1);
    insta::assert_snapshot!(messages[0], @r"
      2 | new: =>
      3 |     @count = 0
      4 |
      5 | bump: =>
      6 |     @count += 1
    > 7 |     error 'overflow' if @count > 10
      8 |     @count
    ");
}

#[test]
fn test_excerpt_can_be_disabled() {
    let mut config = moonloader_core::LoaderConfig::default();
    config.excerpt.enabled = false;
    let t = TestRealm::with_config(addon_tree(), config);
    t.realm.prepare_script("autorun/counter.moon", RunReason::Include);

    let host = RecordingReporter::new();
    t.realm
        .reporter(host.clone())
        .lua_error(&LuaError::new(format!("{}:8: overflow", COUNTER_LUA)));

    assert_eq!(host.errors()[0].message, "lua/autorun/counter.moon:7: overflow");
    assert!(host.messages().is_empty());
}

#[test]
fn test_errors_outside_cache_are_untouched() {
    let t = compiled_realm();
    let host = RecordingReporter::new();
    let error = LuaError::new("lua/autorun/plain.lua:1: attempt to index a nil value")
        .with_frame("lua/autorun/plain.lua", 1);

    t.realm.reporter(host.clone()).lua_error(&error);

    assert_eq!(host.errors(), vec![error]);
    assert!(host.messages().is_empty());
}

#[test]
fn test_remap_after_recompile_uses_new_map() {
    let t = compiled_realm();
    let remapper = t.realm.remapper();
    assert_eq!(
        remapper.remap_stack_entry(COUNTER_LUA, 8),
        ("lua/autorun/counter.moon".to_string(), 7)
    );

    t.fs.add_file("lua/autorun/counter.moon", "-- header\n\nclass Counter\n");
    t.realm.prepare_script("autorun/counter.moon", RunReason::Include);

    assert_eq!(
        remapper.remap_stack_entry(COUNTER_LUA, 8),
        ("lua/autorun/counter.moon".to_string(), 4)
    );
}

#[test]
fn test_debug_info_is_remapped() {
    let t = compiled_realm();
    let info = DebugInfo {
        source: format!("@{}", COUNTER_LUA),
        short_src: COUNTER_LUA.to_string(),
        currentline: 8,
        linedefined: 6,
        lastlinedefined: 9,
    };
    let remapped = t.realm.remap_debug_info(&info);
    assert_eq!(remapped.source, "@lua/autorun/counter.moon");
    assert_eq!(remapped.short_src, "lua/autorun/counter.moon");
    assert_eq!(
        (remapped.currentline, remapped.linedefined, remapped.lastlinedefined),
        (7, 5, 8)
    );
}

#[test]
fn test_debug_info_remap_can_be_disabled() {
    let mut config = moonloader_core::LoaderConfig::default();
    config.remap_debug_info = false;
    let t = TestRealm::with_config(addon_tree(), config);
    t.realm.prepare_script("autorun/counter.moon", RunReason::Include);

    let info = DebugInfo {
        source: format!("@{}", COUNTER_LUA),
        short_src: COUNTER_LUA.to_string(),
        currentline: 8,
        ..DebugInfo::default()
    };
    assert_eq!(t.realm.remap_debug_info(&info), info);
}

#[test]
fn test_panicking_backend_never_escapes() {
    let fs = addon_tree();
    let realm = moonloader_core::Realm::with_dependencies(
        moonloader_core::LoaderConfig::default(),
        fs,
        moonloader_core::TranspilerAdapter::new(
            Arc::new(PanickingBackend),
            Arc::new(PanickingBackend),
        ),
        Arc::new(moonloader_test_helpers::mocks::RecordingRunner::default()),
        moonloader_test_helpers::mocks::MockDiagnosticHandler::new(),
    );

    assert_eq!(
        realm.prepare_script("autorun/counter.moon", RunReason::Include),
        moonloader_core::ScriptRequest::Suppress
    );
    assert_eq!(realm.diagnostics().warning_count(), 1);
}
