use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use moonloader_core::cache::hash_options;
use moonloader_core::{
    CompilationCache, CompileOptions, CompiledArtifact, Dialect, LineMap, LoaderConfig,
    RealFileSystem, UpdateSignal, Vfs,
};

fn moonloader_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("moonloader"))
}

/// Lay out a source, its generated file and a manifest describing them, as
/// a previous run would have left them.
fn seed_cache(root: &TempDir) {
    let source = "class Counter\n  new: =>\n    @count = 0\n  bump: =>\n    error 'overflow'\n";
    fs::create_dir_all(root.path().join("lua/foo")).unwrap();
    fs::write(root.path().join("lua/foo/bar.moon"), source).unwrap();
    fs::create_dir_all(root.path().join("cache/moonloader/lua/foo")).unwrap();
    fs::write(root.path().join("cache/moonloader/lua/foo/bar.lua"), "-- generated\n").unwrap();

    let config = LoaderConfig::default();
    let cache = CompilationCache::new();
    cache.upsert(CompiledArtifact {
        source_path: "foo/bar.moon".to_string(),
        full_source_path: "lua/foo/bar.moon".to_string(),
        output_path: "foo/bar.lua".to_string(),
        full_output_path: "cache/moonloader/lua/foo/bar.lua".to_string(),
        update_signal: UpdateSignal::from_secs(1),
        dialect: Dialect::MoonScript,
        line_map: LineMap::from([(5, 3), (7, 4), (9, 5)]),
    });
    let vfs = Vfs::new(
        Arc::new(RealFileSystem::new(root.path())),
        config.search_paths.clone(),
    );
    cache
        .to_manifest(&hash_options(&CompileOptions::default()))
        .save(&vfs, &config.cache_root)
        .unwrap();
}

#[test]
fn test_help() {
    moonloader_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--precache"))
        .stdout(predicate::str::contains("--remap"));
}

#[test]
fn test_init_writes_default_config() {
    let temp_dir = TempDir::new().unwrap();

    moonloader_cmd()
        .current_dir(&temp_dir)
        .arg("--init")
        .assert()
        .success()
        .stdout(predicate::str::contains("moonloader.yaml"));

    let config = fs::read_to_string(temp_dir.path().join("moonloader.yaml")).unwrap();
    assert!(config.contains("cacheRoot"));
    assert!(config.contains("searchPaths"));
    assert_eq!(LoaderConfig::from_yaml(&config).unwrap(), LoaderConfig::default());
}

#[test]
fn test_init_refuses_to_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("moonloader.yaml"), "debounceMs: 5\n").unwrap();

    moonloader_cmd()
        .current_dir(&temp_dir)
        .arg("--init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let config = fs::read_to_string(temp_dir.path().join("moonloader.yaml")).unwrap();
    assert_eq!(config, "debounceMs: 5\n");
}

#[test]
fn test_no_input_files() {
    let temp_dir = TempDir::new().unwrap();

    moonloader_cmd()
        .current_dir(&temp_dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No input files"));
}

#[test]
fn test_missing_source_fails() {
    let temp_dir = TempDir::new().unwrap();

    moonloader_cmd()
        .current_dir(&temp_dir)
        .arg("missing/file.moon")
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing/file.moon"));
}

#[test]
fn test_unsupported_dialect_fails() {
    let temp_dir = TempDir::new().unwrap();

    moonloader_cmd()
        .current_dir(&temp_dir)
        .arg("autorun/plain.lua")
        .assert()
        .failure()
        .stderr(predicate::str::contains("autorun/plain.lua"));
}

#[test]
fn test_to_lua_rejects_plain_lua() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("plain.lua"), "print(1)\n").unwrap();

    moonloader_cmd()
        .current_dir(&temp_dir)
        .arg("--to-lua")
        .arg("plain.lua")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a MoonScript or YueScript file"));
}

#[test]
fn test_remap_passes_unrelated_errors_through() {
    let temp_dir = TempDir::new().unwrap();

    moonloader_cmd()
        .current_dir(&temp_dir)
        .arg("--remap")
        .write_stdin("lua/autorun/plain.lua:3: attempt to call a nil value\n")
        .assert()
        .success()
        .stdout("lua/autorun/plain.lua:3: attempt to call a nil value\n");
}

#[test]
fn test_remap_uses_persisted_manifest() {
    let temp_dir = TempDir::new().unwrap();
    seed_cache(&temp_dir);

    let bar = "cache/moonloader/lua/foo/bar.lua";
    let input = format!(
        "{bar}:7: overflow\nstack traceback:\n\t{bar}:6: in function <{bar}:5>\n"
    );

    let output = moonloader_cmd()
        .current_dir(&temp_dir)
        .arg("--remap")
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();

    assert!(stdout.starts_with("lua/foo/bar.moon:4: overflow\n"));
    assert!(stdout.contains("> 4 |"));
    assert!(stdout.contains("stack traceback:\n"));
    assert!(stdout.ends_with("\tlua/foo/bar.moon:3: in function <lua/foo/bar.moon:3>\n"));
    assert_eq!(stdout.matches("> ").count(), 1);
}

#[test]
fn test_remap_after_purge_passes_through() {
    let temp_dir = TempDir::new().unwrap();
    seed_cache(&temp_dir);

    moonloader_cmd()
        .current_dir(&temp_dir)
        .arg("--remap")
        .arg("--purge")
        .write_stdin("cache/moonloader/lua/foo/bar.lua:7: overflow\n")
        .assert()
        .success()
        .stdout("cache/moonloader/lua/foo/bar.lua:7: overflow\n");

    assert!(!temp_dir.path().join("cache/moonloader/lua/foo/bar.lua").exists());
}
