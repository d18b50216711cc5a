use anyhow::Context;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use moonloader_core::config::CONFIG_FILE_NAME;
use moonloader_core::{
    CliOverrides, CompileResult, Dialect, LoaderConfig, Realm, RealFileSystem, RunReason,
    ScriptRunner,
};

/// Moonloader - MoonScript and YueScript compile cache with error remapping
#[derive(Parser, Debug)]
#[command(name = "moonloader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Logical source paths to compile
    #[arg(value_name = "FILE")]
    files: Vec<String>,

    /// Path to moonloader.yaml configuration file
    #[arg(short, long, value_name = "FILE")]
    project: Option<PathBuf>,

    /// Host root directory that search paths and the cache root live under
    #[arg(long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// Cache root, relative to the host root
    #[arg(long, value_name = "DIR")]
    cache_root: Option<String>,

    /// Search-path id sources are resolved in
    #[arg(long, value_name = "ID")]
    search_path: Option<String>,

    /// Lua interpreter hosting the transpilers
    #[arg(long, value_name = "PROGRAM")]
    lua: Option<String>,

    /// Purge the cache root before doing anything else
    #[arg(long)]
    purge: bool,

    /// Recompile even when the cached artifact is fresh
    #[arg(long)]
    force: bool,

    /// Compile every source under a logical directory
    #[arg(long, value_name = "DIR")]
    precache: Option<String>,

    /// Print the Lua translation of a file without caching it
    #[arg(long, value_name = "FILE")]
    to_lua: Option<PathBuf>,

    /// Remap error text read from stdin using the persisted cache
    #[arg(long)]
    remap: bool,

    /// Recompile and rerun sources when they change
    #[arg(short, long)]
    watch: bool,

    /// Write a default moonloader.yaml
    #[arg(long)]
    init: bool,
}

/// The command line has no Lua state, so reruns are only logged.
struct LoggingRunner;

impl ScriptRunner for LoggingRunner {
    fn run_script(&self, logical_path: &str) -> bool {
        info!("Would run {}", logical_path);
        true
    }
}

fn main() -> anyhow::Result<()> {
    // Set RUST_LOG=debug for detailed logs
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.init {
        return init_project(&cli.root);
    }

    if let Some(path) = &cli.to_lua {
        return to_lua(&cli, path);
    }

    let config = load_config(&cli)?;
    let realm = Realm::new(
        config,
        Arc::new(RealFileSystem::new(&cli.root)),
        Arc::new(LoggingRunner),
    );

    if cli.remap {
        return remap_stdin(&realm);
    }

    let mut failed = 0;

    if let Some(dir) = &cli.precache {
        let report = realm.precache_dir(dir);
        info!(
            "Precached {} file(s) under {}, {} failed",
            report.compiled.len(),
            dir,
            report.failed.len()
        );
        failed += report.failed.len();
    }

    failed += compile_files(&realm, &cli.files, cli.force);

    if cli.watch {
        return watch_mode(&realm, &cli.files);
    }

    if cli.files.is_empty() && cli.precache.is_none() {
        eprintln!("Error: No input files specified. Use --help for usage information.");
        std::process::exit(1);
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn init_project(root: &Path) -> anyhow::Result<()> {
    let path = root.join(CONFIG_FILE_NAME);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    LoaderConfig::init_file(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    Ok(())
}

/// Load configuration from file (if specified or present) and apply the
/// command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<LoaderConfig> {
    let mut config = match &cli.project {
        Some(path) => LoaderConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => {
            let default_path = cli.root.join(CONFIG_FILE_NAME);
            if default_path.exists() {
                LoaderConfig::from_file(&default_path)
                    .with_context(|| format!("Failed to load {}", default_path.display()))?
            } else {
                LoaderConfig::default()
            }
        }
    };

    config.merge(&CliOverrides {
        cache_root: cli.cache_root.clone(),
        search_path: cli.search_path.clone(),
        lua_interpreter: cli.lua.clone(),
        purge_on_start: cli.purge.then_some(true),
    });
    debug!("Configuration: {:?}", config);
    Ok(config)
}

/// Compile each file, returning how many failed
fn compile_files(realm: &Realm, files: &[String], force: bool) -> usize {
    let mut failed = 0;
    for file in files {
        match realm.pipeline().compile_file(file, force) {
            Ok(artifact) => println!("{} -> {}", file, artifact.full_output_path),
            Err(e) => {
                eprintln!("{}", e);
                failed += 1;
            }
        }
    }
    failed
}

fn to_lua(cli: &Cli, path: &Path) -> anyhow::Result<()> {
    let name = path.to_string_lossy();
    let dialect = Dialect::from_path(&name)
        .with_context(|| format!("{} is not a MoonScript or YueScript file", name))?;
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", name))?;

    let config = load_config(cli)?;
    let realm = Realm::new(
        config,
        Arc::new(RealFileSystem::new(&cli.root)),
        Arc::new(LoggingRunner),
    );

    match realm.to_lua(dialect, &source) {
        CompileResult::Success { lua_code, line_map } => {
            print!("{}", lua_code);
            eprintln!("{}", serde_json::to_string(&line_map)?);
            Ok(())
        }
        CompileResult::Failure {
            display_message, ..
        } => {
            eprintln!("{}: {}", name, display_message);
            std::process::exit(1);
        }
    }
}

/// Remap every line of stdin. Only a line that starts with a compiled
/// location gets an excerpt; traceback frames are rewritten in place.
fn remap_stdin(realm: &Realm) -> anyhow::Result<()> {
    let remapper = realm.remapper();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        let (remapped, location) = remapper.remap_error_message(&line);
        writeln!(stdout, "{}", remapped)?;
        if let Some(excerpt) = location.as_ref().and_then(|l| remapper.excerpt(l)) {
            writeln!(stdout, "{}", excerpt)?;
        }
    }
    Ok(())
}

fn watch_mode(realm: &Realm, files: &[String]) -> anyhow::Result<()> {
    // Only included scripts are rerun on change
    for file in files {
        realm.prepare_script(file, RunReason::Include);
    }

    println!("Watching for changes... (Press Ctrl+C to stop)");
    info!("Watching {} file(s)", realm.watchdog().watched_count());

    let tick = Duration::from_millis(100);
    loop {
        for source in realm.think() {
            println!("Reloaded {}", source);
        }
        std::thread::sleep(tick);
    }
}
