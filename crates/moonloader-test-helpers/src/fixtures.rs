//! Test fixtures - sources, file trees and ready-made realms

use indoc::indoc;
use std::sync::Arc;

use moonloader_core::{LoaderConfig, MockFileSystem, Realm, TranspilerAdapter};

use crate::mocks::{MockDiagnosticHandler, MoonEcho, RecordingRunner, YueEcho};

pub fn moon_class() -> &'static str {
    indoc! {"
        class Counter
            new: =>
                @count = 0

            bump: =>
                @count += 1
                error 'overflow' if @count > 10
                @count
    "}
}

pub fn yue_module() -> &'static str {
    indoc! {"
        export greet = (name) ->
            print \"hello \" .. name

        greet 'world'
    "}
}

/// Marker the scripted backends treat as a syntax error
pub const SYNTAX_ERROR: &str = "!!";

pub fn moon_with_syntax_error() -> String {
    format!("x = 1\ny = {}\n", SYNTAX_ERROR)
}

/// Mock filesystem holding a small addon under the default `lua` search dir.
pub fn addon_tree() -> Arc<MockFileSystem> {
    let fs = Arc::new(MockFileSystem::new());
    fs.add_file("lua/autorun/counter.moon", moon_class());
    fs.add_file("lua/autorun/plain.lua", "print('plain')\n");
    fs.add_file("lua/greeter/init.yue", yue_module());
    fs.add_file("lua/greeter/broken.moon", moon_with_syntax_error());
    fs
}

/// A realm over `fs` wired to scripted backends and recording collaborators.
pub struct TestRealm {
    pub fs: Arc<MockFileSystem>,
    pub moon: Arc<MoonEcho>,
    pub yue: Arc<YueEcho>,
    pub runner: Arc<RecordingRunner>,
    pub diagnostics: Arc<MockDiagnosticHandler>,
    pub realm: Realm,
}

impl TestRealm {
    pub fn new(fs: Arc<MockFileSystem>) -> Self {
        Self::with_config(fs, LoaderConfig::default())
    }

    pub fn with_config(fs: Arc<MockFileSystem>, config: LoaderConfig) -> Self {
        let moon = Arc::new(MoonEcho::default());
        let yue = Arc::new(YueEcho::default());
        let runner = Arc::new(RecordingRunner::default());
        let diagnostics = MockDiagnosticHandler::new();
        let realm = Realm::with_dependencies(
            config,
            fs.clone(),
            TranspilerAdapter::new(moon.clone(), yue.clone()),
            runner.clone(),
            diagnostics.clone(),
        );
        Self {
            fs,
            moon,
            yue,
            runner,
            diagnostics,
            realm,
        }
    }
}
