use regex::Regex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use tracing::debug;

use super::{Backend, BackendFault, BackendOutput, CompileOptions};

const MOONSCRIPT_DRIVER: &str = include_str!("lua/moonscript_driver.lua");
const YUESCRIPT_DRIVER: &str = include_str!("lua/yuescript_driver.lua");

static LINE_COL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+):(\d+)").expect("line:col pattern is valid"));

/// How a driver process reports its result on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverProtocol {
    /// A JSON object with `code`/`posmap` or `error`/`pos`/`display`.
    PosmapJson,
    /// Plain annotated Lua on success, message on stderr with a non-zero
    /// exit status on failure.
    AnnotatedLua,
}

#[derive(Debug, Deserialize)]
struct PosmapReply {
    code: Option<String>,
    #[serde(default)]
    posmap: FxHashMap<String, usize>,
    error: Option<String>,
    pos: Option<usize>,
    display: Option<String>,
}

/// Backend that pipes the source through an external program.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    name: String,
    program: String,
    args: Vec<String>,
    protocol: DriverProtocol,
}

impl ProcessBackend {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        protocol: DriverProtocol,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            protocol,
        }
    }

    /// MoonScript through the bundled driver run by `interpreter`.
    pub fn moonscript(interpreter: &str) -> Self {
        Self::new(
            "moonscript",
            interpreter,
            vec!["-e".to_string(), MOONSCRIPT_DRIVER.to_string()],
            DriverProtocol::PosmapJson,
        )
    }

    /// YueScript through the bundled driver run by `interpreter`.
    pub fn yuescript(interpreter: &str) -> Self {
        Self::new(
            "yuescript",
            interpreter,
            vec!["-e".to_string(), YUESCRIPT_DRIVER.to_string()],
            DriverProtocol::AnnotatedLua,
        )
    }

    fn run(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<(bool, String, String), BackendFault> {
        debug!("Running {} backend via {}", self.name, self.program);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(
                "MOONLOADER_IMPLICIT_RETURN",
                if options.implicitly_return_root { "1" } else { "0" },
            )
            .env(
                "MOONLOADER_RESERVE_LINES",
                if options.reserve_line_numbers { "1" } else { "0" },
            )
            .env("MOONLOADER_TARGET_LUA", &options.target_lua)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackendFault::new(format!("failed to start {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(source.as_bytes())
                .map_err(|e| BackendFault::new(format!("failed to feed {}: {}", self.name, e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| BackendFault::new(format!("{} did not finish: {}", self.name, e)))?;

        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

impl Backend for ProcessBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn transpile(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<BackendOutput, BackendFault> {
        let (success, stdout, stderr) = self.run(source, options)?;

        match self.protocol {
            DriverProtocol::PosmapJson => {
                if !success {
                    return Err(BackendFault::new(stderr.trim()));
                }
                parse_posmap_reply(&stdout)
            }
            DriverProtocol::AnnotatedLua => {
                if !success {
                    return Err(parse_annotated_failure(stderr.trim()));
                }
                Ok(BackendOutput::LineAnnotated { code: stdout })
            }
        }
    }
}

fn parse_posmap_reply(stdout: &str) -> Result<BackendOutput, BackendFault> {
    let reply: PosmapReply = serde_json::from_str(stdout.trim())
        .map_err(|e| BackendFault::new(format!("malformed driver reply: {}", e)))?;

    if let Some(error) = reply.error {
        let mut fault = BackendFault::new(error);
        if let Some(pos) = reply.pos {
            fault = fault.at_offset(pos);
        }
        if let Some(display) = reply.display {
            fault = fault.with_display(display);
        }
        return Err(fault);
    }

    let code = reply.code.unwrap_or_default();
    let mut posmap: Vec<(u32, usize)> = reply
        .posmap
        .into_iter()
        .filter_map(|(line, offset)| line.parse::<u32>().ok().map(|line| (line, offset)))
        .collect();
    posmap.sort_unstable();

    Ok(BackendOutput::OffsetMapped { code, posmap })
}

fn parse_annotated_failure(stderr: &str) -> BackendFault {
    let fault = BackendFault::new(stderr);
    let first_line = stderr.lines().next().unwrap_or_default();
    match LINE_COL.captures(first_line) {
        Some(caps) => match (caps[1].parse(), caps[2].parse()) {
            (Ok(line), Ok(column)) => fault.at_line_col(line, column),
            _ => fault,
        },
        None => fault,
    }
}
