//! Sandboxed execution of tool source.
//!
//! Every run gets a fresh Lua 5.4 VM with a restricted library set, a
//! memory ceiling, and a wall-clock budget enforced from an instruction
//! hook. Tool behavior of any kind (errors, loops, allocation storms)
//! comes back as a [`Fault`] on the [`Execution`]; `run` itself never
//! fails and never lets the host crash.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mlua::prelude::*;
use mlua::{HookTriggers, LuaOptions, LuaSerdeExt, SerializeOptions, StdLib, VmState};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Fault, FaultKind, Result, ToolError};
use crate::tool::ToolParameter;

/// Resource limits for a single tool run.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock budget for one call.
    pub timeout: Duration,

    /// Memory ceiling for the VM.
    pub memory_limit_bytes: usize,

    /// How many VM instructions run between budget checks.
    pub check_interval: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            memory_limit_bytes: 64 * 1024 * 1024,
            check_interval: 4096,
        }
    }
}

/// The outcome of one sandboxed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// The tool's return value, JSON-encoded. Null when the run faulted.
    pub result: serde_json::Value,

    /// Everything the tool printed.
    pub stdout: String,

    /// The failure, if any.
    pub fault: Option<Fault>,

    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

impl Execution {
    /// A successful run.
    pub fn success(result: serde_json::Value, stdout: String, duration_ms: u64) -> Self {
        Self {
            result,
            stdout,
            fault: None,
            duration_ms,
        }
    }

    /// A faulted run.
    pub fn failure(fault: Fault, stdout: String, duration_ms: u64) -> Self {
        Self {
            result: serde_json::Value::Null,
            stdout,
            fault: Some(fault),
            duration_ms,
        }
    }

    /// Whether the run completed without a fault.
    pub fn is_success(&self) -> bool {
        self.fault.is_none()
    }
}

/// Runs tool source inside a throwaway Lua VM.
pub struct SandboxExecutor {
    config: SandboxConfig,
}

impl SandboxExecutor {
    /// Create an executor with default limits.
    pub fn new() -> Self {
        Self::with_config(SandboxConfig::default())
    }

    /// Create an executor with explicit limits.
    pub fn with_config(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// The limits this executor applies.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run tool source with positional arguments.
    ///
    /// The argument count is checked against the declared parameters
    /// before any code runs; a mismatch faults without spinning up a VM.
    /// The VM itself runs on a blocking worker so a busy tool cannot
    /// stall the async runtime.
    pub async fn run(
        &self,
        source_code: &str,
        parameters: &[ToolParameter],
        args: &[serde_json::Value],
    ) -> Execution {
        if args.len() != parameters.len() {
            return Execution::failure(
                Fault::new(
                    FaultKind::ArityMismatch,
                    format!(
                        "tool takes {} argument(s), got {}",
                        parameters.len(),
                        args.len()
                    ),
                ),
                String::new(),
                0,
            );
        }

        debug!("Running tool source ({} bytes)", source_code.len());

        let config = self.config.clone();
        let source = source_code.to_string();
        let args = args.to_vec();
        let started = Instant::now();

        let outcome = tokio::task::spawn_blocking(move || run_in_vm(&config, &source, &args)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((result, stdout, None)) => Execution::success(result, stdout, duration_ms),
            Ok((_, stdout, Some(fault))) => Execution::failure(fault, stdout, duration_ms),
            Err(e) => Execution::failure(
                Fault::new(FaultKind::Internal, format!("sandbox worker failed: {e}")),
                String::new(),
                duration_ms,
            ),
        }
    }

    /// Compile the source without running it.
    ///
    /// Used to reject generated code before it is ever stored.
    pub fn check_syntax(&self, source_code: &str) -> Result<()> {
        let lua = match Lua::new_with(tool_libraries(), LuaOptions::default()) {
            Ok(lua) => lua,
            Err(e) => {
                return Err(ToolError::ValidationFailure(format!(
                    "sandbox setup failed: {e}"
                )));
            }
        };

        lua.load(source_code)
            .set_name("tool")
            .into_function()
            .map(|_| ())
            .map_err(|e| ToolError::ValidationFailure(format!("source failed to compile: {e}")))
    }
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Libraries tools get. The base library is always present; everything
/// with ambient authority (io, os, package, debug) is never loaded.
fn tool_libraries() -> StdLib {
    StdLib::MATH | StdLib::STRING | StdLib::TABLE
}

fn run_in_vm(
    config: &SandboxConfig,
    source_code: &str,
    args: &[serde_json::Value],
) -> (serde_json::Value, String, Option<Fault>) {
    let stdout = Arc::new(Mutex::new(String::new()));

    let lua = match build_vm(config, &stdout) {
        Ok(lua) => lua,
        Err(e) => {
            return (
                serde_json::Value::Null,
                String::new(),
                Some(Fault::new(
                    FaultKind::Internal,
                    format!("sandbox setup failed: {e}"),
                )),
            );
        }
    };

    match execute_chunk(&lua, source_code, args) {
        Ok(value) => (value, drain(&stdout), None),
        Err(e) => (
            serde_json::Value::Null,
            drain(&stdout),
            Some(Fault::execution(e.to_string())),
        ),
    }
}

/// Build a VM with the library restrictions, the memory ceiling, the
/// budget hook, and a `print` that writes into the capture buffer.
fn build_vm(config: &SandboxConfig, stdout: &Arc<Mutex<String>>) -> LuaResult<Lua> {
    let lua = Lua::new_with(tool_libraries(), LuaOptions::default())?;
    lua.set_memory_limit(config.memory_limit_bytes)?;

    let buffer = Arc::clone(stdout);
    let print = lua.create_function(move |_lua, values: LuaMultiValue| {
        let line = values
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join("\t");
        if let Ok(mut buffer) = buffer.lock() {
            buffer.push_str(&line);
            buffer.push('\n');
        }
        Ok(())
    })?;
    lua.globals().set("print", print)?;

    let deadline = Instant::now() + config.timeout;
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(config.check_interval),
        move |_lua, _debug| {
            if Instant::now() >= deadline {
                Err(LuaError::RuntimeError(
                    "tool exceeded its execution budget".to_string(),
                ))
            } else {
                Ok(VmState::Continue)
            }
        },
    );

    Ok(lua)
}

fn execute_chunk(
    lua: &Lua,
    source_code: &str,
    args: &[serde_json::Value],
) -> LuaResult<serde_json::Value> {
    let before = global_function_names(lua)?;
    lua.load(source_code).set_name("tool").exec()?;
    let function = locate_tool_function(lua, &before)?;

    // JSON null becomes plain nil, not the serde null sentinel, so tools
    // can test `arg == nil`.
    let options = SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false);
    let lua_args = args
        .iter()
        .map(|arg| lua.to_value_with(arg, options))
        .collect::<LuaResult<LuaMultiValue>>()?;

    let result = function.call::<LuaValue>(lua_args)?;
    lua.from_value(result)
}

/// Names of every global that currently holds a function.
fn global_function_names(lua: &Lua) -> LuaResult<HashSet<String>> {
    let mut names = HashSet::new();
    for pair in lua.globals().pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        if let (LuaValue::String(key), LuaValue::Function(_)) = (key, value) {
            names.insert(string_lossy(&key));
        }
    }
    Ok(names)
}

/// The function the chunk defined. Exactly one new global function is
/// expected; zero or several is a tool bug.
fn locate_tool_function(lua: &Lua, before: &HashSet<String>) -> LuaResult<LuaFunction> {
    let mut defined = Vec::new();
    for pair in lua.globals().pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        if let (LuaValue::String(key), LuaValue::Function(function)) = (key, value) {
            let name = string_lossy(&key);
            if !before.contains(&name) {
                defined.push((name, function));
            }
        }
    }

    match defined.len() {
        1 => Ok(defined.remove(0).1),
        0 => Err(LuaError::RuntimeError(
            "source defined no top-level function".to_string(),
        )),
        _ => {
            let mut names: Vec<String> = defined.into_iter().map(|(name, _)| name).collect();
            names.sort();
            Err(LuaError::RuntimeError(format!(
                "source defined {} top-level functions ({}), expected exactly one",
                names.len(),
                names.join(", ")
            )))
        }
    }
}

fn drain(stdout: &Arc<Mutex<String>>) -> String {
    match stdout.lock() {
        Ok(buffer) => buffer.clone(),
        Err(_) => String::new(),
    }
}

/// Render a value the way Lua's own `print` would.
fn display_value(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => string_lossy(s),
        other => format!("<{}>", other.type_name()),
    }
}

fn string_lossy(s: &LuaString) -> String {
    let bytes = s.as_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}
