//! Execution agent abstraction.
//!
//! The [`ExecutionAgent`] trait decouples the planner/actor/critic pipeline
//! from the agent backend (currently a `claude`-compatible CLI). Tests use
//! scripted agents that return predetermined results without spawning
//! processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::extract::last_json_object;
use crate::core::types::{AgentMetadata, AgentResult, AgentStatus, clip_chars};
use crate::io::config::AgentConfig;
use crate::io::process::{CommandOutput, run_command_with_stream};
use crate::io::store::write_json_atomic;

/// Marker appended to agent output when the CLI reports a turn-limit stop.
pub const MAX_TURNS_MARKER: &str = "error_max_turns";

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Short label used for trace file names (e.g. `actor-task-1a2b-step-7`).
    pub label: String,
    pub instruction: String,
    pub context: String,
    /// Working directory the agent may edit.
    pub root: PathBuf,
    pub max_turns: u32,
    pub model: String,
    pub timeout: Duration,
}

impl AgentRequest {
    /// Full prompt text sent to the agent.
    pub fn prompt(&self) -> String {
        if self.context.trim().is_empty() {
            self.instruction.clone()
        } else {
            format!("# Context\n\n{}\n\n{}", self.context.trim(), self.instruction)
        }
    }
}

/// Abstraction over agent backends.
///
/// Implementations report agent-side failures (non-zero exit, timeout) as a
/// `failed` [`AgentResult`]; `Err` is reserved for not being able to run the
/// agent at all.
pub trait ExecutionAgent: Sync {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResult>;
}

/// Agent that spawns a `claude`-compatible CLI in print mode.
#[derive(Debug, Clone)]
pub struct CliAgent {
    program: String,
    extra_args: Vec<String>,
    output_limit_bytes: usize,
    log_dir: PathBuf,
}

impl CliAgent {
    pub fn new(config: &AgentConfig, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: config.program.clone(),
            extra_args: config.extra_args.clone(),
            output_limit_bytes: config.output_limit_bytes,
            log_dir: log_dir.into(),
        }
    }

    fn command(&self, request: &AgentRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args)
            .arg("-p")
            .arg(request.prompt())
            .arg("--output-format")
            .arg("json")
            .arg("--dangerously-skip-permissions")
            .arg("--add-dir")
            .arg(&request.root)
            .arg("--max-turns")
            .arg(request.max_turns.to_string())
            .arg("--model")
            .arg(&request.model)
            .current_dir(&request.root);
        cmd
    }
}

impl ExecutionAgent for CliAgent {
    #[instrument(skip_all, fields(label = %request.label, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResult> {
        info!(root = %request.root.display(), model = %request.model, "invoking agent");
        let label = sanitize_label(&request.label);
        let stream_path = self.log_dir.join(format!("{label}.stream.log"));
        let started = Instant::now();

        let output = run_command_with_stream(
            self.command(request),
            None,
            request.timeout,
            self.output_limit_bytes,
            &stream_path,
        )
        .with_context(|| format!("run agent {}", self.program))?;

        let result = interpret_output(&output, request.timeout);
        if let Err(err) = write_trace(
            &self.log_dir.join(format!("{label}.json")),
            request,
            &output,
            &result,
            started.elapsed(),
        ) {
            warn!(err = %format!("{err:#}"), "failed to write agent trace");
        }
        debug!(status = ?result.status, "agent finished");
        Ok(result)
    }
}

fn interpret_output(output: &CommandOutput, timeout: Duration) -> AgentResult {
    if output.timed_out {
        warn!(timeout_secs = timeout.as_secs(), "agent timed out");
        return AgentResult::failed(format!(
            "Agent timed out after {}s",
            timeout.as_secs()
        ));
    }
    if !output.status.success() {
        let stderr = output.stderr_text();
        let detail = if stderr.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            stderr.trim().to_string()
        };
        warn!(exit_code = ?output.exit_code(), "agent exited with failure");
        return AgentResult::failed(detail);
    }
    parse_cli_output(&output.stdout_text())
}

/// Interpret the CLI's stdout.
///
/// JSON envelopes contribute their `result`/`content` text; a turn-limit
/// subtype is appended as a marker. The last ```json block of the text then
/// supplies the agent's reported status and metadata. Without a status block
/// the call counts as a success and acceptance checks decide the outcome.
pub fn parse_cli_output(stdout: &str) -> AgentResult {
    let mut content = match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(Value::Object(envelope)) => {
            let text = envelope
                .get("result")
                .or_else(|| envelope.get("content"))
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            if envelope.get("subtype").and_then(Value::as_str) == Some(MAX_TURNS_MARKER) {
                format!("{text}\n[{MAX_TURNS_MARKER}]").trim().to_string()
            } else {
                text
            }
        }
        Ok(Value::String(text)) => text,
        _ => stdout.to_string(),
    };
    if content.trim().is_empty() {
        content = stdout.trim().to_string();
    }

    let Some(report) = last_json_object(&content) else {
        return AgentResult::success(content);
    };
    let status = report
        .get("status")
        .and_then(Value::as_str)
        .and_then(AgentStatus::parse)
        .unwrap_or(AgentStatus::Success);
    let metadata = serde_json::from_value::<AgentMetadata>(Value::Object(report))
        .unwrap_or_else(|err| {
            debug!(err = %err, "agent status block has unexpected shape");
            AgentMetadata::default()
        });
    AgentResult {
        status,
        output: content,
        metadata,
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "agent".to_string()
    } else {
        cleaned
    }
}

fn write_trace(
    path: &Path,
    request: &AgentRequest,
    output: &CommandOutput,
    result: &AgentResult,
    elapsed: Duration,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create trace dir {}", parent.display()))?;
    }
    let trace = json!({
        "label": request.label,
        "instruction": clip_chars(&request.instruction, 4000),
        "context_length": request.context.len(),
        "root": request.root.display().to_string(),
        "model": request.model,
        "max_turns": request.max_turns,
        "exit_code": output.exit_code(),
        "timed_out": output.timed_out,
        "duration_secs": elapsed.as_secs_f64(),
        "stderr": output.stderr_text(),
        "truncated": output.truncated_notice("agent"),
        "result": result,
    });
    write_json_atomic(path, &trace)
}
