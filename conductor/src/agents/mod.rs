//! Oracle roles built on the execution agent.
//!
//! Every role goes through [`AgentHandle::invoke`], which brackets the call
//! with `spawn`/`complete` events and turns a failure to run the agent into a
//! failed [`AgentResult`] so callers never see an error from the oracle.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::core::types::{AgentResult, clip_chars};
use crate::io::agent::{AgentRequest, ExecutionAgent};
use crate::io::events::{EventKind, EventLog};
use crate::io::store::new_id;

pub mod actor;
pub mod critic;
pub mod gap_analyzer;
pub mod replanner;
pub mod reviewer;

const EVENT_SUMMARY_CHARS: usize = 200;

/// Shared handles for calling the execution agent from a role.
#[derive(Clone, Copy)]
pub struct AgentHandle<'a> {
    pub agent: &'a dyn ExecutionAgent,
    pub events: &'a EventLog,
    /// Trace id of the orchestrator run; role calls are its children.
    pub trace_id: &'a str,
    /// Project root the agent works in.
    pub root: &'a Path,
    pub timeout: Duration,
}

impl AgentHandle<'_> {
    pub fn request(
        &self,
        label: String,
        instruction: String,
        context: String,
        max_turns: u32,
        model: &str,
    ) -> AgentRequest {
        AgentRequest {
            label,
            instruction,
            context,
            root: self.root.to_path_buf(),
            max_turns,
            model: model.to_string(),
            timeout: self.timeout,
        }
    }

    pub fn invoke(&self, role: &str, step: u64, request: &AgentRequest) -> AgentResult {
        let trace_id = new_id(role);
        self.events.record(
            EventKind::Spawn,
            role,
            step,
            &trace_id,
            Some(self.trace_id),
            json!({
                "label": request.label,
                "model": request.model,
                "max_turns": request.max_turns,
            }),
        );
        let result = match self.agent.invoke(request) {
            Ok(result) => result,
            Err(err) => {
                warn!(role, err = %format!("{err:#}"), "agent invocation failed");
                AgentResult::failed(format!("Agent invocation failed: {err:#}"))
            }
        };
        let summary = result
            .metadata
            .summary
            .as_deref()
            .unwrap_or(result.output.as_str());
        self.events.record(
            EventKind::Complete,
            role,
            step,
            &trace_id,
            Some(self.trace_id),
            json!({
                "label": request.label,
                "status": result.status,
                "summary": clip_chars(summary.trim(), EVENT_SUMMARY_CHARS),
            }),
        );
        result
    }
}
