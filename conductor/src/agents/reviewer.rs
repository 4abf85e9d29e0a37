//! Reviewer: qualitative judgement of a finished attempt.

use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::contracts::{PlanDecision, ReviewFeedback, ReviewStatus};
use crate::core::extract::last_json_object;
use crate::core::types::CheckResult;
use crate::io::agent::MAX_TURNS_MARKER;
use crate::io::prompt::{CONTEXT_BUDGET_BYTES, ReviewPromptInputs, actor_context, reviewer_instruction};

use super::AgentHandle;

pub const REVIEW_MAX_TURNS: u32 = 28;
pub const SHORT_REVIEW_MAX_TURNS: u32 = 20;

const MAX_TURNS_SUMMARY: &str = "Reviewer hit max turns before providing feedback.";
const MAX_TURNS_NEXT_STEPS: &str = "Retry the review with a tighter prompt or less context.";
const UNAVAILABLE_SUMMARY: &str = "Reviewer response unavailable.";

pub struct Reviewer<'a> {
    handle: AgentHandle<'a>,
    model: String,
    short_model: String,
}

impl<'a> Reviewer<'a> {
    pub fn new(handle: AgentHandle<'a>, model: impl Into<String>, short_model: impl Into<String>) -> Self {
        Self {
            handle,
            model: model.into(),
            short_model: short_model.into(),
        }
    }

    /// Ask the agent to review an attempt.
    ///
    /// Short mode asks for JSON only, with the short-review model and fewer
    /// turns. It is used for the single retry after a reviewer timeout.
    #[instrument(skip_all, fields(task_id = %decision.task.id, short_mode = short_mode))]
    pub fn review(
        &self,
        decision: &PlanDecision,
        tests: &[CheckResult],
        short_mode: bool,
        retry_count: u32,
    ) -> ReviewFeedback {
        let task = &decision.task;
        let inputs = ReviewPromptInputs {
            task,
            tests,
            notes_summary: &decision.context.notes_summary,
            user_feedback: decision.context.feedback_for(&task.id),
            domain: decision.context.domain.as_deref(),
            short_mode,
            retry_count,
        };
        let prompt = reviewer_instruction(&inputs).and_then(|instruction| {
            actor_context(task, &decision.context, CONTEXT_BUDGET_BYTES)
                .map(|context| (instruction, context))
        });
        let (instruction, context) = match prompt {
            Ok(parts) => parts,
            Err(err) => return parse_review(&format!("Failed to render reviewer prompt: {err:#}")),
        };

        let (model, max_turns) = if short_mode {
            (self.short_model.as_str(), SHORT_REVIEW_MAX_TURNS)
        } else {
            (self.model.as_str(), REVIEW_MAX_TURNS)
        };
        let request = self.handle.request(
            format!("review-{}-step-{}-{}", task.id, decision.step, retry_count),
            instruction,
            context,
            max_turns,
            model,
        );
        let result = self.handle.invoke("reviewer", decision.step, &request);
        let feedback = parse_review(&result.output);
        debug!(status = feedback.status.as_str(), summary = %feedback.summary, "review parsed");
        feedback
    }
}

/// Parse reviewer output into feedback.
///
/// The last parseable ```json object supplies the fields; status defaults to
/// `NEEDS_FOLLOWUP` and a missing summary falls back to the raw output.
pub fn parse_review(raw_output: &str) -> ReviewFeedback {
    let block = last_json_object(raw_output).unwrap_or_default();
    let status = block
        .get("status")
        .or_else(|| block.get("STATUS"))
        .and_then(Value::as_str)
        .map_or(ReviewStatus::NeedsFollowup, ReviewStatus::parse);
    let mut next_steps = block
        .get("next_steps")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);
    let suggestions = block
        .get("suggestions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let summary = match block
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
    {
        Some(summary) => summary.to_string(),
        None if raw_output.contains(MAX_TURNS_MARKER) => {
            next_steps.get_or_insert_with(|| MAX_TURNS_NEXT_STEPS.to_string());
            MAX_TURNS_SUMMARY.to_string()
        }
        None if !raw_output.trim().is_empty() => raw_output.trim().to_string(),
        None => UNAVAILABLE_SUMMARY.to_string(),
    };

    ReviewFeedback {
        status,
        summary,
        next_steps,
        suggestions,
        raw_output: raw_output.to_string(),
    }
}
