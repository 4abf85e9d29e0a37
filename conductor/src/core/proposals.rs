//! Decoding of agent-proposed tasks.
//!
//! Replanner and gap-analyzer output is untrusted. Proposals are decoded into a
//! [`TaskDraft`] with explicit defaults; malformed acceptance checks are
//! dropped individually instead of failing the batch. Graph insertion (and its
//! cycle check) happens later, once the draft has an id.

use serde_json::{Map, Value};

use crate::core::extract::json_blocks;
use crate::core::types::{
    CheckKind, DEFAULT_MAX_ATTEMPTS, Task, TaskStatus, VerificationCheck, clamp_priority,
};

/// Fallback values applied to missing proposal fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalDefaults {
    pub title: String,
    pub priority: u8,
    pub check_kind: CheckKind,
    pub check_description: String,
    pub depends_on: Vec<String>,
    pub related_goals: Vec<String>,
}

impl ProposalDefaults {
    /// Defaults for remediation of a permanently failed task.
    pub fn remediation(failed: &Task) -> Self {
        Self {
            title: format!("Remediate {}", failed.title),
            priority: failed.priority,
            check_kind: CheckKind::CommandPasses,
            check_description: "Remediation verification".to_string(),
            depends_on: vec![failed.id.clone()],
            related_goals: failed.related_goals.clone(),
        }
    }

    /// Defaults for tasks synthesized to close unmet goals.
    pub fn goal_gap(unmet_goal_ids: Vec<String>) -> Self {
        Self {
            title: "Goal gap remediation task".to_string(),
            priority: 8,
            check_kind: CheckKind::FileExists,
            check_description: "Goal gap verification".to_string(),
            depends_on: Vec::new(),
            related_goals: unmet_goal_ids,
        }
    }
}

/// A validated proposal that still needs an id.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub priority: u8,
    pub depends_on: Vec<String>,
    pub blocks: Vec<String>,
    pub related_goals: Vec<String>,
    pub acceptance_criteria: Vec<VerificationCheck>,
}

impl TaskDraft {
    pub fn into_task(self, id: impl Into<String>) -> Task {
        Task {
            id: id.into(),
            title: self.title,
            description: self.description,
            status: TaskStatus::Backlog,
            priority: self.priority,
            depends_on: self.depends_on,
            blocks: self.blocks,
            related_goals: self.related_goals,
            remediates: None,
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            owner: None,
            summary: Vec::new(),
            next_action: None,
            acceptance_criteria: self.acceptance_criteria,
            test_history: Vec::new(),
            review_feedback: Vec::new(),
            critic_feedback: Vec::new(),
        }
    }
}

/// Extract proposal objects from agent output.
///
/// Fenced ```json blocks are tried last-first, then the raw output. A candidate
/// may be an array or an object with a `tasks` array; non-object items are
/// skipped. An explicit empty array means "nothing to propose".
pub fn parse_proposals(output: &str) -> Vec<Map<String, Value>> {
    let blocks = json_blocks(output);
    let candidates: Vec<&str> = if blocks.is_empty() {
        vec![output.trim()]
    } else {
        blocks
    };
    for snippet in candidates.iter().rev() {
        if snippet.is_empty() {
            continue;
        }
        let items = match serde_json::from_str::<Value>(snippet) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Object(mut map)) => match map.remove("tasks") {
                Some(Value::Array(items)) => items,
                _ => continue,
            },
            _ => continue,
        };
        return items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
    }
    Vec::new()
}

/// Coerce one proposal object into a draft.
pub fn coerce(payload: &Map<String, Value>, defaults: &ProposalDefaults) -> TaskDraft {
    let title = non_empty_str(payload.get("title")).unwrap_or_else(|| defaults.title.clone());
    let description =
        non_empty_str(payload.get("description")).unwrap_or_else(|| title.clone());
    let priority = payload
        .get("priority")
        .and_then(lenient_i64)
        .map(clamp_priority)
        .unwrap_or(defaults.priority);

    let depends_on = string_list(payload.get("depends_on"));
    let depends_on = if depends_on.is_empty() {
        defaults.depends_on.clone()
    } else {
        depends_on
    };
    let related_goals = string_list(payload.get("related_goals"));
    let related_goals = if related_goals.is_empty() {
        defaults.related_goals.clone()
    } else {
        related_goals
    };

    let checks = payload
        .get("acceptance")
        .or_else(|| payload.get("acceptance_criteria"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| coerce_check(item, defaults))
                .collect()
        })
        .unwrap_or_default();

    TaskDraft {
        title,
        description,
        priority,
        depends_on,
        blocks: string_list(payload.get("blocks")),
        related_goals,
        acceptance_criteria: checks,
    }
}

/// Decode at most `max` drafts from agent output.
pub fn decode_proposals(output: &str, defaults: &ProposalDefaults, max: usize) -> Vec<TaskDraft> {
    parse_proposals(output)
        .iter()
        .take(max)
        .map(|payload| coerce(payload, defaults))
        .collect()
}

fn coerce_check(item: &Value, defaults: &ProposalDefaults) -> Option<VerificationCheck> {
    let map = item.as_object()?;
    let target = non_empty_str(map.get("target"))?;
    let kind = non_empty_str(map.get("type"))
        .map(CheckKind::from)
        .unwrap_or_else(|| defaults.check_kind.clone());
    let description = non_empty_str(map.get("description"))
        .unwrap_or_else(|| defaults.check_description.clone());
    let mut check = VerificationCheck::new(kind, target, description);
    check.expected = match map.get("expected") {
        Some(Value::String(raw)) => Some(raw.clone()),
        Some(Value::Number(num)) => Some(num.to_string()),
        _ => None,
    };
    check.timeout_secs = map
        .get("timeout")
        .and_then(lenient_i64)
        .and_then(|secs| u64::try_from(secs).ok());
    if let Some(Value::Object(meta)) = map.get("metadata") {
        check.metadata = meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    }
    Some(check)
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(num) => num.as_i64().or_else(|| num.as_f64().map(|f| f as i64)),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) if !single.trim().is_empty() => {
            vec![single.trim().to_string()]
        }
        _ => Vec::new(),
    }
}
