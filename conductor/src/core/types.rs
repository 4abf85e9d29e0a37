//! Shared data model for the orchestration loop.
//!
//! These types define stable contracts between core components and the
//! persisted stores. They carry no I/O and must serialize deterministically.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PRIORITY: u8 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Lifecycle of a task.
///
/// `BACKLOG -> IN_PROGRESS -> {COMPLETE | BACKLOG (retry) | FAILED}`. `FAILED` is
/// terminal; remediation happens through new tasks, never by resurrecting one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    Complete,
    Failed,
    Obsolete,
    Refactor,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Backlog => "BACKLOG",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Obsolete => "OBSOLETE",
            TaskStatus::Refactor => "REFACTOR",
        }
    }

}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of deterministic acceptance check.
///
/// Unrecognised kinds are preserved as `Unknown` so they round-trip through the
/// store; the verification runner always fails them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CheckKind {
    FileExists,
    PatternInFile,
    CommandPasses,
    HttpEndpoint,
    MetricThreshold,
    SchemaValid,
    SecurityScan,
    TypeCheck,
    DataQuality,
    Unknown(String),
}

impl CheckKind {
    pub fn as_str(&self) -> &str {
        match self {
            CheckKind::FileExists => "file_exists",
            CheckKind::PatternInFile => "pattern_in_file",
            CheckKind::CommandPasses => "command_passes",
            CheckKind::HttpEndpoint => "http_endpoint",
            CheckKind::MetricThreshold => "metric_threshold",
            CheckKind::SchemaValid => "schema_valid",
            CheckKind::SecurityScan => "security_scan",
            CheckKind::TypeCheck => "type_check",
            CheckKind::DataQuality => "data_quality",
            CheckKind::Unknown(raw) => raw.as_str(),
        }
    }
}

impl From<String> for CheckKind {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file_exists" => CheckKind::FileExists,
            "pattern_in_file" => CheckKind::PatternInFile,
            "command_passes" => CheckKind::CommandPasses,
            "http_endpoint" => CheckKind::HttpEndpoint,
            "metric_threshold" => CheckKind::MetricThreshold,
            "schema_valid" => CheckKind::SchemaValid,
            "security_scan" => CheckKind::SecurityScan,
            "type_check" => CheckKind::TypeCheck,
            "data_quality" => CheckKind::DataQuality,
            _ => CheckKind::Unknown(raw),
        }
    }
}

impl From<CheckKind> for String {
    fn from(kind: CheckKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deterministic acceptance check owned by a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCheck {
    #[serde(rename = "type")]
    pub kind: CheckKind,
    /// Path, URL, command or metric name depending on `kind`.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Per-kind configuration (e.g. `file` for metric checks).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl VerificationCheck {
    pub fn new(kind: CheckKind, target: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            expected: None,
            description: description.into(),
            timeout_secs: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Outcome of one acceptance check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: VerificationCheck,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl CheckResult {
    pub fn pass(check: &VerificationCheck, message: impl Into<String>) -> Self {
        Self {
            check: check.clone(),
            passed: true,
            message: message.into(),
            stdout: None,
            stderr: None,
        }
    }

    pub fn fail(check: &VerificationCheck, message: impl Into<String>) -> Self {
        Self {
            check: check.clone(),
            passed: false,
            message: message.into(),
            stdout: None,
            stderr: None,
        }
    }
}

/// Per-attempt acceptance summary kept on the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptTests {
    pub attempt: u32,
    pub passed: usize,
    pub failed: usize,
}

/// A unit of work in the task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Reverse edges: tasks that must wait for this one.
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub related_goals: Vec<String>,
    /// Failed task this one remediates; that dependency counts as settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediates: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub summary: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<VerificationCheck>,
    #[serde(default)]
    pub test_history: Vec<AttemptTests>,
    #[serde(default)]
    pub review_feedback: Vec<String>,
    #[serde(default)]
    pub critic_feedback: Vec<String>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Backlog
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: id.into(),
            description: title.clone(),
            title,
            status: TaskStatus::Backlog,
            priority: DEFAULT_PRIORITY,
            depends_on: Vec::new(),
            blocks: Vec::new(),
            related_goals: Vec::new(),
            remediates: None,
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            owner: None,
            summary: Vec::new(),
            next_action: None,
            acceptance_criteria: Vec::new(),
            test_history: Vec::new(),
            review_feedback: Vec::new(),
            critic_feedback: Vec::new(),
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// Clamp an arbitrary integer into the valid priority range.
pub fn clamp_priority(raw: i64) -> u8 {
    raw.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY)) as u8
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn clip_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalTier {
    /// Immutable success condition; gates run completion.
    Core,
    Quality,
    NiceToHave,
}

/// High-level success condition evaluated independently of task completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub measurable_criteria: String,
    #[serde(default = "default_tier")]
    pub tier: GoalTier,
    #[serde(default)]
    pub is_negotiable: bool,
    #[serde(default)]
    pub achieved: bool,
    #[serde(default)]
    pub confidence: f64,
}

fn default_tier() -> GoalTier {
    GoalTier::Core
}

impl Goal {
    pub fn new(id: impl Into<String>, description: impl Into<String>, tier: GoalTier) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            measurable_criteria: String::new(),
            tier,
            is_negotiable: tier != GoalTier::Core,
            achieved: false,
            confidence: 0.0,
        }
    }

    pub fn is_core(&self) -> bool {
        self.tier == GoalTier::Core
    }
}

/// Status reported by the external execution agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Blocked,
    Failed,
}

impl AgentStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "done" | "completed" => Some(AgentStatus::Success),
            "blocked" => Some(AgentStatus::Blocked),
            "failed" | "failure" | "error" => Some(AgentStatus::Failed),
            _ => None,
        }
    }
}

/// Optional structured details the agent reports alongside its output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentMetadata {
    pub summary: Option<String>,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    pub commands_run: Vec<String>,
    pub blockers: Option<String>,
    pub next_steps: Option<String>,
}

/// Structured result of one external agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentStatus,
    pub output: String,
    #[serde(default)]
    pub metadata: AgentMetadata,
}

impl AgentResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Success,
            output: output.into(),
            metadata: AgentMetadata::default(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failed,
            output: output.into(),
            metadata: AgentMetadata::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }

    /// Best human-readable error line for a non-successful call.
    pub fn error_summary(&self) -> String {
        if let Some(blockers) = self.metadata.blockers.as_deref()
            && !blockers.trim().is_empty()
        {
            return blockers.trim().to_string();
        }
        let trimmed = self.output.trim();
        if trimmed.is_empty() {
            "Subagent failed unexpectedly.".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_serializes_upper_snake() {
        let raw = serde_json::to_string(&TaskStatus::InProgress).expect("serialize");
        assert_eq!(raw, "\"IN_PROGRESS\"");
    }

    #[test]
    fn unknown_check_kind_is_preserved() {
        let check: VerificationCheck =
            serde_json::from_str(r#"{"type":"smoke_test","target":"x"}"#).expect("parse");
        assert_eq!(check.kind, CheckKind::Unknown("smoke_test".to_string()));
        let raw = serde_json::to_string(&check).expect("serialize");
        assert!(raw.contains("\"type\":\"smoke_test\""));
    }

    #[test]
    fn task_defaults_apply_on_sparse_json() {
        let task: Task = serde_json::from_str(r#"{"id":"task-1","title":"T"}"#).expect("parse");
        assert_eq!(task.status, TaskStatus::Backlog);
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert_eq!(task.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn clamp_priority_bounds() {
        assert_eq!(clamp_priority(-4), 1);
        assert_eq!(clamp_priority(42), 10);
        assert_eq!(clamp_priority(7), 7);
    }

    #[test]
    fn clip_chars_respects_char_boundaries() {
        assert_eq!(clip_chars("héllo", 2), "hé");
        assert_eq!(clip_chars("abc", 10), "abc");
    }
}
