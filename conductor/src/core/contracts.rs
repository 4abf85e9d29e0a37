//! Value objects passed between planner, actor and critic for one attempt.
//!
//! None of these are persisted on their own; the planner folds them back into
//! task logs (and, for [`FeedbackRecord`], the checkpointed feedback log).

use serde::{Deserialize, Serialize};

use crate::core::feedback::UserFeedback;
use crate::core::types::{AgentResult, CheckResult, Goal, Task};

/// Planning context snapshot handed to the actor with each decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanContext {
    pub goals: Vec<Goal>,
    /// Bullet summary of operator notes.
    pub notes_summary: String,
    /// Active operator feedback, already pruned by TTL.
    pub user_feedback: Vec<UserFeedback>,
    /// Most recent review outcomes across tasks.
    pub recent_feedback: Vec<FeedbackRecord>,
    pub domain: Option<String>,
    pub surgical_mode: bool,
    pub surgical_paths: Vec<String>,
}

impl PlanContext {
    /// Feedback addressed to `task_id` first, then general entries.
    pub fn feedback_for(&self, task_id: &str) -> Vec<&UserFeedback> {
        let specific = self
            .user_feedback
            .iter()
            .filter(|entry| entry.task_id.as_deref() == Some(task_id));
        let general = self
            .user_feedback
            .iter()
            .filter(|entry| entry.task_id.is_none());
        specific.chain(general).collect()
    }
}

/// One scheduled attempt of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDecision {
    /// Snapshot of the task taken when it was marked `IN_PROGRESS`.
    pub task: Task,
    pub step: u64,
    pub attempt: u32,
    pub context: PlanContext,
    pub replan_depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorStatus {
    Success,
    Error,
}

/// Result of one actor attempt.
///
/// `status` reflects only the agent call; acceptance results live in `tests`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorOutcome {
    pub status: ActorStatus,
    pub agent: AgentResult,
    pub tests: Vec<CheckResult>,
    pub error: Option<String>,
}

impl ActorOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ActorStatus::Success
    }

    /// True when at least one check ran and none failed.
    pub fn all_tests_passed(&self) -> bool {
        !self.tests.is_empty() && self.tests.iter().all(|result| result.passed)
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &CheckResult> {
        self.tests.iter().filter(|result| !result.passed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pass,
    Fail,
    NeedsFollowup,
}

impl ReviewStatus {
    /// Map free-form reviewer status text; anything unrecognised needs follow-up.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PASS" | "SUCCESS" => ReviewStatus::Pass,
            "FAIL" | "FAILED" => ReviewStatus::Fail,
            _ => ReviewStatus::NeedsFollowup,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pass => "PASS",
            ReviewStatus::Fail => "FAIL",
            ReviewStatus::NeedsFollowup => "NEEDS_FOLLOWUP",
        }
    }
}

/// Qualitative reviewer judgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub status: ReviewStatus,
    pub summary: String,
    #[serde(default)]
    pub next_steps: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub raw_output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Pass,
    Fail,
}

/// Final accept/reject decision for an attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticVerdict {
    pub status: VerdictStatus,
    pub summary: String,
    pub review: Option<ReviewFeedback>,
    pub critic_summary: String,
    pub findings: Vec<String>,
}

impl CriticVerdict {
    pub fn fail(summary: impl Into<String>) -> Self {
        let summary = summary.into();
        Self {
            status: VerdictStatus::Fail,
            critic_summary: summary.clone(),
            summary,
            review: None,
            findings: Vec::new(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == VerdictStatus::Pass
    }
}

/// Compact per-check entry stored in the feedback log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub description: String,
    pub passed: bool,
    pub message: String,
}

impl From<&CheckResult> for TestSummary {
    fn from(result: &CheckResult) -> Self {
        Self {
            description: if result.check.description.is_empty() {
                result.check.target.clone()
            } else {
                result.check.description.clone()
            },
            passed: result.passed,
            message: result.message.clone(),
        }
    }
}

/// One reviewed attempt, kept in the planner's feedback log and checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub task_id: String,
    pub attempt: u32,
    pub review_status: Option<ReviewStatus>,
    pub review_summary: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestSummary>,
    pub next_steps: Option<String>,
    pub critic_summary: String,
}

impl FeedbackRecord {
    pub fn from_attempt(
        decision: &PlanDecision,
        outcome: &ActorOutcome,
        verdict: &CriticVerdict,
    ) -> Self {
        Self {
            task_id: decision.task.id.clone(),
            attempt: decision.attempt,
            review_status: verdict.review.as_ref().map(|review| review.status),
            review_summary: verdict.review.as_ref().map(|review| review.summary.clone()),
            tests: outcome.tests.iter().map(TestSummary::from).collect(),
            next_steps: verdict
                .review
                .as_ref()
                .and_then(|review| review.next_steps.clone()),
            critic_summary: verdict.critic_summary.clone(),
        }
    }
}
