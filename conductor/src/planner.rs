//! Planner: task selection and the single write path for attempt results.
//!
//! The planner owns the task graph and persists it after every mutation.
//! Remediation is split in two: [`Planner::apply_outcome`] decides whether a
//! failed task may be replanned and returns a [`ReplanRequest`]; the caller
//! runs the replanner (slow, outside any lock) and hands the drafts back to
//! [`Planner::merge_remediation`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::core::contracts::{
    ActorOutcome, CriticVerdict, FeedbackRecord, PlanContext, PlanDecision, ReviewFeedback,
};
use crate::core::feedback::{MAX_ACTIVE_FEEDBACK, UserFeedback, prune};
use crate::core::graph::TaskGraph;
use crate::core::proposals::TaskDraft;
use crate::core::transitions::{
    begin_attempt, complete, fail_exhausted, record_failure, reset_in_progress,
};
use crate::core::types::{AttemptTests, CheckResult, Goal, Task, TaskStatus, clip_chars};
use crate::io::checkpoint::CheckpointData;
use crate::io::config::OrchestratorConfig;
use crate::io::docs::{ChangelogEntry, DocsQueue, TaskHistoryRecord};
use crate::io::events::{EventKind, EventLog};
use crate::io::store::{TaskStore, new_id};
use crate::parallel::{ActiveTasks, StepCounter};

const RECENT_FEEDBACK: usize = 5;
const FEEDBACK_LOG_CAP: usize = 50;
const CRITIC_FINDINGS_KEPT: usize = 3;
const ERROR_HINT_CHARS: usize = 200;
const DEFAULT_REJECTION: &str = "Critic rejected the current changes.";

/// Planner knobs taken from the run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerSettings {
    pub max_replan_depth: u32,
    pub feedback_ttl: u64,
    pub domain: Option<String>,
    pub surgical_mode: bool,
    pub surgical_paths: Vec<String>,
}

impl PlannerSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_replan_depth: config.max_replan_depth,
            feedback_ttl: config.user_feedback_ttl,
            domain: config.domain.clone(),
            surgical_mode: config.surgical_mode,
            surgical_paths: config.surgical_paths.clone(),
        }
    }
}

/// A permanently failed task that may receive remediation tasks.
#[derive(Debug, Clone)]
pub struct ReplanRequest {
    pub task: Task,
    pub review: Option<ReviewFeedback>,
    pub tests: Vec<CheckResult>,
    pub depth: u32,
    pub step: u64,
}

pub struct Planner {
    graph: TaskGraph,
    goals: Vec<Goal>,
    store: TaskStore,
    docs: DocsQueue,
    events: Arc<EventLog>,
    trace_id: String,
    settings: PlannerSettings,
    user_feedback: Vec<UserFeedback>,
    feedback_log: Vec<FeedbackRecord>,
    notes_summary: String,
    /// Replan depth per task lineage; remediation tasks inherit parent + 1.
    replan_depth: HashMap<String, u32>,
}

impl Planner {
    pub fn new(
        graph: TaskGraph,
        goals: Vec<Goal>,
        store: TaskStore,
        docs: DocsQueue,
        events: Arc<EventLog>,
        trace_id: impl Into<String>,
        settings: PlannerSettings,
    ) -> Self {
        Self {
            replan_depth: lineage_depths(&graph),
            graph,
            goals,
            store,
            docs,
            events,
            trace_id: trace_id.into(),
            settings,
            user_feedback: Vec::new(),
            feedback_log: Vec::new(),
            notes_summary: String::new(),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn goals_mut(&mut self) -> &mut [Goal] {
        &mut self.goals
    }

    pub fn feedback_log(&self) -> &[FeedbackRecord] {
        &self.feedback_log
    }

    pub fn notes_summary(&self) -> &str {
        &self.notes_summary
    }

    pub fn user_feedback(&self) -> &[UserFeedback] {
        &self.user_feedback
    }

    pub fn replan_depth(&self, id: &str) -> u32 {
        self.replan_depth.get(id).copied().unwrap_or(0)
    }

    pub fn save(&self) -> Result<()> {
        self.store.save(&self.graph)
    }

    /// Return interrupted tasks to the backlog, fail tasks with no attempts
    /// left and persist the result.
    pub fn recover(&mut self) -> Result<Vec<String>> {
        let reset = reset_in_progress(&mut self.graph);
        if !reset.is_empty() {
            warn!(tasks = ?reset, "reset interrupted tasks");
        }
        let exhausted = fail_exhausted(&mut self.graph);
        if !exhausted.is_empty() {
            warn!(tasks = ?exhausted, "failed backlog tasks with no attempts left");
        }
        if !reset.is_empty() || !exhausted.is_empty() {
            self.save()?;
        }
        Ok(reset)
    }

    /// Restore the feedback log saved in a checkpoint.
    pub fn restore(&mut self, checkpoint: &CheckpointData) {
        self.feedback_log = checkpoint.feedback_log.clone();
        if !checkpoint.notes_summary.is_empty() {
            self.notes_summary = checkpoint.notes_summary.clone();
        }
    }

    /// Ingest new operator feedback and drop entries past their TTL.
    pub fn refresh_context(&mut self, step: u64, new_feedback: Vec<UserFeedback>, notes_summary: String) {
        if !new_feedback.is_empty() {
            info!(entries = new_feedback.len(), "ingested operator feedback");
        }
        self.user_feedback.extend(new_feedback);
        prune(
            &mut self.user_feedback,
            step,
            self.settings.feedback_ttl,
            MAX_ACTIVE_FEEDBACK,
        );
        self.notes_summary = notes_summary;
    }

    pub fn context(&self) -> PlanContext {
        let skip = self.feedback_log.len().saturating_sub(RECENT_FEEDBACK);
        PlanContext {
            goals: self.goals.clone(),
            notes_summary: self.notes_summary.clone(),
            user_feedback: self.user_feedback.clone(),
            recent_feedback: self.feedback_log[skip..].to_vec(),
            domain: self.settings.domain.clone(),
            surgical_mode: self.settings.surgical_mode,
            surgical_paths: self.settings.surgical_paths.clone(),
        }
    }

    /// Pick the highest-priority ready task that is semantically ready and
    /// start an attempt. A step is only taken when a task is available.
    #[instrument(skip_all)]
    pub fn next_decision(&mut self, steps: &StepCounter) -> Result<Option<PlanDecision>> {
        let chosen = {
            let ready = self.graph.get_ready_tasks();
            let Some(first) = ready.first() else {
                return Ok(None);
            };
            ready
                .iter()
                .find(|task| self.semantically_ready(task))
                .unwrap_or(first)
                .id
                .clone()
        };
        let decision = self.start(&chosen, steps.next(), "single")?;
        self.save()?;
        Ok(Some(decision))
    }

    /// Start up to `limit` ready tasks not already in flight, each with its
    /// own step number. Claimed ids must be released by the caller.
    pub fn next_batch(
        &mut self,
        limit: usize,
        active: &ActiveTasks,
        steps: &StepCounter,
    ) -> Result<Vec<PlanDecision>> {
        let ids: Vec<String> = self
            .graph
            .get_ready_tasks()
            .iter()
            .filter(|task| !active.contains(&task.id))
            .take(limit)
            .map(|task| task.id.clone())
            .collect();
        let mut decisions = Vec::with_capacity(ids.len());
        for id in ids {
            if !active.try_claim(&id) {
                continue;
            }
            match self.start(&id, steps.next(), "batch") {
                Ok(decision) => decisions.push(decision),
                Err(err) => {
                    active.release(&id);
                    return Err(err);
                }
            }
        }
        if !decisions.is_empty() {
            self.save()?;
        }
        Ok(decisions)
    }

    fn start(&mut self, id: &str, step: u64, mode: &str) -> Result<PlanDecision> {
        let task = begin_attempt(&mut self.graph, id).map_err(|err| anyhow!(err))?;
        info!(task_id = %task.id, attempt = task.attempt_count, mode, "task selected");
        self.events.record(
            EventKind::Decision,
            "planner",
            step,
            &self.trace_id,
            None,
            json!({
                "task_id": task.id,
                "title": task.title,
                "attempt": task.attempt_count,
                "priority": task.priority,
                "mode": mode,
            }),
        );
        Ok(PlanDecision {
            attempt: task.attempt_count,
            replan_depth: self.replan_depth(&task.id),
            context: self.context(),
            task,
            step,
        })
    }

    /// Verification-style tasks wait until at least half of the other live
    /// tasks are complete.
    fn semantically_ready(&self, task: &Task) -> bool {
        if !is_verification_task(task) {
            return true;
        }
        let others: Vec<&Task> = self
            .graph
            .tasks()
            .iter()
            .filter(|other| other.id != task.id && other.status != TaskStatus::Obsolete)
            .collect();
        if others.is_empty() {
            return true;
        }
        let complete = others
            .iter()
            .filter(|other| other.status == TaskStatus::Complete)
            .count();
        complete * 2 >= others.len()
    }

    /// Fold one attempt back into the graph.
    ///
    /// Returns a replan request when the task just failed permanently and its
    /// lineage may still be replanned.
    #[instrument(skip_all, fields(task_id = %decision.task.id, step = decision.step))]
    pub fn apply_outcome(
        &mut self,
        decision: &PlanDecision,
        outcome: &ActorOutcome,
        verdict: &CriticVerdict,
    ) -> Result<Option<ReplanRequest>> {
        let id = decision.task.id.as_str();
        let task = self
            .graph
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown task '{id}'"))?;
        if !outcome.tests.is_empty() {
            let failed = outcome.failed_tests().count();
            task.test_history.push(AttemptTests {
                attempt: decision.attempt,
                passed: outcome.tests.len() - failed,
                failed,
            });
        }

        let status = if !outcome.is_success() {
            let error = outcome
                .error
                .as_deref()
                .filter(|error| !error.trim().is_empty())
                .unwrap_or("Actor failed unexpectedly.");
            record_failure(
                task,
                &format!("Attempt {}: {error}", decision.attempt),
                clip_chars(error, ERROR_HINT_CHARS),
            )
        } else if verdict.is_pass() {
            let summary = verdict
                .review
                .as_ref()
                .map_or(verdict.summary.as_str(), |review| review.summary.as_str());
            complete(task, summary);
            self.docs
                .enqueue_changelog(ChangelogEntry::for_completed(task, summary));
            TaskStatus::Complete
        } else {
            let note = if verdict.summary.trim().is_empty() {
                DEFAULT_REJECTION
            } else {
                verdict.summary.as_str()
            };
            let next_action = verdict
                .review
                .as_ref()
                .and_then(|review| review.next_steps.as_deref())
                .unwrap_or(note);
            if let Some(review) = &verdict.review {
                if !review.summary.trim().is_empty() {
                    task.review_feedback.push(review.summary.clone());
                }
                task.review_feedback.extend(review.suggestions.iter().cloned());
            }
            task.critic_feedback.extend(
                verdict
                    .findings
                    .iter()
                    .take(CRITIC_FINDINGS_KEPT)
                    .cloned(),
            );
            record_failure(task, note, next_action)
        };

        let task = task.clone();
        info!(status = %status, attempt = decision.attempt, "attempt applied");
        let mut payload = json!({
            "task_id": task.id,
            "status": status,
            "attempt": decision.attempt,
            "summary": clip_chars(&verdict.summary, ERROR_HINT_CHARS),
        });
        if status == TaskStatus::Failed {
            let blocked = self.graph.dependents(&task.id);
            if !blocked.is_empty() {
                warn!(blocked = ?blocked, "failed task blocks dependents");
            }
            payload["blocked"] = json!(blocked);
        }
        self.events.record(
            EventKind::TaskUpdate,
            "planner",
            decision.step,
            &self.trace_id,
            None,
            payload,
        );
        if outcome.is_success() {
            self.feedback_log
                .push(FeedbackRecord::from_attempt(decision, outcome, verdict));
            let excess = self.feedback_log.len().saturating_sub(FEEDBACK_LOG_CAP);
            self.feedback_log.drain(..excess);
        }
        if matches!(status, TaskStatus::Complete | TaskStatus::Failed) {
            self.docs
                .enqueue_history(TaskHistoryRecord::from_attempt(&task, verdict, &outcome.tests));
        }
        self.save()?;

        if status != TaskStatus::Failed {
            return Ok(None);
        }
        let depth = self.replan_depth(&task.id);
        if depth >= self.settings.max_replan_depth {
            warn!(depth, "replan depth exhausted");
            self.reject_replan(&task.id, decision.step, "max_depth_reached", depth);
            return Ok(None);
        }
        Ok(Some(ReplanRequest {
            review: verdict.review.clone(),
            tests: outcome.tests.clone(),
            depth,
            step: decision.step,
            task,
        }))
    }

    /// Insert remediation drafts for a failed task. Each new task depends on
    /// the failed one and sits one level deeper in its lineage.
    #[instrument(skip_all, fields(task_id = %request.task.id, drafts = drafts.len()))]
    pub fn merge_remediation(
        &mut self,
        request: &ReplanRequest,
        drafts: Vec<TaskDraft>,
    ) -> Result<Vec<String>> {
        let failed_id = request.task.id.as_str();
        if drafts.is_empty() {
            self.reject_replan(
                failed_id,
                request.step,
                "no_remediation_tasks_generated",
                request.depth,
            );
            return Ok(Vec::new());
        }
        let mut added = Vec::new();
        for mut draft in drafts {
            if !draft.depends_on.iter().any(|dep| dep == failed_id) {
                draft.depends_on.push(failed_id.to_string());
            }
            let mut task = draft.into_task(new_id("task"));
            task.remediates = Some(failed_id.to_string());
            let task_id = task.id.clone();
            match self.insert_proposal(task) {
                Ok(()) => {
                    self.replan_depth.insert(task_id.clone(), request.depth + 1);
                    self.events.record(
                        EventKind::Replan,
                        "planner",
                        request.step,
                        &self.trace_id,
                        None,
                        json!({
                            "original_task": failed_id,
                            "new_task": task_id,
                            "reason": "failure_remediation",
                            "depth": request.depth + 1,
                        }),
                    );
                    added.push(task_id);
                }
                Err(err) => {
                    warn!(err = %err, "remediation task rejected");
                    self.events.record(
                        EventKind::ReplanRejected,
                        "planner",
                        request.step,
                        &self.trace_id,
                        None,
                        json!({ "task_id": failed_id, "reason": err, "depth": request.depth }),
                    );
                }
            }
        }
        if !added.is_empty() {
            self.save()?;
        }
        Ok(added)
    }

    /// Insert gap-analysis drafts as fresh tasks.
    pub fn add_gap_tasks(&mut self, drafts: Vec<TaskDraft>, step: u64) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for draft in drafts {
            let task = draft.into_task(new_id("task"));
            let task_id = task.id.clone();
            match self.insert_proposal(task) {
                Ok(()) => {
                    self.events.record(
                        EventKind::TaskUpdate,
                        "gap_analyzer",
                        step,
                        &self.trace_id,
                        None,
                        json!({ "task_id": task_id, "status": TaskStatus::Backlog, "source": "goal_gap" }),
                    );
                    added.push(task_id);
                }
                Err(err) => warn!(err = %err, "gap task rejected"),
            }
        }
        if !added.is_empty() {
            self.save()?;
        }
        Ok(added)
    }

    /// Drop edges to unknown tasks, then insert (rejecting cycles).
    fn insert_proposal(&mut self, mut task: Task) -> Result<(), String> {
        let graph = &self.graph;
        let (known, unknown): (Vec<String>, Vec<String>) = task
            .depends_on
            .drain(..)
            .partition(|dep| graph.contains(dep));
        if !unknown.is_empty() {
            warn!(task_id = %task.id, unknown = ?unknown, "dropping unknown dependencies");
        }
        task.depends_on = known;
        task.blocks.retain(|blocked| graph.contains(blocked));
        self.graph.add_task(task)
    }

    fn reject_replan(&self, task_id: &str, step: u64, reason: &str, depth: u32) {
        self.events.record(
            EventKind::ReplanRejected,
            "planner",
            step,
            &self.trace_id,
            None,
            json!({ "task_id": task_id, "reason": reason, "depth": depth }),
        );
    }

    /// Write queued changelog and history records.
    pub fn flush_docs(&mut self) {
        if let Err(err) = self.docs.flush() {
            warn!(err = %format!("{err:#}"), "failed to flush documentation queue");
        }
    }

    pub fn checkpoint(&self, step: u64, current_task_id: Option<String>) -> CheckpointData {
        CheckpointData::capture(
            step,
            &self.trace_id,
            &self.graph,
            current_task_id,
            self.feedback_log.clone(),
            self.notes_summary.clone(),
        )
    }
}

/// Title starts with verify/validate/test, or the task mentions verification.
pub fn is_verification_task(task: &Task) -> bool {
    let title = task.title.trim().to_lowercase();
    ["verify", "validate", "test"]
        .iter()
        .any(|prefix| title.starts_with(prefix))
        || title.contains("verification")
        || task.description.to_lowercase().contains("verification")
}

/// Replan depth of every remediation task, following `remediates` links so
/// lineage survives a restart.
fn lineage_depths(graph: &TaskGraph) -> HashMap<String, u32> {
    let mut depths = HashMap::new();
    for task in graph.tasks() {
        let mut depth = 0u32;
        let mut parent = task.remediates.as_deref();
        while let Some(id) = parent {
            depth += 1;
            // Hand-edited stores can loop; a lineage is never longer than the graph.
            if depth as usize > graph.len() {
                break;
            }
            parent = graph.get(id).and_then(|task| task.remediates.as_deref());
        }
        if depth > 0 {
            depths.insert(task.id.clone(), depth);
        }
    }
    depths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contracts::{ActorStatus, ReviewStatus, VerdictStatus};
    use crate::core::types::{AgentResult, CheckKind, VerificationCheck};
    use crate::io::events::EventFilter;
    use crate::test_support::{TestWorkspace, task, task_with_deps};

    fn planner(ws: &TestWorkspace, tasks: Vec<Task>) -> Planner {
        let paths = &ws.paths;
        let events = Arc::new(EventLog::open(&paths.event_log_path).expect("events"));
        Planner::new(
            TaskGraph::from_tasks(tasks).expect("graph"),
            Vec::new(),
            paths.task_store(),
            DocsQueue::new(&paths.task_history_path, &paths.changelog_path),
            events,
            "orch-test",
            PlannerSettings::from_config(&OrchestratorConfig::default()),
        )
    }

    fn success() -> ActorOutcome {
        ActorOutcome {
            status: ActorStatus::Success,
            agent: AgentResult::success("done"),
            tests: Vec::new(),
            error: None,
        }
    }

    fn verdict(status: VerdictStatus, summary: &str) -> CriticVerdict {
        CriticVerdict {
            status,
            summary: summary.to_string(),
            review: Some(ReviewFeedback {
                status: if status == VerdictStatus::Pass {
                    ReviewStatus::Pass
                } else {
                    ReviewStatus::Fail
                },
                summary: summary.to_string(),
                next_steps: None,
                suggestions: vec!["tighten the test".to_string()],
                raw_output: String::new(),
            }),
            critic_summary: String::new(),
            findings: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        }
    }

    fn events(ws: &TestWorkspace, kind: EventKind) -> Vec<crate::io::events::Event> {
        EventLog::open(&ws.paths.event_log_path)
            .expect("events")
            .query(&EventFilter::kind(kind))
            .expect("query")
    }

    #[test]
    fn pass_completes_and_unblocks_dependents() {
        let ws = TestWorkspace::new();
        let mut planner = planner(&ws, vec![task("a"), task_with_deps("b", &["a"])]);
        let decision = planner.next_decision(&StepCounter::new(0)).expect("decide").expect("decision");
        assert_eq!(decision.task.id, "a");
        assert_eq!(planner.graph().get("a").map(|t| t.status), Some(TaskStatus::InProgress));
        assert_eq!(
            ws.tasks().get("a").map(|t| t.status),
            Some(TaskStatus::InProgress)
        );

        let replan = planner
            .apply_outcome(&decision, &success(), &verdict(VerdictStatus::Pass, "Done well."))
            .expect("apply");
        assert!(replan.is_none());
        let a = planner.graph().get("a").expect("a");
        assert_eq!(a.status, TaskStatus::Complete);
        assert_eq!(a.summary, vec!["Done well.".to_string()]);
        let ready: Vec<&str> = planner
            .graph()
            .get_ready_tasks()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ready, vec!["b"]);
        assert_eq!(planner.feedback_log().len(), 1);

        planner.flush_docs();
        let changelog = std::fs::read_to_string(&ws.paths.changelog_path).expect("changelog");
        assert!(changelog.contains("a title: Done well."));
    }

    #[test]
    fn critic_failure_requeues_with_feedback() {
        let ws = TestWorkspace::new();
        let mut planner = planner(&ws, vec![task("a")]);
        let decision = planner.next_decision(&StepCounter::new(0)).expect("decide").expect("decision");
        let replan = planner
            .apply_outcome(&decision, &success(), &verdict(VerdictStatus::Fail, "Missing edge case."))
            .expect("apply");
        assert!(replan.is_none());
        let a = planner.graph().get("a").expect("a");
        assert_eq!(a.status, TaskStatus::Backlog);
        assert_eq!(a.next_action.as_deref(), Some("Missing edge case."));
        assert_eq!(
            a.review_feedback,
            vec!["Missing edge case.".to_string(), "tighten the test".to_string()]
        );
        assert_eq!(a.critic_feedback.len(), 3);
    }

    #[test]
    fn actor_failure_records_attempt_note() {
        let ws = TestWorkspace::new();
        let mut planner = planner(&ws, vec![task("a")]);
        let decision = planner.next_decision(&StepCounter::new(0)).expect("decide").expect("decision");
        let outcome = ActorOutcome {
            status: ActorStatus::Error,
            agent: AgentResult::failed("boom"),
            tests: Vec::new(),
            error: Some("boom".to_string()),
        };
        planner
            .apply_outcome(&decision, &outcome, &CriticVerdict::fail("boom"))
            .expect("apply");
        let a = planner.graph().get("a").expect("a");
        assert_eq!(a.summary, vec!["Attempt 1: boom".to_string()]);
        assert_eq!(a.next_action.as_deref(), Some("boom"));
        assert!(planner.feedback_log().is_empty());
    }

    /// Exhausting attempts fails the task and asks for remediation; drafts
    /// then depend on the failed task one level deeper.
    #[test]
    fn exhausted_task_is_replanned_with_depth() {
        let ws = TestWorkspace::new();
        let mut failing = task("a");
        failing.max_attempts = 1;
        let mut planner = planner(&ws, vec![failing]);
        let decision = planner.next_decision(&StepCounter::new(0)).expect("decide").expect("decision");
        let request = planner
            .apply_outcome(&decision, &success(), &verdict(VerdictStatus::Fail, "Broken."))
            .expect("apply")
            .expect("replan request");
        assert_eq!(request.depth, 0);
        assert_eq!(planner.graph().get("a").map(|t| t.status), Some(TaskStatus::Failed));

        let draft = TaskDraft {
            title: "Fix a".to_string(),
            description: "Fix a".to_string(),
            priority: 7,
            depends_on: vec!["ghost".to_string()],
            blocks: Vec::new(),
            related_goals: Vec::new(),
            acceptance_criteria: vec![VerificationCheck::new(CheckKind::FileExists, "a.txt", "")],
        };
        let added = planner.merge_remediation(&request, vec![draft]).expect("merge");
        assert_eq!(added.len(), 1);
        let child = planner.graph().get(&added[0]).expect("child");
        assert_eq!(child.depends_on, vec!["a".to_string()]);
        assert_eq!(child.remediates.as_deref(), Some("a"));
        assert_eq!(planner.replan_depth(&added[0]), 1);
        let ready: Vec<&str> = planner
            .graph()
            .get_ready_tasks()
            .iter()
            .map(|task| task.id.as_str())
            .collect();
        assert_eq!(ready, vec![added[0].as_str()]);
        let replans = events(&ws, EventKind::Replan);
        assert_eq!(replans.len(), 1);
        assert_eq!(replans[0].payload["reason"], "failure_remediation");
    }

    #[test]
    fn replan_depth_ceiling_rejects_without_mutation() {
        let ws = TestWorkspace::new();
        let mut failing = task("a");
        failing.max_attempts = 1;
        let mut planner = planner(&ws, vec![failing]);
        planner.replan_depth.insert("a".to_string(), 3);
        let decision = planner.next_decision(&StepCounter::new(0)).expect("decide").expect("decision");
        let request = planner
            .apply_outcome(&decision, &success(), &verdict(VerdictStatus::Fail, "Broken."))
            .expect("apply");
        assert!(request.is_none());
        assert_eq!(planner.graph().len(), 1);
        let rejected = events(&ws, EventKind::ReplanRejected);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].payload["reason"], "max_depth_reached");
        assert_eq!(rejected[0].payload["depth"], 3);
    }

    #[test]
    fn replan_depth_is_rebuilt_from_remediation_links() {
        let ws = TestWorkspace::new();
        let mut first = task_with_deps("fix-1", &["a"]);
        first.remediates = Some("a".to_string());
        let mut second = task_with_deps("fix-2", &["fix-1"]);
        second.remediates = Some("fix-1".to_string());
        let planner = planner(&ws, vec![task("a"), first, second]);
        assert_eq!(planner.replan_depth("a"), 0);
        assert_eq!(planner.replan_depth("fix-1"), 1);
        assert_eq!(planner.replan_depth("fix-2"), 2);
    }

    #[test]
    fn empty_remediation_is_logged() {
        let ws = TestWorkspace::new();
        let mut planner = planner(&ws, vec![task("a")]);
        let request = ReplanRequest {
            task: task("a"),
            review: None,
            tests: Vec::new(),
            depth: 0,
            step: 4,
        };
        assert!(planner.merge_remediation(&request, Vec::new()).expect("merge").is_empty());
        let rejected = events(&ws, EventKind::ReplanRejected);
        assert_eq!(rejected[0].payload["reason"], "no_remediation_tasks_generated");
    }

    #[test]
    fn cyclic_gap_proposal_is_rejected() {
        let ws = TestWorkspace::new();
        let mut planner = planner(&ws, vec![task("a"), task_with_deps("b", &["a"])]);
        let cyclic = TaskDraft {
            title: "Loop".to_string(),
            description: "Loop".to_string(),
            priority: 5,
            depends_on: vec!["b".to_string()],
            blocks: vec!["a".to_string()],
            related_goals: Vec::new(),
            acceptance_criteria: Vec::new(),
        };
        let added = planner.add_gap_tasks(vec![cyclic], 2).expect("gap");
        assert!(added.is_empty());
        assert_eq!(planner.graph().len(), 2);
        assert!(!planner.graph().has_cycles());
    }

    #[test]
    fn cyclic_remediation_is_rejected_and_graph_untouched() {
        let ws = TestWorkspace::new();
        let mut failing = task("a");
        failing.max_attempts = 1;
        let mut planner = planner(&ws, vec![failing, task_with_deps("b", &["a"])]);
        let decision = planner.next_decision(&StepCounter::new(0)).expect("decide").expect("decision");
        let request = planner
            .apply_outcome(&decision, &success(), &verdict(VerdictStatus::Fail, "Broken."))
            .expect("apply")
            .expect("replan request");
        let updates = events(&ws, EventKind::TaskUpdate);
        assert_eq!(updates[0].payload["blocked"], json!(["b"]));

        let before = planner.graph().clone();
        let cyclic = TaskDraft {
            title: "Rewire a".to_string(),
            description: "Rewire a".to_string(),
            priority: 5,
            depends_on: Vec::new(),
            blocks: vec!["a".to_string()],
            related_goals: Vec::new(),
            acceptance_criteria: Vec::new(),
        };
        let added = planner.merge_remediation(&request, vec![cyclic]).expect("merge");

        assert!(added.is_empty());
        assert_eq!(planner.graph(), &before);
        assert!(!planner.graph().has_cycles());
        let rejected = events(&ws, EventKind::ReplanRejected);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].payload["task_id"], "a");
        let reason = rejected[0].payload["reason"].as_str().unwrap_or_default();
        assert!(reason.contains("cycle"), "{reason}");
        assert!(events(&ws, EventKind::Replan).is_empty());
    }

    #[test]
    fn recover_fails_backlog_tasks_without_attempts_left() {
        let ws = TestWorkspace::new();
        let mut spent = task("a");
        spent.attempt_count = 3;
        spent.max_attempts = 3;
        let mut planner = planner(&ws, vec![spent, task("b")]);

        planner.recover().expect("recover");

        assert_eq!(planner.graph().get("a").map(|t| t.status), Some(TaskStatus::Failed));
        assert_eq!(ws.tasks().get("a").map(|t| t.status), Some(TaskStatus::Failed));
        let decision = planner.next_decision(&StepCounter::new(0)).expect("decide").expect("decision");
        assert_eq!(decision.task.id, "b");
    }

    #[test]
    fn verification_tasks_wait_for_prerequisites() {
        let ws = TestWorkspace::new();
        let mut verify = task("v");
        verify.title = "Verify the build".to_string();
        verify.priority = 9;
        let mut planner = planner(&ws, vec![verify, task("a"), task("b")]);
        let decision = planner.next_decision(&StepCounter::new(0)).expect("decide").expect("decision");
        assert_eq!(decision.task.id, "a");
    }

    #[test]
    fn batch_claims_distinct_tasks_with_unique_steps() {
        let ws = TestWorkspace::new();
        let mut planner = planner(&ws, vec![task("a"), task("b"), task("c")]);
        let active = ActiveTasks::new();
        let steps = StepCounter::new(0);
        let batch = planner.next_batch(2, &active, &steps).expect("batch");
        let ids: Vec<&str> = batch.iter().map(|d| d.task.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(batch[0].step, 1);
        assert_eq!(batch[1].step, 2);
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn feedback_expires_after_ttl() {
        let ws = TestWorkspace::new();
        let mut planner = planner(&ws, vec![task("a")]);
        planner.refresh_context(1, vec![UserFeedback::general("keep it small", 1)], String::new());
        assert_eq!(planner.context().user_feedback.len(), 1);
        planner.refresh_context(7, Vec::new(), String::new());
        assert!(planner.context().user_feedback.is_empty());
    }
}
