//! Top-level control loop: check completion, dispatch ready work, repeat.
//!
//! One iteration either runs a single task on the calling thread or hands a
//! batch to the worker pool. Every agent call takes a fresh step from the
//! shared [`StepCounter`]; the loop ends on goal completion, when no work can
//! be produced, or when the step budget is spent.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::agents::AgentHandle;
use crate::agents::actor::Actor;
use crate::agents::critic::{Critic, ProductionGate};
use crate::agents::gap_analyzer::GapAnalyzer;
use crate::agents::replanner::Replanner;
use crate::agents::reviewer::Reviewer;
use crate::core::completion::{apply_evaluation, core_goals_met, unmet_core_goals};
use crate::core::contracts::PlanDecision;
use crate::core::types::TaskStatus;
use crate::evaluators::EvaluatorRegistry;
use crate::io::agent::ExecutionAgent;
use crate::io::checkpoint::CheckpointManager;
use crate::io::config::OrchestratorConfig;
use crate::io::docs::DocsQueue;
use crate::io::events::{EventKind, EventLog};
use crate::io::init::WorkspacePaths;
use crate::io::jobs::JobManager;
use crate::io::notes::{DEFAULT_SUMMARY_ITEMS, FeedbackTracker, NotesManager};
use crate::io::store::{GoalStore, new_id};
use crate::io::verify::CheckRunner;
use crate::parallel::{ActiveTasks, StepCounter, WorkerPool};
use crate::planner::{Planner, PlannerSettings};

const ACTOR: &str = "orchestrator";
const DEFAULT_WORKSPACE_DIR: &str = ".orchestrator";

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every `CORE` goal is achieved with enough confidence.
    Success,
    /// Nothing is ready and gap analysis produced no usable work.
    NoTasksAvailable,
    /// The step budget ran out.
    MaxIterationsReached,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Success => "SUCCESS",
            RunOutcome::NoTasksAvailable => "NO_TASKS_AVAILABLE",
            RunOutcome::MaxIterationsReached => "MAX_ITERATIONS_REACHED",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of a run, printed by the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: RunOutcome,
    pub steps: u64,
    pub completed: usize,
    pub failed: usize,
    pub backlog: usize,
}

pub struct Orchestrator<'a> {
    paths: WorkspacePaths,
    config: OrchestratorConfig,
    agent: &'a dyn ExecutionAgent,
    checks: &'a dyn CheckRunner,
    evaluators: EvaluatorRegistry,
    events: Arc<EventLog>,
    trace_id: String,
    /// Workspace directory relative to the project root.
    workspace_dir: String,
    planner: Mutex<Planner>,
    goal_store: GoalStore,
    checkpoints: CheckpointManager,
    jobs: JobManager,
    notes: NotesManager,
    feedback: FeedbackTracker,
    steps: StepCounter,
    active: ActiveTasks,
    gap_attempts: u32,
}

impl<'a> Orchestrator<'a> {
    /// Load the workspace state. Fails only on setup errors: a missing
    /// workspace, an unreadable goal or task store, or invalid config.
    pub fn new(
        paths: WorkspacePaths,
        config: OrchestratorConfig,
        agent: &'a dyn ExecutionAgent,
        checks: &'a dyn CheckRunner,
        evaluators: EvaluatorRegistry,
    ) -> Result<Self> {
        paths.ensure_ready()?;
        config.validate()?;
        let goal_store = paths.goal_store();
        let goals = goal_store.load()?;
        let graph = paths.task_store().load()?;
        let events = Arc::new(EventLog::open(&paths.event_log_path)?);
        let trace_id = new_id("orch");
        let docs = DocsQueue::new(&paths.task_history_path, &paths.changelog_path);
        let planner = Planner::new(
            graph,
            goals,
            paths.task_store(),
            docs,
            Arc::clone(&events),
            trace_id.clone(),
            PlannerSettings::from_config(&config),
        );
        let feedback = FeedbackTracker::new(&paths.user_notes_path, &paths.feedback_state_path);
        feedback.initialize()?;
        let workspace_dir = paths
            .workspace
            .strip_prefix(&paths.project_root)
            .ok()
            .map(|dir| dir.to_string_lossy().into_owned())
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(|| DEFAULT_WORKSPACE_DIR.to_string());

        Ok(Self {
            checkpoints: CheckpointManager::new(&paths.checkpoints_dir, config.max_checkpoints),
            jobs: JobManager::new(&paths.jobs_dir, &paths.experiments_path)?,
            notes: NotesManager::new(&paths.notes_path),
            feedback,
            goal_store,
            planner: Mutex::new(planner),
            workspace_dir,
            trace_id,
            events,
            evaluators,
            checks,
            agent,
            config,
            paths,
            steps: StepCounter::default(),
            active: ActiveTasks::new(),
            gap_attempts: 0,
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Ids currently dispatched to workers; empty between iterations.
    pub fn active_tasks(&self) -> &ActiveTasks {
        &self.active
    }

    /// Drive the loop until a definite outcome.
    #[instrument(skip_all, fields(trace_id = %self.trace_id))]
    pub fn run(&mut self) -> Result<RunSummary> {
        self.resume()?;
        let checkpoint_interval = self.config.checkpoint_interval.max(1);
        let docs_interval = self.config.docs_update_interval.max(1);
        let mut next_checkpoint = self.steps.current() + checkpoint_interval;
        let mut next_docs = self.steps.current() + docs_interval;
        let mut last_task = None;
        info!(
            start_step = self.steps.current(),
            max_steps = self.config.max_steps,
            parallel = self.config.max_parallel_tasks,
            "run started"
        );

        let reason = loop {
            let step = self.steps.current();
            if step >= self.config.max_steps {
                break RunOutcome::MaxIterationsReached;
            }
            let checked = step >= self.config.min_steps;
            if checked && self.goals_met(step)? {
                break RunOutcome::Success;
            }
            self.refresh_context(step);
            self.tend_jobs();

            let dispatched = self.dispatch(self.config.max_steps - step)?;
            if let Some(id) = dispatched.last() {
                last_task = Some(id.clone());
            } else {
                if !checked && self.goals_met(step)? {
                    break RunOutcome::Success;
                }
                if self.gap_attempts >= self.config.max_gap_analysis_attempts {
                    warn!(attempts = self.gap_attempts, "gap analysis exhausted");
                    break RunOutcome::NoTasksAvailable;
                }
                self.analyze_gaps()?;
            }

            let step = self.steps.current();
            if step >= next_checkpoint {
                self.save_checkpoint(step, last_task.clone());
                next_checkpoint = step + checkpoint_interval;
            }
            if step >= next_docs {
                self.planner().flush_docs();
                next_docs = step + docs_interval;
            }
        };

        self.finish(reason, last_task)
    }

    fn planner(&self) -> MutexGuard<'_, Planner> {
        self.planner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self) -> AgentHandle<'_> {
        AgentHandle {
            agent: self.agent,
            events: self.events.as_ref(),
            trace_id: &self.trace_id,
            root: &self.paths.project_root,
            timeout: Duration::from_secs(self.config.agent.timeout_secs),
        }
    }

    /// Reset interrupted tasks and pick up the step counter and feedback log
    /// from the latest checkpoint.
    fn resume(&mut self) -> Result<()> {
        let reset = self.planner().recover()?;
        let Some(checkpoint) = self.checkpoints.load_latest() else {
            return Ok(());
        };
        if checkpoint.step >= self.config.max_steps {
            info!(
                step = checkpoint.step,
                "previous run used its step budget; starting from step 0"
            );
            return Ok(());
        }
        self.steps = StepCounter::new(checkpoint.step);
        self.planner().restore(&checkpoint);
        self.events.record(
            EventKind::Checkpoint,
            ACTOR,
            checkpoint.step,
            &self.trace_id,
            None,
            json!({
                "action": "resume",
                "step": checkpoint.step,
                "previous_trace_id": checkpoint.trace_id,
                "reset_tasks": reset,
            }),
        );
        info!(step = checkpoint.step, "resumed from checkpoint");
        Ok(())
    }

    /// Evaluate every `CORE` goal, persist the results and report whether
    /// the run is complete.
    #[instrument(skip_all, fields(step = step))]
    fn goals_met(&self, step: u64) -> Result<bool> {
        let threshold = self.config.completion_confidence;
        let mut planner = self.planner();
        for goal in planner.goals_mut().iter_mut().filter(|goal| goal.is_core()) {
            let evaluation = self.evaluators.evaluate(goal);
            let met = apply_evaluation(goal, Some(&evaluation), threshold);
            self.events.record(
                EventKind::GoalCheck,
                ACTOR,
                step,
                &self.trace_id,
                None,
                json!({
                    "goal_id": goal.id,
                    "achieved": evaluation.achieved,
                    "confidence": evaluation.confidence,
                    "evidence": evaluation.evidence,
                    "blockers": evaluation.blockers,
                }),
            );
            if met {
                self.events.record(
                    EventKind::GoalAchieved,
                    ACTOR,
                    step,
                    &self.trace_id,
                    None,
                    json!({"goal_id": goal.id, "confidence": evaluation.confidence}),
                );
            }
        }
        self.goal_store.save(planner.goals())?;
        Ok(core_goals_met(planner.goals(), threshold))
    }

    fn refresh_context(&self, step: u64) {
        let new_feedback = if self.feedback.has_new_feedback() {
            self.feedback.consume(step).unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "failed to consume user feedback");
                Vec::new()
            })
        } else {
            Vec::new()
        };
        let summary = self.notes.concise_summary(DEFAULT_SUMMARY_ITEMS);
        self.planner().refresh_context(step, new_feedback, summary);
    }

    fn tend_jobs(&self) {
        if let Err(err) = self.jobs.process_queue() {
            warn!(err = %format!("{err:#}"), "failed to start queued jobs");
        }
        match self.jobs.poll() {
            Ok(finished) => {
                for job in &finished {
                    info!(job_id = %job.job_id, status = ?job.status, "job finished");
                }
            }
            Err(err) => warn!(err = %format!("{err:#}"), "failed to poll jobs"),
        }
    }

    /// Start ready work within `budget` steps and wait for it; returns the
    /// ids that were attempted.
    fn dispatch(&self, budget: u64) -> Result<Vec<String>> {
        let parallel = self.config.max_parallel_tasks.max(1);
        if parallel == 1 {
            let next = self.planner().next_decision(&self.steps)?;
            let Some(decision) = next else {
                return Ok(Vec::new());
            };
            let id = decision.task.id.clone();
            self.attempt(decision)?;
            return Ok(vec![id]);
        }

        let limit = parallel.min(usize::try_from(budget).unwrap_or(usize::MAX));
        let decisions = self
            .planner()
            .next_batch(limit, &self.active, &self.steps)?;
        if decisions.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = decisions.iter().map(|d| d.task.id.clone()).collect();
        info!(count = ids.len(), "dispatching batch");
        let results = WorkerPool::new(parallel).run(decisions, |decision| {
            let id = decision.task.id.clone();
            let result = self.attempt(decision);
            self.active.release(&id);
            result
        });
        for result in results {
            result?;
        }
        Ok(ids)
    }

    /// Actor, Critic and planner write-back for one attempt, then
    /// remediation when the task failed for good.
    #[instrument(skip_all, fields(task_id = %decision.task.id, step = decision.step))]
    fn attempt(&self, decision: PlanDecision) -> Result<()> {
        let handle = self.handle();
        let actor = Actor::new(
            handle,
            self.checks,
            &self.config.agent.model,
            self.config.subagent_max_turns,
            &self.workspace_dir,
        )
        .with_jobs(
            &self.jobs,
            Duration::from_secs(self.config.job_poll_interval_secs),
        );
        let outcome = actor.execute(&decision);

        let reviewer = Reviewer::new(
            handle,
            self.config.reviewer_model(),
            &self.config.agent.short_review_model,
        );
        let gate = ProductionGate::new(
            &self.paths.project_root,
            &self.config,
            Some(self.workspace_dir.clone()),
        );
        let critic = Critic::new(
            reviewer,
            gate,
            self.config.critic.auto_pass_on_reviewer_timeout,
        );
        let verdict = critic.evaluate(&decision, &outcome);

        let replan = self.planner().apply_outcome(&decision, &outcome, &verdict)?;
        if let Some(request) = replan {
            let drafts = Replanner::new(handle, &self.config.agent.model).propose(
                &request.task,
                request.review.as_ref(),
                &request.tests,
                self.steps.next(),
            );
            let added = self.planner().merge_remediation(&request, drafts)?;
            if !added.is_empty() {
                info!(tasks = ?added, "added remediation tasks");
            }
        }
        Ok(())
    }

    /// Ask for tasks that close the gap to unmet `CORE` goals.
    fn analyze_gaps(&mut self) -> Result<()> {
        self.gap_attempts += 1;
        let step = self.steps.next();
        let threshold = self.config.completion_confidence;
        let drafts = {
            let planner = self.planner();
            let unmet = unmet_core_goals(planner.goals(), threshold);
            GapAnalyzer::new(self.handle(), &self.config.agent.model).analyze(
                &unmet,
                planner.graph(),
                step,
            )
        };
        let added = self.planner().add_gap_tasks(drafts, step)?;
        info!(
            attempt = self.gap_attempts,
            added = added.len(),
            "gap analysis finished"
        );
        Ok(())
    }

    fn save_checkpoint(&self, step: u64, current_task_id: Option<String>) {
        let data = self.planner().checkpoint(step, current_task_id);
        match self.checkpoints.save(&data) {
            Ok(path) => self.events.record(
                EventKind::Checkpoint,
                ACTOR,
                step,
                &self.trace_id,
                None,
                json!({"action": "save", "step": step, "path": path.display().to_string()}),
            ),
            Err(err) => warn!(err = %format!("{err:#}"), step, "failed to save checkpoint"),
        }
    }

    fn finish(&self, reason: RunOutcome, last_task: Option<String>) -> Result<RunSummary> {
        let step = self.steps.current();
        self.events.record(
            EventKind::Checkpoint,
            ACTOR,
            step,
            &self.trace_id,
            None,
            json!({"action": "end", "reason": reason.as_str(), "step": step}),
        );
        self.save_checkpoint(step, last_task);
        let mut planner = self.planner();
        planner.flush_docs();
        planner.save()?;

        let graph = planner.graph();
        let summary = RunSummary {
            reason,
            steps: step,
            completed: graph.count(TaskStatus::Complete),
            failed: graph.count(TaskStatus::Failed),
            backlog: graph.count(TaskStatus::Backlog),
        };
        info!(
            reason = %summary.reason,
            steps = summary.steps,
            completed = summary.completed,
            failed = summary.failed,
            "run finished"
        );
        Ok(summary)
    }
}
