//! Actor: one attempt of a task.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::contracts::{ActorOutcome, ActorStatus, PlanDecision};
use crate::core::types::AgentResult;
use crate::io::jobs::JobManager;
use crate::io::prompt::{CONTEXT_BUDGET_BYTES, actor_context, actor_instruction};
use crate::io::verify::CheckRunner;

use super::AgentHandle;

pub struct Actor<'a> {
    handle: AgentHandle<'a>,
    checks: &'a dyn CheckRunner,
    jobs: Option<&'a JobManager>,
    model: String,
    max_turns: u32,
    /// Workspace directory name the agent must not write into.
    workspace_dir: String,
    job_poll_interval: Duration,
}

impl<'a> Actor<'a> {
    pub fn new(
        handle: AgentHandle<'a>,
        checks: &'a dyn CheckRunner,
        model: impl Into<String>,
        max_turns: u32,
        workspace_dir: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            checks,
            jobs: None,
            model: model.into(),
            max_turns,
            workspace_dir: workspace_dir.into(),
            job_poll_interval: Duration::from_secs(30),
        }
    }

    /// Wait for long-running jobs of the task before acceptance checks run.
    pub fn with_jobs(mut self, jobs: &'a JobManager, poll_interval: Duration) -> Self {
        self.jobs = Some(jobs);
        self.job_poll_interval = poll_interval;
        self
    }

    /// Run the agent, then (only on agent success) the acceptance checks.
    ///
    /// The outcome status reflects the agent call alone; check results are
    /// reported separately in `tests`.
    #[instrument(skip_all, fields(task_id = %decision.task.id, step = decision.step, attempt = decision.attempt))]
    pub fn execute(&self, decision: &PlanDecision) -> ActorOutcome {
        let task = &decision.task;
        info!("executing task");
        let prompt = actor_instruction(task, &decision.context, &self.workspace_dir).and_then(
            |instruction| {
                actor_context(task, &decision.context, CONTEXT_BUDGET_BYTES)
                    .map(|context| (instruction, context))
            },
        );
        let (instruction, context) = match prompt {
            Ok(parts) => parts,
            Err(err) => {
                let error = format!("Failed to render actor prompt: {err:#}");
                return ActorOutcome {
                    status: ActorStatus::Error,
                    agent: AgentResult::failed(error.clone()),
                    tests: Vec::new(),
                    error: Some(error),
                };
            }
        };

        let request = self.handle.request(
            format!("actor-{}-step-{}", task.id, decision.step),
            instruction,
            context,
            self.max_turns,
            &self.model,
        );
        let agent = self.handle.invoke("actor", decision.step, &request);
        if !agent.is_success() {
            let error = agent.error_summary();
            warn!(error = %error, "agent did not succeed");
            return ActorOutcome {
                status: ActorStatus::Error,
                agent,
                tests: Vec::new(),
                error: Some(error),
            };
        }

        if let Some(jobs) = self.jobs
            && let Err(err) = jobs.wait_for_task_jobs(&task.id, self.job_poll_interval)
        {
            warn!(err = %format!("{err:#}"), "waiting for task jobs failed");
        }

        let tests = self
            .checks
            .run_all(&task.acceptance_criteria, self.handle.root);
        for result in &tests {
            info!(
                passed = result.passed,
                check = %result.check.description,
                message = %result.message,
                "acceptance check"
            );
        }
        ActorOutcome {
            status: ActorStatus::Success,
            agent,
            tests,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contracts::PlanContext;
    use crate::core::types::{CheckKind, VerificationCheck};
    use crate::io::events::EventLog;
    use crate::test_support::{FakeVerifier, ScriptedAgent, task};

    fn decision(checks: Vec<VerificationCheck>) -> PlanDecision {
        let mut t = task("task-1");
        t.acceptance_criteria = checks;
        t.attempt_count = 1;
        PlanDecision {
            task: t,
            step: 3,
            attempt: 1,
            context: PlanContext::default(),
            replan_depth: 0,
        }
    }

    #[test]
    fn failed_agent_skips_checks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let events = EventLog::open(temp.path().join("events.jsonl")).expect("events");
        let agent = ScriptedAgent::new().push("actor", AgentResult::failed("compile error"));
        let verifier = FakeVerifier::passing();
        let handle = AgentHandle {
            agent: &agent,
            events: &events,
            trace_id: "orch-1",
            root: temp.path(),
            timeout: Duration::from_secs(5),
        };
        let actor = Actor::new(handle, &verifier, "sonnet", 10, ".orchestrator");
        let outcome = actor.execute(&decision(vec![VerificationCheck::new(
            CheckKind::FileExists,
            "out.txt",
            "",
        )]));
        assert_eq!(outcome.status, ActorStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("compile error"));
        assert!(outcome.tests.is_empty());
        assert_eq!(verifier.runs(), 0);
    }

    #[test]
    fn successful_agent_runs_checks_and_logs_events() {
        let temp = tempfile::tempdir().expect("tempdir");
        let events = EventLog::open(temp.path().join("events.jsonl")).expect("events");
        let agent = ScriptedAgent::new();
        let verifier = FakeVerifier::passing().script("out.txt", &[false]);
        let handle = AgentHandle {
            agent: &agent,
            events: &events,
            trace_id: "orch-1",
            root: temp.path(),
            timeout: Duration::from_secs(5),
        };
        let actor = Actor::new(handle, &verifier, "sonnet", 10, ".orchestrator");
        let outcome = actor.execute(&decision(vec![
            VerificationCheck::new(CheckKind::FileExists, "out.txt", ""),
            VerificationCheck::new(CheckKind::CommandPasses, "true", ""),
        ]));
        assert!(outcome.is_success());
        assert_eq!(outcome.tests.len(), 2);
        assert!(!outcome.all_tests_passed());

        let requests = agent.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].label, "actor-task-1-step-3");
        assert!(requests[0].instruction.contains("task-1"));

        let spawned = events
            .query(&crate::io::events::EventFilter::kind(crate::io::events::EventKind::Spawn))
            .expect("query");
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].parent_trace_id.as_deref(), Some("orch-1"));
    }
}
