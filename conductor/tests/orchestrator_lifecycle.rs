//! Loop-level tests for full orchestrator runs.
//!
//! These drive `Orchestrator::run` against a scripted agent, scripted checks
//! and a fixed goal evaluator to verify end-to-end behavior: dependency
//! ordering under retries, reviewer timeouts, remediation, gap-analysis
//! exhaustion and parallel dispatch.

use conductor::agents::critic::AUTO_PASS_SUMMARY;
use conductor::core::completion::GoalEvaluation;
use conductor::core::types::{AgentResult, TaskStatus};
use conductor::evaluators::EvaluatorRegistry;
use conductor::io::config::OrchestratorConfig;
use conductor::io::events::{Event, EventFilter, EventKind};
use conductor::orchestrator::{Orchestrator, RunOutcome, RunSummary};
use conductor::test_support::{
    FakeVerifier, ScriptedAgent, StaticEvaluator, TestWorkspace, core_goal, review_output, task,
    task_with_check, task_with_deps,
};

struct Run {
    summary: RunSummary,
    events: Vec<Event>,
    active_after: usize,
}

fn run(
    ws: &TestWorkspace,
    agent: &ScriptedAgent,
    checks: &FakeVerifier,
    evaluation: GoalEvaluation,
    configure: impl FnOnce(&mut OrchestratorConfig),
) -> Run {
    let mut config = OrchestratorConfig {
        min_steps: 0,
        ..OrchestratorConfig::default()
    };
    configure(&mut config);
    let evaluators =
        EvaluatorRegistry::with_evaluators(ws.root(), vec![Box::new(StaticEvaluator::new(evaluation))]);
    let mut orchestrator = Orchestrator::new(ws.paths.clone(), config, agent, checks, evaluators)
        .expect("orchestrator");
    let summary = orchestrator.run().expect("run");
    let events = orchestrator
        .events()
        .query(&EventFilter::default())
        .expect("query events");
    Run {
        summary,
        events,
        active_after: orchestrator.active_tasks().len(),
    }
}

fn decided_tasks(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter(|event| event.event == EventKind::Decision)
        .map(|event| event.payload["task_id"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn unmet() -> GoalEvaluation {
    GoalEvaluation::unmet(0.8, "not yet")
}

/// A→B→C where A's acceptance check fails twice before passing.
///
/// B is selected only after A completes, on the very next step.
#[test]
fn chain_waits_for_retried_dependency() {
    let ws = TestWorkspace::new()
        .with_tasks(vec![
            task_with_check("a", "a.txt"),
            task_with_deps("b", &["a"]),
            task_with_deps("c", &["b"]),
        ])
        .with_goals(vec![core_goal("goal-1", "ship the chain")]);
    let agent = ScriptedAgent::new().fallback("review", review_output("PASS", "Looks good."));
    let checks = FakeVerifier::passing().script("a.txt", &[false, false, true]);

    let result = run(&ws, &agent, &checks, unmet(), |config| config.max_steps = 5);

    assert_eq!(result.summary.reason, RunOutcome::MaxIterationsReached);
    assert_eq!(decided_tasks(&result.events), vec!["a", "a", "a", "b", "c"]);
    let graph = ws.tasks();
    let a = graph.get("a").expect("a");
    assert_eq!(a.status, TaskStatus::Complete);
    assert_eq!(a.attempt_count, 3);
    assert_eq!(a.test_history.len(), 3);
    for id in ["b", "c"] {
        assert_eq!(graph.get(id).map(|t| t.status), Some(TaskStatus::Complete));
    }
    // Reviews only run once the checks are green.
    assert_eq!(agent.count("review-a"), 1);
}

#[test]
fn reviewer_turn_limit_with_green_checks_auto_passes() {
    let ws = TestWorkspace::new()
        .with_tasks(vec![task_with_check("a", "out.txt")])
        .with_goals(vec![core_goal("goal-1", "produce output")]);
    let agent = ScriptedAgent::new().push(
        "review",
        AgentResult::success("Stopped early: error_max_turns"),
    );
    let checks = FakeVerifier::passing();

    let result = run(&ws, &agent, &checks, unmet(), |config| config.max_steps = 1);

    assert_eq!(result.summary.completed, 1);
    let a = ws.tasks().get("a").cloned().expect("a");
    assert_eq!(a.status, TaskStatus::Complete);
    assert!(a.summary.iter().any(|line| line.contains(AUTO_PASS_SUMMARY)));
    assert_eq!(agent.count("review"), 1);
}

#[test]
fn exhausted_task_gets_runnable_remediation() {
    let mut failing = task_with_check("a", "a.txt");
    failing.max_attempts = 1;
    let ws = TestWorkspace::new()
        .with_tasks(vec![failing])
        .with_goals(vec![core_goal("goal-1", "ship a")]);
    let proposal = "```json\n[{\"title\": \"Fix a\", \"acceptance\": \
                    [{\"type\": \"file_exists\", \"target\": \"fix.txt\"}]}]\n```";
    let agent = ScriptedAgent::new()
        .push("replan", AgentResult::success(proposal))
        .fallback("review", review_output("PASS", "Fixed."));
    let checks = FakeVerifier::passing().script("a.txt", &[false]);

    let result = run(&ws, &agent, &checks, unmet(), |config| config.max_steps = 3);

    assert_eq!(result.summary.failed, 1);
    assert_eq!(result.summary.completed, 1);
    let graph = ws.tasks();
    let fix = graph
        .tasks()
        .iter()
        .find(|task| task.title == "Fix a")
        .expect("remediation task");
    assert_eq!(fix.status, TaskStatus::Complete);
    assert_eq!(fix.depends_on, vec!["a".to_string()]);
    let replans: Vec<&Event> = result
        .events
        .iter()
        .filter(|event| event.event == EventKind::Replan)
        .collect();
    assert_eq!(replans.len(), 1);
    assert_eq!(replans[0].payload["original_task"], "a");
}

#[test]
fn empty_gap_analyses_end_with_no_tasks_available() {
    let ws = TestWorkspace::new().with_goals(vec![core_goal("goal-1", "ship everything")]);
    let agent = ScriptedAgent::new();
    let checks = FakeVerifier::passing();

    let result = run(&ws, &agent, &checks, unmet(), |config| config.max_steps = 100);

    assert_eq!(result.summary.reason, RunOutcome::NoTasksAvailable);
    assert_eq!(agent.count("gap-analysis"), 5);
    assert_eq!(result.summary.steps, 5);
}

#[test]
fn parallel_batch_completes_both_tasks() {
    let ws = TestWorkspace::new()
        .with_tasks(vec![task("a"), task("b")])
        .with_goals(vec![core_goal("goal-1", "ship both")]);
    let agent = ScriptedAgent::new().fallback("review", review_output("PASS", "ok"));
    let checks = FakeVerifier::passing();

    let result = run(&ws, &agent, &checks, unmet(), |config| {
        config.max_steps = 2;
        config.max_parallel_tasks = 2;
    });

    assert_eq!(result.active_after, 0);
    assert_eq!(result.summary.completed, 2);
    let graph = ws.tasks();
    for id in ["a", "b"] {
        assert_eq!(graph.get(id).map(|t| t.status), Some(TaskStatus::Complete));
    }
    let mut steps: Vec<u64> = result
        .events
        .iter()
        .filter(|event| event.event == EventKind::Decision)
        .map(|event| event.step)
        .collect();
    steps.sort_unstable();
    assert_eq!(steps, vec![1, 2]);
}

#[test]
fn achieved_goals_end_the_run_with_success() {
    let ws = TestWorkspace::new()
        .with_tasks(vec![task("a")])
        .with_goals(vec![core_goal("goal-1", "already done")]);
    let agent = ScriptedAgent::new();
    let checks = FakeVerifier::passing();

    let result = run(
        &ws,
        &agent,
        &checks,
        GoalEvaluation::achieved(0.95, "all green"),
        |_| {},
    );

    assert_eq!(result.summary.reason, RunOutcome::Success);
    assert_eq!(result.summary.steps, 0);
    assert_eq!(result.summary.backlog, 1);
    assert!(
        result
            .events
            .iter()
            .any(|event| event.event == EventKind::GoalAchieved)
    );
}

/// A stored BACKLOG task with no attempts left is failed on startup instead of
/// aborting the run, and the rest of the backlog still runs.
#[test]
fn spent_backlog_task_does_not_abort_the_run() {
    let mut spent = task("a");
    spent.attempt_count = 3;
    spent.max_attempts = 3;
    let ws = TestWorkspace::new()
        .with_tasks(vec![spent, task("b")])
        .with_goals(vec![core_goal("goal-1", "ship b")]);
    let agent = ScriptedAgent::new().fallback("review", review_output("PASS", "ok"));
    let checks = FakeVerifier::passing();

    let result = run(&ws, &agent, &checks, unmet(), |config| config.max_steps = 1);

    assert_eq!(decided_tasks(&result.events), vec!["b"]);
    assert_eq!(result.summary.completed, 1);
    assert_eq!(result.summary.failed, 1);
    let graph = ws.tasks();
    assert_eq!(graph.get("a").map(|t| t.status), Some(TaskStatus::Failed));
    assert_eq!(graph.get("b").map(|t| t.status), Some(TaskStatus::Complete));
}
