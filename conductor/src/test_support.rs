//! Test-only builders and scripted fakes for the agent and check seams.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use crate::core::completion::GoalEvaluation;
use crate::core::graph::TaskGraph;
use crate::core::types::{
    AgentResult, CheckKind, CheckResult, Goal, GoalTier, Task, VerificationCheck,
};
use crate::evaluators::GoalEvaluator;
use crate::io::agent::{AgentRequest, ExecutionAgent};
use crate::io::config::{OrchestratorConfig, write_config};
use crate::io::init::{InitOptions, WorkspacePaths, init_workspace};
use crate::io::verify::CheckRunner;

/// Create a deterministic backlog task with default fields.
pub fn task(id: &str) -> Task {
    Task::new(id, format!("{id} title"))
}

pub fn task_with_deps(id: &str, deps: &[&str]) -> Task {
    let mut task = task(id);
    task.depends_on = deps.iter().map(|dep| (*dep).to_string()).collect();
    task
}

/// Task with a single `file_exists` check on `target`.
pub fn task_with_check(id: &str, target: &str) -> Task {
    let mut task = task(id);
    task.acceptance_criteria = vec![VerificationCheck::new(
        CheckKind::FileExists,
        target,
        format!("{target} exists"),
    )];
    task
}

pub fn core_goal(id: &str, description: &str) -> Goal {
    Goal::new(id, description, GoalTier::Core)
}

/// Reviewer output with a fenced JSON verdict.
pub fn review_output(status: &str, summary: &str) -> AgentResult {
    AgentResult::success(format!(
        "```json\n{{\"status\": \"{status}\", \"summary\": \"{summary}\"}}\n```"
    ))
}

/// Execution agent that answers from per-label-prefix scripts.
///
/// Scripted responses are consumed in order; once a prefix runs dry its
/// fallback (or a bare success) is returned.
#[derive(Default)]
pub struct ScriptedAgent {
    scripts: Mutex<Vec<(String, VecDeque<AgentResult>)>>,
    fallbacks: Vec<(String, AgentResult)>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `result` for the next request whose label starts with `prefix`.
    pub fn push(self, prefix: &str, result: AgentResult) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            match scripts.iter_mut().find(|(p, _)| p == prefix) {
                Some((_, queue)) => queue.push_back(result),
                None => scripts.push((prefix.to_string(), VecDeque::from([result]))),
            }
        }
        self
    }

    /// Answer every unscripted request matching `prefix` with `result`.
    pub fn fallback(mut self, prefix: &str, result: AgentResult) -> Self {
        self.fallbacks.push((prefix.to_string(), result));
        self
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of requests whose label starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.label.starts_with(prefix))
            .count()
    }
}

impl ExecutionAgent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResult> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Ok(mut scripts) = self.scripts.lock() {
            let scripted = scripts
                .iter_mut()
                .filter(|(prefix, queue)| request.label.starts_with(prefix) && !queue.is_empty())
                .max_by_key(|(prefix, _)| prefix.len())
                .and_then(|(_, queue)| queue.pop_front());
            if let Some(result) = scripted {
                return Ok(result);
            }
        }
        let fallback = self
            .fallbacks
            .iter()
            .filter(|(prefix, _)| request.label.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, result)| result.clone());
        Ok(fallback.unwrap_or_else(|| AgentResult::success("")))
    }
}

/// Check runner that passes everything except scripted targets.
#[derive(Default)]
pub struct FakeVerifier {
    scripts: Mutex<BTreeMap<String, VecDeque<bool>>>,
    runs: AtomicUsize,
}

impl FakeVerifier {
    pub fn passing() -> Self {
        Self::default()
    }

    /// Results for successive runs of checks on `target`; passes once exhausted.
    pub fn script(self, target: &str, results: &[bool]) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(target.to_string())
                .or_default()
                .extend(results.iter().copied());
        }
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl CheckRunner for FakeVerifier {
    fn run_check(&self, check: &VerificationCheck, _root: &Path) -> CheckResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let passed = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(&check.target)?.pop_front())
            .unwrap_or(true);
        if passed {
            CheckResult::pass(check, format!("{} ok", check.target))
        } else {
            CheckResult::fail(check, format!("{} failed", check.target))
        }
    }
}

/// Goal evaluator that judges every goal the same way.
pub struct StaticEvaluator {
    evaluation: GoalEvaluation,
    calls: AtomicUsize,
}

impl StaticEvaluator {
    pub fn new(evaluation: GoalEvaluation) -> Self {
        Self {
            evaluation,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GoalEvaluator for StaticEvaluator {
    fn name(&self) -> &'static str {
        "static"
    }

    fn can_evaluate(&self, _goal: &Goal) -> bool {
        true
    }

    fn evaluate(&self, _goal: &Goal, _root: &Path) -> GoalEvaluation {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.evaluation.clone()
    }
}

/// Initialized workspace inside a temporary project directory.
pub struct TestWorkspace {
    // Held for cleanup on drop.
    _temp: tempfile::TempDir,
    pub paths: WorkspacePaths,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(&temp.path().join(".orchestrator"), &InitOptions { force: false })
            .expect("init workspace");
        Self { _temp: temp, paths }
    }

    pub fn root(&self) -> &Path {
        &self.paths.project_root
    }

    pub fn with_tasks(self, tasks: Vec<Task>) -> Self {
        let graph = TaskGraph::from_tasks(tasks).expect("task graph");
        self.paths.task_store().save(&graph).expect("save tasks");
        self
    }

    pub fn with_goals(self, goals: Vec<Goal>) -> Self {
        self.paths.goal_store().save(&goals).expect("save goals");
        self
    }

    pub fn with_config(self, configure: impl FnOnce(&mut OrchestratorConfig)) -> Self {
        let mut config = OrchestratorConfig::default();
        configure(&mut config);
        write_config(&self.paths.config_path, &config).expect("write config");
        self
    }

    pub fn tasks(&self) -> TaskGraph {
        self.paths.task_store().load().expect("load tasks")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
