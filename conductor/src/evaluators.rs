//! Goal evaluator registry.
//!
//! Goals are judged from project evidence (test runs, metric files, API
//! specs) rather than from task completion. The first evaluator whose
//! keywords match a goal decides it; unmatched goals are not achieved.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::completion::GoalEvaluation;
use crate::core::types::Goal;
use crate::io::process::run_command_with_timeout;
use crate::io::verify::{argv_command, compare, project_files};

const TEST_RUN_TIMEOUT: Duration = Duration::from_secs(300);
const TEST_OUTPUT_LIMIT: usize = 50_000;

static CRITERIA_THRESHOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([a-z][a-z0-9_]*)\s*(>=|<=|==|>|<)\s*([0-9]+(?:\.[0-9]+)?)")
        .expect("criteria threshold regex should be valid")
});

static PYTEST_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) (passed|failed)").expect("pytest count regex should be valid")
});

pub trait GoalEvaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_evaluate(&self, goal: &Goal) -> bool;

    fn evaluate(&self, goal: &Goal, root: &Path) -> GoalEvaluation;
}

/// True when any word of the goal text starts with one of `keywords`.
fn mentions(goal: &Goal, keywords: &[&str]) -> bool {
    let text = format!("{} {}", goal.description, goal.measurable_criteria).to_lowercase();
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .any(|word| keywords.iter().any(|kw| word.starts_with(kw)))
}

/// Judges goals about tests and CI by running the project's test suites.
#[derive(Debug, Clone)]
pub struct TestSuiteEvaluator {
    timeout: Duration,
    /// Fixed suite commands; detected from project markers when unset.
    commands: Option<Vec<Vec<String>>>,
}

impl Default for TestSuiteEvaluator {
    fn default() -> Self {
        Self {
            timeout: TEST_RUN_TIMEOUT,
            commands: None,
        }
    }
}

impl TestSuiteEvaluator {
    pub fn with_commands(commands: Vec<Vec<String>>) -> Self {
        Self {
            commands: Some(commands),
            ..Self::default()
        }
    }

    fn suites(&self, root: &Path) -> Vec<Vec<String>> {
        if let Some(commands) = &self.commands {
            return commands.clone();
        }
        let argv = |parts: &[&str]| -> Vec<String> {
            parts.iter().map(|part| (*part).to_string()).collect()
        };
        let mut suites: Vec<Vec<String>> = Vec::new();
        if root.join("Cargo.toml").is_file() {
            suites.push(argv(&["cargo", "test", "--quiet"]));
        }
        let python = ["pyproject.toml", "setup.py", "pytest.ini", "setup.cfg"]
            .iter()
            .any(|marker| root.join(marker).is_file());
        if python {
            suites.push(argv(&["pytest", "--tb=no", "-q"]));
        }
        if root.join("package.json").is_file() {
            suites.push(argv(&["npm", "test"]));
        }
        suites
    }
}

impl GoalEvaluator for TestSuiteEvaluator {
    fn name(&self) -> &'static str {
        "test_suite"
    }

    fn can_evaluate(&self, goal: &Goal) -> bool {
        mentions(goal, &["test", "ci", "validation", "coverage", "pass"])
    }

    #[instrument(skip_all, fields(goal_id = %goal.id))]
    fn evaluate(&self, goal: &Goal, root: &Path) -> GoalEvaluation {
        let mut evidence = Vec::new();
        let mut blockers = Vec::new();
        for argv in self.suites(root) {
            let label = argv.join(" ");
            let Some(cmd) = argv_command(&argv, root) else {
                continue;
            };
            let output = match run_command_with_timeout(cmd, None, self.timeout, TEST_OUTPUT_LIMIT)
            {
                Ok(output) => output,
                Err(err) => {
                    debug!(suite = %label, err = %format!("{err:#}"), "test suite unavailable");
                    continue;
                }
            };
            if output.timed_out {
                blockers.push(format!("{label} timed out after {}s", self.timeout.as_secs()));
                continue;
            }
            let counts = pytest_counts(&format!("{}{}", output.stdout_text(), output.stderr_text()));
            let detail = counts.map_or_else(String::new, |(passed, failed)| {
                format!(" ({passed} passed, {failed} failed)")
            });
            if output.success() {
                evidence.push(format!("{label}: passed{detail}"));
                return GoalEvaluation {
                    achieved: true,
                    confidence: 0.95,
                    evidence,
                    blockers: Vec::new(),
                };
            }
            evidence.push(format!("{label}: failed{detail}"));
            blockers.push(format!("{label} reports failures"));
        }

        if blockers.is_empty() {
            return GoalEvaluation {
                achieved: false,
                confidence: 0.3,
                evidence: vec!["No automated tests found".to_string()],
                blockers: vec!["Cannot verify goal without tests".to_string()],
            };
        }
        GoalEvaluation {
            achieved: false,
            confidence: 0.8,
            evidence,
            blockers,
        }
    }
}

fn pytest_counts(output: &str) -> Option<(u64, u64)> {
    let mut passed = None;
    let mut failed = 0;
    for caps in PYTEST_COUNT_RE.captures_iter(output) {
        let count: u64 = caps[1].parse().ok()?;
        match &caps[2] {
            "passed" => passed = Some(count),
            _ => failed = count,
        }
    }
    passed.map(|passed| (passed, failed))
}

/// Judges metric goals (`accuracy >= 0.9`) from the newest metrics file.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricThresholdEvaluator;

impl MetricThresholdEvaluator {
    /// Numeric top-level fields (lower-cased keys) of the newest readable
    /// `*metrics*.json` or `*results*.json` file.
    fn latest_metrics(root: &Path) -> Option<(PathBuf, Vec<(String, f64)>)> {
        let mut files: Vec<(SystemTime, PathBuf)> = project_files(root)
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().to_lowercase();
                name.ends_with(".json") && (name.contains("metrics") || name.contains("results"))
            })
            .map(|entry| {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|meta| meta.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, entry.into_path())
            })
            .collect();
        if files.is_empty() {
            return None;
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in files {
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw) else {
                continue;
            };
            let metrics: Vec<(String, f64)> = map
                .iter()
                .filter_map(|(key, value)| value.as_f64().map(|v| (key.to_lowercase(), v)))
                .collect();
            if !metrics.is_empty() {
                return Some((path, metrics));
            }
        }
        Some((PathBuf::new(), Vec::new()))
    }
}

impl GoalEvaluator for MetricThresholdEvaluator {
    fn name(&self) -> &'static str {
        "metric_threshold"
    }

    fn can_evaluate(&self, goal: &Goal) -> bool {
        mentions(
            goal,
            &["accuracy", "precision", "recall", "f1", "auc", "rmse", "mae", "r2", "metric"],
        )
    }

    #[instrument(skip_all, fields(goal_id = %goal.id))]
    fn evaluate(&self, goal: &Goal, root: &Path) -> GoalEvaluation {
        let Some((path, metrics)) = Self::latest_metrics(root) else {
            return GoalEvaluation::unmet(0.2, "No metrics files found");
        };
        if metrics.is_empty() {
            return GoalEvaluation::unmet(0.2, "Metrics files exist but are empty or invalid");
        }
        let mut evidence: Vec<String> = metrics
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        evidence.push(format!("source: {}", path.display()));

        let Some(caps) = CRITERIA_THRESHOLD_RE.captures(&goal.measurable_criteria) else {
            return GoalEvaluation {
                achieved: false,
                confidence: 0.4,
                evidence,
                blockers: vec!["No threshold specified in goal criteria".to_string()],
            };
        };
        let name = caps[1].to_lowercase();
        let op = &caps[2];
        let Ok(threshold) = caps[3].parse::<f64>() else {
            return GoalEvaluation::unmet(0.4, format!("Invalid threshold in criteria: {}", &caps[0]));
        };
        let actual = metrics
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value);
        match actual {
            Some(actual) if compare(actual, op, threshold) => {
                evidence.push(format!("{name} {actual} {op} {threshold}"));
                GoalEvaluation {
                    achieved: true,
                    confidence: 0.9,
                    evidence,
                    blockers: Vec::new(),
                }
            }
            Some(actual) => GoalEvaluation {
                achieved: false,
                confidence: 0.85,
                evidence,
                blockers: vec![format!("{name} {actual} does not satisfy {op} {threshold}")],
            },
            None => GoalEvaluation {
                achieved: false,
                confidence: 0.4,
                evidence,
                blockers: vec![format!("Metric '{name}' not reported")],
            },
        }
    }
}

/// Judges API goals by the presence of an OpenAPI or Swagger document.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiContractEvaluator;

impl GoalEvaluator for ApiContractEvaluator {
    fn name(&self) -> &'static str {
        "api_contract"
    }

    fn can_evaluate(&self, goal: &Goal) -> bool {
        mentions(goal, &["api", "endpoint", "contract", "openapi", "swagger", "rest"])
    }

    fn evaluate(&self, _goal: &Goal, root: &Path) -> GoalEvaluation {
        let spec = project_files(root).find(|entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            (name.contains("openapi") || name.contains("swagger"))
                && [".json", ".yaml", ".yml"].iter().any(|ext| name.ends_with(ext))
        });
        match spec {
            Some(entry) => GoalEvaluation::achieved(
                0.7,
                format!("Found API spec: {}", entry.file_name().to_string_lossy()),
            ),
            None => GoalEvaluation {
                achieved: false,
                confidence: 0.5,
                evidence: vec!["No API specification found".to_string()],
                blockers: vec!["Cannot verify API contract".to_string()],
            },
        }
    }
}

pub struct EvaluatorRegistry {
    root: PathBuf,
    evaluators: Vec<Box<dyn GoalEvaluator>>,
}

impl EvaluatorRegistry {
    /// Registry with the built-in evaluators, in priority order.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_evaluators(
            root,
            vec![
                Box::new(TestSuiteEvaluator::default()),
                Box::new(MetricThresholdEvaluator),
                Box::new(ApiContractEvaluator),
            ],
        )
    }

    pub fn with_evaluators(root: impl Into<PathBuf>, evaluators: Vec<Box<dyn GoalEvaluator>>) -> Self {
        Self {
            root: root.into(),
            evaluators,
        }
    }

    pub fn evaluate(&self, goal: &Goal) -> GoalEvaluation {
        let Some(evaluator) = self.evaluators.iter().find(|e| e.can_evaluate(goal)) else {
            warn!(goal_id = %goal.id, "no evaluator matched goal");
            return GoalEvaluation {
                achieved: false,
                confidence: 0.1,
                evidence: vec!["No evaluator matched this goal type".to_string()],
                blockers: vec!["Goal criteria not machine-verifiable".to_string()],
            };
        };
        debug!(goal_id = %goal.id, evaluator = evaluator.name(), "evaluating goal");
        evaluator.evaluate(goal, &self.root)
    }
}
