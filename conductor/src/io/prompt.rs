//! Prompt rendering for every agent role.
//!
//! Templates live in `prompts/` and are rendered with minijinja. The actor's
//! workspace context is split into marked sections so it can be trimmed to a
//! byte budget, dropping the least critical sections first.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::contracts::{PlanContext, ReviewFeedback};
use crate::core::feedback::UserFeedback;
use crate::core::types::{CheckKind, CheckResult, Goal, Task};

const ACTOR_TEMPLATE: &str = include_str!("prompts/actor.md");
const ACTOR_CONTEXT_TEMPLATE: &str = include_str!("prompts/actor_context.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const REPLANNER_TEMPLATE: &str = include_str!("prompts/replanner.md");
const REPLANNER_CONTEXT_TEMPLATE: &str = include_str!("prompts/replanner_context.md");
const GAP_ANALYZER_TEMPLATE: &str = include_str!("prompts/gap_analyzer.md");

/// Default byte budget for the actor's workspace context.
pub const CONTEXT_BUDGET_BYTES: usize = 16_000;
const HISTORY_ITEMS: usize = 3;
const RECENT_FEEDBACK_ITEMS: usize = 5;
const USER_FEEDBACK_ITEMS: usize = 5;

/// Drop order when the actor context exceeds its budget.
const DROP_ORDER: [&str; 4] = ["domain", "feedback", "reviews", "history"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section regex should be valid")
});

fn engine() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("actor", ACTOR_TEMPLATE)?;
    env.add_template("actor_context", ACTOR_CONTEXT_TEMPLATE)?;
    env.add_template("reviewer", REVIEWER_TEMPLATE)?;
    env.add_template("replanner", REPLANNER_TEMPLATE)?;
    env.add_template("replanner_context", REPLANNER_CONTEXT_TEMPLATE)?;
    env.add_template("gap_analyzer", GAP_ANALYZER_TEMPLATE)?;
    Ok(env)
}

#[derive(Debug, Serialize)]
struct CheckView {
    kind: String,
    target: String,
    expected: Option<String>,
    description: String,
}

#[derive(Debug, Serialize)]
struct TaskView {
    id: String,
    title: String,
    description: String,
    status: String,
    attempt: u32,
    max_attempts: u32,
    checks: Vec<CheckView>,
    history: Vec<String>,
}

impl TaskView {
    fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status.to_string(),
            attempt: task.attempt_count,
            max_attempts: task.max_attempts,
            checks: task
                .acceptance_criteria
                .iter()
                .map(|check| CheckView {
                    kind: check.kind.to_string(),
                    target: check.target.clone(),
                    expected: check.expected.clone(),
                    description: if check.description.is_empty() {
                        check.target.clone()
                    } else {
                        check.description.clone()
                    },
                })
                .collect(),
            history: last_items(&task.summary, HISTORY_ITEMS),
        }
    }
}

#[derive(Debug, Serialize)]
struct TestView {
    description: String,
    passed: bool,
    message: String,
    stdout: Option<String>,
    stderr: Option<String>,
}

impl From<&CheckResult> for TestView {
    fn from(result: &CheckResult) -> Self {
        Self {
            description: if result.check.description.is_empty() {
                result.check.target.clone()
            } else {
                result.check.description.clone()
            },
            passed: result.passed,
            message: result.message.clone(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
        }
    }
}

fn last_items(items: &[String], count: usize) -> Vec<String> {
    items[items.len().saturating_sub(count)..].to_vec()
}

/// Files the actor must produce, derived from its acceptance checks.
fn deliverables(task: &Task) -> Vec<String> {
    task.acceptance_criteria
        .iter()
        .filter_map(|check| match check.kind {
            CheckKind::FileExists => Some(format!("Create file `{}`", check.target)),
            CheckKind::PatternInFile => Some(format!(
                "File `{}` must contain text matching `{}`",
                check.target,
                check.expected.as_deref().unwrap_or(&check.description)
            )),
            _ => None,
        })
        .collect()
}

/// Implementation instructions for one actor attempt.
pub fn actor_instruction(task: &Task, plan: &PlanContext, workspace_dir: &str) -> Result<String> {
    let env = engine()?;
    let feedback: Vec<_> = plan
        .user_feedback
        .iter()
        .skip(plan.user_feedback.len().saturating_sub(USER_FEEDBACK_ITEMS))
        .map(|entry| {
            context! {
                scope => entry.task_id.as_deref().unwrap_or("general"),
                text => entry.text.as_str(),
            }
        })
        .collect();
    let rendered = env.get_template("actor")?.render(context! {
        task => TaskView::from_task(task),
        deliverables => deliverables(task),
        feedback => feedback,
        surgical => plan.surgical_mode,
        surgical_paths => plan.surgical_paths,
        workspace_dir => workspace_dir,
    })?;
    Ok(rendered)
}

fn goal_state(goal: &Goal) -> String {
    if goal.achieved {
        "ACHIEVED".to_string()
    } else {
        format!("PENDING ({:.2})", goal.confidence)
    }
}

/// Workspace snapshot appended to the actor prompt, trimmed to `budget` bytes.
pub fn actor_context(task: &Task, plan: &PlanContext, budget: usize) -> Result<String> {
    let env = engine()?;
    let goals: Vec<_> = plan
        .goals
        .iter()
        .map(|goal| {
            context! {
                description => goal.description.as_str(),
                state => goal_state(goal),
            }
        })
        .collect();
    let mut reviews = last_items(&task.review_feedback, HISTORY_ITEMS);
    reviews.extend(last_items(&task.critic_feedback, HISTORY_ITEMS));
    let recent: Vec<String> = plan
        .recent_feedback
        .iter()
        .skip(plan.recent_feedback.len().saturating_sub(RECENT_FEEDBACK_ITEMS))
        .map(|record| {
            format!(
                "{} attempt {}: {} - {}",
                record.task_id,
                record.attempt,
                record.review_status.map_or("NONE", |status| status.as_str()),
                record
                    .review_summary
                    .as_deref()
                    .unwrap_or(record.critic_summary.as_str())
            )
        })
        .collect();
    let rendered = env.get_template("actor_context")?.render(context! {
        goals => goals,
        notes => plan.notes_summary.as_str(),
        next_action => task.next_action.as_deref(),
        history => last_items(&task.summary, HISTORY_ITEMS),
        reviews => reviews,
        recent => recent,
        domain => plan.domain.as_deref(),
    })?;
    let mut sections = parse_sections(&rendered);
    apply_budget(&mut sections, budget);
    Ok(render_sections(&sections))
}

/// Inputs for a reviewer prompt.
#[derive(Debug, Clone)]
pub struct ReviewPromptInputs<'a> {
    pub task: &'a Task,
    pub tests: &'a [CheckResult],
    pub notes_summary: &'a str,
    pub user_feedback: Vec<&'a UserFeedback>,
    pub domain: Option<&'a str>,
    pub short_mode: bool,
    pub retry_count: u32,
}

fn domain_focus(domain: Option<&str>) -> &'static str {
    match domain.map(str::to_ascii_lowercase).as_deref() {
        Some("data_science") => {
            "- Verify experiments were logged with metrics and reference the latest run.\n\
             - Threshold or calibration changes must be documented next to evaluation metrics."
        }
        Some("backend") => {
            "- Check API contracts, environment configuration and migration steps.\n\
             - Call out performance or security concerns."
        }
        Some("frontend") => "- Confirm build and test commands are updated and note UX impacts.",
        _ => {
            "- Call out risks or follow-ups before marking complete.\n\
             - CHANGELOG.md is maintained by the orchestrator and must not be edited by hand."
        }
    }
}

pub fn reviewer_instruction(input: &ReviewPromptInputs<'_>) -> Result<String> {
    let env = engine()?;
    let tests: Vec<TestView> = input.tests.iter().map(TestView::from).collect();
    let failures: Vec<TestView> = input
        .tests
        .iter()
        .filter(|result| !result.passed)
        .map(TestView::from)
        .collect();
    let passed = input.tests.iter().filter(|result| result.passed).count();
    let task_feedback: Vec<&str> = input
        .user_feedback
        .iter()
        .filter(|entry| entry.task_id.as_deref() == Some(input.task.id.as_str()))
        .map(|entry| entry.text.as_str())
        .collect();
    let general_feedback: Vec<&str> = input
        .user_feedback
        .iter()
        .filter(|entry| entry.is_general())
        .map(|entry| entry.text.as_str())
        .collect();
    let notes = if input.notes_summary.trim().is_empty() {
        "No operator notes."
    } else {
        input.notes_summary.trim()
    };
    let rendered = env.get_template("reviewer")?.render(context! {
        task => TaskView::from_task(input.task),
        notes => notes,
        task_feedback => task_feedback,
        general_feedback => general_feedback,
        domain_focus => domain_focus(input.domain),
        tests => tests,
        tests_passed => passed,
        failures => failures,
        short_mode => input.short_mode,
        retry_count => input.retry_count,
    })?;
    Ok(rendered)
}

/// Replanner instruction and context for a permanently failed task.
pub fn replanner_prompt(
    failed: &Task,
    review: Option<&ReviewFeedback>,
    tests: &[CheckResult],
    max_tasks: usize,
) -> Result<(String, String)> {
    let env = engine()?;
    let task = TaskView::from_task(failed);
    let instruction = env.get_template("replanner")?.render(context! {
        task => &task,
        review_summary => review.map_or("No review available.", |r| r.summary.as_str()),
        review_status => review.map_or("NONE", |r| r.status.as_str()),
        failed_tests => tests.iter().filter(|result| !result.passed).count(),
        total_tests => tests.len(),
        max_tasks => max_tasks,
    })?;
    let tests: Vec<TestView> = tests.iter().map(TestView::from).collect();
    let context = env
        .get_template("replanner_context")?
        .render(context! { task => &task, tests => tests })?;
    Ok((instruction, context))
}

/// Gap-analysis instruction listing unmet goals and recent task outcomes.
pub fn gap_analyzer_instruction(
    unmet: &[&Goal],
    completed: &[&Task],
    failed: &[&Task],
    max_tasks: usize,
) -> Result<String> {
    let env = engine()?;
    let goals: Vec<_> = unmet
        .iter()
        .map(|goal| {
            context! {
                id => goal.id.as_str(),
                description => goal.description.as_str(),
                criteria => (!goal.measurable_criteria.trim().is_empty())
                    .then(|| goal.measurable_criteria.trim()),
            }
        })
        .collect();
    let titles = |tasks: &[&Task]| -> Vec<String> {
        tasks
            .iter()
            .map(|task| format!("{}: {}", task.id, task.title))
            .collect()
    };
    let rendered = env.get_template("gap_analyzer")?.render(context! {
        goals => goals,
        completed => titles(completed),
        failed => titles(failed),
        max_tasks => max_tasks,
    })?;
    Ok(rendered)
}

/// A marked section of rendered template output.
#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Split on `<!-- section:KEY required|droppable -->` markers.
///
/// Empty droppable sections are discarded.
fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (idx, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|section| section.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`], then truncate the last section.
fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections
            .iter()
            .position(|section| section.key == key && !section.required)
        {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped context section for budget"
            );
            sections.remove(idx);
        }
    }
    if total_len(sections) <= budget {
        return;
    }
    let other: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|section| section.content.len())
        .sum();
    let allowed = budget.saturating_sub(other);
    if let Some(last) = sections.last_mut() {
        let marker = "\n[truncated]";
        let mut cut = allowed.saturating_sub(marker.len());
        while !last.content.is_char_boundary(cut) {
            cut -= 1;
        }
        last.content.truncate(cut);
        if allowed > marker.len() {
            last.content.push_str(marker);
        }
    }
}

fn render_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|section| section.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
