//! Batched documentation side-effects: task history and changelog.
//!
//! The planner enqueues records as attempts resolve; nothing touches disk until
//! [`DocsQueue::flush`], which the orchestrator calls on a step interval and at
//! run end.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::contracts::{CriticVerdict, TestSummary};
use crate::core::types::{CheckResult, Task, TaskStatus, clip_chars};
use crate::io::store::write_atomic;

const UNRELEASED_HEADER: &str = "## [Unreleased]";
const REVIEW_SNIPPET_CHARS: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Changed,
    Fixed,
    Removed,
}

impl ChangeType {
    /// Classify a completed task by keywords in its title.
    pub fn classify(title: &str) -> Self {
        let title = title.to_lowercase();
        if title.contains("fix") || title.contains("bug") {
            ChangeType::Fixed
        } else if ["add", "implement", "create"]
            .iter()
            .any(|word| title.contains(word))
        {
            ChangeType::Added
        } else if title.contains("remove") || title.contains("delete") {
            ChangeType::Removed
        } else {
            ChangeType::Changed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Added => "Added",
            ChangeType::Changed => "Changed",
            ChangeType::Fixed => "Fixed",
            ChangeType::Removed => "Removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub change: ChangeType,
    pub description: String,
    pub task_id: String,
}

impl ChangelogEntry {
    pub fn for_completed(task: &Task, review_summary: &str) -> Self {
        let review = review_summary.trim();
        let description = if review.is_empty() {
            task.title.clone()
        } else if review.chars().count() > REVIEW_SNIPPET_CHARS {
            format!(
                "{}: {}...",
                task.title,
                clip_chars(review, REVIEW_SNIPPET_CHARS - 3).trim_end()
            )
        } else {
            format!("{}: {review}", task.title)
        };
        Self {
            change: ChangeType::classify(&task.title),
            description,
            task_id: task.id.clone(),
        }
    }
}

/// One line of `history/task_history.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistoryRecord {
    pub timestamp: String,
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub review_summary: String,
    pub critic_summary: String,
    pub tests: Vec<TestSummary>,
}

impl TaskHistoryRecord {
    pub fn from_attempt(task: &Task, verdict: &CriticVerdict, tests: &[CheckResult]) -> Self {
        let review_summary = verdict
            .review
            .as_ref()
            .map_or_else(|| verdict.summary.clone(), |review| review.summary.clone());
        let critic_summary = if verdict.critic_summary.is_empty() {
            verdict.summary.clone()
        } else {
            verdict.critic_summary.clone()
        };
        Self {
            timestamp: Utc::now().to_rfc3339(),
            task_id: task.id.clone(),
            title: task.title.clone(),
            status: task.status,
            attempts: task.attempt_count,
            review_summary,
            critic_summary,
            tests: tests.iter().map(TestSummary::from).collect(),
        }
    }
}

#[derive(Debug)]
pub struct DocsQueue {
    history_path: PathBuf,
    changelog_path: PathBuf,
    history: Vec<TaskHistoryRecord>,
    changelog: Vec<ChangelogEntry>,
}

impl DocsQueue {
    pub fn new(history_path: impl Into<PathBuf>, changelog_path: impl Into<PathBuf>) -> Self {
        Self {
            history_path: history_path.into(),
            changelog_path: changelog_path.into(),
            history: Vec::new(),
            changelog: Vec::new(),
        }
    }

    pub fn enqueue_history(&mut self, record: TaskHistoryRecord) {
        self.history.push(record);
    }

    pub fn enqueue_changelog(&mut self, entry: ChangelogEntry) {
        self.changelog.push(entry);
    }

    pub fn pending(&self) -> usize {
        self.history.len() + self.changelog.len()
    }

    /// Write everything queued so far. Returns the number of records written.
    ///
    /// The queue is only cleared for the parts that were written successfully.
    pub fn flush(&mut self) -> Result<usize> {
        let mut written = 0;
        if !self.history.is_empty() {
            self.append_history()?;
            written += self.history.len();
            self.history.clear();
        }
        if !self.changelog.is_empty() {
            self.write_changelog()?;
            written += self.changelog.len();
            self.changelog.clear();
        }
        if written > 0 {
            debug!(written, "flushed documentation queue");
        }
        Ok(written)
    }

    fn append_history(&self) -> Result<()> {
        if let Some(parent) = self.history_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut buf = String::new();
        for record in &self.history {
            buf.push_str(&serde_json::to_string(record).context("serialize task history")?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .with_context(|| format!("open {}", self.history_path.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("append {}", self.history_path.display()))
    }

    fn write_changelog(&self) -> Result<()> {
        let existing = match fs::read_to_string(&self.changelog_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => changelog_template(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read {}", self.changelog_path.display()));
            }
        };
        let updated = insert_unreleased(&existing, &render_entries(&self.changelog));
        write_atomic(&self.changelog_path, &updated)
    }
}

fn changelog_template() -> String {
    format!(
        "# Changelog\n\nAll notable changes made by orchestrated tasks.\n\n{UNRELEASED_HEADER}\n"
    )
}

/// Group entries under `### <Type>` headings in a fixed order.
fn render_entries(entries: &[ChangelogEntry]) -> String {
    let mut out = format!("<!-- {} -->\n", Local::now().format("%Y-%m-%d %H:%M"));
    for change in [
        ChangeType::Added,
        ChangeType::Changed,
        ChangeType::Fixed,
        ChangeType::Removed,
    ] {
        let lines: Vec<String> = entries
            .iter()
            .filter(|entry| entry.change == change)
            .map(|entry| format!("- {} ({})", entry.description, entry.task_id))
            .collect();
        if lines.is_empty() {
            continue;
        }
        out.push_str(&format!("\n### {}\n{}\n", change.as_str(), lines.join("\n")));
    }
    out
}

fn insert_unreleased(existing: &str, block: &str) -> String {
    match existing.find(UNRELEASED_HEADER) {
        Some(pos) => {
            let split = pos + UNRELEASED_HEADER.len();
            format!("{}\n\n{}{}", &existing[..split], block, &existing[split..])
        }
        None => format!("{}\n\n{UNRELEASED_HEADER}\n\n{block}", existing.trim_end()),
    }
}
