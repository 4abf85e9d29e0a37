//! Versioned JSON stores for tasks and goals.
//!
//! `tasks.json` and `goals.json` are the source of truth. `TASKS.md` is a
//! rendering regenerated on every task save and never read back.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::graph::TaskGraph;
use crate::core::types::{Goal, Task, TaskStatus};

pub const STORE_VERSION: u32 = 1;

/// Generate an id like `task-1a2b3c4d`.
pub fn new_id(prefix: &str) -> String {
    let value: u32 = rand::thread_rng().r#gen();
    format!("{prefix}-{value:08x}")
}

/// Atomically write text to disk (temp file + rename).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Serialize `value` to pretty-printed JSON with trailing newline, atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskFile {
    version: u32,
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GoalFile {
    version: u32,
    #[serde(default)]
    goals: Vec<Goal>,
}

/// File-backed task graph persistence.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
    markdown_path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let markdown_path = path.with_file_name("TASKS.md");
        Self {
            path,
            markdown_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the graph; a missing file is an empty graph.
    pub fn load(&self) -> Result<TaskGraph> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "task store missing, starting empty");
            return Ok(TaskGraph::new());
        }
        let file: TaskFile = read_json(&self.path)?;
        if file.version != STORE_VERSION {
            bail!(
                "unsupported task store version {} in {} (expected {STORE_VERSION})",
                file.version,
                self.path.display()
            );
        }
        TaskGraph::from_tasks(file.tasks)
            .map_err(|err| anyhow!("invalid task store {}: {err}", self.path.display()))
    }

    pub fn save(&self, graph: &TaskGraph) -> Result<()> {
        let file = TaskFile {
            version: STORE_VERSION,
            tasks: graph.tasks().to_vec(),
        };
        write_json_atomic(&self.path, &file)?;
        write_atomic(&self.markdown_path, &render_tasks_markdown(graph))
    }
}

/// File-backed goal persistence.
#[derive(Debug, Clone)]
pub struct GoalStore {
    path: PathBuf,
}

impl GoalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load goals. Unlike tasks, a missing goal file is a setup error.
    pub fn load(&self) -> Result<Vec<Goal>> {
        if !self.path.exists() {
            bail!("goal file not found: {}", self.path.display());
        }
        let file: GoalFile = read_json(&self.path)?;
        if file.version != STORE_VERSION {
            bail!(
                "unsupported goal store version {} in {} (expected {STORE_VERSION})",
                file.version,
                self.path.display()
            );
        }
        for goal in &file.goals {
            if goal.id.trim().is_empty() {
                bail!("goal with empty id in {}", self.path.display());
            }
            if !(0.0..=1.0).contains(&goal.confidence) {
                bail!("goal '{}' has confidence outside 0..=1", goal.id);
            }
        }
        Ok(file.goals)
    }

    pub fn save(&self, goals: &[Goal]) -> Result<()> {
        let file = GoalFile {
            version: STORE_VERSION,
            goals: goals.to_vec(),
        };
        write_json_atomic(&self.path, &file)
    }
}

/// Human-readable task board grouped by status.
pub fn render_tasks_markdown(graph: &TaskGraph) -> String {
    let mut out = String::from("# Tasks\n\nGenerated from tasks.json; edits here are overwritten.\n");
    for status in [
        TaskStatus::InProgress,
        TaskStatus::Backlog,
        TaskStatus::Complete,
        TaskStatus::Failed,
        TaskStatus::Refactor,
        TaskStatus::Obsolete,
    ] {
        let tasks: Vec<&Task> = graph
            .tasks()
            .iter()
            .filter(|task| task.status == status)
            .collect();
        if tasks.is_empty() {
            continue;
        }
        out.push_str(&format!("\n## {status}\n\n"));
        for task in tasks {
            out.push_str(&format!(
                "- **{}** {} (priority {}, attempts {}/{})\n",
                task.id, task.title, task.priority, task.attempt_count, task.max_attempts
            ));
            if !task.depends_on.is_empty() {
                out.push_str(&format!("  - depends on: {}\n", task.depends_on.join(", ")));
            }
            if let Some(next) = &task.next_action {
                out.push_str(&format!("  - next: {next}\n"));
            }
            if let Some(last) = task.summary.last() {
                out.push_str(&format!("  - last: {last}\n"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::GoalTier;
    use crate::test_support::{task, task_with_deps};

    #[test]
    fn new_id_has_prefix_and_hex_suffix() {
        let id = new_id("task");
        let suffix = id.strip_prefix("task-").expect("prefix");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    /// Loading the same store twice yields equal graphs.
    #[test]
    fn task_store_round_trip_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(temp.path().join("current/tasks.json"));
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).expect("add");
        graph.add_task(task_with_deps("b", &["a"])).expect("add");
        store.save(&graph).expect("save");

        let first = store.load().expect("load");
        let second = store.load().expect("load");
        assert_eq!(first, second);
        assert_eq!(first, graph);
        assert!(temp.path().join("current/TASKS.md").is_file());
    }

    #[test]
    fn task_store_rejects_unknown_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        fs::write(&path, r#"{"version": 2, "tasks": []}"#).expect("write");
        let err = TaskStore::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("unsupported task store version 2"));
    }

    #[test]
    fn missing_task_store_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let graph = TaskStore::new(temp.path().join("tasks.json"))
            .load()
            .expect("load");
        assert!(graph.is_empty());
    }

    #[test]
    fn goal_store_requires_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = GoalStore::new(temp.path().join("goals.json"));
        assert!(store.load().is_err());

        let goals = vec![Goal::new("goal-1", "ship it", GoalTier::Core)];
        store.save(&goals).expect("save");
        assert_eq!(store.load().expect("load"), goals);
    }

    #[test]
    fn markdown_groups_by_status() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).expect("add");
        let mut done = task("b");
        done.status = TaskStatus::Complete;
        graph.add_task(done).expect("add");
        let rendered = render_tasks_markdown(&graph);
        let backlog = rendered.find("## BACKLOG").expect("backlog");
        let complete = rendered.find("## COMPLETE").expect("complete");
        assert!(backlog < complete);
    }
}
