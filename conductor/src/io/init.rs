//! Workspace layout and `conductor init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::core::feedback::user_notes_template;
use crate::core::graph::TaskGraph;
use crate::core::types::{Goal, GoalTier};
use crate::io::config::{OrchestratorConfig, write_config};
use crate::io::notes::NOTES_TEMPLATE;
use crate::io::store::{GoalStore, TaskStore, new_id};

/// Canonical paths inside an orchestrator workspace.
///
/// The project the agent edits is the workspace's parent directory.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub workspace: PathBuf,
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub current_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub goals_path: PathBuf,
    pub notes_path: PathBuf,
    pub user_notes_path: PathBuf,
    pub feedback_state_path: PathBuf,
    pub event_log_path: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub history_dir: PathBuf,
    pub jobs_dir: PathBuf,
    pub experiments_path: PathBuf,
    pub task_history_path: PathBuf,
    pub changelog_path: PathBuf,
    pub agent_logs_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let project_root = workspace
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let current_dir = workspace.join("current");
        let history_dir = workspace.join("history");
        Self {
            project_root,
            config_path: workspace.join("config.toml"),
            tasks_path: current_dir.join("tasks.json"),
            goals_path: current_dir.join("goals.json"),
            notes_path: current_dir.join("NOTES.md"),
            user_notes_path: current_dir.join("USER_NOTES.md"),
            feedback_state_path: current_dir.join(".feedback_state.json"),
            event_log_path: workspace.join("full_history.jsonl"),
            checkpoints_dir: workspace.join("checkpoints"),
            jobs_dir: history_dir.join("jobs"),
            experiments_path: history_dir.join("experiments.jsonl"),
            task_history_path: history_dir.join("task_history.jsonl"),
            changelog_path: workspace.join("CHANGELOG.md"),
            agent_logs_dir: workspace.join("logs").join("agents"),
            current_dir,
            history_dir,
            workspace,
        }
    }

    /// Resolve relative paths against the current directory.
    pub fn absolute(workspace: &Path) -> Result<Self> {
        let workspace = if workspace.is_absolute() {
            workspace.to_path_buf()
        } else {
            std::env::current_dir()
                .context("resolve current directory")?
                .join(workspace)
        };
        Ok(Self::new(workspace))
    }

    pub fn task_store(&self) -> TaskStore {
        TaskStore::new(&self.tasks_path)
    }

    pub fn goal_store(&self) -> GoalStore {
        GoalStore::new(&self.goals_path)
    }

    /// Fail with a setup error unless the workspace and goal file exist.
    pub fn ensure_ready(&self) -> Result<()> {
        if !self.workspace.is_dir() {
            return Err(anyhow!(
                "workspace not found: {} (run `conductor init` first)",
                self.workspace.display()
            ));
        }
        if !self.goals_path.is_file() {
            return Err(anyhow!("goal file not found: {}", self.goals_path.display()));
        }
        Ok(())
    }
}

/// Options for [`init_workspace`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Overwrite existing workspace-owned files.
    pub force: bool,
}

/// Create the workspace skeleton.
///
/// Fails if the goal store already exists unless `options.force` is set.
pub fn init_workspace(workspace: &Path, options: &InitOptions) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(workspace);
    if paths.workspace.exists() && !paths.workspace.is_dir() {
        return Err(anyhow!(
            "conductor init: {} exists but is not a directory",
            paths.workspace.display()
        ));
    }
    if paths.goals_path.exists() && !options.force {
        return Err(anyhow!(
            "conductor init: {} already exists (use --force to overwrite)",
            paths.goals_path.display()
        ));
    }

    for dir in [
        &paths.current_dir,
        &paths.checkpoints_dir,
        &paths.history_dir,
        &paths.agent_logs_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    write_config(&paths.config_path, &OrchestratorConfig::default())?;
    paths.task_store().save(&TaskGraph::new())?;
    let mut starter = Goal::new(
        new_id("goal"),
        "Describe the primary outcome this run must achieve",
        GoalTier::Core,
    );
    starter.measurable_criteria = "All tests pass".to_string();
    paths.goal_store().save(&[starter])?;
    write_file(&paths.notes_path, NOTES_TEMPLATE)?;
    write_file(&paths.user_notes_path, &user_notes_template())?;

    Ok(paths)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_root_is_workspace_parent() {
        let paths = WorkspacePaths::new("/srv/app/.orchestrator");
        assert_eq!(paths.project_root, PathBuf::from("/srv/app"));
        assert_eq!(
            paths.tasks_path,
            PathBuf::from("/srv/app/.orchestrator/current/tasks.json")
        );
        assert_eq!(
            WorkspacePaths::new(".orchestrator").project_root,
            PathBuf::from(".")
        );
    }

    /// Verifies init creates the full skeleton and loadable stores.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = temp.path().join(".orchestrator");
        let paths = init_workspace(&ws, &InitOptions { force: false }).expect("init");

        assert!(paths.config_path.is_file());
        assert!(paths.notes_path.is_file());
        assert!(paths.user_notes_path.is_file());
        assert!(paths.checkpoints_dir.is_dir());
        assert!(paths.task_store().load().expect("tasks").is_empty());
        let goals = paths.goal_store().load().expect("goals");
        assert_eq!(goals.len(), 1);
        assert!(goals[0].id.starts_with("goal-"));
        paths.ensure_ready().expect("ready");
    }

    #[test]
    fn init_without_force_refuses_existing_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = temp.path().join(".orchestrator");
        init_workspace(&ws, &InitOptions { force: false }).expect("init");
        let err = init_workspace(&ws, &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        init_workspace(&ws, &InitOptions { force: true }).expect("re-init");
    }

    #[test]
    fn ensure_ready_reports_missing_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(temp.path().join("nope"));
        let err = paths.ensure_ready().unwrap_err();
        assert!(err.to_string().contains("workspace not found"));
    }
}
