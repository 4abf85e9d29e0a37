//! Crash-recovery checkpoints under `<workspace>/checkpoints/`.
//!
//! Each save writes `checkpoint_NNNNN.json` plus a rolling `latest.json`, then
//! prunes step files beyond the retention count. Loads never fail: missing or
//! corrupt data is reported as `None` so the caller can start fresh.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::contracts::FeedbackRecord;
use crate::core::graph::TaskGraph;
use crate::core::types::TaskStatus;
use crate::io::store::write_json_atomic;

pub const CHECKPOINT_VERSION: &str = "1";
const LATEST_FILE: &str = "latest.json";

/// Immutable snapshot of run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointData {
    pub step: u64,
    pub trace_id: String,
    pub timestamp: String,
    pub task_states: BTreeMap<String, String>,
    pub completed_task_ids: Vec<String>,
    pub failed_task_ids: Vec<String>,
    #[serde(default)]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub feedback_log: Vec<FeedbackRecord>,
    #[serde(default)]
    pub notes_summary: String,
    #[serde(default = "unknown_version")]
    pub version: String,
}

fn unknown_version() -> String {
    "unknown".to_string()
}

impl CheckpointData {
    /// Snapshot the graph's statuses now.
    pub fn capture(
        step: u64,
        trace_id: &str,
        graph: &TaskGraph,
        current_task_id: Option<String>,
        feedback_log: Vec<FeedbackRecord>,
        notes_summary: String,
    ) -> Self {
        Self {
            step,
            trace_id: trace_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            task_states: graph.status_map(),
            completed_task_ids: graph.ids_with_status(TaskStatus::Complete),
            failed_task_ids: graph.ids_with_status(TaskStatus::Failed),
            current_task_id,
            feedback_log,
            notes_summary,
            version: CHECKPOINT_VERSION.to_string(),
        }
    }
}

/// Listing entry for [`CheckpointManager::list_checkpoints`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointInfo {
    pub file: String,
    pub step: u64,
    pub timestamp: String,
    pub trace_id: String,
    pub completed_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    max_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, max_checkpoints: usize) -> Self {
        Self {
            dir: dir.into(),
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn step_path(&self, step: u64) -> PathBuf {
        self.dir.join(format!("checkpoint_{step:05}.json"))
    }

    pub fn save(&self, data: &CheckpointData) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create checkpoint dir {}", self.dir.display()))?;
        let path = self.step_path(data.step);
        write_json_atomic(&path, data)?;
        write_json_atomic(&self.dir.join(LATEST_FILE), data)?;
        self.prune()?;
        debug!(step = data.step, path = %path.display(), "checkpoint saved");
        Ok(path)
    }

    pub fn load_latest(&self) -> Option<CheckpointData> {
        load_file(&self.dir.join(LATEST_FILE))
    }

    pub fn load_step(&self, step: u64) -> Option<CheckpointData> {
        load_file(&self.step_path(step))
    }

    /// Readable step checkpoints, oldest first.
    pub fn list_checkpoints(&self) -> Vec<CheckpointInfo> {
        self.step_files()
            .into_iter()
            .filter_map(|(_, path)| {
                let data = load_file(&path)?;
                Some(CheckpointInfo {
                    file: path.file_name()?.to_string_lossy().into_owned(),
                    step: data.step,
                    timestamp: data.timestamp,
                    trace_id: data.trace_id,
                    completed_count: data.completed_task_ids.len(),
                    failed_count: data.failed_task_ids.len(),
                })
            })
            .collect()
    }

    /// Step files sorted by step number.
    fn step_files(&self) -> Vec<(u64, PathBuf)> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<(u64, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let step = name
                    .strip_prefix("checkpoint_")?
                    .strip_suffix(".json")?
                    .parse()
                    .ok()?;
                Some((step, entry.path()))
            })
            .collect();
        files.sort();
        files
    }

    fn prune(&self) -> Result<()> {
        let files = self.step_files();
        if files.len() <= self.max_checkpoints {
            return Ok(());
        }
        let excess = files.len() - self.max_checkpoints;
        for (step, path) in files.into_iter().take(excess) {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            debug!(step, "pruned checkpoint");
        }
        Ok(())
    }
}

fn load_file(path: &Path) -> Option<CheckpointData> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to read checkpoint");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(data) => Some(data),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "corrupt checkpoint ignored");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    fn sample_graph() -> TaskGraph {
        let mut graph = TaskGraph::new();
        let mut done = task("a");
        done.status = TaskStatus::Complete;
        let mut failed = task("b");
        failed.status = TaskStatus::Failed;
        graph.add_task(done).expect("add");
        graph.add_task(failed).expect("add");
        graph.add_task(task("c")).expect("add");
        graph
    }

    /// Saving then loading the latest checkpoint reproduces statuses and id lists.
    #[test]
    fn save_then_load_latest_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manager = CheckpointManager::new(temp.path().join("checkpoints"), 10);
        let graph = sample_graph();
        let data = CheckpointData::capture(7, "orch-1", &graph, None, Vec::new(), "notes".into());
        manager.save(&data).expect("save");

        let loaded = manager.load_latest().expect("latest");
        assert_eq!(loaded, data);
        assert_eq!(loaded.task_states, graph.status_map());
        assert_eq!(loaded.completed_task_ids, vec!["a"]);
        assert_eq!(loaded.failed_task_ids, vec!["b"]);
        assert_eq!(manager.load_step(7), Some(data));
    }

    #[test]
    fn missing_or_corrupt_loads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("checkpoints");
        let manager = CheckpointManager::new(&dir, 10);
        assert!(manager.load_latest().is_none());

        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("latest.json"), "{ truncated").expect("write");
        assert!(manager.load_latest().is_none());
        assert!(manager.load_step(3).is_none());
    }

    #[test]
    fn retention_keeps_newest_step_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manager = CheckpointManager::new(temp.path().join("checkpoints"), 3);
        let graph = sample_graph();
        for step in [5, 10, 15, 20, 100_000] {
            let data = CheckpointData::capture(step, "orch-1", &graph, None, Vec::new(), String::new());
            manager.save(&data).expect("save");
        }
        let steps: Vec<u64> = manager.list_checkpoints().iter().map(|info| info.step).collect();
        assert_eq!(steps, vec![15, 20, 100_000]);
        assert_eq!(manager.load_latest().expect("latest").step, 100_000);
    }
}
