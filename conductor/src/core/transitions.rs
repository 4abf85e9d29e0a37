//! Task state machine transitions.
//!
//! `BACKLOG -> IN_PROGRESS -> {COMPLETE | BACKLOG | FAILED}`. The attempt
//! counter is only incremented when an attempt begins, so it can never pass
//! `max_attempts`.

use crate::core::graph::TaskGraph;
use crate::core::types::{Task, TaskStatus, clip_chars};

/// Longest `next_action` hint kept on a task.
pub const NEXT_ACTION_MAX_CHARS: usize = 200;

/// Move a ready task to `IN_PROGRESS` and count the attempt.
///
/// Returns a snapshot of the task after the transition.
pub fn begin_attempt(graph: &mut TaskGraph, id: &str) -> Result<Task, String> {
    let task = graph.get(id).ok_or_else(|| format!("unknown task '{id}'"))?;
    if task.status != TaskStatus::Backlog {
        return Err(format!("task '{id}' is {} not BACKLOG", task.status));
    }
    if !graph.dependencies_complete(task) {
        return Err(format!("task '{id}' has incomplete dependencies"));
    }
    if task.attempts_exhausted() {
        return Err(format!(
            "task '{id}' already used {}/{} attempts",
            task.attempt_count, task.max_attempts
        ));
    }
    let task = graph
        .get_mut(id)
        .ok_or_else(|| format!("unknown task '{id}'"))?;
    task.status = TaskStatus::InProgress;
    task.attempt_count += 1;
    Ok(task.clone())
}

/// Mark an attempt accepted.
pub fn complete(task: &mut Task, summary: &str) {
    task.status = TaskStatus::Complete;
    let summary = summary.trim();
    if !summary.is_empty() {
        task.summary.push(clip_chars(summary, NEXT_ACTION_MAX_CHARS).to_string());
    }
    task.next_action = None;
}

/// Record a failed attempt: requeue while attempts remain, otherwise `FAILED`.
pub fn record_failure(task: &mut Task, note: &str, next_action: &str) -> TaskStatus {
    if !note.trim().is_empty() {
        task.summary.push(note.trim().to_string());
    }
    let hint = clip_chars(next_action.trim(), NEXT_ACTION_MAX_CHARS);
    task.next_action = (!hint.is_empty()).then(|| hint.to_string());
    task.status = if task.attempts_exhausted() {
        TaskStatus::Failed
    } else {
        TaskStatus::Backlog
    };
    task.status
}

/// Return interrupted `IN_PROGRESS` tasks to `BACKLOG` after a crash.
pub fn reset_in_progress(graph: &mut TaskGraph) -> Vec<String> {
    let mut reset = Vec::new();
    for task in graph.tasks_mut() {
        if task.status == TaskStatus::InProgress {
            task.status = if task.attempts_exhausted() {
                TaskStatus::Failed
            } else {
                TaskStatus::Backlog
            };
            reset.push(task.id.clone());
        }
    }
    reset
}

/// Fail `BACKLOG` tasks whose attempts are already used up, as a hand-edited
/// or interrupted store can leave them.
pub fn fail_exhausted(graph: &mut TaskGraph) -> Vec<String> {
    let mut failed = Vec::new();
    for task in graph.tasks_mut() {
        if task.status == TaskStatus::Backlog && task.attempts_exhausted() {
            task.status = TaskStatus::Failed;
            failed.push(task.id.clone());
        }
    }
    failed
}
