//! Append-only JSONL event log (`full_history.jsonl`).
//!
//! This is product output, independent of `RUST_LOG`. Appends are serialized
//! through a mutex so concurrent workers never interleave partial lines.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub const EVENT_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Decision,
    Spawn,
    Complete,
    Thinking,
    ToolCall,
    FileWrite,
    FileRead,
    TaskUpdate,
    MetricCheck,
    Error,
    Checkpoint,
    GoalCheck,
    GoalAchieved,
    Replan,
    ReplanRejected,
    Reflection,
}

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub step: u64,
    pub actor: String,
    pub event: EventKind,
    pub trace_id: String,
    #[serde(default)]
    pub parent_trace_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub version: Option<String>,
}

/// Conjunctive filter for [`EventLog::query`]; `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event: Option<EventKind>,
    pub actor: Option<String>,
    pub trace_id: Option<String>,
    pub step: Option<u64>,
}

impl EventFilter {
    pub fn kind(event: EventKind) -> Self {
        Self {
            event: Some(event),
            ..Self::default()
        }
    }

    fn matches(&self, event: &Event) -> bool {
        self.event.is_none_or(|kind| kind == event.event)
            && self.actor.as_deref().is_none_or(|actor| actor == event.actor)
            && self
                .trace_id
                .as_deref()
                .is_none_or(|trace| trace == event.trace_id)
            && self.step.is_none_or(|step| step == event.step)
    }
}

#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    /// Open (creating if needed) the log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open event log {}", path.display()))?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event).context("serialize event")?;
        line.push('\n');
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open event log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append event log {}", self.path.display()))
    }

    /// Append an event stamped now; write failures are reported via tracing only.
    pub fn record(
        &self,
        kind: EventKind,
        actor: &str,
        step: u64,
        trace_id: &str,
        parent_trace_id: Option<&str>,
        payload: Value,
    ) {
        let event = Event {
            timestamp: Utc::now().to_rfc3339(),
            step,
            actor: actor.to_string(),
            event: kind,
            trace_id: trace_id.to_string(),
            parent_trace_id: parent_trace_id.map(str::to_string),
            payload,
            version: Some(EVENT_VERSION.to_string()),
        };
        if let Err(err) = self.append(&event) {
            warn!(err = %format!("{err:#}"), event = ?kind, "failed to append event");
        }
    }

    /// Read back events matching `filter`, skipping blank or corrupt lines.
    pub fn query(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read event log {}", self.path.display()))?;
        let mut events = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) if filter.matches(&event) => events.push(event),
                Ok(_) => {}
                Err(err) => warn!(err = %err, "skipping corrupt event line"),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn record_then_query_by_kind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::open(temp.path().join("full_history.jsonl")).expect("open");
        log.record(EventKind::Decision, "planner", 1, "orch-1", None, json!({"task_id": "a"}));
        log.record(EventKind::Replan, "planner", 2, "orch-1", Some("p"), json!({}));

        let replans = log.query(&EventFilter::kind(EventKind::Replan)).expect("query");
        assert_eq!(replans.len(), 1);
        assert_eq!(replans[0].step, 2);
        assert_eq!(replans[0].parent_trace_id.as_deref(), Some("p"));

        let raw = fs::read_to_string(log.path()).expect("read");
        assert!(raw.lines().next().expect("line").contains("\"event\":\"decision\""));
    }

    #[test]
    fn query_skips_corrupt_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("log.jsonl");
        let log = EventLog::open(&path).expect("open");
        log.record(EventKind::Error, "actor", 1, "t", None, json!({}));
        let mut raw = fs::read_to_string(&path).expect("read");
        raw.push_str("{not json\n\n");
        fs::write(&path, raw).expect("write");
        assert_eq!(log.query(&EventFilter::default()).expect("query").len(), 1);
    }

    #[test]
    fn concurrent_appends_keep_whole_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = Arc::new(EventLog::open(temp.path().join("log.jsonl")).expect("open"));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for step in 0..25 {
                        log.record(EventKind::Spawn, "worker", step, &format!("w{worker}"), None, json!({}));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(log.query(&EventFilter::default()).expect("query").len(), 100);
    }
}
