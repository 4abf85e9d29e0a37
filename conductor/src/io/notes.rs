//! Operator guidance files: `NOTES.md` (standing notes) and `USER_NOTES.md`
//! (one-shot feedback consumed by the planner).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::feedback::{
    UserFeedback, archive_new_notes, extract_new_notes, parse_entries, user_notes_template,
};
use crate::io::store::{write_atomic, write_json_atomic};

pub const NOTES_TEMPLATE: &str = "# User Notes\n\n\
Standing guidance for the orchestrator. Every bullet in this file is surfaced\n\
to the execution agent and the reviewer on each attempt.\n";

const NO_NOTES: &str = "No user notes recorded.";
pub const DEFAULT_SUMMARY_ITEMS: usize = 5;

/// Reader for `NOTES.md`.
#[derive(Debug, Clone)]
pub struct NotesManager {
    path: PathBuf,
}

impl NotesManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Bullet lines with their marker stripped. A missing file has none.
    pub fn bullet_points(&self) -> Result<Vec<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read notes {}", self.path.display()));
            }
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('-'))
            .map(|line| line.trim_start_matches(['-', ' ']).trim().to_string())
            .filter(|item| !item.is_empty())
            .collect())
    }

    /// First `max_items` bullets, with a count of anything omitted.
    pub fn concise_summary(&self, max_items: usize) -> String {
        let bullets = match self.bullet_points() {
            Ok(bullets) => bullets,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "notes unavailable");
                Vec::new()
            }
        };
        if bullets.is_empty() {
            return NO_NOTES.to_string();
        }
        let mut lines: Vec<String> = bullets
            .iter()
            .take(max_items)
            .map(|item| format!("- {item}"))
            .collect();
        let remainder = bullets.len().saturating_sub(max_items);
        if remainder > 0 {
            lines.push(format!("- … {remainder} additional note(s) omitted"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FeedbackState {
    #[serde(default)]
    last_processed_mtime: f64,
    #[serde(default)]
    last_processed_time: String,
}

/// Tracks `USER_NOTES.md` and moves consumed notes to its archive section.
#[derive(Debug, Clone)]
pub struct FeedbackTracker {
    notes_path: PathBuf,
    state_path: PathBuf,
}

impl FeedbackTracker {
    pub fn new(notes_path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            notes_path: notes_path.into(),
            state_path: state_path.into(),
        }
    }

    /// Write the template when the notes file does not exist yet.
    pub fn initialize(&self) -> Result<()> {
        if self.notes_path.exists() {
            return Ok(());
        }
        write_atomic(&self.notes_path, &user_notes_template())
    }

    /// True when the file changed since the last consume and has pending notes.
    ///
    /// A missing or unreadable state file counts as "changed".
    pub fn has_new_feedback(&self) -> bool {
        let Some(mtime) = modified_secs(&self.notes_path) else {
            return false;
        };
        if let Some(state) = self.read_state()
            && mtime <= state.last_processed_mtime
        {
            return false;
        }
        match fs::read_to_string(&self.notes_path) {
            Ok(content) => !extract_new_notes(&content).is_empty(),
            Err(err) => {
                warn!(path = %self.notes_path.display(), err = %err, "failed to read user notes");
                false
            }
        }
    }

    /// Parse pending notes, archive them and record the file's mtime.
    pub fn consume(&self, step: u64) -> Result<Vec<UserFeedback>> {
        let content = match fs::read_to_string(&self.notes_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read user notes {}", self.notes_path.display()));
            }
        };
        let section = extract_new_notes(&content);
        let entries = parse_entries(section, step);
        if entries.is_empty() {
            return Ok(entries);
        }

        let reviewed_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        match archive_new_notes(&content, section, &reviewed_at) {
            Some(updated) => write_atomic(&self.notes_path, &updated)?,
            None => {
                warn!(path = %self.notes_path.display(), "malformed user notes; rewriting template");
                write_atomic(&self.notes_path, &user_notes_template())?;
            }
        }
        self.write_state()?;
        debug!(count = entries.len(), step, "consumed user feedback");
        Ok(entries)
    }

    fn read_state(&self) -> Option<FeedbackState> {
        let raw = fs::read_to_string(&self.state_path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn write_state(&self) -> Result<()> {
        let state = FeedbackState {
            last_processed_mtime: modified_secs(&self.notes_path).unwrap_or_default(),
            last_processed_time: Local::now().to_rfc3339(),
        };
        write_json_atomic(&self.state_path, &state)
    }
}

fn modified_secs(path: &Path) -> Option<f64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::feedback::{NEW_NOTES_HEADER, REVIEWED_HEADER};

    #[test]
    fn summary_lists_first_bullets_and_counts_rest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("NOTES.md");
        let body: String = (1..=7).map(|n| format!("- note {n}\n")).collect();
        fs::write(&path, format!("# User Notes\n\nintro line\n{body}")).expect("write");

        let summary = NotesManager::new(&path).concise_summary(DEFAULT_SUMMARY_ITEMS);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "- note 1");
        assert_eq!(lines[5], "- … 2 additional note(s) omitted");
    }

    #[test]
    fn template_and_missing_file_have_no_notes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("NOTES.md");
        assert_eq!(NotesManager::new(&path).concise_summary(5), NO_NOTES);
        fs::write(&path, NOTES_TEMPLATE).expect("write");
        assert_eq!(NotesManager::new(&path).concise_summary(5), NO_NOTES);
    }

    /// Consuming archives the notes so a second consume sees nothing.
    #[test]
    fn consume_archives_and_clears_new_notes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let notes = temp.path().join("USER_NOTES.md");
        let state = temp.path().join(".feedback_state.json");
        let tracker = FeedbackTracker::new(&notes, &state);
        tracker.initialize().expect("init");
        assert!(!tracker.has_new_feedback());

        let content = fs::read_to_string(&notes).expect("read");
        let filled = content.replacen(
            NEW_NOTES_HEADER,
            &format!("{NEW_NOTES_HEADER}\n\n- [task-1] use the v2 API\n- [general] keep diffs small"),
            1,
        );
        fs::write(&notes, filled).expect("write");
        assert!(tracker.has_new_feedback());

        let entries = tracker.consume(4).expect("consume");
        assert_eq!(
            entries,
            vec![
                UserFeedback::for_task("task-1", "use the v2 API", 4),
                UserFeedback::general("keep diffs small", 4),
            ]
        );
        assert!(state.is_file());
        assert!(!tracker.has_new_feedback());
        assert!(tracker.consume(5).expect("consume again").is_empty());

        let archived = fs::read_to_string(&notes).expect("read");
        let reviewed = archived.split(REVIEWED_HEADER).nth(1).expect("archive");
        assert!(reviewed.contains("use the v2 API"));
        assert!(reviewed.contains("Reviewed at"));
    }
}
