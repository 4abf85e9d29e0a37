//! Operator feedback parsing for `USER_NOTES.md`.
//!
//! The file has a "New Notes" section the operator writes into and a
//! "Previously Reviewed" archive. Everything here is pure string handling; the
//! file access and mtime bookkeeping live in `io::notes`.

use serde::{Deserialize, Serialize};

pub const NEW_NOTES_HEADER: &str = "## New Notes (Write here - will be consumed on next review)";
pub const REVIEWED_HEADER: &str = "## Previously Reviewed";

/// Most feedback entries the planner keeps active at once.
pub const MAX_ACTIVE_FEEDBACK: usize = 10;

/// One consumed operator note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFeedback {
    /// `None` for general notes.
    pub task_id: Option<String>,
    pub text: String,
    /// Step at which the note was ingested; drives TTL pruning.
    pub seen_step: u64,
}

impl UserFeedback {
    pub fn general(text: impl Into<String>, seen_step: u64) -> Self {
        Self {
            task_id: None,
            text: text.into(),
            seen_step,
        }
    }

    pub fn for_task(task_id: impl Into<String>, text: impl Into<String>, seen_step: u64) -> Self {
        Self {
            task_id: Some(task_id.into()),
            text: text.into(),
            seen_step,
        }
    }

    pub fn is_general(&self) -> bool {
        self.task_id.is_none()
    }
}

/// Initial contents for a fresh `USER_NOTES.md`.
pub fn user_notes_template() -> String {
    format!(
        "# USER FEEDBACK\n\n\
         Add notes under \"New Notes\" as `- [task-id] do X` or `- [general] pause work`.\n\
         Notes are ingested before each attempt and then archived below with a timestamp.\n\n\
         ---\n\n\
         {NEW_NOTES_HEADER}\n\n\n\
         ---\n\n\
         {REVIEWED_HEADER}\n\n\
         - None yet\n"
    )
}

/// Text between the "New Notes" and "Previously Reviewed" headers, trimmed.
///
/// Returns an empty string when either header is missing.
pub fn extract_new_notes(content: &str) -> &str {
    let Some(start) = content.find(NEW_NOTES_HEADER) else {
        return "";
    };
    let body = &content[start + NEW_NOTES_HEADER.len()..];
    let Some(end) = body.find(REVIEWED_HEADER) else {
        return "";
    };
    strip_separator(body[..end].trim())
}

fn strip_separator(section: &str) -> &str {
    section.strip_suffix("---").unwrap_or(section).trim()
}

/// Parse bullet entries: `[task-id] text`, `[general] text` or plain text.
pub fn parse_entries(section: &str, step: u64) -> Vec<UserFeedback> {
    let mut entries = Vec::new();
    for line in section.lines() {
        let mut line = line.trim();
        if let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
            line = rest.trim();
        }
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('[')
            && let Some((tag, text)) = rest.split_once(']')
        {
            let tag = tag.trim();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if tag.eq_ignore_ascii_case("general") {
                entries.push(UserFeedback::general(text, step));
            } else {
                entries.push(UserFeedback::for_task(tag, text, step));
            }
            continue;
        }
        entries.push(UserFeedback::general(line, step));
    }
    entries
}

/// Clear the "New Notes" section and prepend `consumed` to the archive.
///
/// Returns `None` when the file does not have exactly one archive header.
pub fn archive_new_notes(content: &str, consumed: &str, reviewed_at: &str) -> Option<String> {
    let mut parts = content.split(REVIEWED_HEADER);
    let before = parts.next()?;
    let after = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let start = before.find(NEW_NOTES_HEADER)?;
    let head = &before[..start + NEW_NOTES_HEADER.len()];
    Some(format!(
        "{head}\n\n\n---\n\n{REVIEWED_HEADER}\n<!-- Reviewed at {reviewed_at} -->\n{}\n{after}",
        consumed.trim()
    ))
}

/// Drop entries older than `ttl` steps and keep at most the newest `cap`.
pub fn prune(entries: &mut Vec<UserFeedback>, current_step: u64, ttl: u64, cap: usize) {
    entries.retain(|entry| current_step.saturating_sub(entry.seen_step) <= ttl);
    if entries.len() > cap {
        let excess = entries.len() - cap;
        entries.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_general_and_plain_entries() {
        let section = "- [task-007] rename the module\n- [general] keep it small\n* plain note\n- [task-9]\n";
        let entries = parse_entries(section, 3);
        assert_eq!(
            entries,
            vec![
                UserFeedback::for_task("task-007", "rename the module", 3),
                UserFeedback::general("keep it small", 3),
                UserFeedback::general("plain note", 3),
            ]
        );
    }

    #[test]
    fn template_has_empty_new_notes() {
        assert_eq!(extract_new_notes(&user_notes_template()), "");
    }

    #[test]
    fn archive_moves_notes_and_clears_section() {
        let content = user_notes_template().replace(
            &format!("{NEW_NOTES_HEADER}\n\n\n"),
            &format!("{NEW_NOTES_HEADER}\n\n- [general] stop adding deps\n\n"),
        );
        let section = extract_new_notes(&content);
        assert_eq!(section, "- [general] stop adding deps");

        let updated = archive_new_notes(&content, section, "2026-01-02 03:04:05").expect("archive");
        assert_eq!(extract_new_notes(&updated), "");
        assert!(updated.contains("<!-- Reviewed at 2026-01-02 03:04:05 -->\n- [general] stop adding deps"));
        assert!(updated.contains("- None yet"));
    }

    #[test]
    fn archive_rejects_malformed_file() {
        assert!(archive_new_notes("no headers here", "x", "now").is_none());
    }

    #[test]
    fn prune_applies_ttl_then_cap() {
        let mut entries: Vec<UserFeedback> = (0..15)
            .map(|step| UserFeedback::general(format!("note {step}"), step))
            .collect();
        prune(&mut entries, 14, 5, MAX_ACTIVE_FEEDBACK);
        let steps: Vec<u64> = entries.iter().map(|entry| entry.seen_step).collect();
        assert_eq!(steps, vec![9, 10, 11, 12, 13, 14]);

        prune(&mut entries, 14, 5, 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seen_step, 13);
    }
}
