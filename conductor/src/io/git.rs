//! Read-only git queries used by the critic.
//!
//! Every call is timeout-bounded; a missing repository or a hung git simply
//! yields no changed files.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

const GIT_OUTPUT_LIMIT: usize = 1_000_000;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    /// Modified, added or untracked in either the index or the worktree.
    pub fn is_reviewable(&self) -> bool {
        matches!(self.code.trim(), "M" | "A" | "??" | "AM" | "MM")
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Get status entries (including untracked) in porcelain format.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        debug!(count = entries.len(), "git status entries");
        Ok(entries)
    }

    /// Reviewable changed paths, skipping anything under `exclude_prefix`.
    ///
    /// Errors (no repository, timeout) are logged and produce an empty list.
    pub fn changed_files(&self, exclude_prefix: Option<&str>) -> Vec<String> {
        let entries = match self.status_porcelain() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "git status unavailable");
                return Vec::new();
            }
        };
        entries
            .into_iter()
            .filter(StatusEntry::is_reviewable)
            .map(|entry| entry.path)
            .filter(|path| {
                exclude_prefix.is_none_or(|prefix| {
                    let prefix = prefix.trim_end_matches('/');
                    prefix.is_empty() || !(path == prefix || path.starts_with(&format!("{prefix}/")))
                })
            })
            .collect()
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, None, self.timeout, GIT_OUTPUT_LIMIT)?;
        if output.timed_out {
            return Err(anyhow!(
                "git {} timed out after {:?}",
                args.join(" "),
                self.timeout
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr_text().trim()
            ));
        }
        Ok(output.stdout_text())
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: unquote(path.trim()),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry {
        code,
        path: unquote(&path),
    })
}

fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}
