//! Production-readiness content checks for changed files.
//!
//! Each function inspects one file (name and contents) and returns findings as
//! human-readable lines. Reading files and listing changes is the caller's job.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::core::contracts::VerdictStatus;

const SOURCE_EXTENSIONS: &[&str] = &["py", "rs", "js", "ts", "go", "java", "c", "cpp", "cs"];
const WHITESPACE_EXTENSIONS: &[&str] = &["py", "rs", "md", "txt"];
const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml"];

static SNAKE_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_.-]+$").expect("snake case regex should be valid"));

static DEBT_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(#|//|/\*)\s*(TODO|FIXME|HACK|XXX)\b")
        .case_insensitive(true)
        .build()
        .expect("debt marker regex should be valid")
});

static BARE_EXCEPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bexcept\s*:").expect("bare except regex should be valid"));

static CATCH_ALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bcatch\s*\(\s*\.\.\.\s*\)").expect("catch-all regex should be valid")
});

static SECRET_RES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r#"password\s*[:=]\s*['"]([^'"]+)['"]"#, "hardcoded password"),
        (r#"api[_-]?key\s*[:=]\s*['"]([^'"]+)['"]"#, "hardcoded API key"),
        (r#"secret\s*[:=]\s*['"]([^'"]+)['"]"#, "hardcoded secret"),
        (r#"token\s*[:=]\s*['"]([^'"]+)['"]"#, "hardcoded token"),
    ]
    .into_iter()
    .map(|(pattern, label)| {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("secret regex should be valid");
        (re, label)
    })
    .collect()
});

static CONFIG_SECRET_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"password|api[_-]?key|secret|token")
        .case_insensitive(true)
        .build()
        .expect("config key regex should be valid")
});

static LONG_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"][\w-]{20,}['"]"#).expect("literal regex should be valid")
});

static MARKDOWN_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("markdown link regex should be valid")
});

fn extension(path: &str) -> &str {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
}

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

/// Naming findings: spaces in names and non-snake_case Python/Rust sources.
pub fn file_name_findings(path: &str) -> Vec<String> {
    let mut findings = Vec::new();
    let ext = extension(path);
    if !matches!(ext, "py" | "rs" | "md" | "txt") {
        return findings;
    }
    let name = file_name(path);
    if name.contains(' ') {
        findings.push(format!("{path}: file name contains spaces."));
    }
    if matches!(ext, "py" | "rs") {
        let stem = name.trim_end_matches(&format!(".{ext}"));
        if !SNAKE_CASE_RE.is_match(stem) {
            findings.push(format!("{path}: source files should use snake_case names."));
        }
    }
    findings
}

/// First line with trailing whitespace or a tab, for text sources.
pub fn whitespace_finding(path: &str, content: &str) -> Option<String> {
    if !WHITESPACE_EXTENSIONS.contains(&extension(path)) {
        return None;
    }
    content
        .lines()
        .position(|line| line.ends_with(' ') || line.contains('\t'))
        .map(|idx| format!("{path}: line {} has trailing whitespace or tabs.", idx + 1))
}

/// Hard-coded credential assignments, ignoring `{{template}}` placeholders.
pub fn credential_findings(path: &str, content: &str) -> Vec<String> {
    let mut findings = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        for (re, label) in &*SECRET_RES {
            let hit = re.captures_iter(line).any(|caps| {
                caps.get(1)
                    .is_some_and(|value| !value.as_str().starts_with("{{"))
            });
            if hit {
                findings.push(format!(
                    "{path}:{}: Possible {label}. Credentials must come from the environment.",
                    idx + 1
                ));
            }
        }
    }
    findings
}

/// Debt markers, catch-all error handlers and credentials in source files.
pub fn source_findings(path: &str, content: &str) -> Vec<String> {
    let ext = extension(path);
    if !SOURCE_EXTENSIONS.contains(&ext) {
        return Vec::new();
    }
    let mut findings = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let lineno = idx + 1;
        if DEBT_MARKER_RE.is_match(line) {
            findings.push(format!(
                "{path}:{lineno}: Unresolved TODO/FIXME/HACK marker must be addressed."
            ));
        }
        if ext == "py" && BARE_EXCEPT_RE.is_match(line) {
            findings.push(format!(
                "{path}:{lineno}: Bare 'except:' clause; specify exception types."
            ));
        }
        if CATCH_ALL_RE.is_match(line) {
            findings.push(format!(
                "{path}:{lineno}: Catch-all 'catch (...)' handler; handle specific errors."
            ));
        }
    }
    findings.extend(credential_findings(path, content));
    findings
}

/// Long literal values next to credential-looking keys in config files.
pub fn config_findings(path: &str, content: &str) -> Vec<String> {
    if !CONFIG_EXTENSIONS.contains(&extension(path)) {
        return Vec::new();
    }
    if CONFIG_SECRET_KEY_RE.is_match(content) && LONG_LITERAL_RE.is_match(content) {
        return vec![format!(
            "{path}: Possible credentials in config file. Use environment variables."
        )];
    }
    Vec::new()
}

/// Missing top-level header and broken relative links in markdown.
///
/// `link_exists` resolves a link target relative to the file's directory.
pub fn markdown_findings(
    path: &str,
    content: &str,
    link_exists: impl Fn(&str) -> bool,
) -> Vec<String> {
    if extension(path) != "md" {
        return Vec::new();
    }
    let mut findings = Vec::new();
    if !content.trim_start().starts_with('#') {
        findings.push(format!("{path}: Documentation missing top-level header."));
    }
    for caps in MARKDOWN_LINK_RE.captures_iter(content) {
        let Some(target) = caps.get(2).map(|m| m.as_str().trim()) else {
            continue;
        };
        if target.starts_with("http://") || target.starts_with("https://") || target.starts_with('#')
        {
            continue;
        }
        let target_path = target.split('#').next().unwrap_or(target);
        if !target_path.is_empty() && !link_exists(target_path) {
            findings.push(format!("{path}: Broken link to '{target}'."));
        }
    }
    findings
}

/// Changed files outside the allowed surgical path prefixes.
pub fn surgical_findings(changed: &[String], allowed: &[String]) -> Vec<String> {
    changed
        .iter()
        .filter(|path| {
            !allowed.iter().any(|prefix| {
                let prefix = prefix.trim_start_matches("./").trim_end_matches('/');
                path.as_str() == prefix || path.starts_with(&format!("{prefix}/"))
            })
        })
        .map(|path| format!("{path}: modified outside surgical paths."))
        .collect()
}

/// Gate summary for a set of findings.
pub fn summarize(task_id: &str, findings: &[String]) -> (VerdictStatus, String) {
    if findings.is_empty() {
        (
            VerdictStatus::Pass,
            format!("Production-ready: All quality standards met for {task_id}."),
        )
    } else {
        (
            VerdictStatus::Fail,
            format!(
                "BLOCKED: {} production-readiness issue(s) detected. Code must meet ALL quality standards before completion.",
                findings.len()
            ),
        )
    }
}
