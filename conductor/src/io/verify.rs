//! Deterministic acceptance checks.
//!
//! Every check yields a [`CheckResult`]; nothing here returns an error, so one
//! broken check never stops the remaining ones from running.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::production::credential_findings;
use crate::core::types::{CheckKind, CheckResult, VerificationCheck, clip_chars};
use crate::io::config::OrchestratorConfig;
use crate::io::process::{run_command_with_timeout, shell_command};

const MESSAGE_DETAIL_CHARS: usize = 200;
const SCAN_FILE_LIMIT_BYTES: u64 = 1_000_000;
const SCAN_SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

static THRESHOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(>=|<=|==|>|<)?\s*(-?[0-9]+(?:\.[0-9]+)?)\s*$")
        .expect("threshold regex should be valid")
});

/// Runs acceptance checks against a project root.
pub trait CheckRunner: Sync {
    fn run_check(&self, check: &VerificationCheck, root: &Path) -> CheckResult;

    fn run_all(&self, checks: &[VerificationCheck], root: &Path) -> Vec<CheckResult> {
        checks
            .iter()
            .map(|check| self.run_check(check, root))
            .collect()
    }
}

/// Built-in implementation of every [`CheckKind`].
#[derive(Debug, Clone)]
pub struct Verifier {
    command_timeout: Duration,
    http_timeout: Duration,
    output_limit_bytes: usize,
    pytest_addopts: Option<String>,
    run_integration_tests: bool,
}

impl Verifier {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            command_timeout: Duration::from_secs(config.verification.command_timeout_secs),
            http_timeout: Duration::from_secs(config.verification.http_timeout_secs),
            output_limit_bytes: config.verification.output_limit_bytes,
            pytest_addopts: config
                .pytest_addopts
                .as_deref()
                .map(str::trim)
                .filter(|opts| !opts.is_empty())
                .map(str::to_string),
            run_integration_tests: config.run_integration_tests(),
        }
    }

    fn timeout_for(&self, check: &VerificationCheck, default: Duration) -> Duration {
        check.timeout_secs.map_or(default, Duration::from_secs)
    }

    fn run_command_check(&self, check: &VerificationCheck, command: &str, root: &Path) -> CheckResult {
        if command.trim().is_empty() {
            return CheckResult::fail(check, "No command specified");
        }
        let mut cmd = shell_command(command, root);
        if let Some(opts) = pytest_addopts(
            command,
            std::env::var("PYTEST_ADDOPTS").ok().as_deref(),
            self.pytest_addopts.as_deref(),
            self.run_integration_tests,
        ) {
            debug!(addopts = %opts, "extending PYTEST_ADDOPTS");
            cmd.env("PYTEST_ADDOPTS", opts);
        }
        let timeout = self.timeout_for(check, self.command_timeout);
        let output = match run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => return CheckResult::fail(check, format!("Command error: {err:#}")),
        };
        let stdout = output.stdout_text();
        let stderr = output.stderr_text();
        let mut result = if output.timed_out {
            CheckResult::fail(
                check,
                format!("Command timed out after {}s: {command}", timeout.as_secs()),
            )
        } else if output.success() {
            CheckResult::pass(check, format!("Command passed: {command}"))
        } else {
            let detail = output.diagnostic_text();
            CheckResult::fail(
                check,
                format!(
                    "Command failed (exit {}): {}",
                    output
                        .exit_code()
                        .map_or_else(|| "signal".to_string(), |code| code.to_string()),
                    clip_chars(&detail, MESSAGE_DETAIL_CHARS)
                ),
            )
        };
        result.stdout = non_empty(stdout);
        result.stderr = non_empty(stderr);
        result
    }

    fn http_endpoint(&self, check: &VerificationCheck) -> CheckResult {
        let timeout = self.timeout_for(check, self.http_timeout);
        let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(err) => return CheckResult::fail(check, format!("HTTP client error: {err}")),
        };
        let response = match client.get(&check.target).send() {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return CheckResult::fail(
                    check,
                    format!("Request timed out after {}s", timeout.as_secs()),
                );
            }
            Err(err) => return CheckResult::fail(check, format!("Connection failed: {err}")),
        };
        let code = response.status().as_u16();
        let expected = check.expected.as_deref().map(str::trim);
        let message = match expected {
            Some(expected) => format!("HTTP {code} (expected {expected})"),
            None => format!("HTTP {code}"),
        };
        match status_matches(code, expected) {
            Ok(true) => CheckResult::pass(check, message),
            Ok(false) => CheckResult::fail(check, message),
            Err(err) => CheckResult::fail(check, err),
        }
    }
}

impl CheckRunner for Verifier {
    #[instrument(skip_all, fields(kind = %check.kind, target = %check.target))]
    fn run_check(&self, check: &VerificationCheck, root: &Path) -> CheckResult {
        let result = match &check.kind {
            CheckKind::FileExists => file_exists(check, root),
            CheckKind::PatternInFile => pattern_in_file(check, root),
            CheckKind::CommandPasses | CheckKind::TypeCheck => {
                self.run_command_check(check, &check.target, root)
            }
            CheckKind::HttpEndpoint => self.http_endpoint(check),
            CheckKind::MetricThreshold => metric_threshold(check, root),
            CheckKind::SchemaValid => schema_valid(check, root),
            CheckKind::SecurityScan => match check.metadata_str("command") {
                Some(command) => self.run_command_check(check, command, root),
                None => security_scan(check, root),
            },
            CheckKind::DataQuality => data_quality(check, root),
            CheckKind::Unknown(kind) => {
                CheckResult::fail(check, format!("Unknown verification type: {kind}"))
            }
        };
        debug!(passed = result.passed, "check finished");
        result
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// New `PYTEST_ADDOPTS` value for a pytest command, or `None` to leave it alone.
///
/// Appends configured addopts, and `-m "not integration"` unless integration
/// tests are enabled or the command already selects markers.
pub fn pytest_addopts(
    command: &str,
    existing: Option<&str>,
    configured: Option<&str>,
    run_integration_tests: bool,
) -> Option<String> {
    let tokens: Vec<&str> = command
        .split_whitespace()
        .map(|token| token.trim_matches(['"', '\'']))
        .collect();
    let is_pytest = tokens
        .iter()
        .any(|token| token.ends_with("pytest") || token.ends_with("pytest.exe"));
    if !is_pytest {
        return None;
    }
    let marker_flag = tokens.iter().enumerate().any(|(idx, token)| {
        (*token == "-m" && tokens.get(idx + 1).is_some_and(|next| *next != "pytest"))
            || (token.starts_with("-m") && token.len() > 2)
    });

    let mut extras = Vec::new();
    if let Some(opts) = configured {
        extras.push(opts.to_string());
    }
    if !run_integration_tests && !marker_flag {
        extras.push("-m \"not integration\"".to_string());
    }
    if extras.is_empty() {
        return None;
    }
    let mut parts: Vec<String> = existing
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .into_iter()
        .collect();
    parts.extend(extras);
    Some(parts.join(" "))
}

/// Match an HTTP status against `200`, `2xx` or `200-299`; `None` means any 2xx.
fn status_matches(code: u16, expected: Option<&str>) -> Result<bool, String> {
    let Some(expected) = expected.filter(|value| !value.is_empty()) else {
        return Ok((200..300).contains(&code));
    };
    if let Some((low, high)) = expected.split_once('-') {
        let low: u16 = low.trim().parse().map_err(|_| format!("Invalid status range: {expected}"))?;
        let high: u16 = high.trim().parse().map_err(|_| format!("Invalid status range: {expected}"))?;
        return Ok((low..=high).contains(&code));
    }
    if expected.to_ascii_lowercase().contains('x') {
        let prefix: String = expected.chars().filter(|ch| ch.is_ascii_digit()).collect();
        return Ok(code.to_string().starts_with(&prefix));
    }
    expected
        .parse::<u16>()
        .map(|wanted| wanted == code)
        .map_err(|_| format!("Invalid expected status: {expected}"))
}

fn file_exists(check: &VerificationCheck, root: &Path) -> CheckResult {
    if root.join(&check.target).exists() {
        CheckResult::pass(check, format!("File exists: {}", check.target))
    } else {
        CheckResult::fail(check, format!("File not found: {}", check.target))
    }
}

fn pattern_in_file(check: &VerificationCheck, root: &Path) -> CheckResult {
    let path = root.join(&check.target);
    if !path.exists() {
        return CheckResult::fail(check, format!("File not found: {}", check.target));
    }
    let Some(pattern) = check.expected.as_deref().filter(|p| !p.is_empty()) else {
        return CheckResult::fail(check, "No pattern specified for pattern_in_file check");
    };
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => return CheckResult::fail(check, format!("Invalid pattern {pattern:?}: {err}")),
    };
    match fs::read_to_string(&path) {
        Ok(content) if re.is_match(&content) => {
            CheckResult::pass(check, format!("Pattern found in {}", check.target))
        }
        Ok(_) => CheckResult::fail(check, format!("Pattern not found: {pattern}")),
        Err(err) => CheckResult::fail(check, format!("Error reading file: {err}")),
    }
}

/// Parse `">= 0.9"`, `"< 0.1"` or a bare number (meaning `>=`).
pub fn parse_threshold(expected: &str) -> Option<(&str, f64)> {
    let caps = THRESHOLD_RE.captures(expected)?;
    let op = caps.get(1).map_or(">=", |m| m.as_str());
    let value = caps.get(2)?.as_str().parse().ok()?;
    Some((op, value))
}

pub fn compare(value: f64, op: &str, threshold: f64) -> bool {
    match op {
        ">" => value > threshold,
        "<=" => value <= threshold,
        "<" => value < threshold,
        "==" => (value - threshold).abs() < 1e-6,
        _ => value >= threshold,
    }
}

fn metric_threshold(check: &VerificationCheck, root: &Path) -> CheckResult {
    let file = check.metadata_str("file").unwrap_or("metrics.json");
    let Some(expected) = check.expected.as_deref() else {
        return CheckResult::fail(check, "No threshold specified for metric_threshold check");
    };
    let Some((op, threshold)) = parse_threshold(expected) else {
        return CheckResult::fail(check, format!("Invalid threshold format: {expected}"));
    };
    let metrics: Value = match fs::read_to_string(root.join(file))
        .map_err(|err| err.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|err| err.to_string()))
    {
        Ok(metrics) => metrics,
        Err(err) => return CheckResult::fail(check, format!("Failed to load metrics {file}: {err}")),
    };
    let Some(value) = metrics.get(&check.target).and_then(Value::as_f64) else {
        return CheckResult::fail(
            check,
            format!("Metric '{}' not found in {file}", check.target),
        );
    };
    let message = format!("{} = {value} (expected {expected})", check.target);
    if compare(value, op, threshold) {
        CheckResult::pass(check, message)
    } else {
        CheckResult::fail(check, message)
    }
}

fn load_json(path: &Path) -> Result<Value, String> {
    let raw = fs::read_to_string(path).map_err(|err| format!("read {}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("parse {}: {err}", path.display()))
}

fn schema_valid(check: &VerificationCheck, root: &Path) -> CheckResult {
    let Some(schema_path) = check.expected.as_deref().filter(|p| !p.is_empty()) else {
        return CheckResult::fail(check, "No schema specified for schema_valid check");
    };
    let instance = match load_json(&root.join(&check.target)) {
        Ok(value) => value,
        Err(err) => return CheckResult::fail(check, err),
    };
    let schema = match load_json(&root.join(schema_path)) {
        Ok(value) => value,
        Err(err) => return CheckResult::fail(check, err),
    };
    let validator = match jsonschema::validator_for(&schema) {
        Ok(validator) => validator,
        Err(err) => return CheckResult::fail(check, format!("Invalid schema: {err}")),
    };
    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if errors.is_empty() {
        CheckResult::pass(check, format!("{} matches {schema_path}", check.target))
    } else {
        CheckResult::fail(
            check,
            format!(
                "{} schema error(s): {}",
                errors.len(),
                errors.iter().take(3).cloned().collect::<Vec<_>>().join("; ")
            ),
        )
    }
}

fn security_scan(check: &VerificationCheck, root: &Path) -> CheckResult {
    let target = root.join(&check.target);
    if !target.exists() {
        return CheckResult::fail(check, format!("Scan target not found: {}", check.target));
    }
    let mut findings = Vec::new();
    for entry in project_files(&target) {
        if entry
            .metadata()
            .is_ok_and(|meta| meta.len() > SCAN_FILE_LIMIT_BYTES)
        {
            continue;
        }
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        findings.extend(credential_findings(&rel, &content));
    }
    if findings.is_empty() {
        CheckResult::pass(
            check,
            format!("No hard-coded credentials found in {}", check.target),
        )
    } else {
        CheckResult::fail(
            check,
            format!(
                "{} security finding(s): {}",
                findings.len(),
                findings.iter().take(3).cloned().collect::<Vec<_>>().join("; ")
            ),
        )
    }
}

/// Rows and columns of a small tabular dataset.
struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

fn load_dataset(path: &Path) -> Result<Dataset, String> {
    let raw = fs::read_to_string(path).map_err(|err| format!("Failed to load dataset: {err}"))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("csv") => {
            let mut lines = raw.lines().filter(|line| !line.trim().is_empty());
            let columns: Vec<String> = lines
                .next()
                .map(|header| header.split(',').map(|col| col.trim().to_string()).collect())
                .unwrap_or_default();
            let rows = lines
                .map(|line| {
                    line.split(',')
                        .map(|cell| Some(cell.trim().to_string()).filter(|cell| !cell.is_empty()))
                        .collect()
                })
                .collect();
            Ok(Dataset { columns, rows })
        }
        Some("json") => {
            let value: Value =
                serde_json::from_str(&raw).map_err(|err| format!("Failed to load dataset: {err}"))?;
            let Value::Array(items) = value else {
                return Err("JSON dataset must be an array of objects".to_string());
            };
            let mut columns: Vec<String> = Vec::new();
            for item in &items {
                if let Value::Object(map) = item {
                    for key in map.keys() {
                        if !columns.contains(key) {
                            columns.push(key.clone());
                        }
                    }
                }
            }
            let rows = items
                .iter()
                .map(|item| {
                    columns
                        .iter()
                        .map(|col| match item.get(col) {
                            None | Some(Value::Null) => None,
                            Some(Value::String(text)) => Some(text.clone()),
                            Some(other) => Some(other.to_string()),
                        })
                        .collect()
                })
                .collect();
            Ok(Dataset { columns, rows })
        }
        other => Err(format!(
            "Unsupported dataset format: {}",
            other.unwrap_or("<none>")
        )),
    }
}

fn data_quality(check: &VerificationCheck, root: &Path) -> CheckResult {
    let path = root.join(&check.target);
    if !path.exists() {
        return CheckResult::fail(check, format!("Dataset not found: {}", check.target));
    }
    let dataset = match load_dataset(&path) {
        Ok(dataset) => dataset,
        Err(err) => return CheckResult::fail(check, err),
    };
    if dataset.rows.is_empty() {
        return CheckResult::fail(check, format!("Dataset is empty: {}", check.target));
    }
    if let Some(min_rows) = check.metadata.get("min_rows").and_then(Value::as_u64)
        && (dataset.rows.len() as u64) < min_rows
    {
        return CheckResult::fail(
            check,
            format!("Dataset has {} rows (expected at least {min_rows})", dataset.rows.len()),
        );
    }
    if let Some(Value::Array(required)) = check.metadata.get("required_columns") {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|col| !dataset.columns.iter().any(|have| have == col))
            .collect();
        if !missing.is_empty() {
            return CheckResult::fail(check, format!("Missing columns: {}", missing.join(", ")));
        }
    }
    match check.expected.as_deref().map(str::trim) {
        Some("no-nulls") => {
            let nulls = dataset
                .rows
                .iter()
                .flatten()
                .filter(|cell| cell.is_none())
                .count();
            if nulls > 0 {
                return CheckResult::fail(check, format!("{nulls} null values found"));
            }
        }
        Some("no-duplicates") => {
            let mut seen = std::collections::HashSet::new();
            let dups = dataset.rows.iter().filter(|row| !seen.insert(*row)).count();
            if dups > 0 {
                return CheckResult::fail(check, format!("{dups} duplicate rows found"));
            }
        }
        _ => {}
    }
    CheckResult::pass(
        check,
        format!(
            "{} rows, {} columns in {}",
            dataset.rows.len(),
            dataset.columns.len(),
            check.target
        ),
    )
}

/// Regular files under `dir`, skipping VCS, build and dependency directories.
pub fn project_files(dir: &Path) -> impl Iterator<Item = DirEntry> + use<> {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0
                || !(entry.file_type().is_dir() && SCAN_SKIP_DIRS.iter().any(|skip| name == *skip))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
}

/// Build a `Command` for `argv` (lint commands and evaluators share this).
pub fn argv_command(argv: &[String], cwd: &Path) -> Option<Command> {
    let (program, args) = argv.split_first()?;
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(cwd);
    Some(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verifier() -> Verifier {
        Verifier::from_config(&OrchestratorConfig::default())
    }

    #[test]
    fn file_and_pattern_checks() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("lib.rs"), "pub fn answer() -> u32 { 42 }\n").expect("write");
        let v = verifier();

        let exists = VerificationCheck::new(CheckKind::FileExists, "lib.rs", "lib exists");
        assert!(v.run_check(&exists, temp.path()).passed);
        let missing = VerificationCheck::new(CheckKind::FileExists, "nope.rs", "");
        assert!(!v.run_check(&missing, temp.path()).passed);

        let pattern = VerificationCheck::new(CheckKind::PatternInFile, "lib.rs", "")
            .with_expected(r"fn answer\(\)");
        assert!(v.run_check(&pattern, temp.path()).passed);
        let no_pattern = VerificationCheck::new(CheckKind::PatternInFile, "lib.rs", "");
        assert!(!v.run_check(&no_pattern, temp.path()).passed);
    }

    #[test]
    fn command_check_reports_exit_and_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let v = verifier();
        let ok = VerificationCheck::new(CheckKind::CommandPasses, "true", "");
        assert!(v.run_check(&ok, temp.path()).passed);

        let bad = VerificationCheck::new(CheckKind::CommandPasses, "echo broken >&2; exit 3", "");
        let result = v.run_check(&bad, temp.path());
        assert!(!result.passed);
        assert_eq!(result.message, "Command failed (exit 3): broken");
        assert_eq!(result.stderr.as_deref(), Some("broken"));
    }

    /// Unknown kinds fail with a message and later checks still run.
    #[test]
    fn unknown_kind_fails_without_stopping_others() {
        let temp = tempfile::tempdir().expect("tempdir");
        let checks = vec![
            VerificationCheck::new(CheckKind::Unknown("smoke".into()), "x", ""),
            VerificationCheck::new(CheckKind::CommandPasses, "true", ""),
        ];
        let results = verifier().run_all(&checks, temp.path());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].message, "Unknown verification type: smoke");
        assert!(results[1].passed);
    }

    #[test]
    fn pytest_addopts_rules() {
        assert_eq!(
            pytest_addopts("pytest -q", None, None, false).as_deref(),
            Some("-m \"not integration\"")
        );
        assert_eq!(
            pytest_addopts("python -m pytest -x", Some("-p no:cacheprovider"), Some("--tb=short"), false)
                .as_deref(),
            Some("-p no:cacheprovider --tb=short -m \"not integration\"")
        );
        assert_eq!(pytest_addopts("pytest -m slow", None, None, false), None);
        assert_eq!(pytest_addopts("pytest", None, None, true), None);
        assert_eq!(pytest_addopts("cargo test", None, Some("-x"), false), None);
    }

    #[test]
    fn metric_threshold_compares_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("metrics.json"), r#"{"accuracy": 0.93, "loss": 0.2}"#)
            .expect("write");
        let v = verifier();
        let good = VerificationCheck::new(CheckKind::MetricThreshold, "accuracy", "")
            .with_expected(">= 0.9");
        assert!(v.run_check(&good, temp.path()).passed);
        let bad = VerificationCheck::new(CheckKind::MetricThreshold, "loss", "").with_expected("< 0.1");
        assert!(!v.run_check(&bad, temp.path()).passed);
        assert_eq!(parse_threshold("0.5"), Some((">=", 0.5)));
        assert_eq!(parse_threshold("about half"), None);
    }

    #[test]
    fn schema_check_validates_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("schema.json"),
            json!({"type": "object", "required": ["name"]}).to_string(),
        )
        .expect("write");
        fs::write(temp.path().join("good.json"), r#"{"name": "x"}"#).expect("write");
        fs::write(temp.path().join("bad.json"), r#"{"other": 1}"#).expect("write");
        let v = verifier();
        let good = VerificationCheck::new(CheckKind::SchemaValid, "good.json", "")
            .with_expected("schema.json");
        assert!(v.run_check(&good, temp.path()).passed);
        let bad = VerificationCheck::new(CheckKind::SchemaValid, "bad.json", "")
            .with_expected("schema.json");
        assert!(!v.run_check(&bad, temp.path()).passed);
    }

    #[test]
    fn security_scan_finds_credentials() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/clean.py"), "x = 1\n").expect("write");
        let v = verifier();
        let check = VerificationCheck::new(CheckKind::SecurityScan, "src", "");
        assert!(v.run_check(&check, temp.path()).passed);

        fs::write(temp.path().join("src/conf.py"), "api_key = \"abc123\"\n").expect("write");
        let result = v.run_check(&check, temp.path());
        assert!(!result.passed);
        assert!(result.message.contains("src/conf.py:1"));
    }

    #[test]
    fn data_quality_checks_rows_and_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("data.csv"), "id,label\n1,a\n2,b\n2,b\n").expect("write");
        let v = verifier();

        let mut check = VerificationCheck::new(CheckKind::DataQuality, "data.csv", "");
        check.metadata.insert("min_rows".into(), json!(2));
        check.metadata.insert("required_columns".into(), json!(["id", "label"]));
        assert!(v.run_check(&check, temp.path()).passed);

        check.metadata.insert("required_columns".into(), json!(["score"]));
        assert_eq!(v.run_check(&check, temp.path()).message, "Missing columns: score");

        let dup = VerificationCheck::new(CheckKind::DataQuality, "data.csv", "")
            .with_expected("no-duplicates");
        assert!(!v.run_check(&dup, temp.path()).passed);

        fs::write(temp.path().join("empty.json"), "[]").expect("write");
        let empty = VerificationCheck::new(CheckKind::DataQuality, "empty.json", "");
        assert!(!v.run_check(&empty, temp.path()).passed);
    }

    #[test]
    fn status_matching_forms() {
        assert_eq!(status_matches(204, None), Ok(true));
        assert_eq!(status_matches(404, Some("404")), Ok(true));
        assert_eq!(status_matches(503, Some("5xx")), Ok(true));
        assert_eq!(status_matches(302, Some("200-299")), Ok(false));
        assert!(status_matches(200, Some("ok")).is_err());
    }
}
