//! Orchestrator configuration stored at `<workspace>/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::completion::COMPLETION_CONFIDENCE;

/// Environment variable that forces integration tests on (or off).
pub const RUN_INTEGRATION_TESTS_ENV: &str = "ORCHESTRATOR_RUN_INTEGRATION_TESTS";

/// Orchestrator configuration (TOML).
///
/// Edited by humans; every field has a default so partial files stay valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Completion is not checked before this step.
    pub min_steps: u64,
    /// Hard iteration cap.
    pub max_steps: u64,
    pub max_parallel_tasks: usize,
    /// Turn budget passed to the execution agent.
    pub subagent_max_turns: u32,
    pub skip_integration_tests: bool,
    /// Extra `PYTEST_ADDOPTS` appended to pytest acceptance commands.
    pub pytest_addopts: Option<String>,
    pub surgical_mode: bool,
    pub surgical_paths: Vec<String>,
    pub domain: Option<String>,
    /// Flush documentation side-effects every N steps.
    pub docs_update_interval: u64,
    pub checkpoint_interval: u64,
    pub max_checkpoints: usize,
    /// Steps an ingested operator note stays active.
    pub user_feedback_ttl: u64,
    pub max_replan_depth: u32,
    pub max_gap_analysis_attempts: u32,
    pub completion_confidence: f64,
    pub job_poll_interval_secs: u64,

    pub agent: AgentConfig,
    pub verification: VerificationConfig,
    pub critic: CriticConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent CLI executable.
    pub program: String,
    pub extra_args: Vec<String>,
    pub model: String,
    /// Reviewer model; falls back to `model`.
    pub reviewer_model: Option<String>,
    pub short_review_model: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            extra_args: Vec::new(),
            model: "sonnet".to_string(),
            reviewer_model: None,
            short_review_model: "haiku".to_string(),
            timeout_secs: 600,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationConfig {
    pub command_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            http_timeout_secs: 10,
            output_limit_bytes: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CriticConfig {
    /// Lint command run in the project root (e.g. `["cargo","clippy","-q"]`).
    pub lint_command: Option<Vec<String>>,
    pub lint_timeout_secs: u64,
    pub git_timeout_secs: u64,
    /// Accept a reviewer timeout when every acceptance check passed.
    pub auto_pass_on_reviewer_timeout: bool,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            lint_command: None,
            lint_timeout_secs: 60,
            git_timeout_secs: 15,
            auto_pass_on_reviewer_timeout: true,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_steps: 50,
            max_steps: 100,
            max_parallel_tasks: 1,
            subagent_max_turns: 15,
            skip_integration_tests: true,
            pytest_addopts: None,
            surgical_mode: false,
            surgical_paths: Vec::new(),
            domain: None,
            docs_update_interval: 10,
            checkpoint_interval: 5,
            max_checkpoints: 10,
            user_feedback_ttl: 5,
            max_replan_depth: 3,
            max_gap_analysis_attempts: 5,
            completion_confidence: COMPLETION_CONFIDENCE,
            job_poll_interval_secs: 30,
            agent: AgentConfig::default(),
            verification: VerificationConfig::default(),
            critic: CriticConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.min_steps > self.max_steps {
            return Err(anyhow!(
                "min_steps ({}) must be <= max_steps ({})",
                self.min_steps,
                self.max_steps
            ));
        }
        if self.max_parallel_tasks == 0 {
            return Err(anyhow!("max_parallel_tasks must be > 0"));
        }
        if !(1..=50).contains(&self.subagent_max_turns) {
            return Err(anyhow!("subagent_max_turns must be within 1..=50"));
        }
        if self.checkpoint_interval == 0 || self.docs_update_interval == 0 {
            return Err(anyhow!(
                "checkpoint_interval and docs_update_interval must be > 0"
            ));
        }
        if self.max_checkpoints == 0 {
            return Err(anyhow!("max_checkpoints must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.completion_confidence) {
            return Err(anyhow!("completion_confidence must be within 0..=1"));
        }
        if self.surgical_mode && self.surgical_paths.is_empty() {
            return Err(anyhow!("surgical_mode requires at least one surgical path"));
        }
        if self.agent.program.trim().is_empty() {
            return Err(anyhow!("agent.program must be non-empty"));
        }
        if self.agent.timeout_secs == 0 || self.agent.output_limit_bytes == 0 {
            return Err(anyhow!(
                "agent.timeout_secs and agent.output_limit_bytes must be > 0"
            ));
        }
        if self.verification.command_timeout_secs == 0 || self.verification.http_timeout_secs == 0
        {
            return Err(anyhow!("verification timeouts must be > 0"));
        }
        if let Some(lint) = &self.critic.lint_command
            && (lint.is_empty() || lint[0].trim().is_empty())
        {
            return Err(anyhow!("critic.lint_command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn reviewer_model(&self) -> &str {
        self.agent
            .reviewer_model
            .as_deref()
            .unwrap_or(&self.agent.model)
    }

    /// Whether pytest acceptance commands should run integration-marked tests.
    ///
    /// The environment variable wins over the config flag when it is set.
    pub fn run_integration_tests(&self) -> bool {
        match std::env::var(RUN_INTEGRATION_TESTS_ENV) {
            Ok(raw) => parse_truthy(&raw),
            Err(_) => !self.skip_integration_tests,
        }
    }
}

fn parse_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::store::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OrchestratorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = OrchestratorConfig::default();
        cfg.critic.lint_command = Some(vec!["cargo".to_string(), "clippy".to_string()]);
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_steps = 20\nmin_steps = 2\n[agent]\nmodel = \"opus\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_steps, 20);
        assert_eq!(cfg.agent.model, "opus");
        assert_eq!(cfg.agent.timeout_secs, 600);
        assert_eq!(cfg.reviewer_model(), "opus");
    }

    #[test]
    fn rejects_turn_budget_out_of_range() {
        let cfg = OrchestratorConfig {
            subagent_max_turns: 80,
            ..OrchestratorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn truthy_values() {
        assert!(parse_truthy(" Yes "));
        assert!(parse_truthy("1"));
        assert!(!parse_truthy("0"));
        assert!(!parse_truthy("nope"));
    }
}
