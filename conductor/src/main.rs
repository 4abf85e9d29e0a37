//! Goal-driven orchestrator for an external coding agent.
//!
//! Keeps its state in a workspace directory (`.orchestrator` by default):
//! config, task and goal stores, operator notes, the event log, checkpoints
//! and the out-of-band job queue.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use conductor::evaluators::EvaluatorRegistry;
use conductor::exit_codes;
use conductor::io::agent::CliAgent;
use conductor::io::config::load_config;
use conductor::io::init::{InitOptions, WorkspacePaths, init_workspace};
use conductor::io::jobs::{JobManager, JobSpec};
use conductor::io::verify::Verifier;
use conductor::logging;
use conductor::orchestrator::Orchestrator;

const DEFAULT_WORKSPACE: &str = ".orchestrator";

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Goal-driven Planner/Actor/Critic loop over an external coding agent"
)]
struct Cli {
    /// Raise log output to info for this crate (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the workspace skeleton (config, stores, notes files).
    Init {
        #[arg(long, default_value = DEFAULT_WORKSPACE)]
        workspace: PathBuf,
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the orchestration loop until a definite outcome.
    Run(RunArgs),
    /// Enqueue a long-running command as an out-of-band job.
    Experiment(ExperimentArgs),
    /// List recently finished jobs, newest first.
    Jobs {
        #[arg(long, default_value = DEFAULT_WORKSPACE)]
        workspace: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long, default_value = DEFAULT_WORKSPACE)]
    workspace: PathBuf,
    /// Completion is not checked before this step.
    #[arg(long)]
    min_steps: Option<u64>,
    #[arg(long)]
    max_steps: Option<u64>,
    /// Tasks dispatched concurrently per iteration.
    #[arg(long)]
    parallel: Option<usize>,
    /// Restrict agent edits to these paths (enables surgical mode).
    #[arg(long = "surgical-path")]
    surgical_paths: Vec<String>,
}

#[derive(clap::Args)]
struct ExperimentArgs {
    /// Shell command to run.
    #[arg(long)]
    command: String,
    #[arg(long, default_value = DEFAULT_WORKSPACE)]
    workspace: PathBuf,
    #[arg(long)]
    task_id: Option<String>,
    #[arg(long)]
    run_name: Option<String>,
    /// Seconds before the job is killed.
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    notes: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    if let Err(err) = run(cli.command) {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::SETUP_ERROR);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Init { workspace, force } => cmd_init(&workspace, force),
        Command::Run(args) => cmd_run(args),
        Command::Experiment(args) => cmd_experiment(args),
        Command::Jobs { workspace, limit } => cmd_jobs(&workspace, limit),
    }
}

fn cmd_init(workspace: &Path, force: bool) -> Result<()> {
    let paths = init_workspace(workspace, &InitOptions { force })?;
    println!("initialized {}", paths.workspace.display());
    Ok(())
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let paths = WorkspacePaths::absolute(&args.workspace)?;
    paths.ensure_ready()?;
    let mut config = load_config(&paths.config_path)?;
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    match args.min_steps {
        Some(min_steps) => config.min_steps = min_steps,
        None => config.min_steps = config.min_steps.min(config.max_steps),
    }
    if let Some(parallel) = args.parallel {
        config.max_parallel_tasks = parallel;
    }
    if !args.surgical_paths.is_empty() {
        config.surgical_mode = true;
        config.surgical_paths = args.surgical_paths;
    }
    config.validate().context("invalid run options")?;

    let agent = CliAgent::new(&config.agent, &paths.agent_logs_dir);
    let checks = Verifier::from_config(&config);
    let evaluators = EvaluatorRegistry::new(&paths.project_root);
    let mut orchestrator = Orchestrator::new(paths, config, &agent, &checks, evaluators)?;
    let summary = orchestrator.run()?;

    println!("outcome: {}", summary.reason);
    println!("steps: {}", summary.steps);
    println!("completed: {}", summary.completed);
    println!("failed: {}", summary.failed);
    println!("backlog: {}", summary.backlog);
    Ok(())
}

fn cmd_experiment(args: ExperimentArgs) -> Result<()> {
    let paths = WorkspacePaths::absolute(&args.workspace)?;
    paths.ensure_ready()?;
    let jobs = JobManager::new(&paths.jobs_dir, &paths.experiments_path)?;
    let record = jobs.schedule(JobSpec {
        command: args.command,
        workdir: paths.project_root.clone(),
        task_id: args.task_id,
        run_name: args.run_name,
        timeout_secs: args.timeout,
        notes: args.notes,
        metrics_file: None,
    })?;
    println!("{}", record.job_id);
    Ok(())
}

fn cmd_jobs(workspace: &Path, limit: usize) -> Result<()> {
    let paths = WorkspacePaths::absolute(workspace)?;
    paths.ensure_ready()?;
    let jobs = JobManager::new(&paths.jobs_dir, &paths.experiments_path)?;
    for record in jobs.list_recent_jobs(limit) {
        let code = record
            .return_code
            .map_or_else(|| "-".to_string(), |code| code.to_string());
        println!(
            "{}\t{}\t{}\t{}",
            record.job_id,
            record.status.as_str(),
            code,
            record.run_name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_overrides() {
        let cli = Cli::parse_from([
            "conductor",
            "run",
            "--max-steps",
            "5",
            "--parallel",
            "2",
            "--surgical-path",
            "src/lib.rs",
            "--surgical-path",
            "tests",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.workspace, PathBuf::from(DEFAULT_WORKSPACE));
        assert_eq!(args.max_steps, Some(5));
        assert_eq!(args.min_steps, None);
        assert_eq!(args.parallel, Some(2));
        assert_eq!(args.surgical_paths, vec!["src/lib.rs", "tests"]);
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["conductor", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn parse_jobs_limit() {
        let cli = Cli::parse_from(["conductor", "jobs", "--limit", "3"]);
        assert!(matches!(cli.command, Command::Jobs { limit: 3, .. }));
    }

    #[test]
    fn experiment_requires_command() {
        assert!(Cli::try_parse_from(["conductor", "experiment"]).is_err());
    }
}
