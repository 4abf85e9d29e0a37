//! Out-of-band long-running jobs.
//!
//! Jobs move through `history/jobs/{queue,running,completed}` as JSON metadata
//! files. The orchestrator starts queued jobs and polls running ones once per
//! loop iteration; each finished job appends an experiment record to
//! `history/experiments.jsonl`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::store::{new_id, read_json, write_json_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// Killed after exceeding its timeout; distinct from `Failed`.
    Timeout,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        }
    }
}

/// Metadata file for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub run_name: String,
    pub command: String,
    pub workdir: PathBuf,
    pub log_file: PathBuf,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
    pub status: JobStatus,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub return_code: Option<i32>,
}

/// Parameters for [`JobManager::schedule`].
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    pub command: String,
    pub workdir: PathBuf,
    pub task_id: Option<String>,
    pub run_name: Option<String>,
    pub timeout_secs: Option<u64>,
    pub notes: Option<String>,
    pub metrics_file: Option<PathBuf>,
}

/// One line of `experiments.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub run_name: String,
    pub command: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub status: JobStatus,
    pub return_code: Option<i32>,
    pub log_path: String,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

struct RunningJob {
    metadata_path: PathBuf,
    record: JobRecord,
    child: Child,
    started: Instant,
}

pub struct JobManager {
    queue_dir: PathBuf,
    running_dir: PathBuf,
    completed_dir: PathBuf,
    logs_dir: PathBuf,
    experiments_path: PathBuf,
    running: Mutex<HashMap<String, RunningJob>>,
}

impl JobManager {
    /// Open the job directories under `jobs_dir`, creating them if needed.
    pub fn new(jobs_dir: &Path, experiments_path: impl Into<PathBuf>) -> Result<Self> {
        let manager = Self {
            queue_dir: jobs_dir.join("queue"),
            running_dir: jobs_dir.join("running"),
            completed_dir: jobs_dir.join("completed"),
            logs_dir: jobs_dir.join("logs"),
            experiments_path: experiments_path.into(),
            running: Mutex::new(HashMap::new()),
        };
        for dir in [
            &manager.queue_dir,
            &manager.running_dir,
            &manager.completed_dir,
            &manager.logs_dir,
        ] {
            fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(manager)
    }

    /// Enqueue a job; it starts on the next [`JobManager::process_queue`].
    pub fn schedule(&self, spec: JobSpec) -> Result<JobRecord> {
        if spec.command.trim().is_empty() {
            return Err(anyhow!("job command must be non-empty"));
        }
        let job_id = new_id("job");
        let run_name = spec.run_name.unwrap_or_else(|| job_id.clone());
        let stamp = Local::now().format("%Y-%m-%d--%H-%M-%S");
        let log_file = self
            .logs_dir
            .join(format!("{stamp}_{}.log", run_name.replace(' ', "_")));
        let record = JobRecord {
            job_id: job_id.clone(),
            task_id: spec.task_id,
            run_name,
            command: spec.command,
            workdir: spec.workdir,
            log_file,
            timeout: spec.timeout_secs,
            notes: spec.notes,
            metrics_file: spec.metrics_file,
            status: JobStatus::Queued,
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            finished_at: None,
            pid: None,
            return_code: None,
        };
        write_json_atomic(&self.queue_dir.join(format!("{job_id}.json")), &record)?;
        info!(job_id = %record.job_id, "job queued");
        Ok(record)
    }

    /// Start every queued job. Returns the ids started.
    #[instrument(skip_all)]
    pub fn process_queue(&self) -> Result<Vec<String>> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| anyhow!("job table lock poisoned"))?;
        let mut started = Vec::new();
        for request in json_files(&self.queue_dir) {
            let mut record: JobRecord = match read_json(&request) {
                Ok(record) => record,
                Err(err) => {
                    warn!(path = %request.display(), err = %format!("{err:#}"), "skipping unreadable job request");
                    continue;
                }
            };
            let child = match spawn_job(&record) {
                Ok(child) => child,
                Err(err) => {
                    warn!(job_id = %record.job_id, err = %format!("{err:#}"), "failed to start job");
                    record.status = JobStatus::Failed;
                    record.finished_at = Some(Utc::now().to_rfc3339());
                    self.finalize(&request, &record)?;
                    continue;
                }
            };
            record.status = JobStatus::Running;
            record.started_at = Some(Utc::now().to_rfc3339());
            record.pid = Some(child.id());
            let metadata_path = self.running_dir.join(file_name(&request));
            write_json_atomic(&metadata_path, &record)?;
            fs::remove_file(&request).with_context(|| format!("remove {}", request.display()))?;
            info!(job_id = %record.job_id, pid = child.id(), "job started");
            started.push(record.job_id.clone());
            running.insert(
                record.job_id.clone(),
                RunningJob {
                    metadata_path,
                    record,
                    child,
                    started: Instant::now(),
                },
            );
        }
        Ok(started)
    }

    /// Finalize finished jobs and kill ones past their timeout.
    #[instrument(skip_all)]
    pub fn poll(&self) -> Result<Vec<JobRecord>> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| anyhow!("job table lock poisoned"))?;
        let mut finished_ids = Vec::new();
        for (job_id, job) in &mut *running {
            let expired = job
                .record
                .timeout
                .is_some_and(|secs| job.started.elapsed() > Duration::from_secs(secs));
            match job.child.try_wait() {
                Ok(Some(status)) => {
                    job.record.return_code = status.code();
                    job.record.status = if status.success() {
                        JobStatus::Completed
                    } else {
                        JobStatus::Failed
                    };
                }
                Ok(None) if expired => {
                    warn!(job_id = %job_id, "job exceeded timeout, killing");
                    if let Err(err) = job.child.kill() {
                        warn!(job_id = %job_id, err = %err, "failed to kill job");
                    }
                    if let Err(err) = job.child.wait() {
                        warn!(job_id = %job_id, err = %err, "failed to reap killed job");
                    }
                    job.record.status = JobStatus::Timeout;
                    job.record.return_code = None;
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(job_id = %job_id, err = %err, "failed to poll job");
                    continue;
                }
            }
            job.record.finished_at = Some(Utc::now().to_rfc3339());
            finished_ids.push(job_id.clone());
        }

        let mut finished = Vec::new();
        for job_id in finished_ids {
            if let Some(job) = running.remove(&job_id) {
                self.finalize(&job.metadata_path, &job.record)?;
                finished.push(job.record);
            }
        }
        Ok(finished)
    }

    /// Jobs for `task_id` still queued or running in this process.
    pub fn has_pending_jobs(&self, task_id: &str) -> bool {
        let queued = json_files(&self.queue_dir).into_iter().any(|path| {
            read_json::<JobRecord>(&path)
                .is_ok_and(|record| record.task_id.as_deref() == Some(task_id))
        });
        if queued {
            return true;
        }
        self.running.lock().is_ok_and(|running| {
            running
                .values()
                .any(|job| job.record.task_id.as_deref() == Some(task_id))
        })
    }

    /// Drive the queue until no job for `task_id` is pending, sleeping
    /// `poll_interval` between rounds.
    pub fn wait_for_task_jobs(&self, task_id: &str, poll_interval: Duration) -> Result<()> {
        if !self.has_pending_jobs(task_id) {
            return Ok(());
        }
        info!(task_id, "waiting for long-running jobs");
        loop {
            self.process_queue()?;
            self.poll()?;
            if !self.has_pending_jobs(task_id) {
                break;
            }
            thread::sleep(poll_interval);
        }
        info!(task_id, "long-running jobs finished");
        Ok(())
    }

    /// Most recently completed jobs, newest first.
    pub fn list_recent_jobs(&self, limit: usize) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = json_files(&self.completed_dir)
            .iter()
            .filter_map(|path| read_json(path).ok())
            .collect();
        records.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        records.truncate(limit);
        records
    }

    fn finalize(&self, metadata_path: &Path, record: &JobRecord) -> Result<()> {
        write_json_atomic(&self.completed_dir.join(file_name(metadata_path)), record)?;
        if metadata_path.exists() {
            fs::remove_file(metadata_path)
                .with_context(|| format!("remove {}", metadata_path.display()))?;
        }
        self.append_experiment(record)?;
        info!(job_id = %record.job_id, status = ?record.status, "job finished");
        Ok(())
    }

    fn append_experiment(&self, record: &JobRecord) -> Result<()> {
        let metrics = record.metrics_file.as_deref().and_then(|path| {
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                record.workdir.join(path)
            };
            match read_json::<Value>(&path) {
                Ok(value) => Some(value),
                Err(err) => {
                    debug!(err = %format!("{err:#}"), "metrics unavailable");
                    None
                }
            }
        });
        let experiment = ExperimentRecord {
            run_name: record.run_name.clone(),
            command: record.command.clone(),
            started_at: record.started_at.clone(),
            finished_at: record.finished_at.clone(),
            status: record.status,
            return_code: record.return_code,
            log_path: record.log_file.display().to_string(),
            metrics,
            notes: record.notes.clone(),
        };
        let mut line = serde_json::to_string(&experiment).context("serialize experiment")?;
        line.push('\n');
        if let Some(parent) = self.experiments_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.experiments_path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("append {}", self.experiments_path.display()))
    }
}

fn spawn_job(record: &JobRecord) -> Result<Child> {
    if let Some(parent) = record.log_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut log = File::create(&record.log_file)
        .with_context(|| format!("create job log {}", record.log_file.display()))?;
    writeln!(log, "$ {}\n", record.command).context("write job log header")?;
    let stderr = log.try_clone().context("clone job log handle")?;
    Command::new("sh")
        .arg("-c")
        .arg(&record.command)
        .current_dir(&record.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(stderr))
        .spawn()
        .with_context(|| format!("spawn job {}", record.job_id))
}

fn json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

fn file_name(path: &Path) -> PathBuf {
    path.file_name().map(PathBuf::from).unwrap_or_default()
}
