//! Child processes with timeouts and bounded output.
//!
//! Every subprocess the orchestrator starts (agent CLI, acceptance commands,
//! git, lint, evaluator test suites) goes through [`run_command_with_timeout`]
//! or [`run_command_with_stream`], so a hung child can never stall the loop.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Trimmed stderr, or trimmed stdout when stderr is empty.
    pub fn diagnostic_text(&self) -> String {
        let stderr = self.stderr_text();
        if stderr.trim().is_empty() {
            self.stdout_text().trim().to_string()
        } else {
            stderr.trim().to_string()
        }
    }

    pub fn truncated_notice(&self, label: &str) -> String {
        let mut notice = String::new();
        if self.stdout_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if self.stderr_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        notice
    }
}

/// Build `sh -c <script>` running in `cwd`.
pub fn shell_command(script: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script).current_dir(cwd);
    cmd
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    run_inner(cmd, stdin, timeout, output_limit_bytes, None)
}

/// Like [`run_command_with_timeout`], additionally teeing each stdout line to `stream_path`.
///
/// The file is flushed per line so a trace can be tailed while the child runs.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes, stream = %stream_path.display()))]
pub fn run_command_with_stream(
    cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    stream_path: &Path,
) -> Result<CommandOutput> {
    if let Some(parent) = stream_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    let file = File::create(stream_path)
        .with_context(|| format!("create stream file {}", stream_path.display()))?;
    run_inner(
        cmd,
        stdin,
        timeout,
        output_limit_bytes,
        Some(Mutex::new(BufWriter::new(file))),
    )
}

fn run_inner(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    tee: Option<Mutex<BufWriter<File>>>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || match tee {
        Some(writer) => read_lines_limited_with_tee(stdout, output_limit_bytes, &writer),
        None => read_stream_limited(stdout, output_limit_bytes),
    });
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn keep_limited(buf: &mut Vec<u8>, chunk: &[u8], limit: usize) -> usize {
    let remaining = limit.saturating_sub(buf.len());
    let keep = chunk.len().min(remaining);
    buf.extend_from_slice(&chunk[..keep]);
    chunk.len() - keep
}

fn read_lines_limited_with_tee<R: Read>(
    reader: R,
    limit: usize,
    tee: &Mutex<BufWriter<File>>,
) -> Result<(Vec<u8>, usize)> {
    let mut reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            break;
        }
        if let Ok(mut writer) = tee.lock() {
            if let Err(e) = writer.write_all(&line) {
                warn!(err = %e, "failed to write to stream file");
            } else if let Err(e) = writer.flush() {
                warn!(err = %e, "failed to flush stream file");
            }
        }
        truncated += keep_limited(&mut collected, &line, limit);
    }

    Ok((collected, truncated))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        truncated += keep_limited(&mut buf, &chunk[..n], limit);
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_exit_code_and_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("echo out; echo err >&2; exit 3", temp.path());
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(10), 1024).expect("run");
        assert_eq!(output.exit_code(), Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout_text().trim(), "out");
        assert_eq!(output.diagnostic_text(), "err");
    }

    #[test]
    fn kills_on_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("sleep 5", temp.path());
        let output =
            run_command_with_timeout(cmd, None, Duration::from_millis(200), 1024).expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn truncates_beyond_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = shell_command("printf '0123456789'", temp.path());
        let output = run_command_with_timeout(cmd, None, Duration::from_secs(10), 4).expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.truncated_notice("x").contains("truncated 6 bytes"));
    }

    #[test]
    fn stream_tees_stdout_to_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stream = temp.path().join("logs/trace.log");
        let cmd = shell_command("echo one; echo two", temp.path());
        let output = run_command_with_stream(cmd, None, Duration::from_secs(10), 1024, &stream)
            .expect("run");
        assert!(output.success());
        let teed = std::fs::read_to_string(&stream).expect("read stream");
        assert_eq!(teed, "one\ntwo\n");
    }
}
