//! Running child processes with timeouts and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::Step;
use crate::error::StepError;

/// Bytes of stderr kept in failure messages.
pub const STDERR_TAIL_BYTES: usize = 2_000;

/// How long to wait for the output pipes to close after a timed-out child was killed.
const KILLED_OUTPUT_GRACE: Duration = Duration::from_secs(1);

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
    /// Turn a timeout or non-zero exit into a [`StepError`].
    pub fn ensure_success(self, step: Step, command: &str, timeout: Duration) -> Result<Self> {
        if self.timed_out {
            return Err(StepError::TimedOut {
                step,
                command: command.to_string(),
                timeout_secs: timeout.as_secs(),
            }
            .into());
        }
        if !self.status.success() {
            return Err(StepError::ExitStatus {
                step,
                command: command.to_string(),
                status: self.status.to_string(),
                stderr: tail_lossy(&self.stderr, STDERR_TAIL_BYTES),
            }
            .into());
        }
        Ok(self)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Human-readable command line for logs and errors.
pub fn describe_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    crate::core::plan::render_command(&parts)
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory; bytes beyond it are drained and counted, then discarded.
///
/// On unix the child leads its own process group and a timeout kills the whole group, so
/// wrappers such as `npm run` cannot leave the real work running. Output still held open by
/// an escaped descendant is abandoned after a short grace period.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    debug!(command = %describe_command(&cmd), "spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
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
            kill_process_tree(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated, stderr, stderr_truncated) = if timed_out {
        let deadline = Instant::now() + KILLED_OUTPUT_GRACE;
        let (stdout, stdout_truncated) =
            join_output_until(stdout_handle, deadline).context("join stdout")?;
        let (stderr, stderr_truncated) =
            join_output_until(stderr_handle, deadline).context("join stderr")?;
        (stdout, stdout_truncated, stderr, stderr_truncated)
    } else {
        let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
        let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;
        (stdout, stdout_truncated, stderr, stderr_truncated)
    };

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

/// Run a command for `step` and fail unless it exits successfully in time.
///
/// Failures to start or wait on the child (e.g. the program is not installed) map to
/// [`StepError::Spawn`].
pub fn run_step_command(
    step: Step,
    cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let command = describe_command(&cmd);
    let output = run_command_with_timeout(cmd, timeout, output_limit_bytes).map_err(|err| {
        StepError::Spawn {
            step,
            command: command.clone(),
            message: format!("{err:#}"),
        }
    })?;
    output.ensure_success(step, &command, timeout)
}

/// Last `max` bytes of `bytes` as trimmed, lossily-decoded text.
pub fn tail_lossy(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(err = %err, "killing process group failed, killing child only");
            child.kill().context("kill command")
        }
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

type ReaderHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

fn join_output(handle: ReaderHandle) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Join a reader unless the pipe is still open at `deadline`; the reader is then detached.
fn join_output_until(handle: ReaderHandle, deadline: Instant) -> Result<(Vec<u8>, usize)> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("output pipe still open after kill, discarding captured output");
            return Ok((Vec::new(), 0));
        }
        thread::sleep(Duration::from_millis(20));
    }
    join_output(handle)
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
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_stream_limited_counts_truncated_bytes() {
        let input = vec![b'x'; 10_000];
        let (buf, truncated) = read_stream_limited(&input[..], 4_096).expect("read");
        assert_eq!(buf.len(), 4_096);
        assert_eq!(truncated, 10_000 - 4_096);
    }

    #[test]
    fn tail_keeps_last_bytes() {
        assert_eq!(tail_lossy(b"  hello world \n", 7), "world");
        assert_eq!(tail_lossy(b"abc", 100), "abc");
    }

    #[test]
    fn describe_command_quotes_args() {
        let mut cmd = Command::new("npm");
        cmd.args(["run", "build site"]);
        assert_eq!(describe_command(&cmd), "npm run 'build site'");
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let cmd = Command::new("deployer-test-no-such-program");
        let err = run_step_command(Step::Install, cmd, Duration::from_secs(5), 1_000)
            .expect_err("spawn should fail");
        let step_err = err.downcast_ref::<StepError>().expect("step error");
        assert!(matches!(step_err, StepError::Spawn { .. }));
        assert_eq!(step_err.step(), Step::Install);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_reported_with_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);
        let err = run_step_command(Step::Build, cmd, Duration::from_secs(10), 1_000)
            .expect_err("should fail");
        let message = err.to_string();
        assert!(message.contains("build failed"), "{message}");
        assert!(message.contains("broken"), "{message}");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 5"]);
        let output =
            run_command_with_timeout(cmd, Duration::from_millis(200), 1_000).expect("run");
        assert!(output.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_grandchildren_holding_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 4; true"]);
        let started = Instant::now();
        let output =
            run_command_with_timeout(cmd, Duration::from_millis(200), 1_000).expect("run");
        assert!(output.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "took {:?}",
            started.elapsed()
        );
    }

    #[cfg(unix)]
    #[test]
    fn success_captures_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf ok"]);
        let output =
            run_step_command(Step::Clone, cmd, Duration::from_secs(10), 1_000).expect("run");
        assert_eq!(output.stdout_lossy(), "ok");
    }
}
