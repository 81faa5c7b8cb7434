//! Blocking child-process execution with an optional deadline

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Exit code reserved for failures that never reached the remote side
/// (spawn errors, timeouts, dropped connections).
pub const TRANSPORT_FAILURE_EXIT_CODE: i32 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait for output after a timed-out child is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Result of running a command, local or remote.
///
/// A non-zero `exit_code` is a normal outcome the caller branches on, not an
/// error. `TRANSPORT_FAILURE_EXIT_CODE` marks failures of the channel itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::new(TRANSPORT_FAILURE_EXIT_CODE, "", reason)
    }

    pub fn from_output(output: &Output) -> Self {
        Self {
            exit_code: output.status.code().unwrap_or(TRANSPORT_FAILURE_EXIT_CODE),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn is_transport_failure(&self) -> bool {
        self.exit_code == TRANSPORT_FAILURE_EXIT_CODE
    }
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
///
/// Never returns an error: spawn failures and timeouts come back as an
/// `ExecOutput` with `TRANSPORT_FAILURE_EXIT_CODE` and the reason in stderr.
pub fn run_with_timeout(mut cmd: Command, timeout: Option<Duration>) -> ExecOutput {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group, so a timeout also reaches grandchildren such as
    // docker's buildx plugin.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!("Failed to spawn {}: {}", program, e);
            return ExecOutput::failure(format!("Failed to run {}: {}", program, e));
        }
    };

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match timeout {
        Some(limit) => wait_with_deadline(&mut child, limit),
        None => child.wait().map(Some),
    };

    // After a kill, descendants that escaped the group may still hold the
    // pipes open.
    let grace = match status {
        Ok(None) => Some(DRAIN_GRACE),
        _ => None,
    };
    let stdout = collect(stdout, grace);
    let stderr = collect(stderr, grace);

    match status {
        Ok(Some(status)) => ExecOutput {
            exit_code: exit_code_of(status),
            stdout,
            stderr,
        },
        Ok(None) => {
            let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
            tracing::debug!("{} timed out after {:.1}s", program, secs);
            ExecOutput {
                exit_code: TRANSPORT_FAILURE_EXIT_CODE,
                stdout,
                stderr: format!("Command timed out after {:.1}s", secs),
            }
        }
        Err(e) => ExecOutput::failure(format!("Failed waiting for {}: {}", program, e)),
    }
}

fn wait_with_deadline(
    child: &mut Child,
    limit: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            kill_tree(child);
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        tracing::debug!("killpg {} failed: {}", pgid, e);
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

/// Join a reader thread. With a `grace` limit, give up and return what is
/// known (nothing) once it passes; the thread ends when the pipe closes.
fn collect(handle: Option<JoinHandle<String>>, grace: Option<Duration>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    if let Some(grace) = grace {
        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return String::new();
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
    handle.join().unwrap_or_default()
}

fn exit_code_of(status: ExitStatus) -> i32 {
    // Killed by a signal: no code, report as a transport failure.
    status.code().unwrap_or(TRANSPORT_FAILURE_EXIT_CODE)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn test_run_captures_stdout_and_exit_code() {
        let out = run_with_timeout(sh("echo hello; echo oops >&2; exit 3"), None);
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.success());
        assert!(!out.is_transport_failure());
    }

    #[test]
    fn test_run_within_deadline_succeeds() {
        let out = run_with_timeout(sh("echo fast"), Some(Duration::from_secs(10)));
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "fast");
    }

    #[test]
    fn test_run_timeout_returns_transport_failure() {
        let started = Instant::now();
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let out = run_with_timeout(cmd, Some(Duration::from_millis(200)));
        assert!(out.is_transport_failure());
        assert!(out.stderr.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_is_not_held_up_by_grandchildren() {
        let started = Instant::now();
        let out = run_with_timeout(sh("sleep 6; echo done"), Some(Duration::from_millis(300)));
        assert!(out.is_transport_failure());
        assert!(!out.stdout.contains("done"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_timeout_with_background_pipe_holder() {
        let started = Instant::now();
        let out = run_with_timeout(sh("(sleep 6 &) ; sleep 6"), Some(Duration::from_millis(300)));
        assert!(out.is_transport_failure());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_run_missing_program_is_transport_failure() {
        let out = run_with_timeout(Command::new("definitely-not-a-real-binary-xyz"), None);
        assert_eq!(out.exit_code, TRANSPORT_FAILURE_EXIT_CODE);
        assert!(out.stderr.contains("definitely-not-a-real-binary-xyz"));
    }
}
