//! Blocking engine process execution with an optional deadline

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn, Span};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured result of a finished engine command
#[derive(Debug, Clone)]
pub(crate) struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug)]
pub(crate) enum RunError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    TimedOut(Duration),
}

/// Run `cmd` to completion, capturing both streams.
///
/// With a timeout, the child gets SIGTERM once the deadline passes, then
/// `grace` to exit before it is killed outright.
pub(crate) fn run(
    mut cmd: Command,
    timeout: Option<Duration>,
    grace: Duration,
) -> Result<CommandOutput, RunError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(RunError::Spawn)?;
    debug!(pid = child.id(), "engine process started");

    let stdout = child.stdout.take().map(|pipe| drain(pipe, "stdout"));
    let stderr = child.stderr.take().map(|pipe| drain(pipe, "stderr"));

    let status = match timeout {
        None => child.wait().map_err(RunError::Wait)?,
        Some(limit) => match wait_until(&mut child, start + limit).map_err(RunError::Wait)? {
            Some(status) => status,
            None => {
                warn!(pid = child.id(), "engine process exceeded {:?}, stopping it", limit);
                terminate(&mut child, grace);
                // Reader threads are left to finish on their own: a grandchild
                // may still hold the pipes open.
                return Err(RunError::TimedOut(limit));
            }
        },
    };

    Ok(CommandOutput {
        exit_code: status.code(),
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
        duration: start.elapsed(),
    })
}

/// Poll until the child exits or `deadline` passes
fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn terminate(child: &mut Child, grace: Duration) {
    // Try graceful shutdown first so the engine can release its state lock
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Ok(raw) = i32::try_from(child.id()) {
            if kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok() {
                if let Ok(Some(_)) = wait_until(child, Instant::now() + grace) {
                    return;
                }
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R>(pipe: R, stream: &'static str) -> JoinHandle<String>
where
    R: Read + Send + 'static,
{
    let span = Span::current();
    thread::spawn(move || {
        let _entered = span.enter();
        let mut reader = BufReader::new(pipe);
        let mut captured = String::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    debug!(stream, "{}", text.trim_end());
                    captured.push_str(&text);
                }
                Err(e) => {
                    warn!("failed reading engine {}: {}", stream, e);
                    break;
                }
            }
        }
        captured
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
