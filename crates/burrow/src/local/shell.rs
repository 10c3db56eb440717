//! Shell command execution with cancellation and timeout.
//!
//! Commands run under `sh -c` in their own process group so that
//! termination reaches the whole tree. Stdout and stderr are read
//! concurrently and interleaved into one buffer in arrival order; each
//! fragment is also forwarded to the caller's output channel when one is
//! configured.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::warn;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::ExecResult;
use crate::exec::{BashOptions, OutputChunk};
use burrow_protocol::{BashResult, StreamSource};

/// Grace between SIGTERM and SIGKILL after a timeout or cancellation.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Bound on waiting for a finished process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `command` with `cwd` as working directory.
///
/// Timeout expiry and cancellation both terminate the process group and
/// still resolve to a [`BashResult`] (non-zero exit code, `timed_out` set
/// for timeouts) within a bounded grace period.
pub(crate) async fn run(
    cwd: &Path,
    command: &str,
    opts: BashOptions,
    cancel: &CancellationToken,
) -> ExecResult<BashResult> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let pid = child.id();

    let (tx, mut rx) = mpsc::unbounded_channel::<OutputChunk>();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, StreamSource::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, StreamSource::Stderr, tx.clone());
    }
    drop(tx);

    let timeout_at = opts.timeout.map(|d| Instant::now() + d);
    let mut kill_at: Option<Instant> = None;
    let mut output = String::new();
    let mut timed_out = false;
    let mut cancelled = false;

    // Drain output until both pipes close; a fired timeout or cancellation
    // terminates the process group and lets the drain finish naturally.
    loop {
        let stopping = timed_out || cancelled;
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(chunk) => {
                    output.push_str(&chunk.data);
                    if let Some(sink) = &opts.output {
                        let _ = sink.send(chunk);
                    }
                }
                None => break,
            },
            _ = cancel.cancelled(), if !stopping => {
                cancelled = true;
                terminate(pid, libc::SIGTERM);
                kill_at = Some(Instant::now() + TERM_GRACE);
            }
            _ = sleep_until(timeout_at.unwrap_or_else(far_future)),
                if timeout_at.is_some() && !stopping =>
            {
                timed_out = true;
                terminate(pid, libc::SIGTERM);
                kill_at = Some(Instant::now() + TERM_GRACE);
            }
            _ = sleep_until(kill_at.unwrap_or_else(far_future)), if kill_at.is_some() => {
                terminate(pid, libc::SIGKILL);
                kill_at = None;
            }
        }
    }

    // Reap the child (prevents zombies); escalate if it ignores SIGTERM.
    let status = match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!("command did not exit after termination, sending SIGKILL");
            terminate(pid, libc::SIGKILL);
            child.wait().await?
        }
    };

    let mut exit_code = exit_code_of(&status);
    if (timed_out || cancelled) && exit_code == 0 {
        // The process won the race against the kill signal; a stopped
        // command still must not report success.
        exit_code = 124;
    }

    Ok(BashResult::new(output, exit_code, timed_out))
}

fn spawn_reader<R>(mut reader: R, source: StreamSource, tx: mpsc::UnboundedSender<OutputChunk>)
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = OutputChunk {
                        data: String::from_utf8_lossy(&buf[..n]).into_owned(),
                        source: Some(source),
                    };
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}

#[cfg(unix)]
fn terminate(pid: Option<u32>, signal: libc::c_int) {
    if let Some(pid) = pid {
        // The child leads its own process group; signal the whole tree.
        unsafe {
            libc::killpg(pid as libc::pid_t, signal);
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>, _signal: i32) {}

fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        return 128 + status.signal().unwrap_or(1);
    }
    #[cfg(not(unix))]
    1
}
