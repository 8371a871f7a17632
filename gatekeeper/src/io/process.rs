//! Helpers for running child processes with timeouts, cancellation and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;
use crate::core::digest::StreamDigest;
use crate::core::types::{EXIT_CODE_UNAVAILABLE, Termination, ToolResult};
use crate::error::{Error, Result};

/// How often a running child is checked for caller cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Minimum time to keep draining pipes once the child is gone. Grandchildren
/// that inherited the pipes can hold them open; their output is abandoned.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Limits applied to one child process.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

#[derive(Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: usize,
    digest: StreamDigest,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Run `cmd` under `limits`, capturing stdout and stderr into separate buffers.
///
/// Output is read concurrently while the child runs and `stdin` is fed from its
/// own thread, so neither side can deadlock on a full pipe. On timeout or
/// cancellation the child is killed and reaped before returning. A child that
/// cannot be spawned is reported as [`Termination::SpawnFailed`] rather than an
/// error; `Err` is reserved for failures of the plumbing itself.
///
/// The timeout also bounds draining: if a descendant keeps a pipe open after
/// the child exits, the run is reported as [`Termination::TimedOut`] once the
/// deadline (or the drain grace, whichever is later) passes. Digests in the
/// result cover every byte read, including bytes dropped by the output cap.
#[instrument(skip_all, fields(tool = label, timeout_secs = limits.timeout.as_secs()))]
pub fn run_command(
    label: &str,
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: RunLimits,
    cancel: &CancelToken,
) -> Result<ToolResult> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(err = %err, "failed to spawn command");
            return Ok(ToolResult::new(
                Vec::new(),
                format!("spawn {label}: {err}").into_bytes(),
                EXIT_CODE_UNAVAILABLE,
                Termination::SpawnFailed,
            ));
        }
    };

    let plumbing = |source: std::io::Error| Error::Process {
        tool: label.to_string(),
        source,
    };

    let stdin_handle = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| plumbing(std::io::Error::other("stdin was not piped")))?;
            let input = input.to_vec();
            // Dropping the pipe at the end of the thread closes the child's stdin.
            Some(thread::spawn(move || pipe.write_all(&input)))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| plumbing(std::io::Error::other("stdout was not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| plumbing(std::io::Error::other("stderr was not piped")))?;

    let deadline = Instant::now() + limits.timeout;
    let stdout_capture = SharedCapture::default();
    let stderr_capture = SharedCapture::default();
    let stdout_done = spawn_reader(stdout, limits.output_limit_bytes, stdout_capture.clone());
    let stderr_done = spawn_reader(stderr, limits.output_limit_bytes, stderr_capture.clone());

    let (status, termination) =
        wait_for_exit(&mut child, deadline, limits.timeout, cancel).map_err(plumbing)?;

    let now = Instant::now();
    let drain_until = match termination {
        Termination::Exited => now + deadline.saturating_duration_since(now).max(DRAIN_GRACE),
        _ => now + DRAIN_GRACE,
    };
    let (stdout, stdout_drained) =
        collect(stdout_done, &stdout_capture, drain_until).map_err(plumbing)?;
    let (stderr, stderr_drained) =
        collect(stderr_done, &stderr_capture, drain_until).map_err(plumbing)?;
    let abandoned = !(stdout_drained && stderr_drained);

    let termination = if abandoned && termination == Termination::Exited {
        warn!("a descendant held an output pipe past the timeout");
        Termination::TimedOut
    } else {
        termination
    };

    // After a kill the writer fails on its own once the pipe breaks; only wait on it for a
    // child that ran to completion.
    if let Some(handle) = stdin_handle.filter(|_| termination == Termination::Exited) {
        match handle.join() {
            Ok(Ok(())) => {}
            // A child that exits without reading all of its input is not a plumbing failure.
            Ok(Err(err)) => debug!(err = %err, "child closed stdin early"),
            Err(_) => return Err(plumbing(std::io::Error::other("stdin writer thread panicked"))),
        }
    }

    let truncated = abandoned || stdout.truncated > 0 || stderr.truncated > 0;
    if truncated {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            abandoned,
            "output truncated"
        );
    }

    let exit_code = match termination {
        Termination::Exited => status.code().unwrap_or(EXIT_CODE_UNAVAILABLE),
        _ => EXIT_CODE_UNAVAILABLE,
    };
    debug!(exit_code, ?termination, "command finished");
    Ok(ToolResult {
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_hash: stdout.digest.finish(),
        stderr_hash: stderr.digest.finish(),
        truncated,
        exit_code,
        termination,
    })
}

/// Wait for `child` to exit, killing and reaping it on timeout or cancellation.
fn wait_for_exit(
    child: &mut Child,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancelToken,
) -> std::io::Result<(ExitStatus, Termination)> {
    loop {
        if cancel.is_cancelled() {
            warn!("task cancelled, killing command");
            return Ok((kill_and_reap(child)?, Termination::Cancelled));
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            return Ok((kill_and_reap(child)?, Termination::TimedOut));
        }
        let slice = (deadline - now).min(CANCEL_POLL_INTERVAL);
        if let Some(status) = child.wait_timeout(slice)? {
            return Ok((status, Termination::Exited));
        }
    }
}

fn kill_and_reap(child: &mut Child) -> std::io::Result<ExitStatus> {
    child.kill()?;
    child.wait()
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    sink: SharedCapture,
) -> Receiver<std::io::Result<()>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_stream_limited(reader, limit, &sink));
    });
    rx
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    sink: &SharedCapture,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        let mut capture = sink.lock().unwrap_or_else(PoisonError::into_inner);
        capture.digest.update(&chunk[..n]);
        let remaining = limit.saturating_sub(capture.bytes.len());
        let keep = n.min(remaining);
        capture.bytes.extend_from_slice(&chunk[..keep]);
        capture.truncated += n - keep;
    }
}

/// Wait until `until` for a reader to finish and take what it captured.
///
/// The flag is false when the reader was abandoned with the pipe still open.
fn collect(
    done: Receiver<std::io::Result<()>>,
    sink: &SharedCapture,
    until: Instant,
) -> std::io::Result<(Capture, bool)> {
    let drained = match done.recv_timeout(until.saturating_duration_since(Instant::now())) {
        Ok(result) => {
            result?;
            true
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!("output pipe still open, keeping partial output");
            false
        }
        Err(RecvTimeoutError::Disconnected) => {
            return Err(std::io::Error::other("output reader thread panicked"));
        }
    };
    let mut capture = sink.lock().unwrap_or_else(PoisonError::into_inner);
    Ok((std::mem::take(&mut *capture), drained))
}
