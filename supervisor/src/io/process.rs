//! Child process helpers: streamed stdout with idle/total deadlines and bounded stderr.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

const READ_CHUNK_BYTES: usize = 8192;
/// How long to wait for stderr to close once the child has exited or been killed.
/// A grandchild can keep the pipe open indefinitely.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Result of a streamed child process.
#[derive(Debug)]
pub struct StreamOutput {
    pub status: ExitStatus,
    pub stderr: Vec<u8>,
    pub stderr_truncated: usize,
    /// Killed because the total deadline elapsed.
    pub timed_out: bool,
    /// Killed because stdout stayed silent for longer than the idle timeout.
    pub idle_timed_out: bool,
}

impl StreamOutput {
    pub fn stderr_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).into_owned();
        if self.stderr_truncated > 0 {
            text.push_str(&format!("\n[stderr truncated {} bytes]", self.stderr_truncated));
        }
        text
    }
}

/// Run a command, handing each stdout chunk to `on_stdout` as soon as it is read.
///
/// Stdout is read on a helper thread and forwarded over a channel so the caller's
/// thread can enforce both deadlines. Stderr is drained concurrently and kept up to
/// `stderr_limit_bytes`. Stdin is written on its own thread. Neither blocks the
/// return once the child is gone: readers still held open by a grandchild are
/// detached and whatever stderr they captured so far is reported.
#[instrument(
    skip_all,
    fields(
        timeout_secs = timeout.as_secs(),
        idle_timeout_secs = idle_timeout.as_secs()
    )
)]
pub fn stream_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    idle_timeout: Duration,
    stderr_limit_bytes: usize,
    on_stdout: &mut dyn FnMut(&[u8]),
) -> Result<StreamOutput> {
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

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let stdout_handle = thread::spawn(move || forward_chunks(stdout, tx));
    let stderr_capture = StderrCapture::spawn(stderr, stderr_limit_bytes);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                // The child may exit before reading its input; its status tells the story.
                warn!(err = %e, "failed to write child stdin");
            }
        });
    }

    let started = Instant::now();
    let deadline = started + timeout;
    let mut timed_out = false;
    let mut idle_timed_out = false;
    let mut stdout_closed = false;

    loop {
        let now = Instant::now();
        if now >= deadline {
            timed_out = true;
            break;
        }
        let wait = idle_timeout.min(deadline - now);
        match rx.recv_timeout(wait) {
            Ok(chunk) => on_stdout(&chunk),
            Err(RecvTimeoutError::Disconnected) => {
                stdout_closed = true;
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if Instant::now() >= deadline {
                    timed_out = true;
                } else {
                    idle_timed_out = true;
                }
                break;
            }
        }
    }

    let status = if timed_out || idle_timed_out {
        warn!(timed_out, idle_timed_out, "command exceeded deadline, killing");
        kill_and_wait(&mut child)?
    } else {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match child.wait_timeout(remaining).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!("command kept running after closing stdout, killing");
                timed_out = true;
                kill_and_wait(&mut child)?
            }
        }
    };

    if stdout_closed {
        join_reader(stdout_handle).context("join stdout")??;
    }
    // A killed child may leave a grandchild holding stdout open; the reader thread is
    // detached in that case.
    let (stderr, stderr_truncated) = stderr_capture.finish(STDERR_DRAIN_GRACE);
    if stderr_truncated > 0 {
        warn!(stderr_truncated, "stderr truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, idle_timed_out, "command finished");
    Ok(StreamOutput {
        status,
        stderr,
        stderr_truncated,
        timed_out,
        idle_timed_out,
    })
}

fn kill_and_wait(child: &mut std::process::Child) -> Result<ExitStatus> {
    if let Err(e) = child.kill() {
        // Already exited between the deadline check and the kill.
        debug!(err = %e, "kill failed");
    }
    child.wait().context("wait command after kill")
}

fn forward_chunks<R: Read>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut chunk).context("read stdout")?;
        if n == 0 {
            return Ok(());
        }
        if tx.send(chunk[..n].to_vec()).is_err() {
            return Ok(());
        }
    }
}

fn join_reader<T>(handle: thread::JoinHandle<Result<T>>) -> Result<Result<T>> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))
}

#[derive(Default)]
struct LimitedBuffer {
    bytes: Vec<u8>,
    truncated: usize,
}

impl LimitedBuffer {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        let keep = chunk.len().min(limit.saturating_sub(self.bytes.len()));
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.truncated += chunk.len() - keep;
    }
}

/// Stderr drained on a helper thread into a shared bounded buffer.
struct StderrCapture {
    buffer: Arc<Mutex<LimitedBuffer>>,
    done: mpsc::Receiver<()>,
}

impl StderrCapture {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let buffer = Arc::new(Mutex::new(LimitedBuffer::default()));
        let (done_tx, done) = mpsc::channel();
        let shared = Arc::clone(&buffer);
        thread::spawn(move || {
            if let Err(e) = read_stream_limited(reader, &shared, limit) {
                warn!(err = %e, "failed to read stderr");
            }
            let _ = done_tx.send(());
        });
        Self { buffer, done }
    }

    /// Wait up to `grace` for the stream to close, then take what was captured.
    fn finish(self, grace: Duration) -> (Vec<u8>, usize) {
        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(grace) {
            warn!("stderr still open after the child exited, detaching reader");
        }
        let mut buffer = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let captured = std::mem::take(&mut *buffer);
        (captured.bytes, captured.truncated)
    }
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    buffer: &Mutex<LimitedBuffer>,
    limit: usize,
) -> Result<()> {
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut guard = buffer
            .lock()
            .map_err(|_| anyhow!("stderr buffer poisoned"))?;
        guard.push(&chunk[..n], limit);
    }
}
