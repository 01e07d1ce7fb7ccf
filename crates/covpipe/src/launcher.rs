//! Process runner
//!
//! Every Cover, Merge and Report step is one blocking invocation of the
//! coverage tool. [`ProcessLauncher`] streams the child's stdout and stderr
//! line by line into a [`ConsoleSink`] while it waits, and kills the child's
//! whole process tree when the run is cancelled or the invocation outlives
//! its timeout.
//!
//! The tool starts its own test runner, which may start further hosts. Any
//! of them can inherit the output pipes, so after the child is gone the
//! output readers get [`DRAIN_GRACE`] to reach end of stream and are
//! detached after that.

use crate::result::{CovpipeError, CovpipeResult};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often a running child is checked for exit, cancellation and timeout
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long output readers may keep draining once the child has exited
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Append-only destination for tool output
pub trait ConsoleSink: Send + Sync {
    /// Receive one line, without its terminator
    fn line(&self, line: &str);
}

/// Writes tool output to the process stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl ConsoleSink for StdoutSink {
    fn line(&self, line: &str) {
        println!("{line}");
    }
}

/// Collects tool output in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines received so far
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl ConsoleSink for MemorySink {
    fn line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

/// Cooperative cancellation flag.
///
/// Cancelling a token cancels every child derived from it; cancelling a child
/// leaves its parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    /// Create an uncancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a token that is also cancelled when `self` is
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether this token or any ancestor was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

/// Something that can run the coverage tool
pub trait ToolLauncher: Send + Sync {
    /// Run `executable` with `args` to completion and return its exit code
    fn execute(
        &self,
        executable: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> CovpipeResult<i32>;

    /// Like [`ToolLauncher::execute`], turning a non-zero exit into an error
    fn run(
        &self,
        executable: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> CovpipeResult<i32> {
        match self.execute(executable, args, cancel)? {
            0 => Ok(0),
            code => Err(CovpipeError::ToolExit { code }),
        }
    }
}

/// Launches real child processes
pub struct ProcessLauncher {
    working_dir: PathBuf,
    sink: Arc<dyn ConsoleSink>,
    timeout: Option<Duration>,
}

impl fmt::Debug for ProcessLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLauncher")
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProcessLauncher {
    /// Launcher running tools from `working_dir`
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>, sink: Arc<dyn ConsoleSink>) -> Self {
        Self {
            working_dir: working_dir.into(),
            sink,
            timeout: None,
        }
    }

    /// Kill invocations running longer than `timeout`
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory child processes start in
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn wait(
        &self,
        child: &mut Child,
        cancel: &CancellationToken,
        started: Instant,
    ) -> CovpipeResult<ExitStatus> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if cancel.is_cancelled() {
                warn!(pid = child.id(), "cancelling running tool");
                terminate(child);
                return Err(CovpipeError::Cancelled);
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    warn!(pid = child.id(), limit = ?limit, "tool timed out");
                    terminate(child);
                    return Err(CovpipeError::Timeout { limit });
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ToolLauncher for ProcessLauncher {
    fn execute(
        &self,
        executable: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> CovpipeResult<i32> {
        if cancel.is_cancelled() {
            return Err(CovpipeError::Cancelled);
        }

        info!(program = executable, args = ?args, "launching tool");
        let mut command = Command::new(executable);
        command
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        own_process_group(&mut command);
        let mut child = command.spawn().map_err(|source| CovpipeError::Spawn {
            program: executable.to_string(),
            source,
        })?;

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, Arc::clone(&self.sink)));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, Arc::clone(&self.sink)));
        }
        let started = Instant::now();

        let status = match readers.into_iter().collect::<Result<Vec<_>, _>>() {
            Ok(readers) => {
                let status = self.wait(&mut child, cancel, started);
                drain(readers, DRAIN_GRACE);
                status?
            }
            Err(e) => {
                terminate(&mut child);
                return Err(e.into());
            }
        };

        let code = status.code().unwrap_or(-1);
        debug!(
            program = executable,
            code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool exited"
        );
        Ok(code)
    }
}

fn spawn_reader(
    stream: impl Read + Send + 'static,
    sink: Arc<dyn ConsoleSink>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("covpipe-tool-output".to_string())
        .spawn(move || pump(stream, sink.as_ref()))
}

/// Wait up to `grace` for the readers to hit end of stream, then detach
/// whatever is still blocked on a pipe held open by an orphaned process.
fn drain(readers: Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = Instant::now() + grace;
    for reader in readers {
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL);
        }
        if !reader.is_finished() {
            warn!("tool output still open after exit, detaching reader");
        } else if reader.join().is_err() {
            warn!("tool output reader panicked");
        }
    }
}

fn pump(stream: impl Read, sink: &dyn ConsoleSink) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink.line(line.trim_end_matches(['\r', '\n']));
            }
            Err(e) => {
                debug!(error = %e, "tool output stream closed");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_: &mut Command) {}

/// Kill everything the child started. On unix the child leads its own
/// process group, so signalling the group reaches the whole tree. The shell
/// builtin is used since a standalone `kill` binary is not always installed.
#[cfg(unix)]
fn kill_tree(pid: u32) {
    let script = format!("kill -9 -{pid}");
    match Command::new("sh")
        .args(["-c", script.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if !status.success() => debug!(pid, "process group already gone"),
        Ok(_) => {}
        Err(e) => warn!(pid, error = %e, "failed to signal process group"),
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    let target = pid.to_string();
    match Command::new("taskkill")
        .args(["/T", "/F", "/PID", target.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if !status.success() => debug!(pid, "process tree already gone"),
        Ok(_) => {}
        Err(e) => warn!(pid, error = %e, "failed to kill process tree"),
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(_: u32) {}

fn terminate(child: &mut Child) {
    kill_tree(child.id());
    if let Err(e) = child.kill() {
        debug!(error = %e, "kill failed, child already exited");
    }
    if let Err(e) = child.wait() {
        warn!(error = %e, "failed to reap child");
    }
}
