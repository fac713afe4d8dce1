//! The single seam through which every external CLI is invoked.
//!
//! Components never touch `std::process` directly. They describe a command as
//! an [`Invocation`] and hand it to a [`CommandRunner`]:
//!
//! - [`SystemRunner`] spawns the process, captures stdout/stderr, feeds stdin
//!   and enforces an optional hard deadline.
//! - [`DryRunRunner`] prints what would run and reports success.
//!
//! Tests use a scripted fake so call order and arguments can be asserted
//! without a cluster.

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{DeployError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_GRACE: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Fed to the child's stdin. Never echoed: it may carry credentials.
    pub stdin: Option<String>,
    /// Kill the child and report a timeout once this much time has passed.
    pub deadline: Option<Duration>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            deadline: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// True if any argument equals `needle`.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        if let Some(input) = &self.stdin {
            write!(f, " <<stdin ({} bytes)", input.len())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CommandOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed or terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// Short human-readable failure detail: stderr if present, else stdout.
    pub fn detail(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        let hint: String = text.chars().take(500).collect();
        match (hint.is_empty(), self.code) {
            (false, _) => hint,
            (true, Some(code)) => format!("exit code {code}"),
            (true, None) => "terminated without exit code".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

pub trait CommandRunner: Send + Sync {
    /// Run the invocation to completion. Only spawn/IO problems are `Err`; a
    /// non-zero exit is reported through [`CommandOutput`].
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Dry-run runners never touch the cluster; callers skip checks that
    /// only make sense against real output.
    fn is_dry_run(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// SystemRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    cwd: Option<PathBuf>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir` (the project root).
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(dir.into()),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        tracing::debug!(command = %invocation, "exec");
        let spawn_err = |detail: String| DeployError::Spawn {
            program: invocation.program.clone(),
            detail,
        };

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // A deadline must take down wrapper scripts and everything they
        // start, so the child leads its own process group.
        #[cfg(unix)]
        if invocation.deadline.is_some() {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| spawn_err(e.to_string()))?;

        // Drain both pipes on their own threads so a chatty child cannot
        // block on a full pipe while we feed stdin or poll for the deadline.
        let stdout = child.stdout.take().map(Drain::start);
        let stderr = child.stderr.take().map(Drain::start);

        let mut stdin_error = None;
        if let Some(input) = &invocation.stdin {
            // Dropping the handle closes the pipe so the child sees EOF.
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(input.as_bytes()) {
                    tracing::debug!(command = %invocation, error = %e, "child stopped reading stdin");
                    stdin_error = Some(e);
                }
            }
        }

        let (status, timed_out) = match invocation.deadline {
            Some(limit) => wait_with_deadline(&mut child, limit)?,
            None => (Some(child.wait()?), false),
        };

        // After a deadline kill a detached descendant may still hold the
        // pipes open; keep what was buffered instead of waiting on it.
        let collect = |drain: Option<Drain>| {
            drain
                .map(|d| if timed_out { d.snapshot() } else { d.finish() })
                .unwrap_or_default()
        };

        let mut output = CommandOutput {
            code: status.and_then(|s| s.code()),
            stdout: collect(stdout),
            stderr: collect(stderr),
            timed_out,
        };
        if let Some(e) = stdin_error {
            if output.success() {
                // The child exited cleanly without reading all of its input.
                output.code = Some(1);
            }
            if output.stderr.trim().is_empty() {
                output.stderr = format!("failed to write stdin: {e}");
            }
        }
        Ok(output)
    }
}

/// A pipe read to EOF on a background thread into a shared buffer.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl Drain {
    fn start<R: Read + Send + 'static>(mut pipe: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = std::thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut b) = sink.lock() {
                            b.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { buf, handle }
    }

    /// Wait for EOF, then return everything read.
    fn finish(self) -> String {
        let Self { buf, handle } = self;
        let _ = handle.join();
        let bytes = buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Give the reader a short grace period, then return what it has so far.
    /// The thread is detached if the pipe is still open.
    fn snapshot(self) -> String {
        let start = Instant::now();
        while !self.handle.is_finished() && start.elapsed() < DRAIN_GRACE {
            std::thread::sleep(Duration::from_millis(10));
        }
        self.text()
    }

    fn text(&self) -> String {
        let bytes = self.buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<(Option<ExitStatus>, bool)> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((Some(status), false));
        }
        if start.elapsed() >= limit {
            tracing::warn!(pid = child.id(), ?limit, "deadline exceeded, killing process group");
            kill_group(child);
            let _ = child.wait();
            return Ok((None, true));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    // Safety: kill(2) with a negative pid only signals the process group the
    // child leads; it touches no memory.
    let _ = unsafe { libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL) };
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

// ---------------------------------------------------------------------------
// DryRunRunner
// ---------------------------------------------------------------------------

/// Prints each command instead of running it and reports success with empty
/// output. Keeps a log so callers can summarize what would have happened.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    echo: bool,
    log: Mutex<Vec<Invocation>>,
}

impl DryRunRunner {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl CommandRunner for DryRunRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        if self.echo {
            println!("[dry-run] {invocation}");
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(invocation.clone());
        }
        Ok(CommandOutput::ok(""))
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tool resolution
// ---------------------------------------------------------------------------

/// Verify every program resolves on PATH (or as a path) before a run starts.
pub fn ensure_tools<'a>(programs: impl IntoIterator<Item = &'a str>) -> Result<()> {
    for program in programs {
        if which::which(program).is_err() {
            return Err(DeployError::ToolNotFound(program.to_string()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scripted fake (tests only)
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_display_quotes_and_hides_stdin() {
        let inv = Invocation::new("kubectl", ["apply", "-f", "-"]).with_stdin("password: hunter2");
        let shown = inv.to_string();
        assert_eq!(shown, "kubectl apply -f - <<stdin (17 bytes)");
        assert!(!shown.contains("hunter2"));

        let inv = Invocation::new("echo", ["two words"]);
        assert_eq!(inv.to_string(), "echo 'two words'");
    }

    #[test]
    fn output_detail_prefers_stderr() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "partial".into(),
            stderr: "Error from server (NotFound)\n".into(),
            timed_out: false,
        };
        assert_eq!(out.detail(), "Error from server (NotFound)");
        assert_eq!(CommandOutput::failed(3, "").detail(), "exit code 3");
        assert!(!CommandOutput::timed_out().success());
    }

    #[test]
    fn dry_run_records_without_executing() {
        let runner = DryRunRunner::new(false);
        let out = runner
            .run(&Invocation::new("__definitely_not_installed__", ["x"]))
            .unwrap();
        assert!(out.success());
        assert!(runner.is_dry_run());
        assert_eq!(runner.invocations().len(), 1);
    }

    #[test]
    fn ensure_tools_reports_missing_program() {
        let err = ensure_tools(["__kdeploy_missing_tool__"]).unwrap_err();
        assert!(matches!(err, DeployError::ToolNotFound(ref p) if p == "__kdeploy_missing_tool__"));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_output_and_exit_code() {
        let runner = SystemRunner::new();
        let out = runner
            .run(&Invocation::new("sh", ["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_feeds_stdin() {
        let runner = SystemRunner::new();
        let out = runner
            .run(&Invocation::new("cat", Vec::<String>::new()).with_stdin("kind: Namespace\n"))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "kind: Namespace\n");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_enforces_deadline() {
        let runner = SystemRunner::new();
        let start = Instant::now();
        let out = runner
            .run(&Invocation::new("sleep", ["10"]).with_deadline(Duration::from_millis(300)))
            .unwrap();
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_deadline_kills_grandchildren() {
        let runner = SystemRunner::new();
        let start = Instant::now();
        let out = runner
            .run(
                &Invocation::new("sh", ["-c", "sleep 6; echo done"])
                    .with_deadline(Duration::from_millis(300)),
            )
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.stdout.contains("done"));
        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_keeps_stderr_when_child_stops_reading_stdin() {
        // Larger than any pipe buffer, so the write fails once the child exits.
        let manifest = "x".repeat(1 << 20);
        let out = SystemRunner::new()
            .run(
                &Invocation::new("sh", ["-c", "exec 0<&-; echo 'error: invalid manifest' >&2; exit 4"])
                    .with_stdin(manifest),
            )
            .unwrap();
        assert_eq!(out.code, Some(4));
        assert!(out.stderr.contains("invalid manifest"), "stderr: {}", out.stderr);
    }

    #[test]
    fn system_runner_spawn_failure_names_program() {
        let err = SystemRunner::new()
            .run(&Invocation::new("__kdeploy_missing_tool__", ["version"]))
            .unwrap_err();
        assert!(err.to_string().contains("__kdeploy_missing_tool__"));
    }
}
