// ABOUTME: External process plumbing shared by every orchestration step
//
// Every external call is a typed `ToolCommand` (argument vector, stdin source,
// timeout) run through a `ToolRunner`. One-shot commands return their output;
// long-lived children come back as `ManagedProcess` handles whose merged
// stdout/stderr is read line by line.

/// Interrupt propagation
pub mod cancel;
/// Readiness line matching
pub mod pattern;
/// Real local processes
pub mod supervisor;

/// Scripted fakes for unit tests
#[cfg(test)]
pub mod testing;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

pub use cancel::{CancelHandle, Cancellation};
pub use pattern::{wait_for_pattern, PatternSet, WaitOutcome};
pub use supervisor::{ProcessState, SystemProcess, SystemRunner};

/// Where a command's stdin comes from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StdinSource {
    #[default]
    Null,
    /// Stream a local file
    File(PathBuf),
    /// Write fixed bytes, then close
    Bytes(Vec<u8>),
}

/// A fully parameterized invocation of an external tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Executable name or path
    pub program: String,
    /// Arguments, not shell-interpreted
    pub args: Vec<String>,
    /// Null unless the command streams input
    pub stdin: StdinSource,
    /// Bound for one-shot runs; long-lived children ignore it
    pub timeout: Option<Duration>,
    /// Whether stdout is kept; stream copies through `tee` echo the whole file
    pub capture_stdout: bool,
}

impl ToolCommand {
    /// No arguments, null stdin, no timeout, stdout captured
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdinSource::Null,
            timeout: None,
            capture_stdout: true,
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed the child from `stdin` instead of null
    #[must_use]
    pub fn stdin(mut self, stdin: StdinSource) -> Self {
        self.stdin = stdin;
        self
    }

    /// Kill the child if it runs longer than `timeout`
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Drop stdout instead of buffering it
    #[must_use]
    pub const fn discard_stdout(mut self) -> Self {
        self.capture_stdout = false;
        self
    }

    /// Render as a copy-pasteable command line for logs
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| shell_escape::escape(part.as_str().into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True when `needle` appears as a contiguous run of arguments
    pub fn has_args(&self, needle: &[&str]) -> bool {
        !needle.is_empty() && self.args.windows(needle.len()).any(|w| w == needle)
    }
}

/// Exit status and output of a finished one-shot command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// Empty when stdout was discarded
    pub stdout: String,
    /// Also carries kubectl's own diagnostics
    pub stderr: String,
}

impl ToolOutput {
    /// Exit 0 with `stdout`
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Exit `code` with `stderr`
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Exit code 0
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// stdout followed by stderr, for error messages
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Runs external tools; the seam the orchestration core is generic over
#[allow(async_fn_in_trait)]
pub trait ToolRunner {
    /// Handle type for spawned children
    type Process: ManagedProcess;

    /// Run to completion and collect output. Non-zero exit is not an error here.
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput>;

    /// Start a long-lived child whose output is read through the handle
    fn spawn(&self, command: &ToolCommand) -> Result<Self::Process>;
}

/// Handle on a long-lived child process
#[allow(async_fn_in_trait)]
pub trait ManagedProcess {
    /// Short label for logs
    fn label(&self) -> &str;

    /// Next output line, `None` once the child closed its output
    async fn next_line(&mut self) -> Option<String>;

    /// Send SIGINT if the child is still alive
    fn interrupt(&mut self) -> Result<()>;

    /// Wait for exit; kills the child if it outlives `timeout`
    async fn wait(&mut self, timeout: Duration) -> Result<ProcessState>;

    /// Reaps the child if it already exited
    fn is_alive(&mut self) -> bool;
}

/// Interrupt a child and wait for it to go away. No-op when it already exited.
pub async fn stop_process<P: ManagedProcess>(process: &mut P, timeout: Duration) -> Result<()> {
    if !process.is_alive() {
        tracing::debug!(process = %process.label(), "Process already exited");
        return Ok(());
    }

    tracing::debug!(process = %process.label(), "Sending SIGINT");
    process.interrupt()?;
    let state = process.wait(timeout).await?;
    tracing::debug!(process = %process.label(), state = ?state, "Process stopped");
    Ok(())
}
