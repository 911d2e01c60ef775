// ABOUTME: Local process supervision for kubectl, docker and debugger children
//
// One-shot commands run to completion under a timeout. Long-lived children are
// started in their own process group so a terminal Ctrl+C reaches only us; the
// controller then interrupts them in teardown order. Their stdout and stderr
// are merged into one line stream.

#![allow(clippy::missing_const_for_fn)]

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ManagedProcess, StdinSource, ToolCommand, ToolOutput, ToolRunner};
use crate::error::{DebugError, Result};

/// Current state of a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is running with the given PID
    Running {
        /// Process ID
        pid: u32,
    },

    /// Process exited normally with exit code
    Exited {
        /// Exit code from the process
        code: i32,
    },

    /// Process was terminated by a signal
    Signaled {
        /// Signal number that terminated the process
        signal: i32,
    },

    /// Process status could not be determined
    Failed {
        /// Description of the failure
        reason: String,
    },
}

impl ProcessState {
    /// Returns true if the process is currently running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited { code };
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled { signal };
            }
        }
        Self::Failed {
            reason: "Unknown termination".to_string(),
        }
    }
}

/// Runs tools as real local processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Stateless; every call spawns afresh
    pub const fn new() -> Self {
        Self
    }
}

impl ToolRunner for SystemRunner {
    type Process = SystemProcess;

    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        debug!(command = %command.display(), "Running command");

        // Open stdin sources before spawning so a missing file never leaves a child behind
        let stdin_file = match &command.stdin {
            StdinSource::File(path) => Some(
                tokio::fs::File::open(path)
                    .await
                    .map_err(|source| DebugError::Io {
                        path: path.clone(),
                        source,
                    })?,
            ),
            _ => None,
        };

        let mut process_cmd = Command::new(&command.program);
        process_cmd
            .args(&command.args)
            .stdin(if command.stdin == StdinSource::Null {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(if command.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = process_cmd.spawn().map_err(|source| DebugError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let feeder = child
            .stdin
            .take()
            .map(|stdin| feed_stdin(stdin, stdin_file, &command.stdin));

        let output = child.wait_with_output();
        let output = match command.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, output).await {
                Ok(output) => output,
                Err(_) => {
                    warn!(command = %command.display(), ?timeout, "Command timed out");
                    if let Some(feeder) = feeder {
                        cancel_feeder(feeder).await;
                    }
                    return Err(DebugError::Timeout {
                        what: command.display(),
                        timeout,
                    });
                }
            },
            None => output.await,
        }
        .map_err(|source| DebugError::Io {
            path: command.program.clone().into(),
            source,
        })?;

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                // The child may legitimately exit before reading all of its input
                Ok(Err(e)) => debug!(error = %e, "Writing child stdin stopped early"),
                Err(e) => warn!(error = %e, "Stdin feeder task failed"),
            }
        }

        let result = ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %command.display(), code = ?result.code, "Command finished");
        Ok(result)
    }

    fn spawn(&self, command: &ToolCommand) -> Result<SystemProcess> {
        debug!(command = %command.display(), "Spawning long-lived process");

        let mut process_cmd = Command::new(&command.program);
        process_cmd
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        process_cmd.process_group(0);

        let mut child = process_cmd.spawn().map_err(|source| DebugError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let (tx, lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        let pid = child.id().unwrap_or(0);
        let label = process_label(command);
        info!(pid = pid, process = %label, "Process spawned");

        Ok(SystemProcess {
            label,
            // Held open so attach-style commands never see EOF on stdin
            stdin: child.stdin.take(),
            child: Some(child),
            lines,
            state: ProcessState::Running { pid },
        })
    }
}

/// A long-lived local child with merged output
pub struct SystemProcess {
    label: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    lines: mpsc::UnboundedReceiver<String>,
    state: ProcessState,
}

impl SystemProcess {
    /// Poll the child without blocking and record its exit if it has one
    pub fn check_status(&mut self) -> ProcessState {
        if let Some(ref mut child) = self.child {
            match child.try_wait() {
                Ok(Some(status)) => self.record_exit(status),
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, process = %self.label, "Failed to check process status");
                    self.state = ProcessState::Failed {
                        reason: format!("Status check failed: {e}"),
                    };
                }
            }
        }
        self.state.clone()
    }

    fn record_exit(&mut self, status: ExitStatus) {
        self.state = ProcessState::from_status(status);
        debug!(process = %self.label, state = ?self.state, "Process exited");
        self.child = None;
        self.stdin = None;
    }
}

impl ManagedProcess for SystemProcess {
    fn label(&self) -> &str {
        &self.label
    }

    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    fn interrupt(&mut self) -> Result<()> {
        let ProcessState::Running { pid } = self.check_status() else {
            return Ok(());
        };
        signal_group(&self.label, pid, GroupSignal::Interrupt)
    }

    async fn wait(&mut self, timeout: Duration) -> Result<ProcessState> {
        let Some(ref mut child) = self.child else {
            return Ok(self.state.clone());
        };

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                return Err(DebugError::Io {
                    path: self.label.clone().into(),
                    source,
                })
            }
            Err(_) => {
                warn!(process = %self.label, "Process did not stop after SIGINT, sending SIGKILL");
                if let ProcessState::Running { pid } = self.state {
                    signal_group(&self.label, pid, GroupSignal::Kill)?;
                }
                child.kill().await.map_err(|source| DebugError::Io {
                    path: self.label.clone().into(),
                    source,
                })?;
                child.wait().await.map_err(|source| DebugError::Io {
                    path: self.label.clone().into(),
                    source,
                })?
            }
        };

        self.record_exit(status);
        Ok(self.state.clone())
    }

    fn is_alive(&mut self) -> bool {
        self.check_status().is_running()
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Interrupt,
    Kill,
}

/// Signal the child's whole process group; a group that is already gone is fine
#[cfg(unix)]
fn signal_group(label: &str, pid: u32, signal: GroupSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = match signal {
        GroupSignal::Interrupt => Signal::SIGINT,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    // Children lead their own group, so the group id is the pid
    #[allow(clippy::cast_possible_wrap)]
    let group = Pid::from_raw(pid as i32);
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(DebugError::Signal {
            process: label.to_string(),
            source,
        }),
    }
}

#[cfg(not(unix))]
fn signal_group(_label: &str, _pid: u32, _signal: GroupSignal) -> Result<()> {
    Ok(())
}

fn process_label(command: &ToolCommand) -> String {
    let program = Path::new(&command.program)
        .file_name()
        .map_or_else(|| command.program.clone(), |name| name.to_string_lossy().into_owned());
    match command.args.first() {
        Some(first) => format!("{program} {first}"),
        None => program,
    }
}

fn feed_stdin(
    mut stdin: ChildStdin,
    file: Option<tokio::fs::File>,
    source: &StdinSource,
) -> JoinHandle<std::io::Result<()>> {
    let bytes = match source {
        StdinSource::Bytes(bytes) => bytes.clone(),
        _ => Vec::new(),
    };
    tokio::spawn(async move {
        if let Some(mut file) = file {
            tokio::io::copy(&mut file, &mut stdin).await?;
        } else {
            stdin.write_all(&bytes).await?;
        }
        stdin.shutdown().await
    })
}

/// Stop writing to a child that was given up on and wait until the task is gone
async fn cancel_feeder(feeder: JoinHandle<std::io::Result<()>>) {
    feeder.abort();
    if let Err(e) = feeder.await {
        if !e.is_cancelled() {
            warn!(error = %e, "Stdin feeder task failed");
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(|c: char| c == '\n' || c == '\r')
                    .to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}
