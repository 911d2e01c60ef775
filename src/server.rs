// ABOUTME: Starts the remote debug server, classifies its startup output and stops it
//
// Startup resolves to exactly one outcome: ready, port busy, output ended or
// timed out (or interrupted). Remote stop works by process name inside the
// container, independent of the local child, because an ephemeral sidecar is
// not controlled through that child.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::error::{DebugError, Result};
use crate::kube::Kubectl;
use crate::models::{DebuggerKind, Target};
use crate::process::{
    stop_process, wait_for_pattern, Cancellation, ManagedProcess, PatternSet, ToolCommand,
    ToolRunner, WaitOutcome,
};

const READY: usize = 0;
const BUSY: usize = 1;

/// Startup classification of the debug server's early output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStartup {
    /// Listening on the remote port
    Ready,
    /// The remote port is taken
    Busy,
    /// Output closed first
    Ended,
    /// Silent past the bound
    TimedOut,
    /// Interrupted while waiting
    Cancelled,
}

impl From<WaitOutcome> for ServerStartup {
    fn from(outcome: WaitOutcome) -> Self {
        match outcome {
            WaitOutcome::Matched { index, .. } if index == READY => Self::Ready,
            WaitOutcome::Matched { index, .. } => {
                debug_assert_eq!(index, BUSY);
                Self::Busy
            }
            WaitOutcome::Ended => Self::Ended,
            WaitOutcome::TimedOut => Self::TimedOut,
            WaitOutcome::Cancelled => Self::Cancelled,
        }
    }
}

lazy_static! {
    static ref GDB_READY: Regex = Regex::new("Listening on port").expect("gdb ready regex is valid");
    static ref GDB_BUSY: Regex =
        Regex::new("Can't bind address: Address in use").expect("gdb busy regex is valid");
    static ref DLV_READY: Regex =
        Regex::new("API server listening at: ").expect("dlv ready regex is valid");
    static ref DLV_BUSY: Regex =
        Regex::new("bind: address already in use").expect("dlv busy regex is valid");
}

/// Ready pattern first, then the bind-conflict pattern
pub fn startup_patterns(kind: DebuggerKind) -> PatternSet {
    match kind {
        DebuggerKind::Gdb => PatternSet::new([GDB_READY.clone(), GDB_BUSY.clone()]),
        DebuggerKind::Dlv => PatternSet::new([DLV_READY.clone(), DLV_BUSY.clone()]),
    }
}

/// The local child driving the remote debug server
pub struct DebugServer<P> {
    process: P,
    kind: DebuggerKind,
    /// False once the server reported its port was taken by someone else
    owns_remote: bool,
}

impl<P: ManagedProcess> DebugServer<P> {
    /// Start the prepared server command; readiness is awaited separately
    pub fn spawn<R>(runner: &R, command: &ToolCommand, kind: DebuggerKind) -> Result<Self>
    where
        R: ToolRunner<Process = P>,
    {
        info!(debugger = %kind, "Starting debugger");
        debug!(command = %command.display(), "Debug server command");
        Ok(Self {
            process: runner.spawn(command)?,
            kind,
            owns_remote: true,
        })
    }

    /// gdbserver or dlv
    pub const fn kind(&self) -> DebuggerKind {
        self.kind
    }

    /// Whether remote teardown should look for our server
    pub const fn owns_remote(&self) -> bool {
        self.owns_remote
    }

    /// Block until the server is listening on `remote_port`
    pub async fn await_ready(
        &mut self,
        remote_port: u16,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<()> {
        let patterns = startup_patterns(self.kind);
        let outcome = wait_for_pattern(&mut self.process, &patterns, timeout, cancel).await;
        match ServerStartup::from(outcome) {
            ServerStartup::Ready => {
                debug!(port = remote_port, "The remote debugger is listening");
                Ok(())
            }
            ServerStartup::Busy => {
                error!(port = remote_port, "The port is occupied");
                self.owns_remote = false;
                Err(DebugError::PortConflict(remote_port))
            }
            ServerStartup::Ended => {
                error!(debugger = %self.kind, "The debugger exited before it was ready");
                Err(DebugError::ProcessEnded(self.kind.server_binary().to_string()))
            }
            ServerStartup::TimedOut => Err(DebugError::Timeout {
                what: format!("{} to listen on port {remote_port}", self.kind.server_binary()),
                timeout,
            }),
            ServerStartup::Cancelled => Err(DebugError::Interrupted(format!(
                "waiting for {} to start",
                self.kind.server_binary()
            ))),
        }
    }

    /// Next line of server output, `None` once it exited
    pub async fn next_line(&mut self) -> Option<String> {
        self.process.next_line().await
    }

    /// Interrupt the local child if it is still alive
    pub async fn stop_local(&mut self, timeout: Duration) -> Result<()> {
        stop_process(&mut self.process, timeout).await?;
        debug!("Debugger stopped");
        Ok(())
    }
}

/// Interrupt every gdbserver or dlv in the container; returns how many were signalled
pub async fn stop_server_remotely<R: ToolRunner>(
    runner: &R,
    kubectl: &Kubectl,
    target: &Target,
) -> Result<usize> {
    debug!(target = %target, "Stopping the remote debugger session");
    let names: Vec<&str> = DebuggerKind::ALL.iter().map(|k| k.server_binary()).collect();
    let output = runner
        .run(&kubectl.stop_remote_processes(target, &names))
        .await?;
    if !output.success() {
        return Err(DebugError::cluster(
            "Error during killing debugger",
            output.combined(),
        ));
    }

    let signalled = output
        .stdout
        .lines()
        .filter(|line| line.trim().parse::<u32>().is_ok())
        .count();
    if signalled == 0 {
        warn!(target = %target, "No debug server process found in the container");
    } else {
        debug!(count = signalled, "Remote debugger session closed");
    }
    Ok(signalled)
}
