// ABOUTME: Error taxonomy for debug session orchestration
//
// Every external step maps its failure onto one of these variants. None of
// them are retried; startup failures trigger teardown and are then returned
// unchanged to the caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the orchestration core
pub type Result<T, E = DebugError> = std::result::Result<T, E>;

/// Errors raised while establishing, running or tearing down a debug session
#[derive(Error, Debug)]
pub enum DebugError {
    /// A required local executable is not on PATH
    #[error("There is no '{0}' in the PATH")]
    ToolNotFound(String),

    /// A cluster control command exited non-zero
    #[error("kubectl command error: {context}: {output}")]
    ClusterCommand {
        /// What was being attempted
        context: String,
        /// kubectl's combined output
        output: String,
    },

    /// The pod has several containers and none was chosen
    #[error("There is more than one container in pod {pod}. Please specify one of them: {}", .containers.join(", "))]
    AmbiguousTarget {
        /// Pod that was queried
        pod: String,
        /// Every container it reported
        containers: Vec<String>,
    },

    /// The pod reported no containers at all
    #[error("Impossible: pod {0} has no containers")]
    NoContainers(String),

    /// A tool produced output we could not interpret
    #[error("Parse error: {0}")]
    MalformedOutput(String),

    /// Building, extracting or injecting a static helper binary failed
    #[error("Cannot provision static '{binary}' binary: {reason}")]
    Provisioning {
        /// Helper binary name, e.g. `tar`
        binary: String,
        /// Which step failed and how
        reason: String,
    },

    /// Neither tar nor a stream copy tool exists in the target container
    #[error("Cannot move the debug server into container {0}: neither 'tar' nor 'tee' is available")]
    NoFileTransferTool(String),

    /// The remote debug server port is already bound
    #[error("Remote port {0} is already in use in the container")]
    PortConflict(u16),

    /// Generic debugger or debug-server protocol failure
    #[error("Debugger command error: {0}")]
    SessionCommand(String),

    /// An expected readiness line never appeared
    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// The awaited event
        what: String,
        /// The bound that ran out
        timeout: Duration,
    },

    /// A supervised child exited before it became ready
    #[error("{0} exited before becoming ready")]
    ProcessEnded(String),

    /// An interrupt arrived while the operation was in flight
    #[error("Interrupted while {0}")]
    Interrupted(String),

    /// A local process could not be started
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A signal could not be delivered to a local child
    #[error("Failed to signal {process}: {source}")]
    Signal {
        /// Label of the signalled child
        process: String,
        /// errno from `killpg`
        #[source]
        source: nix::errno::Errno,
    },

    /// Local filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Invalid or incomplete configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DebugError {
    /// Build a [`DebugError::ClusterCommand`] from a step description and the tool output
    pub fn cluster(context: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ClusterCommand {
            context: context.into(),
            output: output.into().trim().to_string(),
        }
    }

    /// Build a [`DebugError::Provisioning`] for the given binary
    pub fn provisioning(binary: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Provisioning {
            binary: binary.into(),
            reason: reason.into(),
        }
    }

    /// True when the remote debug server could not bind its port.
    ///
    /// Callers use this to pick another remote port and start over.
    pub const fn is_port_conflict(&self) -> bool {
        matches!(self, Self::PortConflict(_))
    }

    /// True when the error came from an interrupt rather than a failing step
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}
