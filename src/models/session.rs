// ABOUTME: Mutable resolution state of one debug session and its lifecycle state machine
//
// The session owns the tunnel and debug server handles. Whoever discards it
// must have stopped both first; the controller enforces that, not the handles.

use std::fmt;

use crate::models::Target;
use crate::process::ToolCommand;
use crate::server::DebugServer;
use crate::strategy::Strategy;
use crate::tunnel::Tunnel;

/// Lifecycle phase of a debug session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing resolved yet
    Init,
    /// Target container known
    ContainerResolved,
    /// Server command ready to run
    StrategyPrepared,
    /// Port-forward announced its local port
    TunnelUp,
    /// Server reported it is listening
    ServerUp,
    /// Handed to the operator
    Running,
    /// Teardown in progress
    Stopping,
    /// Everything owned has been stopped
    Stopped,
    /// Absorbing failure state
    Failed,
}

impl SessionPhase {
    /// Terminal phases accept no further transitions
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Stopping => !matches!(self, Self::Stopping),
            Self::Stopped => matches!(self, Self::Stopping),
            Self::ContainerResolved => matches!(self, Self::Init),
            Self::StrategyPrepared => matches!(self, Self::ContainerResolved),
            Self::TunnelUp => matches!(self, Self::StrategyPrepared),
            Self::ServerUp => matches!(self, Self::TunnelUp),
            Self::Running => matches!(self, Self::ServerUp),
            Self::Init => false,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "INIT",
            Self::ContainerResolved => "CONTAINER_RESOLVED",
            Self::StrategyPrepared => "STRATEGY_PREPARED",
            Self::TunnelUp => "TUNNEL_UP",
            Self::ServerUp => "SERVER_UP",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Everything learned and started while the session progresses
pub struct SessionState<P> {
    phase: SessionPhase,
    /// Filled in exactly once by container resolution
    pub target: Option<Target>,
    /// Raw `serverVersion.gitVersion`, possibly empty
    pub cluster_version: Option<String>,
    /// `Unresolved` until the version is known
    pub strategy: Strategy,
    /// Prepared command that starts the remote server
    pub server_command: Option<ToolCommand>,
    /// Only ever set from the tunnel's own announcement
    pub local_port: Option<u16>,
    /// Live port-forward child, stored before its readiness wait
    pub tunnel: Option<Tunnel<P>>,
    /// Live debug server child, stored before its readiness wait
    pub server: Option<DebugServer<P>>,
}

impl<P> Default for SessionState<P> {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Init,
            target: None,
            cluster_version: None,
            strategy: Strategy::Unresolved,
            server_command: None,
            local_port: None,
            tunnel: None,
            server: None,
        }
    }
}

impl<P> SessionState<P> {
    /// Current lifecycle phase
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Move to `next` if the transition is legal; returns whether it happened
    pub fn advance(&mut self, next: SessionPhase) -> bool {
        if self.phase.can_transition_to(next) {
            tracing::debug!(from = %self.phase, to = %next, "Session phase change");
            self.phase = next;
            true
        } else {
            tracing::debug!(from = %self.phase, to = %next, "Ignoring invalid session phase change");
            false
        }
    }

    /// True while a tunnel or debug server handle still needs a stop action
    pub const fn owns_processes(&self) -> bool {
        self.tunnel.is_some() || self.server.is_some()
    }
}
