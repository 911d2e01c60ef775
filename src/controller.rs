// ABOUTME: Drives one debug session from container resolution to teardown
//
// Startup is strictly sequential. Every handle is stored in the session state
// before its readiness wait, so a failure at any step can tear down exactly
// what was started. Teardown stops the server before the tunnel and never
// fails as a whole.

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::capability::{detect_cluster_version, resolve_container};
use crate::config::AppConfig;
use crate::coredump::{self, DumpClient};
use crate::error::{DebugError, Result};
use crate::kube::Kubectl;
use crate::models::{DebugRequest, SessionPhase, SessionState};
use crate::process::{Cancellation, ToolCommand, ToolRunner};
use crate::provision::BinaryBuilder;
use crate::server::{stop_server_remotely, DebugServer};
use crate::strategy::{select_strategy, StrategyPreparer};
use crate::tunnel::Tunnel;

/// Run `operation` unless the cancellation flag fires first
async fn interruptible<T>(
    cancel: &Cancellation,
    what: &str,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DebugError::Interrupted(what.to_string())),
        result = operation => result,
    }
}

/// Owns one debug session and everything it starts
pub struct SessionController<R: ToolRunner, B> {
    runner: R,
    builder: B,
    config: AppConfig,
    kubectl: Kubectl,
    request: DebugRequest,
    cancel: Cancellation,
    state: SessionState<R::Process>,
}

impl<R: ToolRunner, B: BinaryBuilder> SessionController<R, B> {
    /// A session in INIT; nothing touches the cluster until `start_debug`
    pub fn new(
        runner: R,
        builder: B,
        config: AppConfig,
        request: DebugRequest,
        cancel: Cancellation,
    ) -> Self {
        let kubectl = Kubectl::new(config.kubectl_cmd.clone(), config.timeouts.command);
        Self {
            runner,
            builder,
            config,
            kubectl,
            request,
            cancel,
            state: SessionState::default(),
        }
    }

    /// Everything resolved and started so far
    pub const fn state(&self) -> &SessionState<R::Process> {
        &self.state
    }

    /// Shorthand for `state().phase()`
    pub const fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Local end of the tunnel, known once the session reached TUNNEL_UP
    pub const fn local_port(&self) -> Option<u16> {
        self.state.local_port
    }

    /// The operator's request, unchanged since construction
    pub const fn request(&self) -> &DebugRequest {
        &self.request
    }

    /// The runner every external command went through
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Builder used for helper binaries the container lacks
    pub const fn builder(&self) -> &B {
        &self.builder
    }

    /// Bring the session to RUNNING and return the local port to connect to.
    ///
    /// On any failure everything started so far is stopped, the session ends
    /// in FAILED and the original error is returned.
    pub async fn start_debug(&mut self) -> Result<u16> {
        if self.state.phase() != SessionPhase::Init {
            return Err(DebugError::SessionCommand(format!(
                "session cannot start from phase {}",
                self.state.phase()
            )));
        }

        match self.establish().await {
            Ok(port) => {
                self.state.advance(SessionPhase::Running);
                info!(
                    port = port,
                    debugger = %self.request.debugger,
                    server = %self.server_command_line(),
                    "Port forwarded debugger is listening on localhost"
                );
                Ok(port)
            }
            Err(err) => {
                if err.is_interrupted() {
                    info!(phase = %self.state.phase(), "Startup interrupted, cleaning up");
                } else {
                    error!(
                        error = %err,
                        phase = %self.state.phase(),
                        server = %self.server_command_line(),
                        "Debug session startup failed"
                    );
                }
                self.release().await;
                self.state.advance(SessionPhase::Failed);
                Err(err)
            }
        }
    }

    /// The prepared server command as a shell line, or `-` before preparation
    fn server_command_line(&self) -> String {
        self.state
            .server_command
            .as_ref()
            .map_or_else(|| "-".to_string(), ToolCommand::display)
    }

    async fn establish(&mut self) -> Result<u16> {
        let target = interruptible(
            &self.cancel,
            "resolving the container",
            resolve_container(
                &self.runner,
                &self.kubectl,
                &self.request.namespace,
                &self.request.pod,
                self.request.container.as_deref(),
            ),
        )
        .await?;
        info!(target = %target, "Debug target resolved");
        self.state.target = Some(target.clone());
        self.state.advance(SessionPhase::ContainerResolved);

        let version = interruptible(
            &self.cancel,
            "querying the cluster version",
            detect_cluster_version(&self.runner, &self.kubectl),
        )
        .await?;
        let strategy = select_strategy(&version);
        info!(version = %version, strategy = %strategy, "Session strategy resolved");
        self.state.cluster_version = Some(version);
        self.state.strategy = strategy;

        let preparer = StrategyPreparer::new(&self.runner, &self.kubectl, &self.builder, &self.config);
        let command = interruptible(
            &self.cancel,
            "preparing the debug server",
            preparer.prepare(strategy, &target, &self.request),
        )
        .await?;
        self.state.server_command = Some(command.clone());
        self.state.advance(SessionPhase::StrategyPrepared);

        let forward = self.kubectl.port_forward(
            &self.request.namespace,
            &self.request.pod,
            self.request.local_port,
            self.request.remote_port,
        );
        let tunnel = self.state.tunnel.insert(Tunnel::spawn(&self.runner, &forward)?);
        let port = tunnel
            .await_port(self.config.timeouts.tunnel_ready, &self.cancel)
            .await?;
        self.state.local_port = Some(port);
        self.state.advance(SessionPhase::TunnelUp);

        let server = self
            .state
            .server
            .insert(DebugServer::spawn(&self.runner, &command, self.request.debugger)?);
        server
            .await_ready(
                self.request.remote_port,
                self.config.timeouts.server_ready,
                &self.cancel,
            )
            .await?;
        self.state.advance(SessionPhase::ServerUp);

        Ok(port)
    }

    /// Stop whatever is running. Safe to call in any phase and more than once.
    pub async fn stop_debug(&mut self) {
        if self.state.phase().is_terminal() && !self.state.owns_processes() {
            debug!(phase = %self.state.phase(), "Session already stopped");
            return;
        }

        info!("Stopping debug");
        self.state.advance(SessionPhase::Stopping);
        self.release().await;
        self.state.advance(SessionPhase::Stopped);
    }

    /// Server first, then tunnel. Each failure is logged and skipped.
    async fn release(&mut self) {
        let stop_timeout = self.config.timeouts.stop;

        if let Some(mut server) = self.state.server.take() {
            info!(debugger = %server.kind(), "Stopping debugger");
            match (&self.state.target, server.owns_remote()) {
                (Some(target), true) => {
                    if let Err(e) = stop_server_remotely(&self.runner, &self.kubectl, target).await {
                        warn!(error = %e, "Failed to stop the remote debug server");
                    }
                }
                (_, false) => debug!("Remote port belongs to another server, leaving it running"),
                (None, true) => {}
            }
            if let Err(e) = server.stop_local(stop_timeout).await {
                warn!(error = %e, "Failed to stop the local debugger child");
            }
        }

        if let Some(mut tunnel) = self.state.tunnel.take() {
            if let Err(e) = tunnel.stop(stop_timeout).await {
                warn!(error = %e, "Failed to stop port-forward");
            }
        }
    }

    /// Relay child output until an interrupt or a child exit, then stop.
    ///
    /// The debug server exiting on its own is a normal end of the session;
    /// losing the tunnel is reported as an error.
    pub async fn run_until_interrupted(&mut self) -> Result<()> {
        if self.state.phase() != SessionPhase::Running {
            return Err(DebugError::SessionCommand(format!(
                "session is not running (phase {})",
                self.state.phase()
            )));
        }

        let outcome = self.supervise().await;
        self.stop_debug().await;
        outcome
    }

    async fn supervise(&mut self) -> Result<()> {
        let (Some(server), Some(tunnel)) = (self.state.server.as_mut(), self.state.tunnel.as_mut())
        else {
            return Ok(());
        };

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    info!("Interrupt received");
                    return Ok(());
                }
                line = server.next_line() => match line {
                    Some(line) => debug!(target: "debugger", "{}", line),
                    None => {
                        info!(debugger = %server.kind(), "Debug server exited");
                        return Ok(());
                    }
                },
                line = tunnel.next_line() => match line {
                    Some(line) => debug!(target: "port_forward", "{}", line),
                    None => {
                        error!("Port-forward exited unexpectedly");
                        return Err(DebugError::ProcessEnded("kubectl port-forward".to_string()));
                    }
                },
            }
        }
    }

    /// Write a core file through the running session, then stop it regardless
    pub async fn capture_core(&mut self, core_file: &Path, show_output: bool) -> Result<PathBuf> {
        let result = self.dump(core_file, show_output).await;
        if let Err(e) = &result {
            error!(error = %e, "Core dump failed");
        }
        self.stop_debug().await;
        result
    }

    async fn dump(&self, core_file: &Path, show_output: bool) -> Result<PathBuf> {
        let (Some(target), Some(port), SessionPhase::Running) =
            (&self.state.target, self.state.local_port, self.state.phase())
        else {
            return Err(DebugError::SessionCommand(format!(
                "core dump needs a running session (phase {})",
                self.state.phase()
            )));
        };

        let client = DumpClient {
            gdb_cmd: self.config.gdb_cmd.clone(),
            dlv_cmd: self.config.dlv_cmd.clone(),
            timeout: self.config.timeouts.core_dump,
            show_output,
        };
        interruptible(
            &self.cancel,
            "writing the core file",
            coredump::capture_core(
                &self.runner,
                &self.kubectl,
                &client,
                target,
                self.request.debugger,
                port,
                core_file,
            ),
        )
        .await
    }

    /// Interrupt debug servers left behind in the container by an earlier run.
    ///
    /// Starts nothing locally; returns how many remote processes were signalled.
    pub async fn cleanup_previous(&mut self) -> Result<usize> {
        info!("Trying to cleanup previous debugger session in the container");
        let result = self.stop_leftovers().await;
        match &result {
            Ok(_) => {
                self.state.advance(SessionPhase::Stopping);
                self.state.advance(SessionPhase::Stopped);
            }
            Err(e) => {
                error!(error = %e, "Cleanup of the previous session failed");
                self.state.advance(SessionPhase::Failed);
            }
        }
        result
    }

    async fn stop_leftovers(&mut self) -> Result<usize> {
        let target = interruptible(
            &self.cancel,
            "resolving the container",
            resolve_container(
                &self.runner,
                &self.kubectl,
                &self.request.namespace,
                &self.request.pod,
                self.request.container.as_deref(),
            ),
        )
        .await?;
        self.state.advance(SessionPhase::ContainerResolved);
        let stopped = stop_server_remotely(&self.runner, &self.kubectl, &target).await;
        self.state.target = Some(target);
        stopped
    }
}
