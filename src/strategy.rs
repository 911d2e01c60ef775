// ABOUTME: Chooses how the debug server gets into the container and builds its start command
//
// Clusters with ephemeral containers get a throwaway sidecar from an image that
// already ships the server. Older clusters get the server copied in, which may
// first require bootstrapping a tar binary so `kubectl cp` works at all.

use std::fmt;

use tracing::{debug, info};

use crate::capability::{is_executable_present, locate_executable, ClusterVersion};
use crate::config::AppConfig;
use crate::error::{DebugError, Result};
use crate::kube::{Kubectl, DELAYED_EXEC_SCRIPT};
use crate::models::{DebugRequest, Target};
use crate::process::{ToolCommand, ToolRunner};
use crate::provision::{BinaryBuilder, Provisioner};

/// How the debug server is started inside the pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Cluster version not known yet
    Unresolved,
    /// `kubectl debug` sidecar sharing the target's process namespace
    EphemeralAttach,
    /// Server binary copied into the target container and run with `kubectl exec`
    CopyBasedAttach,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unresolved => "unresolved",
            Self::EphemeralAttach => "ephemeral-attach",
            Self::CopyBasedAttach => "copy-based-attach",
        })
    }
}

/// Unparseable or empty versions are treated as old clusters
pub fn select_strategy(version: &str) -> Strategy {
    match ClusterVersion::parse(version) {
        Some(parsed) if parsed.supports_ephemeral_containers() => Strategy::EphemeralAttach,
        Some(_) => Strategy::CopyBasedAttach,
        None => {
            debug!(version = %version, "Unrecognised cluster version, assuming no ephemeral containers");
            Strategy::CopyBasedAttach
        }
    }
}

/// `kubectl debug … -- sh -c <delay script> <delay> <server argv>`
pub fn ephemeral_command(
    kubectl: &Kubectl,
    target: &Target,
    image: &str,
    delay_secs: u64,
    request: &DebugRequest,
) -> ToolCommand {
    let kind = request.debugger;
    let mut argv = vec![
        "sh".to_string(),
        "-c".to_string(),
        DELAYED_EXEC_SCRIPT.to_string(),
        delay_secs.to_string(),
    ];
    argv.extend(kind.server_args(kind.server_binary(), request.remote_port, request.pid));
    kubectl.debug(target, image, argv)
}

/// `kubectl exec … -- <server> <args>` for a binary already in the container
pub fn copy_based_command(
    kubectl: &Kubectl,
    target: &Target,
    server_path: &str,
    request: &DebugRequest,
) -> ToolCommand {
    let kind = request.debugger;
    kubectl.exec(target, kind.server_args(server_path, request.remote_port, request.pid))
}

/// Runs whatever preparation the chosen strategy needs
pub struct StrategyPreparer<'a, R, B> {
    runner: &'a R,
    kubectl: &'a Kubectl,
    builder: &'a B,
    config: &'a AppConfig,
}

impl<'a, R: ToolRunner, B: BinaryBuilder> StrategyPreparer<'a, R, B> {
    /// Borrows everything preparation may touch
    pub const fn new(runner: &'a R, kubectl: &'a Kubectl, builder: &'a B, config: &'a AppConfig) -> Self {
        Self {
            runner,
            kubectl,
            builder,
            config,
        }
    }

    /// Resolve the debug server start command for `strategy`
    pub async fn prepare(
        &self,
        strategy: Strategy,
        target: &Target,
        request: &DebugRequest,
    ) -> Result<ToolCommand> {
        match strategy {
            Strategy::EphemeralAttach => self.prepare_ephemeral(target, request),
            Strategy::CopyBasedAttach => self.prepare_copy_based(target, request).await,
            Strategy::Unresolved => Err(DebugError::SessionCommand(
                "no session strategy was resolved".to_string(),
            )),
        }
    }

    fn prepare_ephemeral(&self, target: &Target, request: &DebugRequest) -> Result<ToolCommand> {
        info!(
            debugger = %request.debugger,
            "Ephemeral containers are supported, so using 'kubectl debug'"
        );
        let image = self.config.images.for_kind(request.debugger).ok_or_else(|| {
            DebugError::Config(format!(
                "no ephemeral container image configured for {} (set images.{})",
                request.debugger,
                request.debugger.server_binary()
            ))
        })?;

        Ok(ephemeral_command(
            self.kubectl,
            target,
            image,
            self.config.timeouts.ephemeral_attach_delay.as_secs(),
            request,
        ))
    }

    async fn prepare_copy_based(&self, target: &Target, request: &DebugRequest) -> Result<ToolCommand> {
        let server = request.debugger.server_binary();
        info!(debugger = %server, "Using kubectl cp to set up the debug server");

        let provisioner = Provisioner::new(
            self.runner,
            self.kubectl,
            self.builder,
            &self.config.build.output_dir,
        );

        self.ensure_file_transfer(target, &provisioner).await?;

        let presence = locate_executable(self.runner, self.kubectl, target, server).await?;
        let server_path = match presence.invocation(server) {
            Some(path) => path,
            None => provisioner.ensure_remote_binary(target, server).await?,
        };
        debug!(path = %server_path, "Debug server available in the container");

        Ok(copy_based_command(self.kubectl, target, &server_path, request))
    }

    /// Make sure `kubectl cp` can work: tar on the PATH, or bootstrapped through tee
    async fn ensure_file_transfer(
        &self,
        target: &Target,
        provisioner: &Provisioner<'_, R, B>,
    ) -> Result<()> {
        if is_executable_present(self.runner, self.kubectl, target, "tar").await? {
            return Ok(());
        }
        if !is_executable_present(self.runner, self.kubectl, target, "tee").await? {
            return Err(DebugError::NoFileTransferTool(target.to_string()));
        }
        provisioner.install_tar(target).await
    }
}
