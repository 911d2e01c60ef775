// ABOUTME: Turns "binary missing in the container" into "binary present in the container"
//
// A `BinaryBuilder` produces a static binary on local disk; the provisioner
// then pushes it into the target with kubectl. A failed attempt may leave the
// local artifact behind; the next attempt overwrites it.

/// Docker-backed static builds
pub mod docker;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::capability::staged_path;
use crate::error::{DebugError, Result};
use crate::kube::Kubectl;
use crate::models::Target;
use crate::process::{StdinSource, ToolRunner};

pub use docker::DockerBinaryBuilder;

/// Where the bootstrapped tar is installed
pub const REMOTE_TAR_PATH: &str = "/bin/tar";

/// Produces statically linked helper binaries
#[allow(async_fn_in_trait)]
pub trait BinaryBuilder {
    /// Build `name` and place it in `output_dir`, returning the file path
    async fn build_static(&self, name: &str, output_dir: &Path) -> Result<PathBuf>;
}

/// Injects locally built binaries into a target container
pub struct Provisioner<'a, R, B> {
    runner: &'a R,
    kubectl: &'a Kubectl,
    builder: &'a B,
    output_dir: &'a Path,
}

impl<'a, R: ToolRunner, B: BinaryBuilder> Provisioner<'a, R, B> {
    /// Built binaries land in `output_dir` before the copy
    pub const fn new(runner: &'a R, kubectl: &'a Kubectl, builder: &'a B, output_dir: &'a Path) -> Self {
        Self {
            runner,
            kubectl,
            builder,
            output_dir,
        }
    }

    /// Build `name` and copy it to the staging directory; returns the remote path
    pub async fn ensure_remote_binary(&self, target: &Target, name: &str) -> Result<String> {
        info!(binary = %name, "Provisioning static binary into the container");
        let local = self.builder.build_static(name, self.output_dir).await?;

        let remote = staged_path(name);
        let output = self
            .runner
            .run(&self.kubectl.copy_to(target, &local, &remote))
            .await?;
        if !output.success() {
            return Err(DebugError::cluster(
                format!("Cannot copy '{name}' into {target}"),
                output.combined(),
            ));
        }

        debug!(binary = %name, remote = %remote, "Binary copied into the container");
        Ok(remote)
    }

    /// Stream a static tar through `tee` so `kubectl cp` works afterwards
    pub async fn install_tar(&self, target: &Target) -> Result<()> {
        info!("Installing a static tar into the container");
        let local = self.builder.build_static("tar", self.output_dir).await?;

        let copy = self
            .kubectl
            .exec_with_stdin(target, ["tee", REMOTE_TAR_PATH], StdinSource::File(local))
            .discard_stdout();
        let output = self.runner.run(&copy).await?;
        if !output.success() {
            return Err(DebugError::cluster(
                format!("Cannot stream tar into {target}"),
                output.combined(),
            ));
        }

        let output = self
            .runner
            .run(&self.kubectl.exec(target, ["chmod", "+x", REMOTE_TAR_PATH]))
            .await?;
        if !output.success() {
            return Err(DebugError::cluster(
                format!("Cannot make {REMOTE_TAR_PATH} executable"),
                output.combined(),
            ));
        }

        debug!("tar installed");
        Ok(())
    }
}
