// ABOUTME: Builds static helper binaries in Docker and extracts them to local disk
//
// Image `<name>-static-<user>` is built from `Dockerfile-<name>`; the binary is
// copied out of a transient container created from it, and that container is
// always removed afterwards.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, RemoveContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use tar::{Archive, Builder, Header};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use super::BinaryBuilder;
use crate::config::AppConfig;
use crate::error::{DebugError, Result};

/// Builds binaries with the local Docker daemon
#[derive(Debug, Clone)]
pub struct DockerBinaryBuilder {
    host: Option<String>,
    connect_timeout: u64,
    dockerfile_dir: PathBuf,
    artifact_dir: String,
    build_timeout: Duration,
    user: String,
}

impl DockerBinaryBuilder {
    /// Nothing is contacted until the first build
    pub fn new(config: &AppConfig) -> Self {
        Self {
            host: config.docker.host.clone(),
            connect_timeout: config.docker.timeout,
            dockerfile_dir: config.build.dockerfile_dir.clone(),
            artifact_dir: config.build.artifact_dir.clone(),
            build_timeout: config.timeouts.build,
            user: current_user(),
        }
    }

    /// Tag of the build image for `name`
    pub fn image_tag(&self, name: &str) -> String {
        format!("{name}-static-{}", self.user)
    }

    fn connect(&self) -> Result<Docker> {
        let docker = match self.host.as_deref() {
            Some(host) if host.starts_with("unix://") => {
                info!("Using Docker host from config: {}", host);
                Docker::connect_with_socket(host, self.connect_timeout, API_DEFAULT_VERSION)
            }
            Some(host) => {
                info!("Using Docker host from config: {}", host);
                Docker::connect_with_http(host, self.connect_timeout, API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        };
        docker.map_err(|e| DebugError::provisioning("docker", format!("Failed to connect to Docker: {e}")))
    }

    async fn build_image(&self, docker: &Docker, name: &str, tag: &str) -> Result<()> {
        let dockerfile = format!("Dockerfile-{name}");
        if !self.dockerfile_dir.join(&dockerfile).is_file() {
            return Err(DebugError::provisioning(
                name,
                format!("{dockerfile} not found in {}", self.dockerfile_dir.display()),
            ));
        }

        info!("Building Docker image: {}", tag);
        let context = create_build_context(&self.dockerfile_dir)
            .await
            .map_err(|e| DebugError::provisioning(name, format!("Cannot create build context: {e}")))?;

        let options = BuildImageOptions {
            dockerfile: dockerfile.as_str(),
            t: tag,
            rm: true,
            ..Default::default()
        };

        let mut build_stream = docker.build_image(options, None, Some(context.into()));
        while let Some(build_result) = build_stream.next().await {
            match build_result {
                Ok(build_info) => {
                    if let Some(stream) = &build_info.stream {
                        debug!("Build: {}", stream.trim());
                    }
                    if let Some(error) = &build_info.error {
                        error!("Build error: {}", error);
                        return Err(DebugError::provisioning(name, format!("Build failed: {error}")));
                    }
                }
                Err(e) => {
                    error!("Build stream error: {}", e);
                    return Err(DebugError::provisioning(name, format!("Build stream error: {e}")));
                }
            }
        }

        info!("Successfully built image: {}", tag);
        Ok(())
    }

    async fn copy_out(
        &self,
        docker: &Docker,
        container_id: &str,
        name: &str,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let options = DownloadFromContainerOptions {
            path: format!("{}/{name}", self.artifact_dir.trim_end_matches('/')),
        };

        let mut archive = Vec::new();
        let mut stream = Box::pin(docker.download_from_container(container_id, Some(options)));
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                DebugError::provisioning(name, format!("Cannot copy out of the build container: {e}"))
            })?;
            archive.extend_from_slice(&chunk);
        }

        extract_binary(&archive, name, output_dir)
    }

    async fn remove(&self, docker: &Docker, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match docker.remove_container(container_id, Some(options)).await {
            Ok(()) => debug!("Removed transient container {}", container_id),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => debug!("Container {} was already removed", container_id),
            Err(e) => warn!("Failed to remove transient container {}: {}", container_id, e),
        }
    }
}

impl BinaryBuilder for DockerBinaryBuilder {
    async fn build_static(&self, name: &str, output_dir: &Path) -> Result<PathBuf> {
        let docker = self.connect()?;
        let tag = self.image_tag(name);

        tokio::time::timeout(self.build_timeout, self.build_image(&docker, name, &tag))
            .await
            .map_err(|_| DebugError::Timeout {
                what: format!("docker build of {tag}"),
                timeout: self.build_timeout,
            })??;

        let container_name = format!("{name}-extract-{}", uuid::Uuid::new_v4().simple());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let config = Config {
            image: Some(tag.as_str()),
            cmd: Some(vec!["true"]),
            ..Default::default()
        };
        let created = docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| DebugError::provisioning(name, format!("Cannot create container from {tag}: {e}")))?;
        debug!("Created transient container {} ({})", container_name, created.id);

        let result = self.copy_out(&docker, &created.id, name, output_dir).await;
        self.remove(&docker, &created.id).await;

        let path = result?;
        info!(binary = %name, path = %path.display(), "Static binary ready");
        Ok(path)
    }
}

/// Login name of the invoking user, used to keep image tags per user
fn current_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "user".to_string())
}

/// Pull the file called `name` out of a tar stream and make it executable
pub fn extract_binary(archive: &[u8], name: &str, output_dir: &Path) -> Result<PathBuf> {
    let io_error = |source: std::io::Error| DebugError::provisioning(name, format!("Cannot unpack: {source}"));

    let mut archive = Archive::new(Cursor::new(archive));
    for entry in archive.entries().map_err(io_error)? {
        let mut entry = entry.map_err(io_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .map_err(io_error)?
            .file_name()
            .is_some_and(|file| file == name);
        if !matches {
            continue;
        }

        let destination = output_dir.join(name);
        entry.unpack(&destination).map_err(io_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&destination, std::fs::Permissions::from_mode(0o755))
                .map_err(|source| DebugError::Io {
                    path: destination.clone(),
                    source,
                })?;
        }
        return Ok(destination);
    }

    Err(DebugError::provisioning(name, "binary not found in the build output"))
}

/// Tar up the build directory
async fn create_build_context(context_dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut files = Vec::new();
    collect_files(context_dir, "", &mut files).await?;

    let mut build_context = Vec::new();
    let mut tar_builder = Builder::new(&mut build_context);

    for (tar_path, file_path, is_dir) in files {
        let mut header = Header::new_gnu();
        if is_dir {
            header.set_path(format!("{tar_path}/"))?;
            header.set_size(0);
            header.set_mode(0o755);
            header.set_entry_type(tar::EntryType::Directory);
            header.set_cksum();
            tar_builder.append(&header, std::io::empty())?;
        } else {
            let mut file = tokio::fs::File::open(&file_path).await?;
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer).await?;
            header.set_path(&tar_path)?;
            header.set_size(buffer.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar_builder.append(&header, Cursor::new(buffer))?;
        }
    }

    tar_builder.finish()?;
    drop(tar_builder);
    Ok(build_context)
}

fn collect_files<'a>(
    dir_path: &'a Path,
    prefix: &'a str,
    files: &'a mut Vec<(String, PathBuf, bool)>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            let tar_path = if prefix.is_empty() {
                name.to_string_lossy().to_string()
            } else {
                format!("{}/{}", prefix, name.to_string_lossy())
            };

            if path.is_file() {
                // Previously extracted binaries and cores are not build inputs
                if name.to_string_lossy().starts_with("core") {
                    continue;
                }
                files.push((tar_path, path, false));
            } else if path.is_dir() {
                if name == ".git" || name == "target" || name == ".cache" {
                    continue;
                }
                files.push((tar_path.clone(), path.clone(), true));
                collect_files(&path, &tar_path, files).await?;
            }
        }

        Ok(())
    })
}
