// ABOUTME: Configuration management for kubedbg
// Handles tool paths, ephemeral debug images, static binary builds and timeouts

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::DebuggerKind;

/// Application configuration, merged from defaults and TOML files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the kubectl executable
    #[serde(default = "default_kubectl_cmd")]
    pub kubectl_cmd: String,

    /// Path to the gdb client (used for core dumps)
    #[serde(default = "default_gdb_cmd")]
    pub gdb_cmd: String,

    /// Path to the dlv client (used for core dumps)
    #[serde(default = "default_dlv_cmd")]
    pub dlv_cmd: String,

    /// Docker configuration for static binary builds
    #[serde(default)]
    pub docker: DockerConfig,

    /// Images launched by `kubectl debug` on clusters with ephemeral containers
    #[serde(default)]
    pub images: EphemeralImages,

    /// Static helper binary build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Bounds for every wait on an external process
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Docker daemon connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker host connection string
    /// Examples:
    /// - unix:///var/run/docker.sock
    /// - tcp://localhost:2376
    pub host: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_docker_timeout")]
    pub timeout: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout: default_docker_timeout(),
        }
    }
}

/// Debug server images, keyed by debugger kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralImages {
    /// Image providing `gdbserver`
    #[serde(default = "default_gdbserver_image")]
    pub gdbserver: Option<String>,

    /// Image providing `dlv`; there is no public default
    #[serde(default)]
    pub dlv: Option<String>,
}

impl Default for EphemeralImages {
    fn default() -> Self {
        Self {
            gdbserver: default_gdbserver_image(),
            dlv: None,
        }
    }
}

impl EphemeralImages {
    /// Image configured for the given debugger kind
    pub fn for_kind(&self, kind: DebuggerKind) -> Option<&str> {
        match kind {
            DebuggerKind::Gdb => self.gdbserver.as_deref(),
            DebuggerKind::Dlv => self.dlv.as_deref(),
        }
    }
}

/// Where static helper binaries are built from and extracted to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directory holding `Dockerfile-<binary>` build recipes
    #[serde(default = "default_dockerfile_dir")]
    pub dockerfile_dir: PathBuf,

    /// Directory the built binaries are extracted into
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Path of the binary inside the build image
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dockerfile_dir: default_dockerfile_dir(),
            output_dir: default_output_dir(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

/// Every bound, in seconds in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// Wait for `kubectl port-forward` to announce its local port
    #[serde(with = "duration_secs", default = "default_tunnel_ready")]
    pub tunnel_ready: Duration,

    /// Wait for the debug server to report it is listening
    #[serde(with = "duration_secs", default = "default_server_ready")]
    pub server_ready: Duration,

    /// Wait for an interrupted child to exit before killing it
    #[serde(with = "duration_secs", default = "default_stop")]
    pub stop: Duration,

    /// Upper bound for one-shot kubectl and debugger commands
    #[serde(with = "duration_secs", default = "default_command")]
    pub command: Duration,

    /// Upper bound for a static binary image build
    #[serde(with = "duration_secs", default = "default_build")]
    pub build: Duration,

    /// Upper bound for writing and retrieving a core dump
    #[serde(with = "duration_secs", default = "default_core_dump")]
    pub core_dump: Duration,

    /// Delay before the ephemeral container starts the debug server
    #[serde(with = "duration_secs", default = "default_ephemeral_attach_delay")]
    pub ephemeral_attach_delay: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            tunnel_ready: default_tunnel_ready(),
            server_ready: default_server_ready(),
            stop: default_stop(),
            command: default_command(),
            build: default_build(),
            core_dump: default_core_dump(),
            ephemeral_attach_delay: default_ephemeral_attach_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
/// Extra log sinks beyond stderr
pub struct LoggingConfig {
    /// Additional JSON lines log file or directory
    pub json_file: Option<PathBuf>,
}

fn default_kubectl_cmd() -> String {
    "kubectl".to_string()
}

fn default_gdb_cmd() -> String {
    "gdb".to_string()
}

fn default_dlv_cmd() -> String {
    "dlv".to_string()
}

fn default_docker_timeout() -> u64 {
    60
}

#[allow(clippy::unnecessary_wraps)]
fn default_gdbserver_image() -> Option<String> {
    Some("albertdupre/gdbserver:latest".to_string())
}

fn default_dockerfile_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_artifact_dir() -> String {
    "/build".to_string()
}

const fn default_tunnel_ready() -> Duration {
    Duration::from_secs(30)
}

const fn default_server_ready() -> Duration {
    Duration::from_secs(120)
}

const fn default_stop() -> Duration {
    Duration::from_secs(10)
}

const fn default_command() -> Duration {
    Duration::from_secs(120)
}

const fn default_build() -> Duration {
    Duration::from_secs(600)
}

const fn default_core_dump() -> Duration {
    Duration::from_secs(600)
}

const fn default_ephemeral_attach_delay() -> Duration {
    Duration::from_secs(5)
}

impl AppConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        for path in Self::get_config_paths() {
            if path.exists() {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config from {}", path.display()))?;

                let file_config: Self = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config from {}", path.display()))?;

                config.merge(file_config);
            }
        }

        Ok(config)
    }

    /// Get configuration file paths, lowest precedence first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/kubedbg/config.toml")];

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".kubedbg").join("config").join("config.toml"));
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".kubedbg").join("config.toml"));
        }

        paths
    }

    /// Merge another config into this one; values that differ from the defaults win
    fn merge(&mut self, other: Self) {
        if other.kubectl_cmd != default_kubectl_cmd() {
            self.kubectl_cmd = other.kubectl_cmd;
        }
        if other.gdb_cmd != default_gdb_cmd() {
            self.gdb_cmd = other.gdb_cmd;
        }
        if other.dlv_cmd != default_dlv_cmd() {
            self.dlv_cmd = other.dlv_cmd;
        }

        if other.docker.host.is_some() {
            self.docker.host = other.docker.host;
        }
        if other.docker.timeout != default_docker_timeout() {
            self.docker.timeout = other.docker.timeout;
        }

        if other.images.gdbserver != default_gdbserver_image() {
            self.images.gdbserver = other.images.gdbserver;
        }
        if other.images.dlv.is_some() {
            self.images.dlv = other.images.dlv;
        }

        if other.build.dockerfile_dir != default_dockerfile_dir() {
            self.build.dockerfile_dir = other.build.dockerfile_dir;
        }
        if other.build.output_dir != default_output_dir() {
            self.build.output_dir = other.build.output_dir;
        }
        if other.build.artifact_dir != default_artifact_dir() {
            self.build.artifact_dir = other.build.artifact_dir;
        }

        let defaults = Timeouts::default();
        let mine = &mut self.timeouts;
        let theirs = other.timeouts;
        if theirs.tunnel_ready != defaults.tunnel_ready {
            mine.tunnel_ready = theirs.tunnel_ready;
        }
        if theirs.server_ready != defaults.server_ready {
            mine.server_ready = theirs.server_ready;
        }
        if theirs.stop != defaults.stop {
            mine.stop = theirs.stop;
        }
        if theirs.command != defaults.command {
            mine.command = theirs.command;
        }
        if theirs.build != defaults.build {
            mine.build = theirs.build;
        }
        if theirs.core_dump != defaults.core_dump {
            mine.core_dump = theirs.core_dump;
        }
        if theirs.ephemeral_attach_delay != defaults.ephemeral_attach_delay {
            mine.ephemeral_attach_delay = theirs.ephemeral_attach_delay;
        }

        if other.logging.json_file.is_some() {
            self.logging.json_file = other.logging.json_file;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            kubectl_cmd: default_kubectl_cmd(),
            gdb_cmd: default_gdb_cmd(),
            dlv_cmd: default_dlv_cmd(),
            docker: DockerConfig::default(),
            images: EphemeralImages::default(),
            build: BuildConfig::default(),
            timeouts: Timeouts::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Serde helper for Duration as seconds (u64)
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
