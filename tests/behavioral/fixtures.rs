// ABOUTME: Shared test fixtures and utilities for behavioral tests
//
// Provides:
// - FakeKubectl: a shell script standing in for kubectl, logging every call
// - RecordingBuilder: a BinaryBuilder that writes placeholder binaries
// - test_config(): AppConfig pointed at the fake with short timeouts

#![allow(dead_code)]

use anyhow::Result;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use kubedbg::config::AppConfig;
use kubedbg::error::Result as DebugResult;
use kubedbg::provision::BinaryBuilder;

const SCRIPT: &str = r#"#!/bin/sh
echo "$*" | tr '\n' ' ' >> "@LOG@"
echo >> "@LOG@"

serve() {
  if [ "@SERVER@" = "busy" ]; then
    echo "Can't bind address: Address in use." >&2
    exit 1
  fi
  echo "Listening on port 2000"
  trap 'echo "STOPPED server" >> "@LOG@"; exit 0' INT
  while :; do sleep 0.1; done
}

case "$1" in
  version)
    echo '{"clientVersion":{"gitVersion":"v1.29.0"},"serverVersion":{"gitVersion":"@VERSION@"}}'
    ;;
  get)
    echo "@CONTAINERS@"
    ;;
  port-forward)
    echo "Forwarding from 127.0.0.1:54321 -> 2000"
    trap 'echo "STOPPED port-forward" >> "@LOG@"; exit 0' INT
    while :; do sleep 0.1; done
    ;;
  debug)
    serve
    ;;
  exec)
    while [ "$#" -gt 0 ] && [ "$1" != "--" ]; do shift; done
    shift
    if [ "$2" = "--help" ]; then
      for present in @PRESENT@; do
        if [ "$present" = "$1" ]; then
          echo "Usage: $1"
          exit 0
        fi
      done
      echo "OCI runtime exec failed: exec: \"$1\": executable file not found in \$PATH: unknown" >&2
      echo "command terminated with exit code 126" >&2
      exit 126
    fi
    case "$1" in
      sh) echo 4242 ;;
      tee) cat > /dev/null ;;
      gdbserver|/tmp/gdbserver|dlv|/tmp/dlv) serve ;;
    esac
    ;;
esac
exit 0
"#;

/// How the fake debug server reacts to being started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBehaviour {
    Ready,
    Busy,
}

/// A kubectl stand-in living in its own temporary directory
pub struct FakeKubectl {
    pub dir: TempDir,
    pub program: PathBuf,
    pub log: PathBuf,
}

impl FakeKubectl {
    /// Cluster at `version` whose container has the `present` executables
    pub fn new(version: &str, present: &[&str], server: ServerBehaviour) -> Result<Self> {
        Self::with_containers(version, &["app"], present, server)
    }

    pub fn with_containers(
        version: &str,
        containers: &[&str],
        present: &[&str],
        server: ServerBehaviour,
    ) -> Result<Self> {
        let dir = TempDir::new()?;
        let program = dir.path().join("kubectl");
        let log = dir.path().join("calls.log");

        let script = SCRIPT
            .replace("@LOG@", &log.display().to_string())
            .replace("@VERSION@", version)
            .replace("@CONTAINERS@", &containers.join(" "))
            .replace("@PRESENT@", &present.join(" "))
            .replace(
                "@SERVER@",
                match server {
                    ServerBehaviour::Ready => "ready",
                    ServerBehaviour::Busy => "busy",
                },
            );
        std::fs::write(&program, script)?;
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755))?;
        std::fs::write(&log, "")?;

        Ok(Self { dir, program, log })
    }

    /// Every logged line: one per invocation plus STOPPED markers from traps
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }

    pub fn calls_starting(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(prefix)).collect()
    }

    pub fn calls_containing(&self, needle: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.contains(needle)).collect()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Config driving the fake with timeouts short enough for tests
pub fn test_config(kubectl: &FakeKubectl) -> AppConfig {
    let mut config = AppConfig::default();
    config.kubectl_cmd = kubectl.program.display().to_string();
    config.build.output_dir = kubectl.path().join("build");
    config.timeouts.tunnel_ready = Duration::from_secs(5);
    config.timeouts.server_ready = Duration::from_secs(5);
    config.timeouts.stop = Duration::from_secs(2);
    config.timeouts.command = Duration::from_secs(10);
    config.timeouts.ephemeral_attach_delay = Duration::from_secs(0);
    config
}

/// Writes a placeholder executable instead of running a Docker build
#[derive(Default)]
pub struct RecordingBuilder {
    built: Mutex<Vec<String>>,
}

impl RecordingBuilder {
    pub fn built(&self) -> Vec<String> {
        self.built.lock().unwrap().clone()
    }
}

impl BinaryBuilder for RecordingBuilder {
    async fn build_static(&self, name: &str, output_dir: &Path) -> DebugResult<PathBuf> {
        self.built.lock().unwrap().push(name.to_string());
        std::fs::create_dir_all(output_dir).unwrap();
        let path = output_dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        Ok(path)
    }
}
