// ABOUTME: Typed builders for every kubectl invocation the orchestrator issues
//
// Values are always separate arguments. The only remote shell scripts are
// constants that receive their inputs as positional parameters.

use std::path::Path;
use std::time::Duration;

use crate::models::Target;
use crate::process::{StdinSource, ToolCommand};

/// Starts the debug server in an ephemeral container after a delay, so the
/// attach can complete before the server prints its banner.
/// `$0` is the delay, the rest is the server argv.
pub const DELAYED_EXEC_SCRIPT: &str = r#"sleep "$0" && exec "$@""#;

/// Sends SIGINT to every process whose name is one of the arguments and
/// prints the pids it signalled. Relies only on /proc and sh builtins.
pub const REMOTE_STOP_SCRIPT: &str = r#"for d in /proc/[0-9]*; do
  comm=""
  read -r comm 2>/dev/null < "$d/comm" || continue
  for name in "$@"; do
    if [ "$comm" = "$name" ]; then
      kill -INT "${d#/proc/}" 2>/dev/null && echo "${d#/proc/}"
    fi
  done
done
exit 0"#;

/// Command factory bound to one kubectl executable
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    timeout: Duration,
}

impl Kubectl {
    /// `timeout` bounds each one-shot command built here
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.program).timeout(self.timeout)
    }

    /// `kubectl version --output=json`
    pub fn version(&self) -> ToolCommand {
        self.command().args(["version", "--output=json"])
    }

    /// Space separated container names of a pod
    pub fn pod_containers(&self, namespace: &str, pod: &str) -> ToolCommand {
        self.command().args([
            "get",
            "pod",
            pod,
            "-n",
            namespace,
            "-o",
            "jsonpath={.spec.containers[*].name}",
        ])
    }

    /// Run `argv` in the target container
    pub fn exec<I, S>(&self, target: &Target, argv: I) -> ToolCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command()
            .args([
                "exec",
                "-n",
                target.namespace.as_str(),
                target.pod.as_str(),
                "-c",
                target.container.as_str(),
                "--",
            ])
            .args(argv)
    }

    /// Run `argv` in the target container with `stdin` attached
    pub fn exec_with_stdin<I, S>(&self, target: &Target, argv: I, stdin: StdinSource) -> ToolCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command()
            .args([
                "exec",
                "-i",
                "-n",
                target.namespace.as_str(),
                target.pod.as_str(),
                "-c",
                target.container.as_str(),
                "--",
            ])
            .args(argv)
            .stdin(stdin)
    }

    /// Copy a local file into the container
    pub fn copy_to(&self, target: &Target, local: &Path, remote: &str) -> ToolCommand {
        self.command().args([
            "cp".to_string(),
            local.display().to_string(),
            format!("{}/{}:{remote}", target.namespace, target.pod),
            "-c".to_string(),
            target.container.clone(),
        ])
    }

    /// Copy a file out of the container
    pub fn copy_from(&self, target: &Target, remote: &str, local: &Path) -> ToolCommand {
        self.command().args([
            "cp".to_string(),
            format!("{}/{}:{remote}", target.namespace, target.pod),
            local.display().to_string(),
            "-c".to_string(),
            target.container.clone(),
        ])
    }

    /// Long-lived tunnel; an unpinned local port is chosen by kubectl
    pub fn port_forward(
        &self,
        namespace: &str,
        pod: &str,
        local_port: Option<u16>,
        remote_port: u16,
    ) -> ToolCommand {
        let mapping = match local_port {
            Some(local) => format!("{local}:{remote_port}"),
            None => format!(":{remote_port}"),
        };
        ToolCommand::new(&self.program).args([
            "port-forward".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            format!("pod/{pod}"),
            mapping,
        ])
    }

    /// Ephemeral container sharing the target's process namespace
    pub fn debug<I, S>(&self, target: &Target, image: &str, argv: I) -> ToolCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolCommand::new(&self.program)
            .args([
                "debug".to_string(),
                "-n".to_string(),
                target.namespace.clone(),
                target.pod.clone(),
                format!("--image={image}"),
                format!("--target={}", target.container),
                "-i".to_string(),
                "--".to_string(),
            ])
            .args(argv)
    }

    /// Interrupt every remote process named like one of `names`
    pub fn stop_remote_processes(&self, target: &Target, names: &[&str]) -> ToolCommand {
        let mut argv = vec!["sh", "-c", REMOTE_STOP_SCRIPT, "sh"];
        argv.extend_from_slice(names);
        self.exec(target, argv)
    }
}
