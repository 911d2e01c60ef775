// ABOUTME: CLI argument parsing for kubedbg
//
// One invocation runs one of three modes against a single pod:
// - Attach a debug server and keep the tunnel open until Ctrl+C (default)
// - Attach, write a core file and detach (--gcore)
// - Stop debug servers a previous run left behind (--cleanup-prev-dbgserver)

/// Mode dispatch
pub mod run;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::models::{DebugRequest, DebuggerKind};

/// Debug a process in a Kubernetes container through a port-forwarded gdbserver or dlv
#[derive(Parser, Debug)]
#[command(name = "kubedbg")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Pod to debug
    pub pod: String,

    /// Namespace of the pod
    #[arg(long, short, default_value = "default")]
    pub namespace: String,

    /// Container to debug (required when the pod has several)
    #[arg(long, short)]
    pub container: Option<String>,

    /// Process id inside the container to attach to
    #[arg(long, short, default_value_t = 1)]
    pub pid: u32,

    /// Local port for the tunnel (chosen by kubectl when omitted)
    #[arg(long, short)]
    pub local_port: Option<u16>,

    /// Port the debug server listens on inside the container
    #[arg(long, short, default_value_t = 2000)]
    pub remote_port: u16,

    /// Debug a Go program with dlv instead of gdbserver
    #[arg(long)]
    pub golang: bool,

    /// kubectl executable to use
    #[arg(long)]
    pub kubectl_cmd: Option<String>,

    /// Docker host used to build static helper binaries
    #[arg(long)]
    pub docker_host: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log: LogLevel,

    /// Also write JSON-lines logs to this file (or a timestamped file in this directory)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Echo the debugger client's output while writing a core file
    #[arg(long)]
    pub show_debugger_output: bool,

    /// Stop debug servers left in the container by a previous run, then exit
    #[arg(long, conflicts_with = "gcore")]
    pub cleanup_prev_dbgserver: bool,

    /// Write a core file of the target process to FILE, then exit
    #[arg(long, value_name = "FILE")]
    pub gcore: Option<PathBuf>,
}

/// Console log level
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Every external command and phase change
    Debug,
    /// Session milestones
    #[default]
    Info,
    /// Failures only
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

/// What this invocation does once the target is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Keep a debug server reachable until interrupted
    Attach,
    /// Write a core file to the given local path
    CoreDump(PathBuf),
    /// Stop servers a previous run left in the container
    CleanupPrevious,
}

impl Cli {
    /// dlv for `--golang`, gdbserver otherwise
    pub const fn debugger(&self) -> DebuggerKind {
        if self.golang {
            DebuggerKind::Dlv
        } else {
            DebuggerKind::Gdb
        }
    }

    /// `--cleanup-prev-dbgserver` wins over `--gcore`
    pub fn mode(&self) -> Mode {
        if self.cleanup_prev_dbgserver {
            Mode::CleanupPrevious
        } else if let Some(core_file) = &self.gcore {
            Mode::CoreDump(core_file.clone())
        } else {
            Mode::Attach
        }
    }

    /// The session parameters given on the command line
    pub fn request(&self) -> DebugRequest {
        let request = DebugRequest::new(&self.namespace, &self.pod)
            .with_pid(self.pid)
            .with_ports(self.remote_port, self.local_port)
            .with_debugger(self.debugger());
        match &self.container {
            Some(container) => request.with_container(container),
            None => request,
        }
    }

    /// Command line values win over every config file
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(kubectl) = &self.kubectl_cmd {
            config.kubectl_cmd.clone_from(kubectl);
        }
        if let Some(host) = &self.docker_host {
            config.docker.host = Some(host.clone());
        }
        if let Some(path) = &self.log_file {
            config.logging.json_file = Some(path.clone());
        }
    }
}
