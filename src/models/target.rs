// ABOUTME: Immutable identity of a debug target and the debugger flavour to run against it

use std::fmt;

/// Debug server flavour to run inside the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebuggerKind {
    /// gdbserver speaking the gdb remote serial protocol
    Gdb,
    /// Delve running as a headless JSON-RPC server
    Dlv,
}

impl DebuggerKind {
    /// Every kind, used when hunting for leftover remote servers
    pub const ALL: [Self; 2] = [Self::Gdb, Self::Dlv];

    /// Name of the remote server executable (also its process name)
    pub const fn server_binary(self) -> &'static str {
        match self {
            Self::Gdb => "gdbserver",
            Self::Dlv => "dlv",
        }
    }

    /// Arguments that start the server attached to `pid` listening on `port`
    pub fn server_args(self, binary: &str, port: u16, pid: u32) -> Vec<String> {
        let listen = format!("localhost:{port}");
        match self {
            Self::Gdb => vec![
                binary.to_string(),
                "--attach".to_string(),
                listen,
                pid.to_string(),
            ],
            Self::Dlv => vec![
                binary.to_string(),
                "--headless".to_string(),
                "--accept-multiclient".to_string(),
                "--only-same-user=false".to_string(),
                "--api-version=2".to_string(),
                "--listen".to_string(),
                listen,
                "attach".to_string(),
                pid.to_string(),
            ],
        }
    }
}

impl fmt::Display for DebuggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.server_binary())
    }
}

/// Everything the operator asked for, fixed for the whole invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugRequest {
    /// Namespace of the pod
    pub namespace: String,
    /// Pod holding the target process
    pub pod: String,
    /// Container chosen on the command line, if any
    pub container: Option<String>,
    /// Process id inside the container to attach to
    pub pid: u32,
    /// Port the server listens on inside the pod
    pub remote_port: u16,
    /// Pinned local port; `None` lets port-forward choose
    pub local_port: Option<u16>,
    /// Which server to run
    pub debugger: DebuggerKind,
}

impl DebugRequest {
    /// Defaults: pid 1, remote port 2000, gdbserver, no container chosen
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
            pid: 1,
            remote_port: 2000,
            local_port: None,
            debugger: DebuggerKind::Gdb,
        }
    }

    /// Skip container lookup
    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// gdbserver or dlv
    #[must_use]
    pub const fn with_debugger(mut self, debugger: DebuggerKind) -> Self {
        self.debugger = debugger;
        self
    }

    /// Remote server port and optional pinned local port
    #[must_use]
    pub const fn with_ports(mut self, remote_port: u16, local_port: Option<u16>) -> Self {
        self.remote_port = remote_port;
        self.local_port = local_port;
        self
    }

    /// Attach to `pid` as seen inside the container
    #[must_use]
    pub const fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }
}

/// A pod container whose name has been resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Namespace of the pod
    pub namespace: String,
    /// Pod name
    pub pod: String,
    /// Container the server attaches into
    pub container: String,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.namespace, self.pod, self.container)
    }
}
