// ABOUTME: Core dump capture through the established tunnel
//
// gdb writes the core straight to local disk. dlv can only dump inside the
// container, so its core is copied out and the remote copy removed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capability::staged_path;
use crate::error::{DebugError, Result};
use crate::kube::Kubectl;
use crate::models::{DebuggerKind, Target};
use crate::process::{StdinSource, ToolCommand, ToolOutput, ToolRunner};

/// Local debugger client settings for a dump
#[derive(Debug, Clone)]
pub struct DumpClient {
    /// gdb executable
    pub gdb_cmd: String,
    /// dlv executable
    pub dlv_cmd: String,
    /// Bound on the whole client run
    pub timeout: Duration,
    /// Log the client's output at info instead of debug
    pub show_output: bool,
}

/// `gdb -batch` session that attaches, writes `core_file` and detaches
pub fn gdb_dump_command(gdb: &str, local_port: u16, core_file: &Path) -> ToolCommand {
    ToolCommand::new(gdb).args([
        "-batch".to_string(),
        "-ex".to_string(),
        "set pagination off".to_string(),
        "-ex".to_string(),
        format!("target extended-remote localhost:{local_port}"),
        "-ex".to_string(),
        format!("gcore {}", core_file.display()),
        "-ex".to_string(),
        "disconnect".to_string(),
        "-ex".to_string(),
        "set confirm off".to_string(),
        "-ex".to_string(),
        "quit".to_string(),
    ])
}

/// `dlv connect` fed a dump request, leaving the target running afterwards
pub fn dlv_dump_command(dlv: &str, local_port: u16, remote_core: &str) -> ToolCommand {
    ToolCommand::new(dlv)
        .args(["connect".to_string(), format!("localhost:{local_port}")])
        .stdin(StdinSource::Bytes(
            format!("dump {remote_core}\nquit -c\n").into_bytes(),
        ))
}

fn log_client_output(client: &DumpClient, output: &ToolOutput) {
    for line in output.combined().lines() {
        if client.show_output {
            info!(target: "debugger", "{}", line);
        } else {
            debug!(target: "debugger", "{}", line);
        }
    }
}

async fn run_client<R: ToolRunner>(runner: &R, client: &DumpClient, command: ToolCommand) -> Result<()> {
    let output = runner.run(&command.timeout(client.timeout)).await?;
    log_client_output(client, &output);
    if !output.success() {
        return Err(DebugError::SessionCommand(output.combined()));
    }
    Ok(())
}

/// Write a core of the debugged process to `core_file`
pub async fn capture_core<R: ToolRunner>(
    runner: &R,
    kubectl: &Kubectl,
    client: &DumpClient,
    target: &Target,
    kind: DebuggerKind,
    local_port: u16,
    core_file: &Path,
) -> Result<PathBuf> {
    info!(path = %core_file.display(), "Generating core file");
    match kind {
        DebuggerKind::Gdb => {
            run_client(runner, client, gdb_dump_command(&client.gdb_cmd, local_port, core_file)).await?;
            if !core_file.exists() {
                return Err(DebugError::SessionCommand(format!(
                    "gdb finished but {} was not written",
                    core_file.display()
                )));
            }
        }
        DebuggerKind::Dlv => {
            let name = core_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| DebugError::Config(format!("{} is not a file path", core_file.display())))?;
            let remote = staged_path(&name);

            run_client(runner, client, dlv_dump_command(&client.dlv_cmd, local_port, &remote)).await?;

            let copied = runner.run(&kubectl.copy_from(target, &remote, core_file)).await;
            remove_remote_core(runner, kubectl, target, &remote).await;

            let copied = copied?;
            if !copied.success() {
                return Err(DebugError::cluster(
                    "Cannot cp from the container",
                    copied.combined(),
                ));
            }
        }
    }

    info!(path = %core_file.display(), "Core file written");
    Ok(core_file.to_path_buf())
}

async fn remove_remote_core<R: ToolRunner>(runner: &R, kubectl: &Kubectl, target: &Target, remote: &str) {
    match runner.run(&kubectl.exec(target, ["rm", "-f", remote])).await {
        Ok(output) if output.success() => debug!(path = %remote, "Removed remote core file"),
        Ok(output) => warn!(
            path = %remote,
            output = %output.combined(),
            "Cannot remove temporary file from the container"
        ),
        Err(e) => warn!(path = %remote, error = %e, "Cannot remove temporary file from the container"),
    }
}
