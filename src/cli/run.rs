// ABOUTME: Executes the selected mode against the real cluster tools
//
// Checks local tools up front, then hands everything to the session
// controller. The controller owns teardown; this layer only reports.

use anyhow::{Context, Result};
use tracing::info;

use super::{Cli, Mode};
use crate::capability::require_local_tool;
use crate::config::AppConfig;
use crate::controller::SessionController;
use crate::models::DebuggerKind;
use crate::process::{Cancellation, SystemRunner};
use crate::provision::DockerBinaryBuilder;

/// Local executables the given mode cannot work without
pub fn required_tools(config: &AppConfig, mode: &Mode, debugger: DebuggerKind) -> Vec<String> {
    let mut tools = vec![config.kubectl_cmd.clone()];
    if matches!(mode, Mode::CoreDump(_)) {
        tools.push(match debugger {
            DebuggerKind::Gdb => config.gdb_cmd.clone(),
            DebuggerKind::Dlv => config.dlv_cmd.clone(),
        });
    }
    tools
}

/// How to point a local client at the tunnel
pub fn connect_hint(debugger: DebuggerKind, local_port: u16) -> String {
    match debugger {
        DebuggerKind::Gdb => format!("gdb -ex 'target extended-remote localhost:{local_port}'"),
        DebuggerKind::Dlv => format!("dlv connect localhost:{local_port}"),
    }
}

/// Execute the invocation described by `cli`
pub async fn execute(cli: &Cli, config: AppConfig, cancel: Cancellation) -> Result<()> {
    let mode = cli.mode();
    let request = cli.request();

    for tool in required_tools(&config, &mode, request.debugger) {
        require_local_tool(&tool)?;
    }

    let builder = DockerBinaryBuilder::new(&config);
    let mut session = SessionController::new(SystemRunner::new(), builder, config, request, cancel);

    match mode {
        Mode::CleanupPrevious => {
            let stopped = session
                .cleanup_previous()
                .await
                .context("Failed to clean up the previous debug server")?;
            info!(count = stopped, "Previous debugger session cleaned up");
        }
        Mode::CoreDump(core_file) => {
            session.start_debug().await.context("Failed to start the debug session")?;
            let written = session
                .capture_core(&core_file, cli.show_debugger_output)
                .await
                .context("Failed to write the core file")?;
            println!("Core file written to {}", written.display());
        }
        Mode::Attach => {
            let port = session.start_debug().await.context("Failed to start the debug session")?;
            println!("Debugger is listening on localhost:{port}");
            println!("Connect with: {}", connect_hint(session.request().debugger, port));
            println!("Press Ctrl+C to stop");
            session.run_until_interrupted().await?;
        }
    }

    Ok(())
}
