// ABOUTME: Main entry point for kubedbg
//
// Binary: kubedbg
// Usage: kubedbg [OPTIONS] <POD>
// - No mode flag: attach a debug server and keep the tunnel open until Ctrl+C
// - --gcore FILE: attach, write a core file and detach
// - --cleanup-prev-dbgserver: stop debug servers a previous run left behind

//! `kubedbg` command line entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use kubedbg::cli::{self, Cli, LogLevel};
use kubedbg::config::AppConfig;
use kubedbg::process::Cancellation;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = AppConfig::load()?;
    args.apply_overrides(&mut config);

    setup_logging(args.log, config.logging.json_file.as_deref())?;
    setup_panic_handler();

    // Children run in their own process groups, so Ctrl+C only reaches us
    let (handle, cancel) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping the debug session");
            handle.cancel();
        }
    });

    let result = cli::run::execute(&args, config, cancel).await;
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

/// A directory gets a timestamped file inside it
fn json_log_path(requested: &Path) -> PathBuf {
    if requested.is_dir() {
        requested.join(format!(
            "kubedbg-{}.jsonl",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        ))
    } else {
        requested.to_path_buf()
    }
}

fn setup_logging(level: LogLevel, json_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let json_layer = match json_file {
        Some(requested) => {
            let path = json_log_path(requested);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .json() // Output in JSON Lines format
                    .with_target(true)
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive())))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(json_layer)
        .init();
    Ok(())
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Debug server processes may still be running in the container.");
        eprintln!("Run again with --cleanup-prev-dbgserver to stop them.");
    }));
}
