// ABOUTME: Supervises the kubectl port-forward child exposing the remote debug port locally
//
// The local port is only ever taken from the child's own "Forwarding from"
// announcement, so an unpinned port is whatever kubectl actually bound.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{DebugError, Result};
use crate::process::{
    stop_process, wait_for_pattern, Cancellation, ManagedProcess, PatternSet, ToolCommand,
    ToolRunner, WaitOutcome,
};

lazy_static! {
    static ref FORWARDING: Regex =
        Regex::new(r"Forwarding from .*:(\d+) -> ").expect("forwarding regex is valid");
}

/// Local port out of a `Forwarding from 127.0.0.1:54321 -> 2000` line
pub fn parse_forwarded_port(line: &str) -> Option<u16> {
    FORWARDING
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|port| port.as_str().parse().ok())
}

/// A running port-forward
pub struct Tunnel<P> {
    process: P,
    local_port: Option<u16>,
}

impl<P: ManagedProcess> Tunnel<P> {
    /// Start the port-forward; the port is unknown until [`Tunnel::await_port`]
    pub fn spawn<R>(runner: &R, command: &ToolCommand) -> Result<Self>
    where
        R: ToolRunner<Process = P>,
    {
        info!(command = %command.display(), "Starting port-forward");
        Ok(Self {
            process: runner.spawn(command)?,
            local_port: None,
        })
    }

    /// Announced local port, `None` until `await_port` saw it
    pub const fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Wait for the forwarding announcement and record the bound local port
    pub async fn await_port(&mut self, timeout: Duration, cancel: &Cancellation) -> Result<u16> {
        let patterns = PatternSet::new([FORWARDING.clone()]);
        match wait_for_pattern(&mut self.process, &patterns, timeout, cancel).await {
            WaitOutcome::Matched { line, .. } => {
                let port = parse_forwarded_port(&line).ok_or_else(|| {
                    DebugError::MalformedOutput(format!("cannot read local port from '{line}'"))
                })?;
                debug!(port = port, "Port-forward established");
                self.local_port = Some(port);
                Ok(port)
            }
            WaitOutcome::Ended => Err(DebugError::ProcessEnded("kubectl port-forward".to_string())),
            WaitOutcome::TimedOut => Err(DebugError::Timeout {
                what: "port-forward to announce its local port".to_string(),
                timeout,
            }),
            WaitOutcome::Cancelled => Err(DebugError::Interrupted(
                "waiting for port-forward".to_string(),
            )),
        }
    }

    /// Next output line; `None` once the child is gone
    pub async fn next_line(&mut self) -> Option<String> {
        self.process.next_line().await
    }

    /// Interrupt and reap; no-op when the child already exited
    pub async fn stop(&mut self, timeout: Duration) -> Result<()> {
        debug!("Sending SIGINT for port-forward");
        stop_process(&mut self.process, timeout).await?;
        debug!("Port-forward stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::FakeProcess;

    fn tunnel(process: FakeProcess) -> Tunnel<FakeProcess> {
        Tunnel {
            process,
            local_port: None,
        }
    }

    #[test]
    fn test_parse_forwarded_port() {
        assert_eq!(
            parse_forwarded_port("Forwarding from 127.0.0.1:54321 -> 2000"),
            Some(54321)
        );
        assert_eq!(parse_forwarded_port("Forwarding from [::1]:40001 -> 2000"), Some(40001));
        assert_eq!(parse_forwarded_port("Handling connection for 54321"), None);
    }

    #[tokio::test]
    async fn test_port_comes_from_announcement() {
        let mut tunnel = tunnel(FakeProcess::hanging(
            "kubectl port-forward",
            &["Forwarding from 127.0.0.1:54321 -> 2000", "Forwarding from [::1]:54321 -> 2000"],
        ));

        let port = tunnel
            .await_port(Duration::from_secs(1), &Cancellation::never())
            .await
            .unwrap();
        assert_eq!(port, 54321);
        assert_eq!(tunnel.local_port(), Some(54321));
    }

    #[tokio::test]
    async fn test_early_exit_is_distinct_from_timeout() {
        let mut ended = tunnel(FakeProcess::exiting(
            "kubectl port-forward",
            &["error: unable to forward port because pod is not running"],
        ));
        let result = ended.await_port(Duration::from_secs(1), &Cancellation::never()).await;
        assert!(matches!(result, Err(DebugError::ProcessEnded(_))));

        let mut silent = tunnel(FakeProcess::hanging("kubectl port-forward", &[]));
        let result = silent
            .await_port(Duration::from_millis(20), &Cancellation::never())
            .await;
        assert!(matches!(result, Err(DebugError::Timeout { .. })));
        assert_eq!(silent.local_port(), None);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let process = FakeProcess::hanging("kubectl port-forward", &[]);
        let interrupts = process.interrupt_counter();
        let mut tunnel = tunnel(process);

        tunnel.stop(Duration::from_secs(1)).await.unwrap();
        tunnel.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(interrupts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
