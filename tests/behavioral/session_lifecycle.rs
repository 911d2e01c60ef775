// ABOUTME: Behavioral tests for a full debug session against a scripted kubectl
//
// These run the real process plumbing: children are spawned, their output
// parsed, and SIGINT delivered to their process groups.

use super::fixtures::{test_config, FakeKubectl, RecordingBuilder, ServerBehaviour};
use kubedbg::controller::SessionController;
use kubedbg::error::DebugError;
use kubedbg::models::{DebugRequest, SessionPhase};
use kubedbg::process::{Cancellation, SystemRunner};
use kubedbg::strategy::Strategy;
use pretty_assertions::assert_eq;

fn session(
    kubectl: &FakeKubectl,
    request: DebugRequest,
) -> SessionController<SystemRunner, RecordingBuilder> {
    SessionController::new(
        SystemRunner::new(),
        RecordingBuilder::default(),
        test_config(kubectl),
        request,
        Cancellation::never(),
    )
}

/// Old cluster, tools present: attach over exec, then stop both children
#[tokio::test]
async fn test_copy_based_session_starts_and_stops() {
    let kubectl = FakeKubectl::new("v1.24.3", &["tar", "gdbserver"], ServerBehaviour::Ready).unwrap();
    let mut session = session(&kubectl, DebugRequest::new("default", "web-0"));

    let port = session.start_debug().await.expect("session should start");

    assert_eq!(port, 54321);
    assert_eq!(session.phase(), SessionPhase::Running);
    assert_eq!(session.state().strategy, Strategy::CopyBasedAttach);
    assert_eq!(
        kubectl.calls_starting("port-forward"),
        vec!["port-forward -n default pod/web-0 :2000"]
    );
    assert_eq!(
        kubectl.calls_containing("-- gdbserver --attach localhost:2000 1").len(),
        1
    );

    session.stop_debug().await;

    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert_eq!(kubectl.calls_containing("/proc/").len(), 1, "remote stop issued once");
    assert_eq!(kubectl.calls_containing("STOPPED server").len(), 1);
    assert_eq!(kubectl.calls_containing("STOPPED port-forward").len(), 1);

    // Idempotent: nothing further reaches the cluster
    let before = kubectl.calls().len();
    session.stop_debug().await;
    assert_eq!(kubectl.calls().len(), before);
}

/// Someone else holds the remote port: fail, stop the tunnel, leave their server alone
#[tokio::test]
async fn test_port_conflict_tears_down_tunnel_only() {
    let kubectl = FakeKubectl::new("v1.24.3", &["tar", "gdbserver"], ServerBehaviour::Busy).unwrap();
    let mut session = session(&kubectl, DebugRequest::new("default", "web-0"));

    let result = session.start_debug().await;

    assert!(
        matches!(result, Err(DebugError::PortConflict(2000))),
        "expected port conflict, got {result:?}"
    );
    assert!(result.as_ref().is_err_and(DebugError::is_port_conflict));
    assert_eq!(session.phase(), SessionPhase::Failed);
    assert_eq!(kubectl.calls_containing("STOPPED port-forward").len(), 1);
    assert!(kubectl.calls_containing("/proc/").is_empty());
}

/// Neither tar nor tee: fail before any child is started
#[tokio::test]
async fn test_container_without_transfer_tools_is_rejected() {
    let kubectl = FakeKubectl::new("", &[], ServerBehaviour::Ready).unwrap();
    let mut session = session(&kubectl, DebugRequest::new("default", "web-0"));

    let result = session.start_debug().await;

    assert!(matches!(result, Err(DebugError::NoFileTransferTool(_))));
    assert!(kubectl.calls_starting("port-forward").is_empty());
    assert!(kubectl.calls_containing("gdbserver --help").is_empty());
}

/// Only tee available: tar and gdbserver are built locally and pushed in
#[tokio::test]
async fn test_missing_tools_are_provisioned() {
    let kubectl = FakeKubectl::new("v1.20.15", &["tee"], ServerBehaviour::Ready).unwrap();
    let mut session = session(&kubectl, DebugRequest::new("default", "web-0").with_pid(7));

    session.start_debug().await.expect("session should start");
    session.stop_debug().await;

    let calls = kubectl.calls();
    let position = |needle: &str| {
        calls
            .iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("no call containing '{needle}' in {calls:#?}"))
    };
    assert!(position("exec -i -n default web-0 -c app -- tee /bin/tar") < position("-- chmod +x /bin/tar"));
    assert!(position("-- chmod +x /bin/tar") < position("default/web-0:/tmp/gdbserver"));
    assert!(position("default/web-0:/tmp/gdbserver") < position("-- /tmp/gdbserver --attach localhost:2000 7"));

    assert_eq!(session.builder().built(), vec!["tar", "gdbserver"]);
}

/// New cluster: ephemeral container, no presence probes at all
#[tokio::test]
async fn test_ephemeral_session_skips_probes() {
    let kubectl = FakeKubectl::new("v1.27.1-gke.100", &[], ServerBehaviour::Ready).unwrap();
    let mut session = session(&kubectl, DebugRequest::new("staging", "api-0").with_container("api"));

    session.start_debug().await.expect("session should start");
    session.stop_debug().await;

    assert_eq!(session.state().strategy, Strategy::EphemeralAttach);
    assert!(kubectl.calls_containing("--help").is_empty());
    assert!(kubectl.calls_starting("get").is_empty());
    assert_eq!(
        kubectl
            .calls_containing("debug -n staging api-0 --image=albertdupre/gdbserver:latest --target=api -i --")
            .len(),
        1
    );
    assert_eq!(kubectl.calls_containing("STOPPED server").len(), 1);
}

/// Several containers and none chosen: one listing call, then a clear error
#[tokio::test]
async fn test_ambiguous_pod_lists_containers() {
    let kubectl =
        FakeKubectl::with_containers("v1.27.1", &["app", "envoy"], &[], ServerBehaviour::Ready).unwrap();
    let mut session = session(&kubectl, DebugRequest::new("default", "web-0"));

    let err = session.start_debug().await.unwrap_err();

    assert!(err.to_string().contains("app, envoy"), "unexpected message: {err}");
    assert_eq!(kubectl.calls().len(), 1);
}

/// Cleanup mode only talks to the container, never starts children
#[tokio::test]
async fn test_cleanup_previous_session() {
    let kubectl = FakeKubectl::new("v1.24.3", &[], ServerBehaviour::Ready).unwrap();
    let mut session = session(&kubectl, DebugRequest::new("default", "web-0").with_container("app"));

    let stopped = session.cleanup_previous().await.expect("cleanup should succeed");

    assert_eq!(stopped, 1);
    assert_eq!(session.phase(), SessionPhase::Stopped);
    let calls = kubectl.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("exec -n default web-0 -c app -- sh -c"));
    assert!(calls[0].ends_with("sh gdbserver dlv"));
}
