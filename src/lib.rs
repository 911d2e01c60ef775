// ABOUTME: Library crate for kubedbg exposing the session orchestration core for testing and reuse

//! Remote debugging of processes running in Kubernetes containers.
//!
//! A debug server (`gdbserver` or `dlv`) is started next to the target
//! process and exposed on localhost through `kubectl port-forward`.

/// Cluster version and remote executable probes
pub mod capability;
/// Command line surface
pub mod cli;
/// Layered TOML configuration
pub mod config;
/// Session orchestration and teardown
pub mod controller;
/// Core file capture
pub mod coredump;
/// Error taxonomy
pub mod error;
/// kubectl command builders
pub mod kube;
/// Session data models
pub mod models;
/// External process plumbing
pub mod process;
/// Static helper binary builds and injection
pub mod provision;
/// Remote debug server lifecycle
pub mod server;
/// Attach strategy selection
pub mod strategy;
/// Port-forward tunnel
pub mod tunnel;
