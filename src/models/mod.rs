// ABOUTME: Core data models for debug sessions: target identity, debugger kind and session state

/// Session phases and owned handles
pub mod session;
/// Target identity and debugger kind
pub mod target;

pub use session::{SessionPhase, SessionState};
pub use target::{DebugRequest, DebuggerKind, Target};
