// ABOUTME: Behavioral tests for configuration defaults and TOML parsing
// Verifies defaults match the documented values and partial files keep the rest

use std::path::PathBuf;
use std::time::Duration;

use kubedbg::config::AppConfig;
use kubedbg::models::DebuggerKind;
use pretty_assertions::assert_eq;

/// Default config works without any file present
#[test]
fn test_default_config_has_sensible_values() {
    let config = AppConfig::default();

    assert_eq!(config.kubectl_cmd, "kubectl");
    assert_eq!(config.gdb_cmd, "gdb");
    assert_eq!(config.dlv_cmd, "dlv");
    assert_eq!(
        config.images.for_kind(DebuggerKind::Gdb),
        Some("albertdupre/gdbserver:latest")
    );
    assert_eq!(config.images.for_kind(DebuggerKind::Dlv), None, "dlv has no public image");

    assert_eq!(config.timeouts.tunnel_ready, Duration::from_secs(30));
    assert_eq!(config.timeouts.server_ready, Duration::from_secs(120));
    assert_eq!(config.timeouts.stop, Duration::from_secs(10));
    assert_eq!(config.timeouts.command, Duration::from_secs(120));
    assert_eq!(config.timeouts.build, Duration::from_secs(600));
    assert_eq!(config.timeouts.ephemeral_attach_delay, Duration::from_secs(5));
    assert_eq!(config.logging.json_file, None);
}

/// A file setting one value leaves every other default in place
#[test]
fn test_partial_file_keeps_defaults() {
    let config: AppConfig = toml::from_str(
        r#"
kubectl_cmd = "/usr/local/bin/kubectl"

[timeouts]
server_ready = 15

[images]
dlv = "registry.local/dlv:1.22"
"#,
    )
    .expect("partial config should parse");

    assert_eq!(config.kubectl_cmd, "/usr/local/bin/kubectl");
    assert_eq!(config.timeouts.server_ready, Duration::from_secs(15));
    assert_eq!(config.timeouts.tunnel_ready, Duration::from_secs(30));
    assert_eq!(config.images.for_kind(DebuggerKind::Dlv), Some("registry.local/dlv:1.22"));
    assert_eq!(
        config.images.for_kind(DebuggerKind::Gdb),
        Some("albertdupre/gdbserver:latest")
    );
    assert_eq!(config.build.output_dir, PathBuf::from("."));
}

/// Durations are written back as plain seconds
#[test]
fn test_timeouts_serialize_as_seconds() {
    let rendered = toml::to_string(&AppConfig::default()).expect("config should serialize");
    assert!(rendered.contains("tunnel_ready = 30"), "rendered config:\n{rendered}");
    assert!(rendered.contains("ephemeral_attach_delay = 5"));
}
