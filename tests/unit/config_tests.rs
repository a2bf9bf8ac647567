use std::path::PathBuf;
use std::time::Duration;

use debug_bridge::{AppError, DebugConfig};

fn sample_toml() -> &'static str {
    r#"
session_file = "/tmp/debug-bridge/session.json"

[timeouts]
launch_seconds = 5
resume_seconds = 20
request_seconds = 4
disconnect_seconds = 1
daemon_command_seconds = 60

[inspector]
node_path = "/usr/local/bin/node"
extra_args = ["--enable-source-maps"]

[adapter]
python_path = "/opt/venv/bin/python"
adapter_module = "debugpy.adapter"
just_my_code = false
"#
}

#[test]
fn parses_every_section() {
    let config = DebugConfig::from_toml_str(sample_toml()).unwrap();

    assert_eq!(
        config.session_file,
        PathBuf::from("/tmp/debug-bridge/session.json")
    );
    assert_eq!(config.timeouts.launch(), Duration::from_secs(5));
    assert_eq!(config.timeouts.resume(), Duration::from_secs(20));
    assert_eq!(config.timeouts.request(), Duration::from_secs(4));
    assert_eq!(config.timeouts.disconnect(), Duration::from_secs(1));
    assert_eq!(config.timeouts.daemon_command(), Duration::from_secs(60));
    assert_eq!(config.inspector.node_path, "/usr/local/bin/node");
    assert_eq!(config.inspector.extra_args, vec!["--enable-source-maps"]);
    assert_eq!(config.adapter.python_path, "/opt/venv/bin/python");
    assert!(!config.adapter.just_my_code);
}

#[test]
fn empty_document_yields_defaults() {
    let config = DebugConfig::from_toml_str("").unwrap();
    assert_eq!(config, DebugConfig::default());
    assert_eq!(config.session_file, PathBuf::from(".debug_session.json"));
    assert_eq!(config.timeouts.launch_seconds, 10);
    assert_eq!(config.timeouts.resume_seconds, 30);
    assert_eq!(config.timeouts.request_seconds, 10);
    assert_eq!(config.timeouts.disconnect_seconds, 3);
    assert_eq!(config.timeouts.daemon_command_seconds, 120);
    assert_eq!(config.inspector.node_path, "node");
    assert_eq!(config.adapter.python_path, "python3");
    assert_eq!(config.adapter.adapter_module, "debugpy.adapter");
    assert!(config.adapter.just_my_code);
}

#[test]
fn partial_sections_fill_in_defaults() {
    let config = DebugConfig::from_toml_str("[timeouts]\nresume_seconds = 45\n").unwrap();
    assert_eq!(config.timeouts.resume_seconds, 45);
    assert_eq!(config.timeouts.launch_seconds, 10);
}

#[test]
fn zero_timeout_is_rejected() {
    let err = DebugConfig::from_toml_str("[timeouts]\nrequest_seconds = 0\n").unwrap_err();
    assert!(
        matches!(err, AppError::Config(ref m) if m.contains("request_seconds")),
        "got {err:?}"
    );
}

#[test]
fn daemon_wait_must_exceed_resume_wait() {
    let err = DebugConfig::from_toml_str(
        "[timeouts]\nresume_seconds = 60\ndaemon_command_seconds = 60\n",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref m) if m.contains("daemon_command_seconds")));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = DebugConfig::from_toml_str("[timeouts\nlaunch = ").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_missing_path_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = DebugConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(ref m) if m.contains("failed to read config")));
}

#[test]
fn load_from_path_reads_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("debug-bridge.toml");
    std::fs::write(&path, sample_toml()).unwrap();
    let config = DebugConfig::load_from_path(&path).unwrap();
    assert_eq!(config.timeouts.launch_seconds, 5);
}

#[test]
fn daemon_log_sits_beside_the_session_record() {
    let mut config = DebugConfig::default();
    assert_eq!(
        config.daemon_log_path(),
        PathBuf::from(".debug_session.json.log")
    );

    config.session_file = PathBuf::from("/var/tmp/dbg/session.json");
    assert_eq!(
        config.daemon_log_path(),
        PathBuf::from("/var/tmp/dbg/session.json.log")
    );
}
