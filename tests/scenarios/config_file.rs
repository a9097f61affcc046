//! Configuration files driving the controller.

use super::common::{assert_cm, VirtualRig};
use ranger_common::config::{ConfigError, RangerConfig};
use std::io::Write;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_config_file_sets_distance_and_cadence() {
    let file = write_config(
        r#"
[timing]
cadence = "500ms"

[simulation]
distance_cm = 17.15
"#,
    );
    let config = RangerConfig::from_file(file.path()).expect("valid config");
    assert_eq!(config.timing.cadence, Duration::from_millis(500));

    let mut rig = VirtualRig::new(&config);
    rig.active.set_active(true);

    let first = rig.next_report().expect("first cycle");
    let second = rig.next_report().expect("second cycle");
    assert_eq!(second.started_at_us - first.started_at_us, 500_000);
    assert_cm(first.result.distance_cm().expect("reading"), 17.15, 1e-9);
}

#[test]
fn test_shorter_timeout_fails_long_echo() {
    let file = write_config(
        r#"
[timing]
echo_timeout = "1ms"
settle_delay = "5ms"
cadence = "100ms"

[simulation]
distance_cm = 50.0
"#,
    );
    let config = RangerConfig::from_file(file.path()).expect("valid config");

    let mut rig = VirtualRig::new(&config);
    let report = rig.controller.run_cycle().expect("cycle");
    assert!(!report.result.is_reading());
    assert_eq!(rig.capture.stats().timeouts, 1);
}

#[test]
fn test_settle_shorter_than_timeout_is_rejected() {
    let file = write_config(
        r#"
[timing]
echo_timeout = "30ms"
settle_delay = "20ms"
"#,
    );
    let err = RangerConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");
    let err = RangerConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}
