//! Real-time scenarios on the alarm thread.
//!
//! Edges are delivered by `ThreadAlarms` against the system clock, so
//! distances carry scheduling jitter; tolerances are generous.

use super::common::assert_cm;
use ranger_common::config::RangerConfig;
use ranger_common::measurement::FailureCause;
use ranger_common::time::duration_to_us;
use ranger_core::{
    ActiveFlag, CycleController, EdgeCapture, HostDelay, SimEcho, SimulatedSensor, SystemClock,
    ThreadAlarms,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_realtime_cycles_on_alarm_thread() {
    let mut config = RangerConfig::default();
    config.timing.cadence = Duration::from_millis(100);
    config.simulation.distance_cm = 34.3;

    let alarms = Arc::new(ThreadAlarms::start().expect("alarm thread"));
    let capture = EdgeCapture::new(
        Arc::new(SystemClock::new()),
        alarms.clone(),
        duration_to_us(config.timing.echo_timeout),
    );
    let sensor = SimulatedSensor::new(Arc::clone(&capture), alarms.clone(), &config.simulation);
    let script = sensor.script();
    script.push(SimEcho::Echo { width_us: 2_000 });
    script.push(SimEcho::Lost);

    let mut controller = CycleController::new(
        sensor,
        HostDelay::new(),
        Arc::clone(&capture),
        ActiveFlag::new(true),
        &config,
    )
    .expect("controller");

    let mut reports = Vec::new();
    while reports.len() < 3 {
        if let Some(report) = controller.poll().expect("poll") {
            reports.push(report);
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_cm(reports[0].result.distance_cm().expect("reading"), 34.3, 1.0);
    assert_eq!(
        reports[1].result.failure_cause(),
        Some(FailureCause::EchoTimeout)
    );
    assert_cm(reports[2].result.distance_cm().expect("reading"), 34.3, 1.0);

    let gap = reports[1].started_at_us - reports[0].started_at_us;
    assert!(gap >= 100_000, "cadence shorter than configured: {gap} us");

    alarms.stop();
    assert_eq!(capture.stats().alarm_errors, 0);
}
