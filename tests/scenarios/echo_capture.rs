//! Echo capture scenarios.
//!
//! Edges are delivered straight to the capture, so every timestamp is
//! chosen by the test.

use super::common::{assert_cm, VirtualRig};
use ranger_common::measurement::{FailureCause, MeasurementResult};
use ranger_core::{
    distance_cm, echo_duration_us, evaluate, AlarmService, EchoOutcome, EdgeCapture, EdgeEvent,
    ManualClock, SimEcho, VirtualAlarms,
};
use std::sync::Arc;

fn capture_rig() -> (Arc<EdgeCapture>, Arc<VirtualAlarms>) {
    let clock = Arc::new(ManualClock::new(0));
    let alarms = Arc::new(VirtualAlarms::new(Arc::clone(&clock)));
    let capture = EdgeCapture::new(clock, alarms.clone(), 30_000);
    (capture, alarms)
}

#[test]
fn test_500us_echo_reads_8_575_cm() {
    let (capture, alarms) = capture_rig();
    let epoch = capture.begin_cycle();

    capture.on_edge(EdgeEvent::rising(0));
    alarms.advance(500);
    capture.on_edge(EdgeEvent::falling(500));

    let record = capture.snapshot();
    assert_eq!(record.outcome, EchoOutcome::Completed);
    assert_eq!(record.echo_us(), Some(500));
    assert!(!record.alarm_armed());
    assert_eq!(alarms.pending(), 0);

    let result = evaluate(&record, epoch);
    assert_cm(result.distance_cm().expect("reading"), 8.575, 1e-9);
}

#[test]
fn test_missing_falling_edge_times_out_at_30ms() {
    let (capture, alarms) = capture_rig();
    let epoch = capture.begin_cycle();
    capture.on_edge(EdgeEvent::rising(0));

    alarms.advance(29_999);
    assert_eq!(capture.snapshot().outcome, EchoOutcome::Pending);

    alarms.advance(1);
    let record = capture.snapshot();
    assert_eq!(record.outcome, EchoOutcome::TimedOut);
    assert_eq!(
        evaluate(&record, epoch),
        MeasurementResult::failure(FailureCause::EchoTimeout)
    );
    assert_eq!(capture.stats().timeouts, 1);
}

#[test]
fn test_double_rising_leaves_one_live_alarm() {
    let (capture, alarms) = capture_rig();
    let epoch = capture.begin_cycle();

    capture.on_edge(EdgeEvent::rising(0));
    alarms.advance(100);
    capture.on_edge(EdgeEvent::rising(100));
    assert_eq!(alarms.pending(), 1);
    assert_eq!(capture.stats().spurious_edges, 1);

    // The surviving alarm belongs to the second arm
    assert_eq!(alarms.next_deadline(), Some(30_100));
    alarms.advance(500);
    capture.on_edge(EdgeEvent::falling(600));

    let result = evaluate(&capture.snapshot(), epoch);
    assert_cm(result.distance_cm().expect("reading"), 8.575, 1e-9);
    assert_eq!(alarms.pending(), 0);
}

#[test]
fn test_falling_edge_after_timeout_is_ignored() {
    let (capture, alarms) = capture_rig();
    capture.begin_cycle();
    capture.on_edge(EdgeEvent::rising(0));

    alarms.advance(30_000);
    capture.on_edge(EdgeEvent::falling(30_500));

    let record = capture.snapshot();
    assert_eq!(record.outcome, EchoOutcome::TimedOut);
    assert_eq!(record.falling_us, None);
    assert_eq!(capture.stats().spurious_edges, 1);
}

#[test]
fn test_late_delivery_does_not_stretch_the_window() {
    let (capture, alarms) = capture_rig();
    let epoch = capture.begin_cycle();

    // Rising edge stamped t=0 but handed over at t=20 ms
    alarms.advance(20_000);
    capture.on_edge(EdgeEvent::rising(0));
    alarms.advance(25_000);
    capture.on_edge(EdgeEvent::falling(45_000));

    assert_eq!(
        evaluate(&capture.snapshot(), epoch),
        MeasurementResult::failure(FailureCause::EchoTimeout)
    );
}

#[test]
fn test_falling_edge_without_rising_is_spurious() {
    let (capture, _alarms) = capture_rig();
    capture.begin_cycle();

    capture.on_edge(EdgeEvent::falling(10));
    let record = capture.snapshot();
    assert_eq!(record.outcome, EchoOutcome::Pending);
    assert_eq!(record.rising_us, None);
    assert_eq!(capture.stats().spurious_edges, 1);
}

#[test]
fn test_edges_from_previous_cycle_are_rejected() {
    let (capture, alarms) = capture_rig();
    capture.begin_cycle();
    capture.on_edge(EdgeEvent::rising(100));

    alarms.advance(1_000);
    let epoch = capture.begin_cycle();
    // Old arm's alarm went with the old cycle
    assert_eq!(alarms.pending(), 0);

    // A rising edge stamped before the new cycle started, then its falling
    // edge, must not produce a reading for the new cycle.
    capture.on_edge(EdgeEvent::rising(900));
    capture.on_edge(EdgeEvent::falling(1_200));

    alarms.advance(60_000);
    let record = capture.snapshot();
    assert_eq!(record.epoch, epoch);
    assert_eq!(record.outcome, EchoOutcome::Pending);
    assert_eq!(
        evaluate(&record, epoch),
        MeasurementResult::failure(FailureCause::StaleRead)
    );
}

#[test]
fn test_old_record_read_for_new_epoch_is_stale() {
    let (capture, alarms) = capture_rig();
    let first = capture.begin_cycle();
    capture.on_edge(EdgeEvent::rising(0));
    alarms.advance(500);
    capture.on_edge(EdgeEvent::falling(500));

    let record = capture.snapshot();
    assert!(evaluate(&record, first).is_reading());
    assert_eq!(
        evaluate(&record, first.next()),
        MeasurementResult::failure(FailureCause::StaleRead)
    );
}

#[test]
fn test_distance_is_monotonic_in_echo_width() {
    let mut previous = None;
    for falling in (1..=30_000u64).step_by(97) {
        let echo = echo_duration_us(0, falling).expect("positive width");
        let cm = distance_cm(echo);

        #[allow(clippy::cast_precision_loss)]
        let expected = falling as f64 * 0.0343 / 2.0;
        assert_cm(cm, expected, 1e-9);

        if let Some(prev) = previous {
            assert!(cm > prev, "distance must grow with echo width");
        }
        previous = Some(cm);
    }
    assert_eq!(echo_duration_us(500, 500), None);
    assert_eq!(echo_duration_us(600, 500), None);
}

#[test]
fn test_scripted_retrigger_through_controller() {
    let mut rig = VirtualRig::with_defaults();
    rig.script.push(SimEcho::DoubleRise {
        gap_us: 200,
        width_us: 1_000,
    });
    rig.script.push(SimEcho::OrphanFall { width_us: 500 });

    let report = rig.controller.run_cycle().expect("cycle");
    assert_cm(report.result.distance_cm().expect("reading"), 17.15, 1e-9);

    let report = rig.controller.run_cycle().expect("cycle");
    assert_cm(report.result.distance_cm().expect("reading"), 8.575, 1e-9);

    let stats = rig.capture.stats();
    // One retrigger plus one orphan falling edge
    assert_eq!(stats.spurious_edges, 2);
    assert_eq!(stats.timeouts, 0);
}
