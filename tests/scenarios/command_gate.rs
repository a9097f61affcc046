//! Cycle controller and start/stop gate scenarios.

use super::common::{assert_cm, VirtualRig};
use ranger_common::measurement::FailureCause;
use ranger_common::state::CyclePhase;
use ranger_core::{AlarmService, SimEcho};

#[test]
fn test_inactive_controller_never_measures() {
    let mut rig = VirtualRig::with_defaults();
    let reports = rig.run_for(5_000_000, 10_000);
    assert!(reports.is_empty());
    assert_eq!(rig.controller.cycle_count(), 0);
}

#[test]
fn test_two_cycles_one_second_apart() {
    let mut rig = VirtualRig::with_defaults();
    rig.active.set_active(true);

    let first = rig.next_report().expect("first cycle");
    let first_record = rig.capture.snapshot();
    let second = rig.next_report().expect("second cycle");
    let second_record = rig.capture.snapshot();

    assert_eq!(first.started_at_us, 0);
    assert_eq!(second.started_at_us, 1_000_000);
    assert_cm(first.result.distance_cm().expect("reading"), 8.575, 1e-9);
    assert_cm(second.result.distance_cm().expect("reading"), 8.575, 1e-9);

    // Each cycle captured its own pair of timestamps
    assert_eq!(first_record.rising_us, Some(460));
    assert_eq!(first_record.falling_us, Some(960));
    assert_eq!(second_record.rising_us, Some(1_000_460));
    assert_eq!(second_record.falling_us, Some(1_000_960));
    assert_ne!(first_record.epoch, second_record.epoch);
}

#[test]
fn test_exactly_one_result_per_active_tick() {
    let mut rig = VirtualRig::with_defaults();
    rig.script.extend([
        SimEcho::Echo { width_us: 500 },
        SimEcho::Lost,
        SimEcho::Silent,
        SimEcho::Echo { width_us: 1_000 },
        SimEcho::Lost,
    ]);
    rig.active.set_active(true);

    let reports = rig.run_for(10_000_000, 5_000);
    assert_eq!(reports.len(), 10);

    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.cycle, i as u64 + 1);
        assert_ne!(
            report.result.is_reading(),
            report.result.failure_cause().is_some()
        );
    }

    // Polled on a 5 ms grid, so each cycle starts within one step of its
    // cadence deadline.
    for pair in reports.windows(2) {
        let gap = pair[1].started_at_us - pair[0].started_at_us;
        assert!((1_000_000..1_005_000).contains(&gap), "cycle gap {gap} us");
    }

    let causes: Vec<_> = reports
        .iter()
        .take(5)
        .map(|r| r.result.failure_cause())
        .collect();
    assert_eq!(
        causes,
        vec![
            None,
            Some(FailureCause::EchoTimeout),
            Some(FailureCause::StaleRead),
            None,
            Some(FailureCause::EchoTimeout),
        ]
    );

    let metrics = rig.controller.metrics();
    assert_eq!(metrics.total_cycles(), 10);
    assert_eq!(metrics.readings() + metrics.failures(), 10);
    assert_eq!(metrics.failures_by(FailureCause::EchoTimeout), 2);
}

#[test]
fn test_stop_while_armed_still_reports_in_flight_cycle() {
    let mut rig = VirtualRig::with_defaults();
    rig.active.set_active(true);

    // The operator pauses 10 ms into the first cycle
    let gate = rig.active.clone();
    rig.alarms
        .schedule(10_000, Box::new(move || gate.set_active(false)))
        .expect("schedule");

    let report = rig
        .controller
        .poll()
        .expect("poll")
        .expect("in-flight cycle is reported");
    assert!(!rig.active.is_active());
    assert_cm(report.result.distance_cm().expect("reading"), 8.575, 1e-9);
    assert_eq!(rig.controller.phase(), CyclePhase::Idle);

    // No new cycle starts and nothing else is reported
    let later = rig.run_for(5_000_000, 10_000);
    assert!(later.is_empty());
    assert_eq!(rig.controller.cycle_count(), 1);
    assert_eq!(rig.controller.metrics().total_cycles(), 1);
}

#[test]
fn test_restart_measures_immediately() {
    let mut rig = VirtualRig::with_defaults();
    rig.active.set_active(true);
    rig.next_report().expect("first cycle");

    rig.active.set_active(false);
    assert!(rig.run_for(300_000, 10_000).is_empty());

    rig.active.set_active(true);
    let started = rig.now_us();
    let report = rig.controller.poll().expect("poll").expect("immediate cycle");
    assert_eq!(report.started_at_us, started);
    assert_eq!(report.cycle, 2);
}

#[test]
fn test_settle_delay_covers_echo_timeout() {
    let mut rig = VirtualRig::with_defaults();
    rig.script.push(SimEcho::Lost);
    rig.active.set_active(true);

    // The timeout fires inside the settle window, so a lost echo is always
    // an EchoTimeout, never a pending read.
    let report = rig.next_report().expect("cycle");
    assert_eq!(report.result.failure_cause(), Some(FailureCause::EchoTimeout));
    assert_eq!(rig.capture.pending_alarms(), 0);
}
