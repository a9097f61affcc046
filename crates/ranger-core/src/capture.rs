//! Edge capture and echo-timeout arbitration.
//!
//! [`EdgeCapture`] owns the per-cycle [`EchoRecord`] and is fed from three
//! asynchronous producers:
//!
//! - the echo-line handler ([`EdgeCapture::on_edge`]),
//! - the echo-timeout alarm it arms on every rising edge,
//! - the cycle controller, which starts a new epoch before each trigger.
//!
//! Every producer applies a transition to the record through the seqlock
//! cell, so the timestamps, outcome and armed alarm always change together.
//! Each arm gets a fresh token; an alarm callback whose token no longer
//! matches the record (because it was cancelled, superseded, or belongs to an
//! earlier epoch) is a no-op. That makes a late firing harmless even when
//! cancellation loses the race.
//!
//! Nothing in the edge or alarm paths logs or blocks beyond the alarm
//! service's own bookkeeping.

use crate::alarm::{AlarmId, AlarmService};
use crate::cell::SeqlockCell;
use crate::clock::MonotonicClock;
use crate::distance::echo_duration_us;
use crate::edge::{Edge, EdgeEvent};
use ranger_common::time::Epoch;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Resolution state of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoOutcome {
    /// No falling edge yet and the timeout has not fired.
    #[default]
    Pending,
    /// Both edges captured; `falling_us > rising_us`.
    Completed,
    /// The echo timeout fired before a falling edge arrived.
    TimedOut,
}

impl EchoOutcome {
    /// True once the cycle can no longer change.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Alarm slot: the arm token plus the service id once known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArmedAlarm {
    token: u64,
    id: Option<AlarmId>,
}

/// Echo state of one measurement cycle, published as a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EchoRecord {
    /// Cycle this record belongs to.
    pub epoch: Epoch,
    /// When the cycle started; edges stamped earlier belong to a past cycle.
    pub started_us: u64,
    /// Timestamp of the accepted rising edge.
    pub rising_us: Option<u64>,
    /// Timestamp of the accepted falling edge.
    pub falling_us: Option<u64>,
    /// Resolution state.
    pub outcome: EchoOutcome,
    pub(crate) alarm: Option<ArmedAlarm>,
}

impl EchoRecord {
    /// Echo width for a completed cycle.
    #[must_use]
    pub fn echo_us(&self) -> Option<u64> {
        match (self.outcome, self.rising_us, self.falling_us) {
            (EchoOutcome::Completed, Some(rising), Some(falling)) => {
                echo_duration_us(rising, falling)
            }
            _ => None,
        }
    }

    /// True while a timeout alarm is armed for this cycle.
    #[must_use]
    pub fn alarm_armed(&self) -> bool {
        self.alarm.is_some()
    }

    fn take_alarm_id(&mut self) -> Option<AlarmId> {
        self.alarm.take().and_then(|armed| armed.id)
    }
}

/// Diagnostic counters kept by the capture.
#[derive(Debug, Default)]
struct Counters {
    rising_edges: AtomicU64,
    falling_edges: AtomicU64,
    spurious_edges: AtomicU64,
    timeouts: AtomicU64,
    cancelled_alarms: AtomicU64,
    stale_alarms: AtomicU64,
    alarm_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of capture counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Rising edges delivered.
    pub rising_edges: u64,
    /// Falling edges delivered.
    pub falling_edges: u64,
    /// Edges rejected or superseded (retriggers, orphans, late edges).
    pub spurious_edges: u64,
    /// Cycles resolved by the timeout alarm.
    pub timeouts: u64,
    /// Alarms removed from the service before firing.
    pub cancelled_alarms: u64,
    /// Alarm firings ignored because their token was stale.
    pub stale_alarms: u64,
    /// Alarms the service refused to schedule.
    pub alarm_errors: u64,
}

/// Interrupt-side half of the range finder.
pub struct EdgeCapture {
    cell: SeqlockCell<EchoRecord>,
    clock: Arc<dyn MonotonicClock>,
    alarms: Arc<dyn AlarmService>,
    echo_timeout_us: u64,
    next_token: AtomicU64,
    counters: Counters,
    me: Weak<EdgeCapture>,
}

impl std::fmt::Debug for EdgeCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeCapture")
            .field("record", &self.cell.read())
            .field("echo_timeout_us", &self.echo_timeout_us)
            .finish_non_exhaustive()
    }
}

impl EdgeCapture {
    /// Create a capture timing edges with `clock` and arming timeouts of
    /// `echo_timeout_us` on `alarms`.
    ///
    /// The initial record is epoch 0, which no controller cycle uses.
    pub fn new(
        clock: Arc<dyn MonotonicClock>,
        alarms: Arc<dyn AlarmService>,
        echo_timeout_us: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            cell: SeqlockCell::default(),
            clock,
            alarms,
            echo_timeout_us,
            next_token: AtomicU64::new(0),
            counters: Counters::default(),
            me: me.clone(),
        })
    }

    /// Current time on the capture's timebase.
    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// Echo timeout window in microseconds.
    #[must_use]
    pub fn echo_timeout_us(&self) -> u64 {
        self.echo_timeout_us
    }

    /// Consistent copy of the current record.
    #[must_use]
    pub fn snapshot(&self) -> EchoRecord {
        self.cell.read()
    }

    /// Start a new cycle: bump the epoch and reset the record to pending.
    ///
    /// An alarm still armed from the previous cycle is cancelled; if it fires
    /// anyway its token no longer matches.
    pub fn begin_cycle(&self) -> Epoch {
        let started_us = self.clock.now_us();
        let (epoch, leftover) = self.cell.update(|rec| {
            let leftover = rec.take_alarm_id();
            *rec = EchoRecord {
                epoch: rec.epoch.next(),
                started_us,
                ..EchoRecord::default()
            };
            (rec.epoch, leftover)
        });

        if let Some(id) = leftover {
            self.cancel_alarm(id);
        }
        epoch
    }

    /// Deliver an echo-line transition.
    pub fn on_edge(&self, event: EdgeEvent) {
        match event.edge {
            Edge::Rising => self.on_rising(event.at_us),
            Edge::Falling => self.on_falling(event.at_us),
        }
    }

    /// Deliver a transition stamped with the capture's own clock.
    pub fn on_edge_now(&self, edge: Edge) {
        self.on_edge(EdgeEvent {
            edge,
            at_us: self.clock.now_us(),
        });
    }

    fn on_rising(&self, at_us: u64) {
        Counters::bump(&self.counters.rising_edges);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;

        let armed = self.cell.update(|rec| {
            if rec.outcome.is_resolved() || at_us < rec.started_us {
                return None;
            }
            let retrigger = rec.alarm.is_some();
            let superseded = rec.take_alarm_id();
            rec.rising_us = Some(at_us);
            rec.falling_us = None;
            rec.alarm = Some(ArmedAlarm { token, id: None });
            Some((retrigger, superseded))
        });

        let Some((retrigger, superseded)) = armed else {
            Counters::bump(&self.counters.spurious_edges);
            return;
        };
        if retrigger {
            Counters::bump(&self.counters.spurious_edges);
        }
        if let Some(id) = superseded {
            self.cancel_alarm(id);
        }

        // The window runs from the edge's own timestamp, not from delivery.
        let deadline_us = at_us.saturating_add(self.echo_timeout_us);
        let after_us = deadline_us.saturating_sub(self.clock.now_us());

        let me = self.me.clone();
        let scheduled = self.alarms.schedule(
            after_us,
            Box::new(move || {
                if let Some(capture) = me.upgrade() {
                    capture.on_timeout(token);
                }
            }),
        );

        let id = match scheduled {
            Ok(id) => id,
            Err(_) => {
                // The cycle stays pending and is reported as a stale read.
                Counters::bump(&self.counters.alarm_errors);
                return;
            }
        };

        let stored = self.cell.update(|rec| match rec.alarm.as_mut() {
            Some(armed) if armed.token == token => {
                armed.id = Some(id);
                true
            }
            _ => false,
        });

        // A falling edge, a retrigger, or a new epoch retired this arm before
        // its id was recorded.
        if !stored {
            self.cancel_alarm(id);
        }
    }

    fn on_falling(&self, at_us: u64) {
        Counters::bump(&self.counters.falling_edges);

        let timeout_us = self.echo_timeout_us;
        let retired = self.cell.update(|rec| match (rec.outcome, rec.rising_us) {
            (EchoOutcome::Pending, Some(rising)) if at_us > rising => {
                // Delivered before the alarm fired, but stamped past the window.
                let in_window = at_us - rising <= timeout_us;
                if in_window {
                    rec.falling_us = Some(at_us);
                    rec.outcome = EchoOutcome::Completed;
                } else {
                    rec.outcome = EchoOutcome::TimedOut;
                }
                Some((in_window, rec.take_alarm_id()))
            }
            _ => None,
        });

        let Some((in_window, id)) = retired else {
            Counters::bump(&self.counters.spurious_edges);
            return;
        };
        if let Some(id) = id {
            self.cancel_alarm(id);
        }
        if !in_window {
            Counters::bump(&self.counters.timeouts);
        }
    }

    fn on_timeout(&self, token: u64) {
        let fired = self.cell.update(|rec| match rec.alarm {
            Some(armed) if armed.token == token => {
                rec.alarm = None;
                rec.outcome = EchoOutcome::TimedOut;
                true
            }
            _ => false,
        });

        if fired {
            Counters::bump(&self.counters.timeouts);
        } else {
            Counters::bump(&self.counters.stale_alarms);
        }
    }

    fn cancel_alarm(&self, id: AlarmId) {
        if self.alarms.cancel(id) {
            Counters::bump(&self.counters.cancelled_alarms);
        }
    }

    /// Snapshot of the diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        let c = &self.counters;
        CaptureStats {
            rising_edges: c.rising_edges.load(Ordering::Relaxed),
            falling_edges: c.falling_edges.load(Ordering::Relaxed),
            spurious_edges: c.spurious_edges.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            cancelled_alarms: c.cancelled_alarms.load(Ordering::Relaxed),
            stale_alarms: c.stale_alarms.load(Ordering::Relaxed),
            alarm_errors: c.alarm_errors.load(Ordering::Relaxed),
        }
    }

    /// Alarms currently scheduled on the underlying service.
    #[must_use]
    pub fn pending_alarms(&self) -> usize {
        self.alarms.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::VirtualAlarms;
    use crate::clock::ManualClock;

    const TIMEOUT: u64 = 30_000;

    fn setup() -> (Arc<EdgeCapture>, Arc<VirtualAlarms>) {
        let clock = Arc::new(ManualClock::new(0));
        let alarms = Arc::new(VirtualAlarms::new(Arc::clone(&clock)));
        let capture = EdgeCapture::new(clock, alarms.clone(), TIMEOUT);
        (capture, alarms)
    }

    #[test]
    fn test_completed_echo() {
        let (capture, alarms) = setup();
        let epoch = capture.begin_cycle();
        assert_eq!(epoch, Epoch(1));

        capture.on_edge(EdgeEvent::rising(0));
        assert_eq!(alarms.pending(), 1);
        capture.on_edge(EdgeEvent::falling(500));
        assert_eq!(alarms.pending(), 0);

        let rec = capture.snapshot();
        assert_eq!(rec.outcome, EchoOutcome::Completed);
        assert_eq!(rec.echo_us(), Some(500));
        assert!(!rec.alarm_armed());

        // The cancelled alarm never resolves the cycle
        alarms.advance(TIMEOUT * 2);
        assert_eq!(capture.snapshot().outcome, EchoOutcome::Completed);
        assert_eq!(capture.stats().cancelled_alarms, 1);
        assert_eq!(capture.stats().timeouts, 0);
    }

    #[test]
    fn test_timeout_without_falling_edge() {
        let (capture, alarms) = setup();
        capture.begin_cycle();
        capture.on_edge(EdgeEvent::rising(0));

        alarms.advance(TIMEOUT - 1);
        assert_eq!(capture.snapshot().outcome, EchoOutcome::Pending);
        alarms.advance(1);

        let rec = capture.snapshot();
        assert_eq!(rec.outcome, EchoOutcome::TimedOut);
        assert_eq!(rec.echo_us(), None);
        assert_eq!(capture.stats().timeouts, 1);
        assert_eq!(alarms.pending(), 0);
    }

    #[test]
    fn test_falling_after_timeout_is_rejected() {
        let (capture, alarms) = setup();
        capture.begin_cycle();
        capture.on_edge(EdgeEvent::rising(0));
        alarms.advance(TIMEOUT);

        capture.on_edge(EdgeEvent::falling(TIMEOUT + 10));

        let rec = capture.snapshot();
        assert_eq!(rec.outcome, EchoOutcome::TimedOut);
        assert_eq!(rec.falling_us, None);
        assert_eq!(capture.stats().spurious_edges, 1);
    }

    #[test]
    fn test_late_delivered_rising_keeps_stamped_deadline() {
        let (capture, alarms) = setup();
        let epoch = capture.begin_cycle();

        // Stamped at t=0, handled 20 ms later
        alarms.advance(20_000);
        capture.on_edge(EdgeEvent::rising(0));
        assert_eq!(alarms.next_deadline(), Some(TIMEOUT));

        alarms.advance(TIMEOUT - 20_000);
        assert_eq!(capture.snapshot().outcome, EchoOutcome::TimedOut);

        alarms.advance(15_000);
        capture.on_edge(EdgeEvent::falling(45_000));
        let rec = capture.snapshot();
        assert_eq!(rec.outcome, EchoOutcome::TimedOut);
        assert_eq!(rec.echo_us(), None);
        assert_eq!(rec.epoch, epoch);
    }

    #[test]
    fn test_falling_stamped_past_window_times_out() {
        let (capture, alarms) = setup();
        capture.begin_cycle();

        // Both edges arrive in one late batch, before the alarm can fire
        alarms.advance(20_000);
        capture.on_edge(EdgeEvent::rising(0));
        capture.on_edge(EdgeEvent::falling(TIMEOUT + 15_000));

        let rec = capture.snapshot();
        assert_eq!(rec.outcome, EchoOutcome::TimedOut);
        assert_eq!(rec.falling_us, None);
        assert!(!rec.alarm_armed());
        assert_eq!(alarms.pending(), 0);
        assert_eq!(capture.stats().timeouts, 1);
        assert_eq!(capture.stats().cancelled_alarms, 1);

        // A falling edge exactly at the window edge still counts
        capture.begin_cycle();
        capture.on_edge(EdgeEvent::rising(20_000));
        capture.on_edge(EdgeEvent::falling(20_000 + TIMEOUT));
        assert_eq!(capture.snapshot().echo_us(), Some(TIMEOUT));
    }

    #[test]
    fn test_double_rising_leaves_one_alarm() {
        let (capture, alarms) = setup();
        capture.begin_cycle();

        capture.on_edge(EdgeEvent::rising(0));
        alarms.advance(100);
        capture.on_edge(EdgeEvent::rising(100));

        assert_eq!(alarms.pending(), 1);
        assert_eq!(capture.stats().cancelled_alarms, 1);
        assert_eq!(capture.snapshot().rising_us, Some(100));

        // The surviving alarm is relative to the second rising edge
        alarms.advance(TIMEOUT - 1);
        assert_eq!(capture.snapshot().outcome, EchoOutcome::Pending);
        alarms.advance(1);
        assert_eq!(capture.snapshot().outcome, EchoOutcome::TimedOut);
        assert_eq!(capture.stats().timeouts, 1);
    }

    #[test]
    fn test_orphan_falling_edge() {
        let (capture, alarms) = setup();
        capture.begin_cycle();

        capture.on_edge(EdgeEvent::falling(40));

        let rec = capture.snapshot();
        assert_eq!(rec.outcome, EchoOutcome::Pending);
        assert_eq!(rec.falling_us, None);
        assert_eq!(alarms.pending(), 0);
        assert_eq!(capture.stats().spurious_edges, 1);
    }

    #[test]
    fn test_falling_not_after_rising_is_rejected() {
        let (capture, alarms) = setup();
        capture.begin_cycle();
        alarms.advance(1_000);

        capture.on_edge(EdgeEvent::rising(1_000));
        capture.on_edge(EdgeEvent::falling(1_000));

        assert_eq!(capture.snapshot().outcome, EchoOutcome::Pending);
        assert!(capture.snapshot().alarm_armed());
        alarms.advance(TIMEOUT);
        assert_eq!(capture.snapshot().outcome, EchoOutcome::TimedOut);
    }

    #[test]
    fn test_edges_before_cycle_start_are_stale() {
        let (capture, alarms) = setup();
        alarms.advance(5_000);
        capture.begin_cycle();

        capture.on_edge(EdgeEvent::rising(4_000));
        assert_eq!(capture.snapshot().rising_us, None);
        assert_eq!(alarms.pending(), 0);
        assert_eq!(capture.stats().spurious_edges, 1);
    }

    #[test]
    fn test_rising_after_completion_is_rejected() {
        let (capture, alarms) = setup();
        capture.begin_cycle();
        capture.on_edge(EdgeEvent::rising(0));
        capture.on_edge(EdgeEvent::falling(500));
        capture.on_edge(EdgeEvent::rising(600));

        let rec = capture.snapshot();
        assert_eq!(rec.echo_us(), Some(500));
        assert_eq!(alarms.pending(), 0);
    }

    #[test]
    fn test_new_epoch_neutralises_leftover_alarm() {
        let (capture, alarms) = setup();
        capture.begin_cycle();
        capture.on_edge(EdgeEvent::rising(0));
        assert_eq!(alarms.pending(), 1);

        let epoch = capture.begin_cycle();
        assert_eq!(epoch, Epoch(2));
        assert_eq!(alarms.pending(), 0);

        alarms.advance(TIMEOUT * 2);
        let rec = capture.snapshot();
        assert_eq!(rec.epoch, Epoch(2));
        assert_eq!(rec.outcome, EchoOutcome::Pending);
    }

    #[test]
    fn test_stale_token_ignored() {
        let (capture, _alarms) = setup();
        capture.begin_cycle();
        capture.on_edge(EdgeEvent::rising(0));

        // A firing from an arm that no longer exists
        capture.on_timeout(u64::MAX);
        assert_eq!(capture.snapshot().outcome, EchoOutcome::Pending);
        assert_eq!(capture.stats().stale_alarms, 1);
    }

    #[test]
    fn test_edge_now_uses_capture_clock() {
        let (capture, alarms) = setup();
        capture.begin_cycle();
        alarms.advance(250);
        capture.on_edge_now(Edge::Rising);
        alarms.advance(583);
        capture.on_edge_now(Edge::Falling);

        assert_eq!(capture.snapshot().echo_us(), Some(583));
        assert_eq!(capture.now_us(), 833);
    }
}
