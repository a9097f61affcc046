//! One-shot deferred callbacks.
//!
//! The echo timeout is an alarm armed by the rising-edge handler and retired
//! by the falling edge or by its own firing. Two services implement
//! [`AlarmService`]:
//!
//! - [`ThreadAlarms`]: a background thread sleeping on a condvar until the
//!   earliest deadline, for real-time operation.
//! - [`VirtualAlarms`]: a queue driven by a [`ManualClock`]; nothing fires
//!   until [`VirtualAlarms::advance`] moves time past the deadline.
//!
//! Both keep deadlines in a min-heap and callbacks in a map keyed by
//! [`AlarmId`]. Cancelling removes the callback; the heap entry is discarded
//! lazily when it reaches the top.

use crate::clock::{ManualClock, MonotonicClock, SystemClock};
use ranger_common::error::{RangerError, RangerResult};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Handle identifying one scheduled alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlarmId(u64);

impl AlarmId {
    /// Raw id value.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Callback run when an alarm fires.
pub type AlarmCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules one-shot callbacks relative to now.
///
/// Callbacks run outside any internal lock, so they may schedule or cancel
/// other alarms.
pub trait AlarmService: Send + Sync {
    /// Run `callback` once, `after_us` microseconds from now.
    ///
    /// # Errors
    ///
    /// Returns [`RangerError::Alarm`] if the service can no longer fire alarms.
    fn schedule(&self, after_us: u64, callback: AlarmCallback) -> RangerResult<AlarmId>;

    /// Cancel a pending alarm. Returns `false` if it already fired or was
    /// cancelled before; cancelling twice is harmless.
    fn cancel(&self, id: AlarmId) -> bool;

    /// Number of alarms scheduled and not yet fired or cancelled.
    fn pending(&self) -> usize;
}

impl<A: AlarmService + ?Sized> AlarmService for Arc<A> {
    fn schedule(&self, after_us: u64, callback: AlarmCallback) -> RangerResult<AlarmId> {
        (**self).schedule(after_us, callback)
    }

    fn cancel(&self, id: AlarmId) -> bool {
        (**self).cancel(id)
    }

    fn pending(&self) -> usize {
        (**self).pending()
    }
}

/// Heap entry ordered so the earliest deadline is popped first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deadline {
    due_us: u64,
    id: AlarmId,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap. Ties fire in scheduling order.
        other
            .due_us
            .cmp(&self.due_us)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Deadline heap plus live callbacks.
#[derive(Default)]
struct AlarmQueue {
    deadlines: BinaryHeap<Deadline>,
    callbacks: HashMap<AlarmId, AlarmCallback>,
    next_id: u64,
}

impl AlarmQueue {
    fn push(&mut self, due_us: u64, callback: AlarmCallback) -> AlarmId {
        self.next_id += 1;
        let id = AlarmId(self.next_id);
        self.deadlines.push(Deadline { due_us, id });
        self.callbacks.insert(id, callback);
        id
    }

    fn cancel(&mut self, id: AlarmId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    /// Earliest live deadline, discarding cancelled entries on the way.
    fn next_due(&mut self) -> Option<u64> {
        while let Some(top) = self.deadlines.peek() {
            if self.callbacks.contains_key(&top.id) {
                return Some(top.due_us);
            }
            self.deadlines.pop();
        }
        None
    }

    /// Remove and return the earliest live alarm due at or before `now_us`.
    fn pop_due(&mut self, now_us: u64) -> Option<(u64, AlarmCallback)> {
        let due_us = self.next_due().filter(|due| *due <= now_us)?;
        let entry = self.deadlines.pop()?;
        let callback = self.callbacks.remove(&entry.id)?;
        Some((due_us, callback))
    }

    fn len(&self) -> usize {
        self.callbacks.len()
    }
}

fn lock(queue: &Mutex<AlarmQueue>) -> MutexGuard<'_, AlarmQueue> {
    // A panicking callback runs outside the lock, so the queue is never
    // left half-updated.
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the alarm thread.
struct ThreadShared {
    queue: Mutex<AlarmQueue>,
    wake: Condvar,
    stop_requested: AtomicBool,
    clock: SystemClock,
}

/// Real-time alarm service backed by a dedicated thread.
///
/// The thread is stopped and joined on drop; pending alarms are discarded.
pub struct ThreadAlarms {
    shared: Arc<ThreadShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ThreadAlarms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadAlarms")
            .field("pending", &self.pending())
            .field("running", &!self.shared.stop_requested.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ThreadAlarms {
    /// Spawn the alarm thread.
    ///
    /// # Errors
    ///
    /// Returns [`RangerError::Alarm`] if the thread cannot be spawned.
    pub fn start() -> RangerResult<Self> {
        let shared = Arc::new(ThreadShared {
            queue: Mutex::new(AlarmQueue::default()),
            wake: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            clock: SystemClock::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("ranger-alarms".into())
            .spawn(move || run_alarm_thread(&worker))
            .map_err(|e| RangerError::Alarm(format!("failed to spawn alarm thread: {e}")))?;

        info!("Alarm thread started");
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the alarm thread and discard pending alarms.
    ///
    /// Waits for the thread to exit unless called from an alarm callback.
    pub fn stop(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.stop_requested.store(true, Ordering::Release);
        {
            let _queue = lock(&self.shared.queue);
            self.shared.wake.notify_all();
        }

        if handle.thread().id() == thread::current().id() {
            debug!("Alarm thread stopping from its own callback");
        } else if handle.join().is_err() {
            debug!("Alarm thread panicked before stop");
        }

        // Drop callbacks outside the lock; they may own the last reference
        // to whatever scheduled them.
        let discarded = std::mem::take(&mut *lock(&self.shared.queue));
        drop(discarded);
        info!("Alarm thread stopped");
    }
}

impl Drop for ThreadAlarms {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AlarmService for ThreadAlarms {
    fn schedule(&self, after_us: u64, callback: AlarmCallback) -> RangerResult<AlarmId> {
        if self.shared.stop_requested.load(Ordering::Acquire) {
            return Err(RangerError::Alarm("alarm thread stopped".into()));
        }
        let due_us = self.shared.clock.now_us().saturating_add(after_us);
        let id = lock(&self.shared.queue).push(due_us, callback);
        self.shared.wake.notify_one();
        Ok(id)
    }

    fn cancel(&self, id: AlarmId) -> bool {
        lock(&self.shared.queue).cancel(id)
    }

    fn pending(&self) -> usize {
        lock(&self.shared.queue).len()
    }
}

fn run_alarm_thread(shared: &ThreadShared) {
    debug!("Alarm thread running");
    let mut queue = lock(&shared.queue);

    while !shared.stop_requested.load(Ordering::Acquire) {
        let now_us = shared.clock.now_us();

        if let Some((_, callback)) = queue.pop_due(now_us) {
            drop(queue);
            callback();
            queue = lock(&shared.queue);
            continue;
        }

        queue = match queue.next_due() {
            Some(due_us) => {
                let wait = Duration::from_micros(due_us.saturating_sub(now_us));
                shared
                    .wake
                    .wait_timeout(queue, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => shared
                .wake
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner),
        };
    }

    debug!("Alarm thread exiting");
}

/// Deterministic alarm service driven by a [`ManualClock`].
///
/// Used by the simulated sensor in tests: time stands still until
/// [`advance`](Self::advance) is called, which fires every due alarm in
/// deadline order and moves the clock to each deadline before running it.
pub struct VirtualAlarms {
    clock: Arc<ManualClock>,
    queue: Mutex<AlarmQueue>,
}

impl std::fmt::Debug for VirtualAlarms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualAlarms")
            .field("now_us", &self.clock.now_us())
            .field("pending", &self.pending())
            .finish()
    }
}

impl VirtualAlarms {
    /// Create a service scheduling against `clock`.
    #[must_use]
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            queue: Mutex::new(AlarmQueue::default()),
        }
    }

    /// The clock alarms are scheduled against.
    #[must_use]
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Advance virtual time by `us`, firing everything that falls due.
    ///
    /// Alarms scheduled by a firing callback also fire if they fall inside
    /// the window. Returns the number of callbacks run.
    pub fn advance(&self, us: u64) -> usize {
        let target = self.clock.now_us().saturating_add(us);
        self.advance_to(target)
    }

    /// Advance virtual time to `target_us`, firing everything that falls due.
    pub fn advance_to(&self, target_us: u64) -> usize {
        let mut fired = 0;
        loop {
            let next = lock(&self.queue).pop_due(target_us);
            let Some((due_us, callback)) = next else {
                break;
            };
            self.clock.set(due_us);
            callback();
            fired += 1;
        }
        self.clock.set(target_us);
        fired
    }

    /// Deadline of the earliest pending alarm.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        lock(&self.queue).next_due()
    }
}

impl AlarmService for VirtualAlarms {
    fn schedule(&self, after_us: u64, callback: AlarmCallback) -> RangerResult<AlarmId> {
        let due_us = self.clock.now_us().saturating_add(after_us);
        Ok(lock(&self.queue).push(due_us, callback))
    }

    fn cancel(&self, id: AlarmId) -> bool {
        lock(&self.queue).cancel(id)
    }

    fn pending(&self) -> usize {
        lock(&self.queue).len()
    }
}
