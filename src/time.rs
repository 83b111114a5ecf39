// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Types for dealing with time and timers.
//!
//! The neighbor cache never reads the system clock directly; it is handed a
//! [`Clock`] capability at construction time. Production code uses
//! [`SystemClock`]; tests drive the state machine deterministically with a
//! manual clock that advances on demand and fires due jobs synchronously.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::ops;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use core::fmt::{self, Debug, Formatter};

/// A point on the clock's monotonic timeline, as an offset from the clock's
/// arbitrary epoch.
///
/// Two instants are only comparable when they were produced by the same
/// [`Clock`].
#[derive(Copy, Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MonotonicInstant {
    offset: Duration,
}

impl MonotonicInstant {
    /// The number of nanoseconds elapsed between the clock's epoch and this
    /// instant.
    pub fn as_nanos(&self) -> u128 {
        self.offset.as_nanos()
    }

    /// Returns the amount of time elapsed from `earlier` to `self`.
    ///
    /// # Panics
    ///
    /// Panics if `earlier` is later than `self`.
    pub fn duration_since(&self, earlier: MonotonicInstant) -> Duration {
        self.offset.checked_sub(earlier.offset).unwrap()
    }

    /// Like [`MonotonicInstant::duration_since`], but saturates at zero.
    pub fn saturating_duration_since(&self, earlier: MonotonicInstant) -> Duration {
        self.offset.saturating_sub(earlier.offset)
    }

    /// Returns `self + duration` unless the addition overflows.
    pub fn checked_add(&self, duration: Duration) -> Option<MonotonicInstant> {
        self.offset.checked_add(duration).map(MonotonicInstant::from)
    }
}

impl From<Duration> for MonotonicInstant {
    fn from(offset: Duration) -> MonotonicInstant {
        MonotonicInstant { offset }
    }
}

impl ops::Add<Duration> for MonotonicInstant {
    type Output = MonotonicInstant;

    fn add(self, dur: Duration) -> MonotonicInstant {
        MonotonicInstant { offset: self.offset + dur }
    }
}

impl ops::Sub<MonotonicInstant> for MonotonicInstant {
    type Output = Duration;

    fn sub(self, other: MonotonicInstant) -> Duration {
        self.offset - other.offset
    }
}

impl ops::Sub<Duration> for MonotonicInstant {
    type Output = MonotonicInstant;

    fn sub(self, dur: Duration) -> MonotonicInstant {
        MonotonicInstant { offset: self.offset - dur }
    }
}

impl Debug for MonotonicInstant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.offset)
    }
}

/// A deferred unit of work handed to a [`Clock`].
pub type TimerJob = Box<dyn FnOnce() + Send + 'static>;

/// A handle on a single scheduled [`TimerJob`].
pub trait Timer: Send {
    /// Cancels the job if it has not yet run.
    ///
    /// Cancellation is best-effort: the job may already be executing on the
    /// clock's thread. Callers that need a hard guarantee must make the job
    /// a no-op themselves (the neighbor entry does so with a sequence number
    /// checked under its lock).
    fn cancel(&mut self);
}

/// A monotonic clock that can schedule deferred jobs.
///
/// `now` guarantees that two subsequent calls return monotonically
/// non-decreasing values, and jobs run no earlier than their deadline on the
/// same timeline `now` reports. Implementations must be safe for concurrent
/// use; jobs scheduled from within a running job must be accepted.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> MonotonicInstant;

    /// Schedules `job` to run `delay` from now.
    ///
    /// A zero `delay` does not run `job` inline; it is queued and runs on the
    /// clock's own schedule like any other job.
    fn schedule_after(&self, delay: Duration, job: TimerJob) -> Box<dyn Timer>;
}

/// A [`Clock`] backed by [`std::time::Instant`] and a dedicated timer thread.
///
/// Jobs run on the timer thread, one at a time, in deadline order.
pub struct SystemClock {
    epoch: std::time::Instant,
    shared: Arc<ClockShared>,
    worker: Option<JoinHandle<()>>,
}

struct ClockShared {
    inner: Mutex<ClockInner>,
    cond: Condvar,
}

struct ClockInner {
    queue: BinaryHeap<Reverse<ScheduledJob>>,
    cancelled: HashSet<u64>,
    next_id: u64,
    shutdown: bool,
}

struct ScheduledJob {
    deadline: MonotonicInstant,
    id: u64,
    job: TimerJob,
}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for ScheduledJob {}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.deadline, self.id).cmp(&(other.deadline, other.id))
    }
}

impl SystemClock {
    /// Creates a clock and starts its timer thread.
    pub fn new() -> Self {
        let epoch = std::time::Instant::now();
        let shared = Arc::new(ClockShared {
            inner: Mutex::new(ClockInner {
                queue: BinaryHeap::new(),
                cancelled: HashSet::new(),
                next_id: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });
        let worker = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("nud-timers".into())
                .spawn(move || run_timer_thread(epoch, &shared))
                .expect("failed to spawn timer thread")
        };
        Self { epoch, shared, worker: Some(worker) }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> MonotonicInstant {
        MonotonicInstant::from(self.epoch.elapsed())
    }

    fn schedule_after(&self, delay: Duration, job: TimerJob) -> Box<dyn Timer> {
        let deadline = self.now() + delay;
        let id = {
            let mut inner = self.shared.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.queue.push(Reverse(ScheduledJob { deadline, id, job }));
            id
        };
        self.shared.cond.notify_one();
        Box::new(SystemTimer { id, shared: Arc::downgrade(&self.shared) })
    }
}

impl Drop for SystemClock {
    fn drop(&mut self) {
        self.shared.inner.lock().unwrap().shutdown = true;
        self.shared.cond.notify_one();
        if let Some(worker) = self.worker.take() {
            worker.join().expect("timer thread panicked");
        }
    }
}

fn run_timer_thread(epoch: std::time::Instant, shared: &ClockShared) {
    loop {
        let due = {
            let mut guard = shared.inner.lock().unwrap();
            loop {
                if guard.shutdown {
                    return;
                }
                let ClockInner { queue, cancelled, next_id: _, shutdown: _ } = &mut *guard;
                while let Some(Reverse(head)) = queue.peek() {
                    if !cancelled.remove(&head.id) {
                        break;
                    }
                    let _ = queue.pop();
                }
                let deadline = match queue.peek() {
                    None => {
                        guard = shared.cond.wait(guard).unwrap();
                        continue;
                    }
                    Some(Reverse(head)) => head.deadline,
                };
                let now = MonotonicInstant::from(epoch.elapsed());
                if deadline <= now {
                    let Reverse(due) = guard.queue.pop().unwrap();
                    break due;
                }
                let (next, _timed_out) =
                    shared.cond.wait_timeout(guard, deadline - now).unwrap();
                guard = next;
            }
        };
        // Run the job with the queue unlocked so it can schedule or cancel
        // timers itself.
        (due.job)();
    }
}

struct SystemTimer {
    id: u64,
    shared: std::sync::Weak<ClockShared>,
}

impl Timer for SystemTimer {
    fn cancel(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let _newly_cancelled: bool =
                shared.inner.lock().unwrap().cancelled.insert(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn system_clock_fires_scheduled_job() {
        let clock = SystemClock::new();
        let (tx, rx) = mpsc::channel();
        let _timer = clock.schedule_after(
            Duration::from_millis(5),
            Box::new(move || tx.send(()).unwrap()),
        );
        rx.recv_timeout(Duration::from_secs(5)).expect("job should fire");
    }

    #[test]
    fn system_clock_runs_jobs_in_deadline_order() {
        let clock = SystemClock::new();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        let _late = clock.schedule_after(
            Duration::from_millis(50),
            Box::new(move || tx.send("late").unwrap()),
        );
        let _early = clock.schedule_after(
            Duration::from_millis(5),
            Box::new(move || tx2.send("early").unwrap()),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "early");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "late");
    }

    #[test]
    fn system_clock_cancel_prevents_job() {
        let clock = SystemClock::new();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        let mut cancelled = clock.schedule_after(
            Duration::from_millis(20),
            Box::new(move || tx.send("cancelled").unwrap()),
        );
        cancelled.cancel();
        let _kept = clock.schedule_after(
            Duration::from_millis(40),
            Box::new(move || tx2.send("kept").unwrap()),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "kept");
        assert_matches::assert_matches!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(mpsc::RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn monotonic_instant_arithmetic() {
        let base = MonotonicInstant::from(Duration::from_secs(10));
        let later = base + Duration::from_secs(5);
        assert_eq!(later.duration_since(base), Duration::from_secs(5));
        assert_eq!(base.saturating_duration_since(later), Duration::ZERO);
        assert_eq!(later - base, Duration::from_secs(5));
        assert_eq!(later.checked_add(Duration::MAX), None);
    }
}
