// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fake implementations of the clock and the outbound ports, for
//! deterministic state-machine tests.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::entry::{
    LinkAddressResolver, LinkResolutionNotifier, NeighborEntryView, NudDispatcher,
    RouterInvalidator,
};
use crate::error::{AddressResolutionFailed, ProbeSendError};
use crate::time::{Clock, MonotonicInstant, Timer, TimerJob};
use crate::types::{Address, LinkAddress};

/// A manual [`Clock`] for tests.
///
/// Time stands still until [`FakeClock::advance`] is called, which moves the
/// clock forward and synchronously runs every job whose deadline has been
/// reached, in deadline order. Jobs scheduled by a running job are honored
/// within the same advance when they fall inside the window, which is how
/// zero-delay jobs chain.
#[derive(Default)]
pub(crate) struct FakeClock {
    inner: Arc<Mutex<FakeClockInner>>,
}

#[derive(Default)]
struct FakeClockInner {
    now: MonotonicInstant,
    queue: BinaryHeap<Reverse<FakeScheduledJob>>,
    cancelled: HashSet<u64>,
    next_id: u64,
}

struct FakeScheduledJob {
    deadline: MonotonicInstant,
    id: u64,
    job: TimerJob,
}

impl PartialEq for FakeScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for FakeScheduledJob {}

impl PartialOrd for FakeScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FakeScheduledJob {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.deadline, self.id).cmp(&(other.deadline, other.id))
    }
}

impl FakeClock {
    /// Moves the clock forward by `duration`, running all jobs that come due,
    /// including zero-delay jobs scheduled by jobs run within this advance.
    pub(crate) fn advance(&self, duration: Duration) {
        let target = self.inner.lock().unwrap().now + duration;
        loop {
            let job = {
                let mut inner = self.inner.lock().unwrap();
                let FakeClockInner { now, queue, cancelled, next_id: _ } = &mut *inner;
                loop {
                    match queue.peek() {
                        Some(Reverse(head)) if cancelled.remove(&head.id) => {
                            let _ = queue.pop();
                        }
                        Some(Reverse(head)) if head.deadline <= target => {
                            // Jobs run at their own deadline; `now` observed
                            // from inside a job is never in the job's future.
                            *now = core::cmp::max(*now, head.deadline);
                            let Reverse(FakeScheduledJob { deadline: _, id: _, job }) =
                                queue.pop().unwrap();
                            break Some(job);
                        }
                        _ => {
                            *now = target;
                            break None;
                        }
                    }
                }
            };
            match job {
                // Run with the queue unlocked so the job can schedule and
                // cancel timers itself.
                Some(job) => job(),
                None => break,
            }
        }
    }

    /// Runs all jobs scheduled to run at the current time.
    pub(crate) fn run_immediately_scheduled_jobs(&self) {
        self.advance(Duration::ZERO);
    }

    /// The number of scheduled, uncancelled jobs.
    pub(crate) fn pending_jobs(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queue.iter().filter(|Reverse(job)| !inner.cancelled.contains(&job.id)).count()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> MonotonicInstant {
        self.inner.lock().unwrap().now
    }

    fn schedule_after(&self, delay: Duration, job: TimerJob) -> Box<dyn Timer> {
        let mut inner = self.inner.lock().unwrap();
        let deadline = inner.now + delay;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.queue.push(Reverse(FakeScheduledJob { deadline, id, job }));
        Box::new(FakeTimer { id, clock: Arc::downgrade(&self.inner) })
    }
}

struct FakeTimer {
    id: u64,
    clock: Weak<Mutex<FakeClockInner>>,
}

impl Timer for FakeTimer {
    fn cancel(&mut self) {
        if let Some(inner) = self.clock.upgrade() {
            let _newly_cancelled: bool = inner.lock().unwrap().cancelled.insert(self.id);
        }
    }
}

/// Records every probe the entry asks the resolver to emit, and can be made
/// to refuse them.
#[derive(Default)]
pub(crate) struct FakeLinkResolver {
    probes: Mutex<Vec<ProbeRecord>>,
    fail_requests: std::sync::atomic::AtomicBool,
}

/// One recorded reachability probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ProbeRecord {
    pub(crate) target: Address,
    pub(crate) local: Option<Address>,
    pub(crate) remote_link_addr: Option<LinkAddress>,
}

impl FakeLinkResolver {
    /// Drains the recorded probes.
    pub(crate) fn take_probes(&self) -> Vec<ProbeRecord> {
        core::mem::take(&mut self.probes.lock().unwrap())
    }

    /// Makes subsequent probe requests fail with a transport error.
    pub(crate) fn set_fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

impl LinkAddressResolver for FakeLinkResolver {
    fn send_neighbor_probe(
        &self,
        target: &Address,
        local: Option<&Address>,
        remote_link_addr: Option<&LinkAddress>,
    ) -> Result<(), ProbeSendError> {
        if self.fail_requests.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ProbeSendError);
        }
        self.probes.lock().unwrap().push(ProbeRecord {
            target: target.clone(),
            local: local.cloned(),
            remote_link_addr: remote_link_addr.cloned(),
        });
        Ok(())
    }
}

/// The kind of a recorded dispatcher event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum EventKind {
    Added,
    Changed,
    Removed,
}

/// One recorded dispatcher event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct EventRecord {
    pub(crate) kind: EventKind,
    pub(crate) view: NeighborEntryView,
}

/// Records the events dispatched for entries, in order.
#[derive(Default)]
pub(crate) struct FakeNudDispatcher {
    events: Mutex<Vec<EventRecord>>,
}

impl FakeNudDispatcher {
    /// Drains the recorded events.
    pub(crate) fn take_events(&self) -> Vec<EventRecord> {
        core::mem::take(&mut self.events.lock().unwrap())
    }
}

impl NudDispatcher for FakeNudDispatcher {
    fn on_neighbor_added(&self, entry: &NeighborEntryView) {
        self.events
            .lock()
            .unwrap()
            .push(EventRecord { kind: EventKind::Added, view: entry.clone() });
    }

    fn on_neighbor_changed(&self, entry: &NeighborEntryView) {
        self.events
            .lock()
            .unwrap()
            .push(EventRecord { kind: EventKind::Changed, view: entry.clone() });
    }

    fn on_neighbor_removed(&self, entry: &NeighborEntryView) {
        self.events
            .lock()
            .unwrap()
            .push(EventRecord { kind: EventKind::Removed, view: entry.clone() });
    }
}

/// Records router invalidations.
#[derive(Default)]
pub(crate) struct FakeRouterInvalidator {
    invalidated: Mutex<Vec<Address>>,
}

impl FakeRouterInvalidator {
    /// Drains the recorded invalidations.
    pub(crate) fn take_invalidated(&self) -> Vec<Address> {
        core::mem::take(&mut self.invalidated.lock().unwrap())
    }
}

impl RouterInvalidator for FakeRouterInvalidator {
    fn invalidate_default_router(&self, addr: &Address) {
        self.invalidated.lock().unwrap().push(addr.clone());
    }
}

/// A [`LinkResolutionNotifier`] whose outcome can be observed from the test.
#[derive(Debug)]
pub(crate) struct FakeLinkResolutionNotifier(
    Arc<Mutex<Option<Result<LinkAddress, AddressResolutionFailed>>>>,
);

impl FakeLinkResolutionNotifier {
    /// Creates a connected (notifier, observer) pair.
    pub(crate) fn new() -> (
        Box<Self>,
        Arc<Mutex<Option<Result<LinkAddress, AddressResolutionFailed>>>>,
    ) {
        let observer = Arc::new(Mutex::new(None));
        (Box::new(Self(observer.clone())), observer)
    }
}

impl LinkResolutionNotifier for FakeLinkResolutionNotifier {
    fn notify(self: Box<Self>, result: Result<LinkAddress, AddressResolutionFailed>) {
        let Self(observer) = *self;
        *observer.lock().unwrap() = Some(result);
    }
}
