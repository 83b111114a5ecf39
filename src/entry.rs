// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The per-neighbor entry state machine.
//!
//! Implements Neighbor Unreachability Detection as defined in [RFC 4861
//! section 7.3.2], extended with the behavior described in [RFC 7048]: an
//! entry whose solicitations go unanswered transitions to Failed and is
//! discarded, so that subsequent traffic restarts resolution from scratch.
//!
//! Each entry is driven concurrently from packet-receive paths, packet-send
//! paths, and timer firings; all mutation happens under the entry's own lock.
//! The resolver and dispatcher ports are invoked with that lock held and must
//! not call back into the entry.
//!
//! [RFC 4861 section 7.3.2]: https://tools.ietf.org/html/rfc4861#section-7.3.2
//! [RFC 7048]: https://tools.ietf.org/html/rfc7048

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng as _};
use tracing::debug;

use crate::config::NudConfigurations;
use crate::error::{AddressResolutionFailed, ProbeSendError};
use crate::time::{Clock, MonotonicInstant, Timer};
use crate::types::{Address, LinkAddress};

/// The state of a neighbor entry, modeled after [RFC 4861 section 7.3.2].
///
/// Descriptions are kept implementation-independent by using a set of
/// generic terminology.
///
/// ,------------------------------------------------------------------.
/// | Generic Term              | ARP Term    | NDP Term               |
/// |---------------------------+-------------+------------------------|
/// | Reachability Probe        | ARP Request | Neighbor Solicitation  |
/// | Reachability Confirmation | ARP Reply   | Neighbor Advertisement |
/// `---------------------------+-------------+------------------------'
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum NeighborState {
    /// No state has been established for this neighbor yet; the entry was
    /// just created and has not processed an event.
    Unknown,
    /// Address resolution is being performed: a probe has been multicast to
    /// the neighbor, but the corresponding confirmation has not yet been
    /// received.
    Incomplete,
    /// Positive confirmation was received recently that the forward path to
    /// the neighbor was functioning properly. While Reachable, no special
    /// action takes place as packets are sent.
    Reachable,
    /// More than ReachableTime has elapsed since the last positive
    /// confirmation, or an unsolicited message updated the cached link
    /// address. No action takes place until a packet is sent.
    Stale,
    /// A packet was recently sent while reachability was considered unknown.
    ///
    /// This state is an optimization that gives upper-layer protocols
    /// additional time to provide a reachability confirmation before probes
    /// are sent, e.g. a TCP handshake completing shortly after a traffic
    /// lull.
    Delay,
    /// A reachability confirmation is actively sought by retransmitting
    /// unicast probes every RetransmitTimer until a confirmation is received
    /// or the probe budget runs out.
    Probe,
    /// The maximum number of probes was sent without a reply, or the
    /// transport refused to carry a probe. The entry is discarded; later
    /// traffic to the neighbor starts over with a new entry.
    Failed,
    /// The link address was administratively fixed at creation and never
    /// participates in the state machine.
    Static,
}

/// Flags carried by a reachability confirmation, as defined in [RFC 4861
/// section 4.4].
///
/// [RFC 4861 section 4.4]: https://tools.ietf.org/html/rfc4861#section-4.4
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfirmationFlags {
    /// The confirmation was sent in response to a reachability probe of ours.
    pub solicited_flag: bool,
    /// The confirmation may override a cached link address.
    pub override_flag: bool,
    /// The sender is a router.
    pub is_router_flag: bool,
}

/// A snapshot of the visible fields of a neighbor entry, as delivered to the
/// [`NudDispatcher`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NeighborEntryView {
    /// The neighbor's network-layer address.
    pub addr: Address,
    /// The best-known link-layer binding; unknown while resolving.
    pub link_addr: LinkAddress,
    /// The entry's state at the time of the snapshot.
    pub state: NeighborState,
    /// Whether the neighbor is known to be a router.
    pub is_router: bool,
    /// When the visible state or link address last changed.
    pub updated_at: MonotonicInstant,
}

/// The outbound port used to emit wire-level reachability probes.
///
/// Shared by all entries of a cache and invoked with the soliciting entry's
/// lock held; implementations must be safe for concurrent calls and must not
/// call back into the neighbor cache.
pub trait LinkAddressResolver: Send + Sync {
    /// Emits a reachability probe for `target`.
    ///
    /// A multicast solicitation carries the local address the probe should be
    /// sourced from and no link address; a unicast solicitation is directed
    /// at `remote_link_addr`.
    fn send_neighbor_probe(
        &self,
        target: &Address,
        local: Option<&Address>,
        remote_link_addr: Option<&LinkAddress>,
    ) -> Result<(), ProbeSendError>;
}

/// The outbound port observing entry life-cycle events.
///
/// For a single entry, events arrive in the order they were produced, and a
/// life cycle is always `added (changed)* (removed)?`. No ordering holds
/// across entries. Invoked with the entry's lock held; implementations must
/// not call back into the neighbor cache.
pub trait NudDispatcher: Send + Sync {
    /// A neighbor entry was created.
    fn on_neighbor_added(&self, entry: &NeighborEntryView);
    /// A neighbor entry's visible state changed.
    fn on_neighbor_changed(&self, entry: &NeighborEntryView);
    /// A neighbor entry was removed. Terminal for this entry's life cycle.
    fn on_neighbor_removed(&self, entry: &NeighborEntryView);
}

/// The outbound port notified when a neighbor stops being a router.
///
/// Called when a confirmation clears a previously set IsRouter flag, per
/// [RFC 4861 section 7.2.5]: the network layer must remove the neighbor from
/// the default router list to avoid blackholing traffic through it.
///
/// [RFC 4861 section 7.2.5]: https://tools.ietf.org/html/rfc4861#section-7.2.5
pub trait RouterInvalidator: Send + Sync {
    /// The peer at `addr` is no longer a router.
    fn invalidate_default_router(&self, addr: &Address);
}

/// A one-shot observer for the outcome of link address resolution.
///
/// Registered through [`NeighborCache::resolve_link_addr`] while an entry is
/// resolving; completed with the resolved link address, or with
/// [`AddressResolutionFailed`] when the entry gives up.
///
/// [`NeighborCache::resolve_link_addr`]: crate::cache::NeighborCache::resolve_link_addr
pub trait LinkResolutionNotifier: core::fmt::Debug + Send {
    /// Signals the result of link address resolution.
    fn notify(self: Box<Self>, result: Result<LinkAddress, AddressResolutionFailed>);
}

/// The outcome of a link address lookup on the send path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LinkResolutionResult {
    /// The destination is a known neighbor with the given link address.
    Resolved(LinkAddress),
    /// The destination is pending resolution; hold the packet and wait for a
    /// registered [`LinkResolutionNotifier`] to fire.
    Pending,
}

/// Shared NUD state: the configuration plus the random source used to jitter
/// the Reachable timeout.
pub(crate) struct NudState {
    pub(crate) config: NudConfigurations,
    rng: Mutex<SmallRng>,
}

impl NudState {
    pub(crate) fn new(config: NudConfigurations) -> Self {
        Self { config, rng: Mutex::new(SmallRng::from_entropy()) }
    }

    /// The duration an entry stays Reachable:
    /// `BaseReachableTime * U[MinRandomFactor, MaxRandomFactor]`, recomputed
    /// on every entry into Reachable per [RFC 4861 section 6.3.2].
    ///
    /// [RFC 4861 section 6.3.2]: https://tools.ietf.org/html/rfc4861#section-6.3.2
    fn reachable_time(&self) -> Duration {
        let NudConfigurations {
            base_reachable_time, min_random_factor, max_random_factor, ..
        } = &self.config;
        let factor =
            self.rng.lock().unwrap().gen_range(*min_random_factor..=*max_random_factor);
        base_reachable_time.mul_f32(factor)
    }
}

/// The table of live entries, owned by the cache and shared with entries so
/// that an entry failing on the timer path can drop itself.
pub(crate) type EntryMap = Mutex<HashMap<Address, Arc<NeighborEntry>>>;

/// Capabilities shared by every entry of one neighbor cache.
///
/// Entries hold these instead of a strong back-reference to the cache, which
/// keeps the ownership graph acyclic: the cache owns the entries, and entries
/// reach back only through a weak handle on the entry table.
pub(crate) struct EntryContext {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) resolver: Arc<dyn LinkAddressResolver>,
    pub(crate) dispatcher: Arc<dyn NudDispatcher>,
    pub(crate) router_invalidator: Arc<dyn RouterInvalidator>,
    pub(crate) nud: NudState,
    pub(crate) entries: Weak<EntryMap>,
}

/// Per-state data. Illegal combinations (a probe counter outside a soliciting
/// state, a Reachable deadline elsewhere) are unrepresentable.
#[derive(Debug)]
enum EntryState {
    Unknown,
    Incomplete {
        probes_sent: u16,
        local_addr: Address,
        notifiers: Vec<Box<dyn LinkResolutionNotifier>>,
    },
    Reachable {
        expires_at: MonotonicInstant,
    },
    Stale,
    Delay {
        expires_at: MonotonicInstant,
    },
    Probe {
        probes_sent: u16,
    },
    Failed,
    Static,
}

impl EntryState {
    fn kind(&self) -> NeighborState {
        match self {
            EntryState::Unknown => NeighborState::Unknown,
            EntryState::Incomplete { .. } => NeighborState::Incomplete,
            EntryState::Reachable { .. } => NeighborState::Reachable,
            EntryState::Stale => NeighborState::Stale,
            EntryState::Delay { .. } => NeighborState::Delay,
            EntryState::Probe { .. } => NeighborState::Probe,
            EntryState::Failed => NeighborState::Failed,
            EntryState::Static => NeighborState::Static,
        }
    }
}

struct EntryInner {
    state: EntryState,
    link_addr: LinkAddress,
    is_router: bool,
    updated_at: MonotonicInstant,
    timer: Option<Box<dyn Timer>>,
    /// Bumped whenever the pending timer is cancelled or replaced. A timer
    /// job that fires with a stale sequence number is a no-op, which makes
    /// best-effort [`Timer::cancel`] exact.
    timer_seq: u64,
}

impl EntryInner {
    fn cancel_timer(&mut self) {
        self.timer_seq += 1;
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

/// One neighbor entry.
///
/// All mutation and all observable reads go through the entry's mutex; the
/// cache serializes nothing beyond its own index lookups.
pub(crate) struct NeighborEntry {
    addr: Address,
    ctx: Arc<EntryContext>,
    weak_self: Weak<NeighborEntry>,
    inner: Mutex<EntryInner>,
}

impl NeighborEntry {
    /// Creates an entry in the Unknown state.
    pub(crate) fn new(addr: Address, ctx: Arc<EntryContext>) -> Arc<Self> {
        Self::with_state(addr, ctx, EntryState::Unknown, LinkAddress::unknown())
    }

    /// Creates an entry whose link address is administratively fixed.
    pub(crate) fn new_static(
        addr: Address,
        ctx: Arc<EntryContext>,
        link_addr: LinkAddress,
    ) -> Arc<Self> {
        Self::with_state(addr, ctx, EntryState::Static, link_addr)
    }

    fn with_state(
        addr: Address,
        ctx: Arc<EntryContext>,
        state: EntryState,
        link_addr: LinkAddress,
    ) -> Arc<Self> {
        let updated_at = ctx.clock.now();
        Arc::new_cyclic(|weak_self| Self {
            addr,
            ctx,
            weak_self: weak_self.clone(),
            inner: Mutex::new(EntryInner {
                state,
                link_addr,
                is_router: false,
                updated_at,
                timer: None,
                timer_seq: 0,
            }),
        })
    }

    pub(crate) fn addr(&self) -> &Address {
        &self.addr
    }

    /// Snapshots the visible fields.
    pub(crate) fn view(&self) -> NeighborEntryView {
        self.view_locked(&self.inner.lock().unwrap())
    }

    pub(crate) fn state(&self) -> NeighborState {
        self.inner.lock().unwrap().state.kind()
    }

    pub(crate) fn is_static_with(&self, link_addr: &LinkAddress) -> bool {
        let inner = self.inner.lock().unwrap();
        matches!(inner.state, EntryState::Static) && inner.link_addr == *link_addr
    }

    /// Dispatches the Added event for a freshly inserted static entry.
    pub(crate) fn dispatch_added(&self) {
        let inner = self.inner.lock().unwrap();
        self.dispatch_add_event_locked(&inner);
    }

    fn view_locked(&self, inner: &EntryInner) -> NeighborEntryView {
        NeighborEntryView {
            addr: self.addr.clone(),
            link_addr: inner.link_addr.clone(),
            state: inner.state.kind(),
            is_router: inner.is_router,
            updated_at: inner.updated_at,
        }
    }

    fn dispatch_add_event_locked(&self, inner: &EntryInner) {
        self.ctx.dispatcher.on_neighbor_added(&self.view_locked(inner));
    }

    fn dispatch_change_event_locked(&self, inner: &EntryInner) {
        self.ctx.dispatcher.on_neighbor_changed(&self.view_locked(inner));
    }

    fn dispatch_remove_event_locked(&self, inner: &EntryInner) {
        self.ctx.dispatcher.on_neighbor_removed(&self.view_locked(inner));
    }

    /// Replaces any pending timer with one firing `delay` from now.
    ///
    /// The job holds a weak reference: an entry dropped by the cache does not
    /// linger until its timer fires.
    fn arm_timer_locked(&self, inner: &mut EntryInner, delay: Duration) {
        inner.cancel_timer();
        let seq = inner.timer_seq;
        let entry = self.weak_self.clone();
        inner.timer = Some(self.ctx.clock.schedule_after(
            delay,
            Box::new(move || {
                if let Some(entry) = entry.upgrade() {
                    entry.handle_timer(seq);
                }
            }),
        ));
    }

    /// A higher layer wants to transmit to this neighbor.
    ///
    /// Starts or joins address resolution when no usable link address is
    /// known, and advances Stale to Delay per [RFC 4861 section 7.3.3]: the
    /// first packet sent to a Stale neighbor starts the delay before probing.
    ///
    /// [RFC 4861 section 7.3.3]: https://tools.ietf.org/html/rfc4861#section-7.3.3
    pub(crate) fn handle_packet_queued(
        &self,
        local_addr: &Address,
        notifier: Option<Box<dyn LinkResolutionNotifier>>,
    ) -> LinkResolutionResult {
        let mut inner = self.inner.lock().unwrap();
        match &mut inner.state {
            EntryState::Unknown => {
                self.enter_incomplete_locked(&mut inner, local_addr.clone(), notifier);
                LinkResolutionResult::Pending
            }
            EntryState::Failed => {
                // The previous resolution attempt is history; start a new
                // life cycle from scratch.
                inner.link_addr = LinkAddress::unknown();
                self.enter_incomplete_locked(&mut inner, local_addr.clone(), notifier);
                LinkResolutionResult::Pending
            }
            EntryState::Incomplete { notifiers, .. } => {
                if let Some(notifier) = notifier {
                    notifiers.push(notifier);
                }
                LinkResolutionResult::Pending
            }
            EntryState::Stale => {
                self.enter_delay_locked(&mut inner);
                LinkResolutionResult::Resolved(inner.link_addr.clone())
            }
            EntryState::Reachable { .. }
            | EntryState::Delay { .. }
            | EntryState::Probe { .. }
            | EntryState::Static => LinkResolutionResult::Resolved(inner.link_addr.clone()),
        }
    }

    /// An unsolicited reachability probe arrived from the neighbor, carrying
    /// its link address.
    ///
    /// Per [RFC 4861 section 7.2.3], a probe that updates the cached link
    /// address leaves the entry in Stale: receipt of a probe does not confirm
    /// the forward path.
    ///
    /// [RFC 4861 section 7.2.3]: https://tools.ietf.org/html/rfc4861#section-7.2.3
    pub(crate) fn handle_probe(&self, remote_link_addr: &LinkAddress) {
        if remote_link_addr.is_unknown() {
            debug!("ignoring probe from {} with no link address", self.addr);
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        match &mut inner.state {
            EntryState::Unknown => {
                inner.link_addr = remote_link_addr.clone();
                inner.state = EntryState::Stale;
                inner.updated_at = self.ctx.clock.now();
                self.dispatch_add_event_locked(&inner);
            }
            EntryState::Incomplete { notifiers, .. } => {
                let notifiers = core::mem::take(notifiers);
                inner.link_addr = remote_link_addr.clone();
                self.enter_stale_locked(&mut inner);
                for notifier in notifiers {
                    notifier.notify(Ok(remote_link_addr.clone()));
                }
            }
            EntryState::Reachable { .. } | EntryState::Delay { .. } | EntryState::Probe { .. } => {
                if inner.link_addr != *remote_link_addr {
                    inner.link_addr = remote_link_addr.clone();
                    self.enter_stale_locked(&mut inner);
                }
            }
            EntryState::Stale => {
                if inner.link_addr != *remote_link_addr {
                    // The state does not change, but the binding did.
                    inner.link_addr = remote_link_addr.clone();
                    inner.updated_at = self.ctx.clock.now();
                    self.dispatch_change_event_locked(&inner);
                }
            }
            EntryState::Failed | EntryState::Static => {}
        }
    }

    /// A reachability confirmation arrived for this neighbor.
    ///
    /// Implements the update rules of [RFC 4861 section 7.2.5].
    ///
    /// [RFC 4861 section 7.2.5]: https://tools.ietf.org/html/rfc4861#section-7.2.5
    pub(crate) fn handle_confirmation(&self, link_addr: &LinkAddress, flags: ConfirmationFlags) {
        let mut inner = self.inner.lock().unwrap();
        match &mut inner.state {
            EntryState::Incomplete { notifiers, .. } => {
                if link_addr.is_unknown() {
                    // A confirmation with no link address cannot complete
                    // resolution.
                    debug!(
                        "ignoring confirmation without a link address for {} in Incomplete",
                        self.addr
                    );
                    return;
                }
                let notifiers = core::mem::take(notifiers);
                inner.link_addr = link_addr.clone();
                inner.is_router = flags.is_router_flag;
                if flags.solicited_flag {
                    self.enter_reachable_locked(&mut inner, link_addr.clone());
                } else {
                    self.enter_stale_locked(&mut inner);
                }
                for notifier in notifiers {
                    notifier.notify(Ok(link_addr.clone()));
                }
            }
            EntryState::Reachable { .. }
            | EntryState::Stale
            | EntryState::Delay { .. }
            | EntryState::Probe { .. } => {
                self.handle_confirmation_resolved_locked(&mut inner, link_addr, flags);
            }
            // Per RFC 4861 section 7.2.5, a confirmation for a target without
            // an established entry is silently discarded.
            EntryState::Unknown | EntryState::Failed | EntryState::Static => {}
        }
    }

    /// Confirmation handling for the states that already hold a link address.
    fn handle_confirmation_resolved_locked(
        &self,
        inner: &mut EntryInner,
        link_addr: &LinkAddress,
        flags: ConfirmationFlags,
    ) {
        let ConfirmationFlags { solicited_flag, override_flag, is_router_flag } = flags;
        let link_addr_different =
            !link_addr.is_unknown() && inner.link_addr != *link_addr;

        if link_addr_different {
            if !override_flag {
                // RFC 4861 section 7.2.5: if the Override flag is clear and
                // the supplied link address differs, a Reachable entry drops
                // to Stale without adopting the address; any other entry
                // ignores the confirmation entirely.
                if matches!(inner.state, EntryState::Reachable { .. }) {
                    self.enter_stale_locked(inner);
                }
                return;
            }

            if !solicited_flag {
                inner.link_addr = link_addr.clone();
                if matches!(inner.state, EntryState::Stale) {
                    // The state does not change, but the binding did.
                    inner.updated_at = self.ctx.clock.now();
                    self.dispatch_change_event_locked(inner);
                } else {
                    self.enter_stale_locked(inner);
                }
                return;
            }
        }

        if solicited_flag {
            // Override was set or the link address matched; the forward path
            // is confirmed, adopting the supplied address when it differs.
            let link_addr = if link_addr_different {
                link_addr.clone()
            } else {
                inner.link_addr.clone()
            };
            self.enter_reachable_locked(inner, link_addr);
        }

        if inner.is_router && !is_router_flag {
            // The neighbor stopped being a router; it must no longer be used
            // as a default route.
            inner.is_router = false;
            self.ctx.router_invalidator.invalidate_default_router(&self.addr);
        }
    }

    /// An upper-layer protocol reports forward progress through this
    /// neighbor, e.g. a transport connection advancing.
    ///
    /// Has no effect on entries without a link address, per [RFC 4861
    /// section 7.3.1].
    ///
    /// [RFC 4861 section 7.3.1]: https://tools.ietf.org/html/rfc4861#section-7.3.1
    pub(crate) fn handle_upper_level_confirmation(&self) {
        let mut inner = self.inner.lock().unwrap();
        match &inner.state {
            EntryState::Reachable { .. }
            | EntryState::Stale
            | EntryState::Delay { .. }
            | EntryState::Probe { .. } => {
                let link_addr = inner.link_addr.clone();
                self.enter_reachable_locked(&mut inner, link_addr);
            }
            EntryState::Unknown
            | EntryState::Incomplete { .. }
            | EntryState::Failed
            | EntryState::Static => {
                debug!(
                    "ignoring upper-level confirmation for {} in state {:?}",
                    self.addr,
                    inner.state.kind()
                );
            }
        }
    }

    /// Removes the entry from service: cancels the timer, fails pending
    /// resolution waiters, and dispatches the terminal Removed event. Called
    /// by the cache when it drops the entry.
    pub(crate) fn remove(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.cancel_timer();
        if let EntryState::Incomplete { notifiers, .. } = &mut inner.state {
            for notifier in notifiers.drain(..) {
                notifier.notify(Err(AddressResolutionFailed));
            }
        }
        self.dispatch_remove_event_locked(&inner);
        inner.state = EntryState::Failed;
        inner.updated_at = self.ctx.clock.now();
    }

    fn enter_incomplete_locked(
        &self,
        inner: &mut EntryInner,
        local_addr: Address,
        notifier: Option<Box<dyn LinkResolutionNotifier>>,
    ) {
        debug_assert!(inner.link_addr.is_unknown());
        inner.cancel_timer();
        inner.state = EntryState::Incomplete {
            probes_sent: 0,
            local_addr,
            notifiers: notifier.into_iter().collect(),
        };
        inner.updated_at = self.ctx.clock.now();
        self.dispatch_add_event_locked(inner);
        // The first multicast probe goes out from the timer path, as a
        // zero-delay job, so the Added event is observable before the probe.
        self.arm_timer_locked(inner, Duration::ZERO);
    }

    /// Enters Reachable with `link_addr` as the binding.
    ///
    /// A Changed event is suppressed only when the entry was already
    /// Reachable with this very address; re-entering Reachable with a
    /// different address is a visible rebinding and is announced.
    fn enter_reachable_locked(&self, inner: &mut EntryInner, link_addr: LinkAddress) {
        debug_assert!(!link_addr.is_unknown());
        let was_reachable_with_same_link =
            matches!(inner.state, EntryState::Reachable { .. }) && inner.link_addr == link_addr;
        let reachable_time = self.ctx.nud.reachable_time();
        inner.cancel_timer();
        inner.link_addr = link_addr;
        inner.state =
            EntryState::Reachable { expires_at: self.ctx.clock.now() + reachable_time };
        if !was_reachable_with_same_link {
            inner.updated_at = self.ctx.clock.now();
            self.dispatch_change_event_locked(inner);
        }
        self.arm_timer_locked(inner, reachable_time);
    }

    fn enter_stale_locked(&self, inner: &mut EntryInner) {
        debug_assert!(!inner.link_addr.is_unknown());
        inner.cancel_timer();
        inner.state = EntryState::Stale;
        inner.updated_at = self.ctx.clock.now();
        self.dispatch_change_event_locked(inner);
        // Stale entries hold no timer; nothing happens until a packet is
        // queued for transmission.
    }

    fn enter_delay_locked(&self, inner: &mut EntryInner) {
        debug_assert!(matches!(inner.state, EntryState::Stale));
        let delay = self.ctx.nud.config.delay_first_probe_time;
        inner.cancel_timer();
        inner.state = EntryState::Delay { expires_at: self.ctx.clock.now() + delay };
        inner.updated_at = self.ctx.clock.now();
        self.dispatch_change_event_locked(inner);
        self.arm_timer_locked(inner, delay);
    }

    /// Gives up on this neighbor: dispatches Removed (snapshotting the state
    /// being left), fails pending waiters, and drops the entry from the
    /// cache's table. A later lookup starts a brand-new entry from Unknown.
    fn enter_failed_locked(&self, inner: &mut EntryInner) {
        inner.cancel_timer();
        if let EntryState::Incomplete { notifiers, .. } = &mut inner.state {
            for notifier in notifiers.drain(..) {
                notifier.notify(Err(AddressResolutionFailed));
            }
        }
        self.dispatch_remove_event_locked(inner);
        inner.state = EntryState::Failed;
        inner.updated_at = self.ctx.clock.now();
        if let Some(entries) = self.ctx.entries.upgrade() {
            let _removed = entries.lock().unwrap().remove(&self.addr);
        }
    }

    /// The entry's pending timer fired.
    ///
    /// `seq` identifies the timer generation the job was armed with; a job
    /// that lost a race with cancellation or re-arming finds a newer sequence
    /// number and becomes a no-op.
    fn handle_timer(&self, seq: u64) {
        let mut inner = self.inner.lock().unwrap();
        if seq != inner.timer_seq {
            return;
        }
        inner.timer = None;
        match &inner.state {
            EntryState::Incomplete { .. } => self.retransmit_multicast_probe_locked(&mut inner),
            EntryState::Reachable { expires_at } => {
                // The timer is re-armed on every confirmation, so a firing
                // implies the entry decayed. RFC 4861 section 7.3.3: when
                // ReachableTime has passed since the last confirmation, the
                // entry moves to Stale.
                debug_assert!(*expires_at <= self.ctx.clock.now());
                self.enter_stale_locked(&mut inner);
            }
            EntryState::Delay { expires_at } => {
                // RFC 4861 section 7.3.3: still in Delay when the timer
                // expires; start probing.
                debug_assert!(*expires_at <= self.ctx.clock.now());
                self.enter_probe_locked(&mut inner);
            }
            EntryState::Probe { .. } => self.retransmit_unicast_probe_locked(&mut inner),
            EntryState::Unknown | EntryState::Stale | EntryState::Failed | EntryState::Static => {
                debug!(
                    "spurious timer firing for {} in state {:?}",
                    self.addr,
                    inner.state.kind()
                );
            }
        }
    }

    fn enter_probe_locked(&self, inner: &mut EntryInner) {
        inner.cancel_timer();
        inner.state = EntryState::Probe { probes_sent: 0 };
        inner.updated_at = self.ctx.clock.now();
        self.dispatch_change_event_locked(inner);
        // The first unicast probe goes out immediately; retransmissions
        // follow every RetransmitTimer.
        self.retransmit_unicast_probe_locked(inner);
    }

    fn retransmit_multicast_probe_locked(&self, inner: &mut EntryInner) {
        let max_probes = self.ctx.nud.config.max_multicast_probes.get();
        let (probes_sent, local_addr) = match &inner.state {
            EntryState::Incomplete { probes_sent, local_addr, .. } => {
                (*probes_sent, local_addr.clone())
            }
            state => unreachable!("multicast retransmit in state {:?}", state),
        };
        if probes_sent == max_probes {
            debug!(
                "neighbor {} failed to resolve after {} multicast probes; giving up",
                self.addr, max_probes
            );
            self.enter_failed_locked(inner);
            return;
        }
        if let Err(ProbeSendError) =
            self.ctx.resolver.send_neighbor_probe(&self.addr, Some(&local_addr), None)
        {
            self.enter_failed_locked(inner);
            return;
        }
        match &mut inner.state {
            EntryState::Incomplete { probes_sent, .. } => *probes_sent += 1,
            state => unreachable!("multicast retransmit in state {:?}", state),
        }
        // Retransmissions within Incomplete are internal: no event, no
        // updated_at write.
        self.arm_timer_locked(inner, self.ctx.nud.config.retransmit_timer);
    }

    fn retransmit_unicast_probe_locked(&self, inner: &mut EntryInner) {
        let max_probes = self.ctx.nud.config.max_unicast_probes.get();
        let probes_sent = match &inner.state {
            EntryState::Probe { probes_sent } => *probes_sent,
            state => unreachable!("unicast retransmit in state {:?}", state),
        };
        if probes_sent == max_probes {
            debug!(
                "neighbor {} stopped answering after {} unicast probes; giving up",
                self.addr, max_probes
            );
            self.enter_failed_locked(inner);
            return;
        }
        let link_addr = inner.link_addr.clone();
        if let Err(ProbeSendError) =
            self.ctx.resolver.send_neighbor_probe(&self.addr, None, Some(&link_addr))
        {
            self.enter_failed_locked(inner);
            return;
        }
        match &mut inner.state {
            EntryState::Probe { probes_sent } => *probes_sent += 1,
            state => unreachable!("unicast retransmit in state {:?}", state),
        }
        self.arm_timer_locked(inner, self.ctx.nud.config.retransmit_timer);
    }
}

impl core::fmt::Debug for NeighborEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let Self { addr, ctx: _, weak_self: _, inner } = self;
        let inner = inner.lock().unwrap();
        f.debug_struct("NeighborEntry")
            .field("addr", addr)
            .field("state", &inner.state)
            .field("link_addr", &inner.link_addr)
            .field("is_router", &inner.is_router)
            .field("updated_at", &inner.updated_at)
            .finish()
    }
}
