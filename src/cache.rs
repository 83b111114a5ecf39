// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The per-interface neighbor cache.
//!
//! The cache owns the entries and routes inbound events to them; all NUD
//! logic lives in [`crate::entry`]. Lock order is: the cache's index lock is
//! held only to find or insert an entry and is released before the entry's
//! own lock is taken. Entries reach back into the index (to drop themselves
//! on failure) while holding their own lock, which is safe because the index
//! lock is never held across an entry call.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::NudConfigurations;
use crate::entry::{
    ConfirmationFlags, EntryContext, LinkAddressResolver, LinkResolutionNotifier,
    LinkResolutionResult, NeighborEntry, NeighborEntryView, NeighborState, NudDispatcher,
    NudState, RouterInvalidator,
};
use crate::time::Clock;
use crate::types::{Address, LinkAddress};

/// A cache of neighbor entries for one interface, keyed by the neighbor's
/// network-layer address.
///
/// Inbound events (receive paths, send paths, upper-layer signals) may be
/// delivered concurrently; each entry serializes its own event handling under
/// its lock. The resolver, dispatcher, and router-invalidation ports passed
/// at construction are shared by all entries and are invoked with the
/// affected entry's lock held, so they must not call back into the cache.
pub struct NeighborCache {
    ctx: Arc<EntryContext>,
    entries: Arc<crate::entry::EntryMap>,
}

impl NeighborCache {
    /// Creates an empty cache wired to the given capabilities.
    pub fn new(
        config: NudConfigurations,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn LinkAddressResolver>,
        dispatcher: Arc<dyn NudDispatcher>,
        router_invalidator: Arc<dyn RouterInvalidator>,
    ) -> Self {
        let entries = Arc::new(Mutex::new(HashMap::new()));
        let ctx = Arc::new(EntryContext {
            clock,
            resolver,
            dispatcher,
            router_invalidator,
            nud: NudState::new(config),
            entries: Arc::downgrade(&entries),
        });
        Self { ctx, entries }
    }

    /// Looks up the link address for `remote` on behalf of a sender, creating
    /// an entry and starting address resolution if none exists.
    ///
    /// `local` is the source address used for multicast solicitations. When
    /// the result is [`LinkResolutionResult::Pending`] the caller should hold
    /// the packet; a `notifier`, if provided, fires once resolution completes
    /// or the entry gives up. A [`LinkResolutionResult::Resolved`] lookup of
    /// a Stale entry also starts reachability re-validation, as if a packet
    /// had been sent.
    pub fn resolve_link_addr(
        &self,
        remote: &Address,
        local: &Address,
        notifier: Option<Box<dyn LinkResolutionNotifier>>,
    ) -> LinkResolutionResult {
        let entry = self.entry(remote);
        let result = entry.handle_packet_queued(local, notifier);
        self.purge_if_failed(&entry);
        result
    }

    /// Handles an inbound reachability probe (e.g. an NDP Neighbor
    /// Solicitation) from `remote` carrying its link address.
    ///
    /// Creates a Stale entry when none exists, per RFC 4861 section 7.2.3.
    pub fn handle_probe(&self, remote: &Address, remote_link_addr: &LinkAddress) {
        let entry = self.entry(remote);
        entry.handle_probe(remote_link_addr);
        self.purge_if_failed(&entry);
    }

    /// Handles an inbound reachability confirmation (e.g. an NDP Neighbor
    /// Advertisement) for `remote`.
    ///
    /// A neighbor without an entry gets one in Unknown; per RFC 4861 section
    /// 7.2.5 the confirmation itself has no effect on such an entry, since
    /// the recipient has not initiated any communication with the target.
    pub fn handle_confirmation(
        &self,
        remote: &Address,
        link_addr: &LinkAddress,
        flags: ConfirmationFlags,
    ) {
        let entry = self.entry(remote);
        entry.handle_confirmation(link_addr, flags);
        self.purge_if_failed(&entry);
    }

    /// Handles an out-of-band reachability signal from an upper-layer
    /// protocol (e.g. a transport connection making forward progress).
    ///
    /// A neighbor without an entry gets one in Unknown, on which the signal
    /// has no effect until a link address is learned.
    pub fn handle_upper_level_confirmation(&self, remote: &Address) {
        let entry = self.entry(remote);
        entry.handle_upper_level_confirmation();
        self.purge_if_failed(&entry);
    }

    /// Installs an entry whose link address is administratively fixed.
    ///
    /// Replaces any existing entry for `addr` (dispatching its Removed
    /// event); installing an identical static entry is a no-op.
    pub fn add_static_entry(&self, addr: &Address, link_addr: LinkAddress) {
        if let Some(existing) = self.existing(addr) {
            if existing.is_static_with(&link_addr) {
                return;
            }
        }
        if let Some(removed) = self.take_entry(addr) {
            removed.remove();
        }
        let entry = NeighborEntry::new_static(addr.clone(), self.ctx.clone(), link_addr);
        let displaced = self.entries.lock().unwrap().insert(addr.clone(), entry.clone());
        if let Some(displaced) = displaced {
            // An entry raced in between the removal and the insert.
            displaced.remove();
        }
        entry.dispatch_added();
    }

    /// Removes the entry for `addr`, dispatching its Removed event.
    ///
    /// Returns whether an entry existed.
    pub fn remove_entry(&self, addr: &Address) -> bool {
        match self.take_entry(addr) {
            Some(entry) => {
                entry.remove();
                true
            }
            None => false,
        }
    }

    /// Removes every entry, dispatching a Removed event for each.
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain().map(|(_addr, entry)| entry).collect::<Vec<_>>()
        };
        for entry in removed {
            entry.remove();
        }
    }

    /// A snapshot of the entry for `addr`, if one exists.
    pub fn entry_view(&self, addr: &Address) -> Option<NeighborEntryView> {
        self.existing(addr).map(|entry| entry.view())
    }

    /// Snapshots of all entries, in no particular order.
    pub fn entry_views(&self) -> Vec<NeighborEntryView> {
        let entries = {
            let entries = self.entries.lock().unwrap();
            entries.values().cloned().collect::<Vec<_>>()
        };
        entries.iter().map(|entry| entry.view()).collect()
    }

    /// Looks the entry up, creating one in Unknown if absent.
    fn entry(&self, addr: &Address) -> Arc<NeighborEntry> {
        let mut entries = self.entries.lock().unwrap();
        match entries.entry(addr.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(vacant) => {
                vacant.insert(NeighborEntry::new(addr.clone(), self.ctx.clone())).clone()
            }
        }
    }

    fn existing(&self, addr: &Address) -> Option<Arc<NeighborEntry>> {
        self.entries.lock().unwrap().get(addr).cloned()
    }

    fn take_entry(&self, addr: &Address) -> Option<Arc<NeighborEntry>> {
        self.entries.lock().unwrap().remove(addr)
    }

    /// A Failed entry is dropped from the index once its terminal Removed
    /// event is out; a fresh lookup then starts a new entry from Unknown.
    fn purge_if_failed(&self, entry: &Arc<NeighborEntry>) {
        if entry.state() != NeighborState::Failed {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.get(entry.addr()).map_or(false, |e| Arc::ptr_eq(e, entry)) {
            let _removed = entries.remove(entry.addr());
        }
    }
}
