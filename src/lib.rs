// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Neighbor Unreachability Detection.
//!
//! A user-space implementation of the neighbor cache and the per-entry NUD
//! state machine defined in [RFC 4861 section 7.3.2], with the failure
//! handling described in [RFC 7048]: entries whose solicitations go
//! unanswered are discarded and re-resolved on demand.
//!
//! The crate is transport-agnostic. [`NeighborCache`] is wired up with four
//! capabilities at construction:
//!
//! - a [`Clock`] that stamps entries and schedules their timers
//!   ([`SystemClock`] for production, a manual clock in tests);
//! - a [`LinkAddressResolver`] that emits wire-level reachability probes
//!   (e.g. an NDP Neighbor Solicitation sender);
//! - a [`NudDispatcher`] observing entry Added/Changed/Removed events;
//! - a [`RouterInvalidator`] told when a neighbor stops being a router.
//!
//! Inbound packet events and outbound send attempts enter through the cache,
//! which forwards them to the per-neighbor entry; the entry updates its
//! state under its own lock, emits probes and events, and (re)arms its
//! timer.
//!
//! [RFC 4861 section 7.3.2]: https://tools.ietf.org/html/rfc4861#section-7.3.2
//! [RFC 7048]: https://tools.ietf.org/html/rfc7048

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod time;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::NeighborCache;
pub use config::{NudConfigurations, NudConfigurationsBuilder};
pub use entry::{
    ConfirmationFlags, LinkAddressResolver, LinkResolutionNotifier, LinkResolutionResult,
    NeighborEntryView, NeighborState, NudDispatcher, RouterInvalidator,
};
pub use error::{AddressResolutionFailed, ProbeSendError};
pub use time::{Clock, MonotonicInstant, SystemClock, Timer, TimerJob};
pub use types::{Address, LinkAddress};
