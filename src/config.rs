// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! NUD tunables.

use core::num::NonZeroU16;
use std::time::Duration;

/// The default time a neighbor is considered reachable after receiving a
/// reachability confirmation, as defined in [RFC 4861 section 10].
///
/// [RFC 4861 section 10]: https://tools.ietf.org/html/rfc4861#section-10
pub const DEFAULT_BASE_REACHABLE_TIME: Duration = Duration::from_secs(30);

/// The default minimum value of the random factor applied to
/// `BaseReachableTime`, as defined in [RFC 4861 section 10].
///
/// [RFC 4861 section 10]: https://tools.ietf.org/html/rfc4861#section-10
pub const DEFAULT_MIN_RANDOM_FACTOR: f32 = 0.5;

/// The default maximum value of the random factor applied to
/// `BaseReachableTime`, as defined in [RFC 4861 section 10].
///
/// [RFC 4861 section 10]: https://tools.ietf.org/html/rfc4861#section-10
pub const DEFAULT_MAX_RANDOM_FACTOR: f32 = 1.5;

/// The default time between retransmissions of reachability probes, as
/// defined in [RFC 4861 section 10].
///
/// [RFC 4861 section 10]: https://tools.ietf.org/html/rfc4861#section-10
pub const DEFAULT_RETRANSMIT_TIMER: Duration = Duration::from_secs(1);

/// The default time after which a neighbor in the Delay state transitions to
/// Probe, as defined in [RFC 4861 section 10].
///
/// [RFC 4861 section 10]: https://tools.ietf.org/html/rfc4861#section-10
pub const DEFAULT_DELAY_FIRST_PROBE_TIME: Duration = Duration::from_secs(5);

/// The default maximum number of multicast solicitations in one Incomplete
/// episode, as defined in [RFC 4861 section 10].
///
/// [RFC 4861 section 10]: https://tools.ietf.org/html/rfc4861#section-10
pub const DEFAULT_MAX_MULTICAST_PROBES: NonZeroU16 =
    NonZeroU16::new(3).unwrap();

/// The default maximum number of unicast solicitations in one Probe episode,
/// as defined in [RFC 4861 section 10].
///
/// [RFC 4861 section 10]: https://tools.ietf.org/html/rfc4861#section-10
pub const DEFAULT_MAX_UNICAST_PROBES: NonZeroU16 =
    NonZeroU16::new(3).unwrap();

/// Tunables consumed by each neighbor entry.
///
/// Construct with [`NudConfigurations::builder`]; values that would make the
/// state machine diverge (zero timeouts, an inverted random-factor range) are
/// reset to their RFC defaults at build time.
#[derive(Clone, Debug, PartialEq)]
pub struct NudConfigurations {
    /// The mean lifetime of the Reachable state before it decays to Stale.
    pub base_reachable_time: Duration,
    /// The lower bound of the uniform random factor multiplied with
    /// `base_reachable_time` to produce each entry's actual Reachable
    /// timeout.
    pub min_random_factor: f32,
    /// The upper bound of the random factor; must not be less than
    /// `min_random_factor`.
    pub max_random_factor: f32,
    /// The interval between successive reachability probes.
    pub retransmit_timer: Duration,
    /// The delay between entering the Delay state and the first unicast
    /// probe.
    pub delay_first_probe_time: Duration,
    /// Multicast probes permitted in one Incomplete episode before the entry
    /// fails.
    pub max_multicast_probes: NonZeroU16,
    /// Unicast probes permitted in one Probe episode before the entry fails.
    pub max_unicast_probes: NonZeroU16,
}

impl NudConfigurations {
    /// Returns a builder initialized with the RFC 4861 section 10 defaults.
    pub fn builder() -> NudConfigurationsBuilder {
        NudConfigurationsBuilder { config: NudConfigurations::default() }
    }
}

impl Default for NudConfigurations {
    fn default() -> Self {
        Self {
            base_reachable_time: DEFAULT_BASE_REACHABLE_TIME,
            min_random_factor: DEFAULT_MIN_RANDOM_FACTOR,
            max_random_factor: DEFAULT_MAX_RANDOM_FACTOR,
            retransmit_timer: DEFAULT_RETRANSMIT_TIMER,
            delay_first_probe_time: DEFAULT_DELAY_FIRST_PROBE_TIME,
            max_multicast_probes: DEFAULT_MAX_MULTICAST_PROBES,
            max_unicast_probes: DEFAULT_MAX_UNICAST_PROBES,
        }
    }
}

/// Builder for [`NudConfigurations`].
#[derive(Clone, Debug)]
pub struct NudConfigurationsBuilder {
    config: NudConfigurations,
}

impl NudConfigurationsBuilder {
    /// Overrides `BaseReachableTime`.
    pub fn base_reachable_time(mut self, value: Duration) -> Self {
        self.config.base_reachable_time = value;
        self
    }

    /// Overrides `MinRandomFactor`.
    pub fn min_random_factor(mut self, value: f32) -> Self {
        self.config.min_random_factor = value;
        self
    }

    /// Overrides `MaxRandomFactor`.
    pub fn max_random_factor(mut self, value: f32) -> Self {
        self.config.max_random_factor = value;
        self
    }

    /// Overrides `RetransmitTimer`.
    pub fn retransmit_timer(mut self, value: Duration) -> Self {
        self.config.retransmit_timer = value;
        self
    }

    /// Overrides `DelayFirstProbeTime`.
    pub fn delay_first_probe_time(mut self, value: Duration) -> Self {
        self.config.delay_first_probe_time = value;
        self
    }

    /// Overrides `MaxMulticastProbes`.
    pub fn max_multicast_probes(mut self, value: NonZeroU16) -> Self {
        self.config.max_multicast_probes = value;
        self
    }

    /// Overrides `MaxUnicastProbes`.
    pub fn max_unicast_probes(mut self, value: NonZeroU16) -> Self {
        self.config.max_unicast_probes = value;
        self
    }

    /// Produces the configuration, resetting unusable values to their
    /// defaults.
    pub fn build(self) -> NudConfigurations {
        let Self { mut config } = self;
        if config.base_reachable_time.is_zero() {
            tracing::debug!(
                "invalid BaseReachableTime, using default of {:?}",
                DEFAULT_BASE_REACHABLE_TIME
            );
            config.base_reachable_time = DEFAULT_BASE_REACHABLE_TIME;
        }
        if config.min_random_factor <= 0.0 {
            tracing::debug!(
                "invalid MinRandomFactor, using default of {}",
                DEFAULT_MIN_RANDOM_FACTOR
            );
            config.min_random_factor = DEFAULT_MIN_RANDOM_FACTOR;
        }
        if config.max_random_factor < config.min_random_factor {
            tracing::debug!(
                "invalid MaxRandomFactor, using MinRandomFactor of {}",
                config.min_random_factor
            );
            config.max_random_factor = config.min_random_factor;
        }
        if config.retransmit_timer.is_zero() {
            tracing::debug!(
                "invalid RetransmitTimer, using default of {:?}",
                DEFAULT_RETRANSMIT_TIMER
            );
            config.retransmit_timer = DEFAULT_RETRANSMIT_TIMER;
        }
        if config.delay_first_probe_time.is_zero() {
            tracing::debug!(
                "invalid DelayFirstProbeTime, using default of {:?}",
                DEFAULT_DELAY_FIRST_PROBE_TIME
            );
            config.delay_first_probe_time = DEFAULT_DELAY_FIRST_PROBE_TIME;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_yields_rfc_defaults() {
        let config = NudConfigurations::builder().build();
        assert_eq!(config, NudConfigurations::default());
        assert_eq!(config.base_reachable_time, Duration::from_secs(30));
        assert_eq!(config.retransmit_timer, Duration::from_secs(1));
        assert_eq!(config.delay_first_probe_time, Duration::from_secs(5));
        assert_eq!(config.max_multicast_probes.get(), 3);
        assert_eq!(config.max_unicast_probes.get(), 3);
    }

    #[test]
    fn builder_overrides_individual_fields() {
        let config = NudConfigurations::builder()
            .base_reachable_time(Duration::from_secs(1))
            .max_unicast_probes(NonZeroU16::new(7).unwrap())
            .build();
        assert_eq!(config.base_reachable_time, Duration::from_secs(1));
        assert_eq!(config.max_unicast_probes.get(), 7);
        // Everything else keeps its default.
        assert_eq!(config.retransmit_timer, DEFAULT_RETRANSMIT_TIMER);
        assert_eq!(config.max_multicast_probes, DEFAULT_MAX_MULTICAST_PROBES);
    }

    #[test]
    fn builder_resets_invalid_fields() {
        let config = NudConfigurations::builder()
            .base_reachable_time(Duration::ZERO)
            .retransmit_timer(Duration::ZERO)
            .delay_first_probe_time(Duration::ZERO)
            .min_random_factor(-1.0)
            .build();
        assert_eq!(config.base_reachable_time, DEFAULT_BASE_REACHABLE_TIME);
        assert_eq!(config.retransmit_timer, DEFAULT_RETRANSMIT_TIMER);
        assert_eq!(config.delay_first_probe_time, DEFAULT_DELAY_FIRST_PROBE_TIME);
        assert_eq!(config.min_random_factor, DEFAULT_MIN_RANDOM_FACTOR);
    }

    #[test]
    fn builder_clamps_inverted_random_factor_range() {
        let config = NudConfigurations::builder()
            .min_random_factor(2.0)
            .max_random_factor(1.0)
            .build();
        assert_eq!(config.min_random_factor, 2.0);
        assert_eq!(config.max_random_factor, 2.0);
    }
}
