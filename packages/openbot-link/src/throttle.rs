//! Read throttling for polled transports.
//!
//! The phone emits a line every few tens of milliseconds, while callers may
//! poll the accessors far more often. [`ReadThrottle`] decides, per poll,
//! whether to touch the transport at all and how many characters to read.
//! It only looks at the age of the latest target and its own burst counter;
//! decoding happens elsewhere.

#[cfg(feature = "config")]
use serde::Deserialize;

use crate::config::ConfigError;

/// Thresholds for [`ReadThrottle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Deserialize), serde(default))]
pub struct ThrottleConfig {
    /// Targets younger than this are fresh enough to skip a repeated read.
    pub fresh_window_ms: u64,
    /// Targets older than this start a new burst.
    pub burst_reset_ms: u64,
    /// Character budget for the first poll of a burst.
    pub first_burst_cap: usize,
    /// Character budget for later polls of a burst.
    pub burst_cap: usize,
    /// Counter value forced after a poll that found nothing to read.
    pub max_consecutive: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            fresh_window_ms: 30,
            burst_reset_ms: 50,
            first_burst_cap: 50,
            burst_cap: 150,
            max_consecutive: 3,
        }
    }
}

impl ThrottleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first_burst_cap == 0 || self.burst_cap == 0 {
            return Err(ConfigError::InvalidThrottle(
                "read caps must be at least one character",
            ));
        }
        if self.fresh_window_ms > self.burst_reset_ms {
            return Err(ConfigError::InvalidThrottle(
                "fresh window must not exceed the burst reset age",
            ));
        }
        if self.max_consecutive < 2 {
            return Err(ConfigError::InvalidThrottle(
                "max consecutive polls must be at least two to suppress idle reads",
            ));
        }
        Ok(())
    }
}

/// Decision made by [`ReadThrottle::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPlan {
    /// Leave the transport alone this time.
    Skip,
    /// Read at most `max_chars` characters.
    Read { max_chars: usize },
}

/// Debounces polls of a transport that has no readiness notification.
#[derive(Debug, Clone)]
pub struct ReadThrottle {
    config: ThrottleConfig,
    consecutive: u32,
}

impl ReadThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            consecutive: 0,
        }
    }

    /// Plans the next poll given the age of the latest target.
    pub fn plan(&mut self, age_ms: u64) -> ReadPlan {
        if age_ms < self.config.fresh_window_ms && self.consecutive > 1 {
            self.consecutive = 0;
            return ReadPlan::Skip;
        }

        if age_ms > self.config.burst_reset_ms {
            self.consecutive = 0;
        }

        self.consecutive = self.consecutive.saturating_add(1);

        ReadPlan::Read {
            max_chars: if self.consecutive == 1 {
                self.config.first_burst_cap
            } else {
                self.config.burst_cap
            },
        }
    }

    /// Records that the transport had nothing to read, so the next poll
    /// within the fresh window is skipped.
    pub fn mark_idle(&mut self) {
        self.consecutive = self.config.max_consecutive;
    }

    /// Polls made in the current burst.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadPlan, ReadThrottle, ThrottleConfig};

    #[test]
    fn first_poll_of_burst_reads_less() {
        let mut throttle = ReadThrottle::new(ThrottleConfig::default());

        assert_eq!(throttle.plan(40), ReadPlan::Read { max_chars: 50 });
        assert_eq!(throttle.plan(40), ReadPlan::Read { max_chars: 150 });
        assert_eq!(throttle.consecutive(), 2);
    }

    #[test]
    fn fresh_data_skips_repeated_reads() {
        let mut throttle = ReadThrottle::new(ThrottleConfig::default());
        throttle.plan(0);
        throttle.plan(5);

        assert_eq!(throttle.plan(10), ReadPlan::Skip);
        assert_eq!(throttle.consecutive(), 0);
        assert_eq!(throttle.plan(12), ReadPlan::Read { max_chars: 50 });
    }

    #[test]
    fn stale_data_starts_new_burst() {
        let mut throttle = ReadThrottle::new(ThrottleConfig::default());
        throttle.plan(40);
        throttle.plan(40);

        assert_eq!(throttle.plan(51), ReadPlan::Read { max_chars: 50 });
    }

    #[test]
    fn idle_transport_skips_next_fresh_poll() {
        let mut throttle = ReadThrottle::new(ThrottleConfig::default());
        throttle.plan(0);
        throttle.mark_idle();

        assert_eq!(throttle.consecutive(), 3);
        assert_eq!(throttle.plan(8), ReadPlan::Skip);
    }

    #[test]
    fn idle_mark_does_not_block_stale_polls() {
        let mut throttle = ReadThrottle::new(ThrottleConfig::default());
        throttle.mark_idle();

        assert_eq!(throttle.plan(500), ReadPlan::Read { max_chars: 50 });
    }

    #[test]
    fn validation() {
        assert!(ThrottleConfig::default().validate().is_ok());
        assert!(ThrottleConfig {
            burst_cap: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(ThrottleConfig {
            fresh_window_ms: 80,
            ..Default::default()
        }
        .validate()
        .is_err());
    }
}
