//! Bounded reconnect after an abnormal close
//!
//! Fixed delays, no backoff: the first attempt after a drop waits
//! `first_delay`, each failed attempt waits `retry_delay` before the next,
//! and after `max_attempts` failures the channel gives up for good.

use crate::config::ChannelConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub first_delay: Duration,
    pub retry_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            first_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl From<&ChannelConfig> for ReconnectPolicy {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            first_delay: config.reconnect_delay(),
            retry_delay: config.retry_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Failure counter for one outage
#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    failed: u32,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, failed: 0 }
    }

    /// The live connection dropped abnormally
    pub fn connection_lost(&mut self) -> ReconnectDecision {
        if self.failed >= self.policy.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        ReconnectDecision::RetryAfter(self.policy.first_delay)
    }

    /// A reconnect attempt could not open a transport
    pub fn attempt_failed(&mut self) -> ReconnectDecision {
        self.failed += 1;
        if self.failed >= self.policy.max_attempts {
            ReconnectDecision::GiveUp
        } else {
            ReconnectDecision::RetryAfter(self.policy.retry_delay)
        }
    }

    /// A transport opened, the outage is over
    pub fn reset(&mut self) {
        self.failed = 0;
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed
    }
}
