// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry and reconnect delays

use rand::Rng;
use std::time::Duration;

pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Multiplicative jitter, uniformly drawn from `[1 - J, 1 + J]`
pub const RETRY_JITTER: f64 = 0.2;

pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Delay before retrying a record or batch that has failed `retries` times.
///
/// `2^(retries-1)` seconds capped at 30s, with +/-20% jitter. Zero or negative
/// retry counts get the 100ms minimum without jitter.
pub fn retry_delay<R: Rng + ?Sized>(retries: i64, rng: &mut R) -> Duration {
    if retries <= 0 {
        return MIN_RETRY_DELAY;
    }
    // 2^5 already exceeds the cap
    let exponent = u32::try_from(retries - 1).unwrap_or(u32::MAX).min(5);
    let base = Duration::from_secs(1u64 << exponent).min(MAX_RETRY_DELAY);
    let factor = rng.random_range((1.0 - RETRY_JITTER)..=(1.0 + RETRY_JITTER));
    base.mul_f64(factor)
}

/// Doubling delay between connection attempts of a persistent transport,
/// reset once a connection is established.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(RECONNECT_BASE_DELAY, RECONNECT_MAX_DELAY)
    }
}

impl ReconnectBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// The delay to wait now; the following call returns twice as much, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }
}
