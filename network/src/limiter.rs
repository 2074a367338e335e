//! Outbound bandwidth limiting with per-traffic-type token buckets.

use std::sync::Mutex;
use std::time::Instant;

use crate::channel::TrafficType;

/// Default generic-lane limit: 10 MiB/s.
pub const DEFAULT_GENERIC_LIMIT: u64 = 10 * 1024 * 1024;
/// Default bootstrap-lane limit: 5 MiB/s.
pub const DEFAULT_BOOTSTRAP_LIMIT: u64 = 5 * 1024 * 1024;
/// Buckets can hold this multiple of the per-second rate for bursts.
pub const DEFAULT_BURST_RATIO: f64 = 3.0;

/// A token bucket. Tokens are bytes; they refill continuously at
/// `rate_per_sec` up to `rate_per_sec * burst_ratio`.
pub struct TokenBucket {
    rate_per_sec: u64,
    burst_cap: u64,
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: u64, burst_ratio: f64) -> Self {
        let burst_cap = (rate_per_sec as f64 * burst_ratio) as u64;
        Self {
            rate_per_sec,
            burst_cap,
            tokens: burst_cap,
            last_refill: Instant::now(),
        }
    }

    /// Try to consume `bytes`. A rate of 0 means unlimited.
    pub fn try_consume(&mut self, bytes: u64) -> bool {
        if self.rate_per_sec == 0 {
            return true;
        }
        self.refill();
        if self.tokens >= bytes {
            self.tokens -= bytes;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_refill).as_millis() as u64;
        let new_tokens = elapsed_ms * self.rate_per_sec / 1000;
        if new_tokens > 0 {
            self.tokens = (self.tokens + new_tokens).min(self.burst_cap);
            self.last_refill = now;
        }
    }

    pub fn available(&self) -> u64 {
        self.tokens
    }
}

/// The node-wide outbound limiter: one bucket per traffic class so
/// bootstrap floods cannot starve live traffic.
pub struct OutboundBandwidthLimiter {
    generic: Mutex<TokenBucket>,
    bootstrap: Mutex<TokenBucket>,
}

impl OutboundBandwidthLimiter {
    pub fn new(generic_limit: u64, bootstrap_limit: u64, burst_ratio: f64) -> Self {
        Self {
            generic: Mutex::new(TokenBucket::new(generic_limit, burst_ratio)),
            bootstrap: Mutex::new(TokenBucket::new(bootstrap_limit, burst_ratio)),
        }
    }

    pub fn should_pass(&self, bytes: usize, traffic: TrafficType) -> bool {
        let bucket = match traffic {
            TrafficType::Generic => &self.generic,
            TrafficType::Bootstrap => &self.bootstrap,
        };
        bucket.lock().unwrap().try_consume(bytes as u64)
    }
}

impl Default for OutboundBandwidthLimiter {
    fn default() -> Self {
        Self::new(
            DEFAULT_GENERIC_LIMIT,
            DEFAULT_BOOTSTRAP_LIMIT,
            DEFAULT_BURST_RATIO,
        )
    }
}
