//! Inbound message throttling for WebSocket connections

use std::num::NonZeroU32;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

/// Default inbound messages per second per connection.
/// Clients send on key change, so bursts stay well under this.
pub const INPUT_RATE_LIMIT: u32 = 60;

/// Throttle for one connection's inbound frames. Owned by the reader task.
pub struct ConnectionRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    dropped: u64,
}

impl ConnectionRateLimiter {
    /// Allow `per_second` messages, bursting up to the same amount
    pub fn new(per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::direct(quota),
            dropped: 0,
        }
    }

    /// True if the next inbound message may be processed
    pub fn check_input(&mut self) -> bool {
        if self.limiter.check().is_ok() {
            return true;
        }
        self.dropped += 1;
        false
    }

    /// Messages rejected so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new(INPUT_RATE_LIMIT)
    }
}
