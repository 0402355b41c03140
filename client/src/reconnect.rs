//! Reconnection backoff and heartbeat bookkeeping
//!
//! Both are plain state machines driven by explicit `Instant`s so the
//! connection manager can schedule them on its own timer and tests can step
//! them without sleeping.

use std::time::{Duration, Instant};

/// Exponential backoff: attempt `n` waits `base * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before the given attempt (1-based), or `None` once attempts are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Longest delay this policy will ever produce.
    pub fn max_delay(&self) -> Duration {
        self.delay(self.max_attempts).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Idle,
    SendPing,
    /// Nothing heard from the server for too long; the link should be dropped.
    Expired,
}

/// Tracks ping cadence and the last acknowledged pong for one live link.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    last_pong: Instant,
    next_check: Instant,
}

impl Heartbeat {
    /// Starts a heartbeat for a link that opened at `now`.
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_pong: now,
            next_check: now + interval,
        }
    }

    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong = now;
    }

    pub fn next_check(&self) -> Instant {
        self.next_check
    }

    pub fn since_last_pong(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_pong)
    }

    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if now < self.next_check {
            return HeartbeatAction::Idle;
        }
        self.next_check = now + self.interval;

        if self.since_last_pong(now) >= self.timeout {
            HeartbeatAction::Expired
        } else {
            HeartbeatAction::SendPing
        }
    }
}
