//! Frame tick sources for the simulation loop

use shared::timestamp_ms;
use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{interval, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub at: Instant,
    /// Wall clock at the tick, epoch milliseconds.
    pub wall_ms: u64,
}

/// Monotonic now, read from the runtime clock so paused test time is honored.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl Tick {
    pub fn now() -> Self {
        Self {
            at: now(),
            wall_ms: timestamp_ms(),
        }
    }
}

pub trait TickSource {
    fn next_tick(&mut self) -> impl Future<Output = Tick>;
}

/// Fixed-rate ticker; late ticks are skipped rather than bunched.
pub struct FrameTicker {
    interval: Interval,
}

impl FrameTicker {
    pub fn new(rate_hz: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64);
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

impl TickSource for FrameTicker {
    async fn next_tick(&mut self) -> Tick {
        let at = self.interval.tick().await;
        Tick {
            at: at.into_std(),
            wall_ms: timestamp_ms(),
        }
    }
}

/// Replays a fixed list of ticks, then never ticks again.
#[derive(Debug, Default)]
pub struct ScriptedTicks {
    ticks: VecDeque<Tick>,
}

impl ScriptedTicks {
    pub fn new(ticks: impl IntoIterator<Item = Tick>) -> Self {
        Self {
            ticks: ticks.into_iter().collect(),
        }
    }

    /// `count` ticks spaced `spacing` apart starting at `start`.
    pub fn evenly(start: Tick, spacing: Duration, count: usize) -> Self {
        Self::new((0..count).map(|i| Tick {
            at: start.at + spacing * i as u32,
            wall_ms: start.wall_ms + (spacing * i as u32).as_millis() as u64,
        }))
    }

    pub fn push(&mut self, tick: Tick) {
        self.ticks.push_back(tick);
    }

    pub fn remaining(&self) -> usize {
        self.ticks.len()
    }
}

impl TickSource for ScriptedTicks {
    async fn next_tick(&mut self) -> Tick {
        match self.ticks.pop_front() {
            Some(tick) => tick,
            None => std::future::pending().await,
        }
    }
}
