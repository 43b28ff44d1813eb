// src/pacing.rs
//! Fixed-interval gate used to space out calls to rate-sensitive services.
//!
//! A `Pacer` guarantees a minimum gap between consecutive releases. The gap is
//! either fixed or drawn uniformly from `[min, max]` on every wait. By default
//! the first release is immediate; `leading()` makes it wait too. Time spent
//! between releases counts towards the gap unless `always()` is set, in which
//! case every wait sleeps the full drawn interval.

use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone)]
pub struct Pacer {
    min: Duration,
    max: Duration,
    leading: bool,
    always: bool,
    last: Option<Instant>,
}

impl Pacer {
    pub fn fixed(interval: Duration) -> Self {
        Self::jittered(interval, interval)
    }

    /// `min > max` is treated as a fixed `min` interval.
    pub fn jittered(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            leading: false,
            always: false,
            last: None,
        }
    }

    pub fn disabled() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn leading(mut self) -> Self {
        self.leading = true;
        self
    }

    pub fn always(mut self) -> Self {
        self.always = true;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.max.is_zero()
    }

    /// Draw the next interval from the configured range.
    pub fn next_interval(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    /// Block until the gate opens; returns how long we actually slept.
    pub async fn wait(&mut self) -> Duration {
        let interval = self.next_interval();
        let now = Instant::now();
        let pause = match self.last {
            Some(_) if self.always => interval,
            Some(prev) => interval.saturating_sub(now.saturating_duration_since(prev)),
            None if self.leading => interval,
            None => Duration::ZERO,
        };
        if !pause.is_zero() {
            sleep(pause).await;
        }
        self.last = Some(Instant::now());
        pause
    }

    /// Forget the previous release (the next `wait` behaves like the first).
    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::disabled()
    }
}
