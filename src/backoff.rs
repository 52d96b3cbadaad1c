use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Exponential backoff schedule for transient transport errors.
///
/// Pure arithmetic: the caller asks for the next delay and sleeps on its own
/// runtime, so the policy stays testable without timers or a speech API.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    attempt: u32,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
            attempt: 0,
        }
    }

    /// The next retry delay, or `None` once the attempt ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = self.multiplier.powi(self.attempt as i32);
        self.attempt += 1;
        Some(self.base_delay.mul_f64(factor))
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Called after a successful pass so the next failure starts over.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Detects recognition restart storms.
///
/// Each recognition `start` is recorded; once `max_restarts` of them land
/// inside the sliding `window` the guard trips, which the engine converts
/// into a terminal error instead of looping forever.
#[derive(Debug)]
pub struct RapidRestartGuard {
    window: Duration,
    max_restarts: u32,
    restarts: VecDeque<Instant>,
}

impl RapidRestartGuard {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            window,
            max_restarts,
            restarts: VecDeque::new(),
        }
    }

    /// Record one restart at `now`; returns `true` when the guard trips.
    pub fn record(&mut self, now: Instant) -> bool {
        self.restarts.push_back(now);
        while let Some(&front) = self.restarts.front() {
            if now.duration_since(front) > self.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        self.restarts.len() as u32 >= self.max_restarts
    }

    pub fn reset(&mut self) {
        self.restarts.clear();
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }
}
