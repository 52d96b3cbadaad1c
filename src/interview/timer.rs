use std::time::{Duration, Instant};

use log::info;
use serde::{Deserialize, Serialize};

/// Snapshot of the session clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockState {
    pub elapsed_seconds: u64,
    pub paused_seconds: u64,
    pub is_running: bool,
}

/// Pause-aware elapsed-time tracking for one interview session.
///
/// Paused spans are excluded from the elapsed total, so a candidate who
/// steps away is not penalized on session duration.
#[derive(Debug)]
pub struct SessionClock {
    started_at: Instant,
    paused_total: Duration,
    paused_since: Option<Instant>,
    running: bool,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            paused_total: Duration::ZERO,
            paused_since: None,
            running: false,
        }
    }

    pub fn start(&mut self) {
        if !self.running {
            self.started_at = Instant::now();
            self.paused_total = Duration::ZERO;
            self.paused_since = None;
            self.running = true;
            info!("⏱️ session clock started");
        }
    }

    pub fn pause(&mut self) {
        if self.running && self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
    }

    pub fn stop(&mut self) -> ClockState {
        self.resume(); // close an open pause span first
        let state = self.state();
        self.running = false;
        info!("⏹️ session clock stopped at {}s", state.elapsed_seconds);
        state
    }

    /// Running time excluding paused spans.
    pub fn elapsed(&self) -> Duration {
        if !self.running {
            return Duration::ZERO;
        }
        let mut paused = self.paused_total;
        if let Some(since) = self.paused_since {
            paused += since.elapsed();
        }
        self.started_at.elapsed().saturating_sub(paused)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since.is_some()
    }

    pub fn state(&self) -> ClockState {
        let mut paused = self.paused_total;
        if let Some(since) = self.paused_since {
            paused += since.elapsed();
        }
        ClockState {
            elapsed_seconds: self.elapsed().as_secs(),
            paused_seconds: paused.as_secs(),
            is_running: self.running && self.paused_since.is_none(),
        }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_zero_before_start() {
        let clock = SessionClock::new();
        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert!(!clock.state().is_running);
    }

    #[test]
    fn pause_excludes_time_from_elapsed() {
        let mut clock = SessionClock::new();
        clock.start();
        clock.pause();
        assert!(clock.is_paused());
        std::thread::sleep(Duration::from_millis(30));
        clock.resume();
        // Everything slept above happened inside the pause span.
        assert!(clock.elapsed() < Duration::from_millis(25));
    }

    #[test]
    fn stop_closes_open_pause_span() {
        let mut clock = SessionClock::new();
        clock.start();
        clock.pause();
        let state = clock.stop();
        assert!(!state.is_running);
        assert!(!clock.is_paused());
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn double_pause_and_resume_are_idempotent() {
        let mut clock = SessionClock::new();
        clock.start();
        clock.pause();
        clock.pause();
        clock.resume();
        clock.resume();
        assert!(!clock.is_paused());
    }
}
