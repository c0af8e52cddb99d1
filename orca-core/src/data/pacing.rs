//! Fixed delay between consecutive exchange calls.

use std::time::Duration;

/// Cooperative pacing: sleeps a fixed delay, never adapts to server feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
    delay: Duration,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// No delay. Used by tests and dry runs.
    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn pause(&self) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::from_millis(100)
    }
}
