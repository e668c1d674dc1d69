//! Wall clock timer.
use std::time::Instant;

/// Measures seconds since it was started or last restarted.
#[derive(Debug, Copy, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Starts a new timer.
    #[inline]
    pub fn new() -> Self {
        Timer {
            start: Instant::now(),
        }
    }

    /// Seconds since the last restart.
    #[inline]
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Returns the elapsed seconds and restarts the timer.
    #[inline]
    pub fn restart(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.start).as_secs_f64();
        self.start = now;
        elapsed
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn elapsed_grows() {
        let timer = Timer::new();
        thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= 0.01);
    }

    #[test]
    fn restart_resets() {
        let mut timer = Timer::new();
        thread::sleep(Duration::from_millis(10));
        let first = timer.restart();
        assert!(first >= 0.01);
        assert!(timer.elapsed() < first);
    }
}
