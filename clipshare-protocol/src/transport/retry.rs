//! Fixed retry schedule for pairing calls
//!
//! Pairing happens right after discovery, while the peer's server may
//! still be starting, so a failed attempt is retried after a short pause
//! before the call is reported as failed.

use std::time::Duration;

/// Delays before each attempt: immediately, then 500 ms, then 1000 ms
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_millis(500),
    Duration::from_millis(1000),
];

/// Iterator over the waits that precede each attempt
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
    attempt: usize,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAYS.to_vec())
    }
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays, attempt: 0 }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }

    /// Wait before the next attempt, or `None` when exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.delays.get(self.attempt).copied()?;
        self.attempt += 1;
        Some(delay)
    }

    pub fn status(&self) -> String {
        format!("Attempt {}/{}", self.attempt, self.delays.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut schedule = RetrySchedule::default();
        assert_eq!(schedule.max_attempts(), 3);

        assert_eq!(schedule.next_delay(), Some(Duration::ZERO));
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.status(), "Attempt 3/3");
    }

    #[test]
    fn test_custom_schedule() {
        let mut schedule = RetrySchedule::new(vec![Duration::ZERO]);
        assert_eq!(schedule.status(), "Attempt 0/1");
        assert_eq!(schedule.next_delay(), Some(Duration::ZERO));
        assert_eq!(schedule.status(), "Attempt 1/1");
        assert_eq!(schedule.next_delay(), None);
    }
}
