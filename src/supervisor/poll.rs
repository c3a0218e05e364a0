//! Poll cadence and liveness bookkeeping for a supervised process.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::SupervisorConfig;

const SHRINK: f64 = 0.9;
const GROW: f64 = 1.1;

/// Poll interval that tightens while output flows and relaxes during
/// silence.
#[derive(Debug, Clone)]
pub struct AdaptivePoll {
    interval: Duration,
    min: Duration,
    max: Duration,
    idle_polls: u32,
    idle_threshold: u32,
}

impl AdaptivePoll {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            interval: config.initial_poll,
            min: config.min_poll,
            max: config.max_poll,
            idle_polls: 0,
            idle_threshold: config.idle_polls_before_backoff,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record the result of one poll.
    pub fn observe(&mut self, new_output: bool) {
        if new_output {
            self.idle_polls = 0;
            self.interval = self.interval.mul_f64(SHRINK).max(self.min);
        } else {
            self.idle_polls = self.idle_polls.saturating_add(1);
            if self.idle_polls > self.idle_threshold {
                self.interval = self.interval.mul_f64(GROW).min(self.max);
            }
        }
    }
}

/// Tracks when the process last produced output and when status was last
/// reported.
#[derive(Debug, Clone)]
pub struct Liveness {
    started: Instant,
    last_output: Instant,
    last_status: Instant,
    line_count: usize,
    status_interval: Duration,
    stall_timeout: Duration,
}

impl Liveness {
    pub fn new(started: Instant, config: &SupervisorConfig) -> Self {
        Self {
            started,
            last_output: started,
            last_status: started,
            line_count: 0,
            status_interval: config.status_interval,
            stall_timeout: config.stall_timeout,
        }
    }

    /// Record the current captured line count. True if it grew.
    pub fn observe(&mut self, now: Instant, line_count: usize) -> bool {
        if line_count > self.line_count {
            self.line_count = line_count;
            self.last_output = now;
            return true;
        }
        false
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// True once per status interval.
    pub fn status_due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_status) >= self.status_interval {
            self.last_status = now;
            return true;
        }
        false
    }

    /// True when the process has been silent longer than the stall
    /// timeout. Restarts the silence window so the report is not repeated
    /// on every poll.
    pub fn stall_due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_output) > self.stall_timeout {
            self.last_output = now;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_floor_and_ceiling() {
        let config = SupervisorConfig::default();
        let mut poll = AdaptivePoll::new(&config);

        poll.observe(true);
        assert_eq!(poll.interval(), Duration::from_millis(100));

        for _ in 0..200 {
            poll.observe(false);
        }
        assert_eq!(poll.interval(), Duration::from_secs(1));

        for _ in 0..200 {
            poll.observe(true);
        }
        assert_eq!(poll.interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_starts_after_idle_threshold() {
        let mut poll = AdaptivePoll::new(&SupervisorConfig::default());

        for _ in 0..10 {
            poll.observe(false);
        }
        assert_eq!(poll.interval(), Duration::from_millis(100));

        poll.observe(false);
        let grown = poll.interval();
        assert!(grown > Duration::from_millis(109) && grown < Duration::from_millis(111));
    }

    #[test]
    fn test_output_resets_idle_counter() {
        let mut poll = AdaptivePoll::new(&SupervisorConfig::default());
        for _ in 0..15 {
            poll.observe(false);
        }
        let relaxed = poll.interval();

        poll.observe(true);
        assert!(poll.interval() < relaxed);

        // Ten idle polls after output do not grow the interval again.
        let shrunk = poll.interval();
        for _ in 0..10 {
            poll.observe(false);
        }
        assert_eq!(poll.interval(), shrunk);
    }

    #[test]
    fn test_liveness_status_and_stall() {
        let config = SupervisorConfig::default()
            .status_interval(Duration::from_secs(30))
            .stall_timeout(Duration::from_secs(60));
        let start = Instant::now();
        let mut liveness = Liveness::new(start, &config);

        assert!(!liveness.status_due(start + Duration::from_secs(29)));
        assert!(liveness.status_due(start + Duration::from_secs(30)));
        assert!(!liveness.status_due(start + Duration::from_secs(31)));

        assert!(liveness.observe(start + Duration::from_secs(10), 3));
        assert!(!liveness.observe(start + Duration::from_secs(20), 3));

        assert!(!liveness.stall_due(start + Duration::from_secs(70)));
        assert!(liveness.stall_due(start + Duration::from_secs(71)));
        // Window restarted at 71s.
        assert!(!liveness.stall_due(start + Duration::from_secs(100)));
        assert!(liveness.stall_due(start + Duration::from_secs(132)));

        assert_eq!(
            liveness.elapsed(start + Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }
}
