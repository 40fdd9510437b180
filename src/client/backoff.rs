use std::time::Duration;

/// Exponential backoff settings for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_INITIAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(30);
    /// Floor for both bounds so a zero setting never busy-loops the dialer.
    pub const MIN_DELAY: Duration = Duration::from_millis(1);

    /// Fresh state for one reconnect cycle.
    pub fn start(&self) -> Backoff {
        let max = self.max.max(Self::MIN_DELAY);
        Backoff {
            current: self.initial.max(Self::MIN_DELAY).min(max),
            max,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Self::DEFAULT_INITIAL,
            max: Self::DEFAULT_MAX,
        }
    }
}

/// Delay state: doubles after every failed attempt, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}
