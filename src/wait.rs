use std::time::Duration;

/// `attempts` samples spaced `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// A policy that never samples.
    pub const fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn is_disabled(&self) -> bool {
        self.attempts == 0
    }
}

/// Sample `probe` until it yields a value or the policy runs out.
///
/// The first sample is taken immediately; the interval separates later ones.
/// Blocking by design: callers already sit on the blocking pool.
pub fn poll_until<T>(policy: RetryPolicy, mut probe: impl FnMut(u32) -> Option<T>) -> Option<T> {
    for attempt in 0..policy.attempts {
        if attempt > 0 && !policy.interval.is_zero() {
            std::thread::sleep(policy.interval);
        }
        if let Some(found) = probe(attempt) {
            return Some(found);
        }
    }
    None
}
