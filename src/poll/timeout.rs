use std::time::{Duration, Instant};

/// Bounds the reactor's next poll wait. `None` means block indefinitely;
/// `Some(d)` means wake up after `d` even if nothing else happens, so a
/// request timeout or timer deadline is never missed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollTimeout(Option<Duration>);

impl PollTimeout {
    pub fn indefinite() -> PollTimeout {
        PollTimeout(None)
    }

    /// Computes the wait duration between `now` and an absolute `deadline`.
    /// A deadline already in the past collapses to a zero wait so the
    /// caller polls once more instead of blocking.
    pub fn until(now: Instant, deadline: Instant) -> PollTimeout {
        PollTimeout(Some(deadline.saturating_duration_since(now)))
    }

    /// Folds in another candidate deadline, keeping the smaller wait.
    pub fn tighten(&mut self, other: PollTimeout) {
        self.0 = match (self.0, other.0) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => Some(a.min(b)),
        };
    }

    pub fn as_duration(&self) -> Option<Duration> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tighten_keeps_smaller() {
        let mut t = PollTimeout::indefinite();
        t.tighten(PollTimeout(Some(Duration::from_secs(5))));
        t.tighten(PollTimeout(Some(Duration::from_secs(2))));
        assert_eq!(t.as_duration(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn past_deadline_is_zero_wait() {
        let now = Instant::now();
        let past = now - Duration::from_secs(1);
        let t = PollTimeout::until(now, past);
        assert_eq!(t.as_duration(), Some(Duration::from_secs(0)));
    }
}
