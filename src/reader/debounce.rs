use std::time::{Duration, Instant};

/// Single-slot debouncer: scheduling a value replaces any pending one and restarts
/// the quiet period, so only the last value after a pause is released.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    /// Releases the pending value once `delay` has elapsed since it was scheduled.
    pub fn take_ready(&mut self, now: Instant) -> Option<T> {
        let (_, queued_at) = self.pending.as_ref()?;
        if now.saturating_duration_since(*queued_at) >= self.delay {
            self.pending.take().map(|(value, _)| value)
        } else {
            None
        }
    }

    /// Releases the pending value immediately, regardless of the timer.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending
            .as_ref()
            .map(|(_, queued_at)| *queued_at + self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.schedule(1, start);

        assert!(debouncer.take_ready(start + Duration::from_millis(50)).is_none());
        assert_eq!(debouncer.take_ready(start + Duration::from_millis(100)), Some(1));
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn reschedule_keeps_latest_value_and_restarts_timer() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.schedule("a", start);
        debouncer.schedule("b", start + Duration::from_millis(80));

        assert!(debouncer.take_ready(start + Duration::from_millis(120)).is_none());
        assert_eq!(
            debouncer.deadline(),
            Some(start + Duration::from_millis(180))
        );
        assert_eq!(
            debouncer.take_ready(start + Duration::from_millis(180)),
            Some("b")
        );
    }

    #[test]
    fn flush_and_cancel() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_secs(1));
        debouncer.schedule(5, start);
        assert_eq!(debouncer.flush(), Some(5));

        debouncer.schedule(6, start);
        debouncer.cancel();
        assert!(debouncer.take_ready(start + Duration::from_secs(2)).is_none());
    }
}
