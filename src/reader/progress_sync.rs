use log::{debug, info, warn};
use std::time::{Duration, Instant};

use super::context::BookContext;
use super::debounce::Debouncer;
use crate::backend::api::{ProgressPayload, ReadingProgress};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Persisted progress not yet applied; nothing is written to the server.
    InitialLoad,
    /// Every change is shown immediately and written after the debounce window.
    Ready,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub page_number: Option<u32>,
    pub cfi: Option<String>,
}

impl ProgressUpdate {
    pub fn page(page_number: u32, progress: f64) -> Self {
        Self {
            progress,
            page_number: Some(page_number),
            cfi: None,
        }
    }
}

impl From<&ReadingProgress> for ProgressUpdate {
    fn from(record: &ReadingProgress) -> Self {
        Self {
            progress: record.progress,
            page_number: record.page_number,
            cfi: record.cfi.clone(),
        }
    }
}

/// A debounced write ready to be sent, tagged with the book it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressWrite {
    pub context: BookContext,
    pub update: ProgressUpdate,
}

impl ProgressWrite {
    pub fn payload(&self) -> ProgressPayload {
        ProgressPayload {
            book_id: self.context.book_id,
            format: self.context.format.clone(),
            progress: self.update.progress,
            page_number: self.update.page_number,
            cfi: self.update.cfi.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncTimings {
    pub debounce: Duration,
    pub settle_delay: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

#[derive(Debug)]
enum Persisted {
    Pending,
    Resolved,
}

/// Reconciles the server's stored position with local navigation and throttles writes.
#[derive(Debug)]
pub struct ProgressSync {
    context: BookContext,
    phase: SyncPhase,
    persisted: Persisted,
    content_ready_at: Option<Instant>,
    settle_delay: Duration,
    local: Option<ProgressUpdate>,
    debouncer: Debouncer<ProgressUpdate>,
    last_error: Option<String>,
}

impl ProgressSync {
    pub fn new(context: BookContext, timings: SyncTimings) -> Self {
        Self {
            context,
            phase: SyncPhase::InitialLoad,
            persisted: Persisted::Pending,
            content_ready_at: None,
            settle_delay: timings.settle_delay,
            local: None,
            debouncer: Debouncer::new(timings.debounce),
            last_error: None,
        }
    }

    pub fn context(&self) -> &BookContext {
        &self.context
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Progress shown to the user, whether or not it has been written yet.
    pub fn local(&self) -> Option<&ProgressUpdate> {
        self.local.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn has_pending_write(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Switches to another book. Returns the previous book's pending write, if any, so
    /// the caller can still send it. The same identity keeps the current state.
    pub fn reset(&mut self, context: &BookContext) -> Option<ProgressWrite> {
        if &self.context == context {
            return None;
        }
        let flushed = self.flush();
        debug!("progress: reset {} -> {}", self.context, context);
        let timings = SyncTimings {
            debounce: self.debouncer.delay(),
            settle_delay: self.settle_delay,
        };
        *self = Self::new(context.clone(), timings);
        flushed
    }

    /// Applies the result of the initial progress fetch. Results for another book are
    /// dropped. Returns the record the reader should snap to.
    pub fn on_persisted(
        &mut self,
        context: &BookContext,
        record: Option<ReadingProgress>,
    ) -> Option<ReadingProgress> {
        if &self.context != context {
            debug!(
                "progress: dropping stale persisted progress for {} (now {})",
                context, self.context
            );
            return None;
        }
        if !matches!(self.persisted, Persisted::Pending) {
            return None;
        }
        self.persisted = Persisted::Resolved;

        match &record {
            Some(record) => {
                debug!(
                    "progress: persisted {:.3} page {:?} for {}",
                    record.progress, record.page_number, self.context
                );
                if self.local.is_none() {
                    self.local = Some(ProgressUpdate::from(record));
                }
            }
            None => {
                // Nothing to restore, so there is nothing to wait for either.
                self.enter_ready();
            }
        }
        record
    }

    /// Marks the first successful content layout, starting the settle timer.
    pub fn on_content_ready(&mut self, now: Instant) {
        if self.content_ready_at.is_none() {
            self.content_ready_at = Some(now);
        }
    }

    /// Records a local progress value.
    pub fn record(&mut self, update: ProgressUpdate, now: Instant) {
        match self.phase {
            SyncPhase::InitialLoad => {
                if update.progress <= 0.0 {
                    debug!("progress: discarding zero progress during initial load");
                    return;
                }
                self.local = Some(update);
            }
            SyncPhase::Ready => {
                self.local = Some(update.clone());
                self.debouncer.schedule(update, now);
            }
        }
    }

    /// Advances timers. Returns a write once the debounce window has passed.
    pub fn poll(&mut self, now: Instant) -> Option<ProgressWrite> {
        if self.phase == SyncPhase::InitialLoad {
            let settled = matches!(self.persisted, Persisted::Resolved)
                && self
                    .content_ready_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= self.settle_delay);
            if settled {
                self.enter_ready();
            }
            return None;
        }
        let update = self.debouncer.take_ready(now)?;
        Some(self.write(update))
    }

    /// Sends whatever is pending right away, e.g. when the reader closes.
    pub fn flush(&mut self) -> Option<ProgressWrite> {
        let update = self.debouncer.flush()?;
        Some(self.write(update))
    }

    /// Outcome of a write. Failures are kept for display; local state is not rolled back.
    pub fn on_write_result(&mut self, context: &BookContext, result: Result<(), String>) {
        if &self.context != context {
            return;
        }
        match result {
            Ok(()) => self.last_error = None,
            Err(message) => {
                warn!("progress: write for {} failed: {}", self.context, message);
                self.last_error = Some(message);
            }
        }
    }

    fn enter_ready(&mut self) {
        if self.phase == SyncPhase::Ready {
            return;
        }
        info!("progress: {} ready for sync", self.context);
        self.phase = SyncPhase::Ready;
    }

    fn write(&self, update: ProgressUpdate) -> ProgressWrite {
        ProgressWrite {
            context: self.context.clone(),
            update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn book() -> BookContext {
        BookContext::new(1, "cbz")
    }

    fn record(progress: f64, page: u32) -> ReadingProgress {
        ReadingProgress {
            progress,
            page_number: Some(page),
            cfi: None,
        }
    }

    #[test]
    fn no_writes_during_initial_load() {
        let start = Instant::now();
        let mut sync = ProgressSync::new(book(), SyncTimings::default());

        sync.record(ProgressUpdate::page(3, 0.3), start);
        sync.record(ProgressUpdate::page(4, 0.4), start + ms(100));
        sync.on_content_ready(start + ms(150));

        for offset in [200, 1_500, 5_000, 60_000] {
            assert!(sync.poll(start + ms(offset)).is_none());
        }
        assert_eq!(sync.phase(), SyncPhase::InitialLoad);
        assert_eq!(sync.local().map(|u| u.page_number), Some(Some(4)));
    }

    #[test]
    fn zero_progress_is_discarded_during_initial_load() {
        let start = Instant::now();
        let mut sync = ProgressSync::new(book(), SyncTimings::default());
        sync.on_persisted(&book(), Some(record(0.5, 10)));
        sync.record(ProgressUpdate::page(1, 0.0), start);
        assert_eq!(sync.local().map(|u| u.progress), Some(0.5));
    }

    #[test]
    fn settles_after_delay_following_layout() {
        let start = Instant::now();
        let mut sync = ProgressSync::new(book(), SyncTimings::default());
        let snap = sync.on_persisted(&book(), Some(record(0.5, 10)));
        assert_eq!(snap.and_then(|r| r.page_number), Some(10));
        assert_eq!(sync.phase(), SyncPhase::InitialLoad);

        sync.on_content_ready(start);
        assert!(sync.poll(start + ms(100)).is_none());
        assert_eq!(sync.phase(), SyncPhase::InitialLoad);
        sync.poll(start + DEFAULT_SETTLE_DELAY);
        assert_eq!(sync.phase(), SyncPhase::Ready);
    }

    #[test]
    fn absent_progress_is_ready_immediately() {
        let mut sync = ProgressSync::new(book(), SyncTimings::default());
        assert!(sync.on_persisted(&book(), None).is_none());
        assert_eq!(sync.phase(), SyncPhase::Ready);
    }

    #[test]
    fn debounce_coalesces_rapid_changes() {
        let start = Instant::now();
        let mut sync = ProgressSync::new(book(), SyncTimings::default());
        sync.on_persisted(&book(), None);

        for page in 2..=6_u32 {
            let at = start + ms(page as u64 * 50);
            sync.record(ProgressUpdate::page(page, page as f64 / 10.0), at);
            assert!(sync.poll(at).is_none());
        }

        assert!(sync.poll(start + ms(900)).is_none());
        let write = sync.poll(start + ms(300) + DEFAULT_DEBOUNCE).unwrap();
        assert_eq!(write.update.page_number, Some(6));
        assert!((write.update.progress - 0.6).abs() < 1e-9);
        assert!(sync.poll(start + ms(10_000)).is_none());
    }

    #[test]
    fn stale_persisted_result_is_dropped() {
        let mut sync = ProgressSync::new(book(), SyncTimings::default());
        sync.reset(&BookContext::new(2, "cbz"));

        assert!(sync.on_persisted(&book(), Some(record(0.9, 9))).is_none());
        assert!(sync.local().is_none());
        assert_eq!(sync.phase(), SyncPhase::InitialLoad);
    }

    #[test]
    fn reset_flushes_previous_book() {
        let start = Instant::now();
        let mut sync = ProgressSync::new(book(), SyncTimings::default());
        sync.on_persisted(&book(), None);
        sync.record(ProgressUpdate::page(2, 0.2), start);

        let flushed = sync.reset(&BookContext::new(2, "cbr")).unwrap();
        assert_eq!(flushed.context, book());
        assert_eq!(flushed.payload().page_number, Some(2));
        assert_eq!(sync.phase(), SyncPhase::InitialLoad);
        assert!(!sync.has_pending_write());
    }

    #[test]
    fn same_identity_reset_keeps_ready_state() {
        let mut sync = ProgressSync::new(book(), SyncTimings::default());
        sync.on_persisted(&book(), None);
        assert!(sync.reset(&BookContext::new(1, "CBZ")).is_none());
        assert_eq!(sync.phase(), SyncPhase::Ready);
    }

    #[test]
    fn write_failure_is_reported_without_rollback() {
        let start = Instant::now();
        let mut sync = ProgressSync::new(book(), SyncTimings::default());
        sync.on_persisted(&book(), None);
        sync.record(ProgressUpdate::page(7, 0.7), start);
        sync.poll(start + DEFAULT_DEBOUNCE);

        sync.on_write_result(&book(), Err("server unavailable".into()));
        assert_eq!(sync.last_error(), Some("server unavailable"));
        assert_eq!(sync.local().and_then(|u| u.page_number), Some(7));

        sync.on_write_result(&book(), Ok(()));
        assert!(sync.last_error().is_none());
    }
}
