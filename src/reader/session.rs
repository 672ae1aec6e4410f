use log::{debug, info, warn};
use std::time::Instant;

use super::context::{BookContext, ReadingMode};
use super::navigator::{
    JumpOutcome, NavigationState, PageChange, PageNavigator, page_for_progress,
};
use super::preload::{DEFAULT_OVERSCAN, PreloadPlanner, WindowPreload};
use super::progress_sync::{ProgressSync, ProgressUpdate, ProgressWrite, SyncPhase, SyncTimings};
use super::spread::{LandscapePairHeuristic, PageDimensions, SpreadDetector};
use super::virtual_list::VirtualItem;
use super::visible::VisiblePageTracker;
use crate::backend::api::{PageList, ReadingProgress};

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub mode: ReadingMode,
    pub spread_enabled: bool,
    pub overscan: u32,
    pub spread_width_tolerance: f64,
    pub timings: SyncTimings,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mode: ReadingMode::Paged,
            spread_enabled: false,
            overscan: DEFAULT_OVERSCAN,
            spread_width_tolerance: LandscapePairHeuristic::default().width_tolerance,
            timings: SyncTimings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Loaded,
    Failed(String),
}

/// One open comic: owns the navigator and every per-book component around it.
///
/// Async results are handed in together with the [`BookContext`] they were requested
/// for and are ignored when that is no longer the open book.
pub struct ReaderSession {
    context: BookContext,
    options: SessionOptions,
    navigator: PageNavigator,
    spread: SpreadDetector,
    preload: PreloadPlanner,
    tracker: VisiblePageTracker,
    sync: ProgressSync,
    pages: LoadState,
    pending_initial: Option<ReadingProgress>,
    scroll_request: Option<usize>,
}

impl ReaderSession {
    pub fn new(context: BookContext, options: SessionOptions) -> Self {
        let mut spread = SpreadDetector::new(LandscapePairHeuristic {
            width_tolerance: options.spread_width_tolerance,
        });
        spread.reset(&context);
        spread.set_enabled(options.spread_enabled);

        let mut navigator = PageNavigator::new(0);
        navigator.set_mode(options.mode);

        info!("reader: opening {} in {} mode", context, options.mode.label());
        Self {
            sync: ProgressSync::new(context.clone(), options.timings),
            context,
            options,
            navigator,
            spread,
            preload: PreloadPlanner::new(WindowPreload, options.overscan),
            tracker: VisiblePageTracker::new(),
            pages: LoadState::Loading,
            pending_initial: None,
            scroll_request: None,
        }
    }

    /// Switches to another book, resetting every per-book component. Returns the old
    /// book's pending progress write so it is not lost.
    pub fn open(&mut self, context: BookContext) -> Option<ProgressWrite> {
        if context == self.context {
            return None;
        }
        let flushed = self.sync.reset(&context);
        self.spread.reset(&context);
        self.preload.reset();
        self.tracker.reset();
        self.navigator = PageNavigator::new(0);
        self.navigator.set_mode(self.options.mode);
        self.pages = LoadState::Loading;
        self.pending_initial = None;
        self.scroll_request = None;
        info!("reader: switched to {}", context);
        self.context = context;
        flushed
    }

    pub fn context(&self) -> &BookContext {
        &self.context
    }

    pub fn mode(&self) -> ReadingMode {
        self.navigator.mode()
    }

    pub fn load_state(&self) -> &LoadState {
        &self.pages
    }

    pub fn sync_phase(&self) -> SyncPhase {
        self.sync.phase()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.sync.last_error()
    }

    pub fn on_pages_loaded(&mut self, context: &BookContext, list: PageList, now: Instant) {
        if context != &self.context {
            debug!("reader: dropping stale page list for {}", context);
            return;
        }
        self.pages = LoadState::Loaded;
        for info in &list.pages {
            if let Some(dims) = info.dimensions() {
                self.spread.on_page_dimensions(info.page_number, dims);
            }
        }
        // Only a deferred initial page produces a change here.
        let change = self.navigator.set_total_pages(list.total_pages);
        if change.is_some() {
            self.scroll_to_current();
        }
        self.after_navigation(change, now);
        if let Some(record) = self.pending_initial.take() {
            self.apply_initial(record, now);
        }
    }

    pub fn on_pages_failed(&mut self, context: &BookContext, message: String) {
        if context != &self.context {
            return;
        }
        warn!("reader: page list for {} failed: {}", context, message);
        self.pages = LoadState::Failed(message);
    }

    /// Result of the persisted-progress fetch. A failed fetch should be passed as `None`.
    pub fn on_progress_loaded(
        &mut self,
        context: &BookContext,
        record: Option<ReadingProgress>,
        now: Instant,
    ) {
        if context != &self.context {
            debug!("reader: dropping stale progress for {}", context);
            return;
        }
        if let Some(record) = self.sync.on_persisted(context, record) {
            if record.page_number.is_some() || self.navigator.total_pages() > 0 {
                self.apply_initial(record, now);
            } else {
                self.pending_initial = Some(record);
            }
        }
        self.sync_grace_period();
    }

    fn apply_initial(&mut self, record: ReadingProgress, now: Instant) {
        let page = match record.page_number {
            Some(page) => page,
            None => page_for_progress(record.progress, self.navigator.total_pages()),
        };
        let change = self.navigator.set_initial_page(page);
        if change.is_some() {
            self.scroll_to_current();
        }
        self.after_navigation(change, now);
    }

    /// Brings a scrolling view to the current page and seeds the tracker with it.
    fn scroll_to_current(&mut self) {
        if !self.navigator.mode().is_scrolling() {
            return;
        }
        let page = self.navigator.current_page();
        self.tracker.set_last_page(page);
        self.scroll_request = Some(page.saturating_sub(1) as usize);
    }

    /// First successful layout of page content; starts the settle delay.
    pub fn on_content_ready(&mut self, now: Instant) {
        self.sync.on_content_ready(now);
    }

    pub fn on_page_dimensions(&mut self, context: &BookContext, page: u32, dims: PageDimensions) {
        if context != &self.context {
            return;
        }
        self.spread.on_page_dimensions(page, dims);
    }

    pub fn page_dimensions(&self, page: u32) -> Option<PageDimensions> {
        self.spread.dimensions(page)
    }

    fn page_step(&self) -> i64 {
        if self.effective_spread() { 2 } else { 1 }
    }

    /// Steps back over the previous pair only when that pair is a spread itself.
    fn previous_step(&self) -> i64 {
        let current = self.navigator.current_page();
        let paged = self.navigator.mode() == ReadingMode::Paged;
        if paged && current > 2 && self.spread.pair_is_spread(current - 2) {
            2
        } else {
            1
        }
    }

    pub fn next(&mut self, now: Instant) {
        let change = self.navigator.step(self.page_step());
        self.after_navigation(change, now);
    }

    pub fn previous(&mut self, now: Instant) {
        let change = self.navigator.step(-self.previous_step());
        self.after_navigation(change, now);
    }

    pub fn go_to(&mut self, page: i64, now: Instant) {
        match self.navigator.jump_to_page(page) {
            JumpOutcome::Moved(change) => self.after_navigation(change, now),
            JumpOutcome::ScrollTo(index) => self.scroll_request = Some(index),
        }
    }

    pub fn first(&mut self, now: Instant) {
        self.go_to(1, now);
    }

    pub fn last(&mut self, now: Instant) {
        self.go_to(self.navigator.total_pages() as i64, now);
    }

    pub fn jump_to_progress(&mut self, progress: f64, now: Instant) -> JumpOutcome {
        let outcome = self.navigator.jump_to_progress(progress);
        match outcome {
            JumpOutcome::Moved(change) => self.after_navigation(change, now),
            JumpOutcome::ScrollTo(index) => self.scroll_request = Some(index),
        }
        outcome
    }

    /// Scroll position update from a continuous view; picks the page nearest the center.
    pub fn on_scroll(
        &mut self,
        scroll_top: f64,
        viewport_height: f64,
        items: &[VirtualItem],
        now: Instant,
    ) {
        if !self.navigator.mode().is_scrolling() {
            return;
        }
        // Positions reported before the view has applied a requested jump are stale.
        if self.scroll_request.is_some() {
            return;
        }
        if let Some(page) = self.tracker.update(scroll_top, viewport_height, items) {
            // Until the persisted position has settled, where the view happens to sit
            // is not navigation and must not block the initial snap.
            let change = if self.sync.phase() == SyncPhase::InitialLoad {
                self.navigator.follow_page(page as i64)
            } else {
                self.navigator.go_to_page(page as i64)
            };
            self.after_navigation(change, now);
        }
    }

    /// Zero-based item index the scrolling view should bring into view, if any.
    pub fn take_scroll_request(&mut self) -> Option<usize> {
        self.scroll_request.take()
    }

    pub fn set_mode(&mut self, mode: ReadingMode) {
        if mode == self.navigator.mode() {
            return;
        }
        self.navigator.set_mode(mode);
        self.options.mode = mode;
        self.scroll_to_current();
    }

    pub fn set_spread_enabled(&mut self, enabled: bool) {
        self.options.spread_enabled = enabled;
        self.spread.set_enabled(enabled);
    }

    pub fn spread_enabled(&self) -> bool {
        self.options.spread_enabled
    }

    /// Advances the sync timers. Returns a progress write when one is due.
    pub fn tick(&mut self, now: Instant) -> Option<ProgressWrite> {
        let write = self.sync.poll(now);
        self.sync_grace_period();
        write
    }

    /// Leaving the reader: hands back anything still waiting in the debounce window.
    pub fn close(&mut self) -> Option<ProgressWrite> {
        self.sync.flush()
    }

    pub fn on_write_result(&mut self, context: &BookContext, result: Result<(), String>) {
        self.sync.on_write_result(context, result);
    }

    pub fn navigation_state(&self) -> NavigationState {
        self.navigator.state()
    }

    pub fn current_page(&self) -> u32 {
        self.navigator.current_page()
    }

    pub fn total_pages(&self) -> u32 {
        self.navigator.total_pages()
    }

    pub fn effective_spread(&self) -> bool {
        self.navigator.mode() == ReadingMode::Paged && self.spread.effective_spread_mode()
    }

    pub fn displayed_pages(&self) -> Vec<u32> {
        if self.navigator.total_pages() == 0 {
            return Vec::new();
        }
        let current = self.navigator.current_page();
        if self.effective_spread() {
            vec![current, current + 1]
        } else {
            vec![current]
        }
    }

    /// Pages to warm in the background, excluding the ones on screen.
    pub fn preload_pages(&mut self) -> Vec<u32> {
        let displayed = self.displayed_pages();
        let spread = self.effective_spread();
        self.preload
            .update(
                self.navigator.current_page(),
                self.navigator.total_pages(),
                spread,
            )
            .iter()
            .copied()
            .filter(|page| !displayed.contains(page))
            .collect()
    }

    /// Progress to show in the UI, before or after it has been persisted.
    pub fn display_progress(&self) -> f64 {
        if self.navigator.total_pages() > 0 && !self.navigator.in_grace_period() {
            return self.navigator.progress();
        }
        self.sync.local().map(|u| u.progress).unwrap_or(0.0)
    }

    fn after_navigation(&mut self, change: Option<PageChange>, now: Instant) {
        self.spread
            .set_position(self.navigator.current_page(), self.navigator.total_pages());
        match change {
            Some(change) => {
                debug!(
                    "reader: page {}/{} ({:.3})",
                    change.page, change.total_pages, change.progress
                );
                self.sync
                    .record(ProgressUpdate::page(change.page, change.progress), now);
            }
            None if self.navigator.in_grace_period() && self.navigator.total_pages() > 0 => {
                self.sync.record(
                    ProgressUpdate::page(self.navigator.current_page(), self.navigator.progress()),
                    now,
                );
            }
            None => {}
        }
    }

    fn sync_grace_period(&mut self) {
        if self.sync.phase() == SyncPhase::Ready && self.navigator.in_grace_period() {
            self.navigator.end_grace_period();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::api::PageInfo;
    use crate::reader::progress_sync::DEFAULT_DEBOUNCE;
    use crate::reader::virtual_list::VirtualList;
    use std::time::Duration;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn book(id: i64) -> BookContext {
        BookContext::new(id, "cbz")
    }

    fn page_list(total_pages: u32) -> PageList {
        PageList {
            total_pages,
            pages: Vec::new(),
        }
    }

    fn page_info(page_number: u32, width: u32, height: u32) -> PageInfo {
        PageInfo {
            page_number,
            width: Some(width),
            height: Some(height),
        }
    }

    fn ready_session(total_pages: u32, options: SessionOptions, now: Instant) -> ReaderSession {
        let mut session = ReaderSession::new(book(1), options);
        session.on_pages_loaded(&book(1), page_list(total_pages), now);
        session.on_progress_loaded(&book(1), None, now);
        session
    }

    #[test]
    fn five_nexts_issue_one_debounced_write() {
        let start = Instant::now();
        let mut session = ready_session(10, SessionOptions::default(), start);
        assert_eq!(session.sync_phase(), SyncPhase::Ready);

        for step in 0..5 {
            let at = start + ms(step * 100);
            session.next(at);
            assert!(session.tick(at).is_none());
        }

        assert_eq!(
            session.navigation_state(),
            NavigationState {
                current_page: 6,
                can_go_next: true,
                can_go_previous: true,
            }
        );

        let mut writes = Vec::new();
        for offset in (500..3_000).step_by(100) {
            writes.extend(session.tick(start + ms(offset)));
        }
        assert_eq!(writes.len(), 1);
        assert!((writes[0].update.progress - 0.6).abs() < 1e-9);
        assert_eq!(writes[0].payload().page_number, Some(6));
    }

    #[test]
    fn no_write_before_persisted_progress_resolves() {
        let start = Instant::now();
        let mut session = ReaderSession::new(book(1), SessionOptions::default());
        session.on_pages_loaded(&book(1), page_list(10), start);
        session.on_content_ready(start);

        session.next(start + ms(10));
        session.next(start + ms(20));
        assert_eq!(session.current_page(), 3);

        for offset in [100, 400, 1_500, 10_000] {
            assert!(session.tick(start + ms(offset)).is_none());
        }
        assert!(session.close().is_none());
        assert_eq!(session.sync_phase(), SyncPhase::InitialLoad);
    }

    #[test]
    fn persisted_progress_snaps_once_then_settles() {
        let start = Instant::now();
        let mut session = ReaderSession::new(book(1), SessionOptions::default());
        session.on_pages_loaded(&book(1), page_list(20), start);

        let record = ReadingProgress {
            progress: 0.4,
            page_number: None,
            cfi: None,
        };
        session.on_progress_loaded(&book(1), Some(record), start + ms(50));
        assert_eq!(session.current_page(), 8);
        assert!((session.display_progress() - 0.4).abs() < 1e-9);

        session.on_content_ready(start + ms(60));
        assert!(session.tick(start + ms(100)).is_none());
        assert_eq!(session.sync_phase(), SyncPhase::InitialLoad);
        assert!(session.tick(start + ms(400)).is_none());
        assert_eq!(session.sync_phase(), SyncPhase::Ready);

        session.next(start + ms(500));
        let write = session.tick(start + ms(500) + DEFAULT_DEBOUNCE).unwrap();
        assert_eq!(write.update.page_number, Some(9));
    }

    #[test]
    fn progress_arriving_before_page_list_is_applied_later() {
        let start = Instant::now();
        let mut session = ReaderSession::new(book(1), SessionOptions::default());
        let record = ReadingProgress {
            progress: 0.5,
            page_number: None,
            cfi: None,
        };
        session.on_progress_loaded(&book(1), Some(record), start);
        assert_eq!(session.current_page(), 1);

        session.on_pages_loaded(&book(1), page_list(10), start);
        assert_eq!(session.current_page(), 5);
    }

    #[test]
    fn stale_results_are_dropped_after_switch() {
        let start = Instant::now();
        let mut session = ready_session(10, SessionOptions::default(), start);
        session.next(start);

        let flushed = session.open(book(2)).unwrap();
        assert_eq!(flushed.context, book(1));

        session.on_pages_loaded(&book(1), page_list(99), start);
        session.on_progress_loaded(
            &book(1),
            Some(ReadingProgress {
                progress: 0.9,
                page_number: Some(90),
                cfi: None,
            }),
            start,
        );
        assert_eq!(session.total_pages(), 0);
        assert_eq!(session.load_state(), &LoadState::Loading);
        assert_eq!(session.sync_phase(), SyncPhase::InitialLoad);
    }

    #[test]
    fn spread_state_does_not_leak_between_books() {
        let start = Instant::now();
        let options = SessionOptions {
            spread_enabled: true,
            ..SessionOptions::default()
        };
        let mut session = ReaderSession::new(book(1), options);
        let list = PageList {
            total_pages: 10,
            pages: vec![
                page_info(1, 1600, 1200),
                page_info(2, 1600, 1200),
                page_info(3, 1600, 1200),
            ],
        };
        session.on_pages_loaded(&book(1), list, start);
        session.on_progress_loaded(&book(1), None, start);
        assert!(session.effective_spread());
        assert_eq!(session.displayed_pages(), vec![1, 2]);

        session.open(book(2));
        session.on_pages_loaded(&book(2), page_list(10), start);
        session.on_progress_loaded(&book(2), None, start);
        session.go_to(2, start);
        assert!(!session.effective_spread());

        session.on_page_dimensions(&book(2), 2, PageDimensions::new(1600, 1200));
        session.on_page_dimensions(&book(2), 3, PageDimensions::new(1600, 1200));
        assert!(session.effective_spread());
    }

    #[test]
    fn spread_advances_two_pages() {
        let start = Instant::now();
        let options = SessionOptions {
            spread_enabled: true,
            ..SessionOptions::default()
        };
        let mut session = ready_session(10, options, start);
        session.on_page_dimensions(&book(1), 1, PageDimensions::new(1600, 1200));
        session.on_page_dimensions(&book(1), 2, PageDimensions::new(1600, 1200));

        session.next(start);
        assert_eq!(session.current_page(), 3);
        session.next(start);
        assert_eq!(session.current_page(), 4);
    }

    #[test]
    fn preload_excludes_displayed_pages() {
        let start = Instant::now();
        let mut session = ready_session(10, SessionOptions::default(), start);
        session.go_to(5, start);
        assert_eq!(session.displayed_pages(), vec![5]);
        assert_eq!(session.preload_pages(), vec![6, 7, 8]);

        session.last(start);
        assert!(session.preload_pages().is_empty());
    }

    #[test]
    fn scrolling_mode_tracks_visible_page() {
        let start = Instant::now();
        let options = SessionOptions {
            mode: ReadingMode::Continuous,
            ..SessionOptions::default()
        };
        let mut session = ready_session(4, options, start);
        let list = VirtualList::new([800.0; 4], 0.0, 1);

        let items = list.visible_items(0.0, 900.0);
        session.on_scroll(0.0, 900.0, &items, start);
        assert_eq!(session.current_page(), 1);

        let items = list.visible_items(1_400.0, 900.0);
        session.on_scroll(1_400.0, 900.0, &items, start);
        assert_eq!(session.current_page(), 3);

        session.on_scroll(1_400.0, 900.0, &[], start);
        assert_eq!(session.current_page(), 3);

        let write = session.tick(start + DEFAULT_DEBOUNCE).unwrap();
        assert_eq!(write.update.page_number, Some(3));
    }

    fn saved_at(progress: f64, page_number: Option<u32>) -> ReadingProgress {
        ReadingProgress {
            progress,
            page_number,
            cfi: None,
        }
    }

    fn continuous() -> SessionOptions {
        SessionOptions {
            mode: ReadingMode::Continuous,
            ..SessionOptions::default()
        }
    }

    #[test]
    fn scrolling_restores_saved_page_when_progress_arrives_first() {
        let start = Instant::now();
        let list = VirtualList::new([30.0; 20], 0.0, 1);

        for page_number in [Some(8), None] {
            let mut session = ReaderSession::new(book(1), continuous());
            session.on_progress_loaded(&book(1), Some(saved_at(0.4, page_number)), start);
            session.on_pages_loaded(&book(1), page_list(20), start);
            assert_eq!(session.current_page(), 8);

            // The view still sits at the top until it applies the requested jump.
            session.on_scroll(0.0, 30.0, &list.visible_items(0.0, 30.0), start);
            assert_eq!(session.current_page(), 8);

            assert_eq!(session.take_scroll_request(), Some(7));
            let top = list.offset_of(7);
            session.on_scroll(top, 30.0, &list.visible_items(top, 30.0), start);
            assert_eq!(session.current_page(), 8);
        }
    }

    #[test]
    fn scrolling_restores_saved_page_when_page_list_arrives_first() {
        let start = Instant::now();
        let list = VirtualList::new([30.0; 20], 0.0, 1);

        for page_number in [Some(8), None] {
            let mut session = ReaderSession::new(book(1), continuous());
            session.on_pages_loaded(&book(1), page_list(20), start);
            session.on_content_ready(start);
            session.on_scroll(0.0, 30.0, &list.visible_items(0.0, 30.0), start);
            assert_eq!(session.current_page(), 1);

            session.on_progress_loaded(&book(1), Some(saved_at(0.4, page_number)), start + ms(50));
            assert_eq!(session.current_page(), 8);
            assert_eq!(session.take_scroll_request(), Some(7));

            assert!(session.tick(start + ms(400)).is_none());
            assert_eq!(session.sync_phase(), SyncPhase::Ready);

            let top = list.offset_of(7);
            session.on_scroll(top, 30.0, &list.visible_items(top, 30.0), start + ms(450));
            assert!(session.tick(start + ms(450) + DEFAULT_DEBOUNCE).is_none());
            assert_eq!(session.current_page(), 8);
        }
    }

    #[test]
    fn previous_only_skips_back_over_a_spread() {
        let start = Instant::now();
        let options = SessionOptions {
            spread_enabled: true,
            ..SessionOptions::default()
        };
        let mut session = ready_session(10, options, start);
        session.on_page_dimensions(&book(1), 1, PageDimensions::new(800, 1200));
        session.on_page_dimensions(&book(1), 2, PageDimensions::new(800, 1200));
        session.on_page_dimensions(&book(1), 3, PageDimensions::new(1600, 1200));
        session.on_page_dimensions(&book(1), 4, PageDimensions::new(1600, 1200));
        session.on_page_dimensions(&book(1), 5, PageDimensions::new(1600, 1200));
        session.on_page_dimensions(&book(1), 6, PageDimensions::new(1600, 1200));

        session.go_to(5, start);
        assert_eq!(session.displayed_pages(), vec![5, 6]);
        session.previous(start);
        assert_eq!(session.current_page(), 3);
        session.previous(start);
        assert_eq!(session.current_page(), 2);
        session.previous(start);
        assert_eq!(session.current_page(), 1);
    }

    #[test]
    fn scrolling_mode_jumps_become_scroll_requests() {
        let start = Instant::now();
        let options = SessionOptions {
            mode: ReadingMode::Webtoon,
            ..SessionOptions::default()
        };
        let mut session = ready_session(10, options, start);
        assert_eq!(session.jump_to_progress(0.75, start), JumpOutcome::ScrollTo(7));
        assert_eq!(session.take_scroll_request(), Some(7));
        assert_eq!(session.take_scroll_request(), None);

        session.set_mode(ReadingMode::Paged);
        assert!(matches!(session.jump_to_progress(0.75, start), JumpOutcome::Moved(Some(_))));
        assert_eq!(session.current_page(), 8);
    }

    #[test]
    fn write_failure_keeps_position() {
        let start = Instant::now();
        let mut session = ready_session(10, SessionOptions::default(), start);
        session.go_to(4, start);
        let write = session.tick(start + DEFAULT_DEBOUNCE).unwrap();
        session.on_write_result(&write.context, Err("Server error".into()));

        assert_eq!(session.last_error(), Some("Server error"));
        assert_eq!(session.current_page(), 4);
    }
}
