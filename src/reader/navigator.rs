use log::debug;

use super::context::ReadingMode;

/// Emitted whenever the navigator settles on a page outside the initial-load grace period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageChange {
    pub page: u32,
    pub total_pages: u32,
    pub progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationState {
    pub current_page: u32,
    pub can_go_next: bool,
    pub can_go_previous: bool,
}

/// Result of a jump request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JumpOutcome {
    /// Paged mode: the navigator moved directly.
    Moved(Option<PageChange>),
    /// Scrolling modes: the owner scrolls its viewport to this zero-based item index and
    /// lets the visible-page tracker report the page that lands in view.
    ScrollTo(usize),
}

pub fn progress_for_page(page: u32, total_pages: u32) -> f64 {
    if total_pages == 0 {
        return 0.0;
    }
    (page as f64 / total_pages as f64).clamp(0.0, 1.0)
}

/// Inverse of [`progress_for_page`], rounding up. Not an exact round-trip.
pub fn page_for_progress(progress: f64, total_pages: u32) -> u32 {
    if total_pages == 0 {
        return 1;
    }
    let progress = if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let page = (progress * total_pages as f64).ceil() as u32;
    page.clamp(1, total_pages)
}

pub fn clamp_page(target: i64, total_pages: u32) -> u32 {
    if total_pages == 0 {
        return 1;
    }
    target.clamp(1, total_pages as i64) as u32
}

/// Single source of truth for the current page, whatever the rendering mode.
#[derive(Debug)]
pub struct PageNavigator {
    total_pages: u32,
    current_page: u32,
    mode: ReadingMode,
    in_grace_period: bool,
    has_navigated: bool,
    initial_page: Option<u32>,
    initial_applied: bool,
}

impl Default for PageNavigator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PageNavigator {
    pub fn new(total_pages: u32) -> Self {
        Self {
            total_pages,
            current_page: 1,
            mode: ReadingMode::Paged,
            in_grace_period: true,
            has_navigated: false,
            initial_page: None,
            initial_applied: false,
        }
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn mode(&self) -> ReadingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ReadingMode) {
        self.mode = mode;
    }

    pub fn progress(&self) -> f64 {
        progress_for_page(self.current_page, self.total_pages)
    }

    pub fn state(&self) -> NavigationState {
        NavigationState {
            current_page: self.current_page,
            can_go_next: self.current_page < self.total_pages,
            can_go_previous: self.current_page > 1,
        }
    }

    pub fn in_grace_period(&self) -> bool {
        self.in_grace_period
    }

    pub fn end_grace_period(&mut self) {
        if self.in_grace_period {
            debug!("navigator: grace period over at page {}", self.current_page);
        }
        self.in_grace_period = false;
    }

    /// Updates the page count and silently re-clamps the current page. A pending
    /// initial page that was waiting for the count is applied here.
    pub fn set_total_pages(&mut self, total_pages: u32) -> Option<PageChange> {
        self.total_pages = total_pages;
        if total_pages > 0 {
            self.current_page = self.current_page.clamp(1, total_pages);
        }
        if let Some(page) = self.initial_page {
            return self.apply_initial_page(page);
        }
        None
    }

    /// Snaps to an externally supplied starting page once, provided the reader has not
    /// navigated yet. Arrives whenever the persisted progress resolves.
    pub fn set_initial_page(&mut self, page: u32) -> Option<PageChange> {
        if self.initial_applied || self.has_navigated {
            return None;
        }
        self.initial_page = Some(page);
        self.apply_initial_page(page)
    }

    fn apply_initial_page(&mut self, page: u32) -> Option<PageChange> {
        if self.total_pages == 0 || self.initial_applied || self.has_navigated {
            return None;
        }
        self.initial_applied = true;
        self.initial_page = None;
        self.current_page = clamp_page(page as i64, self.total_pages);
        debug!(
            "navigator: initial page {} of {} applied",
            self.current_page, self.total_pages
        );
        Some(self.change())
    }

    pub fn go_to_page(&mut self, target: i64) -> Option<PageChange> {
        if self.total_pages == 0 {
            return None;
        }
        self.has_navigated = true;
        self.follow_page(target)
    }

    /// Like [`go_to_page`](Self::go_to_page), but does not count as navigation, so a
    /// pending initial page still applies afterwards.
    pub fn follow_page(&mut self, target: i64) -> Option<PageChange> {
        if self.total_pages == 0 {
            return None;
        }
        self.current_page = clamp_page(target, self.total_pages);
        if self.in_grace_period {
            return None;
        }
        Some(self.change())
    }

    pub fn go_to_next(&mut self) -> Option<PageChange> {
        self.step(1)
    }

    pub fn go_to_previous(&mut self) -> Option<PageChange> {
        self.step(-1)
    }

    /// Moves by `delta` pages; a no-op when already at the bound in that direction.
    pub fn step(&mut self, delta: i64) -> Option<PageChange> {
        let state = self.state();
        if (delta > 0 && !state.can_go_next) || (delta < 0 && !state.can_go_previous) {
            return None;
        }
        self.go_to_page(self.current_page as i64 + delta)
    }

    pub fn go_to_first(&mut self) -> Option<PageChange> {
        self.go_to_page(1)
    }

    pub fn go_to_last(&mut self) -> Option<PageChange> {
        self.go_to_page(self.total_pages as i64)
    }

    pub fn jump_to_progress(&mut self, progress: f64) -> JumpOutcome {
        let page = page_for_progress(progress, self.total_pages);
        if self.mode.is_scrolling() && self.total_pages > 0 {
            self.has_navigated = true;
            return JumpOutcome::ScrollTo(page as usize - 1);
        }
        JumpOutcome::Moved(self.go_to_page(page as i64))
    }

    pub fn jump_to_page(&mut self, page: i64) -> JumpOutcome {
        if self.mode.is_scrolling() && self.total_pages > 0 {
            self.has_navigated = true;
            return JumpOutcome::ScrollTo(clamp_page(page, self.total_pages) as usize - 1);
        }
        JumpOutcome::Moved(self.go_to_page(page))
    }

    fn change(&self) -> PageChange {
        PageChange {
            page: self.current_page,
            total_pages: self.total_pages,
            progress: self.progress(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(total_pages: u32) -> PageNavigator {
        let mut nav = PageNavigator::new(total_pages);
        nav.end_grace_period();
        nav
    }

    #[test]
    fn go_to_page_always_clamps() {
        let mut nav = ready(10);
        for target in [-5_i64, 0, 1, 7, 10, 11, i64::MAX, i64::MIN] {
            nav.go_to_page(target);
            assert!((1..=10).contains(&nav.current_page()), "target {target}");
        }
        nav.go_to_page(42);
        assert_eq!(nav.current_page(), 10);
    }

    #[test]
    fn empty_book_is_a_no_op() {
        let mut nav = ready(0);
        assert_eq!(nav.go_to_page(3), None);
        assert_eq!(nav.go_to_next(), None);
        assert_eq!(nav.current_page(), 1);
        assert_eq!(nav.progress(), 0.0);
    }

    #[test]
    fn page_change_reports_progress() {
        let mut nav = ready(4);
        let change = nav.go_to_page(3).unwrap();
        assert_eq!(change.page, 3);
        assert_eq!(change.total_pages, 4);
        assert!((change.progress - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn grace_period_suppresses_events_but_moves() {
        let mut nav = PageNavigator::new(10);
        assert_eq!(nav.go_to_page(4), None);
        assert_eq!(nav.current_page(), 4);
        nav.end_grace_period();
        assert!(nav.go_to_next().is_some());
    }

    #[test]
    fn bounds_are_no_ops() {
        let mut nav = ready(3);
        assert_eq!(nav.go_to_previous(), None);
        nav.go_to_last();
        assert_eq!(nav.go_to_next(), None);
        assert_eq!(nav.current_page(), 3);
        assert!(nav.go_to_first().is_some());
        assert_eq!(nav.current_page(), 1);
    }

    #[test]
    fn navigation_state_flags() {
        let mut nav = ready(10);
        for _ in 0..5 {
            nav.go_to_next();
        }
        assert_eq!(
            nav.state(),
            NavigationState {
                current_page: 6,
                can_go_next: true,
                can_go_previous: true,
            }
        );
    }

    #[test]
    fn progress_round_trip_is_within_one_page() {
        for total in 1..=60_u32 {
            let mut nav = ready(total);
            for page in 1..=total {
                nav.jump_to_progress(progress_for_page(page, total));
                let got = nav.current_page();
                assert!(got.abs_diff(page) <= 1, "total {total} page {page} got {got}");
            }
        }
    }

    #[test]
    fn page_for_progress_clamps() {
        assert_eq!(page_for_progress(0.0, 10), 1);
        assert_eq!(page_for_progress(-1.0, 10), 1);
        assert_eq!(page_for_progress(2.0, 10), 10);
        assert_eq!(page_for_progress(f64::NAN, 10), 1);
        assert_eq!(page_for_progress(0.31, 10), 4);
    }

    #[test]
    fn bounds_self_heal_when_total_shrinks() {
        let mut nav = ready(10);
        nav.go_to_page(9);
        nav.set_total_pages(5);
        assert_eq!(nav.current_page(), 5);
    }

    #[test]
    fn initial_page_applies_once() {
        let mut nav = PageNavigator::new(20);
        let change = nav.set_initial_page(8).unwrap();
        assert_eq!(change.page, 8);
        assert!((change.progress - 0.4).abs() < 1e-9);
        assert_eq!(nav.set_initial_page(3), None);
        assert_eq!(nav.current_page(), 8);
    }

    #[test]
    fn initial_page_waits_for_page_count() {
        let mut nav = PageNavigator::new(0);
        assert_eq!(nav.set_initial_page(30), None);
        let change = nav.set_total_pages(12).unwrap();
        assert_eq!(change.page, 12);
        assert_eq!(nav.set_total_pages(12), None);
    }

    #[test]
    fn initial_page_ignored_after_navigation() {
        let mut nav = ready(10);
        nav.go_to_page(2);
        assert_eq!(nav.set_initial_page(7), None);
        assert_eq!(nav.current_page(), 2);
    }

    #[test]
    fn followed_page_does_not_block_initial_page() {
        let mut nav = PageNavigator::new(10);
        assert_eq!(nav.follow_page(1), None);
        assert_eq!(nav.set_initial_page(7).map(|c| c.page), Some(7));
        assert_eq!(nav.current_page(), 7);
    }

    #[test]
    fn scrolling_modes_delegate_jumps() {
        let mut nav = ready(10);
        nav.set_mode(ReadingMode::Webtoon);
        assert_eq!(nav.jump_to_progress(0.5), JumpOutcome::ScrollTo(4));
        assert_eq!(nav.jump_to_page(99), JumpOutcome::ScrollTo(9));
        assert_eq!(nav.current_page(), 1);

        nav.set_mode(ReadingMode::Paged);
        assert!(matches!(nav.jump_to_progress(0.5), JumpOutcome::Moved(Some(_))));
        assert_eq!(nav.current_page(), 5);
    }
}
