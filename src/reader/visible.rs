use log::debug;

use super::virtual_list::VirtualItem;

/// Picks the item whose center is nearest the viewport center and returns its 1-based
/// page number. Ties go to the first item in iteration order.
pub fn closest_page(viewport_center: f64, items: &[VirtualItem]) -> Option<u32> {
    let mut best: Option<(&VirtualItem, f64)> = None;
    for item in items {
        let distance = (item.center() - viewport_center).abs();
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((item, distance)),
        }
    }
    best.map(|(item, _)| item.index as u32 + 1)
}

/// Tracks the "current" page of a continuously scrolling view.
#[derive(Debug, Default)]
pub struct VisiblePageTracker {
    last_page: Option<u32>,
}

impl VisiblePageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_page(&self) -> Option<u32> {
        self.last_page
    }

    /// Seeds the tracker, e.g. after a programmatic scroll, so it is not reported again.
    pub fn set_last_page(&mut self, page: u32) {
        self.last_page = Some(page);
    }

    pub fn reset(&mut self) {
        self.last_page = None;
    }

    /// Recomputes the current page for a scroll position. Returns it only when it
    /// differs from the last reported one; an empty item set keeps the last page.
    pub fn update(
        &mut self,
        scroll_top: f64,
        container_height: f64,
        items: &[VirtualItem],
    ) -> Option<u32> {
        let center = scroll_top + container_height / 2.0;
        let page = closest_page(center, items)?;
        if self.last_page == Some(page) {
            return None;
        }
        debug!(
            "visible: page {} at center {:.0} ({} items)",
            page,
            center,
            items.len()
        );
        self.last_page = Some(page);
        Some(page)
    }
}
