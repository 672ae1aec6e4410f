use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::context::BookContext;

/// Pixel size of a page image, reported as images load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width: u32,
    pub height: u32,
}

impl PageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_landscape(&self) -> bool {
        self.width >= self.height
    }

    /// Height/width ratio; zero-width images count as square.
    pub fn aspect(&self) -> f64 {
        if self.width == 0 {
            1.0
        } else {
            self.height as f64 / self.width as f64
        }
    }
}

/// Decides whether two consecutive pages form a spread.
pub trait SpreadHeuristic {
    fn is_spread(&self, left: PageDimensions, right: PageDimensions) -> bool;
}

impl<F> SpreadHeuristic for F
where
    F: Fn(PageDimensions, PageDimensions) -> bool,
{
    fn is_spread(&self, left: PageDimensions, right: PageDimensions) -> bool {
        self(left, right)
    }
}

/// Both pages landscape and of similar width.
#[derive(Debug, Clone, Copy)]
pub struct LandscapePairHeuristic {
    /// Maximum relative width difference, as a fraction of the wider page.
    pub width_tolerance: f64,
}

impl Default for LandscapePairHeuristic {
    fn default() -> Self {
        Self {
            width_tolerance: 0.10,
        }
    }
}

impl SpreadHeuristic for LandscapePairHeuristic {
    fn is_spread(&self, left: PageDimensions, right: PageDimensions) -> bool {
        if !left.is_landscape() || !right.is_landscape() {
            return false;
        }
        let wider = left.width.max(right.width);
        if wider == 0 {
            return false;
        }
        let diff = left.width.abs_diff(right.width) as f64;
        diff / wider as f64 <= self.width_tolerance
    }
}

pub struct SpreadDetector<H = LandscapePairHeuristic> {
    heuristic: H,
    context: Option<BookContext>,
    dimensions: HashMap<u32, PageDimensions>,
    enabled: bool,
    current_page: u32,
    total_pages: u32,
    decision: Option<bool>,
}

impl Default for SpreadDetector {
    fn default() -> Self {
        Self::new(LandscapePairHeuristic::default())
    }
}

impl<H: SpreadHeuristic> SpreadDetector<H> {
    pub fn new(heuristic: H) -> Self {
        Self {
            heuristic,
            context: None,
            dimensions: HashMap::new(),
            enabled: false,
            current_page: 1,
            total_pages: 0,
            decision: None,
        }
    }

    /// Clears the dimension cache and decision when the book identity changes.
    pub fn reset(&mut self, context: &BookContext) {
        if self.context.as_ref() == Some(context) {
            return;
        }
        debug!(
            "spread: reset for {} (dropping {} cached dimensions)",
            context,
            self.dimensions.len()
        );
        self.context = Some(context.clone());
        self.dimensions.clear();
        self.decision = None;
        self.current_page = 1;
        self.total_pages = 0;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_position(&mut self, current_page: u32, total_pages: u32) {
        if self.current_page == current_page && self.total_pages == total_pages {
            return;
        }
        self.current_page = current_page;
        self.total_pages = total_pages;
        self.evaluate();
    }

    pub fn on_page_dimensions(&mut self, page: u32, dims: PageDimensions) {
        self.dimensions.insert(page, dims);
        if page == self.current_page || page.checked_sub(1) == Some(self.current_page) {
            self.evaluate();
        }
    }

    pub fn dimensions(&self, page: u32) -> Option<PageDimensions> {
        self.dimensions.get(&page).copied()
    }

    /// Whether the current page should be shown together with its successor.
    pub fn effective_spread_mode(&self) -> bool {
        if !self.enabled || self.current_page >= self.total_pages {
            return false;
        }
        self.decision.unwrap_or(false)
    }

    /// Whether `left_page` and its successor would be shown together. Unlike
    /// [`effective_spread_mode`](Self::effective_spread_mode) this works for any pair,
    /// e.g. the one before the current page when stepping back.
    pub fn pair_is_spread(&self, left_page: u32) -> bool {
        if !self.enabled || left_page == 0 || left_page >= self.total_pages {
            return false;
        }
        self.judge(left_page).unwrap_or(false)
    }

    fn judge(&self, left_page: u32) -> Option<bool> {
        let left = self.dimensions.get(&left_page).copied()?;
        let right = self.dimensions.get(&(left_page + 1)).copied()?;
        Some(self.heuristic.is_spread(left, right))
    }

    fn evaluate(&mut self) {
        self.decision = self.judge(self.current_page);
    }
}
