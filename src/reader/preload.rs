use std::collections::BTreeSet;

pub const DEFAULT_OVERSCAN: u32 = 3;

/// Inputs the preload plan depends on; the plan is recomputed whenever any of them changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadRequest {
    pub current_page: u32,
    pub total_pages: u32,
    pub overscan: u32,
    pub spread_mode: bool,
}

/// Plans which pages to warm around the current one.
pub trait PreloadStrategy {
    fn plan(&self, request: &PreloadRequest) -> Vec<u32>;
}

impl<F> PreloadStrategy for F
where
    F: Fn(&PreloadRequest) -> Vec<u32>,
{
    fn plan(&self, request: &PreloadRequest) -> Vec<u32> {
        self(request)
    }
}

/// `[current, current + overscan]`, widened by one page for a spread, clamped to the book.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowPreload;

impl PreloadStrategy for WindowPreload {
    fn plan(&self, request: &PreloadRequest) -> Vec<u32> {
        if request.total_pages == 0 {
            return Vec::new();
        }
        let start = request.current_page.clamp(1, request.total_pages);
        let extra = request.overscan + u32::from(request.spread_mode);
        let end = start.saturating_add(extra).min(request.total_pages);
        (start..=end).collect()
    }
}

pub struct PreloadPlanner {
    strategy: Box<dyn PreloadStrategy + Send>,
    overscan: u32,
    last_request: Option<PreloadRequest>,
    pages: BTreeSet<u32>,
}

impl Default for PreloadPlanner {
    fn default() -> Self {
        Self::new(WindowPreload, DEFAULT_OVERSCAN)
    }
}

impl PreloadPlanner {
    pub fn new(strategy: impl PreloadStrategy + Send + 'static, overscan: u32) -> Self {
        Self {
            strategy: Box::new(strategy),
            overscan,
            last_request: None,
            pages: BTreeSet::new(),
        }
    }

    pub fn set_strategy(&mut self, strategy: impl PreloadStrategy + Send + 'static) {
        self.strategy = Box::new(strategy);
        self.last_request = None;
    }

    pub fn set_overscan(&mut self, overscan: u32) {
        self.overscan = overscan;
    }

    pub fn overscan(&self) -> u32 {
        self.overscan
    }

    /// Returns the preload set, recomputing only when an input changed.
    pub fn update(
        &mut self,
        current_page: u32,
        total_pages: u32,
        spread_mode: bool,
    ) -> &BTreeSet<u32> {
        let request = PreloadRequest {
            current_page,
            total_pages,
            overscan: self.overscan,
            spread_mode,
        };
        if self.last_request != Some(request) {
            self.pages = self
                .strategy
                .plan(&request)
                .into_iter()
                .filter(|page| (1..=total_pages).contains(page))
                .collect();
            self.last_request = Some(request);
        }
        &self.pages
    }

    pub fn pages(&self) -> &BTreeSet<u32> {
        &self.pages
    }

    pub fn reset(&mut self) {
        self.last_request = None;
        self.pages.clear();
    }
}
