/// A rendered item of a virtualized list, in pixel (or row) offsets from the top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualItem {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

impl VirtualItem {
    pub fn center(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    pub fn size(&self) -> f64 {
        self.end - self.start
    }
}

/// Vertical layout of pages stacked top to bottom.
#[derive(Debug, Clone)]
pub struct VirtualList {
    /// `offsets[i]` is the top of item `i`; the last entry is the total height.
    offsets: Vec<f64>,
    gap: f64,
    overscan: usize,
}

impl VirtualList {
    pub fn new(heights: impl IntoIterator<Item = f64>, gap: f64, overscan: usize) -> Self {
        let mut offsets = vec![0.0];
        let mut top = 0.0;
        for height in heights {
            top += height.max(0.0) + gap;
            offsets.push(top);
        }
        Self {
            offsets,
            gap,
            overscan,
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_height(&self) -> f64 {
        self.offsets.last().copied().unwrap_or(0.0)
    }

    /// Top offset of item `index`, clamped to the list.
    pub fn offset_of(&self, index: usize) -> f64 {
        self.offsets[index.min(self.len())]
    }

    pub fn item(&self, index: usize) -> Option<VirtualItem> {
        if index >= self.len() {
            return None;
        }
        Some(VirtualItem {
            index,
            start: self.offsets[index],
            end: self.offsets[index + 1] - self.gap,
        })
    }

    /// Largest scroll offset that still fills the viewport.
    pub fn max_scroll(&self, viewport_height: f64) -> f64 {
        (self.total_height() - viewport_height).max(0.0)
    }

    /// Items intersecting `[scroll_top, scroll_top + viewport_height)`, widened by overscan.
    pub fn visible_items(&self, scroll_top: f64, viewport_height: f64) -> Vec<VirtualItem> {
        if self.is_empty() {
            return Vec::new();
        }
        let bottom = scroll_top + viewport_height.max(0.0);
        // First item whose bottom edge is below the viewport top.
        let first = self.offsets[1..].partition_point(|&end| end <= scroll_top);
        let last = self.offsets[..self.len()].partition_point(|&start| start < bottom);
        if first >= self.len() || last == 0 {
            return Vec::new();
        }
        let first = first.saturating_sub(self.overscan);
        let last = (last + self.overscan).min(self.len());
        (first..last).filter_map(|index| self.item(index)).collect()
    }
}
