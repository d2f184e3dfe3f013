//! Windowed rendering for long lists.
//!
//! Only the items intersecting the viewport, plus a small overscan margin,
//! are rendered. Item offsets come from a prefix-sum cache that grows with the
//! list so appending never moves items that are already laid out.

/// Items rendered above and below the viewport.
pub const DEFAULT_OVERSCAN: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq)]
enum ItemExtent {
    Fixed(f32),
    Estimated(f32),
}

/// Result of [`VirtualWindow::compute`]: items `start_index..end_index` should
/// be rendered, item `start_index + i` at `offsets[i]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowLayout {
    pub start_index: usize,
    pub end_index: usize,
    pub offsets: Vec<f32>,
    pub total_extent: f32,
}

impl WindowLayout {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start_index..self.end_index
    }

    pub fn is_empty(&self) -> bool {
        self.start_index >= self.end_index
    }

    /// Space above the first rendered item.
    pub fn leading_space(&self) -> f32 {
        self.offsets.first().copied().unwrap_or(0.0)
    }
}

#[derive(Clone, Debug)]
pub struct VirtualWindow {
    extent: ItemExtent,
    overscan: usize,
    extents: Vec<f32>,
    // prefix[i] is the start offset of item i; valid for i < prefix.len().
    prefix: Vec<f32>,
}

impl VirtualWindow {
    /// Every item has the same extent.
    pub fn fixed(extent: f32) -> Self {
        Self::with_extent(ItemExtent::Fixed(sanitize(extent)))
    }

    /// Items start at `estimate` and are corrected with [`Self::set_extent`]
    /// once measured.
    pub fn estimated(estimate: f32) -> Self {
        Self::with_extent(ItemExtent::Estimated(sanitize(estimate)))
    }

    fn with_extent(extent: ItemExtent) -> Self {
        Self {
            extent,
            overscan: DEFAULT_OVERSCAN,
            extents: Vec::new(),
            prefix: vec![0.0],
        }
    }

    pub fn with_overscan(mut self, overscan: usize) -> Self {
        self.overscan = overscan;
        self
    }

    pub fn overscan(&self) -> usize {
        self.overscan
    }

    pub fn compute(
        &mut self,
        scroll_offset: f32,
        viewport_extent: f32,
        item_count: usize,
    ) -> WindowLayout {
        let default = self.default_extent();
        self.compute_with(scroll_offset, viewport_extent, item_count, |_| default)
    }

    /// Like [`Self::compute`], estimating newly appended items with
    /// `estimate` instead of the default extent.
    pub fn compute_with(
        &mut self,
        scroll_offset: f32,
        viewport_extent: f32,
        item_count: usize,
        estimate: impl FnMut(usize) -> f32,
    ) -> WindowLayout {
        if item_count == 0 {
            self.clear();
            return WindowLayout::default();
        }
        let top = scroll_offset.max(0.0);
        let bottom = top + viewport_extent.max(0.0);
        let (first_visible, end_visible) = match self.extent {
            ItemExtent::Fixed(extent) => fixed_visible(extent, top, bottom, item_count),
            ItemExtent::Estimated(_) => {
                self.sync(item_count, estimate);
                self.estimated_visible(top, bottom, item_count)
            }
        };
        let start_index = first_visible.saturating_sub(self.overscan);
        let end_index = end_visible
            .max(first_visible)
            .saturating_add(self.overscan)
            .min(item_count)
            .max(start_index);
        let offsets = (start_index..end_index).map(|index| self.offset_of(index)).collect();
        WindowLayout {
            start_index,
            end_index,
            offsets,
            total_extent: self.offset_of(item_count),
        }
    }

    /// Record a measured extent, invalidating cached offsets after `index`.
    pub fn set_extent(&mut self, index: usize, measured: f32) {
        if matches!(self.extent, ItemExtent::Fixed(_)) {
            return;
        }
        let measured = sanitize(measured);
        let Some(slot) = self.extents.get_mut(index) else {
            return;
        };
        if (*slot - measured).abs() <= f32::EPSILON {
            return;
        }
        *slot = measured;
        self.prefix.truncate(index + 1);
    }

    /// Forget the first `count` items after the list evicted them.
    pub fn drop_front(&mut self, count: usize) {
        if count == 0 || matches!(self.extent, ItemExtent::Fixed(_)) {
            return;
        }
        let count = count.min(self.extents.len());
        self.extents.drain(..count);
        self.prefix.truncate(1);
    }

    pub fn clear(&mut self) {
        self.extents.clear();
        self.prefix.truncate(1);
    }

    /// Start offset of `index`. Items past the cached range are assumed to
    /// have the default extent.
    pub fn offset_of(&mut self, index: usize) -> f32 {
        match self.extent {
            ItemExtent::Fixed(extent) => index as f32 * extent,
            ItemExtent::Estimated(estimate) => {
                let cached = self.extents.len();
                self.extend_prefix(index.min(cached));
                if index <= cached {
                    self.prefix[index]
                } else {
                    self.prefix[cached] + (index - cached) as f32 * estimate
                }
            }
        }
    }

    pub fn extent_of(&self, index: usize) -> f32 {
        match self.extent {
            ItemExtent::Fixed(extent) => extent,
            ItemExtent::Estimated(estimate) => {
                self.extents.get(index).copied().unwrap_or(estimate)
            }
        }
    }

    /// Scroll offset that brings `index` into view with `padding` items of
    /// margin, or `current_offset` when it is already visible.
    pub fn scroll_to_reveal(
        &mut self,
        current_offset: f32,
        index: usize,
        viewport_extent: f32,
        padding: f32,
    ) -> f32 {
        if viewport_extent <= 0.0 {
            return current_offset;
        }
        let padding = (self.default_extent() * padding).max(0.0);
        let item_top = self.offset_of(index);
        let item_bottom = item_top + self.extent_of(index);
        let min_offset = (item_bottom + padding - viewport_extent).max(0.0);
        let max_offset = item_top - padding;
        if max_offset <= min_offset {
            return (item_top - padding).max(0.0);
        }
        current_offset.clamp(min_offset, max_offset)
    }

    fn default_extent(&self) -> f32 {
        match self.extent {
            ItemExtent::Fixed(extent) | ItemExtent::Estimated(extent) => extent,
        }
    }

    fn sync(&mut self, item_count: usize, mut estimate: impl FnMut(usize) -> f32) {
        if item_count < self.extents.len() {
            self.extents.truncate(item_count);
            self.prefix.truncate(item_count + 1);
        }
        while self.extents.len() < item_count {
            let index = self.extents.len();
            self.extents.push(sanitize(estimate(index)));
        }
        self.extend_prefix(item_count);
    }

    fn extend_prefix(&mut self, upto: usize) {
        while self.prefix.len() <= upto {
            let index = self.prefix.len() - 1;
            let next = self.prefix[index] + self.extents[index];
            self.prefix.push(next);
        }
    }

    fn estimated_visible(&self, top: f32, bottom: f32, item_count: usize) -> (usize, usize) {
        let ends = &self.prefix[1..=item_count];
        let first = ends.partition_point(|end| *end <= top).min(item_count - 1);
        let starts = &self.prefix[..item_count];
        let end = starts.partition_point(|start| *start < bottom);
        (first, end)
    }
}

fn fixed_visible(extent: f32, top: f32, bottom: f32, item_count: usize) -> (usize, usize) {
    if extent <= 0.0 {
        return (0, item_count);
    }
    let first = ((top / extent).floor() as usize).min(item_count - 1);
    let end = ((bottom / extent).ceil() as usize).min(item_count);
    (first, end)
}

fn sanitize(extent: f32) -> f32 {
    if extent.is_finite() { extent.max(0.0) } else { 0.0 }
}
