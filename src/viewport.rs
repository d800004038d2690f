use crate::Direction;

/// Placeholder extents standing in for content that is not materialized.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Padding {
    pub backward: f64,
    pub forward: f64,
}

impl Padding {
    pub fn get(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Backward => self.backward,
            Direction::Forward => self.forward,
        }
    }

    fn get_mut(&mut self, direction: Direction) -> &mut f64 {
        match direction {
            Direction::Backward => &mut self.backward,
            Direction::Forward => &mut self.forward,
        }
    }
}

/// Scroll geometry along the scroll axis.
///
/// Content is laid out as `padding.backward | items | padding.forward`. The scroll position is
/// always clamped to `[0, content - size]`, the way a real scroll container clamps it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Viewport {
    scroll_position: f64,
    size: f64,
    padding: Padding,
    items_extent: f64,
    synthetic: Option<f64>,
}

impl Viewport {
    pub fn new(size: f64) -> Self {
        Self {
            size: size.max(0.0),
            ..Self::default()
        }
    }

    pub fn scroll_position(&self) -> f64 {
        self.scroll_position
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn set_size(&mut self, size: f64) {
        self.size = size.max(0.0);
        self.clamp_position();
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn padding_size(&self, direction: Direction) -> f64 {
        self.padding.get(direction)
    }

    pub fn set_padding_size(&mut self, direction: Direction, size: f64) {
        *self.padding.get_mut(direction) = size.max(0.0);
    }

    pub fn items_extent(&self) -> f64 {
        self.items_extent
    }

    pub(crate) fn set_items_extent(&mut self, extent: f64) {
        self.items_extent = extent.max(0.0);
    }

    /// Total scrollable content: both paddings plus the laid-out items.
    pub fn content_extent(&self) -> f64 {
        self.padding.backward + self.items_extent + self.padding.forward
    }

    pub fn max_position(&self) -> f64 {
        (self.content_extent() - self.size).max(0.0)
    }

    /// Sets the scroll position, clamped to the scrollable range. Returns the applied value.
    pub fn set_position(&mut self, value: f64) -> f64 {
        let value = if value.is_finite() { value } else { 0.0 };
        self.scroll_position = value.clamp(0.0, self.max_position());
        self.scroll_position
    }

    fn clamp_position(&mut self) {
        let position = self.scroll_position;
        self.set_position(position);
    }

    /// Back to an empty, unscrolled viewport. The viewport size is kept.
    pub fn reset(&mut self) {
        self.scroll_position = 0.0;
        self.padding = Padding::default();
        self.items_extent = 0.0;
        self.synthetic = None;
    }

    /// The last position written by the engine itself, if the host has not echoed it yet.
    pub fn synthetic_position(&self) -> Option<f64> {
        self.synthetic
    }

    pub(crate) fn mark_synthetic(&mut self) {
        self.synthetic = Some(self.scroll_position);
    }

    pub(crate) fn clear_synthetic(&mut self) {
        self.synthetic = None;
    }

    /// Consumes the pending synthetic position if `position` echoes it.
    pub(crate) fn take_synthetic_echo(&mut self, position: f64) -> bool {
        match self.synthetic {
            Some(synthetic) if (synthetic - position).abs() < 0.5 => {
                self.synthetic = None;
                true
            }
            _ => false,
        }
    }

    /// Grows the padding on `direction` by `extent` of evicted content.
    pub(crate) fn absorb(&mut self, direction: Direction, extent: f64) {
        *self.padding.get_mut(direction) += extent.max(0.0);
    }

    /// Reconciles paddings after `extent` of new content was laid out on `direction`.
    ///
    /// `items_extent` must already include the new content. Forward content replaces forward
    /// padding and never moves the scroll position. Backward content first consumes backward
    /// padding; whatever padding cannot absorb pushes the scroll position forward so the items
    /// already on screen stay put, and if the container cannot scroll that far the forward
    /// padding grows until it can, even when the content is shorter than the viewport. The
    /// order matters: padding first, then scroll, then forward padding.
    ///
    /// Returns the resulting synthetic scroll position when the engine moved it.
    pub fn reconcile(&mut self, direction: Direction, extent: f64) -> Option<f64> {
        let extent = extent.max(0.0);
        match direction {
            Direction::Forward => {
                let position = self.scroll_position;
                self.padding.forward = (self.padding.forward - extent).max(0.0);
                if self.set_position(position) != position {
                    self.mark_synthetic();
                    return self.synthetic;
                }
                None
            }
            Direction::Backward => {
                let position = self.scroll_position;
                let available = self.padding.backward;
                self.padding.backward = (available - extent).max(0.0);
                let overflow = extent - (available - self.padding.backward);
                if overflow <= 0.0 {
                    return None;
                }
                let target = position + overflow;
                if self.set_position(target) < target {
                    let shortfall = target + self.size - self.content_extent();
                    if shortfall > 0.0 {
                        self.padding.forward += shortfall;
                    }
                    self.set_position(target);
                }
                if self.scroll_position != position {
                    self.mark_synthetic();
                    return self.synthetic;
                }
                None
            }
        }
    }

    /// Drops the padding on `direction` once the dataset edge on that side is reached.
    ///
    /// Collapsing backward padding shifts all content back, so the scroll position follows.
    pub(crate) fn collapse(&mut self, direction: Direction) -> Option<f64> {
        let removed = self.padding.get(direction);
        if removed <= 0.0 {
            return None;
        }
        *self.padding.get_mut(direction) = 0.0;
        let position = self.scroll_position;
        let target = match direction {
            Direction::Backward => position - removed,
            Direction::Forward => position,
        };
        if self.set_position(target) != position {
            self.mark_synthetic();
            return self.synthetic;
        }
        None
    }
}
