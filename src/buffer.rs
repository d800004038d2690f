use std::collections::VecDeque;
use std::ops::RangeInclusive;

use crate::{Direction, Item};

/// Extents and indexes evicted by [`Buffer::clip`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Clipped {
    /// Laid-out extent evicted before the retained window.
    pub backward: f64,
    /// Laid-out extent evicted after the retained window.
    pub forward: f64,
    pub indexes: Vec<i64>,
}

impl Clipped {
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

/// Items removed by [`Buffer::remove`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Removed {
    pub indexes: Vec<i64>,
    /// Laid-out extent of the removed items.
    pub extent: f64,
}

/// The sliding window of dataset items.
///
/// Items are kept ordered by index with no duplicates. The buffer also remembers the dataset
/// edges learned from short fetches: a fetch that returns fewer items than requested pins the
/// first (`bof`) or last (`eof`) existing index.
#[derive(Clone, Debug)]
pub struct Buffer<T> {
    items: VecDeque<Item<T>>,
    bof_edge: Option<i64>,
    eof_edge: Option<i64>,
    /// Index the next load starts from; places learned edges while the buffer is empty.
    origin: Option<i64>,

    fixed_size: Option<f64>,
    measured_total: f64,
    measured_count: usize,
}

impl<T> Buffer<T> {
    pub fn new(fixed_size: Option<u32>) -> Self {
        Self {
            items: VecDeque::new(),
            bof_edge: None,
            eof_edge: None,
            origin: None,
            fixed_size: fixed_size.map(f64::from),
            measured_total: 0.0,
            measured_count: 0,
        }
    }

    /// Drops every item.
    ///
    /// With `keep_position` the learned dataset edges and size statistics survive, so a reload
    /// inside the same dataset does not refetch what is already known to be out of range.
    /// Otherwise `bof`/`eof` go back to unknown.
    pub fn reset(&mut self, keep_position: bool) {
        vtrace!(len = self.items.len(), keep_position, "Buffer::reset");
        self.items.clear();
        if !keep_position {
            self.bof_edge = None;
            self.eof_edge = None;
            self.measured_total = 0.0;
            self.measured_count = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item<T>> {
        self.items.iter()
    }

    pub fn first_index(&self) -> Option<i64> {
        self.items.front().map(Item::index)
    }

    pub fn last_index(&self) -> Option<i64> {
        self.items.back().map(Item::index)
    }

    pub fn get(&self, index: i64) -> Option<&Item<T>> {
        self.position(index).map(|pos| &self.items[pos])
    }

    pub(crate) fn get_mut(&mut self, index: i64) -> Option<&mut Item<T>> {
        self.position(index).map(|pos| &mut self.items[pos])
    }

    fn position(&self, index: i64) -> Option<usize> {
        let pos = self.items.partition_point(|it| it.index() < index);
        (pos < self.items.len() && self.items[pos].index() == index).then_some(pos)
    }

    /// Begin-of-feed: the first buffered item is the first item of the dataset.
    ///
    /// While empty, the buffer is at `bof` once nothing is known to exist before its origin.
    pub fn bof(&self) -> bool {
        match (self.bof_edge, self.first_index().or(self.origin)) {
            (Some(edge), Some(first)) => first <= edge,
            _ => false,
        }
    }

    /// End-of-feed: the last buffered item is the last item of the dataset.
    ///
    /// While empty, the buffer is at `eof` once nothing is known to exist from its origin on.
    pub fn eof(&self) -> bool {
        match (self.eof_edge, self.last_index()) {
            (Some(edge), Some(last)) => last >= edge,
            (Some(edge), None) => self.origin.is_some_and(|origin| edge < origin),
            _ => false,
        }
    }

    /// Sets the index the next load starts from.
    pub(crate) fn set_origin(&mut self, index: i64) {
        self.origin = Some(index);
    }

    /// First index known to exist in the dataset, if a backward fetch came back short.
    pub fn bof_edge(&self) -> Option<i64> {
        self.bof_edge
    }

    /// Last index known to exist in the dataset, if a forward fetch came back short.
    pub fn eof_edge(&self) -> Option<i64> {
        self.eof_edge
    }

    /// Number of laid-out, visible items.
    pub fn visible_items_count(&self) -> usize {
        self.items
            .iter()
            .filter(|it| it.is_materialized() && !it.is_invisible())
            .count()
    }

    /// Sum of laid-out item sizes.
    pub fn extent(&self) -> f64 {
        self.items.iter().map(Item::laid_out_size).sum()
    }

    /// Size assigned to items that have not been measured yet.
    pub fn estimated_size(&self) -> f64 {
        if let Some(size) = self.fixed_size {
            return size;
        }
        if self.measured_count == 0 {
            0.0
        } else {
            self.measured_total / self.measured_count as f64
        }
    }

    pub fn fixed_size(&self) -> Option<f64> {
        self.fixed_size
    }

    /// Inserts fetched items at the `direction` edge.
    ///
    /// Indexes already present are skipped. Returns the indexes actually inserted, ascending.
    pub fn append(&mut self, mut items: Vec<Item<T>>, direction: Direction) -> Vec<i64> {
        // Walk outward from the edge so each insert lands at the front/back of the deque.
        if direction == Direction::Backward {
            items.reverse();
        }
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let index = item.index();
            let pos = self.items.partition_point(|it| it.index() < index);
            if pos < self.items.len() && self.items[pos].index() == index {
                vtrace!(index, "Buffer::append: duplicate index skipped");
                continue;
            }
            if pos == self.items.len() {
                self.items.push_back(item);
            } else if pos == 0 {
                self.items.push_front(item);
            } else {
                self.items.insert(pos, item);
            }
            inserted.push(index);
        }
        inserted.sort_unstable();
        vtrace!(
            count = inserted.len(),
            ?direction,
            first = self.first_index().unwrap_or_default(),
            last = self.last_index().unwrap_or_default(),
            "Buffer::append"
        );
        inserted
    }

    /// Records the outcome of a fetch of `requested` items starting at `start`.
    ///
    /// Coming back short is the only way an edge gets pinned; a full response past a pinned
    /// edge means the dataset grew and the edge is forgotten.
    pub fn record_fetch(&mut self, direction: Direction, start: i64, requested: usize, got: usize) {
        let requested = requested as i64;
        let got = (got as i64).min(requested);
        match direction {
            Direction::Forward => {
                let last_received = start + got - 1;
                if got < requested {
                    self.eof_edge = Some(last_received);
                } else if self.eof_edge.is_some_and(|edge| edge < last_received) {
                    self.eof_edge = None;
                }
            }
            Direction::Backward => {
                let end = start + requested - 1;
                let first_received = end - got + 1;
                if got < requested {
                    self.bof_edge = Some(first_received);
                } else if self.bof_edge.is_some_and(|edge| edge > first_received) {
                    self.bof_edge = None;
                }
            }
        }
    }

    /// Lays out an item with its measured size. Returns `false` for unknown indexes.
    pub fn materialize(&mut self, index: i64, size: f64) -> bool {
        let Some(item) = self.get_mut(index) else {
            return false;
        };
        item.materialize(size);
        self.measured_total += item.size();
        self.measured_count += 1;
        true
    }

    /// Evicts every item whose index is outside `keep`.
    pub fn clip(&mut self, keep: RangeInclusive<i64>) -> Clipped {
        let mut clipped = Clipped::default();
        while let Some(front) = self.items.front() {
            if front.index() >= *keep.start() {
                break;
            }
            clipped.backward += front.laid_out_size();
            clipped.indexes.push(front.index());
            self.items.pop_front();
        }
        while let Some(back) = self.items.back() {
            if back.index() <= *keep.end() {
                break;
            }
            clipped.forward += back.laid_out_size();
            clipped.indexes.push(back.index());
            self.items.pop_back();
        }
        if !clipped.is_empty() {
            clipped.indexes.sort_unstable();
            vtrace!(
                count = clipped.indexes.len(),
                backward = clipped.backward,
                forward = clipped.forward,
                "Buffer::clip"
            );
        }
        clipped
    }

    /// Removes every item matching `predicate` and closes the gaps: later items shift down so
    /// the buffer stays contiguous with the dataset.
    pub fn remove(&mut self, mut predicate: impl FnMut(&Item<T>) -> bool) -> Removed {
        let mut removed = Removed::default();
        let mut shift = 0i64;
        let mut kept = VecDeque::with_capacity(self.items.len());
        for mut item in self.items.drain(..) {
            if predicate(&item) {
                removed.extent += item.laid_out_size();
                removed.indexes.push(item.index());
                shift += 1;
                continue;
            }
            if shift > 0 {
                item.set_index(item.index() - shift);
            }
            kept.push_back(item);
        }
        self.items = kept;
        if shift > 0 {
            self.eof_edge = self.eof_edge.map(|edge| edge - shift);
        }
        removed
    }

    /// Shifts the remembered edges after items were inserted outside the fetch path.
    pub(crate) fn shift_edges(&mut self, direction: Direction, count: usize) {
        let count = count as i64;
        match direction {
            Direction::Forward => self.eof_edge = self.eof_edge.map(|edge| edge + count),
            Direction::Backward => self.bof_edge = self.bof_edge.map(|edge| edge - count),
        }
    }

    /// Laid-out extent of the items before `index`.
    pub fn extent_before(&self, index: i64) -> f64 {
        self.items
            .iter()
            .take_while(|it| it.index() < index)
            .map(Item::laid_out_size)
            .sum()
    }

    /// Index positions of the laid-out items that intersect `[start, end)` in content
    /// coordinates, where the first item begins at `origin`.
    pub fn visible_bounds(&self, origin: f64, start: f64, end: f64) -> Option<(i64, i64)> {
        let mut offset = origin;
        let mut first = None;
        let mut last = None;
        for item in &self.items {
            let size = item.laid_out_size();
            if size <= 0.0 {
                continue;
            }
            let item_end = offset + size;
            if item_end > start && offset < end {
                first.get_or_insert(item.index());
                last = Some(item.index());
            } else if offset >= end {
                break;
            }
            offset = item_end;
        }
        first.zip(last)
    }
}
