/// A single buffer slot.
///
/// Items are created when the datasource returns them (not yet laid out, `invisible`), become
/// materialized once the host reports their measured size, and are dropped when clipped or when
/// the buffer resets.
#[derive(Clone, Debug, PartialEq)]
pub struct Item<T> {
    index: i64,
    /// Measured size once materialized, the current estimate otherwise.
    size: f64,
    payload: T,
    materialized: bool,
    invisible: bool,
}

impl<T> Item<T> {
    pub fn new(index: i64, payload: T, estimated_size: f64) -> Self {
        Self {
            index,
            size: estimated_size.max(0.0),
            payload,
            materialized: false,
            invisible: true,
        }
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized
    }

    pub fn is_invisible(&self) -> bool {
        self.invisible
    }

    /// Size that counts towards the laid-out content extent.
    pub(crate) fn laid_out_size(&self) -> f64 {
        if self.materialized && !self.invisible {
            self.size
        } else {
            0.0
        }
    }

    pub(crate) fn materialize(&mut self, size: f64) {
        self.size = size.max(0.0);
        self.materialized = true;
        self.invisible = false;
    }

    pub(crate) fn set_index(&mut self, index: i64) {
        self.index = index;
    }

    pub(crate) fn replace_payload(&mut self, payload: T) -> T {
        core::mem::replace(&mut self.payload, payload)
    }
}

impl<T: Clone> Item<T> {
    pub fn to_adapter(&self) -> ItemAdapter<T> {
        ItemAdapter {
            index: self.index,
            data: self.payload.clone(),
        }
    }
}

/// Public read-only view of an item, as published by [`crate::AdapterContext`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemAdapter<T> {
    pub index: i64,
    pub data: T,
}
