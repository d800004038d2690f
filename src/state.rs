use core::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::watch;

use crate::{CycleId, Direction, ItemAdapter, Padding, Process};

/// A lightweight snapshot of the viewport geometry.
///
/// With `feature = "serde"`, this type implements `Serialize`/`Deserialize`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewportState {
    pub scroll_position: f64,
    pub size: f64,
    pub padding: Padding,
}

/// A lightweight snapshot of the buffer, as published to the adapter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferState {
    pub items_count: usize,
    pub bof: bool,
    pub eof: bool,
    pub first_index: Option<i64>,
    pub last_index: Option<i64>,
}

/// Demand-driven tracking of an expensive derived value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Tracking {
    /// Nobody asked; the workflow does not compute the value.
    Unrequested = 0,
    /// Asked for; the workflow computes it at its next opportunity.
    Requested = 1,
    /// Maintained on every render.
    Active = 2,
}

#[derive(Debug, Default)]
pub(crate) struct TrackingFlag(AtomicU8);

impl TrackingFlag {
    pub(crate) fn get(&self) -> Tracking {
        match self.0.load(Ordering::Acquire) {
            0 => Tracking::Unrequested,
            1 => Tracking::Requested,
            _ => Tracking::Active,
        }
    }

    /// Flips `Unrequested` to `Requested`; returns the state as seen by the caller.
    pub(crate) fn request(&self) -> Tracking {
        match self.0.compare_exchange(
            Tracking::Unrequested as u8,
            Tracking::Requested as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Tracking::Unrequested,
            Err(current) if current == Tracking::Requested as u8 => Tracking::Requested,
            Err(_) => Tracking::Active,
        }
    }

    pub(crate) fn activate(&self) {
        let _ = self.0.compare_exchange(
            Tracking::Requested as u8,
            Tracking::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Observable flags and values owned by one workflow.
///
/// Every instance has its own channels; nothing here is shared between workflows.
#[derive(Debug)]
pub(crate) struct Signals<T> {
    pub(crate) is_loading: watch::Sender<bool>,
    pub(crate) loop_pending: watch::Sender<bool>,
    pub(crate) cycle_pending: watch::Sender<bool>,
    pub(crate) buffer: watch::Sender<BufferState>,
    pub(crate) first_visible: watch::Sender<Option<ItemAdapter<T>>>,
    pub(crate) last_visible: watch::Sender<Option<ItemAdapter<T>>>,
}

impl<T> Signals<T> {
    pub(crate) fn new() -> Self {
        Self {
            is_loading: watch::Sender::new(false),
            loop_pending: watch::Sender::new(false),
            cycle_pending: watch::Sender::new(false),
            buffer: watch::Sender::new(BufferState::default()),
            first_visible: watch::Sender::new(None),
            last_visible: watch::Sender::new(None),
        }
    }
}

/// Publishes `value` only when it differs, so subscribers never see duplicate emissions.
pub(crate) fn publish<V: PartialEq>(tx: &watch::Sender<V>, value: V) {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

/// The workflow's pipeline record. Mutated only by the workflow's transition logic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkflowState {
    pub process: Option<Process>,
    pub cycle: CycleId,
    /// Direction of the current (or last) fetch.
    pub direction: Option<Direction>,
    /// A whole cycle (possibly several loops) is in flight.
    pub cycle_pending: bool,
    /// A single fetch→render→clip→adapt→end loop is in flight.
    pub loop_pending: bool,
    /// A fetch or render is outstanding.
    pub is_loading: bool,
    /// Loops run within the current cycle.
    pub loop_count: usize,
    pub initialized: bool,
    pub disposed: bool,
}
