//! A headless virtual scrolling engine.
//!
//! The engine keeps a sliding window ([`Buffer`]) over a potentially unbounded dataset that is
//! pulled in pages from a host-supplied [`Datasource`]. Content outside the window is stood in
//! for by placeholder paddings ([`Viewport`]) so the scroll container keeps its full length and
//! items already on screen never jump when new content lands above them.
//!
//! It is UI-agnostic. A host layer is expected to provide:
//! - the viewport size and scroll events
//! - layout of requested items and their measured sizes
//! - application of engine-written scroll positions
//!
//! [`Workflow`] drives the `scroll → fetch → render → clip → adapt → end` pipeline;
//! [`AdapterContext`] is the public facade for observing and commanding it, usable even before
//! the workflow is initialized.
#![forbid(unsafe_code)]

#[macro_use]
mod macros;

mod adapter;
mod buffer;
mod datasource;
mod error;
mod item;
mod process;
mod settings;
mod state;
mod viewport;
mod workflow;

#[cfg(test)]
mod tests;

pub use adapter::{AdapterContext, Command, RemovePredicate, VERSION};
pub use buffer::{Buffer, Clipped, Removed};
pub use datasource::{Datasource, Done, FetchResult, Getter};
pub use error::{DatasourceError, FetchError, INVALID_DATASOURCE_PREFIX, Result, WorkflowError};
pub use item::{Item, ItemAdapter};
pub use process::{CycleId, Direction, Process, ProcessStatus, ProcessSubject};
pub use settings::{
    DEFAULT_BUFFER_SIZE, DEFAULT_PADDING, DEFAULT_START_INDEX, DevSettings, MIN_BUFFER_SIZE,
    MIN_ITEM_SIZE, MIN_PADDING, Settings, ViewportHandle,
};
pub use state::{BufferState, Tracking, ViewportState, WorkflowState};
pub use viewport::{Padding, Viewport};
pub use workflow::{Adjustment, RenderKind, RenderReport, RenderRequest, Step, Workflow};
