//! The public, lazily-activated facade over a workflow.
//!
//! An [`AdapterContext`] can be handed out before its workflow is initialized. Until then every
//! read returns its empty value and every stream stays silent; once the workflow initializes,
//! streams switch over to the live source exactly once.

use std::sync::Arc;

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;

use crate::error::WorkflowError;
use crate::state::{BufferState, Signals, Tracking, TrackingFlag};
use crate::{Item, ItemAdapter};

/// Crate version, reported by [`AdapterContext::version`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub type RemovePredicate<T> = Box<dyn FnMut(&Item<T>) -> bool + Send>;

/// Commands routed through the workflow's call gateway.
pub enum Command<T> {
    /// Restart from `index`, or from the configured start index.
    Reload(Option<i64>),
    SetScrollPosition(f64),
    Append(Vec<T>),
    Prepend(Vec<T>),
    Remove(RemovePredicate<T>),
    Replace { index: i64, data: T },
}

impl<T> core::fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Reload(index) => f.debug_tuple("Reload").field(index).finish(),
            Self::SetScrollPosition(value) => {
                f.debug_tuple("SetScrollPosition").field(value).finish()
            }
            Self::Append(items) => write!(f, "Append({} items)", items.len()),
            Self::Prepend(items) => write!(f, "Prepend({} items)", items.len()),
            Self::Remove(_) => f.write_str("Remove(..)"),
            Self::Replace { index, .. } => write!(f, "Replace({index})"),
        }
    }
}

/// Read side of a workflow, published once at initialization.
#[derive(Debug)]
pub(crate) struct Live<T> {
    is_loading: watch::Receiver<bool>,
    loop_pending: watch::Receiver<bool>,
    cycle_pending: watch::Receiver<bool>,
    buffer: watch::Receiver<BufferState>,
    first_visible: watch::Receiver<Option<ItemAdapter<T>>>,
    last_visible: watch::Receiver<Option<ItemAdapter<T>>>,
    first_tracking: Arc<TrackingFlag>,
    last_tracking: Arc<TrackingFlag>,
    gateway: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Live<T> {
    pub(crate) fn new(
        signals: &Signals<T>,
        first_tracking: Arc<TrackingFlag>,
        last_tracking: Arc<TrackingFlag>,
        gateway: mpsc::UnboundedSender<Command<T>>,
    ) -> Self {
        Self {
            is_loading: signals.is_loading.subscribe(),
            loop_pending: signals.loop_pending.subscribe(),
            cycle_pending: signals.cycle_pending.subscribe(),
            buffer: signals.buffer.subscribe(),
            first_visible: signals.first_visible.subscribe(),
            last_visible: signals.last_visible.subscribe(),
            first_tracking,
            last_tracking,
            gateway,
        }
    }
}

/// The two-state initialization gate: `None` until the workflow initializes.
pub(crate) type Gate<T> = watch::Sender<Option<Arc<Live<T>>>>;

/// Public observation and command surface of one workflow.
///
/// Cheap to clone; all clones observe the same workflow.
pub struct AdapterContext<T> {
    gate: watch::Receiver<Option<Arc<Live<T>>>>,
}

impl<T> Clone for AdapterContext<T> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
        }
    }
}

impl<T> core::fmt::Debug for AdapterContext<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdapterContext")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl<T> AdapterContext<T> {
    pub(crate) fn new() -> (Self, Gate<T>) {
        let (tx, rx) = watch::channel(None);
        (Self { gate: rx }, tx)
    }

    fn live(&self) -> Option<Arc<Live<T>>> {
        self.gate.borrow().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.gate.borrow().is_some()
    }

    /// `None` until initialized.
    pub fn version(&self) -> Option<&'static str> {
        self.is_initialized().then_some(VERSION)
    }

    pub fn is_loading(&self) -> bool {
        self.live().is_some_and(|live| *live.is_loading.borrow())
    }

    pub fn loop_pending(&self) -> bool {
        self.live().is_some_and(|live| *live.loop_pending.borrow())
    }

    pub fn cycle_pending(&self) -> bool {
        self.live().is_some_and(|live| *live.cycle_pending.borrow())
    }

    /// Number of laid-out items in the buffer.
    pub fn items_count(&self) -> usize {
        self.buffer_state().items_count
    }

    pub fn bof(&self) -> bool {
        self.buffer_state().bof
    }

    pub fn eof(&self) -> bool {
        self.buffer_state().eof
    }

    pub fn buffer_state(&self) -> BufferState {
        self.live()
            .map(|live| *live.buffer.borrow())
            .unwrap_or_default()
    }

    /// Sends a command to the workflow. Fails before initialization and after dispose.
    pub fn send(&self, command: Command<T>) -> Result<(), WorkflowError> {
        let live = self.live().ok_or(WorkflowError::NotInitialized)?;
        live.gateway.send(command).map_err(|_| WorkflowError::Disposed)
    }

    pub fn reload(&self, index: Option<i64>) -> Result<(), WorkflowError> {
        self.send(Command::Reload(index))
    }

    /// Moves the scroll position programmatically.
    pub fn set_scroll_position(&self, value: f64) -> Result<(), WorkflowError> {
        self.send(Command::SetScrollPosition(value))
    }

    /// Inserts items after the last buffered item.
    pub fn append(&self, items: Vec<T>) -> Result<(), WorkflowError> {
        self.send(Command::Append(items))
    }

    /// Inserts items before the first buffered item.
    pub fn prepend(&self, items: Vec<T>) -> Result<(), WorkflowError> {
        self.send(Command::Prepend(items))
    }

    pub fn remove(
        &self,
        predicate: impl FnMut(&Item<T>) -> bool + Send + 'static,
    ) -> Result<(), WorkflowError> {
        self.send(Command::Remove(Box::new(predicate)))
    }

    pub fn replace(&self, index: i64, data: T) -> Result<(), WorkflowError> {
        self.send(Command::Replace { index, data })
    }
}

impl<T: Clone + Send + Sync + 'static> AdapterContext<T> {
    /// First laid-out item intersecting the viewport.
    ///
    /// Tracking is off until the first read (of this or [`Self::first_visible_stream`]). Reads
    /// return `None` until the workflow has computed the value at least once.
    pub fn first_visible(&self) -> Option<ItemAdapter<T>> {
        let live = self.live()?;
        match live.first_tracking.request() {
            Tracking::Active => live.first_visible.borrow().clone(),
            Tracking::Unrequested | Tracking::Requested => None,
        }
    }

    /// Last laid-out item intersecting the viewport. Same activation rules as
    /// [`Self::first_visible`].
    pub fn last_visible(&self) -> Option<ItemAdapter<T>> {
        let live = self.live()?;
        match live.last_tracking.request() {
            Tracking::Active => live.last_visible.borrow().clone(),
            Tracking::Unrequested | Tracking::Requested => None,
        }
    }

    pub fn is_loading_stream(&self) -> BoxStream<'static, bool> {
        self.observe(|live| live.is_loading.clone())
    }

    pub fn loop_pending_stream(&self) -> BoxStream<'static, bool> {
        self.observe(|live| live.loop_pending.clone())
    }

    pub fn cycle_pending_stream(&self) -> BoxStream<'static, bool> {
        self.observe(|live| live.cycle_pending.clone())
    }

    pub fn first_visible_stream(&self) -> BoxStream<'static, Option<ItemAdapter<T>>> {
        self.observe(|live| {
            live.first_tracking.request();
            live.first_visible.clone()
        })
    }

    pub fn last_visible_stream(&self) -> BoxStream<'static, Option<ItemAdapter<T>>> {
        self.observe(|live| {
            live.last_tracking.request();
            live.last_visible.clone()
        })
    }

    /// Streams the source picked from the live side. Before initialization this waits on the
    /// gate and subscribes once it opens; if the workflow goes away first the stream ends
    /// without emitting.
    fn observe<V>(&self, pick: fn(&Live<T>) -> watch::Receiver<V>) -> BoxStream<'static, V>
    where
        V: Clone + Send + Sync + 'static,
    {
        if let Some(live) = self.live() {
            return WatchStream::new(pick(&live)).boxed();
        }
        let mut gate = self.gate.clone();
        stream::once(async move {
            let live = match gate.wait_for(Option::is_some).await {
                Ok(live) => live.clone(),
                Err(_) => None,
            };
            live
        })
        .flat_map(move |live| match live {
            Some(live) => WatchStream::new(pick(&live)).boxed(),
            None => stream::empty().boxed(),
        })
        .boxed()
    }
}
