use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::adapter::{AdapterContext, Command, Gate, Live};
use crate::datasource::{Datasource, FetchResult, Fetcher};
use crate::error::{DatasourceError, Result, WorkflowError};
use crate::state::{BufferState, Signals, Tracking, TrackingFlag, ViewportState, publish};
use crate::{
    Buffer, Clipped, CycleId, DevSettings, Direction, Item, ItemAdapter, Process, ProcessStatus,
    ProcessSubject, Settings, Viewport, WorkflowState,
};

/// Why a set of items is handed to the host for layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RenderKind {
    /// Items returned by the datasource.
    Fetched,
    /// Items inserted through `append`/`prepend`.
    Inserted,
    /// An item whose payload was replaced and must be measured again.
    Refreshed,
}

/// Items the host must materialize and measure, in ascending index order.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderRequest<T> {
    pub cycle: CycleId,
    pub direction: Direction,
    pub kind: RenderKind,
    pub items: Vec<ItemAdapter<T>>,
}

/// The host's measurements for a [`RenderRequest`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderReport {
    pub cycle: CycleId,
    /// One size per requested item, same order. May be empty when `itemSize` is fixed.
    pub sizes: Vec<f64>,
}

/// What the host must apply after a render or a buffer change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Adjustment {
    /// Every element was dropped (reload); the host clears its items.
    pub reset: bool,
    /// Indexes evicted from the buffer.
    pub clipped: Vec<i64>,
    /// Indexes removed by a command; items after them were reindexed.
    pub removed: Vec<i64>,
    /// Scroll position written by the engine. Echo it back through [`Workflow::on_scroll`]; the
    /// echo is recognized and not treated as user input.
    pub synthetic_scroll: Option<f64>,
    pub viewport: ViewportState,
}

/// What the host should do next.
#[derive(Debug)]
pub enum Step<T> {
    /// Nothing in flight.
    Idle,
    /// Waiting on the datasource.
    Fetching,
    /// Waiting on [`Workflow::complete_render`].
    AwaitingRender,
    Render(RenderRequest<T>),
    Changed(Adjustment),
    /// Move the host scroll container to this position.
    Scroll(f64),
    /// The current cycle was aborted.
    Failed(WorkflowError),
    Disposed,
}

#[derive(Clone, Copy, Debug)]
struct FetchPlan {
    direction: Direction,
    start: i64,
    count: usize,
}

struct PendingFetch<T> {
    plan: FetchPlan,
    future: BoxFuture<'static, FetchResult<T>>,
}

#[derive(Clone, Debug)]
struct PendingRender {
    cycle: CycleId,
    direction: Direction,
    kind: RenderKind,
    indexes: Vec<i64>,
    /// Index of the first on-screen item before layout and its offset from the viewport start.
    anchor: Option<(i64, f64)>,
    /// Extent the item occupied before a refresh.
    previous_extent: f64,
}

enum Phase<T> {
    Idle,
    Fetching(PendingFetch<T>),
    Rendering(PendingRender),
}

/// Per-loop scratch carried from render through end.
#[derive(Debug, Default)]
struct LoopScratch {
    render: Option<PendingRender>,
    extent: f64,
    /// The loop changed something the fetch planner can see.
    progressed: bool,
    /// Evicted by clip; moved into the paddings once adapt has reconciled the new content.
    clipped: Clipped,
    adjustment: Adjustment,
}

/// The virtual scrolling engine.
///
/// A workflow exclusively owns its [`Buffer`] and [`Viewport`] and drives them through the
/// `scroll → fetch → render → clip → adapt → end` pipeline. At most one fetch+render cycle is
/// in flight; scroll events arriving meanwhile only move the viewport, and the need for more
/// content is re-evaluated when the cycle ends.
///
/// The workflow is host-driven and never spawns. A typical host loop:
/// - call [`Workflow::initialize`] once the viewport size is known;
/// - feed scroll events to [`Workflow::on_scroll`];
/// - call [`Workflow::pump`] (or await [`Workflow::next_step`]) and act on the [`Step`]:
///   lay out [`Step::Render`] items and report back through [`Workflow::complete_render`],
///   apply [`Step::Changed`] / [`Step::Scroll`], surface [`Step::Failed`].
pub struct Workflow<T> {
    fetcher: Fetcher<T>,
    settings: Settings,
    dev: DevSettings,
    buffer: Buffer<T>,
    viewport: Viewport,
    state: WorkflowState,
    phase: Phase<T>,
    scratch: LoopScratch,
    /// Direction of the last user scroll; nulled by reload.
    scroll_direction: Option<Direction>,

    signals: Signals<T>,
    first_tracking: Arc<TrackingFlag>,
    last_tracking: Arc<TrackingFlag>,
    gate: Gate<T>,
    adapter: AdapterContext<T>,
    gateway_tx: mpsc::UnboundedSender<Command<T>>,
    gateway: mpsc::UnboundedReceiver<Command<T>>,
    deferred: VecDeque<Command<T>>,
    outbox: VecDeque<Step<T>>,
}

impl<T> core::fmt::Debug for Workflow<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Workflow")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("viewport", &self.viewport)
            .field("buffer_len", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Workflow<T> {
    /// Attaches a datasource.
    ///
    /// Contract violations are fatal and reported here; malformed settings are not (they are
    /// normalized to defaults).
    pub fn new(datasource: Datasource<T>) -> core::result::Result<Self, DatasourceError> {
        let fetcher = datasource.fetcher()?;
        let settings = datasource
            .settings
            .as_ref()
            .map(Settings::normalize)
            .unwrap_or_default();
        let dev = datasource.dev_settings.unwrap_or_default();
        Ok(Self::with_settings(fetcher, settings, dev))
    }

    /// Attaches the datasource produced by `factory`; a factory error is a contract violation.
    pub fn from_factory<E: core::fmt::Display>(
        factory: impl FnOnce() -> core::result::Result<Datasource<T>, E>,
    ) -> core::result::Result<Self, DatasourceError> {
        let datasource =
            factory().map_err(|e| DatasourceError::NotConstructible(e.to_string()))?;
        Self::new(datasource)
    }

    fn with_settings(fetcher: Fetcher<T>, settings: Settings, dev: DevSettings) -> Self {
        cycle_log!(
            dev,
            start_index = settings.start_index(),
            buffer_size = settings.buffer_size(),
            padding = settings.padding(),
            infinite = settings.infinite(),
            "Workflow::new"
        );
        let (adapter, gate) = AdapterContext::new();
        let (gateway_tx, gateway) = mpsc::unbounded_channel();
        let mut buffer = Buffer::new(settings.item_size());
        buffer.set_origin(settings.current_start_index());
        Self {
            fetcher,
            buffer,
            settings,
            dev,
            viewport: Viewport::default(),
            state: WorkflowState::default(),
            phase: Phase::Idle,
            scratch: LoopScratch::default(),
            scroll_direction: None,
            signals: Signals::new(),
            first_tracking: Arc::new(TrackingFlag::default()),
            last_tracking: Arc::new(TrackingFlag::default()),
            gate,
            adapter,
            gateway_tx,
            gateway,
            deferred: VecDeque::new(),
            outbox: VecDeque::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dev_settings(&self) -> DevSettings {
        self.dev
    }

    pub fn buffer(&self) -> &Buffer<T> {
        &self.buffer
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    /// A handle to the public facade. Valid before initialization.
    pub fn adapter(&self) -> AdapterContext<T> {
        self.adapter.clone()
    }

    pub fn viewport_state(&self) -> ViewportState {
        ViewportState {
            scroll_position: self.viewport.scroll_position(),
            size: self.viewport.size(),
            padding: self.viewport.padding(),
        }
    }

    /// Opens the adapter gate and runs the first cycle from the start index.
    pub fn initialize(&mut self, viewport_size: f64) -> Step<T> {
        if self.state.disposed {
            return Step::Disposed;
        }
        if !self.state.initialized {
            self.viewport.set_size(viewport_size);
            self.state.initialized = true;
            let live = Live::new(
                &self.signals,
                Arc::clone(&self.first_tracking),
                Arc::clone(&self.last_tracking),
                self.gateway_tx.clone(),
            );
            self.gate.send_replace(Some(Arc::new(live)));
            cycle_log!(self.dev, viewport_size, "Workflow::initialize");
            self.dispatch(ProcessSubject::next(Process::Init));
        }
        self.pump()
    }

    /// Tears everything down. In-flight fetches are dropped and the adapter reports
    /// uninitialized again; nothing runs afterwards.
    pub fn dispose(&mut self) {
        if self.state.disposed {
            return;
        }
        vdebug!(cycle = self.state.cycle.0, "Workflow::dispose");
        self.phase = Phase::Idle;
        self.scratch = LoopScratch::default();
        self.deferred.clear();
        self.outbox.clear();
        self.gateway.close();
        self.set_flags(false, false, false);
        self.state.disposed = true;
        self.state.initialized = false;
        self.state.process = None;
        self.gate.send_replace(None);
    }

    /// Feeds a scroll position reported by the host.
    ///
    /// Echoes of engine-written (synthetic) positions are swallowed. Otherwise the viewport
    /// moves and, unless a cycle is already pending, a new cycle starts if the window got close
    /// to the buffer edges.
    pub fn on_scroll(&mut self, position: f64) -> Step<T> {
        if self.state.disposed {
            return Step::Disposed;
        }
        if self.viewport.take_synthetic_echo(position) {
            vtrace!(position, "on_scroll: synthetic echo");
            return self.pump();
        }
        let previous = self.viewport.scroll_position();
        let applied = self.viewport.set_position(position);
        if applied > previous {
            self.scroll_direction = Some(Direction::Forward);
        } else if applied < previous {
            self.scroll_direction = Some(Direction::Backward);
        }
        self.update_visibility(false);
        if self.state.initialized {
            self.dispatch(ProcessSubject::next(Process::Scroll));
        }
        self.pump()
    }

    /// Updates the viewport size (e.g. on resize) and re-evaluates the need for content.
    pub fn set_viewport_size(&mut self, size: f64) -> Step<T> {
        if self.state.disposed {
            return Step::Disposed;
        }
        self.viewport.set_size(size);
        self.update_visibility(false);
        if self.state.initialized {
            self.dispatch(ProcessSubject::next(Process::Scroll));
        }
        self.pump()
    }

    /// Restarts from `index` (or the configured start index). Always wins over a pending
    /// cycle: its fetch is dropped and any late completion is discarded.
    pub fn reload(&mut self, index: Option<i64>) -> Step<T> {
        if self.state.disposed {
            return Step::Disposed;
        }
        self.run_reload(index);
        self.pump()
    }

    /// Advances the pipeline as far as possible without blocking.
    pub fn pump(&mut self) -> Step<T> {
        let mut cx = Context::from_waker(Waker::noop());
        match self.poll_step(&mut cx) {
            Poll::Ready(step) => step,
            Poll::Pending => Step::Fetching,
        }
    }

    /// Like [`Self::pump`], but waits for an in-flight fetch to settle.
    pub async fn next_step(&mut self) -> Step<T> {
        core::future::poll_fn(|cx| self.poll_step(cx)).await
    }

    pub fn poll_step(&mut self, cx: &mut Context<'_>) -> Poll<Step<T>> {
        if self.state.disposed {
            return Poll::Ready(Step::Disposed);
        }
        self.drain_commands();
        loop {
            if let Some(step) = self.outbox.pop_front() {
                return Poll::Ready(step);
            }
            let settled = match &mut self.phase {
                Phase::Idle => return Poll::Ready(Step::Idle),
                Phase::Rendering(_) => return Poll::Ready(Step::AwaitingRender),
                Phase::Fetching(pending) => match pending.future.poll_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(result) => result,
                },
            };
            let Phase::Fetching(pending) = core::mem::replace(&mut self.phase, Phase::Idle) else {
                continue;
            };
            self.on_fetched(pending.plan, settled);
        }
    }

    /// Applies the host's measurements for the pending render and runs clip, adapt and end.
    ///
    /// A report for a superseded cycle is discarded and yields an empty adjustment.
    pub fn complete_render(&mut self, report: RenderReport) -> Result<Adjustment> {
        if self.state.disposed {
            return Err(WorkflowError::Disposed);
        }
        let Phase::Rendering(pending) = &self.phase else {
            vwarn!(cycle = report.cycle.0, "complete_render: no render pending, discarded");
            return Ok(Adjustment::default());
        };
        if pending.cycle != report.cycle {
            vwarn!(
                cycle = report.cycle.0,
                current = pending.cycle.0,
                "complete_render: stale report discarded"
            );
            return Ok(Adjustment::default());
        }
        let sizes = self.resolve_sizes(&pending.indexes, report.sizes)?;
        let Phase::Rendering(pending) = core::mem::replace(&mut self.phase, Phase::Idle) else {
            return Ok(Adjustment::default());
        };

        let mut extent = 0.0;
        for (&index, &size) in pending.indexes.iter().zip(&sizes) {
            if self.buffer.materialize(index, size) {
                extent += size.max(0.0);
            }
        }
        self.viewport.set_items_extent(self.buffer.extent());
        cycle_log!(
            self.dev,
            cycle = pending.cycle.0,
            count = pending.indexes.len(),
            extent,
            "render complete"
        );
        self.scratch.progressed = extent > 0.0 || pending.kind == RenderKind::Refreshed;
        self.scratch.extent = extent;
        self.scratch.render = Some(pending);
        self.dispatch(ProcessSubject::next(Process::Render));

        let mut adjustment = core::mem::take(&mut self.scratch.adjustment);
        adjustment.viewport = self.viewport_state();
        Ok(adjustment)
    }

    fn resolve_sizes(&self, indexes: &[i64], sizes: Vec<f64>) -> Result<Vec<f64>> {
        if sizes.len() == indexes.len() {
            return Ok(sizes);
        }
        match self.buffer.fixed_size() {
            Some(fixed) if sizes.is_empty() => Ok(vec![fixed; indexes.len()]),
            _ => Err(WorkflowError::RenderMismatch {
                expected: indexes.len(),
                got: sizes.len(),
            }),
        }
    }

    /// The workflow's signal bus: every process reports completion here and the next one is
    /// chosen from it.
    fn dispatch(&mut self, subject: ProcessSubject) {
        process_log!(
            self.dev,
            process = %subject.process,
            status = ?subject.status,
            cycle = self.state.cycle.0,
            "process"
        );
        if self.state.disposed {
            return;
        }
        match (subject.process, subject.status) {
            (Process::Init | Process::Reload, ProcessStatus::Next) => self.start_cycle(true),
            (Process::Scroll, ProcessStatus::Next) => {
                if self.state.cycle_pending {
                    vtrace!("scroll: cycle pending, re-evaluated at end");
                } else {
                    self.start_cycle(false);
                }
            }
            (Process::Fetch, ProcessStatus::Next) => {}
            (Process::Render, ProcessStatus::Next) => self.run_clip(),
            (Process::Clip, ProcessStatus::Next) => self.run_adapt(),
            (Process::Adapt, ProcessStatus::Next) => self.run_end(),
            (Process::End, ProcessStatus::Next) => self.continue_or_finish(),
            (_, ProcessStatus::Error) => self.abort(),
            (_, ProcessStatus::Done) => self.finish(),
        }
    }

    fn start_cycle(&mut self, forced: bool) {
        let plan = self.plan_fetch();
        if plan.is_none() && !forced {
            self.state.process = Some(Process::Scroll);
            return;
        }
        self.state.cycle.bump();
        cycle_log!(self.dev, cycle = self.state.cycle.0, forced, "cycle start");
        self.state.loop_count = 0;
        self.set_flags(true, self.state.loop_pending, self.state.is_loading);
        match plan {
            Some(plan) => self.run_fetch(plan),
            None => self.dispatch(ProcessSubject::done(Process::End)),
        }
    }

    /// Decides what to fetch next, if anything.
    fn plan_fetch(&self) -> Option<FetchPlan> {
        let count = self.settings.buffer_size();
        if self.buffer.is_empty() {
            let start = self.settings.current_start_index();
            if !self.buffer.eof_edge().is_some_and(|edge| edge < start) {
                return Some(FetchPlan {
                    direction: Direction::Forward,
                    start,
                    count,
                });
            }
            if !self.buffer.bof_edge().is_some_and(|edge| edge >= start) {
                return Some(FetchPlan {
                    direction: Direction::Backward,
                    start: start - count as i64,
                    count,
                });
            }
            return None;
        }

        let margin = self.settings.padding() * self.viewport.size();
        let view_start = self.viewport.scroll_position();
        let view_end = view_start + self.viewport.size();
        let items_start = self.viewport.padding_size(Direction::Backward);
        let items_end = items_start + self.buffer.extent();

        let forward = !self.buffer.eof() && items_end < view_end + margin;
        let backward = !self.buffer.bof() && items_start > view_start - margin;
        let direction = match (forward, backward) {
            (true, true) => self.scroll_direction.unwrap_or(Direction::Forward),
            (true, false) => Direction::Forward,
            (false, true) => Direction::Backward,
            (false, false) => return None,
        };
        let (first, last) = self.buffer.first_index().zip(self.buffer.last_index())?;
        let start = match direction {
            Direction::Forward => last + 1,
            Direction::Backward => first - count as i64,
        };
        Some(FetchPlan {
            direction,
            start,
            count,
        })
    }

    fn run_fetch(&mut self, plan: FetchPlan) {
        self.state.process = Some(Process::Fetch);
        self.state.direction = Some(plan.direction);
        self.set_flags(true, true, true);
        cycle_log!(
            self.dev,
            cycle = self.state.cycle.0,
            direction = ?plan.direction,
            start = plan.start,
            count = plan.count,
            "fetch"
        );
        let future = self.fetcher.fetch(plan.start, plan.count);
        self.phase = Phase::Fetching(PendingFetch { plan, future });
    }

    fn on_fetched(&mut self, plan: FetchPlan, result: FetchResult<T>) {
        let mut payloads = match result {
            Ok(payloads) => payloads,
            Err(err) => {
                cycle_log!(self.dev, cycle = self.state.cycle.0, error = %err, "fetch failed");
                self.outbox.push_back(Step::Failed(err.into()));
                self.dispatch(ProcessSubject::error(Process::Fetch));
                return;
            }
        };
        payloads.truncate(plan.count);
        let got = payloads.len();
        self.buffer
            .record_fetch(plan.direction, plan.start, plan.count, got);
        self.dispatch(ProcessSubject::next(Process::Fetch));

        let first_index = match plan.direction {
            Direction::Forward => plan.start,
            Direction::Backward => plan.start + (plan.count - got) as i64,
        };
        let inserted = self.insert(first_index, payloads, plan.direction);
        if inserted.is_empty() {
            // Nothing to lay out. An empty response pinned an edge, so the planner moves on.
            self.scratch.progressed = got == 0;
            self.scratch.extent = 0.0;
            if let Some(position) = self.collapse_at_edge(plan.direction) {
                self.outbox.push_back(Step::Scroll(position));
            }
            self.run_end();
            return;
        }
        self.request_render(plan.direction, RenderKind::Fetched, inserted, 0.0);
    }

    fn insert(&mut self, first_index: i64, payloads: Vec<T>, direction: Direction) -> Vec<i64> {
        let estimate = self.buffer.estimated_size();
        let items = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Item::new(first_index + i as i64, payload, estimate))
            .collect();
        self.buffer.append(items, direction)
    }

    fn request_render(
        &mut self,
        direction: Direction,
        kind: RenderKind,
        indexes: Vec<i64>,
        previous_extent: f64,
    ) {
        let anchor = self.capture_anchor();
        let items = indexes
            .iter()
            .filter_map(|&index| self.buffer.get(index).map(Item::to_adapter))
            .collect();
        let pending = PendingRender {
            cycle: self.state.cycle,
            direction,
            kind,
            indexes,
            anchor,
            previous_extent,
        };
        self.outbox.push_back(Step::Render(RenderRequest {
            cycle: pending.cycle,
            direction,
            kind,
            items,
        }));
        self.state.process = Some(Process::Render);
        self.phase = Phase::Rendering(pending);
    }

    /// First laid-out item intersecting the viewport and its offset from the viewport start.
    fn capture_anchor(&self) -> Option<(i64, f64)> {
        let origin = self.viewport.padding_size(Direction::Backward);
        let start = self.viewport.scroll_position();
        let end = start + self.viewport.size();
        let (first, _) = self.buffer.visible_bounds(origin, start, end)?;
        let offset = origin + self.buffer.extent_before(first);
        Some((first, offset - start))
    }

    fn run_clip(&mut self) {
        self.state.process = Some(Process::Clip);
        let skip = self.settings.infinite()
            || self
                .scratch
                .render
                .as_ref()
                .is_none_or(|render| render.kind == RenderKind::Refreshed);
        if !skip {
            self.clip_outside_window();
        }
        self.dispatch(ProcessSubject::next(Process::Clip));
    }

    /// Evicts items that, once the viewport is reconciled, lie outside the viewport extended by
    /// `padding × size` on both sides. Positions are taken relative to the anchor, which
    /// reconciliation keeps in place on screen.
    fn clip_outside_window(&mut self) {
        let size = self.viewport.size();
        let margin = self.settings.padding() * size;
        let anchor = self.scratch.render.as_ref().and_then(|render| render.anchor);
        let origin = match anchor {
            Some((index, offset)) => offset - self.buffer.extent_before(index),
            None => {
                self.viewport.padding_size(Direction::Backward) - self.viewport.scroll_position()
            }
        };
        let Some((low, high)) = self.buffer.visible_bounds(origin, -margin, size + margin) else {
            return;
        };
        let clipped = self.buffer.clip(low..=high);
        if !clipped.is_empty() {
            cycle_log!(
                self.dev,
                count = clipped.indexes.len(),
                backward = clipped.backward,
                forward = clipped.forward,
                "clip"
            );
        }
        self.scratch.clipped = clipped;
    }

    fn run_adapt(&mut self) {
        self.state.process = Some(Process::Adapt);
        if let Some(render) = self.scratch.render.take() {
            match render.kind {
                RenderKind::Refreshed => {
                    // A new size is an intentional change of content length; nothing to reconcile.
                    vtrace!(
                        delta = self.scratch.extent - render.previous_extent,
                        "adapt: refreshed item"
                    );
                }
                RenderKind::Fetched | RenderKind::Inserted => {
                    let reconciled = self.viewport.reconcile(render.direction, self.scratch.extent);
                    let collapsed = [Direction::Backward, Direction::Forward]
                        .map(|direction| self.collapse_at_edge(direction));
                    if reconciled.is_some() || collapsed.iter().any(Option::is_some) {
                        self.scratch.adjustment.synthetic_scroll =
                            Some(self.viewport.scroll_position());
                    }
                }
            }
        }
        let clipped = core::mem::take(&mut self.scratch.clipped);
        if !clipped.is_empty() {
            self.viewport.absorb(Direction::Backward, clipped.backward);
            self.viewport.absorb(Direction::Forward, clipped.forward);
            self.viewport.set_items_extent(self.buffer.extent());
            self.scratch.adjustment.clipped.extend(clipped.indexes);
        }
        self.dispatch(ProcessSubject::next(Process::Adapt));
    }

    /// Drops the padding on `direction` once the dataset edge there is buffered.
    fn collapse_at_edge(&mut self, direction: Direction) -> Option<f64> {
        let at_edge = match direction {
            Direction::Forward => self.buffer.eof(),
            Direction::Backward => self.buffer.bof(),
        };
        if at_edge {
            self.viewport.collapse(direction)
        } else {
            None
        }
    }

    fn run_end(&mut self) {
        self.state.process = Some(Process::End);
        self.set_flags(self.state.cycle_pending, false, false);
        self.publish_buffer();
        self.update_visibility(false);
        self.dispatch(ProcessSubject::next(Process::End));
    }

    fn continue_or_finish(&mut self) {
        let progressed = core::mem::take(&mut self.scratch.progressed);
        if progressed {
            if let Some(plan) = self.plan_fetch() {
                self.state.loop_count += 1;
                vtrace!(loops = self.state.loop_count, "end: more content needed, looping");
                self.run_fetch(plan);
                return;
            }
        }
        self.dispatch(ProcessSubject::done(Process::End));
    }

    /// Aborts the pending cycle. The buffer is left as it was before the failed fetch.
    fn abort(&mut self) {
        self.phase = Phase::Idle;
        self.scratch = LoopScratch::default();
        self.state.process = Some(Process::End);
        self.finish();
    }

    fn finish(&mut self) {
        self.set_flags(false, false, false);
        self.state.process = Some(Process::Scroll);
        cycle_log!(
            self.dev,
            cycle = self.state.cycle.0,
            loops = self.state.loop_count,
            items = self.buffer.len(),
            "cycle end"
        );
        self.publish_buffer();
        self.update_visibility(false);
        while !self.state.cycle_pending {
            let Some(command) = self.deferred.pop_front() else {
                break;
            };
            self.execute(command);
        }
    }

    fn run_reload(&mut self, index: Option<i64>) {
        let position = self.viewport.scroll_position();
        let index = index.unwrap_or_else(|| self.settings.start_index());
        vdebug!(index, position, "reload");

        self.buffer.reset(true);
        self.viewport.reset();
        self.state.direction = None;
        self.scroll_direction = None;
        // Dropping the in-flight fetch cancels it; callback completions land nowhere.
        self.phase = Phase::Idle;
        self.scratch = LoopScratch::default();
        self.deferred.clear();
        self.outbox.clear();
        self.set_flags(false, false, false);
        self.settings.set_current_start_index(index);
        self.buffer.set_origin(index);

        self.outbox.push_back(Step::Changed(Adjustment {
            reset: true,
            viewport: self.viewport_state(),
            ..Adjustment::default()
        }));
        if position > 0.0 {
            self.viewport.mark_synthetic();
            self.outbox.push_back(Step::Scroll(0.0));
        }
        self.publish_buffer();
        self.update_visibility(true);
        self.state.process = Some(Process::Reload);
        if self.state.initialized {
            self.dispatch(ProcessSubject::next(Process::Reload));
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.gateway.try_recv() {
            if self.state.disposed {
                return;
            }
            match command {
                Command::Reload(index) => self.run_reload(index),
                command if self.state.cycle_pending => {
                    vtrace!(?command, "command deferred until cycle end");
                    self.deferred.push_back(command);
                }
                command => self.execute(command),
            }
        }
    }

    fn execute(&mut self, command: Command<T>) {
        vtrace!(?command, "execute");
        match command {
            Command::Reload(index) => self.run_reload(index),
            Command::SetScrollPosition(value) => {
                self.viewport.clear_synthetic();
                let applied = self.viewport.set_position(value);
                self.outbox.push_back(Step::Scroll(applied));
                self.update_visibility(false);
                self.dispatch(ProcessSubject::next(Process::Scroll));
            }
            Command::Append(payloads) => self.insert_command(payloads, Direction::Forward),
            Command::Prepend(payloads) => self.insert_command(payloads, Direction::Backward),
            Command::Remove(predicate) => {
                let removed = self.buffer.remove(predicate);
                if removed.indexes.is_empty() {
                    return;
                }
                self.viewport.set_items_extent(self.buffer.extent());
                let position = self.viewport.scroll_position();
                self.viewport.set_position(position);
                self.publish_buffer();
                self.update_visibility(true);
                self.outbox.push_back(Step::Changed(Adjustment {
                    removed: removed.indexes,
                    viewport: self.viewport_state(),
                    ..Adjustment::default()
                }));
                self.dispatch(ProcessSubject::next(Process::Scroll));
            }
            Command::Replace { index, data } => {
                let Some(item) = self.buffer.get_mut(index) else {
                    vdebug!(index, "replace: index not buffered");
                    return;
                };
                let previous_extent = item.laid_out_size();
                item.replace_payload(data);
                self.update_visibility(true);
                self.begin_command_cycle();
                self.request_render(
                    Direction::Forward,
                    RenderKind::Refreshed,
                    vec![index],
                    previous_extent,
                );
            }
        }
    }

    /// Inserts command-supplied items at the buffer edge on `direction`; the dataset edge on
    /// that side moves with them.
    fn insert_command(&mut self, payloads: Vec<T>, direction: Direction) {
        if payloads.is_empty() {
            return;
        }
        let count = payloads.len();
        let first_index = match direction {
            Direction::Forward => self
                .buffer
                .last_index()
                .map_or(self.settings.current_start_index(), |last| last + 1),
            Direction::Backward => self
                .buffer
                .first_index()
                .map_or(self.settings.current_start_index() - 1, |first| first)
                - count as i64,
        };
        self.buffer.shift_edges(direction, count);
        let inserted = self.insert(first_index, payloads, direction);
        self.begin_command_cycle();
        self.request_render(direction, RenderKind::Inserted, inserted, 0.0);
    }

    fn begin_command_cycle(&mut self) {
        self.state.cycle.bump();
        self.state.loop_count = 0;
        self.set_flags(true, true, true);
    }

    fn set_flags(&mut self, cycle_pending: bool, loop_pending: bool, is_loading: bool) {
        self.state.cycle_pending = cycle_pending;
        self.state.loop_pending = loop_pending;
        self.state.is_loading = is_loading;
        publish(&self.signals.cycle_pending, cycle_pending);
        publish(&self.signals.loop_pending, loop_pending);
        publish(&self.signals.is_loading, is_loading);
    }

    fn publish_buffer(&self) {
        publish(
            &self.signals.buffer,
            BufferState {
                items_count: self.buffer.visible_items_count(),
                bof: self.buffer.bof(),
                eof: self.buffer.eof(),
                first_index: self.buffer.first_index(),
                last_index: self.buffer.last_index(),
            },
        );
    }

    /// Maintains first/last visible items for whichever of them was asked for.
    fn update_visibility(&self, force: bool) {
        let first_tracking = self.first_tracking.get();
        let last_tracking = self.last_tracking.get();
        if first_tracking == Tracking::Unrequested && last_tracking == Tracking::Unrequested {
            return;
        }
        let start = self.viewport.scroll_position();
        let bounds = self.buffer.visible_bounds(
            self.viewport.padding_size(Direction::Backward),
            start,
            start + self.viewport.size(),
        );
        let item_at = |index: i64| self.buffer.get(index).map(Item::to_adapter);
        if first_tracking != Tracking::Unrequested {
            let first = bounds.and_then(|(first, _)| item_at(first));
            publish_item(&self.signals.first_visible, first, force);
            self.first_tracking.activate();
        }
        if last_tracking != Tracking::Unrequested {
            let last = bounds.and_then(|(_, last)| item_at(last));
            publish_item(&self.signals.last_visible, last, force);
            self.last_tracking.activate();
        }
    }
}

/// Items compare by index unless `force` is set (payload changes).
fn publish_item<T>(
    tx: &tokio::sync::watch::Sender<Option<ItemAdapter<T>>>,
    value: Option<ItemAdapter<T>>,
    force: bool,
) {
    tx.send_if_modified(|current| {
        let same = current.as_ref().map(|it| it.index) == value.as_ref().map(|it| it.index);
        if same && !force {
            return false;
        }
        *current = value;
        true
    });
}
