use crate::*;

use std::sync::{Arc, Mutex};

use futures_util::{FutureExt, Stream, StreamExt};
use serde_json::json;

type Calls = Arc<Mutex<Vec<(i64, usize)>>>;

/// A direct datasource over `min..=max` whose payload is the index. Records every call.
fn range_source(min: i64, max: i64) -> (Datasource<i64>, Calls) {
    let calls: Calls = Arc::default();
    let log = Arc::clone(&calls);
    let datasource = Datasource::direct(move |index, count| {
        log.lock().unwrap().push((index, count));
        let end = index + count as i64 - 1;
        (index.max(min)..=end.min(max)).collect()
    });
    (datasource, calls)
}

/// Plays the host: lays every requested item out at `size`, echoes engine scroll writes, and
/// stops once the workflow waits on something other than a render.
fn drive(wf: &mut Workflow<i64>, mut step: Step<i64>, size: f64) -> Vec<RenderRequest<i64>> {
    let mut renders = Vec::new();
    for _ in 0..1_000 {
        step = match step {
            Step::Render(request) => {
                let report = RenderReport {
                    cycle: request.cycle,
                    sizes: vec![size; request.items.len()],
                };
                renders.push(request);
                let adjustment = wf.complete_render(report).unwrap();
                match adjustment.synthetic_scroll {
                    Some(position) => wf.on_scroll(position),
                    None => wf.pump(),
                }
            }
            Step::Scroll(position) => wf.on_scroll(position),
            Step::Changed(_) => wf.pump(),
            Step::Idle
            | Step::Fetching
            | Step::AwaitingRender
            | Step::Failed(_)
            | Step::Disposed => return renders,
        };
    }
    panic!("workflow did not settle");
}

fn indexes(buffer: &Buffer<i64>) -> Vec<i64> {
    buffer.iter().map(Item::index).collect()
}

fn payloads(buffer: &Buffer<i64>) -> Vec<i64> {
    buffer.iter().map(|it| *it.payload()).collect()
}

fn drain<S: Stream + Unpin>(stream: &mut S) -> Vec<S::Item> {
    let mut out = Vec::new();
    while let Some(Some(value)) = stream.next().now_or_never() {
        out.push(value);
    }
    out
}

/// Viewport 100, items of 20, dataset 1..=100, default settings.
fn settled_workflow() -> (Workflow<i64>, Calls) {
    let (datasource, calls) = range_source(1, 100);
    let mut wf = Workflow::new(datasource).unwrap();
    let step = wf.initialize(100.0);
    drive(&mut wf, step, 20.0);
    (wf, calls)
}

#[test]
fn settings_defaults() {
    let settings = Settings::default();
    assert_eq!(settings.start_index(), DEFAULT_START_INDEX);
    assert_eq!(settings.buffer_size(), DEFAULT_BUFFER_SIZE);
    assert_eq!(settings.padding(), DEFAULT_PADDING);
    assert_eq!(settings.item_size(), None);
    assert!(!settings.infinite());
    assert!(!settings.horizontal());
    assert!(!settings.window_viewport());
    assert_eq!(settings.viewport_element(), None);
    assert_eq!(Settings::normalize(&json!(null)), settings);
    assert_eq!(Settings::normalize(&json!("not an object")), settings);
}

#[test]
fn settings_malformed_values_fall_back() {
    let settings = Settings::normalize(&json!({
        "startIndex": false,
        "bufferSize": { "weird": true },
        "padding": "something",
        "itemSize": 1.5,
        "infinite": "something",
        "horizontal": null,
        "windowViewport": 1,
        "viewportElement": { "nodeType": 1 },
        "unknownKey": 42,
    }));
    assert_eq!(settings, Settings::default());

    let settings = Settings::normalize(&json!({ "bufferSize": 5.5 }));
    assert_eq!(settings.buffer_size(), DEFAULT_BUFFER_SIZE);
}

#[test]
fn settings_out_of_range_values_clamp_to_minimum() {
    let settings = Settings::normalize(&json!({
        "bufferSize": -1,
        "padding": -0.1,
        "itemSize": -5,
    }));
    assert_eq!(settings.buffer_size(), MIN_BUFFER_SIZE);
    assert_eq!(settings.padding(), MIN_PADDING);
    assert_eq!(settings.item_size(), Some(MIN_ITEM_SIZE));
}

#[test]
fn settings_valid_values_are_kept() {
    let settings = Settings::normalize(&json!({
        "startIndex": 90.0,
        "bufferSize": 12,
        "padding": 1.25,
        "itemSize": 30,
        "infinite": true,
        "horizontal": true,
        "windowViewport": true,
        "viewportElement": 7,
    }));
    assert_eq!(settings.start_index(), 90);
    assert_eq!(settings.current_start_index(), 90);
    assert_eq!(settings.buffer_size(), 12);
    assert_eq!(settings.padding(), 1.25);
    assert_eq!(settings.item_size(), Some(30));
    assert!(settings.infinite());
    assert!(settings.horizontal());
    assert!(settings.window_viewport());
    assert_eq!(settings.viewport_element(), Some(ViewportHandle(7)));
}

#[test]
fn settings_builders_clamp() {
    let settings = Settings::default()
        .with_start_index(-3)
        .with_buffer_size(0)
        .with_padding(-2.0)
        .with_item_size(Some(0));
    assert_eq!(settings.start_index(), -3);
    assert_eq!(settings.buffer_size(), MIN_BUFFER_SIZE);
    assert_eq!(settings.padding(), MIN_PADDING);
    assert_eq!(settings.item_size(), Some(MIN_ITEM_SIZE));
}

#[test]
fn datasource_without_get_is_rejected() {
    let err = Workflow::new(Datasource::<i64>::default()).unwrap_err();
    assert_eq!(err, DatasourceError::MissingGet);
    assert!(err.to_string().starts_with(INVALID_DATASOURCE_PREFIX));
}

#[test]
fn datasource_get_with_one_parameter_is_rejected() {
    let datasource = Datasource::new(Getter::Index(Arc::new(|index: i64| vec![index])));
    let err = Workflow::new(datasource).unwrap_err();
    assert_eq!(err, DatasourceError::GetArity { params: 1 });
    assert!(err.to_string().starts_with(INVALID_DATASOURCE_PREFIX));
}

#[test]
fn only_range_getters_become_fetchers() {
    use crate::datasource::Fetcher;

    let index = Getter::Index(Arc::new(|index: i64| vec![index]));
    assert_eq!(
        Fetcher::try_from(&index).err(),
        Some(DatasourceError::GetArity { params: 1 })
    );

    let direct = Getter::Direct(Arc::new(|index: i64, count: usize| {
        (index..index + count as i64).collect::<Vec<i64>>()
    }));
    let fetcher = Fetcher::try_from(&direct).unwrap();
    assert_eq!(fetcher.fetch(3, 2).now_or_never(), Some(Ok(vec![3, 4])));
}

#[test]
fn datasource_factory_error_is_rejected() {
    let err = Workflow::<i64>::from_factory(|| Err::<Datasource<i64>, _>("no backend")).unwrap_err();
    assert_eq!(
        err,
        DatasourceError::NotConstructible("no backend".to_string())
    );
    assert!(err.to_string().starts_with(INVALID_DATASOURCE_PREFIX));
    assert!(err.to_string().contains("no backend"));
}

#[test]
fn valid_datasource_attaches_with_its_settings() {
    let (datasource, calls) = range_source(1, 100);
    let datasource = datasource
        .with_settings(json!({ "startIndex": 10, "bufferSize": 3 }))
        .with_dev_settings(DevSettings::default().with_debug(true));
    let wf = Workflow::new(datasource).unwrap();
    assert_eq!(wf.settings().start_index(), 10);
    assert_eq!(wf.settings().buffer_size(), 3);
    assert!(wf.dev_settings().debug);
    assert!(!wf.is_initialized());
    assert!(calls.lock().unwrap().is_empty());

    let (datasource, _) = range_source(1, 100);
    assert!(Workflow::from_factory(|| Ok::<_, String>(datasource)).is_ok());
}

#[test]
fn buffer_append_skips_duplicates_and_keeps_order() {
    let mut buffer = Buffer::new(None);
    let items = (5..=7).map(|i| Item::new(i, i, 0.0)).collect();
    assert_eq!(buffer.append(items, Direction::Forward), vec![5, 6, 7]);

    let items = (3..=5).map(|i| Item::new(i, i, 0.0)).collect();
    assert_eq!(buffer.append(items, Direction::Backward), vec![3, 4]);
    assert_eq!(indexes(&buffer), vec![3, 4, 5, 6, 7]);
    assert_eq!(buffer.first_index(), Some(3));
    assert_eq!(buffer.last_index(), Some(7));

    // Nothing is laid out until measured.
    assert_eq!(buffer.extent(), 0.0);
    assert_eq!(buffer.visible_items_count(), 0);
    assert!(buffer.get(4).is_some_and(Item::is_invisible));
}

#[test]
fn buffer_short_fetches_pin_edges() {
    let mut buffer: Buffer<i64> = Buffer::new(None);
    buffer.record_fetch(Direction::Forward, 1, 5, 5);
    assert_eq!(buffer.eof_edge(), None);

    buffer.record_fetch(Direction::Forward, 6, 5, 2);
    assert_eq!(buffer.eof_edge(), Some(7));

    buffer.record_fetch(Direction::Backward, -4, 5, 0);
    assert_eq!(buffer.bof_edge(), Some(1));

    // bof/eof compare the edges against what is buffered.
    assert!(!buffer.bof());
    assert!(!buffer.eof());
    let items = (1..=7).map(|i| Item::new(i, i, 0.0)).collect();
    buffer.append(items, Direction::Forward);
    assert!(buffer.bof());
    assert!(buffer.eof());

    // A full page past a pinned edge means the dataset grew.
    buffer.record_fetch(Direction::Forward, 8, 5, 5);
    assert_eq!(buffer.eof_edge(), None);

    buffer.reset(true);
    assert!(buffer.is_empty());
    assert_eq!(buffer.bof_edge(), Some(1));
    buffer.reset(false);
    assert_eq!(buffer.bof_edge(), None);
}

#[test]
fn buffer_materialize_clip_and_bounds() {
    let mut buffer = Buffer::new(None);
    let items = (1..=6).map(|i| Item::new(i, i, 0.0)).collect();
    buffer.append(items, Direction::Forward);
    for index in 1..=6 {
        assert!(buffer.materialize(index, 10.0));
    }
    assert!(!buffer.materialize(42, 10.0));
    assert_eq!(buffer.extent(), 60.0);
    assert_eq!(buffer.estimated_size(), 10.0);
    assert_eq!(buffer.extent_before(3), 20.0);

    // Items span [0,10), [10,20), ...; [15, 35) touches 2..=4.
    assert_eq!(buffer.visible_bounds(0.0, 15.0, 35.0), Some((2, 4)));
    assert_eq!(buffer.visible_bounds(100.0, 15.0, 35.0), None);

    let clipped = buffer.clip(2..=4);
    assert_eq!(clipped.indexes, vec![1, 5, 6]);
    assert_eq!(clipped.backward, 10.0);
    assert_eq!(clipped.forward, 20.0);
    assert_eq!(indexes(&buffer), vec![2, 3, 4]);
}

#[test]
fn buffer_remove_reindexes_and_moves_eof() {
    let mut buffer = Buffer::new(Some(10));
    buffer.record_fetch(Direction::Forward, 1, 10, 5);
    let items = (1..=5).map(|i| Item::new(i, i * 10, 10.0)).collect();
    buffer.append(items, Direction::Forward);
    for index in 1..=5 {
        buffer.materialize(index, 10.0);
    }

    let removed = buffer.remove(|it| it.index() == 2 || it.index() == 4);
    assert_eq!(removed.indexes, vec![2, 4]);
    assert_eq!(removed.extent, 20.0);
    assert_eq!(indexes(&buffer), vec![1, 2, 3]);
    assert_eq!(payloads(&buffer), vec![10, 30, 50]);
    assert_eq!(buffer.eof_edge(), Some(3));
    assert!(buffer.eof());
}

#[test]
fn viewport_forward_content_replaces_forward_padding() {
    let mut viewport = Viewport::new(100.0);
    viewport.set_items_extent(200.0);
    viewport.set_padding_size(Direction::Forward, 300.0);
    viewport.set_position(50.0);

    // 100 of new content lands after the items.
    viewport.set_items_extent(300.0);
    assert_eq!(viewport.reconcile(Direction::Forward, 100.0), None);
    assert_eq!(viewport.padding_size(Direction::Forward), 200.0);
    assert_eq!(viewport.scroll_position(), 50.0);
}

#[test]
fn viewport_backward_overflow_moves_scroll_position() {
    let mut viewport = Viewport::new(100.0);
    viewport.set_padding_size(Direction::Backward, 40.0);
    viewport.set_padding_size(Direction::Forward, 500.0);
    viewport.set_items_extent(200.0);
    viewport.set_position(40.0);

    viewport.set_items_extent(300.0);
    let synthetic = viewport.reconcile(Direction::Backward, 100.0);
    assert_eq!(viewport.padding_size(Direction::Backward), 0.0);
    assert_eq!(viewport.scroll_position(), 100.0);
    assert_eq!(synthetic, Some(100.0));
    assert_eq!(viewport.synthetic_position(), Some(100.0));
    assert_eq!(viewport.padding_size(Direction::Forward), 500.0);
}

#[test]
fn viewport_backward_absorbed_by_padding_keeps_position() {
    let mut viewport = Viewport::new(100.0);
    viewport.set_padding_size(Direction::Backward, 150.0);
    viewport.set_items_extent(200.0);
    viewport.set_position(160.0);

    viewport.set_items_extent(300.0);
    assert_eq!(viewport.reconcile(Direction::Backward, 100.0), None);
    assert_eq!(viewport.padding_size(Direction::Backward), 50.0);
    assert_eq!(viewport.scroll_position(), 160.0);
}

#[test]
fn viewport_backward_overshoot_grows_forward_padding() {
    let mut viewport = Viewport::new(150.0);
    viewport.set_items_extent(200.0);
    viewport.set_position(40.0);

    // Content the container does not know about yet: it can only reach 50, the remaining 90
    // becomes forward padding.
    assert_eq!(viewport.reconcile(Direction::Backward, 100.0), Some(140.0));
    assert_eq!(viewport.padding_size(Direction::Forward), 90.0);
    assert_eq!(viewport.scroll_position(), 140.0);
}

#[test]
fn viewport_backward_insert_into_content_shorter_than_viewport() {
    let mut viewport = Viewport::new(100.0);
    viewport.set_padding_size(Direction::Backward, 10.0);
    viewport.set_items_extent(50.0);

    // 50 of new content, 10 absorbed by padding: the rest scrolls the anchor down by 40.
    assert_eq!(viewport.reconcile(Direction::Backward, 50.0), Some(40.0));
    assert_eq!(viewport.scroll_position(), 40.0);
    assert_eq!(viewport.padding_size(Direction::Backward), 0.0);
    assert_eq!(viewport.padding_size(Direction::Forward), 90.0);
    assert_eq!(viewport.max_position(), 40.0);
}

#[test]
fn viewport_backward_reconcile_without_movement_is_not_synthetic() {
    let mut viewport = Viewport::new(100.0);
    viewport.set_padding_size(Direction::Backward, 30.0);
    viewport.set_items_extent(50.0);

    assert_eq!(viewport.reconcile(Direction::Backward, 30.0), None);
    assert_eq!(viewport.scroll_position(), 0.0);
    assert_eq!(viewport.synthetic_position(), None);
    assert!(!viewport.take_synthetic_echo(0.0));
}

#[test]
fn viewport_synthetic_echo_is_consumed_once() {
    let mut viewport = Viewport::new(100.0);
    viewport.set_items_extent(500.0);
    viewport.set_position(120.0);
    viewport.mark_synthetic();
    assert!(viewport.take_synthetic_echo(120.2));
    assert!(!viewport.take_synthetic_echo(120.0));
    assert_eq!(viewport.set_position(f64::NAN), 0.0);
    assert_eq!(viewport.set_position(1_000.0), 400.0);
}

#[test]
fn initial_cycle_fills_viewport_and_learns_bof() {
    let (wf, calls) = settled_workflow();
    assert_eq!(*calls.lock().unwrap(), vec![(1, 5), (6, 5), (-4, 5)]);

    // 1..=10 were fetched; 9 and 10 fall outside the viewport plus half a viewport of margin.
    assert_eq!(indexes(wf.buffer()), (1..=8).collect::<Vec<_>>());
    assert!(wf.buffer().bof());
    assert!(!wf.buffer().eof());
    assert_eq!(wf.viewport().padding(), Padding { backward: 0.0, forward: 40.0 });
    assert_eq!(wf.viewport().items_extent(), 160.0);
    assert_eq!(wf.viewport().scroll_position(), 0.0);

    let state = wf.state();
    assert!(state.initialized);
    assert!(!state.cycle_pending);
    assert!(!state.loop_pending);
    assert!(!state.is_loading);
    assert_eq!(state.process, Some(Process::Scroll));

    let adapter = wf.adapter();
    assert_eq!(adapter.items_count(), 8);
    assert!(adapter.bof());
    assert!(!adapter.eof());
}

#[test]
fn scroll_near_edge_fetches_forward() {
    let (mut wf, calls) = settled_workflow();
    let step = wf.on_scroll(30.0);
    assert!(matches!(step, Step::Render(ref request) if request.direction == Direction::Forward));
    assert_eq!(calls.lock().unwrap().last(), Some(&(9, 5)));
    drive(&mut wf, step, 20.0);

    assert_eq!(indexes(wf.buffer()), (1..=9).collect::<Vec<_>>());
    assert_eq!(wf.viewport().scroll_position(), 30.0);
    assert_eq!(wf.viewport().padding().forward, 80.0);
    assert_eq!(wf.viewport().content_extent(), 260.0);
}

#[test]
fn reload_resets_and_fetches_from_index() {
    let (mut wf, calls) = settled_workflow();
    let step = wf.on_scroll(30.0);
    drive(&mut wf, step, 20.0);
    assert_eq!(wf.viewport().scroll_position(), 30.0);

    let step = wf.reload(Some(50));
    assert!(matches!(step, Step::Changed(ref adjustment) if adjustment.reset));
    assert!(wf.buffer().is_empty());
    assert_eq!(wf.viewport().scroll_position(), 0.0);
    assert_eq!(wf.viewport().padding(), Padding::default());
    assert_eq!(wf.settings().current_start_index(), 50);
    assert_eq!(calls.lock().unwrap().last(), Some(&(50, 5)));
    // Learned edges survive a reload.
    assert_eq!(wf.buffer().bof_edge(), Some(1));

    assert!(matches!(wf.pump(), Step::Scroll(position) if position == 0.0));
    let step = wf.on_scroll(0.0);
    let Step::Render(request) = step else {
        panic!("expected a render");
    };
    assert_eq!(request.items.first().map(|it| it.index), Some(50));
}

#[test]
fn reload_through_adapter_runs_immediately() {
    let (mut wf, calls) = settled_workflow();
    let adapter = wf.adapter();
    adapter.reload(None).unwrap();
    let step = wf.pump();
    assert!(matches!(step, Step::Changed(ref adjustment) if adjustment.reset));
    assert_eq!(calls.lock().unwrap().last(), Some(&(1, 5)));
    assert_eq!(wf.state().direction, Some(Direction::Forward));
}

#[test]
fn instances_share_version_but_not_signals() {
    let (source_a, _) = range_source(1, 100);
    let (source_b, _) = range_source(1, 100);
    let mut a = Workflow::new(source_a).unwrap();
    let mut b = Workflow::new(source_b).unwrap();
    let adapter_a = a.adapter();
    let adapter_b = b.adapter();
    assert_eq!(adapter_a.version(), None);

    let step_a = a.initialize(100.0);
    let _ = b.initialize(100.0);
    assert_eq!(adapter_a.version(), adapter_b.version());
    assert_eq!(adapter_a.version(), Some(VERSION));

    let mut loading_a = adapter_a.is_loading_stream();
    let mut loading_b = adapter_b.is_loading_stream();
    assert_eq!(drain(&mut loading_a), vec![true]);
    assert_eq!(drain(&mut loading_b), vec![true]);

    drive(&mut a, step_a, 20.0);
    assert_eq!(drain(&mut loading_a), vec![false]);
    assert!(drain(&mut loading_b).is_empty());
    assert!(adapter_b.is_loading());
    assert!(!adapter_a.is_loading());
}

#[test]
fn first_visible_is_lazy() {
    let (mut wf, _) = settled_workflow();
    let adapter = wf.adapter();

    // The first read only switches tracking on.
    assert_eq!(adapter.first_visible(), None);
    assert_eq!(adapter.last_visible(), None);

    let _ = wf.on_scroll(0.0);
    assert_eq!(adapter.first_visible(), Some(ItemAdapter { index: 1, data: 1 }));
    assert_eq!(adapter.last_visible(), Some(ItemAdapter { index: 5, data: 5 }));

    let _ = wf.on_scroll(25.0);
    assert_eq!(adapter.first_visible().map(|it| it.index), Some(2));
}

#[test]
fn adapter_before_init_is_inert() {
    let (datasource, _) = range_source(1, 100);
    let wf = Workflow::new(datasource).unwrap();
    let adapter = wf.adapter();
    assert!(!adapter.is_initialized());
    assert!(!adapter.is_loading());
    assert_eq!(adapter.buffer_state(), BufferState::default());
    assert_eq!(adapter.first_visible(), None);
    assert_eq!(adapter.reload(None), Err(WorkflowError::NotInitialized));
}

#[test]
fn pre_init_stream_receives_one_live_value() {
    let pending: Arc<Mutex<Vec<Done<i64>>>> = Arc::default();
    let handles = Arc::clone(&pending);
    let datasource = Datasource::callback(move |_index, _count, done| {
        handles.lock().unwrap().push(done);
    });
    let mut wf = Workflow::new(datasource).unwrap();
    let adapter = wf.adapter();
    let mut loading = adapter.is_loading_stream();
    assert!(drain(&mut loading).is_empty());

    assert!(matches!(wf.initialize(100.0), Step::Fetching));
    assert_eq!(drain(&mut loading), vec![true]);
    assert!(drain(&mut loading).is_empty());
}

#[test]
fn pre_init_stream_ends_when_workflow_is_dropped() {
    let (datasource, _) = range_source(1, 100);
    let wf = Workflow::new(datasource).unwrap();
    let mut cycle = wf.adapter().cycle_pending_stream();
    drop(wf);
    assert_eq!(cycle.next().now_or_never(), Some(None));
}

#[test]
fn reload_discards_cancelled_callback_fetch() {
    let pending: Arc<Mutex<Vec<(i64, Done<i64>)>>> = Arc::default();
    let handles = Arc::clone(&pending);
    let datasource = Datasource::callback(move |index, _count, done| {
        handles.lock().unwrap().push((index, done));
    });
    let mut wf = Workflow::new(datasource).unwrap();
    assert!(matches!(wf.initialize(100.0), Step::Fetching));

    assert!(matches!(wf.reload(Some(20)), Step::Changed(_)));
    let (stale_index, stale) = pending.lock().unwrap().remove(0);
    assert_eq!(stale_index, 1);
    assert!(stale.is_cancelled());
    stale.success(vec![1, 2, 3, 4, 5]);
    assert!(matches!(wf.pump(), Step::Fetching));
    assert!(wf.buffer().is_empty());

    let (index, done) = pending.lock().unwrap().remove(0);
    assert_eq!(index, 20);
    done.success((20..25).collect());
    let Step::Render(request) = wf.pump() else {
        panic!("expected a render");
    };
    let rendered: Vec<i64> = request.items.iter().map(|it| it.index).collect();
    assert_eq!(rendered, vec![20, 21, 22, 23, 24]);
}

#[test]
fn abandoned_callback_fails_the_cycle() {
    let datasource = Datasource::callback(|_index, _count, done: Done<i64>| drop(done));
    let mut wf = Workflow::new(datasource).unwrap();
    let step = wf.initialize(100.0);
    assert!(matches!(
        step,
        Step::Failed(WorkflowError::Fetch(FetchError::Abandoned))
    ));
    assert!(!wf.state().cycle_pending);
    assert!(wf.buffer().is_empty());
}

#[test]
fn fetch_error_aborts_cycle_and_keeps_buffer() {
    let datasource = Datasource::future(|index: i64, count: usize| async move {
        if index > 5 {
            Err(FetchError::failed("boom"))
        } else {
            Ok((index..index + count as i64).collect::<Vec<i64>>())
        }
    });
    let mut wf = Workflow::new(datasource).unwrap();
    let step = wf.initialize(100.0);
    let renders = drive(&mut wf, step, 20.0);
    assert_eq!(renders.len(), 1);

    // The loop's second fetch (from 6) failed; drive stopped on it.
    let adapter = wf.adapter();
    assert_eq!(indexes(wf.buffer()), vec![1, 2, 3, 4, 5]);
    assert!(!wf.state().cycle_pending);
    assert!(!wf.state().is_loading);
    assert!(!adapter.is_loading());
    assert_eq!(wf.state().process, Some(Process::Scroll));
    assert!(matches!(wf.pump(), Step::Idle));
}

#[test]
fn render_report_is_checked() {
    let (datasource, _) = range_source(1, 100);
    let mut wf = Workflow::new(datasource).unwrap();
    let Step::Render(request) = wf.initialize(100.0) else {
        panic!("expected a render");
    };

    let stale = RenderReport {
        cycle: CycleId(request.cycle.0 + 7),
        sizes: vec![20.0; 5],
    };
    assert_eq!(wf.complete_render(stale), Ok(Adjustment::default()));
    assert!(matches!(wf.pump(), Step::AwaitingRender));

    let short = RenderReport {
        cycle: request.cycle,
        sizes: vec![20.0; 2],
    };
    assert_eq!(
        wf.complete_render(short),
        Err(WorkflowError::RenderMismatch {
            expected: 5,
            got: 2
        })
    );
    assert!(matches!(wf.pump(), Step::AwaitingRender));
}

#[test]
fn fixed_item_size_allows_empty_report() {
    let (datasource, _) = range_source(1, 100);
    let datasource = datasource.with_settings(json!({ "itemSize": 25 }));
    let mut wf = Workflow::new(datasource).unwrap();
    let Step::Render(request) = wf.initialize(100.0) else {
        panic!("expected a render");
    };
    let adjustment = wf
        .complete_render(RenderReport {
            cycle: request.cycle,
            sizes: Vec::new(),
        })
        .unwrap();
    assert_eq!(wf.buffer().extent(), 125.0);
    assert_eq!(adjustment.viewport.size, 100.0);
}

#[test]
fn zero_size_render_ends_cycle() {
    let (datasource, calls) = range_source(1, 100);
    let mut wf = Workflow::new(datasource).unwrap();
    let step = wf.initialize(100.0);
    drive(&mut wf, step, 0.0);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert!(!wf.state().cycle_pending);
}

#[test]
fn infinite_mode_never_clips() {
    let (datasource, _) = range_source(1, 100);
    let datasource = datasource.with_settings(json!({ "infinite": true }));
    let mut wf = Workflow::new(datasource).unwrap();
    let step = wf.initialize(100.0);
    drive(&mut wf, step, 20.0);
    assert_eq!(indexes(wf.buffer()), (1..=10).collect::<Vec<_>>());
    assert_eq!(wf.viewport().padding().forward, 0.0);
}

#[test]
fn short_dataset_reaches_both_edges() {
    let (datasource, _) = range_source(1, 3);
    let mut wf = Workflow::new(datasource).unwrap();
    let step = wf.initialize(100.0);
    drive(&mut wf, step, 20.0);
    assert!(wf.buffer().bof());
    assert!(wf.buffer().eof());
    assert_eq!(wf.viewport().content_extent(), 60.0);
    assert_eq!(wf.viewport().max_position(), 0.0);
}

#[test]
fn empty_dataset_reports_both_edges() {
    let (datasource, calls) = range_source(1, 0);
    let mut wf = Workflow::new(datasource).unwrap();
    let adapter = wf.adapter();
    let step = wf.initialize(100.0);
    assert!(drive(&mut wf, step, 20.0).is_empty());

    assert_eq!(*calls.lock().unwrap(), vec![(1, 5), (-4, 5)]);
    assert!(wf.buffer().is_empty());
    assert!(wf.buffer().bof());
    assert!(wf.buffer().eof());
    assert!(adapter.bof());
    assert!(adapter.eof());
    assert_eq!(adapter.items_count(), 0);
}

#[test]
fn empty_buffer_places_learned_edges_around_its_origin() {
    let mut buffer: Buffer<i64> = Buffer::new(None);
    buffer.set_origin(10);
    buffer.record_fetch(Direction::Forward, 10, 5, 0);
    assert_eq!(buffer.eof_edge(), Some(9));
    assert!(buffer.eof());
    assert!(!buffer.bof());

    buffer.record_fetch(Direction::Backward, 5, 5, 5);
    assert!(!buffer.bof());

    // Reloading into the dataset: items exist from the new origin on.
    buffer.set_origin(3);
    assert!(!buffer.eof());
    assert!(!buffer.bof());
}

#[test]
fn commands_during_a_cycle_are_deferred() {
    let (datasource, _) = range_source(1, 3);
    let mut wf = Workflow::new(datasource).unwrap();
    let adapter = wf.adapter();
    let step = wf.initialize(100.0);
    assert!(matches!(step, Step::Render(_)));

    adapter.append(vec![99]).unwrap();
    assert!(matches!(wf.pump(), Step::AwaitingRender));
    assert_eq!(wf.buffer().len(), 3);

    let renders = drive(&mut wf, step, 20.0);
    let inserted = renders
        .iter()
        .find(|request| request.kind == RenderKind::Inserted)
        .unwrap();
    assert_eq!(inserted.items, vec![ItemAdapter { index: 4, data: 99 }]);
    assert_eq!(payloads(wf.buffer()), vec![1, 2, 3, 99]);
    assert!(wf.buffer().eof());
    assert_eq!(adapter.buffer_state().last_index, Some(4));
}

#[test]
fn prepend_and_remove_commands() {
    let (datasource, _) = range_source(1, 3);
    let mut wf = Workflow::new(datasource).unwrap();
    let adapter = wf.adapter();
    let step = wf.initialize(100.0);
    drive(&mut wf, step, 20.0);

    adapter.prepend(vec![-1, 0]).unwrap();
    let step = wf.pump();
    assert!(
        matches!(step, Step::Render(ref request) if request.direction == Direction::Backward)
    );
    drive(&mut wf, step, 20.0);
    assert_eq!(indexes(wf.buffer()), vec![-1, 0, 1, 2, 3]);
    assert!(wf.buffer().bof());

    adapter.remove(|item| item.payload() % 2 == 0).unwrap();
    let Step::Changed(adjustment) = wf.pump() else {
        panic!("expected a buffer change");
    };
    assert_eq!(adjustment.removed, vec![0, 2]);
    assert_eq!(payloads(wf.buffer()), vec![-1, 1, 3]);
    assert_eq!(indexes(wf.buffer()), vec![-1, 0, 1]);
    assert_eq!(wf.viewport().items_extent(), 60.0);
}

#[test]
fn replace_command_refreshes_one_item() {
    let (mut wf, _) = settled_workflow();
    let adapter = wf.adapter();
    adapter.replace(2, 200).unwrap();
    let Step::Render(request) = wf.pump() else {
        panic!("expected a render");
    };
    assert_eq!(request.kind, RenderKind::Refreshed);
    assert_eq!(request.items, vec![ItemAdapter { index: 2, data: 200 }]);

    wf.complete_render(RenderReport {
        cycle: request.cycle,
        sizes: vec![30.0],
    })
    .unwrap();
    assert_eq!(wf.buffer().get(2).map(|it| *it.payload()), Some(200));
    assert_eq!(wf.viewport().items_extent(), 170.0);
}

#[test]
fn set_scroll_position_command_moves_viewport() {
    let (mut wf, _) = settled_workflow();
    wf.adapter().set_scroll_position(1_000.0).unwrap();
    let step = wf.pump();
    // Clamped to the scrollable range: 200 of content in a 100 viewport.
    assert!(matches!(step, Step::Scroll(position) if position == 100.0));
    assert_eq!(wf.viewport().scroll_position(), 100.0);
}

#[test]
fn dispose_tears_everything_down() {
    let pending: Arc<Mutex<Vec<Done<i64>>>> = Arc::default();
    let handles = Arc::clone(&pending);
    let datasource = Datasource::callback(move |_index, _count, done| {
        handles.lock().unwrap().push(done);
    });
    let mut wf = Workflow::new(datasource).unwrap();
    let adapter = wf.adapter();
    let _ = wf.initialize(100.0);
    assert!(adapter.is_initialized());

    wf.dispose();
    assert!(!wf.is_initialized());
    assert!(!adapter.is_initialized());
    assert_eq!(adapter.version(), None);
    assert!(pending.lock().unwrap()[0].is_cancelled());
    assert_eq!(adapter.append(vec![1]), Err(WorkflowError::NotInitialized));
    assert!(matches!(wf.pump(), Step::Disposed));
    assert!(matches!(wf.initialize(100.0), Step::Disposed));
    assert_eq!(
        wf.complete_render(RenderReport::default()),
        Err(WorkflowError::Disposed)
    );
}

#[test]
fn tracking_flag_transitions() {
    let flag = crate::state::TrackingFlag::default();
    assert_eq!(flag.get(), Tracking::Unrequested);
    assert_eq!(flag.request(), Tracking::Unrequested);
    assert_eq!(flag.request(), Tracking::Requested);
    flag.activate();
    assert_eq!(flag.request(), Tracking::Active);
}

#[tokio::test]
async fn future_getter_is_awaited() {
    let datasource = Datasource::future(|index: i64, count: usize| async move {
        tokio::task::yield_now().await;
        Ok((index..index + count as i64).collect::<Vec<i64>>())
    });
    let mut wf = Workflow::new(datasource).unwrap();
    assert!(matches!(wf.initialize(100.0), Step::Fetching));

    let Step::Render(request) = wf.next_step().await else {
        panic!("expected a render");
    };
    assert_eq!(request.items.len(), 5);
    assert_eq!(request.kind, RenderKind::Fetched);
}

#[tokio::test]
async fn stream_getter_uses_first_emission() {
    let datasource = Datasource::stream(|index: i64, count: usize| {
        futures_util::stream::iter(vec![
            Ok((index..index + count as i64).collect::<Vec<i64>>()),
            Err(FetchError::failed("ignored")),
        ])
    });
    let mut wf = Workflow::new(datasource).unwrap();
    let Step::Render(request) = wf.initialize(100.0) else {
        panic!("expected a render");
    };
    assert_eq!(request.items.len(), 5);
    assert!(matches!(wf.next_step().await, Step::AwaitingRender));
}
