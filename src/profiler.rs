//! The runtime profiler: the four-operation public contract from
//! SPEC_FULL.md §4.2 (`begin_profile`/`end_profile`/`enter`/`leave`), backed
//! by a thread-local arena of in-progress call-path aggregates.
//!
//! Grounded on the teacher's `CallPathPool`/`CallPathTiming` arena in
//! `reqray::internal` (`Layer::new_span`/`on_enter`/`on_exit`/`on_close`):
//! the same index-into-a-`Vec` arena shape, the same "create child lazily,
//! aggregate in place, seal on root close" lifecycle. It differs from the
//! teacher in two ways forced by SPEC_FULL.md: (1) there is no `tracing`
//! span machinery here -- patched source calls these functions directly --
//! so entry/exit bookkeeping is explicit rather than riding on
//! `Layer::on_enter`/`on_exit`; (2) nodes retain the full sample vector
//! (via `crate::stats::Accumulator`) instead of only running sums, because
//! percentiles are part of the required output.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use quanta::{Clock, Instant};

use crate::error::Result;
use crate::sink::{Sink, SinkInput};
use crate::stats::Accumulator;
use crate::tree::{CallMetrics, Profile};

const SINK_BUFFER_SIZE: usize = 1024;

static NEXT_PROFILE_ID: AtomicU64 = AtomicU64::new(1);

struct GlobalState {
    sink: Mutex<Box<dyn Sink>>,
    default_label: Option<String>,
    clock: Clock,
}

static GLOBAL: OnceLock<Mutex<Option<GlobalState>>> = OnceLock::new();
static FALLBACK_CLOCK: OnceLock<Clock> = OnceLock::new();

fn global() -> &'static Mutex<Option<GlobalState>> {
    GLOBAL.get_or_init(|| Mutex::new(None))
}

/// One-time setup: sets the process-wide sink and default profile label.
/// Re-`init`ing an already-initialized profiler is refused; the existing
/// sink keeps running (SPEC_FULL.md §9: "do not permit re-Init within a
/// process").
pub fn init(sink: impl Sink + 'static, label: impl Into<Option<String>>) -> Result<()> {
    init_with_clock(sink, label, Clock::new())
}

/// Like [`init`], but with an explicit [`quanta::Clock`] -- the teacher's own
/// `Clock::mock()` facility, exposed here so callers (tests, benchmarks) get
/// deterministic per-enter/leave timestamps instead of the real clock.
pub fn init_with_clock(
    sink: impl Sink + 'static,
    label: impl Into<Option<String>>,
    clock: Clock,
) -> Result<()> {
    let mut guard = global().lock().expect("profiler global state poisoned");
    if guard.is_some() {
        tracing::warn!("profiler: init called while already initialized; ignoring");
        return Ok(());
    }
    let mut boxed: Box<dyn Sink> = Box::new(sink);
    boxed.open(SINK_BUFFER_SIZE)?;
    *guard = Some(GlobalState {
        sink: Mutex::new(boxed),
        default_label: label.into(),
        clock,
    });
    Ok(())
}

/// Flush and close the process-wide sink. Must not be called concurrently
/// with in-flight profile submissions.
pub fn shutdown() -> Result<()> {
    let mut guard = global().lock().expect("profiler global state poisoned");
    if let Some(state) = guard.take() {
        let mut sink = state.sink.into_inner().expect("sink mutex poisoned");
        sink.close()?;
    }
    Ok(())
}

fn sink_input() -> Option<SinkInput> {
    let guard = global().lock().expect("profiler global state poisoned");
    guard
        .as_ref()
        .map(|state| state.sink.lock().expect("sink mutex poisoned").input())
}

fn default_label() -> Option<String> {
    let guard = global().lock().expect("profiler global state poisoned");
    guard.as_ref().and_then(|state| state.default_label.clone())
}

/// The clock used to time the current thread's in-flight frames: the
/// process-wide clock set by `init`/`init_with_clock` if the profiler has
/// been initialized, otherwise a lazily-created real clock, so `enter`/
/// `leave` still time correctly even when no sink has been configured yet.
fn clock() -> Clock {
    let guard = global().lock().expect("profiler global state poisoned");
    if let Some(state) = guard.as_ref() {
        return state.clock.clone();
    }
    drop(guard);
    FALLBACK_CLOCK.get_or_init(Clock::new).clone()
}

struct ArenaNode {
    fn_name: String,
    accumulator: Accumulator,
    children: HashMap<String, usize>,
    /// Discovery order among siblings -- SPEC_FULL.md §3: "ordering among
    /// siblings reflects first-call order ... not sorted order".
    order: Vec<usize>,
}

impl ArenaNode {
    fn new(fn_name: String) -> Self {
        ArenaNode {
            fn_name,
            accumulator: Accumulator::new(),
            children: HashMap::new(),
            order: Vec::new(),
        }
    }
}

fn find_or_create_child(arena: &mut Vec<ArenaNode>, parent_idx: usize, name: &str) -> usize {
    if let Some(&idx) = arena[parent_idx].children.get(name) {
        return idx;
    }
    let idx = arena.len();
    arena.push(ArenaNode::new(name.to_string()));
    arena[parent_idx].children.insert(name.to_string(), idx);
    arena[parent_idx].order.push(idx);
    idx
}

fn seal_arena(arena: &[ArenaNode], idx: usize) -> CallMetrics {
    let node = &arena[idx];
    let nested_calls = node.order.iter().map(|&c| seal_arena(arena, c)).collect();
    CallMetrics::from_sealed(node.fn_name.clone(), node.accumulator.seal(), nested_calls)
}

struct Frame {
    idx: usize,
    start: Instant,
}

fn now() -> Instant {
    clock().now()
}

struct RootContext {
    id: u64,
    label: Option<String>,
    arena: Vec<ArenaNode>,
    stack: Vec<Frame>,
    /// Count of unmatched `begin_profile` calls -- lets a target function
    /// recursively re-enter itself without starting a second Profile tree.
    root_depth: usize,
}

thread_local! {
    static STATE: RefCell<Option<RootContext>> = const { RefCell::new(None) };
}

/// Injected at the entry of a user-target function: opens a new root
/// context on this thread of control (or, if one is already active --
/// e.g. the target recurses into itself -- behaves like [`enter`]).
pub fn begin_profile(name: &str) {
    STATE.with(|cell| {
        let mut state = cell.borrow_mut();
        match state.as_mut() {
            None => {
                let id = NEXT_PROFILE_ID.fetch_add(1, Ordering::Relaxed);
                *state = Some(RootContext {
                    id,
                    label: default_label(),
                    arena: vec![ArenaNode::new(name.to_string())],
                    stack: vec![Frame {
                        idx: 0,
                        start: now(),
                    }],
                    root_depth: 1,
                });
            }
            Some(ctx) => {
                ctx.root_depth += 1;
                enter_in(ctx, name);
            }
        }
    });
}

/// Injected at the entry of each transitively reachable function. No-op if
/// no root context is active on this thread.
pub fn enter(name: &str) {
    STATE.with(|cell| {
        let mut state = cell.borrow_mut();
        if let Some(ctx) = state.as_mut() {
            enter_in(ctx, name);
        }
    });
}

fn enter_in(ctx: &mut RootContext, name: &str) {
    let parent_idx = ctx.stack.last().expect("root context always has a frame").idx;
    let child_idx = find_or_create_child(&mut ctx.arena, parent_idx, name);
    ctx.stack.push(Frame {
        idx: child_idx,
        start: now(),
    });
}

/// Injected as the deferred counterpart of [`enter`]. Pops the current
/// node, stops its timer, and folds the duration into its accumulator. An
/// extra `leave()` with no matching `enter()` is tolerated as a no-op.
pub fn leave() {
    STATE.with(|cell| {
        let mut state = cell.borrow_mut();
        if let Some(ctx) = state.as_mut() {
            pop_frame(ctx);
        }
    });
}

fn pop_frame(ctx: &mut RootContext) {
    if let Some(frame) = ctx.stack.pop() {
        let duration = now() - frame.start;
        ctx.arena[frame.idx].accumulator.record(duration);
    }
}

/// Injected as the deferred counterpart of [`begin_profile`]. Unwinds any
/// remaining frames in LIFO order, seals the tree, and hands the finished
/// [`Profile`] to the sink. Clears the thread's root context.
pub fn end_profile() {
    let finished = STATE.with(|cell| {
        let mut state = cell.borrow_mut();
        let ctx = state.as_mut()?;

        if ctx.root_depth > 1 {
            ctx.root_depth -= 1;
            pop_frame(ctx);
            return None;
        }

        while ctx.stack.len() > 1 {
            pop_frame(ctx);
        }
        pop_frame(ctx); // close the root frame itself

        let ctx = state.take().expect("checked Some above");
        let metrics = seal_arena(&ctx.arena, 0);
        Some(Profile::new(ctx.id, ctx.label, metrics))
    });

    if let Some(profile) = finished {
        publish(profile);
    }
}

fn publish(profile: Profile) {
    match sink_input() {
        Some(input) => {
            if let Err(err) = input.try_send(profile) {
                tracing::warn!(error = %err, "profiler: sink queue full or closed, dropping profile");
            }
        }
        None => tracing::warn!("profiler: no sink configured, dropping finished profile"),
    }
}

/// RAII counterpart of [`leave`]: patched source binds this to a local so
/// that `leave()` runs on every return path, including panics -- the Rust
/// substitute for the original's `defer Leave()`.
#[must_use]
pub struct LeaveGuard(());

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        leave();
    }
}

pub fn leave_guard() -> LeaveGuard {
    LeaveGuard(())
}

/// RAII counterpart of [`end_profile`]: the Rust substitute for the
/// original's `defer EndProfile()`.
#[must_use]
pub struct EndProfileGuard(());

impl Drop for EndProfileGuard {
    fn drop(&mut self) {
        end_profile();
    }
}

pub fn end_profile_guard() -> EndProfileGuard {
    EndProfileGuard(())
}

/// RAII counterpart of [`shutdown`], bound at the top of `main` by the
/// bootstrap patch so the process-wide sink is always flushed on return,
/// including early returns and panics.
#[must_use]
pub struct ShutdownGuard(());

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Err(err) = shutdown() {
            tracing::error!(error = %err, "profiler: error while shutting down sink");
        }
    }
}

pub fn shutdown_guard() -> ShutdownGuard {
    ShutdownGuard(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::error::PrismError;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    /// Serializes tests against the process-wide `GLOBAL` singleton --
    /// mirrors the teacher's choice to collect call trees with a dedicated
    /// per-test subscriber rather than relying on process-wide state, which
    /// this crate's spec'd `init`/`shutdown` contract does not afford.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[derive(Clone, Default)]
    pub(crate) struct CollectingSink {
        store: Arc<StdMutex<Vec<Profile>>>,
        input: Arc<StdMutex<Option<SinkInput>>>,
    }

    impl CollectingSink {
        pub(crate) fn drain(&self) -> Vec<Profile> {
            std::mem::take(&mut self.store.lock().unwrap())
        }
    }

    impl Sink for CollectingSink {
        fn open(&mut self, buffer_size: usize) -> Result<()> {
            let (tx, rx) = std::sync::mpsc::sync_channel(buffer_size);
            *self.input.lock().unwrap() = Some(SinkInput::new(tx));
            let store = self.store.clone();
            std::thread::spawn(move || {
                for profile in rx.iter() {
                    store.lock().unwrap().push(profile);
                }
            });
            Ok(())
        }

        fn input(&self) -> SinkInput {
            self.input.lock().unwrap().clone().expect("open() not called")
        }

        fn close(&mut self) -> Result<()> {
            *self.input.lock().unwrap() = None;
            Ok(())
        }
    }

    fn with_fresh_profiler<R>(f: impl FnOnce(CollectingSink) -> R) -> R {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let _ = shutdown();
        let sink = CollectingSink::default();
        init(sink.clone(), None).unwrap();
        let result = f(sink);
        let _ = shutdown();
        result
    }

    #[test]
    fn single_leaf_target_has_one_node_and_positive_total_time() {
        with_fresh_profiler(|sink| {
            begin_profile("pkg.f");
            std::thread::sleep(Duration::from_micros(10));
            end_profile();

            let profiles = sink.drain();
            assert_eq!(profiles.len(), 1);
            let root = &profiles[0].target;
            assert_eq!(root.fn_name, "pkg.f");
            assert_eq!(root.invocations, 1);
            assert!(root.nested_calls.is_empty());
            assert!(root.total_time > Duration::ZERO);
        });
    }

    #[test]
    fn nested_calls_are_aggregated_under_one_child_node() {
        with_fresh_profiler(|sink| {
            begin_profile("f");
            enter("g");
            leave();
            enter("g");
            leave();
            end_profile();

            let profiles = sink.drain();
            let root = &profiles[0].target;
            assert_eq!(root.nested_calls.len(), 1);
            let g = &root.nested_calls[0];
            assert_eq!(g.fn_name, "g");
            assert_eq!(g.invocations, 2);
            assert!(g.total_time <= root.total_time);
        });
    }

    #[test]
    fn enter_without_begin_profile_is_a_no_op() {
        with_fresh_profiler(|sink| {
            enter("stray");
            leave();
            assert!(sink.drain().is_empty());
        });
    }

    #[test]
    fn extra_leave_is_tolerated() {
        with_fresh_profiler(|sink| {
            begin_profile("f");
            leave(); // closes f's own frame early
            leave(); // extra -- must not panic
            end_profile();
            assert_eq!(sink.drain().len(), 1);
        });
    }

    #[test]
    fn unbalanced_end_profile_unwinds_remaining_frames() {
        with_fresh_profiler(|sink| {
            begin_profile("f");
            enter("g");
            enter("h");
            // no matching leave() calls
            end_profile();

            let profiles = sink.drain();
            let root = &profiles[0].target;
            assert_eq!(root.nested_calls.len(), 1);
            assert_eq!(root.nested_calls[0].nested_calls.len(), 1);
        });
    }

    #[test]
    fn guards_run_on_drop_including_unwind() {
        with_fresh_profiler(|sink| {
            {
                let _end = end_profile_guard();
                begin_profile("f");
                {
                    let _leave = leave_guard();
                    enter("g");
                }
            }
            assert_eq!(sink.drain().len(), 1);
        });
    }

    #[test]
    fn reinit_while_active_is_refused_and_keeps_existing_sink() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let _ = shutdown();
        let first = CollectingSink::default();
        init(first.clone(), None).unwrap();

        let second = CollectingSink::default();
        // Per SPEC_FULL.md, re-init is refused silently (logged) rather
        // than returning an error that would abort an instrumented binary
        // mid-startup; the original sink keeps running.
        init(second, None).unwrap();

        begin_profile("f");
        end_profile();
        assert_eq!(first.drain().len(), 1);

        let _ = shutdown();
    }

    #[test]
    fn mock_clock_produces_deterministic_total_time() {
        // Mirrors the teacher's `test_simple` in `internal.rs`, which swaps
        // in a `quanta::Clock::mock()` so span durations are exact instead
        // of real elapsed time.
        let _guard = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let _ = shutdown();

        let (clock, mock) = Clock::mock();
        let sink = CollectingSink::default();
        init_with_clock(sink.clone(), None, clock).unwrap();

        begin_profile("f");
        mock.increment(1_000_000);
        end_profile();

        let profiles = sink.drain();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].target.total_time, Duration::from_nanos(1_000_000));

        let _ = shutdown();
    }

    #[allow(dead_code)]
    fn assert_sink_closed_error_display() {
        // Compile-time check that SinkClosed formats as expected wherever
        // the sink rejects a post-close enqueue.
        let _ = PrismError::SinkClosed.to_string();
    }
}
