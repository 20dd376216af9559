//! The overlay state machine.
//!
//! Owns the active timestamp window, the aggregate of every event loaded for
//! it, and the view mode. Each transition computes the next rendered set,
//! diffs it against the previous one, and hands the diff to the renderer.
//!
//! ```text
//!   EMPTY ──step→──▶ LOADING ──ok──▶ READY ◀──toggle_mask──▶ MASKED
//!     ▲                 │ err            │                      │
//!     │                 ▼                │ step→ (unmask first) │
//!     └──reset── prior steady state ◀────┘◀─────────────────────┘
//! ```
//!
//! The aggregate is stored unfiltered; selection and mask only shape the
//! rendered view. Loads are stamped with a generation so that a result
//! arriving after `reset()` is dropped instead of applied.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Instrument;

use crate::diff::{Diff, RenderedEvent, Style, compute_diff, dedup_by_id};
use crate::error::{OverlayError, Result};
use crate::event::{EventId, EventRecord};
use crate::render::{Projection, Renderer, Unprojected};
use crate::selection::SelectionSet;
use crate::source::BatchSource;
use crate::timestamp::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayState {
    Empty,
    Loading,
    Ready,
    Masked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Result of a step that did not fail.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// The window changed; this diff was handed to the renderer.
    Rendered(Diff),
    /// Backward step on an empty window. Nothing changed.
    Underflow,
    /// The load resolved after a `reset()` and was dropped.
    Discarded,
}

/// Which records survive the mask.
#[derive(Clone, Default)]
pub enum MaskPredicate {
    /// Records whose category is selected.
    #[default]
    Selection,
    /// The given event plus every event sharing an actor with it.
    Related(EventId),
    Custom(Arc<dyn Fn(&EventRecord) -> bool + Send + Sync>),
}

impl fmt::Debug for MaskPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskPredicate::Selection => write!(f, "Selection"),
            MaskPredicate::Related(id) => write!(f, "Related({id})"),
            MaskPredicate::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Fail a backward step on a cache miss instead of rendering the batch as empty.
    pub strict_cache: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            strict_cache: cfg!(debug_assertions),
        }
    }
}

/// Unmasked settled states. A load always starts from, and falls back to, one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Steady {
    Empty,
    Ready,
}

enum Phase {
    Steady(Steady),
    Masked(MaskPredicate),
    Loading { prior: Steady, generation: u64 },
}

struct Inner<R> {
    phase: Phase,
    window: Vec<Timestamp>,
    aggregate: Vec<EventRecord>,
    rendered: Vec<RenderedEvent>,
    selection: SelectionSet,
    generation: u64,
    renderer: R,
    projection: Arc<dyn Projection>,
}

impl<R: Renderer> Inner<R> {
    fn state(&self) -> OverlayState {
        match self.phase {
            Phase::Steady(Steady::Empty) => OverlayState::Empty,
            Phase::Steady(Steady::Ready) => OverlayState::Ready,
            Phase::Masked(_) => OverlayState::Masked,
            Phase::Loading { .. } => OverlayState::Loading,
        }
    }

    fn steady(&self) -> Steady {
        match self.phase {
            Phase::Steady(s) | Phase::Loading { prior: s, .. } => s,
            Phase::Masked(_) => Steady::Ready,
        }
    }

    fn selection_style(&self, record: &EventRecord) -> Style {
        if self.selection.is_selected(record) {
            Style::Selected
        } else {
            Style::Dimmed
        }
    }

    /// The rendered set for the current phase.
    fn view(&self) -> Vec<RenderedEvent> {
        let events = match &self.phase {
            Phase::Masked(mask) => {
                let anchor = match mask {
                    MaskPredicate::Related(id) => self.aggregate.iter().find(|r| r.id == *id),
                    _ => None,
                };
                self.aggregate
                    .iter()
                    .filter(|r| match mask {
                        MaskPredicate::Selection => self.selection.is_selected(r),
                        MaskPredicate::Related(id) => {
                            r.id == *id || anchor.is_some_and(|a| a.shares_actor(r))
                        }
                        MaskPredicate::Custom(keep) => keep(r),
                    })
                    .map(|r| RenderedEvent {
                        record: r.clone(),
                        style: self.selection_style(r),
                        highlighted: true,
                    })
                    .collect()
            }
            _ => self
                .aggregate
                .iter()
                .map(|r| RenderedEvent {
                    record: r.clone(),
                    style: self.selection_style(r),
                    highlighted: false,
                })
                .collect(),
        };
        dedup_by_id(events)
    }

    fn emit(&mut self, next: Vec<RenderedEvent>) -> Diff {
        let diff = compute_diff(&self.rendered, &next);
        self.rendered = next;
        let (enter, update, exit) = diff.counts();
        tracing::debug!(enter, update, exit, "render diff");
        self.renderer.render(&diff, self.projection.as_ref());
        diff
    }

    fn unmask(&mut self) -> Diff {
        self.phase = Phase::Steady(Steady::Ready);
        tracing::info!("unmasked");
        let next = self.view();
        self.emit(next)
    }

    fn push(&mut self, timestamp: Timestamp, batch: &[EventRecord]) -> Diff {
        if self.window.contains(&timestamp) {
            tracing::debug!(%timestamp, "timestamp already in window; pushing again");
        }
        self.aggregate.extend_from_slice(batch);
        self.window.push(timestamp);
        self.phase = Phase::Steady(Steady::Ready);
        let next = self.view();
        self.emit(next)
    }
}

/// Temporal event-overlay controller over a memoizing batch source.
///
/// All methods take `&self`; the lock is never held across the load await,
/// so `reset()` and selection changes may interleave with a pending step.
pub struct OverlayController<S, R> {
    source: S,
    inner: Mutex<Inner<R>>,
    config: ControllerConfig,
    span: tracing::Span,
}

impl<S: BatchSource, R: Renderer> OverlayController<S, R> {
    pub fn new(source: S, renderer: R) -> Self {
        Self {
            source,
            inner: Mutex::new(Inner {
                phase: Phase::Steady(Steady::Empty),
                window: Vec::new(),
                aggregate: Vec::new(),
                rendered: Vec::new(),
                selection: SelectionSet::all(),
                generation: 0,
                renderer,
                projection: Arc::new(Unprojected),
            }),
            config: ControllerConfig::default(),
            span: tracing::info_span!("overlay"),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the span every controller operation is logged under.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn set_projection(&self, projection: Arc<dyn Projection>) {
        self.inner.lock().projection = projection;
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn state(&self) -> OverlayState {
        self.inner.lock().state()
    }

    pub fn window(&self) -> Vec<Timestamp> {
        self.inner.lock().window.clone()
    }

    /// The unfiltered aggregate, in load order.
    pub fn aggregate(&self) -> Vec<EventRecord> {
        self.inner.lock().aggregate.clone()
    }

    pub fn aggregate_ids(&self) -> HashSet<EventId> {
        self.inner.lock().aggregate.iter().map(|r| r.id).collect()
    }

    /// What the renderer currently shows.
    pub fn rendered(&self) -> Vec<RenderedEvent> {
        self.inner.lock().rendered.clone()
    }

    pub fn selection(&self) -> SelectionSet {
        self.inner.lock().selection.clone()
    }

    /// Clear the window and aggregate; any in-flight load becomes stale.
    /// The selection is kept. Returns the diff that exits everything rendered.
    pub fn reset(&self) -> Diff {
        self.span.in_scope(|| {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.window.clear();
            inner.aggregate.clear();
            inner.phase = Phase::Steady(Steady::Empty);
            tracing::info!(generation = inner.generation, "reset");
            inner.emit(Vec::new())
        })
    }

    pub async fn step(&self, timestamp: Timestamp, direction: Direction) -> Result<StepOutcome, S::Error> {
        match direction {
            Direction::Forward => {
                self.step_forward(timestamp)
                    .instrument(self.span.clone())
                    .await
            }
            Direction::Backward => self.span.in_scope(|| {
                tracing::debug!(%timestamp, "backward step requested");
                self.step_back()
            }),
        }
    }

    /// Push `timestamp` onto the window, loading its batch if it is not cached.
    pub async fn step_forward(&self, timestamp: Timestamp) -> Result<StepOutcome, S::Error> {
        let generation = {
            let mut inner = self.inner.lock();
            if matches!(inner.phase, Phase::Loading { .. }) {
                return Err(OverlayError::StepInProgress);
            }
            if matches!(inner.phase, Phase::Masked(_)) {
                inner.unmask();
            }

            if self.source.has(&timestamp) {
                let batch = self
                    .source
                    .loaded_events(&timestamp)
                    .ok_or_else(|| OverlayError::CacheMiss(timestamp.clone()))?;
                tracing::info!(%timestamp, events = batch.len(), "forward step (cached)");
                let diff = inner.push(timestamp, &batch);
                return Ok(StepOutcome::Rendered(diff));
            }

            let prior = inner.steady();
            let generation = inner.generation;
            inner.phase = Phase::Loading { prior, generation };
            tracing::info!(%timestamp, generation, "forward step loading");
            generation
        };

        let loaded = self.source.load(&timestamp).await;

        let mut inner = self.inner.lock();
        let prior = match inner.phase {
            Phase::Loading { prior, generation: g } if g == generation => prior,
            _ => {
                tracing::warn!(%timestamp, generation, "dropping load that resolved after reset");
                return Ok(StepOutcome::Discarded);
            }
        };

        match loaded {
            Ok(batch) => {
                tracing::info!(%timestamp, events = batch.len(), "forward step loaded");
                let diff = inner.push(timestamp, &batch);
                Ok(StepOutcome::Rendered(diff))
            }
            Err(e) => {
                tracing::warn!(%timestamp, error = %e, "load failed; state unchanged");
                inner.phase = Phase::Steady(prior);
                Err(OverlayError::Fetch(e))
            }
        }
    }

    /// Pop the newest timestamp and rebuild the aggregate from the cache.
    ///
    /// Never suspends: every remaining timestamp was resolved when pushed.
    pub fn step_back(&self) -> Result<StepOutcome, S::Error> {
        let mut inner = self.inner.lock();
        if matches!(inner.phase, Phase::Loading { .. }) {
            return Err(OverlayError::StepInProgress);
        }
        let Some((popped, remaining)) = inner.window.split_last() else {
            tracing::warn!("backward step on an empty window");
            return Ok(StepOutcome::Underflow);
        };
        let popped = popped.clone();

        let mut rebuilt = Vec::new();
        for t in remaining {
            match self.source.loaded_events(t) {
                Some(batch) => rebuilt.extend_from_slice(&batch),
                None if self.config.strict_cache => {
                    tracing::error!(timestamp = %t, "cache miss while rebuilding window");
                    return Err(OverlayError::CacheMiss(t.clone()));
                }
                None => {
                    tracing::error!(timestamp = %t, "cache miss while rebuilding window; rendering it empty");
                }
            }
        }

        inner.window.pop();
        inner.aggregate = rebuilt;
        inner.phase = Phase::Steady(Steady::Ready);
        tracing::info!(timestamp = %popped, window = inner.window.len(), "backward step");
        let next = inner.view();
        Ok(StepOutcome::Rendered(inner.emit(next)))
    }

    /// READY ⇄ MASKED, masking by the current selection.
    pub fn toggle_mask(&self) -> Result<Option<Diff>, S::Error> {
        self.toggle_mask_with(MaskPredicate::Selection)
    }

    /// READY ⇄ MASKED with a caller-supplied predicate. The predicate is
    /// ignored when unmasking. A no-op on an empty overlay.
    pub fn toggle_mask_with(&self, mask: MaskPredicate) -> Result<Option<Diff>, S::Error> {
        self.span.in_scope(|| {
            let mut inner = self.inner.lock();
            match inner.state() {
                OverlayState::Loading => Err(OverlayError::StepInProgress),
                OverlayState::Empty => {
                    tracing::debug!("mask toggle ignored on empty overlay");
                    Ok(None)
                }
                OverlayState::Masked => Ok(Some(inner.unmask())),
                OverlayState::Ready => {
                    tracing::info!(?mask, "masked");
                    inner.phase = Phase::Masked(mask);
                    let next = inner.view();
                    Ok(Some(inner.emit(next)))
                }
            }
        })
    }

    /// Record the new selection and restyle what is rendered.
    ///
    /// Emits an update-only diff in READY or MASKED; membership and mask
    /// highlighting never change, only each record's selected/dimmed style.
    pub fn on_selection_changed(&self, selection: &SelectionSet) -> Option<Diff> {
        self.span.in_scope(|| {
            let mut inner = self.inner.lock();
            inner.selection = selection.clone();
            let state = inner.state();
            if !matches!(state, OverlayState::Ready | OverlayState::Masked) {
                return None;
            }
            let next: Vec<RenderedEvent> = inner
                .rendered
                .iter()
                .map(|e| RenderedEvent {
                    record: e.record.clone(),
                    style: inner.selection_style(&e.record),
                    highlighted: e.highlighted,
                })
                .collect();
            tracing::debug!(selected = selection.len(), "selection changed");
            Some(inner.emit(next))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryCode;
    use crate::event::Batch;
    use crate::render::DiffLog;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeSource {
        published: HashMap<Timestamp, Vec<EventRecord>>,
        resolved: Mutex<HashMap<Timestamp, Batch>>,
        failing: Mutex<HashSet<Timestamp>>,
        gate: Option<Arc<Notify>>,
        fetches: AtomicUsize,
    }

    impl FakeSource {
        fn publish(mut self, ts: &Timestamp, records: Vec<EventRecord>) -> Self {
            self.published.insert(ts.clone(), records);
            self
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn evict(&self, ts: &Timestamp) {
            self.resolved.lock().remove(ts);
        }
    }

    impl BatchSource for FakeSource {
        type Error = String;

        fn has(&self, ts: &Timestamp) -> bool {
            self.resolved.lock().contains_key(ts)
        }

        fn loaded_events(&self, ts: &Timestamp) -> Option<Batch> {
            self.resolved.lock().get(ts).cloned()
        }

        async fn load(&self, ts: &Timestamp) -> std::result::Result<Batch, String> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().contains(ts) {
                return Err(format!("no data for {ts}"));
            }
            let batch: Batch = self.published.get(ts).cloned().unwrap_or_default().into();
            self.resolved.lock().entry(ts.clone()).or_insert(batch.clone());
            Ok(batch)
        }
    }

    fn ts(i: i64) -> Timestamp {
        Timestamp::from_minutes(crate::constants::DATASET_START + i * 15)
    }

    fn rec(id: u64, category: CategoryCode) -> EventRecord {
        EventRecord::new(id, category, 10.0, 20.0)
    }

    fn ids<I: IntoIterator<Item = u64>>(ids: I) -> HashSet<EventId> {
        ids.into_iter().map(EventId).collect()
    }

    fn rendered(outcome: StepOutcome) -> Diff {
        match outcome {
            StepOutcome::Rendered(diff) => diff,
            other => panic!("expected a rendered diff, got {other:?}"),
        }
    }

    fn three_batches() -> FakeSource {
        FakeSource::default()
            .publish(&ts(0), vec![rec(1, CategoryCode::VerbalCooperation), rec(2, CategoryCode::VerbalConflict)])
            .publish(&ts(1), vec![rec(3, CategoryCode::MaterialConflict)])
            .publish(&ts(2), vec![rec(4, CategoryCode::MaterialCooperation), rec(5, CategoryCode::VerbalConflict)])
    }

    #[tokio::test]
    async fn test_forward_then_backward() {
        let controller = OverlayController::new(three_batches(), DiffLog::new());
        assert_eq!(controller.state(), OverlayState::Empty);

        let diff = rendered(controller.step(ts(0), Direction::Forward).await.unwrap());
        assert_eq!(diff.enter_ids(), ids([1, 2]));
        rendered(controller.step(ts(1), Direction::Forward).await.unwrap());
        assert_eq!(controller.aggregate_ids(), ids([1, 2, 3]));
        assert_eq!(controller.state(), OverlayState::Ready);

        let diff = rendered(controller.step(ts(1), Direction::Backward).await.unwrap());
        assert_eq!(controller.aggregate_ids(), ids([1, 2]));
        assert_eq!(diff.exit_ids(), ids([3]));
        assert_eq!(diff.update_ids(), ids([1, 2]));
        assert!(diff.enter.is_empty());
        assert_eq!(controller.window(), vec![ts(0)]);
    }

    #[tokio::test]
    async fn test_forward_steps_resolve_cache() {
        let controller = OverlayController::new(three_batches(), DiffLog::new());
        for i in 0..3 {
            controller.step_forward(ts(i)).await.unwrap();
        }
        for i in 0..3 {
            assert!(controller.source().has(&ts(i)));
            let first = controller.source().loaded_events(&ts(i)).unwrap();
            let again = controller.source().loaded_events(&ts(i)).unwrap();
            assert_eq!(first, again);
        }
    }

    #[tokio::test]
    async fn test_back_and_forth_matches_direct_walk() {
        let direct = OverlayController::new(three_batches(), DiffLog::new());
        for i in 0..3 {
            direct.step_forward(ts(i)).await.unwrap();
        }

        let wandering = OverlayController::new(three_batches(), DiffLog::new());
        for i in 0..3 {
            wandering.step_forward(ts(i)).await.unwrap();
        }
        wandering.step_back().unwrap();
        wandering.step_forward(ts(2)).await.unwrap();

        assert_eq!(wandering.aggregate_ids(), direct.aggregate_ids());
        assert_eq!(wandering.window(), direct.window());
        // Re-stepping a cached timestamp does not fetch again.
        assert_eq!(wandering.source().fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backward_on_empty_window_is_underflow() {
        let log = DiffLog::new();
        let controller = OverlayController::new(three_batches(), log.clone());
        let outcome = controller.step(ts(0), Direction::Backward).await.unwrap();
        assert_eq!(outcome, StepOutcome::Underflow);
        assert_eq!(controller.state(), OverlayState::Empty);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_mask_twice_restores_view() {
        let controller = OverlayController::new(three_batches(), DiffLog::new());
        controller.step_forward(ts(0)).await.unwrap();
        controller.step_forward(ts(1)).await.unwrap();

        let selection: SelectionSet = [CategoryCode::VerbalConflict].into_iter().collect();
        controller.on_selection_changed(&selection);
        let before: HashSet<EventId> = controller.rendered().iter().map(|e| e.id()).collect();

        let masked = controller.toggle_mask().unwrap().unwrap();
        assert_eq!(controller.state(), OverlayState::Masked);
        assert_eq!(masked.update_ids(), ids([2]));
        assert_eq!(masked.exit_ids(), ids([1, 3]));
        assert!(masked.update.iter().all(|e| e.highlighted && e.style == Style::Selected));
        // The aggregate is untouched by masking.
        assert_eq!(controller.aggregate_ids(), ids([1, 2, 3]));

        let unmasked = controller.toggle_mask().unwrap().unwrap();
        assert_eq!(controller.state(), OverlayState::Ready);
        assert_eq!(unmasked.enter_ids(), ids([1, 3]));
        let after: HashSet<EventId> = controller.rendered().iter().map(|e| e.id()).collect();
        assert_eq!(before, after);
        for e in controller.rendered() {
            let expected = if e.record.category == CategoryCode::VerbalConflict {
                Style::Selected
            } else {
                Style::Dimmed
            };
            assert_eq!(e.style, expected);
            assert!(!e.highlighted);
        }
    }

    #[tokio::test]
    async fn test_selection_change_while_masked_restyles_highlighted_records() {
        let source = FakeSource::default().publish(
            &ts(0),
            vec![
                rec(1, CategoryCode::VerbalCooperation),
                rec(2, CategoryCode::VerbalConflict),
            ],
        );
        let controller = OverlayController::new(source, DiffLog::new());
        controller.step_forward(ts(0)).await.unwrap();
        let keep_all = MaskPredicate::Custom(Arc::new(|_: &EventRecord| true));
        controller.toggle_mask_with(keep_all).unwrap();

        let selection: SelectionSet = [CategoryCode::VerbalCooperation].into_iter().collect();
        let diff = controller.on_selection_changed(&selection).unwrap();
        assert!(diff.enter.is_empty() && diff.exit.is_empty());
        assert_eq!(controller.state(), OverlayState::Masked);

        let style_of = |id: u64| diff.update.iter().find(|e| e.id() == EventId(id)).unwrap().clone();
        let (kept, dropped) = (style_of(1), style_of(2));
        assert!(kept.highlighted && dropped.highlighted);
        assert_eq!(kept.style, Style::Selected);
        assert_eq!(dropped.style, Style::Dimmed);
        assert_ne!(kept.style, dropped.style);
    }

    #[tokio::test]
    async fn test_mask_on_empty_overlay_is_noop() {
        let controller = OverlayController::new(three_batches(), DiffLog::new());
        assert!(controller.toggle_mask().unwrap().is_none());
        assert_eq!(controller.state(), OverlayState::Empty);
    }

    #[tokio::test]
    async fn test_related_mask_keeps_shared_actors() {
        let source = FakeSource::default().publish(
            &ts(0),
            vec![
                rec(1, CategoryCode::VerbalConflict).with_actors("USA", "CHN"),
                rec(2, CategoryCode::VerbalConflict).with_actors("CHN", "JPN"),
                rec(3, CategoryCode::VerbalConflict).with_actors("BRA", "ARG"),
            ],
        );
        let controller = OverlayController::new(source, DiffLog::new());
        controller.step_forward(ts(0)).await.unwrap();

        let diff = controller
            .toggle_mask_with(MaskPredicate::Related(EventId(1)))
            .unwrap()
            .unwrap();
        assert_eq!(diff.update_ids(), ids([1, 2]));
        assert_eq!(diff.exit_ids(), ids([3]));
    }

    #[tokio::test]
    async fn test_custom_mask() {
        let controller = OverlayController::new(three_batches(), DiffLog::new());
        controller.step_forward(ts(0)).await.unwrap();
        let keep_odd = MaskPredicate::Custom(Arc::new(|r: &EventRecord| r.id.0 % 2 == 1));
        let diff = controller.toggle_mask_with(keep_odd).unwrap().unwrap();
        assert_eq!(diff.update_ids(), ids([1]));
    }

    #[tokio::test]
    async fn test_forward_step_while_masked_unmasks_first() {
        let log = DiffLog::new();
        let controller = OverlayController::new(three_batches(), log.clone());
        controller.step_forward(ts(0)).await.unwrap();
        controller.on_selection_changed(&[CategoryCode::VerbalConflict].into_iter().collect());
        controller.toggle_mask().unwrap();
        log.take();

        let diff = rendered(controller.step_forward(ts(1)).await.unwrap());
        assert_eq!(controller.state(), OverlayState::Ready);

        let diffs = log.take();
        assert_eq!(diffs.len(), 2, "unmask diff then step diff");
        assert_eq!(diffs[0].enter_ids(), ids([1]));
        assert_eq!(diff.enter_ids(), ids([3]));
        assert_eq!(diff.update_ids(), ids([1, 2]));
    }

    #[tokio::test]
    async fn test_selection_change_is_update_only() {
        let controller = OverlayController::new(three_batches(), DiffLog::new());
        controller.step_forward(ts(0)).await.unwrap();
        controller.step_forward(ts(1)).await.unwrap();

        let mut selection = SelectionSet::all();
        for c in [CategoryCode::VerbalCooperation, CategoryCode::MaterialConflict] {
            selection = selection.iter().filter(|s| *s != c).collect();
        }
        let diff = controller.on_selection_changed(&selection).unwrap();
        assert!(diff.enter.is_empty() && diff.exit.is_empty());
        assert_eq!(diff.update_ids(), ids([1, 2, 3]));
        let dimmed: HashSet<EventId> = diff
            .update
            .iter()
            .filter(|e| e.style == Style::Dimmed)
            .map(|e| e.id())
            .collect();
        assert_eq!(dimmed, ids([1, 3]));
        assert_eq!(controller.aggregate_ids(), ids([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_selection_change_on_empty_overlay_is_recorded() {
        let controller = OverlayController::new(three_batches(), DiffLog::new());
        let selection = SelectionSet::none();
        assert!(controller.on_selection_changed(&selection).is_none());
        let diff = rendered(controller.step_forward(ts(0)).await.unwrap());
        assert!(diff.enter.iter().all(|e| e.style == Style::Dimmed));
    }

    #[tokio::test]
    async fn test_failed_load_leaves_state_and_allows_retry() {
        let source = three_batches();
        source.failing.lock().insert(ts(1));
        let controller = OverlayController::new(source, DiffLog::new());
        controller.step_forward(ts(0)).await.unwrap();

        let err = controller.step_forward(ts(1)).await.unwrap_err();
        assert!(matches!(err, OverlayError::Fetch(_)));
        assert_eq!(controller.state(), OverlayState::Ready);
        assert_eq!(controller.window(), vec![ts(0)]);
        assert_eq!(controller.aggregate_ids(), ids([1, 2]));
        assert!(!controller.source().has(&ts(1)));

        controller.source().failing.lock().clear();
        rendered(controller.step_forward(ts(1)).await.unwrap());
        assert_eq!(controller.aggregate_ids(), ids([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_failed_first_load_returns_to_empty() {
        let source = three_batches();
        source.failing.lock().insert(ts(0));
        let controller = OverlayController::new(source, DiffLog::new());
        assert!(controller.step_forward(ts(0)).await.is_err());
        assert_eq!(controller.state(), OverlayState::Empty);
    }

    async fn until_loading<S: BatchSource, R: Renderer>(controller: &OverlayController<S, R>) {
        while controller.state() != OverlayState::Loading {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_load_resolving_after_reset_is_discarded() {
        let gate = Arc::new(Notify::new());
        let log = DiffLog::new();
        let controller = OverlayController::new(three_batches().gated(Arc::clone(&gate)), log.clone());

        let (outcome, _) = tokio::join!(controller.step_forward(ts(0)), async {
            until_loading(&controller).await;
            controller.reset();
            gate.notify_one();
        });

        assert_eq!(outcome.unwrap(), StepOutcome::Discarded);
        assert_eq!(controller.state(), OverlayState::Empty);
        assert!(controller.window().is_empty());
        assert!(controller.aggregate().is_empty());
        // The cache still memoizes the batch; only the controller ignored it.
        assert!(controller.source().has(&ts(0)));
    }

    #[tokio::test]
    async fn test_step_while_loading_is_rejected() {
        let gate = Arc::new(Notify::new());
        let controller = OverlayController::new(three_batches().gated(Arc::clone(&gate)), DiffLog::new());

        let (first, (second, back, mask)) = tokio::join!(controller.step_forward(ts(0)), async {
            until_loading(&controller).await;
            let second = controller.step_forward(ts(1)).await;
            let back = controller.step_back();
            let mask = controller.toggle_mask();
            gate.notify_one();
            (second, back, mask)
        });

        assert!(matches!(second, Err(OverlayError::StepInProgress)));
        assert!(matches!(back, Err(OverlayError::StepInProgress)));
        assert!(matches!(mask, Err(OverlayError::StepInProgress)));
        rendered(first.unwrap());
        assert_eq!(controller.window(), vec![ts(0)]);
    }

    #[tokio::test]
    async fn test_reset_exits_everything_and_keeps_selection() {
        let log = DiffLog::new();
        let controller = OverlayController::new(three_batches(), log.clone());
        controller.step_forward(ts(0)).await.unwrap();
        let selection: SelectionSet = [CategoryCode::VerbalConflict].into_iter().collect();
        controller.on_selection_changed(&selection);

        let diff = controller.reset();
        assert_eq!(diff.exit_ids(), ids([1, 2]));
        assert!(diff.enter.is_empty() && diff.update.is_empty());
        assert_eq!(controller.state(), OverlayState::Empty);
        assert!(controller.rendered().is_empty());
        assert_eq!(controller.selection(), selection);
    }

    #[tokio::test]
    async fn test_strict_cache_miss_fails_without_mutation() {
        let controller = OverlayController::new(three_batches(), DiffLog::new())
            .with_config(ControllerConfig { strict_cache: true });
        for i in 0..3 {
            controller.step_forward(ts(i)).await.unwrap();
        }
        controller.source().evict(&ts(0));

        let err = controller.step_back().unwrap_err();
        assert!(matches!(err, OverlayError::CacheMiss(ref t) if *t == ts(0)));
        assert_eq!(controller.window().len(), 3);
        assert_eq!(controller.aggregate_ids(), ids([1, 2, 3, 4, 5]));
    }

    #[tokio::test]
    async fn test_lenient_cache_miss_renders_empty_batch() {
        let controller = OverlayController::new(three_batches(), DiffLog::new())
            .with_config(ControllerConfig { strict_cache: false });
        for i in 0..3 {
            controller.step_forward(ts(i)).await.unwrap();
        }
        controller.source().evict(&ts(0));

        let diff = rendered(controller.step_back().unwrap());
        assert_eq!(controller.aggregate_ids(), ids([3]));
        assert_eq!(diff.exit_ids(), ids([1, 2, 4, 5]));
    }

    #[tokio::test]
    async fn test_duplicate_forward_step_is_preserved() {
        let controller = OverlayController::new(three_batches(), DiffLog::new());
        controller.step_forward(ts(0)).await.unwrap();
        let diff = rendered(controller.step_forward(ts(0)).await.unwrap());

        assert_eq!(controller.window(), vec![ts(0), ts(0)]);
        assert_eq!(controller.aggregate().len(), 4);
        // Rendering is keyed by ID, so the repeat only restyles.
        assert!(diff.enter.is_empty() && diff.exit.is_empty());
        assert_eq!(controller.rendered().len(), 2);

        controller.step_back().unwrap();
        assert_eq!(controller.aggregate_ids(), ids([1, 2]));
    }

    #[tokio::test]
    async fn test_backward_step_from_masked_returns_to_ready() {
        let controller = OverlayController::new(three_batches(), DiffLog::new());
        controller.step_forward(ts(0)).await.unwrap();
        controller.step_forward(ts(1)).await.unwrap();
        controller.toggle_mask().unwrap();

        rendered(controller.step_back().unwrap());
        assert_eq!(controller.state(), OverlayState::Ready);
        assert!(
            controller
                .rendered()
                .iter()
                .all(|e| e.style == Style::Selected && !e.highlighted)
        );
    }

    #[tokio::test]
    async fn test_projection_reaches_renderer() {
        struct Projected(Arc<Mutex<Vec<(f64, f64)>>>);
        impl Renderer for Projected {
            fn render(&mut self, diff: &Diff, projection: &dyn Projection) {
                for e in &diff.enter {
                    self.0.lock().push(projection.project(e.record.long, e.record.lat));
                }
            }
        }

        let points = Arc::new(Mutex::new(Vec::new()));
        let controller = OverlayController::new(three_batches(), Projected(Arc::clone(&points)));
        controller.set_projection(Arc::new(|long: f64, lat: f64| (long * 2.0, -lat)));
        controller.step_forward(ts(1)).await.unwrap();
        assert_eq!(*points.lock(), vec![(40.0, -10.0)]);
    }
}
