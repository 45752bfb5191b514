//! The engine: one explicitly constructed instance that owns the element
//! store, selection, history, viewport, connector refresher and the current
//! transform gesture, and routes every visual side effect through the frame
//! scheduler.

use crate::capabilities::{
    ElementRepository, HistoryController, SelectionController, ViewportController,
};
use crate::config::EngineConfig;
use crate::document::SceneSnapshot;
use crate::element::{Element, ElementId, ElementPatch, Geometry};
use crate::error::{EngineError, Result};
use crate::history::{BatchOutcome, HistoryEngine, HistoryEntry, HistoryState};
use crate::refresher::{ConnectorRouter, DependentRefresher, RefreshReport, RenderLookup};
use crate::scheduler::{FrameScheduler, SurfaceId};
use crate::selection::SelectionManager;
use crate::store::{Change, ElementStore, StoreSnapshot};
use crate::transform::{TransformKind, TransformSession, TransformSnapshot};
use crate::viewport::Viewport;
use kurbo::{Point, Rect, Size, Vec2};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

/// State engine behind a drawing surface.
pub struct Engine {
    config: EngineConfig,
    store: ElementStore,
    selection: SelectionManager,
    history: HistoryEngine,
    viewport: Viewport,
    refresher: DependentRefresher,
    transform: Option<TransformSession>,
    render_lookup: Option<Rc<dyn RenderLookup>>,
    scheduler: FrameScheduler<Engine>,
    last_refresh: RefreshReport,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("elements", &self.store.len())
            .field("selected", &self.selection.len())
            .field("history", &self.history.state())
            .field("viewport", &self.viewport)
            .field("transforming", &self.transform.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine driving `scheduler`.
    pub fn new(config: EngineConfig, scheduler: FrameScheduler<Engine>) -> Self {
        let mut viewport = Viewport::new(Size::new(config.viewport_width, config.viewport_height));
        viewport.set_scale_bounds(config.min_scale, config.max_scale);
        Self {
            history: HistoryEngine::new(config.history_limit),
            store: ElementStore::new(),
            selection: SelectionManager::new(),
            viewport,
            refresher: DependentRefresher::default(),
            transform: None,
            render_lookup: None,
            scheduler,
            last_refresh: RefreshReport::default(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &FrameScheduler<Engine> {
        &self.scheduler
    }

    /// Read-only access to the element store.
    pub fn store(&self) -> &ElementStore {
        &self.store
    }

    /// Read-only access to the selection.
    pub fn selection(&self) -> &SelectionManager {
        &self.selection
    }

    pub fn history(&self) -> &HistoryEngine {
        &self.history
    }

    /// Current history state.
    pub fn history_state(&self) -> HistoryState {
        self.history.state()
    }

    /// Give the refresher access to the renderer's measured bounds and
    /// render handles.
    pub fn set_render_lookup(&mut self, lookup: Rc<dyn RenderLookup>) {
        self.render_lookup = Some(lookup);
    }

    pub fn set_connector_router(&mut self, router: Box<dyn ConnectorRouter>) {
        self.refresher.set_router(router);
    }

    /// Outcome of the most recent connector refresh.
    pub fn last_refresh(&self) -> &RefreshReport {
        &self.last_refresh
    }

    /// Run every queued task synchronously.
    pub fn flush_now(&mut self) {
        let scheduler = self.scheduler.clone();
        scheduler.flush_now(self);
    }

    // --- change plumbing ---

    /// Report a store change to history, the refresher and the scheduler.
    fn record(&mut self, change: Change) {
        let moved = match &change {
            Change::Reorder { .. } | Change::Remove { .. } => Vec::new(),
            other => other.touched_ids(),
        };
        self.scheduler.request_draw(SurfaceId::SCENE);
        self.notify_moved(moved);
        self.history.record_change(change);
    }

    fn selection_changed(&mut self) {
        self.scheduler.request_draw(SurfaceId::SELECTION);
    }

    /// Queue one connector refresh for this frame.
    pub fn notify_moved(&mut self, ids: impl IntoIterator<Item = ElementId>) {
        if self.refresher.notify_moved(ids) {
            self.scheduler.enqueue_write(|engine: &mut Engine| {
                engine.refresh_dependents();
                Ok(())
            });
        }
    }

    /// Reroute connectors affected by everything moved since the last
    /// refresh. Writes are untracked: routes are derived data.
    pub fn refresh_dependents(&mut self) -> RefreshReport {
        let moved = self.refresher.take_pending();
        if moved.is_empty() {
            return RefreshReport::default();
        }
        let report = self.apply_routes(&moved);
        log::trace!("refreshed {} connectors", report.rerouted.len());
        self.last_refresh = report.clone();
        report
    }

    fn apply_routes(&mut self, moved: &HashSet<ElementId>) -> RefreshReport {
        let lookup = self.render_lookup.clone();
        let routes = self.refresher.routes_for(moved, &self.store, lookup.as_deref());
        let mut report = RefreshReport::default();
        for (id, points) in routes {
            let result = self.store.update_with(&id, |e| {
                let mut next = e.clone();
                next.geometry = Geometry::Points { points };
                next
            });
            match result {
                Ok(Some(_)) => {
                    if let Some(handle) = lookup.as_ref().and_then(|l| l.handle(&id)) {
                        report.handles.push(handle);
                    }
                    report.rerouted.push(id);
                }
                Ok(None) => {}
                Err(err) => log::warn!("connector {} not rerouted: {}", id, err),
            }
        }
        if !report.is_empty() {
            self.scheduler.request_draw(SurfaceId::SCENE);
        }
        report
    }

    /// Restore the selection a rolled-back level was opened with.
    fn after_rollback(&mut self, reverted: Vec<ElementId>, selection: Vec<ElementId>) {
        let store = &self.store;
        self.selection
            .set_selection(selection.into_iter().filter(|id| store.contains(id)));
        self.selection_changed();
        self.scheduler.request_draw(SurfaceId::SCENE);
        self.notify_moved(reverted);
    }

    fn after_replay(&mut self, before: &StoreSnapshot) {
        let changed = self.store.snapshot().changed_since(before);
        self.scheduler.request_draw(SurfaceId::SCENE);
        self.selection_changed();
        self.notify_moved(changed);
    }

    // --- transform lifecycle ---

    /// Start a move/resize gesture on the current selection.
    pub fn begin_transform(&mut self, kind: TransformKind, origin: Point) -> Result<()> {
        if self.transform.is_some() || self.selection.is_transforming() {
            return Err(EngineError::TransformInProgress);
        }
        let lock = self.selection.should_lock_aspect_ratio(&self.store);
        let snapshot = TransformSnapshot::capture(self.selection.selected().iter(), &self.store, lock)
            .ok_or(EngineError::EmptySelection)?;
        if !self.selection.begin_transform() {
            return Err(EngineError::TransformInProgress);
        }
        let label = match kind {
            TransformKind::Move => "Move",
            TransformKind::Resize(_) => "Resize",
        };
        self.history.begin_batch(label, &self.selection);
        log::debug!("begin {} of {} elements", label, snapshot.originals().len());
        self.transform = Some(TransformSession::new(kind, origin, snapshot));
        self.selection_changed();
        Ok(())
    }

    /// Apply one pointer tick. Geometry is recomputed from the gesture
    /// snapshot and written without history.
    pub fn update_transform(&mut self, pointer: Point) -> Result<()> {
        let targets = {
            let session = self.transform.as_mut().ok_or(EngineError::NoActiveTransform)?;
            session.set_pointer(pointer);
            session.compute()
        };
        let mut moved = Vec::with_capacity(targets.len());
        for target in targets {
            let id = target.id.clone();
            match self.store.update_with(&id, |_| target) {
                Ok(Some(_)) => moved.push(id),
                Ok(None) => {}
                Err(err) => log::warn!("transform tick skipped {}: {}", id, err),
            }
        }
        log::trace!("transform tick at {:?}, {} elements", pointer, moved.len());
        if !moved.is_empty() {
            self.scheduler.request_draw(SurfaceId::SCENE);
            self.notify_moved(moved);
        }
        Ok(())
    }

    /// Finish the gesture as a single history entry.
    pub fn commit_transform(&mut self) -> Result<()> {
        let session = self.transform.take().ok_or(EngineError::NoActiveTransform)?;
        let snapshot = session.snapshot();

        let mut moved: HashSet<ElementId> = self.refresher.take_pending();
        moved.extend(snapshot.ids().cloned());
        self.apply_routes(&moved);

        for (id, original) in snapshot.captured() {
            let Some(current) = self.store.get(id) else {
                continue;
            };
            if !Arc::ptr_eq(original, current) && **original != **current {
                self.history.record_change(Change::Update {
                    before: original.clone(),
                    after: current.clone(),
                });
            }
        }

        self.history.end_batch(true, &mut self.store, &self.selection);
        self.selection.end_transform();
        self.selection_changed();
        self.scheduler.request_draw(SurfaceId::SCENE);
        log::debug!("committed transform at delta {:?}", session.delta());
        Ok(())
    }

    /// Abort the gesture and restore every captured element.
    pub fn cancel_transform(&mut self) -> Result<()> {
        let session = self.transform.take().ok_or(EngineError::NoActiveTransform)?;
        for (id, original) in session.snapshot().captured() {
            if let Some(current) = self.store.get(id).cloned() {
                if !Arc::ptr_eq(original, &current) {
                    self.store.apply(&Change::Update {
                        before: current,
                        after: original.clone(),
                    });
                }
            }
        }
        let outcome = self.history.end_batch(false, &mut self.store, &self.selection);
        if let BatchOutcome::RolledBack { reverted, selection } = outcome {
            self.after_rollback(reverted, selection);
        }
        self.selection.end_transform();
        self.selection_changed();
        self.scheduler.request_draw(SurfaceId::SCENE);
        log::debug!("cancelled transform");
        Ok(())
    }

    /// The running gesture, if any.
    pub fn transform_session(&self) -> Option<&TransformSession> {
        self.transform.as_ref()
    }

    // --- persistence boundary ---

    /// Capture elements, order, selection and viewport for persistence.
    pub fn to_scene(&self) -> SceneSnapshot {
        SceneSnapshot::capture(&self.store.snapshot(), self.selection.ids(), self.viewport.clone())
    }

    /// Replace everything with a loaded scene. Not undoable; session
    /// history is cleared.
    pub fn load_scene(&mut self, scene: SceneSnapshot) -> Result<()> {
        if self.transform.is_some() {
            self.cancel_transform()?;
        }
        let order = (!scene.order.is_empty()).then_some(scene.order);
        self.store.replace_all(scene.elements, order)?;
        self.history.clear();
        self.refresher.clear();
        self.selection.set_selection(
            scene
                .selected
                .into_iter()
                .filter(|id| self.store.contains(id)),
        );

        let mut viewport = scene.viewport;
        viewport.set_size(self.viewport.size);
        viewport.set_scale_bounds(self.config.min_scale, self.config.max_scale);
        self.viewport = viewport;

        let all: Vec<ElementId> = self.store.order().iter().cloned().collect();
        log::debug!("loaded scene with {} elements", all.len());
        self.notify_moved(all);
        self.selection_changed();
        self.scheduler.request_draw(SurfaceId::SCENE);
        Ok(())
    }

    /// Parse a scene and load it with `load_scene`.
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        self.load_scene(SceneSnapshot::from_json(json)?)
    }

    /// Serialize the current scene.
    pub fn to_json(&self) -> Result<String> {
        self.to_scene().to_json()
    }

    fn viewport_changed(&mut self) {
        self.scheduler.request_draw(SurfaceId::SCENE);
        self.scheduler.request_draw(SurfaceId::SELECTION);
    }
}

impl ElementRepository for Engine {
    fn get(&self, id: &ElementId) -> Option<Arc<Element>> {
        self.store.get(id).cloned()
    }

    fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    fn upsert(&mut self, element: Element) -> Result<ElementId> {
        let id = element.id.clone();
        self.with_undo("Add element", |engine| {
            let change = engine.store.upsert(element)?;
            engine.record(change);
            Ok(id)
        })
    }

    fn update(&mut self, id: &ElementId, patch: &ElementPatch) -> Result<bool> {
        self.with_undo("Update element", |engine| {
            match engine.store.update(id, patch)? {
                Some(change) => {
                    engine.record(change);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn update_with(&mut self, id: &ElementId, f: &dyn Fn(&Element) -> Element) -> Result<bool> {
        self.with_undo("Update element", |engine| {
            match engine.store.update_with(id, f)? {
                Some(change) => {
                    engine.record(change);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn delete(&mut self, id: &ElementId, deselect: bool) -> bool {
        let result: Result<bool> = self.with_undo("Delete element", |engine| {
            let Some(change) = engine.store.delete(id) else {
                return Ok(false);
            };
            engine.record(change);
            if deselect {
                engine.selection.remove_from_selection([id]);
                engine.selection_changed();
            } else if engine.selection.is_selected(id) {
                engine.selection.prune_selection(&engine.store);
                engine.selection_changed();
            }
            Ok(true)
        });
        result.unwrap_or(false)
    }

    fn bring_to_front(&mut self, id: &ElementId) -> bool {
        reorder(self, "Bring to front", |store| store.bring_to_front(id))
    }

    fn send_to_back(&mut self, id: &ElementId) -> bool {
        reorder(self, "Send to back", |store| store.send_to_back(id))
    }

    fn bring_forward(&mut self, id: &ElementId) -> bool {
        reorder(self, "Bring forward", |store| store.bring_forward(id))
    }

    fn send_backward(&mut self, id: &ElementId) -> bool {
        reorder(self, "Send backward", |store| store.send_backward(id))
    }

    fn move_to(&mut self, id: &ElementId, index: usize) -> bool {
        reorder(self, "Reorder", |store| store.move_to(id, index))
    }

    fn duplicate(&mut self, id: &ElementId, offset: Option<Vec2>) -> Result<Option<ElementId>> {
        let offset = offset.unwrap_or_else(|| {
            Vec2::new(self.config.duplicate_offset, self.config.duplicate_offset)
        });
        self.with_undo("Duplicate", |engine| {
            let Some(change) = engine.store.duplicate(id, offset)? else {
                return Ok(None);
            };
            let clone = change.touched_ids().into_iter().next();
            engine.record(change);
            if let Some(clone) = &clone {
                engine.selection.replace_selection_with_single(clone.clone());
                engine.selection_changed();
            }
            Ok(clone)
        })
    }

    fn add_elements(&mut self, elements: Vec<Element>) -> Result<Vec<ElementId>> {
        self.with_undo("Add elements", |engine| {
            let changes = engine.store.add_elements(elements)?;
            let mut ids = Vec::with_capacity(changes.len());
            for change in changes {
                ids.extend(change.touched_ids());
                engine.record(change);
            }
            Ok(ids)
        })
    }

    fn update_elements(&mut self, updates: &[(ElementId, ElementPatch)]) -> Result<usize> {
        self.with_undo("Update elements", |engine| {
            let changes = engine.store.update_elements(updates)?;
            let count = changes.len();
            for change in changes {
                engine.record(change);
            }
            Ok(count)
        })
    }

    fn remove_elements(&mut self, ids: &[ElementId]) -> usize {
        let result: Result<usize> = self.with_undo("Remove elements", |engine| {
            let changes = engine.store.remove_elements(ids);
            let count = changes.len();
            for change in changes {
                engine.record(change);
            }
            if count > 0 {
                engine.selection.prune_selection(&engine.store);
                engine.selection_changed();
            }
            Ok(count)
        });
        result.unwrap_or(0)
    }

    fn replace_all(&mut self, elements: Vec<Element>, order: Option<Vec<ElementId>>) -> Result<()> {
        self.with_undo("Replace all", |engine| {
            let change = engine.store.replace_all(elements, order)?;
            engine.record(change);
            engine.selection.prune_selection(&engine.store);
            engine.selection_changed();
            Ok(())
        })
    }
}

fn reorder(
    engine: &mut Engine,
    label: &str,
    op: impl FnOnce(&mut ElementStore) -> Option<Change>,
) -> bool {
    let result: Result<bool> = engine.with_undo(label, |engine| match op(&mut engine.store) {
        Some(change) => {
            engine.record(change);
            Ok(true)
        }
        None => Ok(false),
    });
    result.unwrap_or(false)
}

impl SelectionController for Engine {
    fn selected_ids(&self) -> Vec<ElementId> {
        self.selection.ids()
    }

    fn is_selected(&self, id: &ElementId) -> bool {
        self.selection.is_selected(id)
    }

    fn last_selected(&self) -> Option<ElementId> {
        self.selection.last_selected().cloned()
    }

    fn selection_version(&self) -> u64 {
        self.selection.version()
    }

    fn set_selection(&mut self, ids: &[ElementId]) {
        let store = &self.store;
        self.selection
            .set_selection(ids.iter().filter(|id| store.contains(id)).cloned());
        self.selection_changed();
    }

    fn add_to_selection(&mut self, ids: &[ElementId]) {
        let store = &self.store;
        self.selection
            .add_to_selection(ids.iter().filter(|id| store.contains(id)).cloned());
        self.selection_changed();
    }

    fn remove_from_selection(&mut self, ids: &[ElementId]) {
        self.selection.remove_from_selection(ids);
        self.selection_changed();
    }

    fn toggle_selection(&mut self, ids: &[ElementId]) {
        let store = &self.store;
        self.selection
            .toggle_selection(ids.iter().filter(|id| store.contains(id)).cloned());
        self.selection_changed();
    }

    fn replace_selection_with_single(&mut self, id: &ElementId) {
        if self.store.contains(id) {
            self.selection.replace_selection_with_single(id.clone());
        } else {
            self.selection.clear_selection();
        }
        self.selection_changed();
    }

    fn clear_selection(&mut self) {
        self.selection.clear_selection();
        self.selection_changed();
    }

    fn select_all(&mut self) {
        self.selection.select_all(&self.store);
        self.selection_changed();
    }

    fn prune_selection(&mut self) {
        self.selection.prune_selection(&self.store);
        self.selection_changed();
    }

    fn selection_bounds(&self) -> Option<Rect> {
        self.selection.selection_bounds(&self.store)
    }

    fn should_lock_aspect_ratio(&self) -> bool {
        self.selection.should_lock_aspect_ratio(&self.store)
    }

    fn is_transforming(&self) -> bool {
        self.selection.is_transforming()
    }
}

impl HistoryController for Engine {
    fn with_undo<T, E, F>(&mut self, label: &str, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
    {
        self.history.begin_batch(label, &self.selection);
        // A panic must still close this level, or every later edit lands in
        // a batch that never commits.
        let result = match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(result) => result,
            Err(payload) => {
                log::warn!("history: '{}' panicked, rolling back", label);
                HistoryController::end_batch(self, false);
                panic::resume_unwind(payload);
            }
        };
        HistoryController::end_batch(self, result.is_ok());
        result
    }

    fn begin_batch(&mut self, label: &str) {
        self.history.begin_batch(label, &self.selection);
    }

    fn end_batch(&mut self, committed: bool) {
        let outcome = self
            .history
            .end_batch(committed, &mut self.store, &self.selection);
        if let BatchOutcome::RolledBack { reverted, selection } = outcome {
            self.after_rollback(reverted, selection);
        }
    }

    fn undo(&mut self) -> bool {
        if self.transform.is_some() {
            return false;
        }
        let before = self.store.snapshot();
        if !self.history.undo(&mut self.store, &mut self.selection) {
            return false;
        }
        self.after_replay(&before);
        true
    }

    fn redo(&mut self) -> bool {
        if self.transform.is_some() {
            return false;
        }
        let before = self.store.snapshot();
        if !self.history.redo(&mut self.store, &mut self.selection) {
            return false;
        }
        self.after_replay(&before);
        true
    }

    fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn undo_label(&self) -> Option<String> {
        self.history.undo_label().map(str::to_string)
    }

    fn redo_label(&self) -> Option<String> {
        self.history.redo_label().map(str::to_string)
    }

    fn push_entry(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl ViewportController for Engine {
    fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    fn world_to_stage(&self, world: Point) -> Point {
        self.viewport.world_to_stage(world)
    }

    fn stage_to_world(&self, stage: Point) -> Point {
        self.viewport.stage_to_world(stage)
    }

    fn set_pan(&mut self, pan: Vec2) {
        self.viewport.set_pan(pan);
        self.viewport_changed();
    }

    fn pan_by(&mut self, delta: Vec2) {
        self.viewport.pan_by(delta);
        self.viewport_changed();
    }

    fn set_scale(&mut self, scale: f64) {
        self.viewport.set_scale(scale);
        self.viewport_changed();
    }

    fn zoom_at(&mut self, anchor: Point, factor: f64) {
        self.viewport.zoom_at(anchor, factor);
        self.viewport_changed();
    }

    fn fit_to_content(&mut self) {
        let bounds = self.store.content_bounds();
        self.viewport.fit_to_content(bounds, self.config.fit_padding);
        self.viewport_changed();
    }

    fn reset_viewport(&mut self) {
        self.viewport.reset();
        self.viewport_changed();
    }

    fn set_viewport_size(&mut self, size: Size) {
        self.viewport.set_size(size);
        self.viewport_changed();
    }
}
