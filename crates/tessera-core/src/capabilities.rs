//! Interfaces tool handlers program against.
//!
//! [`Engine`](crate::Engine) implements all four. Handlers take
//! `&mut impl ElementRepository` (or a `dyn` reference) instead of the
//! concrete engine, so they can be driven by test doubles.

use crate::element::{Element, ElementId, ElementPatch};
use crate::error::Result;
use crate::history::HistoryEntry;
use crate::store::StoreSnapshot;
use crate::viewport::Viewport;
use kurbo::{Point, Rect, Size, Vec2};
use std::sync::Arc;

/// Element CRUD and z-order.
///
/// Every mutation is recorded in history and requests a scene draw.
/// Operations against unknown ids are silent no-ops.
pub trait ElementRepository {
    fn get(&self, id: &ElementId) -> Option<Arc<Element>>;

    /// O(1) read-only view for renderers.
    fn snapshot(&self) -> StoreSnapshot;

    /// Insert or replace; new ids go on top.
    fn upsert(&mut self, element: Element) -> Result<ElementId>;

    /// Returns whether anything changed.
    fn update(&mut self, id: &ElementId, patch: &ElementPatch) -> Result<bool>;

    fn update_with(&mut self, id: &ElementId, f: &dyn Fn(&Element) -> Element) -> Result<bool>;

    /// Remove an element; with `deselect` it also leaves the selection.
    fn delete(&mut self, id: &ElementId, deselect: bool) -> bool;

    fn bring_to_front(&mut self, id: &ElementId) -> bool;

    fn send_to_back(&mut self, id: &ElementId) -> bool;

    fn bring_forward(&mut self, id: &ElementId) -> bool;

    fn send_backward(&mut self, id: &ElementId) -> bool;

    fn move_to(&mut self, id: &ElementId, index: usize) -> bool;

    /// Clone above the source, offset by `offset` (configured default when
    /// `None`), and select the clone.
    fn duplicate(&mut self, id: &ElementId, offset: Option<Vec2>) -> Result<Option<ElementId>>;

    fn add_elements(&mut self, elements: Vec<Element>) -> Result<Vec<ElementId>>;

    /// Returns the number of elements that changed.
    fn update_elements(&mut self, updates: &[(ElementId, ElementPatch)]) -> Result<usize>;

    /// Returns the number of elements removed.
    fn remove_elements(&mut self, ids: &[ElementId]) -> usize;

    fn replace_all(&mut self, elements: Vec<Element>, order: Option<Vec<ElementId>>) -> Result<()>;
}

/// Selection state and the transform gate.
pub trait SelectionController {
    fn selected_ids(&self) -> Vec<ElementId>;

    fn is_selected(&self, id: &ElementId) -> bool;

    fn last_selected(&self) -> Option<ElementId>;

    fn selection_version(&self) -> u64;

    /// Unknown ids are dropped.
    fn set_selection(&mut self, ids: &[ElementId]);

    fn add_to_selection(&mut self, ids: &[ElementId]);

    fn remove_from_selection(&mut self, ids: &[ElementId]);

    fn toggle_selection(&mut self, ids: &[ElementId]);

    fn replace_selection_with_single(&mut self, id: &ElementId);

    fn clear_selection(&mut self);

    fn select_all(&mut self);

    fn prune_selection(&mut self);

    fn selection_bounds(&self) -> Option<Rect>;

    fn should_lock_aspect_ratio(&self) -> bool;

    fn is_transforming(&self) -> bool;
}

/// Undo/redo and batching.
pub trait HistoryController {
    /// Run `f` as one history entry. On `Err` every change made inside is
    /// rolled back and nothing is recorded.
    fn with_undo<T, E, F>(&mut self, label: &str, f: F) -> std::result::Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> std::result::Result<T, E>;

    fn begin_batch(&mut self, label: &str);

    /// Close a batch level; `committed = false` reverts that level.
    fn end_batch(&mut self, committed: bool);

    fn undo(&mut self) -> bool;

    fn redo(&mut self) -> bool;

    fn can_undo(&self) -> bool;

    fn can_redo(&self) -> bool;

    fn undo_label(&self) -> Option<String>;

    fn redo_label(&self) -> Option<String>;

    /// Push a prebuilt entry, discarding the redo branch.
    fn push_entry(&mut self, entry: HistoryEntry);

    fn clear_history(&mut self);
}

/// Pan/zoom state.
pub trait ViewportController {
    fn viewport(&self) -> &Viewport;

    fn world_to_stage(&self, world: Point) -> Point;

    fn stage_to_world(&self, stage: Point) -> Point;

    fn set_pan(&mut self, pan: Vec2);

    fn pan_by(&mut self, delta: Vec2);

    fn set_scale(&mut self, scale: f64);

    fn zoom_at(&mut self, anchor: Point, factor: f64);

    /// Fit every element into view; an empty scene resets the view.
    fn fit_to_content(&mut self);

    fn reset_viewport(&mut self);

    fn set_viewport_size(&mut self, size: Size);
}
