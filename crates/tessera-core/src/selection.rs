//! Selection state: the selected subset, its anchor, and the transform gate.
//!
//! Observers should compare [`SelectionManager::version`] rather than set
//! contents: every mutator bumps the version and swaps the set's `Arc`, even
//! when membership did not change.

use crate::element::{ElementId, ElementKind};
use crate::store::ElementStore;
use indexmap::IndexSet;
use kurbo::Rect;
use std::sync::Arc;

/// Ordered set of selected ids (insertion order).
pub type SelectionSet = IndexSet<ElementId>;

/// Tracks the selected elements and whether a transform gesture is running.
#[derive(Debug, Clone, Default)]
pub struct SelectionManager {
    selected: Arc<SelectionSet>,
    last_selected: Option<ElementId>,
    version: u64,
    transforming: bool,
}

impl SelectionManager {
    /// Create an empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current set. A new `Arc` is published on every change.
    pub fn selected(&self) -> &Arc<SelectionSet> {
        &self.selected
    }

    /// Selected ids in selection order.
    pub fn ids(&self) -> Vec<ElementId> {
        self.selected.iter().cloned().collect()
    }

    /// Check if an element is selected.
    pub fn is_selected(&self, id: &ElementId) -> bool {
        self.selected.contains(id)
    }

    /// Check if nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Number of selected elements.
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    /// Anchor for range and additive operations.
    pub fn last_selected(&self) -> Option<&ElementId> {
        self.last_selected.as_ref()
    }

    /// Strictly increasing counter, bumped by every mutator.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Replace the selection.
    pub fn set_selection(&mut self, ids: impl IntoIterator<Item = ElementId>) {
        let next: SelectionSet = ids.into_iter().collect();
        let last = next.last().cloned();
        self.publish(next, last);
    }

    /// Single-click case: select exactly `id`.
    pub fn replace_selection_with_single(&mut self, id: ElementId) {
        self.set_selection([id]);
    }

    /// Add ids to the selection; the last one becomes `last_selected`.
    pub fn add_to_selection(&mut self, ids: impl IntoIterator<Item = ElementId>) {
        let mut next = (*self.selected).clone();
        let mut last = self.last_selected.clone();
        for id in ids {
            next.insert(id.clone());
            last = Some(id);
        }
        self.publish(next, last);
    }

    /// Remove ids from the selection.
    pub fn remove_from_selection<'a>(&mut self, ids: impl IntoIterator<Item = &'a ElementId>) {
        let mut next = (*self.selected).clone();
        for id in ids {
            next.shift_remove(id);
        }
        let last = self.last_selected.clone();
        self.publish(next, last);
    }

    /// Flip membership of each id.
    pub fn toggle_selection(&mut self, ids: impl IntoIterator<Item = ElementId>) {
        let mut next = (*self.selected).clone();
        let mut last = self.last_selected.clone();
        for id in ids {
            if !next.shift_remove(&id) {
                next.insert(id.clone());
                last = Some(id);
            }
        }
        self.publish(next, last);
    }

    /// Deselect everything.
    pub fn clear_selection(&mut self) {
        self.publish(SelectionSet::new(), None);
    }

    /// Select every element in render order.
    pub fn select_all(&mut self, store: &ElementStore) {
        self.set_selection(store.order().iter().cloned());
    }

    /// Drop ids that no longer exist in the store.
    pub fn prune_selection(&mut self, store: &ElementStore) {
        let next: SelectionSet = self
            .selected
            .iter()
            .filter(|id| store.contains(id))
            .cloned()
            .collect();
        let last = self.last_selected.clone();
        self.publish(next, last);
    }

    /// Union bounds of the selected elements.
    pub fn selection_bounds(&self, store: &ElementStore) -> Option<Rect> {
        store.bounds_of(self.selected.iter())
    }

    /// Close the gate for a new gesture. Returns `false` if one is running.
    pub fn begin_transform(&mut self) -> bool {
        if self.transforming {
            return false;
        }
        self.transforming = true;
        true
    }

    /// Release the transform gate.
    pub fn end_transform(&mut self) {
        self.transforming = false;
    }

    /// Check if a move/resize gesture holds the gate.
    pub fn is_transforming(&self) -> bool {
        self.transforming
    }

    /// Lock aspect ratio if ANY selected element is a circle, an image, or a
    /// rectangle/ellipse flagged `lock_aspect_ratio`.
    pub fn should_lock_aspect_ratio(&self, store: &ElementStore) -> bool {
        lock_aspect_ratio_for(self.selected.iter(), store)
    }

    fn publish(&mut self, next: SelectionSet, last: Option<ElementId>) {
        self.last_selected = match last {
            Some(id) if next.contains(&id) => Some(id),
            _ => next.last().cloned(),
        };
        self.selected = Arc::new(next);
        self.version += 1;
    }
}

/// Aspect-lock policy over an arbitrary id set.
pub fn lock_aspect_ratio_for<'a>(
    ids: impl IntoIterator<Item = &'a ElementId>,
    store: &ElementStore,
) -> bool {
    ids.into_iter()
        .filter_map(|id| store.get(id))
        .any(|e| match e.kind {
            ElementKind::Circle | ElementKind::Image => true,
            ElementKind::Rectangle | ElementKind::Ellipse => e.lock_aspect_ratio,
            _ => false,
        })
}
