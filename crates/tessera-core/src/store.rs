//! Copy-on-write element store with explicit render order.
//!
//! Every mutation swaps in a fresh `Arc` for the mapping and/or the order, so
//! a reader holding a [`StoreSnapshot`] keeps a consistent view and
//! `Arc::ptr_eq` is a valid "something changed" signal. Element records are
//! themselves `Arc`s shared between snapshots; only changed records are new.
//!
//! Mutators return the [`Change`]s they performed so the history engine can
//! record and invert them.

use crate::element::{Element, ElementId, ElementPatch};
use crate::error::Result;
use kurbo::{Point, Rect, Vec2};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Id → element mapping.
pub type ElementMap = HashMap<ElementId, Arc<Element>>;

/// Render order, back to front.
pub type RenderOrder = Vec<ElementId>;

/// An elementary, reversible store mutation.
#[derive(Debug, Clone)]
pub enum Change {
    Insert { element: Arc<Element>, index: usize },
    Remove { element: Arc<Element>, index: usize },
    Update { before: Arc<Element>, after: Arc<Element> },
    Reorder { before: Arc<RenderOrder>, after: Arc<RenderOrder> },
    Replace { before: StoreSnapshot, after: StoreSnapshot },
}

impl Change {
    /// The change that exactly undoes this one.
    pub fn inverse(&self) -> Change {
        match self {
            Change::Insert { element, index } => Change::Remove {
                element: element.clone(),
                index: *index,
            },
            Change::Remove { element, index } => Change::Insert {
                element: element.clone(),
                index: *index,
            },
            Change::Update { before, after } => Change::Update {
                before: after.clone(),
                after: before.clone(),
            },
            Change::Reorder { before, after } => Change::Reorder {
                before: after.clone(),
                after: before.clone(),
            },
            Change::Replace { before, after } => Change::Replace {
                before: after.clone(),
                after: before.clone(),
            },
        }
    }

    /// Ids whose geometry may differ after this change.
    pub fn touched_ids(&self) -> Vec<ElementId> {
        match self {
            Change::Insert { element, .. } | Change::Remove { element, .. } => {
                vec![element.id.clone()]
            }
            Change::Update { after, .. } => vec![after.id.clone()],
            Change::Reorder { .. } => Vec::new(),
            Change::Replace { after, .. } => after.order.iter().cloned().collect(),
        }
    }
}

/// Immutable view of the store at one point in time.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub elements: Arc<ElementMap>,
    pub order: Arc<RenderOrder>,
}

impl StoreSnapshot {
    /// True if both containers are the very same allocation.
    pub fn same_as(&self, other: &StoreSnapshot) -> bool {
        Arc::ptr_eq(&self.elements, &other.elements) && Arc::ptr_eq(&self.order, &other.order)
    }

    /// Elements in paint order.
    pub fn ordered(&self) -> impl Iterator<Item = &Arc<Element>> {
        self.order.iter().filter_map(|id| self.elements.get(id))
    }

    /// Ids whose record is new or different compared to `earlier`.
    pub fn changed_since(&self, earlier: &StoreSnapshot) -> Vec<ElementId> {
        if Arc::ptr_eq(&self.elements, &earlier.elements) {
            return Vec::new();
        }
        self.order
            .iter()
            .filter(|id| match (self.elements.get(*id), earlier.elements.get(*id)) {
                (Some(now), Some(then)) => !Arc::ptr_eq(now, then),
                (Some(_), None) => true,
                _ => false,
            })
            .cloned()
            .collect()
    }
}

/// The element store.
#[derive(Debug, Clone, Default)]
pub struct ElementStore {
    elements: Arc<ElementMap>,
    order: Arc<RenderOrder>,
}

impl ElementStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) snapshot of the current state.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            elements: self.elements.clone(),
            order: self.order.clone(),
        }
    }

    /// The id to element map. Replaced, never mutated, on every change.
    pub fn elements(&self) -> &Arc<ElementMap> {
        &self.elements
    }

    /// Render order, bottom to top.
    pub fn order(&self) -> &Arc<RenderOrder> {
        &self.order
    }

    /// Look up an element by id.
    pub fn get(&self, id: &ElementId) -> Option<&Arc<Element>> {
        self.elements.get(id)
    }

    /// Check if an element exists.
    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the store has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Position of `id` in render order.
    pub fn index_of(&self, id: &ElementId) -> Option<usize> {
        self.order.iter().position(|o| o == id)
    }

    /// Elements in paint order (back to front).
    pub fn ordered(&self) -> impl Iterator<Item = &Arc<Element>> {
        self.order.iter().filter_map(|id| self.elements.get(id))
    }

    /// Union bounds of every element, `None` when empty.
    pub fn content_bounds(&self) -> Option<Rect> {
        self.bounds_of(self.order.iter())
    }

    /// Union bounds of the given ids that exist.
    pub fn bounds_of<'a>(&self, ids: impl IntoIterator<Item = &'a ElementId>) -> Option<Rect> {
        ids.into_iter()
            .filter_map(|id| self.elements.get(id))
            .map(|e| e.bounds())
            .reduce(|a, b| a.union(b))
    }

    /// Elements hit at a world point, front to back.
    pub fn elements_at_point(&self, point: Point, tolerance: f64) -> Vec<ElementId> {
        self.order
            .iter()
            .rev()
            .filter(|id| {
                self.elements
                    .get(*id)
                    .is_some_and(|e| e.hit_test(point, tolerance))
            })
            .cloned()
            .collect()
    }

    /// Elements whose bounds intersect `rect`, back to front.
    pub fn elements_in_rect(&self, rect: Rect) -> Vec<ElementId> {
        self.ordered()
            .filter(|e| {
                let bounds = e.bounds().inflate(1.0, 1.0);
                rect.intersect(bounds).area() > 0.0
            })
            .map(|e| e.id.clone())
            .collect()
    }

    /// Elements whose endpoints reference any of `ids`.
    pub fn dependents_of(&self, ids: &HashSet<ElementId>) -> Vec<ElementId> {
        self.ordered()
            .filter(|e| !ids.contains(&e.id) && e.referenced_ids().any(|r| ids.contains(r)))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Insert or replace an element. New ids are appended to render order.
    pub fn upsert(&mut self, element: Element) -> Result<Change> {
        element.validate()?;
        let element = Arc::new(element);
        let mut elements = (*self.elements).clone();
        let change = match elements.insert(element.id.clone(), element.clone()) {
            Some(before) => Change::Update {
                before,
                after: element,
            },
            None => {
                let mut order = (*self.order).clone();
                order.push(element.id.clone());
                let index = order.len() - 1;
                self.order = Arc::new(order);
                Change::Insert { element, index }
            }
        };
        self.elements = Arc::new(elements);
        Ok(change)
    }

    /// Insert a new element at a specific render index (clamped).
    /// Replaces in place if the id already exists.
    pub fn insert_at(&mut self, element: Element, index: usize) -> Result<Change> {
        if self.contains(&element.id) {
            return self.upsert(element);
        }
        element.validate()?;
        let change = Change::Insert {
            index: index.min(self.order.len()),
            element: Arc::new(element),
        };
        self.apply(&change);
        Ok(change)
    }

    /// Merge a patch into an existing element. No-op for unknown ids.
    pub fn update(&mut self, id: &ElementId, patch: &ElementPatch) -> Result<Option<Change>> {
        self.update_with(id, |e| patch.apply(e))
    }

    /// Replace an existing element with `f(current)`. No-op for unknown ids.
    /// The id is pinned to `id` regardless of what `f` returns.
    pub fn update_with(
        &mut self,
        id: &ElementId,
        f: impl FnOnce(&Element) -> Element,
    ) -> Result<Option<Change>> {
        let Some(before) = self.elements.get(id).cloned() else {
            return Ok(None);
        };
        let mut next = f(&before);
        next.id = id.clone();
        if next == *before {
            return Ok(None);
        }
        next.validate()?;
        let change = Change::Update {
            before,
            after: Arc::new(next),
        };
        self.apply(&change);
        Ok(Some(change))
    }

    /// Remove an element and its order entry. No-op for unknown ids.
    pub fn delete(&mut self, id: &ElementId) -> Option<Change> {
        let element = self.elements.get(id).cloned()?;
        let index = self.index_of(id)?;
        let change = Change::Remove { element, index };
        self.apply(&change);
        Some(change)
    }

    /// Move an element to the top of the render order.
    pub fn bring_to_front(&mut self, id: &ElementId) -> Option<Change> {
        let last = self.order.len().checked_sub(1)?;
        self.move_to(id, last)
    }

    /// Move an element to the bottom of the render order.
    pub fn send_to_back(&mut self, id: &ElementId) -> Option<Change> {
        self.move_to(id, 0)
    }

    /// Move one step towards the front.
    pub fn bring_forward(&mut self, id: &ElementId) -> Option<Change> {
        let index = self.index_of(id)?;
        self.move_to(id, index + 1)
    }

    /// Move one step towards the back.
    pub fn send_backward(&mut self, id: &ElementId) -> Option<Change> {
        let index = self.index_of(id)?;
        self.move_to(id, index.checked_sub(1)?)
    }

    /// Move an element to a render index (clamped). Geometry is untouched.
    pub fn move_to(&mut self, id: &ElementId, index: usize) -> Option<Change> {
        let current = self.index_of(id)?;
        let target = index.min(self.order.len() - 1);
        if current == target {
            return None;
        }
        let mut order = (*self.order).clone();
        let moved = order.remove(current);
        order.insert(target, moved);
        let change = Change::Reorder {
            before: self.order.clone(),
            after: Arc::new(order),
        };
        self.apply(&change);
        Some(change)
    }

    /// Clone an element under a fresh id, offset by `offset`, directly above
    /// the source in render order.
    pub fn duplicate(&mut self, id: &ElementId, offset: Vec2) -> Result<Option<Change>> {
        let (Some(source), Some(index)) = (self.elements.get(id), self.index_of(id)) else {
            return Ok(None);
        };
        let mut clone = (**source).clone();
        clone.id = ElementId::generate();
        clone.translate(offset);
        self.insert_at(clone, index + 1).map(Some)
    }

    /// Upsert many elements as one atomic swap. Nothing changes if any
    /// element is invalid.
    pub fn add_elements(&mut self, elements: Vec<Element>) -> Result<Vec<Change>> {
        for element in &elements {
            element.validate()?;
        }
        let mut map = (*self.elements).clone();
        let mut order = (*self.order).clone();
        let mut changes = Vec::with_capacity(elements.len());
        for element in elements {
            let element = Arc::new(element);
            match map.insert(element.id.clone(), element.clone()) {
                Some(before) => changes.push(Change::Update {
                    before,
                    after: element,
                }),
                None => {
                    order.push(element.id.clone());
                    changes.push(Change::Insert {
                        element,
                        index: order.len() - 1,
                    });
                }
            }
        }
        self.commit(map, order, &changes);
        Ok(changes)
    }

    /// Patch many elements as one atomic swap. Unknown ids are skipped; an
    /// invalid result aborts the whole batch.
    pub fn update_elements(&mut self, updates: &[(ElementId, ElementPatch)]) -> Result<Vec<Change>> {
        let mut map = (*self.elements).clone();
        let mut changes = Vec::new();
        for (id, patch) in updates {
            let Some(before) = map.get(id).cloned() else {
                continue;
            };
            let next = patch.apply(&before);
            if next == *before {
                continue;
            }
            next.validate()?;
            let after = Arc::new(next);
            map.insert(id.clone(), after.clone());
            changes.push(Change::Update { before, after });
        }
        let order = (*self.order).clone();
        self.commit(map, order, &changes);
        Ok(changes)
    }

    /// Remove many elements as one atomic swap. Unknown ids are skipped.
    /// Changes are ordered so that replaying them in reverse restores the
    /// original indices.
    pub fn remove_elements(&mut self, ids: &[ElementId]) -> Vec<Change> {
        let targets: HashSet<&ElementId> = ids.iter().collect();
        let mut map = (*self.elements).clone();
        let mut order = (*self.order).clone();
        let mut changes = Vec::new();
        let mut index = 0;
        while index < order.len() {
            if targets.contains(&order[index]) {
                let id = order.remove(index);
                if let Some(element) = map.remove(&id) {
                    changes.push(Change::Remove { element, index });
                }
            } else {
                index += 1;
            }
        }
        self.commit(map, order, &changes);
        changes
    }

    /// Replace the whole store. `order` is normalized: duplicates and unknown
    /// ids are dropped, missing ids are appended in input order.
    pub fn replace_all(&mut self, elements: Vec<Element>, order: Option<Vec<ElementId>>) -> Result<Change> {
        for element in &elements {
            element.validate()?;
        }
        let input_order: Vec<ElementId> = elements.iter().map(|e| e.id.clone()).collect();
        let map: ElementMap = elements
            .into_iter()
            .map(|e| (e.id.clone(), Arc::new(e)))
            .collect();
        let mut seen = HashSet::new();
        let normalized: RenderOrder = order
            .unwrap_or_default()
            .into_iter()
            .chain(input_order)
            .filter(|id| map.contains_key(id) && seen.insert(id.clone()))
            .collect();
        let change = Change::Replace {
            before: self.snapshot(),
            after: StoreSnapshot {
                elements: Arc::new(map),
                order: Arc::new(normalized),
            },
        };
        self.apply(&change);
        Ok(change)
    }

    /// Apply a recorded change (used for undo/redo replay and live updates).
    pub fn apply(&mut self, change: &Change) {
        match change {
            Change::Insert { element, index } => {
                let mut map = (*self.elements).clone();
                let mut order = (*self.order).clone();
                if map.insert(element.id.clone(), element.clone()).is_none() {
                    order.insert((*index).min(order.len()), element.id.clone());
                    self.order = Arc::new(order);
                }
                self.elements = Arc::new(map);
            }
            Change::Remove { element, .. } => {
                let mut map = (*self.elements).clone();
                if map.remove(&element.id).is_some() {
                    let mut order = (*self.order).clone();
                    order.retain(|id| id != &element.id);
                    self.order = Arc::new(order);
                    self.elements = Arc::new(map);
                }
            }
            Change::Update { after, .. } => {
                if self.contains(&after.id) {
                    let mut map = (*self.elements).clone();
                    map.insert(after.id.clone(), after.clone());
                    self.elements = Arc::new(map);
                }
            }
            Change::Reorder { after, .. } => {
                self.order = after.clone();
            }
            Change::Replace { after, .. } => {
                self.elements = after.elements.clone();
                self.order = after.order.clone();
            }
        }
    }

    fn commit(&mut self, map: ElementMap, order: RenderOrder, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        if order != *self.order {
            self.order = Arc::new(order);
        }
        self.elements = Arc::new(map);
    }
}
