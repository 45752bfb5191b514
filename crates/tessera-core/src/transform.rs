//! Move/resize gestures computed from a per-gesture snapshot.
//!
//! Every tick derives the new geometry from the elements captured when the
//! gesture began and the total pointer delta, so rounding never accumulates
//! over a long drag.

use crate::element::{Element, ElementId, Endpoint, Geometry};
use crate::store::ElementStore;
use kurbo::{Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Smallest width/height a resize can produce.
const MIN_EXTENT: f64 = 1.0;

/// Corner positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    /// The diagonally opposite corner.
    pub fn opposite(self) -> Corner {
        match self {
            Corner::TopLeft => Corner::BottomRight,
            Corner::TopRight => Corner::BottomLeft,
            Corner::BottomLeft => Corner::TopRight,
            Corner::BottomRight => Corner::TopLeft,
        }
    }

    /// This corner of `rect`.
    pub fn of(self, rect: Rect) -> Point {
        match self {
            Corner::TopLeft => Point::new(rect.x0, rect.y0),
            Corner::TopRight => Point::new(rect.x1, rect.y0),
            Corner::BottomLeft => Point::new(rect.x0, rect.y1),
            Corner::BottomRight => Point::new(rect.x1, rect.y1),
        }
    }
}

/// What a gesture does to the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformKind {
    Move,
    Resize(Corner),
}

/// Pre-gesture state of the transformed elements.
#[derive(Debug, Clone)]
pub struct TransformSnapshot {
    originals: HashMap<ElementId, Arc<Element>>,
    /// Connectors anchored to the originals, as they were at gesture start.
    dependents: HashMap<ElementId, Arc<Element>>,
    bounds: Rect,
    lock_aspect: bool,
}

impl TransformSnapshot {
    /// Capture the given ids. `None` when none of them exist.
    pub fn capture<'a>(
        ids: impl IntoIterator<Item = &'a ElementId>,
        store: &ElementStore,
        lock_aspect: bool,
    ) -> Option<Self> {
        let originals: HashMap<ElementId, Arc<Element>> = ids
            .into_iter()
            .filter_map(|id| store.get(id).map(|e| (id.clone(), e.clone())))
            .collect();
        let bounds = store.bounds_of(originals.keys())?;
        let moved: HashSet<ElementId> = originals.keys().cloned().collect();
        let dependents = store
            .dependents_of(&moved)
            .into_iter()
            .filter_map(|id| store.get(&id).map(|e| (id.clone(), e.clone())))
            .collect();
        Some(Self {
            originals,
            dependents,
            bounds,
            lock_aspect,
        })
    }

    /// Selected elements as they were when the gesture began.
    pub fn originals(&self) -> &HashMap<ElementId, Arc<Element>> {
        &self.originals
    }

    pub fn original(&self, id: &ElementId) -> Option<&Arc<Element>> {
        self.originals.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ElementId> {
        self.originals.keys()
    }

    /// Connectors anchored to the selection, captured for rollback.
    pub fn dependents(&self) -> &HashMap<ElementId, Arc<Element>> {
        &self.dependents
    }

    /// Every captured record, transformed elements and their connectors.
    pub fn captured(&self) -> impl Iterator<Item = (&ElementId, &Arc<Element>)> {
        self.originals.iter().chain(self.dependents.iter())
    }

    /// Union bounds at gesture start.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn lock_aspect(&self) -> bool {
        self.lock_aspect
    }
}

/// A running move or resize gesture.
#[derive(Debug, Clone)]
pub struct TransformSession {
    kind: TransformKind,
    origin: Point,
    pointer: Point,
    snapshot: TransformSnapshot,
}

impl TransformSession {
    /// Start a session with the pointer at `origin`.
    pub fn new(kind: TransformKind, origin: Point, snapshot: TransformSnapshot) -> Self {
        Self {
            kind,
            origin,
            pointer: origin,
            snapshot,
        }
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    pub fn snapshot(&self) -> &TransformSnapshot {
        &self.snapshot
    }

    /// Total pointer travel since the gesture began.
    pub fn delta(&self) -> Vec2 {
        self.pointer - self.origin
    }

    /// Record the latest pointer position.
    pub fn set_pointer(&mut self, pointer: Point) {
        self.pointer = pointer;
    }

    /// Union bounds after the current tick.
    pub fn target_bounds(&self) -> Rect {
        match self.kind {
            TransformKind::Move => self.snapshot.bounds + self.delta(),
            TransformKind::Resize(corner) => resize_bounds(
                self.snapshot.bounds,
                corner,
                self.delta(),
                self.snapshot.lock_aspect,
            ),
        }
    }

    /// The transformed element for every captured id.
    pub fn compute(&self) -> Vec<Element> {
        let delta = self.delta();
        let from = self.snapshot.bounds;
        let to = self.target_bounds();
        let flip = match self.kind {
            TransformKind::Move => (false, false),
            TransformKind::Resize(corner) => resize_flips(from, corner, delta),
        };
        self.snapshot
            .originals
            .values()
            .map(|original| match self.kind {
                TransformKind::Move => {
                    let mut moved = (**original).clone();
                    moved.translate(delta);
                    moved
                }
                TransformKind::Resize(_) => remap(original, from, to, flip),
            })
            .collect()
    }
}

/// New bounds after dragging `corner` by `delta`; the opposite corner stays
/// put. With `keep_aspect` the larger of the two scale factors wins.
/// Dragging past the opposite corner flips the bounds to that side; see
/// [`resize_flips`] for which axes the contents must be mirrored on.
pub fn resize_bounds(bounds: Rect, corner: Corner, delta: Vec2, keep_aspect: bool) -> Rect {
    let anchor = corner.opposite().of(bounds);
    let moving = corner.of(bounds) + delta;

    let old = Size::new(bounds.width().max(MIN_EXTENT), bounds.height().max(MIN_EXTENT));
    let mut width = (moving.x - anchor.x).abs().max(MIN_EXTENT);
    let mut height = (moving.y - anchor.y).abs().max(MIN_EXTENT);
    if keep_aspect {
        let scale = (width / old.width).max(height / old.height);
        width = old.width * scale;
        height = old.height * scale;
    }

    let dir_x = if moving.x >= anchor.x { 1.0 } else { -1.0 };
    let dir_y = if moving.y >= anchor.y { 1.0 } else { -1.0 };
    Rect::from_points(anchor, anchor + Vec2::new(dir_x * width, dir_y * height))
}

/// Whether dragging `corner` by `delta` carried it past the opposite
/// corner, per axis.
pub fn resize_flips(bounds: Rect, corner: Corner, delta: Vec2) -> (bool, bool) {
    let anchor = corner.opposite().of(bounds);
    let start = corner.of(bounds);
    let moving = start + delta;
    (
        (moving.x >= anchor.x) != (start.x >= anchor.x),
        (moving.y >= anchor.y) != (start.y >= anchor.y),
    )
}

/// Map an element from one frame of reference to another, mirroring on the
/// flipped axes.
fn remap(element: &Element, from: Rect, to: Rect, (flip_x, flip_y): (bool, bool)) -> Element {
    let kx = to.width() / from.width().max(MIN_EXTENT);
    let ky = to.height() / from.height().max(MIN_EXTENT);
    let map = |p: Point| {
        let x = if flip_x {
            to.x1 - (p.x - from.x0) * kx
        } else {
            to.x0 + (p.x - from.x0) * kx
        };
        let y = if flip_y {
            to.y1 - (p.y - from.y0) * ky
        } else {
            to.y0 + (p.y - from.y0) * ky
        };
        Point::new(x, y)
    };

    let mut next = element.clone();
    next.geometry = match &element.geometry {
        Geometry::Box { position, size } => {
            let rect = Rect::from_points(map(*position), map(*position + size.to_vec2()));
            Geometry::Box {
                position: rect.origin(),
                size: Size::new(rect.width().max(MIN_EXTENT), rect.height().max(MIN_EXTENT)),
            }
        }
        Geometry::Points { points } => Geometry::Points {
            points: points.iter().map(|p| map(*p)).collect(),
        },
    };
    for endpoint in [&mut next.from, &mut next.to].into_iter().flatten() {
        if let Endpoint::Point { at } = endpoint {
            *at = map(*at);
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(elements: Vec<Element>) -> ElementStore {
        let mut store = ElementStore::new();
        for element in elements {
            store.upsert(element).unwrap();
        }
        store
    }

    fn session(kind: TransformKind, store: &ElementStore, lock: bool) -> TransformSession {
        let snapshot = TransformSnapshot::capture(store.order().iter(), store, lock).unwrap();
        TransformSession::new(kind, Point::new(100.0, 100.0), snapshot)
    }

    fn assert_rect_eq(a: Rect, b: Rect) {
        assert!((a.x0 - b.x0).abs() < 1e-9, "{a:?} != {b:?}");
        assert!((a.y0 - b.y0).abs() < 1e-9, "{a:?} != {b:?}");
        assert!((a.x1 - b.x1).abs() < 1e-9, "{a:?} != {b:?}");
        assert!((a.y1 - b.y1).abs() < 1e-9, "{a:?} != {b:?}");
    }

    #[test]
    fn test_capture_skips_missing_ids() {
        let store = store_with(vec![Element::rectangle(0.0, 0.0, 10.0, 10.0).with_id("a")]);
        let ids = [ElementId::from("a"), ElementId::from("ghost")];
        let snapshot = TransformSnapshot::capture(ids.iter(), &store, false).unwrap();
        assert_eq!(snapshot.originals().len(), 1);
        assert!(TransformSnapshot::capture([&ElementId::from("ghost")], &store, false).is_none());
    }

    #[test]
    fn test_capture_includes_dependent_connectors() {
        let store = store_with(vec![
            Element::rectangle(0.0, 0.0, 10.0, 10.0).with_id("a"),
            Element::rectangle(50.0, 0.0, 10.0, 10.0).with_id("b"),
            Element::connector(Endpoint::element("a"), Endpoint::element("b")).with_id("c"),
        ]);
        let snapshot = TransformSnapshot::capture([&ElementId::from("a")], &store, false).unwrap();
        assert!(snapshot.dependents().contains_key(&ElementId::from("c")));
        assert_eq!(snapshot.captured().count(), 2);
    }

    #[test]
    fn test_move_is_computed_from_snapshot() {
        let store = store_with(vec![Element::rectangle(0.0, 0.0, 10.0, 10.0).with_id("a")]);
        let mut session = session(TransformKind::Move, &store, false);
        for _ in 0..3 {
            session.set_pointer(Point::new(110.0, 95.0));
            let moved = session.compute();
            assert_rect_eq(moved[0].bounds(), Rect::new(10.0, -5.0, 20.0, 5.0));
        }
    }

    #[test]
    fn test_resize_keeps_opposite_corner() {
        let store = store_with(vec![Element::rectangle(0.0, 0.0, 100.0, 50.0).with_id("a")]);
        let mut session = session(TransformKind::Resize(Corner::BottomRight), &store, false);
        session.set_pointer(Point::new(150.0, 110.0));
        let resized = session.compute();
        assert_rect_eq(resized[0].bounds(), Rect::new(0.0, 0.0, 150.0, 60.0));

        let mut session = session_tl(&store);
        session.set_pointer(Point::new(120.0, 110.0));
        let resized = session.compute();
        assert_rect_eq(resized[0].bounds(), Rect::new(20.0, 10.0, 100.0, 50.0));
    }

    fn session_tl(store: &ElementStore) -> TransformSession {
        session(TransformKind::Resize(Corner::TopLeft), store, false)
    }

    #[test]
    fn test_resize_with_aspect_lock_is_uniform() {
        let store = store_with(vec![Element::circle(Point::new(50.0, 50.0), 50.0).with_id("c")]);
        let mut session = session(TransformKind::Resize(Corner::BottomRight), &store, true);
        session.set_pointer(Point::new(200.0, 120.0));
        let resized = session.compute();
        let bounds = resized[0].bounds();
        assert!((bounds.width() - bounds.height()).abs() < 1e-9);
        assert!((bounds.width() - 200.0).abs() < 1e-9);
        assert_eq!(Point::new(bounds.x0, bounds.y0), Point::ZERO);
    }

    #[test]
    fn test_group_resize_scales_points_and_boxes() {
        let store = store_with(vec![
            Element::rectangle(0.0, 0.0, 50.0, 50.0).with_id("r"),
            Element::stroke(vec![Point::new(50.0, 50.0), Point::new(100.0, 100.0)]).with_id("s"),
        ]);
        let mut session = session(TransformKind::Resize(Corner::BottomRight), &store, false);
        session.set_pointer(Point::new(200.0, 200.0));
        let by_id: HashMap<ElementId, Element> =
            session.compute().into_iter().map(|e| (e.id.clone(), e)).collect();
        assert_rect_eq(by_id[&ElementId::from("r")].bounds(), Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_rect_eq(by_id[&ElementId::from("s")].bounds(), Rect::new(100.0, 100.0, 200.0, 200.0));
    }

    #[test]
    fn test_resize_never_collapses() {
        let bounds = Rect::new(0.0, 0.0, 10.0, 10.0);
        let resized = resize_bounds(bounds, Corner::BottomRight, Vec2::new(-10.0, -10.0), false);
        assert!(resized.width() >= MIN_EXTENT);
        assert!(resized.height() >= MIN_EXTENT);
    }

    #[test]
    fn test_resize_past_anchor_flips_side() {
        let bounds = Rect::new(0.0, 0.0, 10.0, 10.0);
        let resized = resize_bounds(bounds, Corner::BottomRight, Vec2::new(-30.0, 0.0), false);
        assert_rect_eq(resized, Rect::new(-20.0, 0.0, 0.0, 10.0));
        assert_eq!(
            resize_flips(bounds, Corner::BottomRight, Vec2::new(-30.0, 0.0)),
            (true, false)
        );
        assert_eq!(
            resize_flips(bounds, Corner::BottomRight, Vec2::new(-5.0, 0.0)),
            (false, false)
        );
    }

    #[test]
    fn test_resize_past_anchor_mirrors_contents() {
        let store = store_with(vec![
            Element::rectangle(0.0, 0.0, 5.0, 10.0).with_id("r"),
            Element::stroke(vec![Point::new(5.0, 0.0), Point::new(10.0, 10.0)]).with_id("s"),
        ]);
        let mut session = session(TransformKind::Resize(Corner::BottomRight), &store, false);
        session.set_pointer(Point::new(70.0, 100.0));
        let by_id: HashMap<ElementId, Element> =
            session.compute().into_iter().map(|e| (e.id.clone(), e)).collect();

        assert_rect_eq(by_id[&ElementId::from("r")].bounds(), Rect::new(-10.0, 0.0, 0.0, 10.0));
        let Geometry::Points { points } = &by_id[&ElementId::from("s")].geometry else {
            panic!("stroke lost its points");
        };
        assert!((points[0] - Point::new(-10.0, 0.0)).hypot() < 1e-9);
        assert!((points[1] - Point::new(-20.0, 10.0)).hypot() < 1e-9);
    }
}
