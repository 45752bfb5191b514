//! Re-routing of connectors whose anchored elements moved.
//!
//! Moves are accumulated between frames and resolved by a single refresh
//! pass. Routing only depends on the store and on whatever bounds the
//! renderer measured, looked up through [`RenderLookup`].

use crate::element::{Element, ElementId, ElementKind, Endpoint, Geometry};
use crate::store::{ElementStore, StoreSnapshot};
use kurbo::{Point, Rect};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Opaque handle to a node in the renderer's scene graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderHandle(pub u64);

/// Read access to renderer-owned per-element data.
pub trait RenderLookup {
    /// Bounds as laid out by the renderer (text, images), if known.
    fn measured_bounds(&self, id: &ElementId) -> Option<Rect>;

    fn handle(&self, id: &ElementId) -> Option<RenderHandle>;
}

/// id → render handle table maintained by the renderer.
#[derive(Debug, Default)]
pub struct RenderIndex {
    handles: HashMap<ElementId, RenderHandle>,
    measured: HashMap<ElementId, Rect>,
    next_handle: u64,
}

/// The form in which a renderer shares its index with the engine.
pub type SharedRenderIndex = Rc<RefCell<RenderIndex>>;

impl RenderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRenderIndex {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Sync with a store snapshot: new ids get handles, removed ids lose
    /// theirs. Returns the handles that were dropped.
    pub fn rebuild(&mut self, snapshot: &StoreSnapshot) -> Vec<RenderHandle> {
        let mut dropped: Vec<RenderHandle> = self
            .handles
            .iter()
            .filter(|(id, _)| !snapshot.elements.contains_key(*id))
            .map(|(_, handle)| *handle)
            .collect();
        dropped.sort();
        self.handles.retain(|id, _| snapshot.elements.contains_key(id));
        self.measured.retain(|id, _| snapshot.elements.contains_key(id));
        for id in snapshot.order.iter() {
            if !self.handles.contains_key(id) {
                let handle = RenderHandle(self.next_handle);
                self.next_handle += 1;
                self.handles.insert(id.clone(), handle);
            }
        }
        dropped
    }

    pub fn set_measured_bounds(&mut self, id: &ElementId, bounds: Rect) {
        self.measured.insert(id.clone(), bounds);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl RenderLookup for RenderIndex {
    fn measured_bounds(&self, id: &ElementId) -> Option<Rect> {
        self.measured.get(id).copied()
    }

    fn handle(&self, id: &ElementId) -> Option<RenderHandle> {
        self.handles.get(id).copied()
    }
}

impl RenderLookup for RefCell<RenderIndex> {
    fn measured_bounds(&self, id: &ElementId) -> Option<Rect> {
        self.borrow().measured_bounds(id)
    }

    fn handle(&self, id: &ElementId) -> Option<RenderHandle> {
        self.borrow().handle(id)
    }
}

/// A resolved connector end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    Point(Point),
    Bounds(Rect),
}

impl Anchor {
    pub fn center(&self) -> Point {
        match self {
            Anchor::Point(p) => *p,
            Anchor::Bounds(r) => r.center(),
        }
    }
}

/// Computes the routed points of a connector.
pub trait ConnectorRouter {
    fn route(&self, from: Anchor, to: Anchor) -> Vec<Point>;
}

/// Straight segment between the anchors, clipped to anchored bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightRouter;

impl ConnectorRouter for StraightRouter {
    fn route(&self, from: Anchor, to: Anchor) -> Vec<Point> {
        let a = from.center();
        let b = to.center();
        let start = match from {
            Anchor::Bounds(rect) => clip_to_rect(a, b, rect),
            Anchor::Point(p) => p,
        };
        let end = match to {
            Anchor::Bounds(rect) => clip_to_rect(b, a, rect),
            Anchor::Point(p) => p,
        };
        vec![start, end]
    }
}

/// Where the ray from `center` towards `toward` leaves `rect`.
fn clip_to_rect(center: Point, toward: Point, rect: Rect) -> Point {
    let d = toward - center;
    if d.hypot2() < f64::EPSILON {
        return center;
    }
    let half_w = rect.width() / 2.0;
    let half_h = rect.height() / 2.0;
    let tx = if d.x.abs() > f64::EPSILON { half_w / d.x.abs() } else { f64::INFINITY };
    let ty = if d.y.abs() > f64::EPSILON { half_h / d.y.abs() } else { f64::INFINITY };
    center + d * tx.min(ty).min(1.0)
}

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub rerouted: Vec<ElementId>,
    /// Render handles of the rerouted connectors, when the renderer has them.
    pub handles: Vec<RenderHandle>,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        self.rerouted.is_empty()
    }
}

/// Tracks moved ids and reroutes their dependent connectors.
pub struct DependentRefresher {
    pending: HashSet<ElementId>,
    scheduled: bool,
    router: Box<dyn ConnectorRouter>,
}

impl std::fmt::Debug for DependentRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependentRefresher")
            .field("pending", &self.pending)
            .field("scheduled", &self.scheduled)
            .finish_non_exhaustive()
    }
}

impl Default for DependentRefresher {
    fn default() -> Self {
        Self::new(Box::new(StraightRouter))
    }
}

impl DependentRefresher {
    pub fn new(router: Box<dyn ConnectorRouter>) -> Self {
        Self {
            pending: HashSet::new(),
            scheduled: false,
            router,
        }
    }

    pub fn set_router(&mut self, router: Box<dyn ConnectorRouter>) {
        self.router = router;
    }

    /// Record moved ids. Returns `true` when the caller must schedule a
    /// refresh; later calls in the same frame only accumulate.
    pub fn notify_moved(&mut self, ids: impl IntoIterator<Item = ElementId>) -> bool {
        let before = self.pending.len();
        self.pending.extend(ids);
        if self.scheduled || self.pending.len() == before {
            return false;
        }
        self.scheduled = true;
        true
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain the accumulated ids and allow the next notification to
    /// schedule again.
    pub fn take_pending(&mut self) -> HashSet<ElementId> {
        self.scheduled = false;
        std::mem::take(&mut self.pending)
    }

    /// Forget anything pending (bulk loads, gesture cancel).
    pub fn clear(&mut self) {
        self.pending.clear();
        self.scheduled = false;
    }

    /// New routed points for every connector affected by `moved`. Only
    /// connectors whose points actually change are returned.
    pub fn routes_for(
        &self,
        moved: &HashSet<ElementId>,
        store: &ElementStore,
        lookup: Option<&dyn RenderLookup>,
    ) -> Vec<(ElementId, Vec<Point>)> {
        let mut candidates = store.dependents_of(moved);
        candidates.extend(
            moved
                .iter()
                .filter(|id| store.get(id).is_some_and(|e| e.referenced_ids().next().is_some()))
                .cloned(),
        );

        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .filter_map(|id| {
                let connector = store.get(&id)?;
                let points = self.route(connector, store, lookup)?;
                match &connector.geometry {
                    Geometry::Points { points: current } if *current == points => None,
                    _ => Some((id, points)),
                }
            })
            .collect()
    }

    fn route(
        &self,
        connector: &Element,
        store: &ElementStore,
        lookup: Option<&dyn RenderLookup>,
    ) -> Option<Vec<Point>> {
        if connector.kind != ElementKind::Connector {
            return None;
        }
        let resolve = |endpoint: &Endpoint| -> Option<Anchor> {
            match endpoint {
                Endpoint::Point { at } => Some(Anchor::Point(*at)),
                Endpoint::Element { id } => {
                    let bounds = lookup
                        .and_then(|l| l.measured_bounds(id))
                        .or_else(|| store.get(id).map(|e| e.bounds()))?;
                    Some(Anchor::Bounds(bounds))
                }
            }
        };
        let from = resolve(connector.from.as_ref()?)?;
        let to = resolve(connector.to.as_ref()?)?;
        Some(self.router.route(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> ElementStore {
        let mut store = ElementStore::new();
        store
            .upsert(Element::rectangle(0.0, 0.0, 100.0, 100.0).with_id("a"))
            .unwrap();
        store
            .upsert(Element::rectangle(300.0, 0.0, 100.0, 100.0).with_id("b"))
            .unwrap();
        store
            .upsert(Element::connector(Endpoint::element("a"), Endpoint::element("b")).with_id("c"))
            .unwrap();
        store
    }

    fn moved(ids: &[&str]) -> HashSet<ElementId> {
        ids.iter().map(|id| ElementId::from(*id)).collect()
    }

    #[test]
    fn test_notify_schedules_once_per_frame() {
        let mut refresher = DependentRefresher::default();
        assert!(refresher.notify_moved([ElementId::from("a")]));
        assert!(!refresher.notify_moved([ElementId::from("b")]));
        assert!(!refresher.notify_moved([ElementId::from("a")]));
        assert_eq!(refresher.take_pending().len(), 2);
        assert!(!refresher.has_pending());
        assert!(refresher.notify_moved([ElementId::from("a")]));
    }

    #[test]
    fn test_notify_with_nothing_new_does_not_schedule() {
        let mut refresher = DependentRefresher::default();
        assert!(!refresher.notify_moved(Vec::<ElementId>::new()));
    }

    #[test]
    fn test_straight_route_is_clipped_to_bounds() {
        let store = scene();
        let refresher = DependentRefresher::default();
        let routes = refresher.routes_for(&moved(&["a"]), &store, None);
        assert_eq!(routes.len(), 1);
        let (id, points) = &routes[0];
        assert_eq!(id.as_str(), "c");
        assert_eq!(points, &vec![Point::new(100.0, 50.0), Point::new(300.0, 50.0)]);
    }

    #[test]
    fn test_unchanged_routes_are_skipped() {
        let mut store = scene();
        let refresher = DependentRefresher::default();
        let (_, points) = refresher.routes_for(&moved(&["a"]), &store, None).remove(0);
        store
            .update_with(&"c".into(), |e| {
                let mut next = e.clone();
                next.geometry = Geometry::Points { points };
                next
            })
            .unwrap();
        assert!(refresher.routes_for(&moved(&["a"]), &store, None).is_empty());
    }

    #[test]
    fn test_measured_bounds_take_precedence() {
        let store = scene();
        let index = RenderIndex::shared();
        index.borrow_mut().rebuild(&store.snapshot());
        index
            .borrow_mut()
            .set_measured_bounds(&"a".into(), Rect::new(0.0, 0.0, 200.0, 100.0));
        let refresher = DependentRefresher::default();
        let lookup: &dyn RenderLookup = &*index;
        let routes = refresher.routes_for(&moved(&["a"]), &store, Some(lookup));
        assert_eq!(routes[0].1[0], Point::new(200.0, 50.0));
    }

    #[test]
    fn test_missing_anchor_leaves_connector_alone() {
        let mut store = scene();
        store.delete(&"b".into());
        let refresher = DependentRefresher::default();
        assert!(refresher.routes_for(&moved(&["a"]), &store, None).is_empty());
    }

    #[test]
    fn test_render_index_rebuild() {
        let mut store = scene();
        let mut index = RenderIndex::new();
        assert!(index.rebuild(&store.snapshot()).is_empty());
        assert_eq!(index.len(), 3);
        let handle = index.handle(&"b".into()).unwrap();
        store.delete(&"b".into());
        assert_eq!(index.rebuild(&store.snapshot()), vec![handle]);
        assert!(index.handle(&"b".into()).is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_clip_handles_degenerate_direction() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(clip_to_rect(rect.center(), rect.center(), rect), rect.center());
        assert_eq!(
            clip_to_rect(rect.center(), Point::new(5.0, 100.0), rect),
            Point::new(5.0, 10.0)
        );
    }
}
