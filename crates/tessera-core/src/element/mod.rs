//! Element model: the drawable records held by the store.

mod patch;
mod style;

pub use patch::ElementPatch;
pub use style::{ElementStyle, Rgba};

use crate::error::{EngineError, Result};
use kurbo::{Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique identifier for an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// A fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ElementId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ElementId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type tag of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Rectangle,
    Ellipse,
    Circle,
    Triangle,
    Text,
    /// Freehand drawing stroke.
    Stroke,
    Table,
    Connector,
    Image,
}

impl ElementKind {
    /// Kinds whose geometry is an ellipse inscribed in the box.
    pub fn is_elliptical(self) -> bool {
        matches!(self, ElementKind::Ellipse | ElementKind::Circle)
    }
}

/// Geometry of an element, in world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    /// Axis-aligned box before rotation; `position` is the top-left corner.
    Box { position: Point, size: Size },
    /// Point sequence (strokes, routed connectors).
    Points { points: Vec<Point> },
}

impl Geometry {
    pub fn from_rect(rect: Rect) -> Self {
        let rect = rect.abs();
        Geometry::Box {
            position: rect.origin(),
            size: rect.size(),
        }
    }

    /// Bounding box, ignoring rotation.
    pub fn bounds(&self) -> Rect {
        match self {
            Geometry::Box { position, size } => Rect::from_origin_size(*position, *size).abs(),
            Geometry::Points { points } => points_bounds(points).unwrap_or_default(),
        }
    }

    pub fn translate(&mut self, delta: Vec2) {
        match self {
            Geometry::Box { position, .. } => *position += delta,
            Geometry::Points { points } => {
                for p in points.iter_mut() {
                    *p += delta;
                }
            }
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            Geometry::Box { position, size } => {
                position.is_finite() && size.width.is_finite() && size.height.is_finite()
            }
            Geometry::Points { points } => points.iter().all(|p| p.is_finite()),
        }
    }
}

/// Bounding box of a point sequence.
pub fn points_bounds(points: &[Point]) -> Option<Rect> {
    let (first, rest) = points.split_first()?;
    Some(rest.iter().fold(Rect::from_points(*first, *first), |r, p| {
        r.union_pt(*p)
    }))
}

/// One end of a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Endpoint {
    /// Free-floating world point.
    Point { at: Point },
    /// Anchored to another element.
    Element { id: ElementId },
}

impl Endpoint {
    pub fn point(at: Point) -> Self {
        Endpoint::Point { at }
    }

    pub fn element(id: impl Into<ElementId>) -> Self {
        Endpoint::Element { id: id.into() }
    }

    /// The anchored element id, if any.
    pub fn element_id(&self) -> Option<&ElementId> {
        match self {
            Endpoint::Element { id } => Some(id),
            Endpoint::Point { .. } => None,
        }
    }
}

/// A drawable element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub kind: ElementKind,
    pub geometry: Geometry,
    /// Rotation in radians around the bounds center.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub lock_aspect_ratio: bool,
    #[serde(default)]
    pub style: ElementStyle,
    /// Free-form payload (text content, table cells, image source…).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Endpoint>,
}

impl Element {
    /// Create an element with a fresh id and default style.
    pub fn new(kind: ElementKind, geometry: Geometry) -> Self {
        Self {
            id: ElementId::generate(),
            kind,
            geometry,
            rotation: 0.0,
            lock_aspect_ratio: false,
            style: ElementStyle::default(),
            data: serde_json::Value::Null,
            from: None,
            to: None,
        }
    }

    /// Create a box-shaped element of the given kind.
    pub fn boxed(kind: ElementKind, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(
            kind,
            Geometry::Box {
                position: Point::new(x, y),
                size: Size::new(width, height),
            },
        )
    }

    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::boxed(ElementKind::Rectangle, x, y, width, height)
    }

    /// A circle centered at `center`.
    pub fn circle(center: Point, radius: f64) -> Self {
        Self::boxed(
            ElementKind::Circle,
            center.x - radius,
            center.y - radius,
            radius * 2.0,
            radius * 2.0,
        )
    }

    /// A freehand stroke through `points`.
    pub fn stroke(points: Vec<Point>) -> Self {
        Self::new(ElementKind::Stroke, Geometry::Points { points })
    }

    /// A connector between two endpoints. Its routed points start as the
    /// straight segment between any free endpoints and are recomputed by the
    /// refresher once anchored elements are known.
    pub fn connector(from: Endpoint, to: Endpoint) -> Self {
        let seed = |e: &Endpoint| match e {
            Endpoint::Point { at } => *at,
            Endpoint::Element { .. } => Point::ZERO,
        };
        let points = vec![seed(&from), seed(&to)];
        let mut element = Self::new(ElementKind::Connector, Geometry::Points { points });
        element.from = Some(from);
        element.to = Some(to);
        element
    }

    pub fn with_id(mut self, id: impl Into<ElementId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_style(mut self, style: ElementStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_lock_aspect_ratio(mut self, lock: bool) -> Self {
        self.lock_aspect_ratio = lock;
        self
    }

    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = rotation;
        self
    }

    /// Bounding box in world coordinates, including rotation.
    pub fn bounds(&self) -> Rect {
        let bounds = self.geometry.bounds();
        if self.rotation == 0.0 || matches!(self.geometry, Geometry::Points { .. }) {
            return bounds;
        }
        let center = bounds.center();
        let (sin, cos) = self.rotation.sin_cos();
        let corners = [
            Point::new(bounds.x0, bounds.y0),
            Point::new(bounds.x1, bounds.y0),
            Point::new(bounds.x1, bounds.y1),
            Point::new(bounds.x0, bounds.y1),
        ]
        .map(|p| {
            let d = p - center;
            center + Vec2::new(d.x * cos - d.y * sin, d.x * sin + d.y * cos)
        });
        points_bounds(&corners).unwrap_or(bounds)
    }

    /// Move the element by `delta`, including free connector endpoints.
    pub fn translate(&mut self, delta: Vec2) {
        self.geometry.translate(delta);
        for endpoint in [&mut self.from, &mut self.to].into_iter().flatten() {
            if let Endpoint::Point { at } = endpoint {
                *at += delta;
            }
        }
    }

    /// Ids of elements this one is anchored to.
    pub fn referenced_ids(&self) -> impl Iterator<Item = &ElementId> {
        [self.from.as_ref(), self.to.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(Endpoint::element_id)
    }

    pub fn references(&self, id: &ElementId) -> bool {
        self.referenced_ids().any(|r| r == id)
    }

    /// Check if a world point hits this element.
    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        let pad = tolerance + self.style.stroke_width / 2.0;
        match &self.geometry {
            Geometry::Points { points } => {
                if points.len() == 1 {
                    return (points[0] - point).hypot() <= pad;
                }
                point_to_polyline_dist(point, points) <= pad
            }
            Geometry::Box { .. } => {
                let bounds = self.geometry.bounds();
                let local = unrotate(point, bounds.center(), self.rotation);
                if self.kind.is_elliptical() {
                    let c = bounds.center();
                    let rx = bounds.width() / 2.0 + pad;
                    let ry = bounds.height() / 2.0 + pad;
                    if rx <= 0.0 || ry <= 0.0 {
                        return false;
                    }
                    let n = ((local.x - c.x) / rx).powi(2) + ((local.y - c.y) / ry).powi(2);
                    return n <= 1.0;
                }
                let outer = bounds.inflate(pad, pad);
                if self.style.is_filled() || self.kind != ElementKind::Rectangle {
                    outer.contains(local)
                } else {
                    let inner = bounds.inflate(-pad, -pad);
                    outer.contains(local) && !inner.contains(local)
                }
            }
        }
    }

    /// Reject records that would corrupt the store.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(EngineError::invalid(&self.id, "empty id"));
        }
        if !self.geometry.is_finite() || !self.rotation.is_finite() {
            return Err(EngineError::invalid(&self.id, "non-finite geometry"));
        }
        if self.style.stroke_width.is_nan() || self.style.stroke_width < 0.0 {
            return Err(EngineError::invalid(&self.id, "negative stroke width"));
        }
        if self.kind == ElementKind::Connector && (self.from.is_none() || self.to.is_none()) {
            return Err(EngineError::invalid(&self.id, "connector without endpoints"));
        }
        if self.references(&self.id) {
            return Err(EngineError::invalid(&self.id, "connector anchored to itself"));
        }
        Ok(())
    }
}

fn unrotate(point: Point, center: Point, rotation: f64) -> Point {
    if rotation == 0.0 {
        return point;
    }
    let (sin, cos) = (-rotation).sin_cos();
    let d = point - center;
    center + Vec2::new(d.x * cos - d.y * sin, d.x * sin + d.y * cos)
}

/// Distance from a point to the segment `a`→`b`.
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = b - a;
    let pv = point - a;
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    (point - (a + seg * t)).hypot()
}

/// Minimum distance from a point to a polyline.
pub fn point_to_polyline_dist(point: Point, points: &[Point]) -> f64 {
    points
        .windows(2)
        .map(|w| point_to_segment_dist(point, w[0], w[1]))
        .fold(f64::INFINITY, f64::min)
}
