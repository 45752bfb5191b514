//! Partial updates merged into an existing element.

use super::{Element, ElementStyle, Endpoint, Geometry};
use kurbo::{Point, Size};
use serde_json::Value;

/// A partial element update. Unset fields leave the element untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementPatch {
    pub geometry: Option<Geometry>,
    /// Box: new top-left. Points: translates so the bounds' top-left lands here.
    pub position: Option<Point>,
    /// Box only.
    pub size: Option<Size>,
    pub rotation: Option<f64>,
    pub lock_aspect_ratio: Option<bool>,
    pub style: Option<ElementStyle>,
    /// Shallow-merged into object payloads, replaces anything else.
    pub data: Option<Value>,
    pub from: Option<Option<Endpoint>>,
    pub to: Option<Option<Endpoint>>,
}

impl ElementPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(mut self, position: Point) -> Self {
        self.position = Some(position);
        self
    }

    pub fn size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn rotation(mut self, rotation: f64) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn style(mut self, style: ElementStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn from_endpoint(mut self, from: Option<Endpoint>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to_endpoint(mut self, to: Option<Endpoint>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Produce the patched element. The id and kind never change.
    pub fn apply(&self, element: &Element) -> Element {
        let mut next = element.clone();
        if let Some(geometry) = &self.geometry {
            next.geometry = geometry.clone();
        }
        if let Some(target) = self.position {
            match &mut next.geometry {
                Geometry::Box { position, .. } => *position = target,
                geometry @ Geometry::Points { .. } => {
                    let origin = geometry.bounds().origin();
                    geometry.translate(target - origin);
                }
            }
        }
        if let (Some(target), Geometry::Box { size, .. }) = (self.size, &mut next.geometry) {
            *size = target;
        }
        if let Some(rotation) = self.rotation {
            next.rotation = rotation;
        }
        if let Some(lock) = self.lock_aspect_ratio {
            next.lock_aspect_ratio = lock;
        }
        if let Some(style) = &self.style {
            next.style = style.clone();
        }
        if let Some(data) = &self.data {
            next.data = merge_data(&next.data, data);
        }
        if let Some(from) = &self.from {
            next.from = from.clone();
        }
        if let Some(to) = &self.to {
            next.to = to.clone();
        }
        next
    }
}

fn merge_data(current: &Value, incoming: &Value) -> Value {
    match (current, incoming) {
        (Value::Object(base), Value::Object(extra)) => {
            let mut merged = base.clone();
            for (key, value) in extra {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}
