//! Serializable scene state at the persistence boundary.
//!
//! History is session state and never part of a scene.

use crate::element::{Element, ElementId};
use crate::error::Result;
use crate::store::StoreSnapshot;
use crate::viewport::Viewport;
use serde::{Deserialize, Serialize};

/// Current scene format version.
pub const SCENE_FORMAT_VERSION: u32 = 1;

fn default_version() -> u32 {
    SCENE_FORMAT_VERSION
}

/// Elements, render order, selection and view of one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub elements: Vec<Element>,
    #[serde(default)]
    pub order: Vec<ElementId>,
    #[serde(default)]
    pub selected: Vec<ElementId>,
    #[serde(default)]
    pub viewport: Viewport,
}

impl Default for SceneSnapshot {
    fn default() -> Self {
        Self {
            version: SCENE_FORMAT_VERSION,
            elements: Vec::new(),
            order: Vec::new(),
            selected: Vec::new(),
            viewport: Viewport::default(),
        }
    }
}

impl SceneSnapshot {
    /// Build from a store snapshot; elements are listed in render order.
    pub fn capture(store: &StoreSnapshot, selected: Vec<ElementId>, viewport: Viewport) -> Self {
        Self {
            version: SCENE_FORMAT_VERSION,
            elements: store.ordered().map(|e| (**e).clone()).collect(),
            order: store.order.to_vec(),
            selected,
            viewport,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let scene: Self = serde_json::from_str(json)?;
        if scene.version > SCENE_FORMAT_VERSION {
            log::warn!(
                "scene format {} is newer than {}, loading anyway",
                scene.version,
                SCENE_FORMAT_VERSION
            );
        }
        Ok(scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Endpoint;
    use crate::store::ElementStore;
    use kurbo::Vec2;

    #[test]
    fn test_json_roundtrip() {
        let mut store = ElementStore::new();
        store
            .upsert(Element::rectangle(0.0, 0.0, 100.0, 50.0).with_id("r1"))
            .unwrap();
        store
            .upsert(Element::connector(Endpoint::element("r1"), Endpoint::point(kurbo::Point::ZERO)).with_id("c1"))
            .unwrap();
        let mut viewport = Viewport::default();
        viewport.pan_by(Vec2::new(5.0, 5.0));
        let scene = SceneSnapshot::capture(&store.snapshot(), vec!["r1".into()], viewport);

        let json = scene.to_json().unwrap();
        let back = SceneSnapshot::from_json(&json).unwrap();
        assert_eq!(back, scene);
        assert_eq!(back.order, vec![ElementId::from("r1"), ElementId::from("c1")]);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let scene = SceneSnapshot::from_json(r#"{ "elements": [] }"#).unwrap();
        assert_eq!(scene.version, SCENE_FORMAT_VERSION);
        assert!(scene.order.is_empty());
        assert!((scene.viewport.scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        assert!(matches!(
            SceneSnapshot::from_json("{"),
            Err(crate::error::EngineError::Serialization(_))
        ));
    }
}
