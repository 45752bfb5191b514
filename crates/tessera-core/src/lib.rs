//! Tessera Core Library
//!
//! In-process state engine for an interactive drawing surface: element store,
//! selection, undo history, viewport and a per-frame scheduler.

pub mod capabilities;
pub mod config;
pub mod document;
pub mod element;
pub mod engine;
pub mod error;
pub mod history;
pub mod refresher;
pub mod scheduler;
pub mod selection;
pub mod store;
pub mod transform;
pub mod viewport;

pub use capabilities::{ElementRepository, HistoryController, SelectionController, ViewportController};
pub use config::EngineConfig;
pub use document::SceneSnapshot;
pub use element::{Element, ElementId, ElementKind, ElementPatch, ElementStyle, Endpoint, Geometry, Rgba};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use history::{HistoryEngine, HistoryEntry, HistoryState};
pub use refresher::{ConnectorRouter, RenderHandle, RenderIndex, RenderLookup, StraightRouter};
pub use scheduler::{FrameHost, FrameScheduler, FrameStats, ManualFrameHost, SurfaceId, SurfaceRenderer, TaskError, TaskResult};
pub use selection::SelectionManager;
pub use store::{Change, ElementStore, StoreSnapshot};
pub use transform::{Corner, TransformKind};
pub use viewport::Viewport;
