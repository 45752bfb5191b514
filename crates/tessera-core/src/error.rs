//! Error types for the engine.

use crate::element::ElementId;
use thiserror::Error;

/// Engine errors.
///
/// Invalid references are never errors: updating or deleting an id that no
/// longer exists is a silent no-op.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid element {id}: {reason}")]
    InvalidElement { id: ElementId, reason: String },
    #[error("A transform gesture is already in progress")]
    TransformInProgress,
    #[error("No transform gesture is in progress")]
    NoActiveTransform,
    #[error("Nothing is selected")]
    EmptySelection,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn invalid(id: &ElementId, reason: impl Into<String>) -> Self {
        Self::InvalidElement {
            id: id.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
