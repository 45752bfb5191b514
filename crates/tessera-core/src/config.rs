//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of undo entries to keep.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Offset applied to duplicated elements on both axes.
pub const DEFAULT_DUPLICATE_OFFSET: f64 = 12.0;

/// Latency budget before the scheduler flushes without a frame callback.
pub const DEFAULT_FRAME_FALLBACK_MS: u64 = 100;

/// Tunables for an [`Engine`](crate::Engine) and its
/// [`FrameScheduler`](crate::FrameScheduler).
///
/// Every field has a default, so a JSON config file only needs to name the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on the undo stack (oldest entries dropped first).
    pub history_limit: usize,
    /// Default offset for `duplicate`.
    pub duplicate_offset: f64,
    /// Lower zoom bound.
    pub min_scale: f64,
    /// Upper zoom bound.
    pub max_scale: f64,
    /// Padding in stage pixels used by fit-to-content.
    pub fit_padding: f64,
    /// Self-flush budget when no frame callback arrives.
    pub frame_fallback_ms: u64,
    /// Run read tasks at idle time instead of at the end of the flush.
    pub defer_reads: bool,
    /// Initial viewport width in stage pixels.
    pub viewport_width: f64,
    /// Initial viewport height in stage pixels.
    pub viewport_height: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            duplicate_offset: DEFAULT_DUPLICATE_OFFSET,
            min_scale: 0.1,
            max_scale: 10.0,
            fit_padding: 50.0,
            frame_fallback_ms: DEFAULT_FRAME_FALLBACK_MS,
            defer_reads: true,
            viewport_width: 800.0,
            viewport_height: 600.0,
        }
    }
}

impl EngineConfig {
    /// The fallback flush latency as a duration.
    pub fn frame_fallback(&self) -> Duration {
        Duration::from_millis(self.frame_fallback_ms)
    }

    /// Parse a config from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
