//! Tessera headless host
//!
//! Drives an [`Engine`] without a window: frames are pumped by hand and
//! surface draws are logged instead of rasterized.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;
use tessera_core::{
    ElementRepository, Engine, EngineConfig, EngineError, FrameScheduler, FrameStats,
    ManualFrameHost, SelectionController, SurfaceId, SurfaceRenderer, TaskResult,
    ViewportController,
};
use thiserror::Error;

/// Errors surfaced by the host.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Usage: tessera [--config <file>] <scene.json>")]
    Usage,
}

/// Host configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub scene_path: Option<PathBuf>,
}

impl AppConfig {
    /// Parse `[--config <file>] [scene.json]`, reading the config file if given.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Result<Self, AppError> {
        let mut config = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "--config" {
                let path = PathBuf::from(args.next().ok_or(AppError::Usage)?);
                let json = read_file(&path)?;
                config.engine = EngineConfig::from_json(&json)?;
            } else if arg.starts_with("--") || config.scene_path.is_some() {
                return Err(AppError::Usage);
            } else {
                config.scene_path = Some(PathBuf::from(arg));
            }
        }
        Ok(config)
    }
}

fn read_file(path: &Path) -> Result<String, AppError> {
    std::fs::read_to_string(path).map_err(|source| AppError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Renderer that logs what it would draw.
#[derive(Debug, Default)]
pub struct LoggingRenderer;

impl SurfaceRenderer<Engine> for LoggingRenderer {
    fn draw(&mut self, surface: SurfaceId, engine: &Engine) -> TaskResult {
        if surface == SurfaceId::SELECTION {
            log::debug!("draw {}: {} selected", surface, engine.selected_ids().len());
        } else {
            let viewport = engine.viewport();
            log::debug!(
                "draw {}: {} elements at scale {:.3}",
                surface,
                engine.store().len(),
                viewport.scale
            );
        }
        Ok(())
    }
}

/// What a run ended with.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub elements: usize,
    pub selected: usize,
    pub scale: f64,
    pub frames_requested: u64,
    pub stats: FrameStats,
}

/// Headless session: engine plus the host it reports frame requests to.
pub struct App {
    engine: Engine,
    host: Rc<ManualFrameHost>,
    /// Whether `pump` delivers frame callbacks. Without them only the
    /// scheduler's fallback deadline flushes.
    frames: bool,
}

impl App {
    pub fn new(config: EngineConfig) -> Self {
        let host = Rc::new(ManualFrameHost::new());
        let scheduler = FrameScheduler::new(host.clone(), config.frame_fallback(), config.defer_reads);
        scheduler.set_renderer(Box::new(LoggingRenderer));
        Self {
            engine: Engine::new(config, scheduler),
            host,
            frames: true,
        }
    }

    /// A host whose display refresh never fires, like a hidden browser tab.
    pub fn without_frames(config: EngineConfig) -> Self {
        Self {
            frames: false,
            ..Self::new(config)
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Deliver a frame if one was requested, otherwise flush once the
    /// fallback deadline has passed. Idle work runs afterwards.
    pub fn pump(&mut self) {
        let scheduler = self.engine.scheduler().clone();
        if self.frames && scheduler.is_pending() {
            scheduler.on_frame(&mut self.engine);
        } else {
            self.poll(Instant::now());
        }
        if scheduler.has_idle_work() {
            scheduler.run_idle(&self.engine);
        }
    }

    /// Flush if the pending frame is overdue at `now`. Returns whether it
    /// flushed.
    pub fn poll(&mut self, now: Instant) -> bool {
        let scheduler = self.engine.scheduler().clone();
        scheduler.poll_fallback(now, &mut self.engine)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            elements: self.engine.store().len(),
            selected: self.engine.selected_ids().len(),
            scale: self.engine.viewport().scale,
            frames_requested: self.host.requests(),
            stats: self.engine.scheduler().stats(),
        }
    }

    /// Load a scene, fit it into view and settle all pending frames.
    pub fn run(config: AppConfig) -> Result<RunSummary, AppError> {
        let mut app = App::new(config.engine);
        if let Some(path) = &config.scene_path {
            let json = read_file(path)?;
            app.engine.load_json(&json)?;
            log::info!("Loaded {} elements from {}", app.engine.store().len(), path.display());
        } else {
            log::info!("No scene given, starting empty");
        }
        app.engine.fit_to_content();
        app.engine.flush_now();
        app.pump();
        let summary = app.summary();
        app.engine.scheduler().dispose();
        Ok(summary)
    }
}
