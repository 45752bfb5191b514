//! Per-frame scheduler for write, draw and read work.
//!
//! Requests made between two frames are coalesced into a single pass:
//! every queued write runs first, then each requested surface is drawn once,
//! then reads run (or wait for idle time). The scheduler never drives itself;
//! the host calls [`FrameScheduler::on_frame`] when its display callback
//! fires, and [`FrameScheduler::poll_fallback`] when the callback is late.
//!
//! The handle is a cheap `Rc` clone, so the engine and the host share one
//! queue. Tasks may enqueue more work; it lands in the next frame.

use indexmap::IndexSet;
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use thiserror::Error;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant};

/// Upper bound on passes `flush_now` makes while tasks keep enqueuing work.
const MAX_SYNC_PASSES: usize = 16;

/// Named rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub &'static str);

impl SurfaceId {
    /// Element layer.
    pub const SCENE: SurfaceId = SurfaceId("scene");
    /// Selection handles and marquee.
    pub const SELECTION: SurfaceId = SurfaceId("selection");
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Failure reported by a scheduled task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Draw failed on surface {surface}: {reason}")]
    Draw { surface: SurfaceId, reason: String },
    #[error(transparent)]
    Engine(#[from] crate::error::EngineError),
}

/// Result type for scheduled tasks.
pub type TaskResult = Result<(), TaskError>;

/// The host's display-refresh hook.
pub trait FrameHost {
    /// Ask for one `on_frame` call at the next display refresh.
    fn request_frame(&self);

    /// Withdraw an outstanding request.
    fn cancel_frame(&self) {}
}

/// Draws one surface from the scheduler's context.
pub trait SurfaceRenderer<C> {
    fn draw(&mut self, surface: SurfaceId, ctx: &C) -> TaskResult;
}

type WriteTask<C> = Box<dyn FnOnce(&mut C) -> TaskResult>;
type ReadTask<C> = Box<dyn FnOnce(&C) -> TaskResult>;

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub flushes: u64,
    pub writes: u64,
    pub draws: u64,
    pub reads: u64,
    pub failures: u64,
}

struct Inner<C> {
    writes: Vec<WriteTask<C>>,
    reads: Vec<ReadTask<C>>,
    idle: Vec<ReadTask<C>>,
    draws: IndexSet<SurfaceId>,
    pending: bool,
    armed_at: Option<Instant>,
    disposed: bool,
    defer_reads: bool,
    fallback: Duration,
    host: Rc<dyn FrameHost>,
    renderer: Option<Box<dyn SurfaceRenderer<C>>>,
    stats: FrameStats,
}

/// Work drained from the queues for one pass.
struct Frame<C> {
    writes: Vec<WriteTask<C>>,
    draws: IndexSet<SurfaceId>,
    reads: Vec<ReadTask<C>>,
}

/// Shared handle to the frame queues.
pub struct FrameScheduler<C> {
    inner: Rc<RefCell<Inner<C>>>,
}

impl<C> Clone for FrameScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for FrameScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("FrameScheduler")
            .field("writes", &inner.writes.len())
            .field("reads", &inner.reads.len())
            .field("idle", &inner.idle.len())
            .field("draws", &inner.draws)
            .field("pending", &inner.pending)
            .field("disposed", &inner.disposed)
            .finish()
    }
}

impl<C: 'static> FrameScheduler<C> {
    /// Create a scheduler that asks `host` for frames and self-flushes after
    /// `fallback` if none arrives.
    pub fn new(host: Rc<dyn FrameHost>, fallback: Duration, defer_reads: bool) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                writes: Vec::new(),
                reads: Vec::new(),
                idle: Vec::new(),
                draws: IndexSet::new(),
                pending: false,
                armed_at: None,
                disposed: false,
                defer_reads,
                fallback,
                host,
                renderer: None,
                stats: FrameStats::default(),
            })),
        }
    }

    /// Install the renderer that serves draw requests.
    pub fn set_renderer(&self, renderer: Box<dyn SurfaceRenderer<C>>) {
        self.inner.borrow_mut().renderer = Some(renderer);
    }

    /// Queue a mutation for the next frame. Returns `false` once disposed.
    pub fn enqueue_write(&self, task: impl FnOnce(&mut C) -> TaskResult + 'static) -> bool {
        self.push(|inner| inner.writes.push(Box::new(task)))
    }

    /// Queue a measurement for after the next frame's draws.
    pub fn enqueue_read(&self, task: impl FnOnce(&C) -> TaskResult + 'static) -> bool {
        self.push(|inner| inner.reads.push(Box::new(task)))
    }

    /// Mark a surface dirty. Repeated requests before a flush draw once.
    pub fn request_draw(&self, surface: SurfaceId) -> bool {
        self.push(|inner| {
            inner.draws.insert(surface);
        })
    }

    fn push(&self, add: impl FnOnce(&mut Inner<C>)) -> bool {
        let host = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                log::debug!("scheduler: work refused after dispose");
                return false;
            }
            add(&mut inner);
            if inner.pending {
                return true;
            }
            inner.pending = true;
            inner.armed_at = Some(Instant::now());
            Rc::clone(&inner.host)
        };
        host.request_frame();
        true
    }

    /// Check if a frame has been requested and not yet flushed.
    pub fn is_pending(&self) -> bool {
        self.inner.borrow().pending
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    pub fn has_idle_work(&self) -> bool {
        !self.inner.borrow().idle.is_empty()
    }

    /// Counters since creation.
    pub fn stats(&self) -> FrameStats {
        self.inner.borrow().stats
    }

    /// When the host should call `poll_fallback` if no frame arrived.
    pub fn fallback_deadline(&self) -> Option<Instant> {
        let inner = self.inner.borrow();
        if !inner.pending {
            return None;
        }
        inner.armed_at.map(|at| at + inner.fallback)
    }

    /// Display-refresh callback: run one pass.
    pub fn on_frame(&self, ctx: &mut C) {
        self.flush(ctx);
    }

    /// Flush if the frame callback is overdue. Returns whether it flushed.
    pub fn poll_fallback(&self, now: Instant, ctx: &mut C) -> bool {
        match self.fallback_deadline() {
            Some(deadline) if now >= deadline => {
                log::trace!("scheduler: frame overdue, flushing from fallback");
                self.cancel_pending();
                self.flush(ctx);
                true
            }
            _ => false,
        }
    }

    /// Run everything now, including deferred reads and any work the tasks
    /// enqueue along the way.
    pub fn flush_now(&self, ctx: &mut C) {
        for _ in 0..MAX_SYNC_PASSES {
            if !self.is_pending() {
                break;
            }
            self.cancel_pending();
            self.flush(ctx);
        }
        if self.is_pending() {
            log::warn!(
                "scheduler: work still pending after {} synchronous passes",
                MAX_SYNC_PASSES
            );
        }
        self.run_idle(ctx);
    }

    /// Run reads that were deferred to idle time.
    pub fn run_idle(&self, ctx: &C) {
        let idle = mem::take(&mut self.inner.borrow_mut().idle);
        for task in idle {
            self.run_read(task, ctx);
        }
    }

    /// Drop every queued task and refuse new ones.
    pub fn dispose(&self) {
        let host = {
            let mut inner = self.inner.borrow_mut();
            inner.disposed = true;
            inner.writes.clear();
            inner.reads.clear();
            inner.idle.clear();
            inner.draws.clear();
            inner.renderer = None;
            inner.armed_at = None;
            mem::replace(&mut inner.pending, false).then(|| Rc::clone(&inner.host))
        };
        if let Some(host) = host {
            host.cancel_frame();
        }
        log::debug!("scheduler: disposed");
    }

    fn cancel_pending(&self) {
        let host = Rc::clone(&self.inner.borrow().host);
        host.cancel_frame();
    }

    fn take_frame(&self) -> Option<Frame<C>> {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return None;
        }
        inner.pending = false;
        inner.armed_at = None;
        inner.stats.flushes += 1;
        Some(Frame {
            writes: mem::take(&mut inner.writes),
            draws: mem::take(&mut inner.draws),
            reads: mem::take(&mut inner.reads),
        })
    }

    fn flush(&self, ctx: &mut C) {
        let Some(frame) = self.take_frame() else {
            return;
        };
        log::trace!(
            "scheduler: flush {} writes, {} draws, {} reads",
            frame.writes.len(),
            frame.draws.len(),
            frame.reads.len()
        );

        for task in frame.writes {
            self.inner.borrow_mut().stats.writes += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| task(ctx)));
            self.report("write", outcome);
        }

        if !frame.draws.is_empty() {
            let renderer = self.inner.borrow_mut().renderer.take();
            match renderer {
                Some(mut renderer) => {
                    for surface in &frame.draws {
                        self.inner.borrow_mut().stats.draws += 1;
                        let outcome =
                            catch_unwind(AssertUnwindSafe(|| renderer.draw(*surface, ctx)));
                        self.report("draw", outcome);
                    }
                    let mut inner = self.inner.borrow_mut();
                    if !inner.disposed && inner.renderer.is_none() {
                        inner.renderer = Some(renderer);
                    }
                }
                None => log::trace!("scheduler: no renderer, dropping draw requests"),
            }
        }

        if self.inner.borrow().defer_reads {
            let mut inner = self.inner.borrow_mut();
            if !inner.disposed {
                inner.idle.extend(frame.reads);
            }
        } else {
            for task in frame.reads {
                self.run_read(task, ctx);
            }
        }
    }

    fn run_read(&self, task: ReadTask<C>, ctx: &C) {
        self.inner.borrow_mut().stats.reads += 1;
        let outcome = catch_unwind(AssertUnwindSafe(|| task(ctx)));
        self.report("read", outcome);
    }

    fn report(&self, phase: &str, outcome: std::thread::Result<TaskResult>) {
        let failed = match outcome {
            Ok(Ok(())) => false,
            Ok(Err(err)) => {
                log::warn!("scheduler: {} task failed: {}", phase, err);
                true
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("scheduler: {} task panicked: {}", phase, message);
                true
            }
        };
        if failed {
            self.inner.borrow_mut().stats.failures += 1;
        }
    }
}

/// A host that only records requests. Useful for headless drivers and tests
/// that call `on_frame` themselves.
#[derive(Debug, Default)]
pub struct ManualFrameHost {
    requested: std::cell::Cell<u64>,
    cancelled: std::cell::Cell<u64>,
}

impl ManualFrameHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames requested so far.
    pub fn requests(&self) -> u64 {
        self.requested.get()
    }

    pub fn cancellations(&self) -> u64 {
        self.cancelled.get()
    }
}

impl FrameHost for ManualFrameHost {
    fn request_frame(&self) {
        self.requested.set(self.requested.get() + 1);
    }

    fn cancel_frame(&self) {
        self.cancelled.set(self.cancelled.get() + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        entries: Vec<String>,
    }

    struct RecordingRenderer {
        drawn: Rc<RefCell<Vec<SurfaceId>>>,
    }

    impl SurfaceRenderer<Log> for RecordingRenderer {
        fn draw(&mut self, surface: SurfaceId, _ctx: &Log) -> TaskResult {
            self.drawn.borrow_mut().push(surface);
            Ok(())
        }
    }

    fn scheduler(defer_reads: bool) -> (FrameScheduler<Log>, Rc<ManualFrameHost>, Rc<RefCell<Vec<SurfaceId>>>) {
        let host = Rc::new(ManualFrameHost::new());
        let scheduler = FrameScheduler::new(host.clone(), Duration::from_millis(100), defer_reads);
        let drawn = Rc::new(RefCell::new(Vec::new()));
        scheduler.set_renderer(Box::new(RecordingRenderer {
            drawn: drawn.clone(),
        }));
        (scheduler, host, drawn)
    }

    #[test]
    fn test_requests_coalesce_into_one_frame() {
        let (scheduler, host, drawn) = scheduler(false);
        for _ in 0..5 {
            scheduler.request_draw(SurfaceId::SCENE);
        }
        scheduler.enqueue_write(|_| Ok(()));
        assert_eq!(host.requests(), 1);

        let mut log = Log::default();
        scheduler.on_frame(&mut log);
        assert_eq!(*drawn.borrow(), vec![SurfaceId::SCENE]);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn test_phase_order_and_first_request_order() {
        let (scheduler, _host, drawn) = scheduler(false);
        let order = Rc::new(RefCell::new(Vec::new()));
        let o = order.clone();
        scheduler.enqueue_read(move |_| {
            o.borrow_mut().push("read");
            Ok(())
        });
        scheduler.request_draw(SurfaceId::SELECTION);
        scheduler.request_draw(SurfaceId::SCENE);
        scheduler.request_draw(SurfaceId::SELECTION);
        let o = order.clone();
        scheduler.enqueue_write(move |log: &mut Log| {
            log.entries.push("written".into());
            o.borrow_mut().push("write");
            Ok(())
        });

        let mut log = Log::default();
        scheduler.on_frame(&mut log);
        assert_eq!(*order.borrow(), vec!["write", "read"]);
        assert_eq!(*drawn.borrow(), vec![SurfaceId::SELECTION, SurfaceId::SCENE]);
        assert_eq!(log.entries, vec!["written".to_string()]);
    }

    #[test]
    fn test_work_enqueued_during_flush_waits_for_next_frame() {
        let (scheduler, host, _drawn) = scheduler(false);
        let handle = scheduler.clone();
        scheduler.enqueue_write(move |_: &mut Log| {
            handle.enqueue_write(|log: &mut Log| {
                log.entries.push("second".into());
                Ok(())
            });
            Ok(())
        });

        let mut log = Log::default();
        scheduler.on_frame(&mut log);
        assert!(log.entries.is_empty());
        assert!(scheduler.is_pending());
        assert_eq!(host.requests(), 2);

        scheduler.on_frame(&mut log);
        assert_eq!(log.entries, vec!["second".to_string()]);
    }

    #[test]
    fn test_failures_do_not_block_the_frame() {
        let (scheduler, _host, drawn) = scheduler(false);
        scheduler.enqueue_write(|_| Err(TaskError::Failed("boom".into())));
        scheduler.enqueue_write(|_| panic!("write exploded"));
        scheduler.enqueue_write(|log: &mut Log| {
            log.entries.push("survivor".into());
            Ok(())
        });
        scheduler.request_draw(SurfaceId::SCENE);

        let mut log = Log::default();
        scheduler.on_frame(&mut log);
        assert_eq!(log.entries, vec!["survivor".to_string()]);
        assert_eq!(drawn.borrow().len(), 1);
        assert_eq!(scheduler.stats().failures, 2);
    }

    #[test]
    fn test_deferred_reads_wait_for_idle() {
        let (scheduler, _host, _drawn) = scheduler(true);
        let ran = Rc::new(RefCell::new(false));
        let r = ran.clone();
        scheduler.enqueue_read(move |_| {
            *r.borrow_mut() = true;
            Ok(())
        });
        let mut log = Log::default();
        scheduler.on_frame(&mut log);
        assert!(!*ran.borrow());
        assert!(scheduler.has_idle_work());
        scheduler.run_idle(&log);
        assert!(*ran.borrow());
    }

    #[test]
    fn test_flush_now_drains_everything() {
        let (scheduler, _host, drawn) = scheduler(true);
        let handle = scheduler.clone();
        scheduler.enqueue_write(move |_: &mut Log| {
            handle.request_draw(SurfaceId::SCENE);
            Ok(())
        });
        let ran = Rc::new(RefCell::new(false));
        let r = ran.clone();
        scheduler.enqueue_read(move |_| {
            *r.borrow_mut() = true;
            Ok(())
        });

        let mut log = Log::default();
        scheduler.flush_now(&mut log);
        assert!(*ran.borrow());
        assert_eq!(*drawn.borrow(), vec![SurfaceId::SCENE]);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn test_fallback_flushes_when_frame_is_late() {
        let (scheduler, host, _drawn) = scheduler(false);
        let mut log = Log::default();
        assert!(scheduler.fallback_deadline().is_none());

        scheduler.enqueue_write(|log: &mut Log| {
            log.entries.push("late".into());
            Ok(())
        });
        let deadline = scheduler.fallback_deadline().unwrap();
        assert!(!scheduler.poll_fallback(deadline - Duration::from_millis(1), &mut log));
        assert!(scheduler.poll_fallback(deadline, &mut log));
        assert_eq!(log.entries, vec!["late".to_string()]);
        assert_eq!(host.cancellations(), 1);
        assert!(scheduler.fallback_deadline().is_none());
    }

    #[test]
    fn test_dispose_refuses_work() {
        let (scheduler, host, drawn) = scheduler(false);
        scheduler.request_draw(SurfaceId::SCENE);
        scheduler.dispose();
        assert_eq!(host.cancellations(), 1);
        assert!(!scheduler.enqueue_write(|_| Ok(())));
        assert!(!scheduler.request_draw(SurfaceId::SCENE));

        let mut log = Log::default();
        scheduler.on_frame(&mut log);
        assert!(drawn.borrow().is_empty());
        assert!(scheduler.is_disposed());
    }
}
