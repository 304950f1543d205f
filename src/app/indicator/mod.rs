//! Indicator engine. Renders one effect at a time on the single pixel.
//!
//! Each effect runs on its own render task.  Replacing an effect is the
//! engine's single critical section:
//!
//! 1. spawn the new task parked on a start signal (if that fails the old
//!    effect keeps rendering and the request is dropped),
//! 2. fence the output so the old task can no longer write,
//! 3. raise the old task's stop flag and wait, bounded, for it to exit,
//! 4. release the new task with the current output generation.
//!
//! The fence is an atomic generation counter, bumped without touching the
//! output lock and re-checked under it on every write, so a task stuck
//! inside a pixel write cannot stall a replacement.  A task that misses
//! its stop deadline is abandoned; once its write in flight returns it can
//! never touch the pixel again.

pub mod effects;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, error, info, warn};

use crate::drivers::task_pin::{self, Core};
use crate::error::IndicatorError;

use self::effects::{COLOUR_OFF, IndicatorRequest, IndicatorStatus, Rgb, frame, scale};
use super::ports::PixelOutput;

/// Stop-flag poll interval; also the render loop's sleep slice.
pub const STOP_POLL: Duration = Duration::from_millis(10);

/// Polls before a render task is abandoned.
pub const STOP_POLLS: u32 = 50;

/// Spawns a render task.  Swappable so tests can simulate exhaustion.
pub type RenderSpawner = fn(Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>;

fn spawn_render_task(task: Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> {
    task_pin::spawn_on_core(Core::Any, 4, 4, "indicator\0", task)
}

// ── Shared output ─────────────────────────────────────────────

struct Shared {
    output: Mutex<Box<dyn PixelOutput>>,
    /// Current owner of the output.  Never bumped under `output`.
    generation: AtomicU32,
    brightness: AtomicU8,
    live_loops: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Box<dyn PixelOutput>> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owns(&self, generation: u32) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Invalidate every outstanding render task; returns the new generation.
    fn fence(&self) -> u32 {
        self.generation.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Render-task write: waits for the output, then writes `colour` scaled
    /// by the global level if `generation` still owns it.  `Ok(false)`
    /// means the caller has been fenced off.
    fn write(&self, generation: u32, colour: Rgb) -> Result<bool, IndicatorError> {
        if !self.owns(generation) {
            return Ok(false);
        }
        let mut pixel = self.lock();
        self.emit(&mut pixel, generation, colour)
    }

    /// Engine-side write: gives up after `STOP_POLLS` if an abandoned task
    /// is still holding the output.
    fn write_bounded(&self, generation: u32, colour: Rgb) -> Result<bool, IndicatorError> {
        for _ in 0..STOP_POLLS {
            match self.output.try_lock() {
                Ok(mut pixel) => return self.emit(&mut pixel, generation, colour),
                Err(TryLockError::Poisoned(p)) => {
                    return self.emit(&mut p.into_inner(), generation, colour);
                }
                Err(TryLockError::WouldBlock) => std::thread::sleep(STOP_POLL),
            }
        }
        warn!("Indicator: output busy, write skipped");
        Err(IndicatorError::OutputBusy)
    }

    fn emit(
        &self,
        pixel: &mut Box<dyn PixelOutput>,
        generation: u32,
        colour: Rgb,
    ) -> Result<bool, IndicatorError> {
        // A fence may have landed while waiting for the lock.
        if !self.owns(generation) {
            return Ok(false);
        }
        let level = self.brightness.load(Ordering::Relaxed);
        pixel.write(scale(colour, level))?;
        Ok(true)
    }
}

// ── Render task ───────────────────────────────────────────────

struct RenderTask {
    request: IndicatorRequest,
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct RenderContext {
    shared: Arc<Shared>,
    request: IndicatorRequest,
    start: Arc<Signal<CriticalSectionRawMutex, Option<u32>>>,
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

fn render_loop(ctx: RenderContext) {
    let RenderContext {
        shared,
        request,
        start,
        stop,
        done,
    } = ctx;

    let Some(generation) = futures_lite::future::block_on(start.wait()) else {
        done.store(true, Ordering::Release);
        return;
    };
    shared.live_loops.fetch_add(1, Ordering::SeqCst);
    debug!("Indicator: render loop {} started ({:?})", generation, request.effect);

    let interval = request.frame_interval();
    let mut step: u32 = 0;
    let mut reported = false;
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        if request.finished(step) {
            if let Err(e) = shared.write(generation, COLOUR_OFF) {
                warn!("Indicator: blanking after one-shot failed: {}", e);
            }
            break;
        }
        match shared.write(generation, frame(&request, step)) {
            Ok(true) => {}
            // Fenced: a newer effect owns the output.
            Ok(false) => break,
            Err(e) => {
                if !reported {
                    warn!("Indicator: frame write failed: {}", e);
                    reported = true;
                }
            }
        }
        step = step.wrapping_add(1);
        if pause(&stop, interval) {
            break;
        }
    }

    shared.live_loops.fetch_sub(1, Ordering::SeqCst);
    done.store(true, Ordering::Release);
    debug!("Indicator: render loop {} ended", generation);
}

/// Sleep `total` in `STOP_POLL` slices.  Returns `true` if stopped.
fn pause(stop: &AtomicBool, total: Duration) -> bool {
    let mut left = total;
    while !left.is_zero() {
        if stop.load(Ordering::Acquire) {
            return true;
        }
        let slice = left.min(STOP_POLL);
        std::thread::sleep(slice);
        left -= slice;
    }
    stop.load(Ordering::Acquire)
}

// ── Engine ────────────────────────────────────────────────────

pub struct IndicatorEngine {
    shared: Arc<Shared>,
    current: Mutex<Option<RenderTask>>,
    spawn: RenderSpawner,
}

impl IndicatorEngine {
    pub fn new(pixel: Box<dyn PixelOutput>) -> Self {
        Self::with_spawner(pixel, spawn_render_task)
    }

    pub fn with_spawner(pixel: Box<dyn PixelOutput>, spawn: RenderSpawner) -> Self {
        Self {
            shared: Arc::new(Shared {
                output: Mutex::new(pixel),
                generation: AtomicU32::new(0),
                brightness: AtomicU8::new(255),
                live_loops: AtomicUsize::new(0),
            }),
            current: Mutex::new(None),
            spawn,
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<RenderTask>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace whatever is rendering with `request`.
    pub fn set_effect(&self, request: IndicatorRequest) -> Result<(), IndicatorError> {
        let mut current = self.lock_current();

        let start = Arc::new(Signal::new());
        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let ctx = RenderContext {
            shared: Arc::clone(&self.shared),
            request,
            start: Arc::clone(&start),
            stop: Arc::clone(&stop),
            done: Arc::clone(&done),
        };
        let handle = (self.spawn)(Box::new(move || render_loop(ctx))).map_err(|e| {
            error!("Indicator: cannot spawn render task ({}), keeping current effect", e);
            IndicatorError::RenderTaskUnavailable
        })?;

        self.halt(&mut current);
        let generation = self.shared.fence();
        start.signal(Some(generation));

        *current = Some(RenderTask {
            request,
            stop,
            done,
            handle: Some(handle),
        });
        info!(
            "Indicator: {:?} {:?} @{} (period {} ms, repeat={})",
            request.effect, request.primary, request.brightness, request.period_ms, request.repeat
        );
        Ok(())
    }

    /// Stop rendering and blank the output.
    pub fn stop_effect(&self) -> Result<(), IndicatorError> {
        let mut current = self.lock_current();
        self.halt(&mut current);
        let generation = self.shared.fence();
        self.shared.write_bounded(generation, COLOUR_OFF).map(|_| ())
    }

    /// Show the canonical pattern for `status`.  Re-requesting the effect
    /// that is already rendering does not restart it.
    pub fn set_status(&self, status: IndicatorStatus) -> Result<(), IndicatorError> {
        let request = status.request();
        if self.current_effect() == Some(request) {
            return Ok(());
        }
        debug!("Indicator: status {:?}", status);
        self.set_effect(request)
    }

    /// Global brightness, multiplied with every effect's own level.
    pub fn set_brightness(&self, level: u8) {
        self.shared.brightness.store(level, Ordering::Relaxed);
    }

    pub fn brightness(&self) -> u8 {
        self.shared.brightness.load(Ordering::Relaxed)
    }

    /// The request currently rendering, if its loop is still alive.
    pub fn current_effect(&self) -> Option<IndicatorRequest> {
        self.lock_current()
            .as_ref()
            .filter(|task| !task.done.load(Ordering::Acquire))
            .map(|task| task.request)
    }

    pub fn is_rendering(&self) -> bool {
        self.current_effect().is_some()
    }

    /// Render loops currently between start and exit.  At most one.
    pub fn live_loops(&self) -> usize {
        self.shared.live_loops.load(Ordering::SeqCst)
    }

    /// Fence, signal and join the current task.  Abandons it after
    /// `STOP_POLLS` × `STOP_POLL`.
    fn halt(&self, current: &mut Option<RenderTask>) {
        let Some(mut task) = current.take() else {
            return;
        };
        self.shared.fence();
        task.stop.store(true, Ordering::Release);

        let mut polls = 0;
        while !task.done.load(Ordering::Acquire) && polls < STOP_POLLS {
            std::thread::sleep(STOP_POLL);
            polls += 1;
        }

        if task.done.load(Ordering::Acquire) {
            if let Some(handle) = task.handle.take() {
                let _ = handle.join();
            }
        } else {
            warn!(
                "Indicator: render loop unresponsive after {} ms, abandoning",
                STOP_POLLS * STOP_POLL.as_millis() as u32
            );
        }
    }
}

impl Drop for IndicatorEngine {
    fn drop(&mut self) {
        let mut current = self.lock_current();
        self.halt(&mut current);
    }
}
