//! Clock-driven render loop.
//!
//! One thread ticks at the target fps. Each tick samples the active scene,
//! composites it into a canvas frame, stamps a monotonic timestamp derived
//! from the pipeline epoch, and fans the frame out to the preview tap and —
//! when enabled — the encoder input. The two fan-out paths are independent:
//! toggling encoder output never changes the preview cadence.

mod blend;
pub mod compositor;
mod preview;
mod raster;

pub use preview::{PreviewCallback, PreviewTap};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{ArgonError, Result};
use crate::events::{EventHub, PipelineEvent};
use crate::scene::Scene;
use crate::stats::RollingWindow;
use crate::types::{Color, Frame};

/// Sink the render loop pushes encoder-bound copies into.
///
/// Returns `false` when the frame was dropped downstream.
pub type FrameSink = Arc<dyn Fn(Frame) -> bool + Send + Sync>;

/// Render loop statistics snapshot
#[derive(Debug, Clone)]
pub struct RenderStats {
    /// Configured target fps
    pub target_fps: f64,
    /// Instantaneous fps from the last tick spacing
    pub current_fps: f64,
    /// Frames rendered since start
    pub frames_rendered: u64,
    /// Ticks that started ≥ 1.5 intervals late
    pub late_ticks: u64,
    /// Rolling 60-sample average render time in milliseconds
    pub average_render_ms: f64,
}

#[derive(Clone)]
struct RenderConfig {
    fps: f64,
    canvas: (u32, u32),
    background: Color,
}

struct StatsInner {
    frames: u64,
    late_ticks: u64,
    current_fps: f64,
    window: RollingWindow,
}

struct Shared {
    running: AtomicBool,
    config: Mutex<RenderConfig>,
    active_scene: Mutex<Option<Arc<Scene>>>,
    encoder_feed: Mutex<Option<FrameSink>>,
    preview: PreviewTap,
    stats: Mutex<StatsInner>,
    epoch: Instant,
    events: EventHub,
}

pub struct RenderLoop {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RenderLoop {
    pub fn new(fps: f64, canvas: (u32, u32), background: Color, events: EventHub) -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                config: Mutex::new(RenderConfig {
                    fps: fps.clamp(1.0, 240.0),
                    canvas,
                    background,
                }),
                active_scene: Mutex::new(None),
                encoder_feed: Mutex::new(None),
                preview: PreviewTap::new(),
                stats: Mutex::new(StatsInner {
                    frames: 0,
                    late_ticks: 0,
                    current_fps: 0.0,
                    window: RollingWindow::default(),
                }),
                epoch: Instant::now(),
                events,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn preview(&self) -> &PreviewTap {
        &self.shared.preview
    }

    pub fn set_active_scene(&self, scene: Option<Arc<Scene>>) {
        *self.shared.active_scene.lock() = scene;
    }

    pub fn set_fps(&self, fps: f64) {
        self.shared.config.lock().fps = fps.clamp(1.0, 240.0);
    }

    pub fn set_canvas(&self, width: u32, height: u32) {
        self.shared.config.lock().canvas = (width, height);
    }

    pub fn set_background(&self, color: Color) {
        self.shared.config.lock().background = color;
    }

    /// Install or remove the encoder-bound frame sink
    pub fn set_encoder_feed(&self, sink: Option<FrameSink>) {
        *self.shared.encoder_feed.lock() = sink;
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("render-loop".to_string())
            .spawn(move || run(shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                ArgonError::render(format!("failed to spawn render thread: {e}"))
            })?;
        *self.worker.lock() = Some(handle);
        let fps = self.shared.config.lock().fps;
        info!("Render loop started at {fps} fps");
        self.shared.events.emit(PipelineEvent::RenderStarted);
        Ok(())
    }

    /// Request stop; the loop completes the current tick and exits. It does
    /// not flush the encoder — that is the encoder's stop contract.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        info!("Render loop stopped");
        self.shared.events.emit(PipelineEvent::RenderStopped);
    }

    pub fn statistics(&self) -> RenderStats {
        let stats = self.shared.stats.lock();
        RenderStats {
            target_fps: self.shared.config.lock().fps,
            current_fps: stats.current_fps,
            frames_rendered: stats.frames,
            late_ticks: stats.late_ticks,
            average_render_ms: stats.window.average(),
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: Arc<Shared>) {
    let mut next = Instant::now();
    let mut last_ts_us: i64 = -1;
    let mut last_tick: Option<Instant> = None;
    let mut sequence: u64 = 0;

    while shared.running.load(Ordering::SeqCst) {
        let tick_start = Instant::now();
        let config = shared.config.lock().clone();
        let interval = Duration::from_secs_f64(1.0 / config.fps);

        // Composite the active scene, or a bare background frame
        let scene = shared.active_scene.lock().clone();
        let mut frame = match scene {
            Some(scene) => compositor::composite(&scene.snapshot()),
            None => Frame::solid(config.canvas.0, config.canvas.1, config.background),
        };

        // Monotonic timestamp from the pipeline epoch; on clock regression
        // reuse the previous timestamp + 1 µs.
        let now_us = shared.epoch.elapsed().as_micros() as i64;
        let ts = if now_us <= last_ts_us {
            last_ts_us + 1
        } else {
            now_us
        };
        last_ts_us = ts;
        frame.timestamp_us = ts;
        frame.sequence = sequence;
        sequence += 1;

        let frame = Arc::new(frame);
        shared.preview.publish(Arc::clone(&frame));

        let feed = shared.encoder_feed.lock().clone();
        if let Some(feed) = feed {
            feed((*frame).clone());
        }

        // Statistics
        let render_ms = tick_start.elapsed().as_secs_f64() * 1000.0;
        {
            let mut stats = shared.stats.lock();
            stats.frames += 1;
            stats.window.push(render_ms);
            if let Some(prev) = last_tick {
                let delta = tick_start.duration_since(prev).as_secs_f64();
                if delta > 0.0 {
                    stats.current_fps = 1.0 / delta;
                }
            }
        }
        last_tick = Some(tick_start);

        // Schedule the next tick. Overruns skip no ticks, but a tick that
        // would start ≥ 1.5 intervals late is counted and the schedule
        // resynchronized.
        next += interval;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            let late = now - next;
            if late >= interval / 2 {
                let mut stats = shared.stats.lock();
                stats.late_ticks += 1;
                let late_ticks = stats.late_ticks;
                drop(stats);
                warn!(
                    "render tick {:.1} ms late ({} late ticks total)",
                    late.as_secs_f64() * 1000.0,
                    late_ticks
                );
                next = now;
            }
        }
    }

    debug!("render loop exited after {sequence} frames");
}
