//! Producer-driven source adapter.
//!
//! Wraps a [`FrameProducer`] — a screen grabber, window grabber, camera or
//! test generator — and runs it on its own thread at the producer's native
//! rate. Completed frames land in a most-recent-wins [`FrameCell`]; when the
//! capture target disappears the cell quiesces and a close event is
//! published.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{ArgonError, Result};
use crate::events::{EventHub, PipelineEvent};
use crate::plugin::{Plugin, PluginInfo};
use crate::source::{FrameCell, Source, SourceConfig};
use crate::types::{Frame, Handle};

/// One step of a frame producer
pub enum ProducedFrame {
    /// A completed frame
    Frame(Frame),
    /// Nothing new this cycle
    Idle,
    /// The capture target disappeared; the source quiesces
    Closed,
}

/// Produces frames for a [`ProducerSource`].
///
/// Implementations block on their platform API or generate synthetically;
/// the adapter owns the thread and pacing.
pub trait FrameProducer: Send + 'static {
    /// Produce the next frame, or report idle/closed
    fn next_frame(&mut self) -> Result<ProducedFrame>;

    /// Native resolution of the capture target
    fn native_resolution(&self) -> (u32, u32);

    /// Native rate the target produces at
    fn native_fps(&self) -> f64;
}

/// Creates a fresh producer each time the source starts
pub type ProducerFactory =
    Box<dyn Fn(&SourceConfig) -> Result<Box<dyn FrameProducer>> + Send + Sync>;

pub struct ProducerSource {
    info: PluginInfo,
    factory: ProducerFactory,
    cell: Arc<FrameCell>,
    running: Arc<AtomicBool>,
    state: Mutex<State>,
    worker: Mutex<Option<JoinHandle<()>>>,
    events: Mutex<Option<(Handle, EventHub)>>,
}

struct State {
    config: SourceConfig,
    native_resolution: (u32, u32),
    native_fps: f64,
    initialized: bool,
    last_error: Option<String>,
}

impl ProducerSource {
    pub fn new(info: PluginInfo, factory: ProducerFactory) -> Self {
        Self {
            info,
            factory,
            cell: Arc::new(FrameCell::new()),
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(State {
                config: SourceConfig::default(),
                native_resolution: (0, 0),
                native_fps: 0.0,
                initialized: false,
                last_error: None,
            }),
            worker: Mutex::new(None),
            events: Mutex::new(None),
        }
    }
}

impl Plugin for ProducerSource {
    fn info(&self) -> PluginInfo {
        self.info.clone()
    }

    fn initialize(&self) -> Result<()> {
        self.state.lock().initialized = true;
        Ok(())
    }

    fn shutdown(&self) {
        self.stop();
        self.state.lock().initialized = false;
    }

    fn is_active(&self) -> bool {
        self.state.lock().initialized
    }

    fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }
}

impl Source for ProducerSource {
    fn configure(&self, config: &SourceConfig) -> Result<()> {
        let mut state = self.state.lock();
        if self.running.load(Ordering::SeqCst) {
            return Err(ArgonError::config(
                "cannot reconfigure a running source; stop it first",
            ));
        }
        state.config = config.clone();
        Ok(())
    }

    fn start(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let config = {
            let state = self.state.lock();
            if !state.initialized {
                return Err(ArgonError::source("source is not initialized"));
            }
            state.config.clone()
        };

        let producer = match (self.factory)(&config) {
            Ok(p) => p,
            Err(e) => {
                self.state.lock().last_error = Some(e.to_string());
                return Err(e);
            }
        };

        {
            let mut state = self.state.lock();
            state.native_resolution = producer.native_resolution();
            state.native_fps = producer.native_fps();
            state.last_error = None;
        }

        self.running.store(true, Ordering::SeqCst);
        self.cell.reset();

        let running = Arc::clone(&self.running);
        let cell = Arc::clone(&self.cell);
        let events = self.events.lock().clone();
        let fps = {
            let native = producer.native_fps();
            if native > 0.0 {
                native
            } else {
                config.fps.max(1.0)
            }
        };
        let name = self.info.name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("source-{}", self.info.id))
            .spawn(move || producer_loop(producer, cell, running, events, fps, name))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                ArgonError::source(format!("failed to spawn producer thread: {e}"))
            })?;
        *self.worker.lock() = Some(handle);

        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.cell.reset();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.cell.latest()
    }

    fn native_resolution(&self) -> (u32, u32) {
        let state = self.state.lock();
        if state.native_resolution != (0, 0) {
            state.native_resolution
        } else {
            state.config.resolution
        }
    }

    fn native_fps(&self) -> f64 {
        let state = self.state.lock();
        if state.native_fps > 0.0 {
            state.native_fps
        } else {
            state.config.fps
        }
    }

    fn attach_events(&self, id: Handle, events: EventHub) {
        *self.events.lock() = Some((id, events));
    }
}

fn producer_loop(
    mut producer: Box<dyn FrameProducer>,
    cell: Arc<FrameCell>,
    running: Arc<AtomicBool>,
    events: Option<(Handle, EventHub)>,
    fps: f64,
    name: String,
) {
    let interval = Duration::from_secs_f64(1.0 / fps.max(1.0));
    let epoch = Instant::now();
    let mut sequence: u64 = 0;
    let mut last_ts_us: i64 = -1;

    debug!("Producer thread started: {name} at {fps:.1} fps");

    while running.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();

        match producer.next_frame() {
            Ok(ProducedFrame::Frame(mut frame)) => {
                if frame.timestamp_us == 0 {
                    frame.timestamp_us = epoch.elapsed().as_micros() as i64;
                }
                frame.timestamp_us = frame.timestamp_us.max(last_ts_us + 1);
                last_ts_us = frame.timestamp_us;
                frame.sequence = sequence;
                sequence += 1;
                cell.publish(frame);
            }
            Ok(ProducedFrame::Idle) => {}
            Ok(ProducedFrame::Closed) => {
                info!("Capture target closed: {name}");
                cell.close();
                if let Some((id, hub)) = &events {
                    hub.emit(PipelineEvent::SourceClosed { source: *id });
                }
                break;
            }
            Err(e) => {
                warn!("Producer failed: {name}: {e}");
                cell.close();
                if let Some((id, hub)) = &events {
                    hub.emit(PipelineEvent::SourceClosed { source: *id });
                }
                break;
            }
        }

        let elapsed = cycle_start.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    debug!("Producer thread stopped: {name} after {sequence} frames");
}

impl Drop for ProducerSource {
    fn drop(&mut self) {
        self.stop();
    }
}
