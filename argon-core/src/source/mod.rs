//! Video sources.
//!
//! A source yields, on demand, the most recent frame produced by some
//! producer (screen grabber, window grabber, synthetic generator). Producer
//! rate is independent of consumer rate: only the newest completed frame is
//! kept, intermediate frames are discarded.

mod color;
mod pattern;
mod producer;

pub use color::ColorSource;
pub use pattern::{test_pattern_source, GradientProducer};
pub use producer::{FrameProducer, ProducedFrame, ProducerSource};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{ArgonError, Result};
use crate::events::EventHub;
use crate::plugin::Plugin;
use crate::types::{Frame, Handle};

/// Region of interest within a capture target
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Source configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SourceConfig {
    /// Desired output resolution
    pub resolution: (u32, u32),
    /// Target frame rate
    pub fps: f64,
    /// Prefer GPU frames when the producer supports them
    pub hardware_preferred: bool,
    /// Region of interest, `None` = full target. Consumed by host-supplied
    /// capture producers; the built-in generators render full frames.
    pub region: Option<Region>,
    /// Device identifier for capture devices
    pub device_id: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            resolution: (1920, 1080),
            fps: 30.0,
            hardware_preferred: true,
            region: None,
            device_id: None,
        }
    }
}

/// A video source.
///
/// Implementations are shared between the control thread and the render
/// thread, so every method takes `&self`; state lives behind short-lived
/// internal locks. `latest_frame` must return quickly — the render loop
/// calls it outside the scene lock on every tick.
pub trait Source: Plugin {
    /// Apply configuration. Fails if the platform reports the capture API
    /// unsupported or the device is unavailable; no side effects on failure.
    fn configure(&self, config: &SourceConfig) -> Result<()>;

    /// Start producing frames. After a successful `configure` this either
    /// succeeds or leaves the source stopped with an error description.
    fn start(&self) -> Result<()>;

    /// Stop producing frames
    fn stop(&self);

    /// Whether the source is actively producing
    fn is_running(&self) -> bool;

    /// The newest completed frame, or `None` if nothing is available.
    /// Returning the same frame as the previous call is permitted.
    fn latest_frame(&self) -> Option<Arc<Frame>>;

    /// Native resolution before any scaling
    fn native_resolution(&self) -> (u32, u32);

    /// Native frame rate of the producer
    fn native_fps(&self) -> f64;

    /// Enumerate devices usable in `SourceConfig::device_id`
    fn available_devices(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called by the registry so the source can publish events (e.g. target
    /// closure) under its registered handle.
    fn attach_events(&self, _id: Handle, _events: EventHub) {}
}

/// How long a quiesced source keeps serving its last good frame after the
/// capture target disappears.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Most-recent-wins frame slot shared between a producer and the render
/// thread.
///
/// The producer overwrites the slot with each completed frame; the consumer
/// reads the newest one. When the capture target closes, the last good frame
/// keeps being served for a brief grace period, then the slot yields `None`.
pub struct FrameCell {
    state: Mutex<CellState>,
    grace: Duration,
}

struct CellState {
    frame: Option<Arc<Frame>>,
    closed_at: Option<Instant>,
}

impl FrameCell {
    pub fn new() -> Self {
        Self::with_grace(CLOSE_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            state: Mutex::new(CellState {
                frame: None,
                closed_at: None,
            }),
            grace,
        }
    }

    /// Publish a completed frame, replacing whatever was there
    pub fn publish(&self, frame: Frame) {
        let mut state = self.state.lock();
        state.frame = Some(Arc::new(frame));
        state.closed_at = None;
    }

    /// The newest frame, honoring the close grace period
    pub fn latest(&self) -> Option<Arc<Frame>> {
        let state = self.state.lock();
        if let Some(closed_at) = state.closed_at {
            if closed_at.elapsed() > self.grace {
                return None;
            }
        }
        state.frame.clone()
    }

    /// Mark the capture target closed; starts the grace period
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed_at.is_none() {
            state.closed_at = Some(Instant::now());
        }
    }

    /// Drop the stored frame and clear the closed marker
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.frame = None;
        state.closed_at = None;
    }
}

impl Default for FrameCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns every registered source; layers hold weak handles.
pub struct SourceRegistry {
    sources: Mutex<HashMap<Handle, Arc<dyn Source>>>,
    events: EventHub,
}

impl SourceRegistry {
    pub fn new(events: EventHub) -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Register and initialize a source, returning its handle
    pub fn register(&self, source: Arc<dyn Source>) -> Result<Handle> {
        source.initialize()?;
        let id = Handle::new();
        source.attach_events(id, self.events.clone());
        info!("Source registered: {} ({})", source.info().name, id);
        self.sources.lock().insert(id, source);
        Ok(id)
    }

    pub fn get(&self, id: Handle) -> Option<Arc<dyn Source>> {
        self.sources.lock().get(&id).cloned()
    }

    /// Remove a source, stopping and shutting it down.
    ///
    /// The caller guarantees no layer references the source anymore; the
    /// pipeline controller enforces this before delegating here.
    pub fn remove(&self, id: Handle) -> Result<()> {
        let source = self
            .sources
            .lock()
            .remove(&id)
            .ok_or_else(|| ArgonError::source(format!("unknown source {id}")))?;
        source.stop();
        source.shutdown();
        debug!("Source removed: {id}");
        Ok(())
    }

    pub fn ids(&self) -> Vec<Handle> {
        self.sources.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.lock().is_empty()
    }

    /// Stop and shut down every source
    pub fn shutdown_all(&self) {
        let sources: Vec<_> = self.sources.lock().drain().collect();
        for (id, source) in sources {
            source.stop();
            source.shutdown();
            debug!("Source shut down: {id}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    #[test]
    fn frame_cell_most_recent_wins() {
        let cell = FrameCell::new();
        assert!(cell.latest().is_none());
        cell.publish(Frame {
            sequence: 1,
            ..Frame::solid(2, 2, Color::BLACK)
        });
        cell.publish(Frame {
            sequence: 2,
            ..Frame::solid(2, 2, Color::BLACK)
        });
        assert_eq!(cell.latest().unwrap().sequence, 2);
    }

    #[test]
    fn frame_cell_grace_period() {
        let cell = FrameCell::with_grace(Duration::from_millis(30));
        cell.publish(Frame::solid(2, 2, Color::BLACK));
        cell.close();
        // Within the grace period the last good frame is still served
        assert!(cell.latest().is_some());
        std::thread::sleep(Duration::from_millis(50));
        assert!(cell.latest().is_none());
        // Publishing again reopens the cell
        cell.publish(Frame::solid(2, 2, Color::BLACK));
        assert!(cell.latest().is_some());
    }

    #[test]
    fn registry_register_and_remove() {
        let registry = SourceRegistry::new(EventHub::default());
        let source: Arc<dyn Source> = Arc::new(ColorSource::new(Color::rgb(10, 20, 30)));
        let id = registry.register(Arc::clone(&source)).unwrap();
        assert!(registry.get(id).is_some());
        registry.remove(id).unwrap();
        assert!(registry.get(id).is_none());
        assert!(!source.is_running());
    }
}
