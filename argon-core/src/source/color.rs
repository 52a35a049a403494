//! Synthetic color source.
//!
//! Generates solid-color frames at the configured resolution, optionally
//! cycling the hue for an animated rainbow. Frames are generated on demand
//! from `latest_frame`, so there is no producer thread.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::plugin::{Capabilities, Plugin, PluginInfo, PluginType};
use crate::source::{Source, SourceConfig};
use crate::types::{Color, Frame};

pub struct ColorSource {
    state: Mutex<State>,
    epoch: Instant,
}

struct State {
    config: SourceConfig,
    color: Color,
    animated: bool,
    hue: f32,
    sequence: u64,
    last_timestamp_us: i64,
    initialized: bool,
    running: bool,
}

impl ColorSource {
    /// Solid color source
    pub fn new(color: Color) -> Self {
        Self {
            state: Mutex::new(State {
                config: SourceConfig::default(),
                color,
                animated: false,
                hue: 0.0,
                sequence: 0,
                last_timestamp_us: -1,
                initialized: false,
                running: false,
            }),
            epoch: Instant::now(),
        }
    }

    /// Hue-cycling rainbow source
    pub fn animated() -> Self {
        let source = Self::new(Color::rgb(255, 0, 0));
        source.state.lock().animated = true;
        source
    }

    pub fn set_color(&self, color: Color) {
        self.state.lock().color = color;
    }

    pub fn color(&self) -> Color {
        self.state.lock().color
    }

    pub fn set_animated(&self, animated: bool) {
        self.state.lock().animated = animated;
    }
}

impl Plugin for ColorSource {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            id: "argon.source.color".to_string(),
            name: "Color Source".to_string(),
            description: "Generates solid color or animated color frames".to_string(),
            version: "0.2".to_string(),
            author: "Argon".to_string(),
            website: "https://github.com/argon-studio/argon".to_string(),
            plugin_type: PluginType::Source,
            capabilities: Capabilities::HAS_VIDEO
                | Capabilities::HAS_SETTINGS
                | Capabilities::HAS_PREVIEW
                | Capabilities::THREAD_SAFE,
        }
    }

    fn initialize(&self) -> Result<()> {
        self.state.lock().initialized = true;
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.initialized = false;
    }

    fn is_active(&self) -> bool {
        self.state.lock().initialized
    }
}

impl Source for ColorSource {
    fn configure(&self, config: &SourceConfig) -> Result<()> {
        self.state.lock().config = config.clone();
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.initialized = true;
        state.running = true;
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().running = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn latest_frame(&self) -> Option<Arc<Frame>> {
        let mut state = self.state.lock();
        if !state.running {
            return None;
        }

        let color = if state.animated {
            state.hue = (state.hue + 1.0) % 360.0;
            Color::from_hsl(state.hue, 0.8, 0.5)
        } else {
            state.color
        };

        let (width, height) = state.config.resolution;
        let mut frame = Frame::solid(width, height, color);
        // Timestamps stay monotonic even when frames are pulled faster than
        // the clock resolution.
        let now_us = (self.epoch.elapsed().as_micros() as i64).max(state.last_timestamp_us + 1);
        state.last_timestamp_us = now_us;
        frame.timestamp_us = now_us;
        frame.sequence = state.sequence;
        state.sequence += 1;
        Some(Arc::new(frame))
    }

    fn native_resolution(&self) -> (u32, u32) {
        self.state.lock().config.resolution
    }

    fn native_fps(&self) -> f64 {
        self.state.lock().config.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_nothing_until_started() {
        let source = ColorSource::new(Color::rgb(255, 128, 0));
        assert!(source.latest_frame().is_none());
        source.start().unwrap();
        assert!(source.latest_frame().is_some());
        source.stop();
        assert!(source.latest_frame().is_none());
    }

    #[test]
    fn frame_matches_color_and_resolution() {
        let source = ColorSource::new(Color::rgb(255, 128, 0));
        source
            .configure(&SourceConfig {
                resolution: (320, 180),
                ..Default::default()
            })
            .unwrap();
        source.start().unwrap();
        let frame = source.latest_frame().unwrap();
        assert_eq!((frame.width, frame.height), (320, 180));
        assert_eq!(frame.bgra_at(160, 90), Some([0, 128, 255, 255]));
    }

    #[test]
    fn sequence_and_timestamp_are_monotonic() {
        let source = ColorSource::new(Color::BLACK);
        source.start().unwrap();
        let a = source.latest_frame().unwrap();
        let b = source.latest_frame().unwrap();
        assert!(b.sequence > a.sequence);
        assert!(b.timestamp_us > a.timestamp_us);
    }

    #[test]
    fn animated_source_changes_color() {
        let source = ColorSource::animated();
        source.start().unwrap();
        let a = source.latest_frame().unwrap().bgra_at(0, 0);
        for _ in 0..60 {
            source.latest_frame();
        }
        let b = source.latest_frame().unwrap().bgra_at(0, 0);
        assert_ne!(a, b);
    }
}
