//! Moving-gradient test pattern.
//!
//! A deterministic synthetic producer for tests and demos: a horizontal hue
//! gradient that scrolls one pixel per frame, so consecutive frames are
//! guaranteed to differ and motion survives encoding.

use crate::error::Result;
use crate::plugin::{Capabilities, PluginInfo};
use crate::source::{FrameProducer, ProducedFrame, ProducerSource};
use crate::types::{Color, Frame, FrameData, PixelFormat};

pub struct GradientProducer {
    width: u32,
    height: u32,
    fps: f64,
    frame: u64,
}

impl GradientProducer {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            fps,
            frame: 0,
        }
    }
}

impl FrameProducer for GradientProducer {
    fn next_frame(&mut self) -> Result<ProducedFrame> {
        let phase = (self.frame % self.width as u64) as u32;
        self.frame += 1;

        // Rows are identical, so build one and repeat it
        let mut row = Vec::with_capacity((self.width * 4) as usize);
        for x in 0..self.width {
            let hue = ((x + phase) % self.width) as f32 / self.width as f32 * 360.0;
            row.extend_from_slice(&Color::from_hsl(hue, 0.9, 0.5).to_bgra8());
        }
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for _ in 0..self.height {
            data.extend_from_slice(&row);
        }

        Ok(ProducedFrame::Frame(Frame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Bgra8,
            timestamp_us: 0,
            sequence: 0,
            data: FrameData::Memory(data),
        }))
    }

    fn native_resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn native_fps(&self) -> f64 {
        self.fps
    }
}

/// A ready-to-register test pattern source; resolution and rate come from
/// the source configuration.
pub fn test_pattern_source() -> ProducerSource {
    let info = PluginInfo {
        id: "argon.source.pattern".to_string(),
        name: "Test Pattern".to_string(),
        description: "Moving gradient test pattern".to_string(),
        version: "0.2".to_string(),
        author: "Argon".to_string(),
        website: "https://github.com/argon-studio/argon".to_string(),
        plugin_type: crate::plugin::PluginType::Source,
        capabilities: Capabilities::HAS_VIDEO
            | Capabilities::HAS_PREVIEW
            | Capabilities::THREAD_SAFE,
    };
    ProducerSource::new(
        info,
        Box::new(|config| {
            Ok(Box::new(GradientProducer::new(
                config.resolution.0,
                config.resolution.1,
                config.fps,
            )) as Box<dyn FrameProducer>)
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(producer: &mut GradientProducer) -> Frame {
        match producer.next_frame().unwrap() {
            ProducedFrame::Frame(frame) => frame,
            _ => panic!("gradient producer never idles or closes"),
        }
    }

    #[test]
    fn honors_the_requested_resolution() {
        let mut producer = GradientProducer::new(32, 8, 30.0);
        let frame = frame_of(&mut producer);
        assert_eq!((frame.width, frame.height), (32, 8));
        assert_eq!(frame.format, PixelFormat::Bgra8);
    }

    #[test]
    fn gradient_varies_across_a_row() {
        let mut producer = GradientProducer::new(64, 4, 30.0);
        let frame = frame_of(&mut producer);
        assert_ne!(frame.bgra_at(0, 0), frame.bgra_at(32, 0));
        // Rows are identical
        assert_eq!(frame.bgra_at(10, 0), frame.bgra_at(10, 3));
    }

    #[test]
    fn pattern_moves_between_frames() {
        let mut producer = GradientProducer::new(64, 4, 30.0);
        let first = frame_of(&mut producer);
        let second = frame_of(&mut producer);
        assert_ne!(first.bgra_at(0, 0), second.bgra_at(0, 0));
        // Scrolling by one pixel: the old pixel 1 becomes pixel 0
        assert_eq!(first.bgra_at(1, 0), second.bgra_at(0, 0));
    }

    #[test]
    fn phase_wraps_after_a_full_width() {
        let mut producer = GradientProducer::new(8, 2, 30.0);
        let first = frame_of(&mut producer);
        for _ in 0..7 {
            frame_of(&mut producer);
        }
        let wrapped = frame_of(&mut producer);
        assert_eq!(first.bgra_at(3, 0), wrapped.bgra_at(3, 0));
    }
}
