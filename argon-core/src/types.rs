//! Core types for Argon
//!
//! These types flow between the pipeline stages: raw frames from sources to
//! the compositor and encoder, encoded packets from the encoder to the
//! transmitter, and the timebases that relate their timestamps.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global handle counter for unique ids
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying a source, layer or scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Create a new unique handle
    pub fn new() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Pixel format of a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit BGRA, 4 bytes per pixel, single plane
    #[default]
    Bgra8,
    /// 8-bit NV12, luma plane followed by interleaved chroma at half resolution
    Nv12,
}

impl PixelFormat {
    /// Tightly-packed buffer size for the given dimensions
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            Self::Bgra8 => w * h * 4,
            Self::Nv12 => w * h + (w * h) / 2,
        }
    }
}

/// Frame payload storage
#[derive(Debug, Clone)]
pub enum FrameData {
    /// CPU-accessible pixel buffer, tightly packed
    Memory(Vec<u8>),
    /// Opaque GPU texture handle plus the device it lives on
    Texture { handle: u64, device_id: u32 },
}

/// Raw video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: PixelFormat,
    /// Timestamp in microseconds, monotonic within a source
    pub timestamp_us: i64,
    /// Sequence number, monotonic within a source
    pub sequence: u64,
    /// Pixel data
    pub data: FrameData,
}

impl Frame {
    /// Create a solid-color BGRA frame
    pub fn solid(width: u32, height: u32, color: Color) -> Self {
        let bgra = color.to_bgra8();
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&bgra);
        }
        Self {
            width,
            height,
            format: PixelFormat::Bgra8,
            timestamp_us: 0,
            sequence: 0,
            data: FrameData::Memory(data),
        }
    }

    /// Whether the payload is CPU-accessible
    pub fn is_cpu(&self) -> bool {
        matches!(self.data, FrameData::Memory(_))
    }

    /// Read one BGRA pixel, if this is a CPU BGRA frame and in bounds
    pub fn bgra_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if self.format != PixelFormat::Bgra8 || x >= self.width || y >= self.height {
            return None;
        }
        match &self.data {
            FrameData::Memory(data) => {
                let idx = ((y * self.width + x) * 4) as usize;
                data.get(idx..idx + 4).map(|p| [p[0], p[1], p[2], p[3]])
            }
            FrameData::Texture { .. } => None,
        }
    }
}

/// RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };

    /// Opaque color from RGB components
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Color as a BGRA byte quad
    pub fn to_bgra8(&self) -> [u8; 4] {
        [self.b, self.g, self.r, self.a]
    }

    /// Color from hue/saturation/lightness, hue in degrees
    pub fn from_hsl(hue: f32, saturation: f32, lightness: f32) -> Self {
        let h = hue.rem_euclid(360.0) / 60.0;
        let c = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
        let x = c * (1.0 - (h % 2.0 - 1.0).abs());
        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let m = lightness - c / 2.0;
        Self::rgb(
            ((r + m) * 255.0).round() as u8,
            ((g + m) * 255.0).round() as u8,
            ((b + m) * 255.0).round() as u8,
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Encoded video packet
#[derive(Debug, Clone)]
pub struct Packet {
    /// Encoded bytes
    pub data: Vec<u8>,
    /// Presentation timestamp in the producing stage's timebase
    pub pts: i64,
    /// Decode timestamp in the producing stage's timebase
    pub dts: i64,
    /// Whether this packet is an IDR keyframe
    pub keyframe: bool,
    /// Packet duration in the producing stage's timebase, 0 if unknown
    pub duration: i64,
    /// Whether codec extradata (SPS/PPS) accompanies the stream out of band
    pub has_extradata: bool,
}

/// Codec parameters handed from the encoder to the transmitter
#[derive(Debug, Clone)]
pub struct CodecParameters {
    /// Coded width in pixels
    pub width: u32,
    /// Coded height in pixels
    pub height: u32,
    /// Target bitrate in kbps
    pub bitrate: u32,
    /// Out-of-band codec headers (SPS/PPS), if the encoder produced them
    pub extradata: Option<Vec<u8>>,
    /// Timebase of packet timestamps produced by the encoder
    pub timebase: Timebase,
}

/// Rational timebase: seconds-per-unit of a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    pub num: i32,
    pub den: i32,
}

impl Timebase {
    /// Microseconds
    pub const MICROS: Timebase = Timebase { num: 1, den: 1_000_000 };
    /// Milliseconds, the FLV/RTMP stream timebase
    pub const MILLIS: Timebase = Timebase { num: 1, den: 1000 };

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Rescale a timestamp into another timebase, rounding to nearest
    /// (half away from zero), matching `av_rescale_q` semantics.
    pub fn rescale(&self, value: i64, to: Timebase) -> i64 {
        let num = value as i128 * self.num as i128 * to.den as i128;
        let den = self.den as i128 * to.num as i128;
        let rounded = if num >= 0 {
            (num + den / 2) / den
        } else {
            (num - den / 2) / den
        };
        rounded as i64
    }

    /// Rescale like [`rescale`](Self::rescale) but never below `floor`,
    /// preserving monotonicity of a timestamp sequence across rounding.
    pub fn rescale_monotonic(&self, value: i64, to: Timebase, floor: i64) -> i64 {
        self.rescale(value, to).max(floor)
    }

    /// Seconds per tick
    pub fn as_secs_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl std::fmt::Display for Timebase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let a = Handle::new();
        let b = Handle::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn solid_frame_pixels() {
        let frame = Frame::solid(4, 2, Color::rgb(255, 128, 0));
        assert_eq!(frame.bgra_at(0, 0), Some([0, 128, 255, 255]));
        assert_eq!(frame.bgra_at(3, 1), Some([0, 128, 255, 255]));
        assert_eq!(frame.bgra_at(4, 0), None);
    }

    #[test]
    fn buffer_sizes() {
        assert_eq!(PixelFormat::Bgra8.buffer_size(4, 2), 32);
        assert_eq!(PixelFormat::Nv12.buffer_size(4, 2), 12);
    }

    #[test]
    fn rescale_micros_to_millis() {
        assert_eq!(Timebase::MICROS.rescale(1_000_000, Timebase::MILLIS), 1000);
        assert_eq!(Timebase::MICROS.rescale(1_499, Timebase::MILLIS), 1);
        assert_eq!(Timebase::MICROS.rescale(1_500, Timebase::MILLIS), 2);
    }

    #[test]
    fn rescale_law_within_one_stream_tick() {
        // |pts_s * num_e * den_s - pts_e * num_s * den_e| < den_e * num_s
        let cases = [
            (Timebase::MICROS, Timebase::MILLIS),
            (Timebase::new(1001, 60000), Timebase::MILLIS),
            (Timebase::new(1, 30), Timebase::MICROS),
        ];
        for (from, to) in cases {
            for pts in [0i64, 1, 7, 999, 3599, 123_456_789] {
                let out = from.rescale(pts, to);
                let lhs = (out as i128 * from.num as i128 * to.den as i128
                    - pts as i128 * to.num as i128 * from.den as i128)
                    .abs();
                let rhs = from.den as i128 * to.num as i128;
                assert!(lhs <= rhs, "pts={pts} from={from} to={to}");
            }
        }
    }

    #[test]
    fn rescale_fractional_fps_boundary() {
        // 59.94 fps, frame ticks -> micros -> millis; after 3600 frames the
        // last DTS must land within 1 ms of the ideal value.
        let frame_tb = Timebase::new(1001, 60000);
        let mut prev = i64::MIN;
        let mut last = 0;
        for n in 0..3600i64 {
            let us = frame_tb.rescale(n, Timebase::MICROS);
            let ms = Timebase::MICROS.rescale_monotonic(us, Timebase::MILLIS, prev);
            assert!(ms >= prev);
            prev = ms;
            last = ms;
        }
        let ideal = (3599f64 * 1001.0 * 1000.0 / 60000.0).round() as i64;
        assert!((last - ideal).abs() <= 1, "last={last} ideal={ideal}");
    }

    #[test]
    fn monotonic_clamp_never_regresses() {
        let tb = Timebase::MICROS;
        let mut prev = 0;
        for us in [100, 900, 1000, 1100, 1400, 1600] {
            let ms = tb.rescale_monotonic(us, Timebase::MILLIS, prev);
            assert!(ms >= prev);
            prev = ms;
        }
    }

    #[test]
    fn hsl_primaries() {
        assert_eq!(Color::from_hsl(0.0, 1.0, 0.5), Color::rgb(255, 0, 0));
        assert_eq!(Color::from_hsl(120.0, 1.0, 0.5), Color::rgb(0, 255, 0));
        assert_eq!(Color::from_hsl(240.0, 1.0, 0.5), Color::rgb(0, 0, 255));
    }
}
