//! CPU raster helpers: bilinear sampling and pixel format conversion.

use std::borrow::Cow;
use tracing::debug;

use crate::types::{Frame, FrameData, PixelFormat};

/// Bilinearly sample a tightly-packed BGRA buffer at texel coordinates.
///
/// Coordinates are in texel space (`0.0` = center of the first texel after
/// the `-0.5` shift done by the caller); edges clamp.
pub fn bilinear_sample(data: &[u8], width: u32, height: u32, x: f64, y: f64) -> [u8; 4] {
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let at = |px: u32, py: u32| -> [u8; 4] {
        let idx = ((py * width + px) * 4) as usize;
        [data[idx], data[idx + 1], data[idx + 2], data[idx + 3]]
    };

    let p00 = at(x0, y0);
    let p10 = at(x1, y0);
    let p01 = at(x0, y1);
    let p11 = at(x1, y1);

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
    }
    out
}

/// Convert a tightly-packed NV12 buffer to BGRA (BT.601 limited range,
/// fixed-point).
pub fn nv12_to_bgra(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let luma_size = w * h;
    let mut out = vec![0u8; w * h * 4];

    for y in 0..h {
        for x in 0..w {
            let luma = data[y * w + x] as i32;
            let chroma_idx = luma_size + (y / 2) * w + (x / 2) * 2;
            let (cb, cr) = if chroma_idx + 1 < data.len() {
                (data[chroma_idx] as i32, data[chroma_idx + 1] as i32)
            } else {
                (128, 128)
            };

            let c = (luma - 16) * 298;
            let d = cb - 128;
            let e = cr - 128;
            let r = ((c + 409 * e + 128) >> 8).clamp(0, 255) as u8;
            let g = ((c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8;
            let b = ((c + 516 * d + 128) >> 8).clamp(0, 255) as u8;

            let idx = (y * w + x) * 4;
            out[idx] = b;
            out[idx + 1] = g;
            out[idx + 2] = r;
            out[idx + 3] = 255;
        }
    }
    out
}

/// The frame's pixels as a BGRA buffer, converting when necessary.
///
/// Returns `None` for GPU texture payloads; the compositor requires a CPU
/// path and skips layers whose frames only exist on a device.
pub fn frame_bgra(frame: &Frame) -> Option<Cow<'_, [u8]>> {
    match (&frame.data, frame.format) {
        (FrameData::Memory(data), PixelFormat::Bgra8) => Some(Cow::Borrowed(data.as_slice())),
        (FrameData::Memory(data), PixelFormat::Nv12) => {
            Some(Cow::Owned(nv12_to_bgra(data, frame.width, frame.height)))
        }
        (FrameData::Texture { .. }, _) => {
            debug!("skipping GPU frame without a CPU copy");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;

    #[test]
    fn sampling_at_texel_centers_is_exact() {
        // 2x1: black then white
        let data = [0, 0, 0, 255, 255, 255, 255, 255];
        assert_eq!(bilinear_sample(&data, 2, 1, 0.0, 0.0), [0, 0, 0, 255]);
        assert_eq!(bilinear_sample(&data, 2, 1, 1.0, 0.0), [255, 255, 255, 255]);
    }

    #[test]
    fn sampling_between_texels_interpolates() {
        let data = [0, 0, 0, 255, 255, 255, 255, 255];
        let mid = bilinear_sample(&data, 2, 1, 0.5, 0.0);
        for c in 0..3 {
            assert!((mid[c] as i32 - 128).abs() <= 1);
        }
    }

    #[test]
    fn sampling_clamps_outside_edges() {
        let data = [7, 8, 9, 255];
        assert_eq!(bilinear_sample(&data, 1, 1, -3.0, 5.0), [7, 8, 9, 255]);
    }

    #[test]
    fn nv12_grey_converts_to_grey() {
        // Y=128, chroma neutral -> mid grey
        let mut data = vec![128u8; 4 * 2];
        data.extend_from_slice(&[128, 128, 128, 128]);
        let bgra = nv12_to_bgra(&data, 4, 2);
        let px = &bgra[0..4];
        for c in 0..3 {
            assert!((px[c] as i32 - 130).abs() <= 3, "channel {c} = {}", px[c]);
        }
        assert_eq!(px[3], 255);
    }

    #[test]
    fn texture_frames_have_no_cpu_path() {
        let frame = Frame {
            data: crate::types::FrameData::Texture {
                handle: 1,
                device_id: 0,
            },
            ..Frame::solid(2, 2, Color::BLACK)
        };
        assert!(frame_bgra(&frame).is_none());
    }
}
