//! Scene composition onto a canvas frame.
//!
//! Works from a [`SceneSnapshot`], so no scene lock is held while sources
//! are polled or pixels pushed. Layers draw bottom to top; a layer whose
//! source yields no frame is skipped, not filled black.

use tracing::trace;

use crate::render::blend::composite_pixel;
use crate::render::raster::{bilinear_sample, frame_bgra};
use crate::scene::{LayerSnapshot, Mat2x3, SceneSnapshot};
use crate::types::{Color, Frame, FrameData, PixelFormat};

/// Composite a snapshot into a BGRA canvas frame.
///
/// Timestamp and sequence are stamped by the render loop afterwards.
pub fn composite(snapshot: &SceneSnapshot) -> Frame {
    let (width, height) = snapshot.canvas_size;
    let mut canvas = solid_canvas(width, height, snapshot.background);

    for layer in &snapshot.layers {
        let Some(source) = layer.source.upgrade() else {
            trace!("layer {} source is gone", layer.id);
            continue;
        };
        let Some(frame) = source.latest_frame() else {
            continue;
        };
        draw_layer(&mut canvas, width, height, layer, &frame);
    }

    Frame {
        width,
        height,
        format: PixelFormat::Bgra8,
        timestamp_us: 0,
        sequence: 0,
        data: FrameData::Memory(canvas),
    }
}

fn solid_canvas(width: u32, height: u32, color: Color) -> Vec<u8> {
    let bgra = color.to_bgra8();
    let mut canvas = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        canvas.extend_from_slice(&bgra);
    }
    canvas
}

fn draw_layer(
    canvas: &mut [u8],
    canvas_w: u32,
    canvas_h: u32,
    layer: &LayerSnapshot,
    frame: &Frame,
) {
    let Some(src) = frame_bgra(frame) else {
        return;
    };
    if frame.width == 0 || frame.height == 0 {
        return;
    }
    let (sw, sh) = (frame.width as f64, frame.height as f64);

    let transform = &layer.transform;
    let (lw, lh) = if transform.size.0 > 0.0 && transform.size.1 > 0.0 {
        transform.size
    } else {
        (sw, sh)
    };

    // source pixel -> layer local -> canvas
    let to_canvas = transform
        .matrix(lw, lh)
        .mul(&Mat2x3::scale(lw / sw, lh / sh));
    let Some(to_source) = to_canvas.invert() else {
        return;
    };

    // Destination bounding box from the mapped source corners
    let corners = [
        to_canvas.apply(0.0, 0.0),
        to_canvas.apply(sw, 0.0),
        to_canvas.apply(0.0, sh),
        to_canvas.apply(sw, sh),
    ];
    let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil() as i64).clamp(0, canvas_w as i64) as u32;
    let y1 = (max_y.ceil() as i64).clamp(0, canvas_h as i64) as u32;

    let opacity = transform.opacity as f32;

    for y in y0..y1 {
        for x in x0..x1 {
            // Inverse-map the pixel center into source space
            let (fx, fy) = to_source.apply(x as f64 + 0.5, y as f64 + 0.5);
            if fx < 0.0 || fy < 0.0 || fx > sw || fy > sh {
                continue;
            }
            let pixel = bilinear_sample(&src, frame.width, frame.height, fx - 0.5, fy - 0.5);
            let idx = ((y * canvas_w + x) * 4) as usize;
            composite_pixel(layer.blend, &mut canvas[idx..idx + 4], pixel, opacity);
        }
    }
}
