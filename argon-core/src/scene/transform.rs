//! Layer transforms.
//!
//! A minimal row-major 2×3 affine matrix covers everything layer placement
//! needs (translate, rotate, scale, invert) without pulling in a linear
//! algebra crate.

use serde::{Deserialize, Serialize};

/// Row-major 2×3 affine matrix mapping `(x, y)` to
/// `(m[0][0]·x + m[0][1]·y + m[0][2], m[1][0]·x + m[1][1]·y + m[1][2])`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat2x3 {
    pub m: [[f64; 3]; 2],
}

impl Mat2x3 {
    pub const IDENTITY: Mat2x3 = Mat2x3 {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty]],
        }
    }

    pub fn rotation_deg(degrees: f64) -> Self {
        let (s, c) = degrees.to_radians().sin_cos();
        Self {
            m: [[c, -s, 0.0], [s, c, 0.0]],
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            m: [[sx, 0.0, 0.0], [0.0, sy, 0.0]],
        }
    }

    /// Compose: apply `rhs` first, then `self`
    pub fn mul(&self, rhs: &Mat2x3) -> Mat2x3 {
        let a = &self.m;
        let b = &rhs.m;
        Mat2x3 {
            m: [
                [
                    a[0][0] * b[0][0] + a[0][1] * b[1][0],
                    a[0][0] * b[0][1] + a[0][1] * b[1][1],
                    a[0][0] * b[0][2] + a[0][1] * b[1][2] + a[0][2],
                ],
                [
                    a[1][0] * b[0][0] + a[1][1] * b[1][0],
                    a[1][0] * b[0][1] + a[1][1] * b[1][1],
                    a[1][0] * b[0][2] + a[1][1] * b[1][2] + a[1][2],
                ],
            ],
        }
    }

    /// Map a point through the matrix
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.m[0][0] * x + self.m[0][1] * y + self.m[0][2],
            self.m[1][0] * x + self.m[1][1] * y + self.m[1][2],
        )
    }

    /// Inverse, or `None` when the matrix is singular
    pub fn invert(&self) -> Option<Mat2x3> {
        let [[a, c, e], [b, d, f]] = self.m;
        let det = a * d - b * c;
        if det.abs() < 1e-12 {
            return None;
        }
        let ia = d / det;
        let ic = -c / det;
        let ib = -b / det;
        let id = a / det;
        Some(Mat2x3 {
            m: [
                [ia, ic, -(ia * e + ic * f)],
                [ib, id, -(ib * e + id * f)],
            ],
        })
    }
}

/// Placement of a layer on the canvas.
///
/// `size` of `(0, 0)` means "use the source's native size". Opacity and the
/// blend mode are applied at blit time, not baked into the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Top-left position on the canvas
    pub position: (f64, f64),
    /// Display size; `(0, 0)` = source native size
    pub size: (f64, f64),
    /// Rotation in degrees around the anchor
    pub rotation_deg: f64,
    /// Scale factors applied around the anchor
    pub scale: (f64, f64),
    /// Anchor point in `[0, 1]²`, relative to `size`
    pub anchor: (f64, f64),
    /// Mirror horizontally
    pub flip_h: bool,
    /// Mirror vertically
    pub flip_v: bool,
    /// Opacity in `[0, 1]`, multiplies the source alpha
    pub opacity: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: (0.0, 0.0),
            size: (0.0, 0.0),
            rotation_deg: 0.0,
            scale: (1.0, 1.0),
            anchor: (0.5, 0.5),
            flip_h: false,
            flip_v: false,
            opacity: 1.0,
        }
    }
}

impl Transform {
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = (x, y);
        self
    }

    pub fn with_size(mut self, w: f64, h: f64) -> Self {
        self.size = (w, h);
        self
    }

    pub fn with_rotation(mut self, degrees: f64) -> Self {
        self.rotation_deg = degrees;
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    /// The layer-local → canvas matrix for the given effective size:
    /// `T(position) · T(anchor·size) · R(rotation) · S(sx·flipH, sy·flipV)
    /// · T(−anchor·size)`.
    pub fn matrix(&self, width: f64, height: f64) -> Mat2x3 {
        let ax = self.anchor.0 * width;
        let ay = self.anchor.1 * height;
        let sx = self.scale.0 * if self.flip_h { -1.0 } else { 1.0 };
        let sy = self.scale.1 * if self.flip_v { -1.0 } else { 1.0 };

        Mat2x3::translation(self.position.0, self.position.1)
            .mul(&Mat2x3::translation(ax, ay))
            .mul(&Mat2x3::rotation_deg(self.rotation_deg))
            .mul(&Mat2x3::scale(sx, sy))
            .mul(&Mat2x3::translation(-ax, -ay))
    }

    /// Whether the mapping is a pure translation of layer-local space
    pub fn is_axis_aligned(&self) -> bool {
        self.rotation_deg == 0.0 && self.scale == (1.0, 1.0) && !self.flip_h && !self.flip_v
    }
}
