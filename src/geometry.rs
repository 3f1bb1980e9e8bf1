// ============================================================================
// GEOMETRY - sizes, offsets and the fit helpers used by the stage builder
// ============================================================================

use serde::{Deserialize, Serialize};

/// A 2D vector in normalised offset space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A fractional size (CSS pixels, or an unrounded fit result).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeF {
    pub width: f32,
    pub height: f32,
}

impl SizeF {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }

    pub fn round(self) -> PixelSize {
        PixelSize::new(
            self.width.round().max(0.0) as u32,
            self.height.round().max(0.0) as u32,
        )
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// An integer size in device pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn to_f32(self) -> SizeF {
        SizeF::new(self.width as f32, self.height as f32)
    }

    /// Width over height; 1.0 for degenerate sizes so callers never divide by zero.
    pub fn aspect(&self) -> f32 {
        if self.is_empty() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Fit `size` into `max` keeping aspect ratio.
///
/// With `cover` the result covers `max` (may overflow one axis); without it the
/// result is contained in `max`. Sizes already inside (contain) or already
/// covering (cover) are left alone on that axis.
pub fn size_fit(size: SizeF, max: SizeF, cover: bool) -> SizeF {
    if size.is_empty() {
        return size;
    }
    let ratio = size.width / size.height;
    let mut out = size;
    if (cover && out.height < max.height) || (!cover && out.height > max.height) {
        out.height = max.height;
        out.width = out.height * ratio;
    }
    if (cover && out.width < max.width) || (!cover && out.width > max.width) {
        out.width = max.width;
        out.height = out.width / ratio;
    }
    out
}

/// Uniform scale that makes `size` cover (or fit inside) `max`.
pub fn size_fit_scale(size: SizeF, max: SizeF, cover: bool) -> f32 {
    if size.is_empty() || max.is_empty() {
        return 1.0;
    }
    let wider = max.width / max.height > size.width / size.height;
    match (cover, wider) {
        (true, true) | (false, false) => max.width / size.width,
        (true, false) | (false, true) => max.height / size.height,
    }
}
