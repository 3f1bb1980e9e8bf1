// ============================================================================
// RESAMPLING KERNELS - depth-driven displacement and perspective search
// ============================================================================
//
// Both kernels read the image and depth render targets in normalised texture
// space and produce a frame the size of the image target. They are pure
// functions of their inputs; the GPU path in `gpu::compute` evaluates the
// same math from the same `KernelParams`.

pub mod displacement;
pub mod perspective;
pub mod sampler;

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;

use crate::geometry::Vec2;
use crate::options::QUALITY_HIGHEST;

/// Fraction of the depth range spanned by the perspective search line.
pub const COMPRESSION: f32 = 0.8;
/// Confidence above which antialiasing takes a half step back.
pub const AA_TRIGGER: f32 = 0.8;

/// Per-composite inputs. Passed by value; kernels keep no state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelParams {
    /// Displacement strength (`0.02 * depthScale`).
    pub scale: f32,
    pub offset: Vec2,
    /// Depth value that stays still, 0..1.
    pub focus: f32,
    /// Zoom applied to the perspective output so displaced edges stay in frame.
    pub enlarge: f32,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            scale: 0.04,
            offset: Vec2::ZERO,
            focus: 0.5,
            enlarge: 1.06,
        }
    }
}

/// Per-axis scale that keeps displacement isotropic on non-square targets.
pub fn aspect_scale(scale: f32, width: u32, height: u32) -> (f32, f32) {
    let aspect = if width == 0 || height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    };
    (scale * (1.0f32).min(1.0 / aspect), scale * (1.0f32).min(aspect))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Antialias {
    None,
    /// Step back half a step when the current step is a whole step.
    Branched,
    /// Step back half a step whenever the position has not fallen behind.
    Stepped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceMethod {
    /// 1 once the search passes the sampled depth.
    Step,
    /// Linear falloff, cut below one step of error.
    Linear,
    /// `(1 - error)^maskPower`.
    Power,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accumulation {
    /// Average corrected positions, sample once at the end.
    Position,
    /// Average sampled colours.
    Color,
}

/// Fixed settings of one perspective kernel build.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerspectiveProfile {
    pub steps: u32,
    /// Multiplier on the search vector (distinct from `KernelParams::enlarge`).
    pub enlarge: f32,
    pub compression: f32,
    pub perspective: f32,
    pub confidence_max: f32,
    pub method: ConfidenceMethod,
    pub antialias: Antialias,
    pub accumulation: Accumulation,
}

impl PerspectiveProfile {
    /// Used when a perspective kernel is requested without a quality level.
    pub fn reference() -> Self {
        Self {
            steps: 16,
            enlarge: 1.5,
            compression: COMPRESSION,
            perspective: 0.0,
            confidence_max: 2.5,
            method: ConfidenceMethod::Step,
            antialias: Antialias::Branched,
            accumulation: Accumulation::Position,
        }
    }

    /// Profile for quality levels 2..=5. Level 1 is the displacement kernel.
    pub fn for_level(level: u8) -> Option<Self> {
        let base = Self::reference();
        match level {
            2 => Some(Self { steps: 4, enlarge: 0.8, antialias: Antialias::None, ..base }),
            3 => Some(Self { steps: 6, enlarge: 1.0, antialias: Antialias::Stepped, ..base }),
            4 => Some(Self { steps: 16, enlarge: 1.5, antialias: Antialias::Stepped, ..base }),
            5 => Some(Self {
                steps: 40,
                enlarge: 1.5,
                antialias: Antialias::None,
                confidence_max: 4.5,
                accumulation: Accumulation::Color,
                ..base
            }),
            _ => None,
        }
    }

    pub fn depth_min(&self) -> f32 {
        (1.0 - self.compression) / 2.0
    }

    pub fn depth_max(&self) -> f32 {
        (1.0 + self.compression) / 2.0
    }

    pub fn cutoff(&self) -> f32 {
        self.depth_min() - 0.0001
    }

    pub fn mask_power(&self) -> f32 {
        match self.accumulation {
            Accumulation::Color => self.steps as f32 * 2.0,
            Accumulation::Position => self.steps as f32,
        }
    }
}

/// The closed set of compound kernels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KernelVariant {
    Displacement,
    Perspective(PerspectiveProfile),
}

impl KernelVariant {
    /// Kernel for a quality level. `None` selects the reference profile.
    pub fn for_quality(level: Option<u8>) -> Self {
        match level {
            None => KernelVariant::Perspective(PerspectiveProfile::reference()),
            Some(l) if l <= 1 => KernelVariant::Displacement,
            Some(l) => PerspectiveProfile::for_level(l.min(QUALITY_HIGHEST))
                .map(KernelVariant::Perspective)
                .unwrap_or(KernelVariant::Displacement),
        }
    }

    pub fn render(&self, image: &RgbaImage, depth: &GrayImage, params: &KernelParams) -> RgbaImage {
        match self {
            KernelVariant::Displacement => displacement::render(image, depth, params),
            KernelVariant::Perspective(profile) => perspective::render(image, depth, params, profile),
        }
    }

    pub fn steps(&self) -> u32 {
        match self {
            KernelVariant::Displacement => 1,
            KernelVariant::Perspective(p) => p.steps,
        }
    }
}

/// Blend the depth map (as grey) over `frame` by `amount` in 0..1.
pub fn apply_depth_preview(frame: &mut RgbaImage, depth: &GrayImage, amount: f32) {
    if amount <= 0.0 || frame.width() == 0 || frame.height() == 0 {
        return;
    }
    let amount = amount.min(1.0);
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let buf: &mut [u8] = frame;
    buf.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let (u, v) = sampler::pixel_uv(x, y, w, h);
            let d = sampler::sample_depth(depth, u, v) * 255.0;
            let pi = x * 4;
            for c in 0..3 {
                let blended = row[pi + c] as f32 * (1.0 - amount) + d * amount;
                row[pi + c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_levels_select_expected_kernels() {
        assert_eq!(KernelVariant::for_quality(Some(1)), KernelVariant::Displacement);
        assert_eq!(KernelVariant::for_quality(Some(0)), KernelVariant::Displacement);
        assert_eq!(KernelVariant::for_quality(Some(2)).steps(), 4);
        assert_eq!(KernelVariant::for_quality(Some(5)).steps(), 40);
        assert_eq!(KernelVariant::for_quality(Some(9)).steps(), 40);
        assert_eq!(
            KernelVariant::for_quality(None),
            KernelVariant::Perspective(PerspectiveProfile::reference())
        );
    }

    #[test]
    fn profile_depth_window() {
        let p = PerspectiveProfile::reference();
        assert!((p.depth_min() - 0.1).abs() < 1e-6);
        assert!((p.depth_max() - 0.9).abs() < 1e-6);
        assert!(p.cutoff() < p.depth_min());
        assert_eq!(PerspectiveProfile::for_level(5).map(|p| p.mask_power()), Some(80.0));
    }

    #[test]
    fn aspect_scale_shrinks_the_long_axis() {
        assert_eq!(aspect_scale(1.0, 200, 100), (0.5, 1.0));
        assert_eq!(aspect_scale(1.0, 100, 200), (1.0, 0.5));
        assert_eq!(aspect_scale(1.0, 0, 0), (1.0, 1.0));
    }

    #[test]
    fn depth_preview_full_strength_shows_depth() {
        let mut frame = RgbaImage::from_pixel(2, 2, image::Rgba([200, 10, 10, 255]));
        let depth = GrayImage::from_pixel(2, 2, image::Luma([64]));
        apply_depth_preview(&mut frame, &depth, 1.0);
        assert_eq!(frame.get_pixel(0, 0).0, [64, 64, 64, 255]);
    }
}
