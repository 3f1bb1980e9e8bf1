// ============================================================================
// PERSPECTIVE KERNEL - multi-step depth search with confidence accumulation
// ============================================================================
//
// Each output pixel walks a line through (position, depth) space from the far
// end of the offset vector to the near end. At every step the depth map is
// sampled; where the sampled surface crosses the line the step is accepted
// with a confidence weight. The first step past the cutoff depth, or past the
// confidence ceiling, ends the walk.

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;

use super::sampler::{pixel_uv, sample_depth, sample_rgba, to_u8};
use super::{
    AA_TRIGGER, Accumulation, Antialias, ConfidenceMethod, KernelParams, PerspectiveProfile,
    aspect_scale,
};

/// Per-frame constants shared by every pixel.
#[derive(Clone, Copy, Debug)]
struct SearchSetup {
    v0: (f32, f32),
    v1: (f32, f32),
    inv_enlarge: f32,
    dmin: f32,
    dmax: f32,
    cutoff: f32,
    dstep: f32,
    mask_power: f32,
}

impl SearchSetup {
    fn new(params: &KernelParams, profile: &PerspectiveProfile, width: u32, height: u32) -> Self {
        let (sx, sy) = aspect_scale(params.scale, width, height);
        let (sx, sy) = (sx * profile.enlarge, sy * profile.enlarge);
        let lead = 0.5 - params.focus;
        let (ox, oy) = (params.offset.x, params.offset.y);
        let v0 = ((lead * ox - ox / 2.0) * sx, (lead * oy - oy / 2.0) * sy);
        let v1 = ((lead * ox + ox / 2.0) * sx, (lead * oy + oy / 2.0) * sy);
        let span = (profile.steps.max(2) - 1) as f32;
        Self {
            v0,
            v1,
            inv_enlarge: if params.enlarge > 0.0 { 1.0 / params.enlarge } else { 1.0 },
            dmin: profile.depth_min(),
            dmax: profile.depth_max(),
            cutoff: profile.cutoff(),
            dstep: profile.compression / span,
            mask_power: profile.mask_power(),
        }
    }
}

/// Undisplaced position for output coordinate `uv`.
#[inline]
pub fn base_position(u: f32, v: f32, enlarge: f32) -> (f32, f32) {
    let inv = if enlarge > 0.0 { 1.0 / enlarge } else { 1.0 };
    ((u - 0.5) * inv + 0.5, (v - 0.5) * inv + 0.5)
}

#[inline]
fn confidence(method: ConfidenceMethod, dpos: f32, depth: f32, setup: &SearchSetup) -> f32 {
    match method {
        ConfidenceMethod::Step => {
            if depth + 0.001 >= dpos {
                1.0
            } else {
                0.0
            }
        }
        ConfidenceMethod::Linear => {
            let c = 1.0 - (dpos - depth).abs();
            if c < 1.0 - setup.dstep { 0.0 } else { c }
        }
        ConfidenceMethod::Power => (1.0 - (dpos - depth).abs()).powf(setup.mask_power),
    }
}

/// Search index for the next iteration. Antialiasing steps back half a
/// step after a confident hit.
#[inline]
fn next_step(antialias: Antialias, conf: f32, i: f32, j: f32) -> f32 {
    match antialias {
        Antialias::None => j + 1.0,
        Antialias::Branched => {
            if conf > AA_TRIGGER && i == j { j - 0.5 } else { j + 1.0 }
        }
        Antialias::Stepped => {
            if conf >= AA_TRIGGER && j >= i { j - 0.5 } else { j + 1.0 }
        }
    }
}

#[inline]
fn search_pixel(
    image: &RgbaImage,
    depth_map: &GrayImage,
    u: f32,
    v: f32,
    profile: &PerspectiveProfile,
    setup: &SearchSetup,
) -> [f32; 4] {
    let pos = ((u - 0.5) * setup.inv_enlarge + 0.5, (v - 0.5) * setup.inv_enlarge + 0.5);
    let v0 = setup.v0;
    let v1 = (
        setup.v1.0 + (2.0 * pos.0 - 1.0) * profile.perspective,
        setup.v1.1 + (2.0 * pos.1 - 1.0) * profile.perspective,
    );
    let span = (profile.steps.max(2) - 1) as f32;
    let vstep = ((v1.0 - v0.0) / span, (v1.1 - v0.1) / span);
    let dstep = setup.dstep;
    let dstart = 0.5 + profile.compression / 2.0;

    let mut conf_sum = 0.0f32;
    let mut pos_sum = (0.0f32, 0.0f32);
    let mut col_sum = [0.0f32; 4];
    let mut j = 0.0f32;

    for i in 0..profile.steps {
        let dpos = dstart - j * dstep;
        if !(dpos >= setup.cutoff && conf_sum < profile.confidence_max) {
            break;
        }
        let vpos = (pos.0 + v1.0 - j * vstep.0, pos.1 + v1.1 - j * vstep.1);
        let depth = (1.0 - sample_depth(depth_map, vpos.0, vpos.1)).clamp(setup.dmin, setup.dmax);
        let conf = confidence(profile.method, dpos, depth, setup);

        if conf > 0.0 {
            let t = (depth - dpos) / dstep;
            let corrected = (vpos.0 + t * vstep.0, vpos.1 + t * vstep.1);
            match profile.accumulation {
                Accumulation::Position => {
                    pos_sum.0 += corrected.0 * conf;
                    pos_sum.1 += corrected.1 * conf;
                }
                Accumulation::Color => {
                    let px = sample_rgba(image, corrected.0, corrected.1);
                    for c in 0..4 {
                        col_sum[c] += px[c] * conf;
                    }
                }
            }
            conf_sum += conf;
        }

        j = next_step(profile.antialias, conf, i as f32, j);
    }

    if conf_sum <= 0.0 {
        return sample_rgba(image, pos.0, pos.1);
    }
    match profile.accumulation {
        Accumulation::Position => {
            sample_rgba(image, pos_sum.0 / conf_sum, pos_sum.1 / conf_sum)
        }
        Accumulation::Color => [
            col_sum[0] / conf_sum,
            col_sum[1] / conf_sum,
            col_sum[2] / conf_sum,
            col_sum[3] / conf_sum,
        ],
    }
}

pub fn render(
    image: &RgbaImage,
    depth: &GrayImage,
    params: &KernelParams,
    profile: &PerspectiveProfile,
) -> RgbaImage {
    let w = image.width() as usize;
    let h = image.height() as usize;
    let mut out = RgbaImage::new(w as u32, h as u32);
    if w == 0 || h == 0 {
        return out;
    }
    let setup = SearchSetup::new(params, profile, w as u32, h as u32);

    let buf: &mut [u8] = &mut out;
    buf.par_chunks_mut(w * 4).enumerate().for_each(|(y, row_out)| {
        for x in 0..w {
            let (u, v) = pixel_uv(x, y, w, h);
            let px = search_pixel(image, depth, u, v, profile, &setup);
            let pi = x * 4;
            row_out[pi..pi + 4].copy_from_slice(&to_u8(px));
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec2;
    use image::{Luma, Rgba};

    /// Horizontal sawtooth, 8 levels per pixel.
    fn sawtooth(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([((x * 8) % 256) as u8, (y * 3) as u8, 90, 255]))
    }

    /// Left half on the focal plane, right half fully near.
    fn split_depth(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| if x < w / 2 { Luma([128]) } else { Luma([255]) })
    }

    fn base_frame(image: &RgbaImage, enlarge: f32) -> RgbaImage {
        let (w, h) = (image.width() as usize, image.height() as usize);
        RgbaImage::from_fn(image.width(), image.height(), |x, y| {
            let (u, v) = pixel_uv(x as usize, y as usize, w, h);
            let (bu, bv) = base_position(u, v, enlarge);
            Rgba(to_u8(sample_rgba(image, bu, bv)))
        })
    }

    fn max_channel_diff(a: &RgbaImage, b: &RgbaImage) -> u8 {
        a.pixels()
            .zip(b.pixels())
            .flat_map(|(p, q)| (0..4).map(move |c| p[c].abs_diff(q[c])))
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn zero_offset_is_the_base_sample() {
        let image = sawtooth(40, 24);
        let depth = split_depth(40, 24);
        for level in 2..=5 {
            let profile = PerspectiveProfile::for_level(level).unwrap();
            for enlarge in [1.0, 1.06] {
                let params = KernelParams { scale: 0.04, offset: Vec2::ZERO, focus: 0.5, enlarge };
                let out = render(&image, &depth, &params, &profile);
                assert!(
                    max_channel_diff(&out, &base_frame(&image, enlarge)) <= 1,
                    "level {} enlarge {}",
                    level,
                    enlarge
                );
            }
        }
    }

    #[test]
    fn zero_offset_with_enlarge_one_is_identity() {
        let image = sawtooth(16, 16);
        let depth = split_depth(16, 16);
        let profile = PerspectiveProfile::for_level(3).unwrap();
        let params = KernelParams { scale: 0.04, offset: Vec2::ZERO, focus: 0.5, enlarge: 1.0 };
        let out = render(&image, &depth, &params, &profile);
        assert!(max_channel_diff(&out, &image) <= 1);
    }

    #[test]
    fn only_off_focus_regions_move() {
        let (w, h) = (80, 60);
        let image = sawtooth(w, h);
        let depth = split_depth(w, h);
        let profile = PerspectiveProfile::for_level(3).unwrap();
        let params = KernelParams {
            scale: 0.02,
            offset: Vec2::new(1.0, 0.0),
            focus: 0.5,
            enlarge: 1.0,
        };
        let out = render(&image, &depth, &params, &profile);
        let still = base_frame(&image, 1.0);

        // Well inside the focal-plane half nothing moves.
        for y in 0..h {
            for x in 4..(w / 2 - 8) {
                let a = out.get_pixel(x, y)[0];
                let b = still.get_pixel(x, y)[0];
                assert!(a.abs_diff(b) <= 1, "flat region moved at ({}, {})", x, y);
            }
        }

        // The near half is sampled from lower x, so the ramp reads lower.
        let mut lower = 0;
        let mut total = 0;
        for y in 0..h {
            for x in (w / 2 + 4)..(w - 4) {
                let a = out.get_pixel(x, y)[0];
                let b = still.get_pixel(x, y)[0];
                if b >= 8 {
                    total += 1;
                    if a < b {
                        lower += 1;
                    }
                }
            }
        }
        assert!(lower * 2 > total, "{} of {} near pixels shifted", lower, total);
    }

    #[test]
    fn more_steps_move_edges_by_at_most_one_step() {
        let (w, h) = (64, 64);
        let image = RgbaImage::from_fn(w, h, |x, _| Rgba([(x * 4) as u8, 0, 0, 255]));
        let depth = split_depth(w, h);
        let params = KernelParams {
            scale: 0.04,
            offset: Vec2::new(1.0, 0.0),
            focus: 0.5,
            enlarge: 1.0,
        };
        let coarse = PerspectiveProfile { antialias: Antialias::None, ..PerspectiveProfile::reference() };
        let fine = PerspectiveProfile { steps: 40, ..coarse };
        let a = render(&image, &depth, &params, &coarse);
        let b = render(&image, &depth, &params, &fine);

        // One coarse step of the search vector, in pixels, as ramp levels.
        let setup = SearchSetup::new(&params, &coarse, w, h);
        let step_px = (setup.v1.0 - setup.v0.0).abs() / (coarse.steps - 1) as f32 * w as f32;
        let tolerance = ((step_px + 1.0) * 4.0).ceil() as u8;
        for x in 0..w {
            let d = a.get_pixel(x, 32)[0].abs_diff(b.get_pixel(x, 32)[0]);
            assert!(d <= tolerance, "column {} differs by {} (> {})", x, d, tolerance);
        }
    }

    #[test]
    fn antialiasing_steps_back_half_a_step_on_confident_hits() {
        assert_eq!(next_step(Antialias::None, 1.0, 0.0, 0.0), 1.0);
        assert_eq!(next_step(Antialias::Branched, 1.0, 2.0, 2.0), 1.5);
        // Branched only refines once per step: off the integer track it advances.
        assert_eq!(next_step(Antialias::Branched, 1.0, 3.0, 1.5), 2.5);
        assert_eq!(next_step(Antialias::Branched, AA_TRIGGER, 2.0, 2.0), 3.0);
        assert_eq!(next_step(Antialias::Stepped, AA_TRIGGER, 2.0, 2.0), 1.5);
        assert_eq!(next_step(Antialias::Stepped, 1.0, 3.0, 1.5), 2.5);
        assert_eq!(next_step(Antialias::Stepped, 0.5, 2.0, 2.0), 3.0);
    }

    #[test]
    fn far_background_is_accepted_on_the_first_step() {
        let (w, h) = (32, 8);
        let image = sawtooth(w, h);
        let depth = GrayImage::from_pixel(w, h, Luma([0]));
        let profile = PerspectiveProfile { antialias: Antialias::None, ..PerspectiveProfile::reference() };
        let params = KernelParams { scale: 0.2, offset: Vec2::new(1.0, 0.0), focus: 0.5, enlarge: 1.0 };
        let out = render(&image, &depth, &params, &profile);

        // Every accepted step corrects back to the far end, pos + v1.
        let setup = SearchSetup::new(&params, &profile, w, h);
        assert!(setup.v1.0 * w as f32 > 1.0);
        let far_end = RgbaImage::from_fn(w, h, |x, y| {
            let (u, v) = pixel_uv(x as usize, y as usize, w as usize, h as usize);
            Rgba(to_u8(sample_rgba(&image, u + setup.v1.0, v + setup.v1.1)))
        });
        assert!(max_channel_diff(&out, &far_end) <= 1);
        assert!(max_channel_diff(&out, &image) >= 8);
    }

    #[test]
    fn alternative_confidence_methods_stay_on_the_image() {
        let image = sawtooth(24, 24);
        let depth = split_depth(24, 24);
        let params = KernelParams { scale: 0.04, offset: Vec2::new(0.5, 0.5), focus: 0.5, enlarge: 1.06 };
        for method in [ConfidenceMethod::Linear, ConfidenceMethod::Power] {
            let profile = PerspectiveProfile { method, ..PerspectiveProfile::reference() };
            let out = render(&image, &depth, &params, &profile);
            assert_eq!(out.dimensions(), image.dimensions());
            assert!(out.pixels().all(|p| p[3] == 255));
            assert!(out.pixels().all(|p| p[2] == 90));
        }
    }
}
