// ============================================================================
// DISPLACEMENT KERNEL - single-tap depth offset (quality level 1)
// ============================================================================

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;

use super::sampler::{pixel_uv, sample_depth, sample_rgba, to_u8};
use super::{KernelParams, aspect_scale};

/// Shift every pixel along `offset` by its distance from the focal plane.
pub fn render(image: &RgbaImage, depth: &GrayImage, params: &KernelParams) -> RgbaImage {
    let w = image.width() as usize;
    let h = image.height() as usize;
    let mut out = RgbaImage::new(w as u32, h as u32);
    if w == 0 || h == 0 {
        return out;
    }

    let (sx, sy) = aspect_scale(params.scale, w as u32, h as u32);
    let (ox, oy) = (params.offset.x * sx, params.offset.y * sy);
    let focus = params.focus;
    let stride = w * 4;

    let buf: &mut [u8] = &mut out;
    buf.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        for x in 0..w {
            let (u, v) = pixel_uv(x, y, w, h);
            let map = focus - sample_depth(depth, u, v);
            let px = sample_rgba(image, u + ox * map, v + oy * map);
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

    fn ramp(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, _| Rgba([(x * 8) as u8, 0, 0, 255]))
    }

    #[test]
    fn focal_plane_pixels_do_not_move() {
        let img = ramp(16, 4);
        let depth = GrayImage::from_pixel(16, 4, Luma([128]));
        let params = KernelParams {
            scale: 0.5,
            offset: Vec2::new(1.0, 0.0),
            focus: 128.0 / 255.0,
            enlarge: 1.0,
        };
        assert_eq!(render(&img, &depth, &params), img);
    }

    #[test]
    fn near_pixels_move_against_the_offset() {
        let img = ramp(32, 32);
        // Everything at the near plane, focus on the far plane: map = -1.
        let depth = GrayImage::from_pixel(32, 32, Luma([255]));
        let params = KernelParams {
            scale: 0.125,
            offset: Vec2::new(1.0, 0.0),
            focus: 0.0,
            enlarge: 1.0,
        };
        let out = render(&img, &depth, &params);
        // 0.125 of 32 px = 4 px shift towards lower x.
        assert_eq!(out.get_pixel(10, 0)[0], img.get_pixel(6, 0)[0]);
    }
}
