// ============================================================================
// SAMPLER - clamp-to-edge bilinear lookups in normalised texture space
// ============================================================================

use image::{GrayImage, RgbaImage};

/// Centre of pixel (x, y) in normalised coordinates.
#[inline]
pub fn pixel_uv(x: usize, y: usize, width: usize, height: usize) -> (f32, f32) {
    (
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    )
}

/// Pixel-space coordinate pulled into `[-1, len]`. Lookups past either edge
/// already read the edge texel, so this keeps `floor() as i32 + 1` in range.
#[inline]
fn edge_clamped(f: f32, len: u32) -> f32 {
    f.clamp(-1.0, len as f32)
}

#[inline]
fn clamped(img: &RgbaImage, x: i32, y: i32) -> [f32; 4] {
    let cx = x.clamp(0, img.width() as i32 - 1) as u32;
    let cy = y.clamp(0, img.height() as i32 - 1) as u32;
    let p = img.get_pixel(cx, cy);
    [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
}

/// Bilinear RGBA sample at normalised (u, v). Channels in 0..=255.
#[inline]
pub fn sample_rgba(img: &RgbaImage, u: f32, v: f32) -> [f32; 4] {
    if img.width() == 0 || img.height() == 0 {
        return [0.0; 4];
    }
    let fx = edge_clamped(u * img.width() as f32 - 0.5, img.width());
    let fy = edge_clamped(v * img.height() as f32 - 0.5, img.height());
    let x0 = fx.floor() as i32;
    let y0 = fy.floor() as i32;
    let dx = fx - x0 as f32;
    let dy = fy - y0 as f32;

    let p00 = clamped(img, x0, y0);
    let p10 = clamped(img, x0 + 1, y0);
    let p01 = clamped(img, x0, y0 + 1);
    let p11 = clamped(img, x0 + 1, y0 + 1);

    let mut out = [0.0f32; 4];
    for c in 0..4 {
        out[c] = p00[c] * (1.0 - dx) * (1.0 - dy)
            + p10[c] * dx * (1.0 - dy)
            + p01[c] * (1.0 - dx) * dy
            + p11[c] * dx * dy;
    }
    out
}

/// Bilinear depth sample at normalised (u, v), in 0..=1 (1 = near).
#[inline]
pub fn sample_depth(depth: &GrayImage, u: f32, v: f32) -> f32 {
    let (w, h) = (depth.width() as i32, depth.height() as i32);
    if w == 0 || h == 0 {
        return 0.0;
    }
    let fx = edge_clamped(u * w as f32 - 0.5, w as u32);
    let fy = edge_clamped(v * h as f32 - 0.5, h as u32);
    let x0 = fx.floor() as i32;
    let y0 = fy.floor() as i32;
    let dx = fx - x0 as f32;
    let dy = fy - y0 as f32;
    let at = |x: i32, y: i32| -> f32 {
        depth.get_pixel(x.clamp(0, w - 1) as u32, y.clamp(0, h - 1) as u32)[0] as f32
    };
    let top = at(x0, y0) * (1.0 - dx) + at(x0 + 1, y0) * dx;
    let bottom = at(x0, y0 + 1) * (1.0 - dx) + at(x0 + 1, y0 + 1) * dx;
    (top * (1.0 - dy) + bottom * dy) / 255.0
}

#[inline]
pub fn to_u8(px: [f32; 4]) -> [u8; 4] {
    [
        px[0].round().clamp(0.0, 255.0) as u8,
        px[1].round().clamp(0.0, 255.0) as u8,
        px[2].round().clamp(0.0, 255.0) as u8,
        px[3].round().clamp(0.0, 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    #[test]
    fn pixel_centres_sample_exactly() {
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(1, 1, Rgba([10, 20, 30, 255]));
        let (u, v) = pixel_uv(1, 1, 3, 2);
        assert_eq!(to_u8(sample_rgba(&img, u, v)), [10, 20, 30, 255]);
    }

    #[test]
    fn outside_coordinates_clamp_to_edge() {
        let mut depth = GrayImage::new(2, 1);
        depth.put_pixel(0, 0, Luma([0]));
        depth.put_pixel(1, 0, Luma([255]));
        assert_eq!(sample_depth(&depth, -3.0, 0.5), 0.0);
        assert_eq!(sample_depth(&depth, 4.0, 0.5), 1.0);
        assert!((sample_depth(&depth, 0.5, 0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn extreme_coordinates_read_the_edge() {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(1, 0, Rgba([200, 0, 0, 255]));
        img.put_pixel(0, 1, Rgba([0, 100, 0, 255]));
        assert_eq!(to_u8(sample_rgba(&img, 1e12, 0.0)), [200, 0, 0, 255]);
        assert_eq!(to_u8(sample_rgba(&img, -1e12, f32::MAX)), [0, 100, 0, 255]);
        assert_eq!(to_u8(sample_rgba(&img, f32::INFINITY, f32::NEG_INFINITY)), [200, 0, 0, 255]);

        let mut depth = GrayImage::new(2, 1);
        depth.put_pixel(1, 0, Luma([255]));
        assert_eq!(sample_depth(&depth, 3e9, 0.5), 1.0);
        assert_eq!(sample_depth(&depth, -3e9, -3e9), 0.0);
    }
}
