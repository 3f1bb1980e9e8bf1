// ============================================================================
// RENDER STAGE - viewport sizing, render targets and the kernel cache
// ============================================================================
//
// Both targets are the source cover-fitted into the viewport and centred, so
// pixel (x, y) of the image target and of the depth target always describe
// the same point of the scene.

use std::collections::HashMap;

use image::{GrayImage, Luma, RgbaImage};
use rayon::prelude::*;

use crate::geometry::{PixelSize, SizeF, size_fit_scale};
use crate::kernel::sampler::sample_rgba;
use crate::options::{Fit, ViewerOptions};

/// Stage rebuilds an unused cache entry survives.
pub const KERNEL_CACHE_KEEP: u64 = 4;

/// Render size in device pixels plus the logical size it is displayed at.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub size: PixelSize,
    pub css: SizeF,
}

/// Derive the viewport from the container and the sizing options.
///
/// `natural` is the image size when known. The device size never stretches the
/// image by more than `options.upscale`; the logical size is unaffected.
pub fn compute_viewport(
    options: &ViewerOptions,
    container: SizeF,
    pixel_ratio: f32,
    natural: Option<PixelSize>,
) -> Viewport {
    let base = options.size.unwrap_or(container);
    if base.is_empty() {
        return Viewport { size: PixelSize::default(), css: base };
    }

    let css = match (options.fit, natural) {
        (Fit::Contain, Some(img)) if !img.is_empty() => {
            img.to_f32().scaled(size_fit_scale(img.to_f32(), base, false))
        }
        _ => base,
    };

    let mut device = css;
    if options.fit != Fit::Off {
        if options.retina && pixel_ratio > 1.0 {
            device = device.scaled(pixel_ratio);
        }
        if let Some(img) = natural.filter(|n| !n.is_empty()) {
            let stretch = size_fit_scale(img.to_f32(), device, true);
            if stretch > options.upscale {
                device = device.scaled(options.upscale / stretch);
            }
        }
    }

    let mut size = device.round();
    let div = options.size_divisible.max(1);
    size.width = size.width / div * div;
    size.height = size.height / div * div;
    Viewport { size, css }
}

/// Cover-fit `src` into a `size` frame, centred, bilinear.
pub fn fit_cover(src: &RgbaImage, size: PixelSize) -> RgbaImage {
    let (w, h) = (size.width as usize, size.height as usize);
    let mut out = RgbaImage::new(size.width, size.height);
    if w == 0 || h == 0 || src.width() == 0 || src.height() == 0 {
        return out;
    }
    if src.dimensions() == (size.width, size.height) {
        return src.clone();
    }

    let sw = src.width() as f32;
    let sh = src.height() as f32;
    let scale = size_fit_scale(SizeF::new(sw, sh), size.to_f32(), true);
    let (half_w, half_h) = (w as f32 / 2.0, h as f32 / 2.0);

    let buf: &mut [u8] = &mut out;
    buf.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let sx = (x as f32 + 0.5 - half_w) / scale + sw / 2.0;
            let sy = (y as f32 + 0.5 - half_h) / scale + sh / 2.0;
            let px = sample_rgba(src, sx / sw, sy / sh);
            let pi = x * 4;
            for c in 0..4 {
                row[pi + c] = px[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    out
}

/// Single-channel depth from an RGBA source: BT.709 luminance, or inverted
/// alpha when the depth is carried in the alpha channel.
pub fn extract_depth(src: &RgbaImage, use_alpha: bool) -> GrayImage {
    let mut out = GrayImage::new(src.width(), src.height());
    for (o, p) in out.pixels_mut().zip(src.pixels()) {
        let v = if use_alpha {
            255 - p[3]
        } else {
            let l = 0.2126 * p[0] as f32 + 0.7152 * p[1] as f32 + 0.0722 * p[2] as f32;
            l.round().clamp(0.0, 255.0) as u8
        };
        *o = Luma([v]);
    }
    out
}

/// Build the viewport depth target: cover fit, extract, blur.
pub fn depth_target(src: &RgbaImage, size: PixelSize, use_alpha: bool, blur_size: f32) -> GrayImage {
    let fitted = fit_cover(src, size);
    let depth = extract_depth(&fitted, use_alpha);
    gaussian_blur(&depth, blur_size / 2.0)
}

/// Widest blur tap distance, in pixels.
const MAX_BLUR_RADIUS: usize = 1024;

/// 1-D Gaussian kernel truncated at ceil(3*sigma), at most `MAX_BLUR_RADIUS`.
fn build_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = ((sigma * 3.0).ceil().max(0.0) as usize).min(MAX_BLUR_RADIUS);
    if radius == 0 {
        return vec![1.0];
    }
    let len = radius * 2 + 1;
    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..len)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / s2).exp()
        })
        .collect();
    let inv = 1.0 / kernel.iter().sum::<f32>();
    for v in &mut kernel {
        *v *= inv;
    }
    kernel
}

/// Separable Gaussian blur on a greyscale image, parallel by row.
pub fn gaussian_blur(src: &GrayImage, sigma: f32) -> GrayImage {
    let w = src.width() as usize;
    let h = src.height() as usize;
    if w == 0 || h == 0 || sigma.is_nan() || sigma <= 0.0 {
        return src.clone();
    }

    let kernel = build_gaussian_kernel(sigma);
    let radius = kernel.len() / 2;
    if radius == 0 {
        return src.clone();
    }
    let src_raw = src.as_raw();

    let mut buf_h = vec![0.0f32; w * h];
    buf_h.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
        let row_in = &src_raw[y * w..(y + 1) * w];
        for (x, out) in row_out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = (x as isize + ki as isize - radius as isize).clamp(0, w as isize - 1) as usize;
                acc += row_in[sx] as f32 * kv;
            }
            *out = acc;
        }
    });

    let mut out = GrayImage::new(w as u32, h as u32);
    let dst: &mut [u8] = &mut out;
    dst.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
        for (x, out) in row_out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = (y as isize + ki as isize - radius as isize).clamp(0, h as isize - 1) as usize;
                acc += buf_h[sy * w + x] * kv;
            }
            *out = acc.round().clamp(0.0, 255.0) as u8;
        }
    });
    out
}

/// Cover-fit `src` and force every alpha to opaque.
pub fn fit_cover_opaque(src: &RgbaImage, size: PixelSize) -> RgbaImage {
    let mut out = fit_cover(src, size);
    for p in out.pixels_mut() {
        p[3] = 255;
    }
    out
}

// ---------------------------------------------------------------------------
//  Kernel cache
// ---------------------------------------------------------------------------

struct CacheEntry<T> {
    value: T,
    last_used: u64,
}

/// Built kernels keyed by quality level.
///
/// Each `acquire` is one stage rebuild. Entries not acquired during the last
/// `KERNEL_CACHE_KEEP` rebuilds are dropped.
pub struct KernelCache<T> {
    entries: HashMap<u8, CacheEntry<T>>,
    generation: u64,
}

impl<T> KernelCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            generation: 0,
        }
    }

    pub fn acquire(&mut self, level: u8, build: impl FnOnce(u8) -> T) -> &T {
        self.generation += 1;
        let generation = self.generation;
        self.entries.retain(|key, entry| {
            *key == level || generation - entry.last_used < KERNEL_CACHE_KEEP
        });
        let entry = self.entries.entry(level).or_insert_with(|| {
            log::debug!("[Stage] building kernel for quality {}", level);
            CacheEntry { value: build(level), last_used: generation }
        });
        entry.last_used = generation;
        &entry.value
    }

    pub fn contains(&self, level: u8) -> bool {
        self.entries.contains_key(&level)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for KernelCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
