// ============================================================================
// EXPORT - off-screen stills, anaglyph, image+depth PNG, thumbnails, writers
// ============================================================================
//
// Every export renders from the decoded sources into fresh buffers of the
// requested size. The live targets, flags and quality window are untouched.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder, Rgba, RgbaImage};

use crate::animation::animation_offset;
use crate::error::{Result, Slot, ViewerError};
use crate::geometry::{PixelSize, SizeF, Vec2, size_fit};
use crate::kernel::{KernelParams, KernelVariant, apply_depth_preview};
use crate::options::{QUALITY_HIGHEST, ViewerOptions};
use crate::stage;
use crate::viewer::Viewer;

pub const DEFAULT_THUMBNAIL: PixelSize = PixelSize::new(50, 50);
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const LEFT_EYE: Vec2 = Vec2::new(-1.0, 0.5);
const RIGHT_EYE: Vec2 = Vec2::new(1.0, 0.5);

/// `natural` shrunk to fit a `max` x `max` box. Never enlarges.
pub fn export_size(natural: PixelSize, max: Option<u32>) -> PixelSize {
    match max {
        Some(m) if m > 0 => size_fit(natural.to_f32(), SizeF::new(m as f32, m as f32), false).round(),
        _ => natural,
    }
}

impl Viewer {
    /// Composite one frame at `size` with `overrides` laid over the live
    /// options. The offset is the current target, or the animation position
    /// when animating.
    pub fn render_still(&mut self, size: PixelSize, overrides: &serde_json::Value) -> Result<RgbaImage> {
        let opts = self.options().merged(overrides)?;
        let offset = if opts.animate {
            animation_offset(&opts, self.clock())
        } else {
            self.offset()
        };
        self.compose_still(&opts, size, offset)
    }

    fn compose_still(&mut self, opts: &ViewerOptions, size: PixelSize, offset: Vec2) -> Result<RgbaImage> {
        let (image_src, depth_src) = self.export_sources()?;
        if size.is_empty() {
            return Ok(RgbaImage::new(size.width, size.height));
        }
        let image = stage::fit_cover(&image_src, size);
        let Some(depth_src) = depth_src else {
            return Ok(image);
        };
        let depth = stage::depth_target(&depth_src, size, self.depth_uses_alpha(), opts.depth_blur_size);

        let level = opts.quality.unwrap_or_else(|| self.quality());
        let variant = KernelVariant::for_quality(Some(level));
        let params = KernelParams {
            scale: opts.kernel_scale(),
            offset,
            focus: opts.depth_focus,
            enlarge: opts.enlarge,
        };
        let mut frame = self.renderer_mut()?.composite(&variant, &image, &depth, &params);
        apply_depth_preview(&mut frame, &depth, opts.depth_preview);
        Ok(frame)
    }

    fn export_natural(&self) -> Result<PixelSize> {
        self.natural_size(Slot::Image).ok_or(ViewerError::NotReady)
    }

    /// Red/cyan anaglyph: left eye in red, right eye in green and blue, both
    /// rendered at the highest quality without preview or animation.
    pub fn export_anaglyph(&mut self, max_size: Option<u32>) -> Result<RgbaImage> {
        self.export_sources()?;
        let size = export_size(self.export_natural()?, max_size);
        let opts = ViewerOptions {
            animate: false,
            depth_preview: 0.0,
            quality: Some(QUALITY_HIGHEST),
            ..self.options().clone()
        };

        let left = self.compose_still(&opts, size, LEFT_EYE)?;
        let right = self.compose_still(&opts, size, RIGHT_EYE)?;
        let mut out = RgbaImage::new(size.width, size.height);
        for ((o, l), r) in out.pixels_mut().zip(left.pixels()).zip(right.pixels()) {
            *o = Rgba([l[0], r[1], r[2], l[3].saturating_add(r[3])]);
        }
        log::info!("[Stage] anaglyph {}x{}", size.width, size.height);
        Ok(out)
    }

    /// Image with the depth map packed into alpha (255 - depth). `None` when
    /// no depth map is assigned.
    pub fn export_depth_png(&mut self, max_size: Option<u32>) -> Result<Option<RgbaImage>> {
        let (image_src, depth_src) = self.export_sources()?;
        let Some(depth_src) = depth_src else {
            return Ok(None);
        };
        let size = export_size(self.export_natural()?, max_size);
        let mut out = stage::fit_cover(&image_src, size);
        let depth = stage::extract_depth(&stage::fit_cover(&depth_src, size), self.depth_uses_alpha());
        for (o, d) in out.pixels_mut().zip(depth.pixels()) {
            o[3] = 255 - d[0];
        }
        Ok(Some(out))
    }

    /// The depth map as an opaque grey image at image resolution. Plain white
    /// (everything on the far plane) without a depth map.
    pub fn export_depthmap(&mut self, max_size: Option<u32>) -> Result<RgbaImage> {
        let (_, depth_src) = self.export_sources()?;
        let size = export_size(self.export_natural()?, max_size);
        let Some(depth_src) = depth_src else {
            return Ok(RgbaImage::from_pixel(size.width, size.height, Rgba([255, 255, 255, 255])));
        };
        let depth = stage::extract_depth(&stage::fit_cover(&depth_src, size), self.depth_uses_alpha());
        let mut out = RgbaImage::new(size.width, size.height);
        for (o, d) in out.pixels_mut().zip(depth.pixels()) {
            *o = Rgba([d[0], d[0], d[0], 255]);
        }
        Ok(out)
    }

    /// Cover-fitted opaque thumbnail, 50x50 unless a size is given.
    pub fn export_thumbnail(&mut self, size: Option<PixelSize>) -> Result<RgbaImage> {
        let (image_src, _) = self.export_sources()?;
        Ok(stage::fit_cover_opaque(&image_src, size.unwrap_or(DEFAULT_THUMBNAIL)))
    }
}

fn io_error(path: &Path, e: impl std::fmt::Display) -> ViewerError {
    ViewerError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Write `image` to `path`. The format follows the extension; JPEG drops alpha.
pub fn save_image(image: &RgbaImage, path: &Path, jpeg_quality: u8) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    match ext.as_str() {
        "png" | "" => {
            let file = File::create(path).map_err(|e| io_error(path, e))?;
            let mut writer = BufWriter::new(file);
            PngEncoder::new(&mut writer).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        "jpg" | "jpeg" => {
            let file = File::create(path).map_err(|e| io_error(path, e))?;
            let mut writer = BufWriter::new(file);
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, jpeg_quality.clamp(1, 100));
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
        }
        _ => {
            image.save(path)?;
        }
    }
    log::info!("[Stage] wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceSource;

    fn viewer_with(image: RgbaImage, depth: Option<RgbaImage>) -> Viewer {
        let mut viewer = Viewer::new(ViewerOptions { animate: false, ..Default::default() });
        viewer.set_image(ResourceSource::pixels(image));
        if let Some(depth) = depth {
            viewer.set_depthmap(ResourceSource::pixels(depth), false);
        }
        viewer
    }

    fn grey(w: u32, h: u32, v: u8) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255]))
    }

    #[test]
    fn export_size_only_shrinks() {
        assert_eq!(export_size(PixelSize::new(800, 600), Some(400)), PixelSize::new(400, 300));
        assert_eq!(export_size(PixelSize::new(80, 60), Some(400)), PixelSize::new(80, 60));
        assert_eq!(export_size(PixelSize::new(80, 60), None), PixelSize::new(80, 60));
    }

    #[test]
    fn exports_fail_without_image() {
        let mut viewer = Viewer::new(ViewerOptions::default());
        assert!(matches!(viewer.export_thumbnail(None), Err(ViewerError::NoImage)));
        assert!(matches!(
            viewer.render_still(PixelSize::new(4, 4), &serde_json::json!({})),
            Err(ViewerError::NoImage)
        ));
    }

    #[test]
    fn thumbnail_is_opaque_and_default_sized() {
        let mut img = grey(120, 80, 40);
        img.put_pixel(60, 40, Rgba([40, 40, 40, 0]));
        let mut viewer = viewer_with(img, None);
        let thumb = viewer.export_thumbnail(None).unwrap();
        assert_eq!(thumb.dimensions(), (50, 50));
        assert!(thumb.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn depth_png_packs_inverted_depth_into_alpha() {
        let mut viewer = viewer_with(grey(40, 20, 90), Some(grey(40, 20, 200)));
        let out = viewer.export_depth_png(None).unwrap().unwrap();
        assert_eq!(out.dimensions(), (40, 20));
        assert!(out.pixels().all(|p| p[0] == 90 && p[3] == 55));

        let mut flat = viewer_with(grey(40, 20, 90), None);
        assert!(flat.export_depth_png(None).unwrap().is_none());
    }

    #[test]
    fn depthmap_is_white_without_depth() {
        let mut viewer = viewer_with(grey(30, 30, 10), None);
        let map = viewer.export_depthmap(Some(10)).unwrap();
        assert_eq!(map.dimensions(), (10, 10));
        assert!(map.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
    }

    #[test]
    fn depthmap_from_alpha_is_inverted() {
        let mut viewer = Viewer::new(ViewerOptions::default());
        viewer.set_image(ResourceSource::pixels(grey(16, 16, 0)));
        viewer.set_depthmap(
            ResourceSource::pixels(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 55]))),
            true,
        );
        let map = viewer.export_depthmap(None).unwrap();
        assert!(map.pixels().all(|p| p[0] == 200 && p[3] == 255));
    }

    #[test]
    fn anaglyph_takes_red_from_the_left_eye_and_cyan_from_the_right() {
        let (w, h) = (64, 32);
        let ramp = RgbaImage::from_fn(w, h, |x, _| {
            let v = (x * 4) as u8;
            Rgba([v, v, v, 255])
        });
        let depth = RgbaImage::from_fn(w, h, |x, _| {
            let v = if x < w / 2 { 128 } else { 255 };
            Rgba([v, v, v, 255])
        });
        let mut viewer = viewer_with(ramp, Some(depth));

        let eye = serde_json::json!({ "quality": 5, "animate": false, "depthPreview": 0.0 });
        viewer.set_offset(LEFT_EYE);
        let left = viewer.render_still(PixelSize::new(w, h), &eye).unwrap();
        viewer.set_offset(RIGHT_EYE);
        let right = viewer.render_still(PixelSize::new(w, h), &eye).unwrap();
        assert!(
            left.pixels().zip(right.pixels()).any(|(l, r)| l[0] != r[0]),
            "the eyes should see different pixels"
        );

        let out = viewer.export_anaglyph(None).unwrap();
        assert_eq!(out.dimensions(), (w, h));
        for ((o, l), r) in out.pixels().zip(left.pixels()).zip(right.pixels()) {
            assert_eq!(o[0], l[0]);
            assert_eq!((o[1], o[2]), (r[1], r[2]));
            assert_eq!(o[3], 255);
        }
    }

    #[test]
    fn still_render_leaves_live_state_alone() {
        let mut viewer = viewer_with(grey(32, 32, 60), Some(grey(32, 32, 30)));
        viewer.set_container(SizeF::new(32.0, 32.0), 1.0);
        viewer.tick(0.0);
        let level = viewer.quality();
        let before = viewer.frame().cloned();

        let still = viewer
            .render_still(PixelSize::new(64, 48), &serde_json::json!({ "quality": 2 }))
            .unwrap();
        assert_eq!(still.dimensions(), (64, 48));
        assert_eq!(viewer.quality(), level);
        assert_eq!(viewer.options().quality, None);
        assert_eq!(viewer.frame().cloned(), before);
        assert_eq!(viewer.viewport().size, PixelSize::new(32, 32));
    }

    #[test]
    fn saves_png_and_jpeg() {
        let dir = std::env::temp_dir().join(format!("depthview-export-{}", std::process::id()));
        let img = grey(8, 8, 128);
        let png = dir.join("out.png");
        let jpg = dir.join("out.jpg");
        save_image(&img, &png, DEFAULT_JPEG_QUALITY).unwrap();
        save_image(&img, &jpg, DEFAULT_JPEG_QUALITY).unwrap();
        let back = image::open(&png).unwrap().to_rgba8();
        assert_eq!(back, img);
        let luma = image::open(&jpg).unwrap().to_luma8().get_pixel(4, 4)[0];
        assert!((luma as i32 - 128).abs() <= 2);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
