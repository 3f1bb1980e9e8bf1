// ============================================================================
// TARGET TEXTURES - upload of render targets and readback of the composite
// ============================================================================

use image::{GrayImage, RgbaImage};

use super::GpuError;
use super::context::GpuContext;
use super::pool::TexturePool;

/// A GPU copy of one render target.
pub struct TargetTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl TargetTexture {
    fn create(
        ctx: &GpuContext,
        pool: &mut TexturePool,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        label: &str,
    ) -> Self {
        let texture = pool
            .acquire(width, height, format)
            .filter(|t| t.usage().contains(usage))
            .unwrap_or_else(|| {
                ctx.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage,
                    view_formats: &[],
                })
            });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view, width, height }
    }

    fn write(&self, ctx: &GpuContext, data: &[u8], bytes_per_pixel: u32) {
        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_pixel * self.width),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 },
        );
    }

    /// Upload the image target.
    pub fn upload_rgba(ctx: &GpuContext, pool: &mut TexturePool, img: &RgbaImage) -> Result<Self, GpuError> {
        let (w, h) = img.dimensions();
        if !ctx.supports_size(w, h) {
            return Err(GpuError::TooLarge(w, h));
        }
        let tex = Self::create(
            ctx,
            pool,
            w,
            h,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            "image_target",
        );
        tex.write(ctx, img.as_raw(), 4);
        Ok(tex)
    }

    /// Upload the depth target as a single-channel texture.
    pub fn upload_depth(ctx: &GpuContext, pool: &mut TexturePool, depth: &GrayImage) -> Result<Self, GpuError> {
        let (w, h) = depth.dimensions();
        if !ctx.supports_size(w, h) {
            return Err(GpuError::TooLarge(w, h));
        }
        let tex = Self::create(
            ctx,
            pool,
            w,
            h,
            wgpu::TextureFormat::R8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            "depth_target",
        );
        tex.write(ctx, depth.as_raw(), 1);
        Ok(tex)
    }

    /// Storage texture the kernels write the composite into.
    pub fn output(ctx: &GpuContext, pool: &mut TexturePool, width: u32, height: u32) -> Self {
        Self::create(
            ctx,
            pool,
            width,
            height,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            "composite_output",
        )
    }

    pub fn recycle(self, pool: &mut TexturePool) {
        pool.release(self.texture);
    }
}

/// `bytes_per_row` for a buffer copy, padded to the 256-byte alignment wgpu requires.
pub(crate) fn aligned_bytes_per_row(width: u32) -> u32 {
    let unaligned = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unaligned.div_ceil(align) * align
}

/// Copy an RGBA texture back to the CPU, stripping row padding.
pub fn readback_rgba(
    ctx: &GpuContext,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    cached_staging: &mut Option<(wgpu::Buffer, u64)>,
) -> Result<RgbaImage, GpuError> {
    let device = &ctx.device;
    let bytes_per_row = aligned_bytes_per_row(width);
    let buffer_size = (bytes_per_row * height) as u64;

    let need_new = !matches!(cached_staging, Some((_, size)) if *size >= buffer_size);
    if need_new {
        let buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size: buffer_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        *cached_staging = Some((buf, buffer_size));
    }
    let Some((staging, _)) = cached_staging.as_ref() else {
        return Err(GpuError::Readback("no staging buffer".into()));
    };

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    ctx.submit_one(encoder);

    let slice = staging.slice(..buffer_size);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(GpuError::Readback(format!("{:?}", e))),
        Err(e) => return Err(GpuError::Readback(e.to_string())),
    }

    let actual_row = (width * 4) as usize;
    let mut pixels = Vec::with_capacity(actual_row * height as usize);
    {
        let mapped = slice.get_mapped_range();
        for y in 0..height as usize {
            let start = y * bytes_per_row as usize;
            pixels.extend_from_slice(&mapped[start..start + actual_row]);
        }
    }
    staging.unmap();

    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| GpuError::Readback("short readback buffer".into()))
}
