// ============================================================================
// GPU RENDERER - kernel composites on the device
// ============================================================================

use image::{GrayImage, RgbaImage};

use super::GpuError;
use super::compute::{KernelPipelines, KernelUniforms};
use super::context::GpuContext;
use super::pool::TexturePool;
use super::texture::{TargetTexture, readback_rgba};
use crate::kernel::{KernelParams, KernelVariant};

/// Owns the device, both kernel pipelines and the recycled textures.
pub struct GpuKernelRenderer {
    pub ctx: GpuContext,
    pipelines: KernelPipelines,
    pool: TexturePool,
    /// Staging buffer reused across readbacks while it is large enough.
    staging: Option<(wgpu::Buffer, u64)>,
}

impl GpuKernelRenderer {
    pub fn new(power: &str) -> Result<Self, GpuError> {
        let ctx = GpuContext::new(power)?;
        let pipelines = KernelPipelines::new(&ctx.device);
        Ok(Self {
            ctx,
            pipelines,
            pool: TexturePool::new(),
            staging: None,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_name
    }

    /// Run one kernel over the targets and read the frame back.
    pub fn composite(
        &mut self,
        variant: &KernelVariant,
        image: &RgbaImage,
        depth: &GrayImage,
        params: &KernelParams,
    ) -> Result<RgbaImage, GpuError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(RgbaImage::new(w, h));
        }

        let image_tex = TargetTexture::upload_rgba(&self.ctx, &mut self.pool, image)?;
        let depth_tex = match TargetTexture::upload_depth(&self.ctx, &mut self.pool, depth) {
            Ok(t) => t,
            Err(e) => {
                image_tex.recycle(&mut self.pool);
                return Err(e);
            }
        };
        let output = TargetTexture::output(&self.ctx, &mut self.pool, w, h);

        let uniforms = KernelUniforms::new(variant, params, w, h);
        self.pipelines
            .dispatch(&self.ctx, variant, &uniforms, &image_tex.view, &depth_tex.view, &output.view);
        let frame = readback_rgba(&self.ctx, &output.texture, w, h, &mut self.staging);

        image_tex.recycle(&mut self.pool);
        depth_tex.recycle(&mut self.pool);
        output.recycle(&mut self.pool);
        frame
    }

    /// Drop pooled textures, e.g. after the viewport changed size.
    pub fn trim(&mut self) {
        let pooled = self.pool.pooled_count();
        if pooled > 0 {
            log::debug!("[GPU] releasing {} pooled textures", pooled);
        }
        self.pool.clear();
        self.staging = None;
    }
}
