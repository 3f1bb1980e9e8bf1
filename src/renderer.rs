// ============================================================================
// RENDERER - CPU reference kernels or the wgpu compute path
// ============================================================================

use image::{GrayImage, RgbaImage};

use crate::error::{Result, ViewerError};
use crate::gpu::GpuKernelRenderer;
use crate::kernel::{KernelParams, KernelVariant};

/// Which backend a viewer should create.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RendererKind {
    #[default]
    Cpu,
    Gpu,
}

pub enum Renderer {
    /// rayon-parallel reference kernels. Always available.
    Cpu,
    Gpu(Box<GpuKernelRenderer>),
}

impl Renderer {
    /// Create a backend. A GPU that cannot be initialised is reported as
    /// `RendererUnavailable`; there is no silent fallback to the CPU.
    pub fn create(kind: RendererKind) -> Result<Self> {
        match kind {
            RendererKind::Cpu => Ok(Renderer::Cpu),
            RendererKind::Gpu => match GpuKernelRenderer::new("high performance") {
                Ok(gpu) => {
                    log::info!("[GPU] kernels on '{}'", gpu.adapter_name());
                    Ok(Renderer::Gpu(Box::new(gpu)))
                }
                Err(e) => {
                    log::error!("[GPU] renderer unavailable: {}", e);
                    Err(ViewerError::RendererUnavailable(e.to_string()))
                }
            },
        }
    }

    pub fn kind(&self) -> RendererKind {
        match self {
            Renderer::Cpu => RendererKind::Cpu,
            Renderer::Gpu(_) => RendererKind::Gpu,
        }
    }

    /// Evaluate `variant` over the targets. A device error on an individual
    /// frame falls back to the CPU kernels for that frame.
    pub fn composite(
        &mut self,
        variant: &KernelVariant,
        image: &RgbaImage,
        depth: &GrayImage,
        params: &KernelParams,
    ) -> RgbaImage {
        match self {
            Renderer::Cpu => variant.render(image, depth, params),
            Renderer::Gpu(gpu) => match gpu.composite(variant, image, depth, params) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("[GPU] composite failed ({}), using CPU kernels", e);
                    variant.render(image, depth, params)
                }
            },
        }
    }

    /// Release cached device memory after a viewport change.
    pub fn trim(&mut self) {
        if let Renderer::Gpu(gpu) = self {
            gpu.trim();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    #[test]
    fn cpu_renderer_is_always_available() {
        let mut renderer = Renderer::create(RendererKind::Cpu).unwrap();
        assert_eq!(renderer.kind(), RendererKind::Cpu);

        let image = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        let depth = GrayImage::from_pixel(8, 8, Luma([128]));
        let frame = renderer.composite(
            &KernelVariant::for_quality(Some(2)),
            &image,
            &depth,
            &KernelParams::default(),
        );
        assert_eq!(frame.dimensions(), (8, 8));
        assert!(frame.pixels().all(|p| *p == Rgba([10, 20, 30, 255])));
    }
}
