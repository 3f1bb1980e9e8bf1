// ============================================================================
// GPU MODULE - compute-shader evaluation of the depth kernels
// ============================================================================
//
// Architecture:
//   context.rs  - wgpu Device, Queue, adapter init
//   shaders.rs  - WGSL source for both kernel entry points
//   texture.rs  - render-target upload and composite readback
//   compute.rs  - uniform packing and the two compute pipelines
//   pool.rs     - texture recycling pool
//   renderer.rs - GpuKernelRenderer, one composite per call
// ============================================================================

pub mod compute;
pub mod context;
pub mod pool;
pub mod renderer;
pub mod shaders;
pub mod texture;

pub use renderer::GpuKernelRenderer;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter")]
    NoAdapter,

    #[error("device request failed: {0}")]
    Device(String),

    #[error("{0}x{1} exceeds the device texture limit")]
    TooLarge(u32, u32),

    #[error("readback failed: {0}")]
    Readback(String),
}
