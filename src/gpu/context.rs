// ============================================================================
// GPU CONTEXT - wgpu Device, Queue, and adapter initialization
// ============================================================================

use std::sync::Arc;

use super::GpuError;

/// Core wgpu resources for one renderer. Created once; if creation fails the
/// viewer reports itself as having no renderer.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    /// Maximum texture dimension supported by this device.
    pub max_texture_dim: u32,
}

impl GpuContext {
    /// Create a headless context. Tries hardware first, then falls back to a
    /// software rasterizer (`force_fallback_adapter`).
    pub fn new(power: &str) -> Result<Self, GpuError> {
        // 1. Try hardware adapter.
        match pollster::block_on(Self::new_async(power, false)) {
            Ok(ctx) => return Ok(ctx),
            Err(e) => log::warn!("[GPU] Hardware adapter unavailable ({}), trying software fallback", e),
        }
        // 2. Fallback: software rasterizer.
        pollster::block_on(Self::new_async(power, true))
    }

    async fn new_async(power: &str, force_fallback: bool) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power_preference = match power.to_lowercase().as_str() {
            "low power" | "low" | "integrated" => wgpu::PowerPreference::LowPower,
            _ => wgpu::PowerPreference::HighPerformance,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: force_fallback,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let adapter_name = adapter.get_info().name.clone();
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("DepthView GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: limits.max_texture_dimension_2d,
                        max_compute_workgroup_size_x: limits.max_compute_workgroup_size_x,
                        max_compute_workgroup_size_y: limits.max_compute_workgroup_size_y,
                        max_compute_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
                        ..wgpu::Limits::downlevel_defaults()
                    },
                },
                None,
            )
            .await
            .map_err(|e| GpuError::Device(e.to_string()))?;

        log::info!("[GPU] Using adapter '{}' (fallback: {})", adapter_name, force_fallback);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            max_texture_dim: limits.max_texture_dimension_2d,
        })
    }

    /// Check if a texture of the given dimensions can be created.
    pub fn supports_size(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_dim && height <= self.max_texture_dim
    }

    /// Submit a single encoder's commands.
    pub fn submit_one(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}
