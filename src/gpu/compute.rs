// ============================================================================
// GPU COMPUTE KERNELS - displacement and perspective dispatch
// ============================================================================

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::shaders::{DEPTH_KERNEL_SHADER, DISPLACE_ENTRY, PERSPECTIVE_ENTRY};
use crate::kernel::{
    Accumulation, Antialias, ConfidenceMethod, KernelParams, KernelVariant, aspect_scale,
};

/// Uniform block shared by both entry points. Scalars only so the layout has
/// no implicit padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct KernelUniforms {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub method: u32,
    pub antialias: u32,
    pub color_average: u32,
    pub _pad0: u32,
    pub _pad1: u32,
    pub v0x: f32,
    pub v0y: f32,
    pub v1x: f32,
    pub v1y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub focus: f32,
    pub inv_enlarge: f32,
    pub compression: f32,
    pub perspective: f32,
    pub confidence_max: f32,
    pub mask_power: f32,
    pub _pad2: f32,
    pub _pad3: f32,
}

impl KernelUniforms {
    pub fn new(variant: &KernelVariant, params: &KernelParams, width: u32, height: u32) -> Self {
        let (sx, sy) = aspect_scale(params.scale, width, height);
        let mut u = KernelUniforms {
            width,
            height,
            scale_x: sx,
            scale_y: sy,
            offset_x: params.offset.x,
            offset_y: params.offset.y,
            focus: params.focus,
            inv_enlarge: if params.enlarge > 0.0 { 1.0 / params.enlarge } else { 1.0 },
            ..Default::default()
        };

        if let KernelVariant::Perspective(profile) = variant {
            let (px, py) = (sx * profile.enlarge, sy * profile.enlarge);
            let lead = 0.5 - params.focus;
            let (ox, oy) = (params.offset.x, params.offset.y);
            u.v0x = (lead * ox - ox / 2.0) * px;
            u.v0y = (lead * oy - oy / 2.0) * py;
            u.v1x = (lead * ox + ox / 2.0) * px;
            u.v1y = (lead * oy + oy / 2.0) * py;
            u.steps = profile.steps;
            u.method = match profile.method {
                ConfidenceMethod::Step => 0,
                ConfidenceMethod::Linear => 1,
                ConfidenceMethod::Power => 2,
            };
            u.antialias = match profile.antialias {
                Antialias::None => 0,
                Antialias::Branched => 1,
                Antialias::Stepped => 2,
            };
            u.color_average = (profile.accumulation == Accumulation::Color) as u32;
            u.compression = profile.compression;
            u.perspective = profile.perspective;
            u.confidence_max = profile.confidence_max;
            u.mask_power = profile.mask_power();
        }
        u
    }
}

/// Both kernel pipelines built from the one shader module.
pub struct KernelPipelines {
    displace: wgpu::ComputePipeline,
    perspective: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl KernelPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("depth_kernel_shader"),
            source: wgpu::ShaderSource::Wgsl(DEPTH_KERNEL_SHADER.into()),
        });

        let sampled = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("depth_kernel_bgl"),
            entries: &[
                sampled(0),
                sampled(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("depth_kernel_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let build = |label: &str, entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
                compilation_options: Default::default(),
            })
        };
        let displace = build("displace_pipeline", DISPLACE_ENTRY);
        let perspective = build("perspective_pipeline", PERSPECTIVE_ENTRY);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("depth_kernel_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            displace,
            perspective,
            bind_group_layout,
            sampler,
        }
    }

    /// Record and submit one kernel dispatch into `output`.
    pub fn dispatch(
        &self,
        ctx: &GpuContext,
        variant: &KernelVariant,
        uniforms: &KernelUniforms,
        image: &wgpu::TextureView,
        depth: &wgpu::TextureView,
        output: &wgpu::TextureView,
    ) {
        let device = &ctx.device;
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("depth_kernel_params"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("depth_kernel_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(image) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(depth) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(output) },
                wgpu::BindGroupEntry { binding: 4, resource: params_buf.as_entire_binding() },
            ],
        });

        let pipeline = match variant {
            KernelVariant::Displacement => &self.displace,
            KernelVariant::Perspective(_) => &self.perspective,
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("depth_kernel_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("depth_kernel_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(uniforms.width.div_ceil(16), uniforms.height.div_ceil(16), 1);
        }
        ctx.submit_one(encoder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec2;
    use crate::kernel::PerspectiveProfile;

    #[test]
    fn perspective_uniforms_carry_the_profile() {
        let variant = KernelVariant::for_quality(Some(5));
        let params = KernelParams { offset: Vec2::new(1.0, 0.0), ..Default::default() };
        let u = KernelUniforms::new(&variant, &params, 200, 100);
        assert_eq!(u.steps, 40);
        assert_eq!(u.color_average, 1);
        assert_eq!(u.antialias, 0);
        assert!((u.v1x + u.v0x).abs() < 1e-7);
        assert!(u.v1x > 0.0);
        assert_eq!(u.v0y, 0.0);
    }

    #[test]
    fn displacement_uniforms_leave_search_empty() {
        let params = KernelParams::default();
        let u = KernelUniforms::new(&KernelVariant::Displacement, &params, 64, 64);
        assert_eq!(u.steps, 0);
        assert_eq!((u.scale_x, u.scale_y), (params.scale, params.scale));
    }

    #[test]
    fn antialias_codes_match_the_shader() {
        let profile = PerspectiveProfile::reference();
        let u = KernelUniforms::new(&KernelVariant::Perspective(profile), &KernelParams::default(), 8, 8);
        assert_eq!(u.antialias, 1);
        let stepped = PerspectiveProfile::for_level(4).unwrap();
        let u = KernelUniforms::new(&KernelVariant::Perspective(stepped), &KernelParams::default(), 8, 8);
        assert_eq!(u.antialias, 2);
    }
}
