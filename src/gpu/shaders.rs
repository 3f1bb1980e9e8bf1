// ============================================================================
// WGSL SHADERS - depth kernels as compute entry points
// ============================================================================
//
// One module, one entry point per kernel family. Both read the image and
// depth render targets through a clamp-to-edge linear sampler and write the
// composite into an rgba8unorm storage texture. The uniform layout matches
// `compute::KernelUniforms` field for field.

pub const DEPTH_KERNEL_SHADER: &str = r#"
struct KernelUniforms {
    width: u32,
    height: u32,
    steps: u32,
    method: u32,
    antialias: u32,
    color_average: u32,
    _pad0: u32,
    _pad1: u32,
    v0x: f32,
    v0y: f32,
    v1x: f32,
    v1y: f32,
    scale_x: f32,
    scale_y: f32,
    offset_x: f32,
    offset_y: f32,
    focus: f32,
    inv_enlarge: f32,
    compression: f32,
    perspective: f32,
    confidence_max: f32,
    mask_power: f32,
    _pad2: f32,
    _pad3: f32,
};

@group(0) @binding(0) var image_tex: texture_2d<f32>;
@group(0) @binding(1) var depth_tex: texture_2d<f32>;
@group(0) @binding(2) var linear_sampler: sampler;
@group(0) @binding(3) var output_tex: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(4) var<uniform> params: KernelUniforms;

fn image_at(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(image_tex, linear_sampler, uv, 0.0);
}

fn depth_at(uv: vec2<f32>) -> f32 {
    return textureSampleLevel(depth_tex, linear_sampler, uv, 0.0).r;
}

fn pixel_uv(gid: vec3<u32>) -> vec2<f32> {
    let size = vec2<f32>(f32(params.width), f32(params.height));
    return (vec2<f32>(gid.xy) + vec2<f32>(0.5)) / size;
}

@compute @workgroup_size(16, 16)
fn displace_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) {
        return;
    }
    let uv = pixel_uv(gid);
    let map = params.focus - depth_at(uv);
    let shift = vec2<f32>(params.offset_x * params.scale_x, params.offset_y * params.scale_y) * map;
    textureStore(output_tex, vec2<i32>(gid.xy), image_at(uv + shift));
}

fn confidence(dpos: f32, depth: f32, dstep: f32) -> f32 {
    if (params.method == 1u) {
        let c = 1.0 - abs(dpos - depth);
        if (c < 1.0 - dstep) {
            return 0.0;
        }
        return c;
    }
    if (params.method == 2u) {
        return pow(1.0 - abs(dpos - depth), params.mask_power);
    }
    return step(dpos, depth + 0.001);
}

@compute @workgroup_size(16, 16)
fn perspective_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) {
        return;
    }
    let uv = pixel_uv(gid);
    let pos = (uv - vec2<f32>(0.5)) * params.inv_enlarge + vec2<f32>(0.5);
    let v0 = vec2<f32>(params.v0x, params.v0y);
    let v1 = vec2<f32>(params.v1x, params.v1y) + (pos * 2.0 - vec2<f32>(1.0)) * params.perspective;
    let span = f32(max(params.steps, 2u) - 1u);
    let vstep = (v1 - v0) / span;
    let dstep = params.compression / span;
    let dstart = 0.5 + params.compression / 2.0;
    let dmin = (1.0 - params.compression) / 2.0;
    let dmax = (1.0 + params.compression) / 2.0;
    let cutoff = dmin - 0.0001;

    var conf_sum: f32 = 0.0;
    var pos_sum: vec2<f32> = vec2<f32>(0.0);
    var col_sum: vec4<f32> = vec4<f32>(0.0);
    var j: f32 = 0.0;

    for (var i = 0u; i < params.steps; i = i + 1u) {
        let dpos = dstart - j * dstep;
        if (!(dpos >= cutoff && conf_sum < params.confidence_max)) {
            break;
        }
        let vpos = pos + v1 - j * vstep;
        let depth = clamp(1.0 - depth_at(vpos), dmin, dmax);
        let conf = confidence(dpos, depth, dstep);

        if (conf > 0.0) {
            let corrected = vpos + ((depth - dpos) / dstep) * vstep;
            if (params.color_average == 1u) {
                col_sum = col_sum + image_at(corrected) * conf;
            } else {
                pos_sum = pos_sum + corrected * conf;
            }
            conf_sum = conf_sum + conf;
        }

        let fi = f32(i);
        if (params.antialias == 1u && conf > 0.8 && fi == j) {
            j = j - 0.5;
        } else if (params.antialias == 2u && conf >= 0.8 && j >= fi) {
            j = j - 0.5;
        } else {
            j = j + 1.0;
        }
    }

    var color: vec4<f32>;
    if (conf_sum <= 0.0) {
        color = image_at(pos);
    } else if (params.color_average == 1u) {
        color = col_sum / conf_sum;
    } else {
        color = image_at(pos_sum / conf_sum);
    }
    textureStore(output_tex, vec2<i32>(gid.xy), color);
}
"#;

pub const DISPLACE_ENTRY: &str = "displace_main";
pub const PERSPECTIVE_ENTRY: &str = "perspective_main";

#[cfg(test)]
mod wgsl_tests {
    use super::*;

    fn parse(source: &str) -> naga::Module {
        naga::front::wgsl::parse_str(source).unwrap_or_else(|error| {
            panic!("failed to parse depth kernel WGSL: {}", error.emit_to_string(source))
        })
    }

    #[test]
    fn depth_kernel_shader_parses() {
        parse(DEPTH_KERNEL_SHADER);
    }

    #[test]
    fn depth_kernel_shader_validates() {
        let module = parse(DEPTH_KERNEL_SHADER);
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .unwrap_or_else(|error| panic!("depth kernel WGSL failed validation: {:?}", error));
    }

    #[test]
    fn both_entry_points_are_exported() {
        let module = parse(DEPTH_KERNEL_SHADER);
        let names: Vec<&str> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&DISPLACE_ENTRY));
        assert!(names.contains(&PERSPECTIVE_ENTRY));
    }

    #[test]
    fn uniform_block_is_sixteen_byte_aligned() {
        assert_eq!(std::mem::size_of::<crate::gpu::compute::KernelUniforms>() % 16, 0);
    }
}
