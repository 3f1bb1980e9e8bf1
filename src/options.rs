// ============================================================================
// VIEWER OPTIONS - flat configuration object and its invalidation rules
// ============================================================================
//
// Options are plain values. The viewer keeps one copy; every change goes
// through `Viewer::set_options`, which diffs old against new and raises the
// dirty flags named by `ViewerOptions::invalidation`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViewerError};
use crate::geometry::{SizeF, Vec2};
use crate::scheduler::DirtyFlags;

/// How the image is fitted into the container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FitRepr", into = "FitRepr")]
pub enum Fit {
    /// Fill the container, cropping overflow.
    #[default]
    Cover,
    /// Letterbox inside the container.
    Contain,
    /// Use the container size as-is. Disables retina and upscale handling.
    Off,
}

/// Wire form of [`Fit`]: `"cover"`, `"contain"` or `false`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FitRepr {
    Flag(bool),
    Name(String),
}

impl TryFrom<FitRepr> for Fit {
    type Error = String;

    fn try_from(repr: FitRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            FitRepr::Flag(false) => Ok(Fit::Off),
            FitRepr::Flag(true) => Ok(Fit::Cover),
            FitRepr::Name(name) => match name.to_lowercase().as_str() {
                "cover" => Ok(Fit::Cover),
                "contain" => Ok(Fit::Contain),
                "none" | "off" | "false" => Ok(Fit::Off),
                other => Err(format!("unknown fit mode '{}'", other)),
            },
        }
    }
}

impl From<Fit> for FitRepr {
    fn from(fit: Fit) -> Self {
        match fit {
            Fit::Cover => FitRepr::Name("cover".into()),
            Fit::Contain => FitRepr::Name("contain".into()),
            Fit::Off => FitRepr::Flag(false),
        }
    }
}

pub const QUALITY_LOWEST: u8 = 1;
pub const QUALITY_HIGHEST: u8 = 5;

pub const MAX_DEPTH_SCALE: f32 = 100.0;
pub const MAX_DEPTH_BLUR: f32 = 128.0;
pub const MAX_UPSCALE: f32 = 16.0;
pub const MIN_ENLARGE: f32 = 0.1;
pub const MAX_ENLARGE: f32 = 10.0;
pub const MAX_ANIMATE_SCALE: f32 = 10.0;

/// `v` clamped to `[min, max]`, or `fallback` when NaN.
fn bounded(v: f32, fallback: f32, min: f32, max: f32) -> f32 {
    if v.is_nan() { fallback } else { v.clamp(min, max) }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewerOptions {
    /// Explicit viewport size in CSS pixels; overrides the container size.
    pub size: Option<SizeF>,
    /// Round the device-pixel viewport down to a multiple of this.
    pub size_divisible: u32,
    pub fit: Fit,
    /// Render at device-pixel resolution when the pixel ratio is above 1.
    pub retina: bool,
    /// Maximum canvas stretch factor when the image is smaller than the viewport.
    pub upscale: f32,
    /// Pre-scale of the perspective search to keep displaced edges inside the frame.
    pub enlarge: f32,

    pub animate: bool,
    /// Animation period in seconds.
    pub animate_duration: f32,
    /// Normalised animation position in [0, 1]; wall clock is used when unset.
    pub animate_position: Option<f32>,
    pub animate_scale: Vec2,

    pub depth_scale: f32,
    pub depth_blur_size: f32,
    pub depth_focus: f32,
    /// 0..1 blend of the depth visualisation over the composite.
    pub depth_preview: f32,

    pub ease_factor: f32,

    /// Forced quality level; disables the adaptive controller.
    pub quality: Option<u8>,
    pub quality_min: u8,
    pub quality_max: u8,
    pub quality_start: u8,

    pub always_render: bool,
    pub pause_render: bool,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            size: None,
            size_divisible: 1,
            fit: Fit::Cover,
            retina: true,
            upscale: 1.0,
            enlarge: 1.06,
            animate: true,
            animate_duration: 6.0,
            animate_position: None,
            animate_scale: Vec2::new(1.5, 1.5),
            depth_scale: 2.0,
            depth_blur_size: 4.0,
            depth_focus: 0.5,
            depth_preview: 0.0,
            ease_factor: 0.4,
            quality: None,
            quality_min: QUALITY_LOWEST,
            quality_max: QUALITY_HIGHEST,
            quality_start: 4,
            always_render: true,
            pause_render: false,
        }
    }
}

impl ViewerOptions {
    /// Parse a JSON options object. Missing keys take defaults, unknown keys
    /// are ignored.
    pub fn from_json(text: &str) -> Result<Self> {
        let opts: Self = serde_json::from_str(text)?;
        Ok(opts.sanitized())
    }

    /// Overlay a partial JSON object on top of these options.
    pub fn merged(&self, patch: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(patch) = patch else {
            return Err(ViewerError::Options("options patch must be an object".into()));
        };
        let mut base = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut base {
            for (key, value) in patch {
                map.insert(key.clone(), value.clone());
            }
        }
        let opts: Self = serde_json::from_value(base)?;
        Ok(opts.sanitized())
    }

    /// Clamp values into the ranges the pipeline assumes.
    pub fn sanitized(mut self) -> Self {
        self.depth_focus = bounded(self.depth_focus, 0.5, 0.0, 1.0);
        self.depth_preview = bounded(self.depth_preview, 0.0, 0.0, 1.0);
        self.ease_factor = bounded(self.ease_factor, 0.0, 0.0, 0.999);
        self.size_divisible = self.size_divisible.max(1);
        self.upscale = bounded(self.upscale, 1.0, 1.0, MAX_UPSCALE);
        self.enlarge = bounded(self.enlarge, 1.0, MIN_ENLARGE, MAX_ENLARGE);
        self.depth_scale = bounded(self.depth_scale, 0.0, -MAX_DEPTH_SCALE, MAX_DEPTH_SCALE);
        self.depth_blur_size = bounded(self.depth_blur_size, 0.0, 0.0, MAX_DEPTH_BLUR);
        self.animate_scale = Vec2::new(
            bounded(self.animate_scale.x, 0.0, -MAX_ANIMATE_SCALE, MAX_ANIMATE_SCALE),
            bounded(self.animate_scale.y, 0.0, -MAX_ANIMATE_SCALE, MAX_ANIMATE_SCALE),
        );
        self.animate_position = self.animate_position.filter(|p| p.is_finite());
        if self.animate_duration.is_nan() || self.animate_duration <= 0.0 {
            self.animate_duration = 6.0;
        }
        self.quality_min = self.quality_min.clamp(QUALITY_LOWEST, QUALITY_HIGHEST);
        self.quality_max = self.quality_max.clamp(self.quality_min, QUALITY_HIGHEST);
        self.quality_start = self.quality_start.clamp(self.quality_min, self.quality_max);
        self.quality = self.quality.map(|q| q.clamp(QUALITY_LOWEST, QUALITY_HIGHEST));
        self
    }

    /// Kernel scale derived from `depthScale`.
    pub fn kernel_scale(&self) -> f32 {
        0.02 * self.depth_scale
    }

    /// Which stages must be recomputed when moving from `self` to `next`.
    pub fn invalidation(&self, next: &ViewerOptions) -> DirtyFlags {
        let mut flags = DirtyFlags::default();

        if self.size != next.size
            || self.size_divisible != next.size_divisible
            || self.fit != next.fit
            || self.retina != next.retina
            || self.upscale != next.upscale
        {
            flags.size = true;
        }
        if self.quality != next.quality {
            flags.stage = true;
        }
        if self.depth_scale != next.depth_scale
            || self.depth_focus != next.depth_focus
            || self.depth_preview != next.depth_preview
            || self.enlarge != next.enlarge
        {
            flags.filter_params = true;
        }
        if self.depth_blur_size != next.depth_blur_size {
            flags.depth_render = true;
        }
        // Everything else only needs a fresh composite.
        if self != next {
            flags.composite = true;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults_and_unknown_keys() {
        let opts = ViewerOptions::from_json(r#"{ "depthScale": 3, "hover": true }"#).unwrap();
        assert_eq!(opts.depth_scale, 3.0);
        assert_eq!(opts.fit, Fit::Cover);
        assert_eq!(opts.quality_start, 4);
    }

    #[test]
    fn fit_accepts_false_and_names() {
        let off = ViewerOptions::from_json(r#"{ "fit": false }"#).unwrap();
        assert_eq!(off.fit, Fit::Off);
        let contain = ViewerOptions::from_json(r#"{ "fit": "contain" }"#).unwrap();
        assert_eq!(contain.fit, Fit::Contain);
        assert!(ViewerOptions::from_json(r#"{ "fit": "stretch" }"#).is_err());
    }

    #[test]
    fn merge_overlays_only_given_keys() {
        let base = ViewerOptions { depth_focus: 0.25, ..Default::default() };
        let patch = serde_json::json!({ "quality": 3, "depthFocus": 7.0 });
        let merged = base.merged(&patch).unwrap();
        assert_eq!(merged.quality, Some(3));
        assert_eq!(merged.depth_focus, 1.0);
        assert_eq!(merged.depth_scale, base.depth_scale);
    }

    #[test]
    fn invalidation_maps_keys_to_stages() {
        let base = ViewerOptions::default();

        let flags = base.invalidation(&ViewerOptions { upscale: 2.0, ..base.clone() });
        assert!(flags.size && !flags.stage);

        let flags = base.invalidation(&ViewerOptions { quality: Some(2), ..base.clone() });
        assert!(flags.stage && !flags.size);

        let flags = base.invalidation(&ViewerOptions { depth_blur_size: 1.0, ..base.clone() });
        assert!(flags.depth_render && !flags.depth);

        let flags = base.invalidation(&ViewerOptions { depth_focus: 0.1, ..base.clone() });
        assert!(flags.filter_params);

        assert!(!base.invalidation(&base.clone()).any());
    }

    #[test]
    fn quality_bounds_are_normalised() {
        let opts = ViewerOptions {
            quality_min: 4,
            quality_max: 2,
            quality_start: 1,
            ..Default::default()
        }
        .sanitized();
        assert_eq!((opts.quality_min, opts.quality_max, opts.quality_start), (4, 4, 4));
    }

    #[test]
    fn extreme_values_are_bounded() {
        let opts = ViewerOptions {
            depth_scale: 1e12,
            depth_blur_size: f32::INFINITY,
            enlarge: 0.0,
            upscale: f32::NAN,
            animate_scale: Vec2::new(f32::NAN, -1e9),
            animate_position: Some(f32::NAN),
            ..Default::default()
        }
        .sanitized();
        assert_eq!(opts.depth_scale, MAX_DEPTH_SCALE);
        assert_eq!(opts.depth_blur_size, MAX_DEPTH_BLUR);
        assert_eq!(opts.enlarge, MIN_ENLARGE);
        assert_eq!(opts.upscale, 1.0);
        assert_eq!(opts.animate_scale, Vec2::new(0.0, -MAX_ANIMATE_SCALE));
        assert_eq!(opts.animate_position, None);

        let negative = ViewerOptions { depth_scale: -3.0, ..Default::default() }.sanitized();
        assert_eq!(negative.depth_scale, -3.0);
    }
}
