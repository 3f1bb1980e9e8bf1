// ============================================================================
// DepthView CLI - headless parallax rendering and export
// ============================================================================
//
// Usage examples:
//   depthview -i photo.jpg -d depth.png -o out.png
//   depthview -i photo.jpg -d depth.png -o out.png --offset 0.3,0 --quality 3
//   depthview -i photo.jpg -d depth.png --frames 60 --output-dir frames/
//   depthview -i photo.jpg -d depth.png --anaglyph stereo.jpg --thumbnail t.jpg
//   depthview -i "shots/*.jpg" --output-dir out/      (depth: <stem>_depth.png)
//
// Each input gets its own viewer. Loads run on the rayon pool; everything else
// runs on the calling thread.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;

use crate::error::{Result, Slot, ViewerError};
use crate::export::save_image;
use crate::geometry::{PixelSize, SizeF, Vec2};
use crate::options::{QUALITY_HIGHEST, QUALITY_LOWEST, ViewerOptions};
use crate::renderer::RendererKind;
use crate::resource::ResourceSource;
use crate::viewer::Viewer;

const LOAD_TIMEOUT: Duration = Duration::from_secs(60);
const DEPTH_SUFFIXES: [&str; 3] = ["_depth.png", "_depth.jpg", "_depthmap.png"];

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// DepthView headless renderer.
#[derive(Parser, Debug)]
#[command(
    name = "depthview",
    about = "Render depth-map parallax images without a window",
    long_about = "Load a photo and its depth map, render parallax stills, animation\n\
                  frames and exports (anaglyph, image+depth PNG, thumbnail, depth map).\n\n\
                  Example:\n  \
                  depthview -i photo.jpg -d depth.png -o out.png --offset 0.5,0\n  \
                  depthview -i \"*.jpg\" --frames 30 --output-dir frames/"
)]
pub struct CliArgs {
    /// Input image(s). Glob patterns accepted.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Depth map(s), paired with the inputs in order. When omitted, a sibling
    /// `<stem>_depth.png` is used if present.
    #[arg(short, long, num_args = 1..)]
    pub depth: Vec<String>,

    /// Read depth from the inverted alpha channel of the depth file.
    #[arg(long)]
    pub alpha_depth: bool,

    /// Output still. Only valid for a single input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch stills and animation frames.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Viewer offset as `x,y`, roughly -1..1 per axis. Disables animation.
    #[arg(long, value_parser = parse_offset, allow_hyphen_values = true, value_name = "X,Y")]
    pub offset: Option<Vec2>,

    /// Force a quality level (1 = displacement, 2-5 = perspective).
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(QUALITY_LOWEST as i64..=QUALITY_HIGHEST as i64))]
    pub quality: Option<u8>,

    /// Render size as `WxH`. Defaults to the image size.
    #[arg(long, value_parser = parse_size, value_name = "WxH")]
    pub size: Option<PixelSize>,

    /// Render N frames of one animation loop.
    #[arg(long, value_name = "N")]
    pub frames: Option<u32>,

    /// Write a red/cyan anaglyph.
    #[arg(long, value_name = "FILE")]
    pub anaglyph: Option<PathBuf>,

    /// Write the image with depth packed into alpha.
    #[arg(long, value_name = "FILE")]
    pub depth_png: Option<PathBuf>,

    /// Write a 50x50 thumbnail.
    #[arg(long, value_name = "FILE")]
    pub thumbnail: Option<PathBuf>,

    /// Write the depth map as a grey image.
    #[arg(long, value_name = "FILE")]
    pub depthmap: Option<PathBuf>,

    /// Longest side for anaglyph / depth exports.
    #[arg(long, value_name = "PX")]
    pub max_size: Option<u32>,

    /// JSON viewer options file (camelCase keys).
    #[arg(long, value_name = "FILE")]
    pub options: Option<PathBuf>,

    /// Run the kernels on the GPU.
    #[arg(long)]
    pub gpu: bool,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = 90, value_name = "1-100")]
    pub jpeg_quality: u8,

    /// Debug logging and per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    fn has_single_file_outputs(&self) -> bool {
        self.output.is_some()
            || self.anaglyph.is_some()
            || self.depth_png.is_some()
            || self.thumbnail.is_some()
            || self.depthmap.is_some()
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.has_single_file_outputs() {
        eprintln!(
            "error: {} input files given but -o and the export flags only accept a single file.\n\
             Use --output-dir for batch rendering.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let depths = match pair_depths(&inputs, &resolve_inputs(&args.depth)) {
        Ok(d) => d,
        Err(msg) => {
            eprintln!("error: {}", msg);
            return ExitCode::FAILURE;
        }
    };

    let options = match build_options(&args) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, (input, depth)) in inputs.iter().zip(&depths).enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input.display());
        }
        let file_start = Instant::now();

        match run_one(input, depth.as_deref(), &args, &options, multi) {
            Ok(written) => {
                if args.verbose || multi {
                    for path in &written {
                        println!("  -> {}", path.display());
                    }
                    println!("  ({:.0}ms)", file_start.elapsed().as_secs_f64() * 1000.0);
                }
            }
            Err(e) => {
                log::error!("{}: {}", input.display(), e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

/// Options file, then command-line overrides.
fn build_options(args: &CliArgs) -> Result<ViewerOptions> {
    let mut options = match &args.options {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| ViewerError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            ViewerOptions::from_json(&text)?
        }
        None => ViewerOptions::default(),
    };
    if args.quality.is_some() {
        options.quality = args.quality;
    }
    if args.offset.is_some() {
        options.animate = false;
    }
    Ok(options.sanitized())
}

// ============================================================================
// Per-file processing
// ============================================================================

fn run_one(
    input: &Path,
    depth: Option<&Path>,
    args: &CliArgs,
    options: &ViewerOptions,
    multi: bool,
) -> Result<Vec<PathBuf>> {
    let kind = if args.gpu { RendererKind::Gpu } else { RendererKind::Cpu };
    let mut viewer = Viewer::with_renderer(options.clone(), kind);
    if let Some(e) = viewer.renderer_error() {
        return Err(e.clone());
    }

    viewer.set_image(ResourceSource::Path(input.to_path_buf()));
    viewer.set_depthmap(depth.map(|d| ResourceSource::Path(d.to_path_buf())), args.alpha_depth);
    if !viewer.block_until_loaded(LOAD_TIMEOUT) {
        return Err(ViewerError::NotReady);
    }
    if let Some(e) = viewer.load_error() {
        return Err(e.clone());
    }
    if depth.is_none() {
        log::warn!("[Load] {} has no depth map; output is the plain image", input.display());
    }

    let natural = viewer.natural_size(Slot::Image).ok_or(ViewerError::NotReady)?;
    let size = args.size.unwrap_or(natural);
    viewer.set_container(SizeF::new(size.width as f32, size.height as f32), 1.0);
    if let Some(offset) = args.offset {
        viewer.set_offset(offset);
    }

    let q = args.jpeg_quality;
    let mut written = Vec::new();
    let mut write = |img: &image::RgbaImage, path: &Path| -> Result<()> {
        save_image(img, path, q)?;
        written.push(path.to_path_buf());
        Ok(())
    };

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".into());

    if let Some(n) = args.frames.filter(|n| *n > 0) {
        let dir = frame_dir(input, args.output_dir.as_deref());
        for i in 0..n {
            let patch = serde_json::json!({ "animate": true, "animatePosition": i as f32 / n as f32 });
            let frame = viewer.render_still(size, &patch)?;
            write(&frame, &dir.join(format!("{}_{:04}.png", stem, i)))?;
        }
    }

    let still_path = match (&args.output, &args.output_dir) {
        (Some(out), _) => Some(out.clone()),
        (None, Some(dir)) if multi || args.frames.is_none() => Some(dir.join(format!("{}_parallax.png", stem))),
        _ => None,
    };
    if let Some(path) = still_path {
        let frame = viewer.render_still(size, &serde_json::json!({}))?;
        write(&frame, &path)?;
    }

    if let Some(path) = &args.anaglyph {
        let img = viewer.export_anaglyph(args.max_size)?;
        write(&img, path)?;
    }
    if let Some(path) = &args.depth_png {
        match viewer.export_depth_png(args.max_size)? {
            Some(img) => write(&img, path)?,
            None => log::warn!("[Stage] no depth map; skipping {}", path.display()),
        }
    }
    if let Some(path) = &args.depthmap {
        let img = viewer.export_depthmap(args.max_size)?;
        write(&img, path)?;
    }
    if let Some(path) = &args.thumbnail {
        let img = viewer.export_thumbnail(None)?;
        write(&img, path)?;
    }

    Ok(written)
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    log::warn!("pattern '{}' matched no files", pattern);
                }
            }
            Err(e) => {
                log::warn!("invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Match each input with its depth map: explicit list in order, else a
/// `<stem>_depth.*` sibling.
fn pair_depths(inputs: &[PathBuf], depths: &[PathBuf]) -> std::result::Result<Vec<Option<PathBuf>>, String> {
    if !depths.is_empty() {
        if depths.len() != inputs.len() {
            return Err(format!(
                "{} inputs but {} depth maps; pass one depth map per input",
                inputs.len(),
                depths.len()
            ));
        }
        return Ok(depths.iter().cloned().map(Some).collect());
    }
    Ok(inputs.iter().map(|input| sibling_depth(input)).collect())
}

fn sibling_depth(input: &Path) -> Option<PathBuf> {
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let parent = input.parent().unwrap_or(Path::new("."));
    DEPTH_SUFFIXES
        .iter()
        .map(|suffix| parent.join(format!("{}{}", stem, suffix)))
        .find(|p| p.exists())
}

fn frame_dir(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().unwrap_or(Path::new(".")).to_path_buf(),
    }
}

fn parse_offset(s: &str) -> std::result::Result<Vec2, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y but got '{}'", s))?;
    let x: f32 = x.trim().parse().map_err(|e| format!("bad x '{}': {}", x, e))?;
    let y: f32 = y.trim().parse().map_err(|e| format!("bad y '{}': {}", y, e))?;
    Ok(Vec2::new(x, y))
}

fn parse_size(s: &str) -> std::result::Result<PixelSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH but got '{}'", s))?;
    let w: u32 = w.trim().parse().map_err(|e| format!("bad width '{}': {}", w, e))?;
    let h: u32 = h.trim().parse().map_err(|e| format!("bad height '{}': {}", h, e))?;
    if w == 0 || h == 0 {
        return Err("size must be non-zero".into());
    }
    Ok(PixelSize::new(w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_parse_with_negatives() {
        assert_eq!(parse_offset("-0.5, 0.25"), Ok(Vec2::new(-0.5, 0.25)));
        assert!(parse_offset("0.5").is_err());
        assert!(parse_offset("a,1").is_err());
    }

    #[test]
    fn sizes_parse() {
        assert_eq!(parse_size("800x600"), Ok(PixelSize::new(800, 600)));
        assert_eq!(parse_size("64X32"), Ok(PixelSize::new(64, 32)));
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("800").is_err());
    }

    #[test]
    fn explicit_depths_pair_in_order() {
        let inputs = vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")];
        let depths = vec![PathBuf::from("a_d.png"), PathBuf::from("b_d.png")];
        let paired = pair_depths(&inputs, &depths).unwrap();
        assert_eq!(paired[1], Some(PathBuf::from("b_d.png")));
        assert!(pair_depths(&inputs, &depths[..1]).is_err());
    }

    #[test]
    fn missing_sibling_depth_is_none() {
        let inputs = vec![PathBuf::from("/nonexistent/dir/photo.jpg")];
        assert_eq!(pair_depths(&inputs, &[]).unwrap(), vec![None]);
    }

    #[test]
    fn cli_overrides_options() {
        let args = CliArgs::parse_from(["depthview", "-i", "x.jpg", "--quality", "3", "--offset", "-1,0"]);
        let options = build_options(&args).unwrap();
        assert_eq!(options.quality, Some(3));
        assert!(!options.animate);
        assert_eq!(args.offset, Some(Vec2::new(-1.0, 0.0)));
    }

    #[test]
    fn quality_out_of_range_is_rejected() {
        assert!(CliArgs::try_parse_from(["depthview", "-i", "x.jpg", "--quality", "9"]).is_err());
    }
}
