// ============================================================================
// DIRTY-FLAG SCHEDULER - one ordered recomputation pass per tick
// ============================================================================
//
// Order: size -> image -> depth -> stage -> filter params -> motion -> composite.
//
// Every step returns the flags it raises. Steps only ever raise flags that
// come later in the order, so a single top-to-bottom pass settles everything.

/// Stale render artifacts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    /// Viewport size must be recomputed.
    pub size: bool,
    /// Image target must be re-described (new source or new viewport).
    pub image: bool,
    /// Image target pixels must be re-rendered.
    pub image_render: bool,
    pub depth: bool,
    pub depth_render: bool,
    /// Kernel selection / compound assignment must be rebuilt.
    pub stage: bool,
    pub filter_params: bool,
    /// The final composite is stale.
    pub composite: bool,
}

impl DirtyFlags {
    pub fn all() -> Self {
        Self {
            size: true,
            image: true,
            image_render: true,
            depth: true,
            depth_render: true,
            stage: true,
            filter_params: true,
            composite: true,
        }
    }

    pub fn any(&self) -> bool {
        self.size
            || self.image
            || self.image_render
            || self.depth
            || self.depth_render
            || self.stage
            || self.filter_params
            || self.composite
    }

    pub fn merge(&mut self, other: DirtyFlags) {
        self.size |= other.size;
        self.image |= other.image;
        self.image_render |= other.image_render;
        self.depth |= other.depth;
        self.depth_render |= other.depth_render;
        self.stage |= other.stage;
        self.filter_params |= other.filter_params;
        self.composite |= other.composite;
    }
}

/// Recomputation steps, in pass order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Size,
    ImageTarget,
    ImageRender,
    DepthTarget,
    DepthRender,
    Stage,
    FilterParams,
    Motion,
    Composite,
}

/// The work behind each step. Implemented by the viewer; tests use mocks.
pub trait StagePipeline {
    fn update_size(&mut self) -> DirtyFlags;
    fn update_image_target(&mut self) -> DirtyFlags;
    fn render_image_target(&mut self) -> DirtyFlags;
    fn update_depth_target(&mut self) -> DirtyFlags;
    fn render_depth_target(&mut self) -> DirtyFlags;
    fn update_stage(&mut self) -> DirtyFlags;
    fn update_filter_params(&mut self) -> DirtyFlags;
    /// Advance offset easing / animation. Only called when a depth map exists.
    fn update_motion(&mut self) -> DirtyFlags;
    fn has_depth(&self) -> bool;
    fn composite(&mut self);
}

/// Which steps ran during a pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub steps: Vec<Step>,
}

impl PassReport {
    pub fn ran(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }

    /// True when nothing besides motion ran.
    pub fn is_idle(&self) -> bool {
        self.steps.iter().all(|s| *s == Step::Motion)
    }
}

/// Run one ordered pass. `force_composite` corresponds to `alwaysRender`.
pub fn run_pass<P: StagePipeline>(
    flags: &mut DirtyFlags,
    pipeline: &mut P,
    force_composite: bool,
) -> PassReport {
    let mut report = PassReport::default();

    if flags.size {
        flags.size = false;
        let raised = pipeline.update_size();
        flags.merge(raised);
        report.steps.push(Step::Size);
    }

    if flags.image {
        flags.image = false;
        let raised = pipeline.update_image_target();
        flags.merge(raised);
        report.steps.push(Step::ImageTarget);
    }
    if flags.image_render {
        flags.image_render = false;
        let raised = pipeline.render_image_target();
        flags.merge(raised);
        report.steps.push(Step::ImageRender);
    }

    if flags.depth {
        flags.depth = false;
        let raised = pipeline.update_depth_target();
        flags.merge(raised);
        report.steps.push(Step::DepthTarget);
    }
    if flags.depth_render {
        flags.depth_render = false;
        let raised = pipeline.render_depth_target();
        flags.merge(raised);
        report.steps.push(Step::DepthRender);
    }

    if flags.stage {
        flags.stage = false;
        let raised = pipeline.update_stage();
        flags.merge(raised);
        report.steps.push(Step::Stage);
    }
    if flags.filter_params {
        flags.filter_params = false;
        let raised = pipeline.update_filter_params();
        flags.merge(raised);
        report.steps.push(Step::FilterParams);
    }

    if pipeline.has_depth() {
        let raised = pipeline.update_motion();
        flags.merge(raised);
        report.steps.push(Step::Motion);
    }

    if flags.composite || force_composite {
        flags.composite = false;
        pipeline.composite();
        report.steps.push(Step::Composite);
    }

    report
}
