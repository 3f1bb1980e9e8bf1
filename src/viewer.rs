// ============================================================================
// VIEWER - one parallax instance: slots, options, tick and readiness
// ============================================================================
//
// The viewer owns every piece of per-instance state and implements the
// scheduler's `StagePipeline`. Nothing here blocks except
// `block_until_loaded`, which the CLI uses to wait for file decodes.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use image::{GrayImage, RgbaImage};

use crate::animation::OffsetDriver;
use crate::error::{Result, Slot, ViewerError};
use crate::geometry::{PixelSize, SizeF, Vec2};
use crate::kernel::{KernelParams, KernelVariant, apply_depth_preview};
use crate::options::ViewerOptions;
use crate::quality::{QualityController, QualityOutcome};
use crate::renderer::{Renderer, RendererKind};
#[cfg(test)]
use crate::resource::LoadCompletion;
use crate::resource::{LoadOutcome, LoadState, ResourceId, ResourceSource, TextureRegistry};
use crate::scheduler::{DirtyFlags, PassReport, StagePipeline, run_pass};
use crate::stage::{self, KernelCache, Viewport};

/// Largest accepted offset component.
pub const MAX_OFFSET: f32 = 4.0;

// ---------------------------------------------------------------------------
//  Readiness future
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ReadySlot {
    outcome: Option<Result<()>>,
    waker: Option<Waker>,
}

/// Resolves once the viewer becomes ready, or fails with the load error.
pub struct ReadyFuture {
    slot: Arc<Mutex<ReadySlot>>,
}

impl Future for ReadyFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Ok(mut slot) = self.slot.lock() else {
            return Poll::Ready(Err(ViewerError::NotReady));
        };
        match slot.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

// ---------------------------------------------------------------------------
//  Viewer
// ---------------------------------------------------------------------------

pub struct Viewer {
    options: ViewerOptions,
    registry: TextureRegistry,
    image: Option<ResourceId>,
    depth: Option<ResourceId>,
    depth_use_alpha: bool,
    image_error: Option<ViewerError>,
    depth_error: Option<ViewerError>,

    renderer: Option<Renderer>,
    renderer_error: Option<ViewerError>,

    container: SizeF,
    pixel_ratio: f32,
    flags: DirtyFlags,
    viewport: Viewport,
    image_target: Option<RgbaImage>,
    depth_target: Option<GrayImage>,
    kernels: KernelCache<KernelVariant>,
    variant: Option<KernelVariant>,
    params: KernelParams,

    quality: QualityController,
    motion: OffsetDriver,
    frame: Option<RgbaImage>,

    started: Instant,
    /// Tick time in seconds, as passed to `tick`.
    clock: f64,
    last_composite: Option<f64>,
    waiters: Vec<Arc<Mutex<ReadySlot>>>,
}

impl Viewer {
    /// A viewer on the CPU kernels.
    pub fn new(options: ViewerOptions) -> Self {
        Self::with_renderer(options, RendererKind::Cpu)
    }

    /// A viewer on the requested backend. If the backend cannot be created the
    /// viewer is returned anyway but never becomes ready.
    pub fn with_renderer(options: ViewerOptions, kind: RendererKind) -> Self {
        let options = options.sanitized();
        let (renderer, renderer_error) = match Renderer::create(kind) {
            Ok(r) => (Some(r), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            quality: QualityController::new(&options),
            params: KernelParams {
                scale: options.kernel_scale(),
                offset: Vec2::ZERO,
                focus: options.depth_focus,
                enlarge: options.enlarge,
            },
            options,
            registry: TextureRegistry::new(),
            image: None,
            depth: None,
            depth_use_alpha: false,
            image_error: None,
            depth_error: None,
            renderer,
            renderer_error,
            container: SizeF::default(),
            pixel_ratio: 1.0,
            flags: DirtyFlags::all(),
            viewport: Viewport::default(),
            image_target: None,
            depth_target: None,
            kernels: KernelCache::new(),
            variant: None,
            motion: OffsetDriver::new(),
            frame: None,
            started: Instant::now(),
            clock: 0.0,
            last_composite: None,
            waiters: Vec::new(),
        }
    }

    // -- Slots -------------------------------------------------------------

    pub fn set_image(&mut self, source: impl Into<Option<ResourceSource>>) {
        if self.assign(Slot::Image, source.into()) {
            self.flags.merge(DirtyFlags { size: true, image: true, image_render: true, ..Default::default() });
        }
        self.settle_waiters();
    }

    /// Assign the depth map. With `use_alpha` depth is read from the inverted
    /// alpha channel instead of luminance.
    pub fn set_depthmap(&mut self, source: impl Into<Option<ResourceSource>>, use_alpha: bool) {
        let changed = self.assign(Slot::Depth, source.into());
        if changed || use_alpha != self.depth_use_alpha {
            self.depth_use_alpha = use_alpha;
            self.flags.merge(DirtyFlags { depth: true, depth_render: true, ..Default::default() });
        }
        self.settle_waiters();
    }

    /// Clear both slots and every derived artifact.
    pub fn reset(&mut self) {
        self.set_image(None);
        self.set_depthmap(None, false);
        self.image_error = None;
        self.depth_error = None;
        self.image_target = None;
        self.depth_target = None;
        self.variant = None;
        self.frame = None;
        self.last_composite = None;
        self.quality.mark_dirty();
        self.flags = DirtyFlags::all();
    }

    fn slot_id(&self, slot: Slot) -> Option<ResourceId> {
        match slot {
            Slot::Image => self.image,
            Slot::Depth => self.depth,
        }
    }

    fn slot_error_mut(&mut self, slot: Slot) -> &mut Option<ViewerError> {
        match slot {
            Slot::Image => &mut self.image_error,
            Slot::Depth => &mut self.depth_error,
        }
    }

    fn set_slot_id(&mut self, slot: Slot, id: Option<ResourceId>) {
        match slot {
            Slot::Image => self.image = id,
            Slot::Depth => self.depth = id,
        }
    }

    /// Swap the resource held by `slot`. Returns false when nothing changed.
    fn assign(&mut self, slot: Slot, source: Option<ResourceSource>) -> bool {
        let current = self.slot_id(slot);
        let key = source.as_ref().map(ResourceSource::key);
        let current_key = current.and_then(|id| self.registry.key_of(id)).cloned();
        if key == current_key {
            return false;
        }

        if let Some(old) = current {
            self.registry.dispose(old);
        }
        *self.slot_error_mut(slot) = None;

        let next = match (source, key) {
            (Some(source), Some(key)) => {
                let sibling = self.slot_id(slot.sibling());
                match sibling {
                    Some(sid) if self.registry.key_of(sid) == Some(&key) => {
                        log::debug!("[Load] {} shares the {} texture", slot, slot.sibling());
                        self.registry.share(sid)
                    }
                    _ => Some(self.registry.load(source)),
                }
            }
            _ => None,
        };
        self.set_slot_id(slot, next);

        if let Some(id) = next
            && let Some(LoadState::Failed(message)) = self.registry.get(id).map(|r| r.state.clone())
        {
            *self.slot_error_mut(slot) = Some(ViewerError::ResourceLoad { slot, message });
        }
        true
    }

    pub fn natural_size(&self, slot: Slot) -> Option<PixelSize> {
        self.slot_id(slot)
            .and_then(|id| self.registry.get(id))
            .and_then(|r| r.natural_size())
    }

    fn pixels(&self, slot: Slot) -> Option<Arc<RgbaImage>> {
        self.slot_id(slot)
            .and_then(|id| self.registry.get(id))
            .and_then(|r| r.pixels().cloned())
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn has_depthmap(&self) -> bool {
        self.depth.is_some()
    }

    pub fn depth_uses_alpha(&self) -> bool {
        self.depth_use_alpha
    }

    // -- Loading -----------------------------------------------------------

    /// Apply every finished decode. Runs even while rendering is paused.
    pub fn poll_loads(&mut self) {
        let outcomes = self.registry.poll();
        self.apply_outcomes(outcomes);
    }

    /// Block until no decode is pending or `timeout` passes. Returns true when
    /// every load finished.
    pub fn block_until_loaded(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.poll_loads();
        while self.registry.has_pending() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let outcomes = self.registry.wait(deadline - now);
            self.apply_outcomes(outcomes);
        }
        true
    }

    /// Hand a completion straight to the registry, bypassing the channel.
    #[cfg(test)]
    pub(crate) fn deliver(&mut self, completion: LoadCompletion) {
        let outcome = self.registry.deliver(completion);
        self.apply_outcomes(outcome.into_iter().collect());
    }

    #[cfg(test)]
    pub(crate) fn resource_of(&self, slot: Slot) -> Option<ResourceId> {
        self.slot_id(slot)
    }

    #[cfg(test)]
    pub(crate) fn live_resources(&self) -> usize {
        self.registry.live_count()
    }

    fn apply_outcomes(&mut self, outcomes: Vec<LoadOutcome>) {
        for outcome in outcomes {
            let id = match &outcome {
                LoadOutcome::Ready(id) | LoadOutcome::Failed(id, _) => *id,
            };
            for slot in [Slot::Image, Slot::Depth] {
                if self.slot_id(slot) != Some(id) {
                    continue;
                }
                match &outcome {
                    LoadOutcome::Ready(_) => {
                        log::info!("[Load] {} ready", slot);
                        let raised = match slot {
                            Slot::Image => DirtyFlags { size: true, image: true, image_render: true, ..Default::default() },
                            Slot::Depth => DirtyFlags { depth: true, depth_render: true, ..Default::default() },
                        };
                        self.flags.merge(raised);
                    }
                    LoadOutcome::Failed(_, message) => {
                        *self.slot_error_mut(slot) = Some(ViewerError::ResourceLoad { slot, message: message.clone() });
                    }
                }
            }
        }
        self.settle_waiters();
    }

    // -- Readiness ---------------------------------------------------------

    /// Image loaded, depth loaded or absent, renderer available.
    pub fn is_ready(&self) -> bool {
        self.renderer.is_some()
            && self.image.is_some_and(|id| self.registry.is_ready(id))
            && self.depth.is_none_or(|id| self.registry.is_ready(id))
    }

    pub fn when_ready(&mut self) -> ReadyFuture {
        let slot = Arc::new(Mutex::new(ReadySlot::default()));
        self.waiters.push(slot.clone());
        self.settle_waiters();
        ReadyFuture { slot }
    }

    /// The image slot's load error, else the depth slot's.
    pub fn load_error(&self) -> Option<&ViewerError> {
        self.image_error.as_ref().or(self.depth_error.as_ref())
    }

    pub fn renderer_error(&self) -> Option<&ViewerError> {
        self.renderer_error.as_ref()
    }

    fn readiness(&self) -> Option<Result<()>> {
        if let Some(e) = &self.renderer_error {
            return Some(Err(e.clone()));
        }
        if self.image.is_none() {
            return Some(Err(ViewerError::NoImage));
        }
        if let Some(e) = self.load_error() {
            return Some(Err(e.clone()));
        }
        self.is_ready().then_some(Ok(()))
    }

    fn settle_waiters(&mut self) {
        if self.waiters.is_empty() {
            return;
        }
        let Some(outcome) = self.readiness() else {
            return;
        };
        for waiter in self.waiters.drain(..) {
            if let Ok(mut slot) = waiter.lock() {
                slot.outcome = Some(outcome.clone());
                if let Some(waker) = slot.waker.take() {
                    waker.wake();
                }
            }
        }
    }

    // -- Options and input -------------------------------------------------

    pub fn options(&self) -> &ViewerOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ViewerOptions) {
        let next = options.sanitized();
        let mut raised = self.options.invalidation(&next);

        if (next.quality_min, next.quality_max) != (self.options.quality_min, self.options.quality_max)
            && self.quality.set_bounds(next.quality_min, next.quality_max)
        {
            raised.stage = true;
        }
        if next.quality != self.options.quality {
            self.quality.mark_dirty();
        }
        if next.pause_render != self.options.pause_render {
            self.last_composite = None;
        }

        self.options = next;
        self.flags.merge(raised);
    }

    /// Overlay a partial JSON object on the current options.
    pub fn update_options(&mut self, patch: &serde_json::Value) -> Result<()> {
        let next = self.options.merged(patch)?;
        self.set_options(next);
        Ok(())
    }

    /// Container size in logical pixels and the device pixel ratio.
    pub fn set_container(&mut self, size: SizeF, pixel_ratio: f32) {
        let ratio = if pixel_ratio.is_finite() && pixel_ratio > 0.0 { pixel_ratio } else { 1.0 };
        if size != self.container || ratio != self.pixel_ratio {
            self.container = size;
            self.pixel_ratio = ratio;
            self.flags.size = true;
        }
    }

    /// Target offset, roughly -1..1 per axis. Eased towards unless animating.
    /// Components are clamped to `±MAX_OFFSET`; NaN becomes 0.
    pub fn set_offset(&mut self, offset: Vec2) {
        let bound = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(-MAX_OFFSET, MAX_OFFSET) };
        self.motion.set_target(Vec2::new(bound(offset.x), bound(offset.y)));
    }

    pub fn offset(&self) -> Vec2 {
        self.motion.target()
    }

    /// Quality level in use: the forced level, else the controller's.
    pub fn quality(&self) -> u8 {
        self.quality.effective(self.options.quality)
    }

    pub fn quality_controller(&self) -> &QualityController {
        &self.quality
    }

    /// Time of the last tick in seconds.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn kernel(&self) -> Option<&KernelVariant> {
        self.variant.as_ref()
    }

    pub fn kernel_params(&self) -> KernelParams {
        self.params
    }

    /// Last composited frame.
    pub fn frame(&self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }

    pub fn renderer_kind(&self) -> Option<RendererKind> {
        self.renderer.as_ref().map(Renderer::kind)
    }

    pub(crate) fn renderer_mut(&mut self) -> Result<&mut Renderer> {
        match self.renderer.as_mut() {
            Some(r) => Ok(r),
            None => Err(self
                .renderer_error
                .clone()
                .unwrap_or_else(|| ViewerError::RendererUnavailable("not created".into()))),
        }
    }

    /// Decoded sources for an off-screen render. Fails unless ready.
    pub(crate) fn export_sources(&self) -> Result<(Arc<RgbaImage>, Option<Arc<RgbaImage>>)> {
        if let Some(e) = &self.renderer_error {
            return Err(e.clone());
        }
        if self.image.is_none() {
            return Err(ViewerError::NoImage);
        }
        if let Some(e) = self.load_error() {
            return Err(e.clone());
        }
        if !self.is_ready() {
            return Err(ViewerError::NotReady);
        }
        let image = self.pixels(Slot::Image).ok_or(ViewerError::NotReady)?;
        Ok((image, self.pixels(Slot::Depth)))
    }

    // -- Tick --------------------------------------------------------------

    /// Run one frame at `now` seconds. Loads are always polled; the ordered
    /// pass runs only when ready and not paused.
    pub fn tick(&mut self, now: f64) -> PassReport {
        self.poll_loads();
        if self.options.pause_render {
            self.last_composite = None;
            return PassReport::default();
        }
        if !self.is_ready() {
            return PassReport::default();
        }
        self.clock = now;
        let mut flags = std::mem::take(&mut self.flags);
        let force = self.options.always_render;
        let report = run_pass(&mut flags, self, force);
        self.flags.merge(flags);
        report
    }

    /// `tick` against the viewer's own monotonic clock.
    pub fn tick_now(&mut self) -> PassReport {
        let now = self.started.elapsed().as_secs_f64();
        self.tick(now)
    }

    fn sample_quality(&mut self) {
        let previous = self.last_composite.replace(self.clock);
        if self.options.quality.is_some() || self.depth.is_none() || !self.quality.wants_sample() {
            return;
        }
        let frame_ms = previous.map(|t| ((self.clock - t) * 1000.0) as f32);
        match self.quality.sample(frame_ms, self.viewport.size.area()) {
            // The window fills only while frames keep coming.
            QualityOutcome::Measuring => self.flags.composite = true,
            outcome if outcome.needs_stage() => self.flags.stage = true,
            _ => {}
        }
    }
}

impl StagePipeline for Viewer {
    fn update_size(&mut self) -> DirtyFlags {
        let natural = self.natural_size(Slot::Image);
        let viewport = stage::compute_viewport(&self.options, self.container, self.pixel_ratio, natural);
        if viewport == self.viewport {
            return DirtyFlags::default();
        }
        log::debug!(
            "[Stage] viewport {}x{} ({:.0}x{:.0} css)",
            viewport.size.width,
            viewport.size.height,
            viewport.css.width,
            viewport.css.height
        );
        self.viewport = viewport;
        if let Some(r) = self.renderer.as_mut() {
            r.trim();
        }
        DirtyFlags { image: true, depth: true, ..Default::default() }
    }

    fn update_image_target(&mut self) -> DirtyFlags {
        DirtyFlags { image_render: true, stage: true, ..Default::default() }
    }

    fn render_image_target(&mut self) -> DirtyFlags {
        let size = self.viewport.size;
        self.image_target = match self.pixels(Slot::Image) {
            Some(src) if !size.is_empty() => Some(stage::fit_cover(&src, size)),
            _ => None,
        };
        DirtyFlags { composite: true, ..Default::default() }
    }

    fn update_depth_target(&mut self) -> DirtyFlags {
        DirtyFlags { depth_render: true, stage: true, ..Default::default() }
    }

    fn render_depth_target(&mut self) -> DirtyFlags {
        let size = self.viewport.size;
        self.depth_target = match self.pixels(Slot::Depth) {
            Some(src) if !size.is_empty() => Some(stage::depth_target(
                &src,
                size,
                self.depth_use_alpha,
                self.options.depth_blur_size,
            )),
            _ => None,
        };
        DirtyFlags { composite: true, ..Default::default() }
    }

    fn update_stage(&mut self) -> DirtyFlags {
        self.quality.mark_dirty();
        self.variant = if self.image_target.is_some() && self.depth_target.is_some() {
            let level = self.quality.effective(self.options.quality);
            let variant = *self.kernels.acquire(level, |l| KernelVariant::for_quality(Some(l)));
            log::debug!("[Stage] quality {} ({} steps)", level, variant.steps());
            Some(variant)
        } else {
            None
        };
        DirtyFlags { filter_params: true, composite: true, ..Default::default() }
    }

    fn update_filter_params(&mut self) -> DirtyFlags {
        self.params = KernelParams {
            scale: self.options.kernel_scale(),
            offset: self.motion.current(),
            focus: self.options.depth_focus,
            enlarge: self.options.enlarge,
        };
        DirtyFlags { composite: true, ..Default::default() }
    }

    fn update_motion(&mut self) -> DirtyFlags {
        if self.motion.advance(&self.options, self.clock) {
            self.params.offset = self.motion.current();
            DirtyFlags { composite: true, ..Default::default() }
        } else {
            DirtyFlags::default()
        }
    }

    fn has_depth(&self) -> bool {
        self.depth_target.is_some()
    }

    fn composite(&mut self) {
        let Some(image) = self.image_target.as_ref() else {
            self.frame = None;
            return;
        };
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let frame = match (&self.variant, &self.depth_target) {
            (Some(variant), Some(depth)) => {
                let mut frame = renderer.composite(variant, image, depth, &self.params);
                apply_depth_preview(&mut frame, depth, self.options.depth_preview);
                frame
            }
            _ => image.clone(),
        };
        self.frame = Some(frame);
        self.sample_quality();
    }
}
