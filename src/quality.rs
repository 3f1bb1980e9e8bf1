// ============================================================================
// ADAPTIVE QUALITY - frame-time driven selection of the kernel profile
// ============================================================================
//
// The controller watches a window of frame timings after every stage rebuild.
// Once it has seen enough frames it either steps the level down, steps it up,
// or re-arms at the same level, and then stays quiet until the next rebuild
// resets the window. A level that was too slow at some viewport area is never
// re-entered by an upgrade at that area or larger.

use std::collections::BTreeMap;

use crate::options::ViewerOptions;

const SLOW_FPS: f32 = 10.0;
const FAST_FPS: f32 = 58.0;
const SLOW_LIMIT: u32 = 5;
const DOWNGRADE_MIN_SAMPLES: u32 = 15;
const UPGRADE_MIN_SAMPLES: u32 = 40;
const REARM_SAMPLES: u32 = 60;

/// Result of feeding one frame to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QualityOutcome {
    /// Window already decided; nothing sampled.
    Idle,
    /// Frame recorded, keep rendering to gather more.
    Measuring,
    /// Level changed; the stage must be rebuilt.
    Changed { from: u8, to: u8 },
    /// Same level kept; the stage is rebuilt to start a fresh window.
    Rearmed(u8),
    /// Upgrade refused because the level is proven slow at this area.
    Suppressed { level: u8, proven_area: u64 },
}

impl QualityOutcome {
    pub fn needs_stage(&self) -> bool {
        matches!(self, QualityOutcome::Changed { .. } | QualityOutcome::Rearmed(_))
    }
}

#[derive(Clone, Debug)]
pub struct QualityController {
    current: u8,
    min: u8,
    max: u8,
    dirty: bool,
    measured: bool,
    count: u32,
    slow: u32,
    fast: u32,
    sum: f32,
    avg: f32,
    proven_slow: BTreeMap<u8, u64>,
}

impl QualityController {
    pub fn new(options: &ViewerOptions) -> Self {
        Self {
            current: options.quality_start,
            min: options.quality_min,
            max: options.quality_max,
            dirty: true,
            measured: false,
            count: 0,
            slow: 0,
            fast: 0,
            sum: 0.0,
            avg: 0.0,
            proven_slow: BTreeMap::new(),
        }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// The level the stage should use, honouring a forced level.
    pub fn effective(&self, forced: Option<u8>) -> u8 {
        forced.unwrap_or(self.current)
    }

    pub fn proven_slow(&self, level: u8) -> Option<u64> {
        self.proven_slow.get(&level).copied()
    }

    pub fn average_fps(&self) -> f32 {
        self.avg
    }

    pub fn is_measured(&self) -> bool {
        self.measured
    }

    /// Start a fresh window at the next sample.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn wants_sample(&self) -> bool {
        self.dirty || !self.measured
    }

    /// Apply new bounds. Returns true when the current level had to move.
    pub fn set_bounds(&mut self, min: u8, max: u8) -> bool {
        self.min = min;
        self.max = max.max(min);
        let clamped = self.current.clamp(self.min, self.max);
        let moved = clamped != self.current;
        self.current = clamped;
        moved
    }

    /// Feed one frame. `frame_ms` is `None` for the first frame after a pause
    /// or reset, which has no meaningful duration.
    pub fn sample(&mut self, frame_ms: Option<f32>, area: u64) -> QualityOutcome {
        if !self.wants_sample() {
            return QualityOutcome::Idle;
        }
        if self.dirty {
            self.count = 0;
            self.slow = 0;
            self.fast = 0;
            self.sum = 0.0;
            self.avg = 0.0;
            self.measured = false;
            self.dirty = false;
        }
        let Some(ms) = frame_ms.filter(|ms| *ms > 0.0) else {
            return QualityOutcome::Measuring;
        };

        let fps = 1000.0 / ms;
        self.count += 1;
        self.sum += fps;
        self.avg = self.sum / self.count as f32;
        if fps < SLOW_FPS {
            self.slow += 1;
        } else if fps > FAST_FPS {
            self.fast += 1;
        }

        let floor = if self.current > 4 { 55.0 } else { 25.0 };
        let ceiling = if self.current > 3 { 55.0 } else { 50.0 };

        if self.slow > SLOW_LIMIT || (self.count > DOWNGRADE_MIN_SAMPLES && self.avg < floor) {
            self.proven_slow.insert(self.current, area);
            log::info!(
                "[Quality] level {} too slow at {} px ({:.1} fps avg)",
                self.current,
                area,
                self.avg
            );
            self.change(self.current as i32 - 1, area)
        } else if self.count > UPGRADE_MIN_SAMPLES && self.avg > ceiling {
            self.change(self.current as i32 + 1, area)
        } else if self.count > REARM_SAMPLES {
            self.change(self.current as i32, area)
        } else {
            QualityOutcome::Measuring
        }
    }

    fn change(&mut self, requested: i32, area: u64) -> QualityOutcome {
        self.measured = true;
        let q = requested.clamp(self.min as i32, self.max as i32) as u8;

        if q > self.current
            && let Some(proven) = self.proven_slow(q)
            && area >= proven
        {
            log::debug!("[Quality] level {} proven slow at {} px >= {}", q, area, proven);
            return QualityOutcome::Suppressed { level: q, proven_area: proven };
        }

        let from = self.current;
        self.current = q;
        if q == from {
            QualityOutcome::Rearmed(q)
        } else {
            log::info!("[Quality] {} -> {} at {:.1} fps", from, q, self.avg);
            QualityOutcome::Changed { from, to: q }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AREA: u64 = 800 * 600;

    fn controller(start: u8) -> QualityController {
        QualityController::new(&ViewerOptions { quality_start: start, ..Default::default() })
    }

    fn feed(c: &mut QualityController, ms: f32, n: usize, area: u64) -> Vec<QualityOutcome> {
        (0..n).map(|_| c.sample(Some(ms), area)).collect()
    }

    #[test]
    fn sustained_low_fps_drops_exactly_one_level() {
        let mut c = controller(4);
        let outcomes = feed(&mut c, 200.0, 20, AREA);
        let changes: Vec<_> = outcomes.iter().filter(|o| o.needs_stage()).collect();
        assert_eq!(changes, vec![&QualityOutcome::Changed { from: 4, to: 3 }]);
        assert_eq!(c.current(), 3);
        assert_eq!(c.proven_slow(4), Some(AREA));
    }

    #[test]
    fn mediocre_average_downgrades_after_the_window() {
        let mut c = controller(3);
        // 20 fps: never "slow", but below 25 on average.
        let outcomes = feed(&mut c, 50.0, 16, AREA);
        assert_eq!(outcomes[14], QualityOutcome::Measuring);
        assert_eq!(outcomes[15], QualityOutcome::Changed { from: 3, to: 2 });
    }

    #[test]
    fn fast_frames_upgrade_after_forty_samples() {
        let mut c = controller(3);
        let outcomes = feed(&mut c, 10.0, 41, AREA);
        assert_eq!(outcomes[39], QualityOutcome::Measuring);
        assert_eq!(outcomes[40], QualityOutcome::Changed { from: 3, to: 4 });
    }

    #[test]
    fn proven_slow_level_is_not_reentered_at_same_area() {
        let mut c = controller(4);
        feed(&mut c, 200.0, 6, AREA);
        assert_eq!(c.current(), 3);

        c.mark_dirty();
        let outcomes = feed(&mut c, 10.0, 41, AREA);
        assert_eq!(
            outcomes[40],
            QualityOutcome::Suppressed { level: 4, proven_area: AREA }
        );
        assert_eq!(c.current(), 3);
        assert_eq!(c.sample(Some(10.0), AREA), QualityOutcome::Idle);
    }

    #[test]
    fn proven_slow_level_is_allowed_on_smaller_viewports() {
        let mut c = controller(4);
        feed(&mut c, 200.0, 6, AREA);
        c.mark_dirty();
        let outcomes = feed(&mut c, 10.0, 41, AREA - 1);
        assert_eq!(outcomes[40], QualityOutcome::Changed { from: 3, to: 4 });
    }

    #[test]
    fn neutral_window_rearms() {
        let mut c = controller(2);
        // 40 fps: not fast enough to upgrade, not slow enough to drop.
        let outcomes = feed(&mut c, 25.0, 61, AREA);
        assert_eq!(outcomes[60], QualityOutcome::Rearmed(2));
        assert!(c.is_measured());
    }

    #[test]
    fn levels_stay_within_bounds() {
        let mut c = QualityController::new(&ViewerOptions {
            quality_min: 2,
            quality_max: 3,
            quality_start: 2,
            ..Default::default()
        });
        let outcomes = feed(&mut c, 200.0, 6, AREA);
        assert_eq!(outcomes[5], QualityOutcome::Rearmed(2));
        assert_eq!(c.current(), 2);

        c.mark_dirty();
        feed(&mut c, 5.0, 41, AREA);
        assert_eq!(c.current(), 3);
        c.mark_dirty();
        feed(&mut c, 5.0, 41, AREA);
        assert_eq!(c.current(), 3);
    }

    #[test]
    fn first_frame_after_reset_is_not_sampled() {
        let mut c = controller(4);
        assert_eq!(c.sample(None, AREA), QualityOutcome::Measuring);
        assert_eq!(c.average_fps(), 0.0);
        assert!(c.wants_sample());
    }

    #[test]
    fn forced_level_wins() {
        let c = controller(4);
        assert_eq!(c.effective(Some(2)), 2);
        assert_eq!(c.effective(None), 4);
    }
}
