// ============================================================================
// OFFSET DRIVER - eased pointer offset and autonomous Lissajous animation
// ============================================================================

use std::f32::consts::TAU;

use crate::geometry::Vec2;
use crate::options::ViewerOptions;

const SNAP_EPSILON: f32 = 0.0001;

/// Produces the offset fed to the kernel each frame.
#[derive(Clone, Debug, Default)]
pub struct OffsetDriver {
    target: Vec2,
    eased: Vec2,
    /// Offset handed to the kernel on the last advance.
    output: Vec2,
}

impl OffsetDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the offset the eased value moves towards.
    pub fn set_target(&mut self, offset: Vec2) {
        self.target = offset;
    }

    pub fn target(&self) -> Vec2 {
        self.target
    }

    /// Offset the kernel should use.
    pub fn current(&self) -> Vec2 {
        self.output
    }

    /// Advance one frame. `clock_seconds` is wall time used when no explicit
    /// animation position is set. Returns true when the kernel offset moved.
    pub fn advance(&mut self, options: &ViewerOptions, clock_seconds: f64) -> bool {
        self.ease(options);
        let next = if options.animate {
            animation_offset(options, clock_seconds)
        } else {
            self.eased
        };
        let moved = next != self.output;
        self.output = next;
        moved
    }

    fn ease(&mut self, options: &ViewerOptions) {
        if self.eased == self.target {
            return;
        }
        let k = options.ease_factor;
        if k > 0.0 && !options.animate {
            self.eased = Vec2::new(
                self.eased.x * k + self.target.x * (1.0 - k),
                self.eased.y * k + self.target.y * (1.0 - k),
            );
            if (self.eased.x - self.target.x).abs() < SNAP_EPSILON
                && (self.eased.y - self.target.y).abs() < SNAP_EPSILON
            {
                self.eased = self.target;
            }
        } else {
            self.eased = self.target;
        }
    }
}

/// Position on the animation loop. `animatePosition` in [0, 1] pins the phase.
pub fn animation_offset(options: &ViewerOptions, clock_seconds: f64) -> Vec2 {
    let duration = options.animate_duration;
    let t = match options.animate_position {
        Some(p) => p * duration,
        None => (clock_seconds % duration as f64) as f32,
    };
    let phase = t * TAU / duration;
    Vec2::new(
        phase.sin() * options.animate_scale.x,
        phase.cos() * options.animate_scale.y,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn still() -> ViewerOptions {
        ViewerOptions { animate: false, ..Default::default() }
    }

    #[test]
    fn easing_converges_and_snaps() {
        let opts = still();
        let mut d = OffsetDriver::new();
        d.set_target(Vec2::new(1.0, -1.0));
        assert!(d.advance(&opts, 0.0));
        let first = d.current();
        assert!((first.x - 0.6).abs() < 1e-6);
        assert!((first.y + 0.6).abs() < 1e-6);

        for _ in 0..64 {
            d.advance(&opts, 0.0);
        }
        assert_eq!(d.current(), Vec2::new(1.0, -1.0));
        assert!(!d.advance(&opts, 0.0));
    }

    #[test]
    fn zero_ease_factor_jumps() {
        let opts = ViewerOptions { ease_factor: 0.0, ..still() };
        let mut d = OffsetDriver::new();
        d.set_target(Vec2::new(0.3, 0.2));
        d.advance(&opts, 0.0);
        assert_eq!(d.current(), Vec2::new(0.3, 0.2));
    }

    #[test]
    fn animation_position_pins_the_phase() {
        let opts = ViewerOptions { animate_position: Some(0.25), ..Default::default() };
        let off = animation_offset(&opts, 123.0);
        assert!((off.x - 1.5).abs() < 1e-5);
        assert!(off.y.abs() < 1e-5);

        let start = ViewerOptions { animate_position: Some(0.0), ..Default::default() };
        assert_eq!(animation_offset(&start, 99.0), Vec2::new(0.0, 1.5));
    }

    #[test]
    fn animation_overrides_the_pointer() {
        let opts = ViewerOptions { animate_position: Some(0.0), ..Default::default() };
        let mut d = OffsetDriver::new();
        d.set_target(Vec2::new(-1.0, -1.0));
        d.advance(&opts, 0.0);
        assert_eq!(d.current(), Vec2::new(0.0, 1.5));
    }

    #[test]
    fn wall_clock_wraps_on_duration() {
        let opts = ViewerOptions::default();
        let a = animation_offset(&opts, 1.5);
        let b = animation_offset(&opts, 7.5);
        assert!((a.x - b.x).abs() < 1e-4 && (a.y - b.y).abs() < 1e-4);
    }
}
