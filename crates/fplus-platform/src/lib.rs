// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use std::time::{Duration, Instant};

/// Produces per-frame delta time and a once-a-second frame count.
#[derive(Debug)]
pub struct FrameClock {
    last: Instant,
    max_step: Duration,
    window_start: Instant,
    frames_in_window: u32,
}

impl FrameClock {
    /// Deltas above this are clamped, so a stall (window drag, breakpoint)
    /// does not teleport animated state.
    pub const DEFAULT_MAX_STEP: Duration = Duration::from_millis(250);

    pub fn new(now: Instant) -> Self {
        Self {
            last: now,
            max_step: Self::DEFAULT_MAX_STEP,
            window_start: now,
            frames_in_window: 0,
        }
    }

    pub fn with_max_step(mut self, max_step: Duration) -> Self {
        self.max_step = max_step;
        self
    }

    /// Seconds since the previous tick.
    pub fn tick(&mut self, now: Instant) -> f32 {
        let dt = now.saturating_duration_since(self.last).min(self.max_step);
        self.last = now;
        dt.as_secs_f32()
    }

    /// Counts a presented frame; returns the frame count once per elapsed second.
    pub fn count_frame(&mut self, now: Instant) -> Option<u32> {
        self.frames_in_window = self.frames_in_window.saturating_add(1);
        if now.saturating_duration_since(self.window_start) >= Duration::from_secs(1) {
            let fps = self.frames_in_window;
            self.frames_in_window = 0;
            self.window_start = now;
            tracing::debug!("fps ~ {fps}");
            return Some(fps);
        }
        None
    }

    /// Drops accumulated time, used after a pause so the next delta starts at zero.
    pub fn reset(&mut self, now: Instant) {
        self.last = now;
        self.window_start = now;
        self.frames_in_window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_reports_elapsed_seconds() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(t0);
        let dt = clock.tick(t0 + Duration::from_millis(16));
        assert!((dt - 0.016).abs() < 1e-6);
    }

    #[test]
    fn tick_clamps_long_stalls() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(t0).with_max_step(Duration::from_millis(100));
        assert!((clock.tick(t0 + Duration::from_secs(3)) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn fps_is_reported_once_per_second() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(t0);
        for i in 1..60u64 {
            assert_eq!(clock.count_frame(t0 + Duration::from_millis(i * 10)), None);
        }
        assert_eq!(clock.count_frame(t0 + Duration::from_millis(1000)), Some(60));
        assert_eq!(clock.count_frame(t0 + Duration::from_millis(1010)), None);
    }
}
