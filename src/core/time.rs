//! Frame timing utilities

use std::time::{Duration, Instant};

/// Upper bound on a single frame delta fed to edit kernels.
///
/// A stalled frame (debugger, window drag) would otherwise stamp a huge
/// amount of material in one edit.
pub const MAX_FRAME_DELTA: Duration = Duration::from_millis(100);

/// Tracks frame timing for the edit loop
pub struct FrameTimer {
    last_frame: Instant,
    delta: Duration,
    frame_count: u64,
}

impl FrameTimer {
    /// Create a new frame timer
    pub fn new() -> Self {
        Self {
            last_frame: Instant::now(),
            delta: Duration::ZERO,
            frame_count: 0,
        }
    }

    /// Call once per frame to update timing
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = (now - self.last_frame).min(MAX_FRAME_DELTA);
        self.last_frame = now;
        self.frame_count += 1;
    }

    /// Get delta time in seconds (clamped to [`MAX_FRAME_DELTA`])
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Get delta time as Duration
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Get total frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}
