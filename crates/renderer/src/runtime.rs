use std::time::Instant;

/// Where the interactive preview takes `iTime` from.
///
/// Offline renders never use a clock; their time comes from the frame
/// sequence so output is independent of how long frames take.
pub trait PreviewClock: Send {
    /// Restarts from zero, e.g. after a new shader was activated.
    fn reset(&mut self);
    /// Seconds to feed `iTime` for the frame about to be drawn.
    fn sample(&self) -> f32;
}

/// Seconds elapsed on the monotonic clock since the last reset.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
}

impl Default for WallClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl PreviewClock for WallClock {
    fn reset(&mut self) {
        self.origin = Instant::now();
    }

    fn sample(&self) -> f32 {
        self.origin.elapsed().as_secs_f32()
    }
}

/// `--time` pins the preview to one instant; resets have nothing to restart.
#[derive(Debug, Clone, Copy)]
pub struct FrozenClock(pub f32);

impl PreviewClock for FrozenClock {
    fn reset(&mut self) {}

    fn sample(&self) -> f32 {
        self.0
    }
}

pub fn clock_for(frozen_time: Option<f32>) -> Box<dyn PreviewClock> {
    match frozen_time {
        Some(time) => Box::new(FrozenClock(time)),
        None => Box::new(WallClock::default()),
    }
}
