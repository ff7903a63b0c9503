use std::time::Duration;

pub const MIN_MULTIPLIER: f64 = 1.0;
pub const MAX_MULTIPLIER: f64 = 3.0;
/// Added to the multiplier after a timeout.
pub const STEP_UP: f64 = 1.0;
/// Taken off the multiplier after a successful fetch.
pub const STEP_DOWN: f64 = 0.25;

/// Per-worker timeout multiplier, kept within `[MIN_MULTIPLIER, MAX_MULTIPLIER]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveWait {
    base: Duration,
    multiplier: f64,
}

impl AdaptiveWait {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            multiplier: MIN_MULTIPLIER,
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn at_ceiling(&self) -> bool {
        self.multiplier >= MAX_MULTIPLIER
    }

    /// Timeout to hand to the next fetch.
    pub fn timeout(&self) -> Duration {
        self.base.mul_f64(self.multiplier)
    }

    pub fn on_success(&mut self) {
        self.multiplier = (self.multiplier - STEP_DOWN).max(MIN_MULTIPLIER);
    }

    /// Raises the multiplier. Returns `false` when it was already at the ceiling,
    /// i.e. there is no longer wait to retry with.
    pub fn on_timeout(&mut self) -> bool {
        if self.at_ceiling() {
            return false;
        }
        self.multiplier = (self.multiplier + STEP_UP).min(MAX_MULTIPLIER);
        true
    }
}
