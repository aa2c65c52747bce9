use rand::Rng as _;
use tracing::warn;

const MIN_RATE: i32 = 0;
const MAX_RATE: i32 = 100;

/// Probabilistic admission gate for metrics.
///
/// A metric is admitted with a probability of `rate / 100`, using an independent uniform draw for every call.
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    rate: u8,
}

impl Sampler {
    /// Creates a sampler with the given rate, as a percentage.
    ///
    /// Rates outside of `[0, 100]` are clamped into range.
    pub fn new(rate: i32) -> Self {
        let clamped = rate.clamp(MIN_RATE, MAX_RATE);
        if clamped != rate {
            warn!(rate, clamped, "Sample rate out of range, clamping.");
        }

        Sampler { rate: clamped as u8 }
    }

    /// Returns the effective sample rate.
    pub fn rate(&self) -> u8 {
        self.rate
    }

    /// Returns `true` if the metric should be emitted.
    pub fn admit(&self) -> bool {
        match self.rate {
            0 => false,
            100 => true,
            rate => rand::rng().random_range(0..100u8) < rate,
        }
    }
}
