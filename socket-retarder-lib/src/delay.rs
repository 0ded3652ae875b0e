#![forbid(unsafe_code)]

use rand::{rng, Rng};

use crate::config::Distribution;

/// Number of uniform draws averaged to approximate a normal distribution.
const NORMAL_ROUNDS: u32 = 8;

/// Upper bound applied to every sampled delay. A distribution configured with
/// an absurd mean must not freeze application traffic for minutes.
pub const MAX_DELAY_MS: i64 = 300_000;

/// Draws millisecond delays from the configured distribution.
///
/// Samples may be zero or negative; callers skip the sleep entirely when the
/// sample is not positive.
#[derive(Debug, Clone, Copy)]
pub struct DelaySampler {
    distribution: Distribution,
}

impl DelaySampler {
    pub fn new(distribution: Distribution) -> Self {
        Self { distribution }
    }

    pub fn sample(&self) -> i64 {
        let mut rng = rng();
        let ms = match self.distribution {
            Distribution::Normal { mean_ms, variance_ms } => {
                let mut acc = 0.0;
                for _ in 0..NORMAL_ROUNDS {
                    acc += rng.random::<f64>() * variance_ms as f64;
                }
                let centered = acc / f64::from(NORMAL_ROUNDS);
                (mean_ms as f64 - variance_ms as f64 / 2.0 + centered) as i64
            }
            Distribution::Uniform { lower_ms, upper_ms } => {
                let span = (upper_ms - lower_ms) as f64;
                lower_ms + (rng.random::<f64>() * span) as i64
            }
        };
        ms.min(MAX_DELAY_MS)
    }
}
