//! Pink noise source: white noise through a 7-term recursive filter.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// One channel of pink noise.
///
/// White noise is shaped by seven recursive one-pole terms with fixed
/// coefficients (Paul Kellett's economy filter), approximating a
/// -10 dB/decade pink spectrum well enough for masking use. Each channel
/// owns an independent generator so left and right are uncorrelated.
#[derive(Debug)]
pub(crate) struct PinkNoise {
    rng: SmallRng,
    b: [f64; 7],
}

impl PinkNoise {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            b: [0.0; 7],
        }
    }

    /// Returns the next pink sample, roughly within [-1, 1].
    #[inline]
    pub(crate) fn next_sample(&mut self) -> f64 {
        let white: f64 = self.rng.gen_range(-1.0..1.0);
        let b = &mut self.b;

        b[0] = 0.99886 * b[0] + white * 0.0555179;
        b[1] = 0.99332 * b[1] + white * 0.0750759;
        b[2] = 0.96900 * b[2] + white * 0.1538520;
        b[3] = 0.86650 * b[3] + white * 0.3104856;
        b[4] = 0.55000 * b[4] + white * 0.5329522;
        b[5] = -0.7616 * b[5] - white * 0.0168980;

        let pink = b.iter().sum::<f64>() + white * 0.5362;
        b[6] = white * 0.115926;

        // The filter sum peaks around +-5; normalize back toward [-1, 1].
        pink * 0.11
    }
}
