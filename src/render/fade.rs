//! Linear start/stop fade envelope.

/// Fade ramp duration in seconds.
const FADE_SECONDS: f64 = 1.0;

/// A linear amplitude ramp toward a binary target.
///
/// The target is 0.0 or 1.0 (set by stop()/start()); the actual amplitude
/// moves toward it at a fixed rate of one full swing per second, computed in
/// samples at the negotiated rate. Once the remaining sample count reaches
/// zero the amplitude snaps exactly to the target, so a settled fade-out is
/// bit-exact silence.
#[derive(Debug)]
pub(crate) struct FadeRamp {
    amplitude: f64,
    target: f64,
    /// Amplitude change per sample; one full swing takes `FADE_SECONDS`.
    step: f64,
    /// Samples until the amplitude reaches the target.
    remaining: u64,
}

impl FadeRamp {
    pub(crate) fn new(sample_rate: u32) -> Self {
        let mut ramp = Self {
            amplitude: 0.0,
            target: 0.0,
            step: 0.0,
            remaining: 0,
        };
        ramp.set_sample_rate(sample_rate);
        ramp
    }

    /// Recomputes the per-sample step for a new negotiated rate.
    ///
    /// The amplitude itself is preserved so a reopen mid-fade continues
    /// from where it left off.
    pub(crate) fn set_sample_rate(&mut self, sample_rate: u32) {
        self.step = 1.0 / (FADE_SECONDS * f64::from(sample_rate.max(1)));
        self.retarget(self.target);
    }

    /// Sets the fade target (0.0 or 1.0) and recomputes the remaining ramp.
    pub(crate) fn retarget(&mut self, target: f64) {
        self.target = target;
        let distance = (self.target - self.amplitude).abs();
        self.remaining = (distance / self.step).ceil() as u64;
    }

    /// Advances one sample and returns the amplitude to apply.
    #[inline]
    pub(crate) fn next_amplitude(&mut self) -> f64 {
        if self.remaining == 0 {
            self.amplitude = self.target;
            return self.amplitude;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            self.amplitude = self.target;
        } else if self.target > self.amplitude {
            self.amplitude += self.step;
        } else {
            self.amplitude -= self.step;
        }
        self.amplitude
    }

    /// True when the ramp has settled at exact zero.
    ///
    /// The render pipeline uses this to short-circuit into an exact
    /// zero-fill instead of synthesizing inaudible noise.
    pub(crate) fn is_silent(&self) -> bool {
        self.remaining == 0 && self.target == 0.0
    }

    #[cfg(test)]
    pub(crate) fn amplitude(&self) -> f64 {
        self.amplitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48_000;

    #[test]
    fn test_fade_in_reaches_one_in_one_second() {
        let mut ramp = FadeRamp::new(RATE);
        ramp.retarget(1.0);

        // t=0: amplitude starts near zero
        let first = ramp.next_amplitude();
        assert!(first < 0.001, "first amplitude {first} should be ~0");

        let mut previous = first;
        for _ in 1..RATE {
            let amp = ramp.next_amplitude();
            assert!(amp >= previous, "fade-in must be non-decreasing");
            previous = amp;
        }
        assert!((ramp.amplitude() - 1.0).abs() < 1e-9, "settled at exactly 1.0");
    }

    #[test]
    fn test_fade_out_mirrors_fade_in() {
        let mut ramp = FadeRamp::new(RATE);
        ramp.retarget(1.0);
        for _ in 0..RATE {
            ramp.next_amplitude();
        }

        ramp.retarget(0.0);
        let mut previous = ramp.next_amplitude();
        for _ in 1..RATE {
            let amp = ramp.next_amplitude();
            assert!(amp <= previous, "fade-out must be non-increasing");
            previous = amp;
        }
        assert_eq!(ramp.amplitude(), 0.0, "snaps to exact zero");
        assert!(ramp.is_silent());
    }

    #[test]
    fn test_interrupted_fade_takes_proportional_time() {
        let mut ramp = FadeRamp::new(RATE);
        ramp.retarget(1.0);
        // Half a second in, amplitude ~0.5
        for _ in 0..RATE / 2 {
            ramp.next_amplitude();
        }
        assert!((ramp.amplitude() - 0.5).abs() < 0.01);

        // Fading back out from 0.5 takes ~half a second
        ramp.retarget(0.0);
        for _ in 0..RATE / 2 {
            ramp.next_amplitude();
        }
        assert!(ramp.is_silent());
    }

    #[test]
    fn test_rate_change_preserves_amplitude() {
        let mut ramp = FadeRamp::new(RATE);
        ramp.retarget(1.0);
        for _ in 0..RATE / 4 {
            ramp.next_amplitude();
        }
        let before = ramp.amplitude();

        ramp.set_sample_rate(44_100);
        assert_eq!(ramp.amplitude(), before);
        assert!(!ramp.is_silent());
    }
}
