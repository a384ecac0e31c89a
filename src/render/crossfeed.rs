//! Stereo imaging filter: crossfeed through per-channel delay lines.

use crate::controls::MAX_SEPARATION_MS;

/// Mix weight of a channel's own signal.
const OWN_GAIN: f64 = 0.55;
/// Mix weight of the delayed opposite channel.
const DELAYED_CROSS_GAIN: f64 = 0.25;
/// Mix weight of the direct (undelayed) opposite channel.
const DIRECT_CROSS_GAIN: f64 = 0.20;

/// A power-of-two circular delay line.
#[derive(Debug)]
struct DelayLine {
    samples: Vec<f64>,
    mask: usize,
    write: usize,
}

impl DelayLine {
    /// Builds a line long enough for `max_delay_samples`, rounded up to a
    /// power of two so reads wrap with a mask instead of a modulo.
    fn new(max_delay_samples: usize) -> Self {
        let len = (max_delay_samples + 1).next_power_of_two();
        Self {
            samples: vec![0.0; len],
            mask: len - 1,
            write: 0,
        }
    }

    #[inline]
    fn push(&mut self, sample: f64) {
        self.samples[self.write] = sample;
        self.write = (self.write + 1) & self.mask;
    }

    /// Reads the sample written `delay` pushes ago (0 = most recent).
    #[inline]
    fn read(&self, delay: usize) -> f64 {
        debug_assert!(delay <= self.mask);
        self.samples[(self.write + self.mask - (delay & self.mask)) & self.mask]
    }
}

/// Widens the stereo image by feeding each channel a delayed copy of the
/// opposite channel.
///
/// Output per channel = 0.55 x own + 0.25 x delayed cross + 0.20 x direct
/// cross. The delay offset is derived from a separation time in
/// milliseconds at the negotiated rate; the delay lines are sized for the
/// maximum separation so the offset can change at runtime without
/// reallocation.
#[derive(Debug)]
pub(crate) struct CrossfeedStage {
    left_line: DelayLine,
    right_line: DelayLine,
    sample_rate: u32,
}

impl CrossfeedStage {
    pub(crate) fn new(sample_rate: u32) -> Self {
        let max_delay = delay_samples(MAX_SEPARATION_MS, sample_rate);
        Self {
            left_line: DelayLine::new(max_delay),
            right_line: DelayLine::new(max_delay),
            sample_rate,
        }
    }

    /// Resizes the delay lines for a new negotiated rate.
    ///
    /// History is discarded; at most 15ms of noise tail, inaudible under
    /// the reopen fade.
    pub(crate) fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate != self.sample_rate {
            *self = Self::new(sample_rate);
        }
    }

    /// Processes one stereo frame, returning the imaged (left, right).
    #[inline]
    pub(crate) fn process(&mut self, left: f64, right: f64, separation_ms: f32) -> (f64, f64) {
        let delay = delay_samples(separation_ms, self.sample_rate);
        self.left_line.push(left);
        self.right_line.push(right);

        let out_left =
            OWN_GAIN * left + DELAYED_CROSS_GAIN * self.right_line.read(delay) + DIRECT_CROSS_GAIN * right;
        let out_right =
            OWN_GAIN * right + DELAYED_CROSS_GAIN * self.left_line.read(delay) + DIRECT_CROSS_GAIN * left;
        (out_left, out_right)
    }
}

/// Converts a separation time to a whole-sample delay offset.
#[inline]
pub(crate) fn delay_samples(separation_ms: f32, sample_rate: u32) -> usize {
    (f64::from(separation_ms) / 1000.0 * f64::from(sample_rate)).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_samples_zero_separation() {
        assert_eq!(delay_samples(0.0, 48_000), 0);
    }

    #[test]
    fn test_delay_samples_max_separation_at_48k() {
        // round(0.015 * 48000) = 720
        assert_eq!(delay_samples(15.0, 48_000), 720);
    }

    #[test]
    fn test_delay_samples_default_separation() {
        // round(0.0018 * 48000) = 86
        assert_eq!(delay_samples(1.8, 48_000), 86);
    }

    #[test]
    fn test_delay_line_round_trip() {
        let mut line = DelayLine::new(720);
        for i in 0..1000 {
            line.push(f64::from(i));
        }
        // delay 0 reads the most recent push
        assert_eq!(line.read(0), 999.0);
        assert_eq!(line.read(720), 279.0);
    }

    #[test]
    fn test_crossfeed_mix_weights() {
        let mut stage = CrossfeedStage::new(48_000);
        // With zero separation the "delayed" cross tap reads the sample just
        // written, so the mix collapses to own + 0.45 x cross.
        let (left, right) = stage.process(1.0, 0.0, 0.0);
        assert!((left - OWN_GAIN).abs() < 1e-12);
        assert!((right - (DELAYED_CROSS_GAIN + DIRECT_CROSS_GAIN)).abs() < 1e-12);
    }

    #[test]
    fn test_crossfeed_applies_delay_offset() {
        let mut stage = CrossfeedStage::new(48_000);
        let delay = delay_samples(15.0, 48_000);

        // Impulse on the left channel only.
        let (_, right_now) = stage.process(1.0, 0.0, 15.0);
        assert!((right_now - DIRECT_CROSS_GAIN).abs() < 1e-12);

        // The delayed tap arrives exactly `delay` frames later.
        for _ in 0..delay - 1 {
            let (_, right) = stage.process(0.0, 0.0, 15.0);
            assert_eq!(right, 0.0);
        }
        let (_, right_delayed) = stage.process(0.0, 0.0, 15.0);
        assert!((right_delayed - DELAYED_CROSS_GAIN).abs() < 1e-12);
    }
}
