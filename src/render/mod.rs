//! Synthesis of the masking signal: one block of interleaved stereo f32
//! per call.
//!
//! The pipeline owns all long-lived DSP state (fade ramp, pink filter taps,
//! crossfeed delay lines, tone phase). It lives for the engine lifetime and
//! survives stream reopens; only rate-dependent pieces are reconfigured when
//! a reopened stream negotiates a different rate.

mod crossfeed;
mod fade;
mod pink;

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};

use crate::controls::{Mode, RenderControls};
use crossfeed::CrossfeedStage;
use fade::FadeRamp;
use pink::PinkNoise;

/// Masking noise gain, ~-26 dBFS.
const NOISE_GAIN_DB: f64 = -26.0;
/// Reference tone gain, ~-20 dBFS.
const TONE_GAIN_DB: f64 = -20.0;
/// Reference tone frequency in Hz.
const TONE_HZ: f64 = 1000.0;

fn db_to_amp(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// The render capability injected into stream backends.
///
/// Backends call this from the audio thread - engine-owned for the pull
/// topology, OS-owned for the push topology. Implementations must fully
/// populate `frames` (an interleaved stereo slice, `2 * frame_count`
/// samples) and must never block, allocate, or panic. Failures stay
/// internal; silence is the universal fallback.
pub trait Renderer: Send {
    /// Fills `frames` with interleaved stereo samples for the given
    /// monotonic presentation timestamp.
    fn render(&mut self, timestamp_micros: u64, frames: &mut [f32]);
}

/// A renderer shared between the engine and an open stream.
///
/// The pull supervisor takes the (uncontended) lock once per cycle; the
/// push callback uses `try_lock` and writes silence on contention so the
/// OS audio thread never blocks on a close in progress.
pub type SharedRenderer = Arc<Mutex<RenderPipeline>>;

/// Owns all DSP state and synthesizes the masking signal.
pub struct RenderPipeline {
    controls: Arc<RenderControls>,
    sample_rate: u32,
    fade: FadeRamp,
    pink_left: PinkNoise,
    pink_right: PinkNoise,
    crossfeed: CrossfeedStage,
    /// Tone phase in cycles; accumulates continuously across calls and mode
    /// switches so re-entering tone mode never produces a discontinuity.
    tone_phase: f64,
    noise_amp: f64,
    tone_amp: f64,
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl RenderPipeline {
    /// Creates a pipeline reading tunables from `controls`.
    ///
    /// The pipeline starts configured for 48kHz; [`configure`] is called
    /// with the negotiated rate at every stream open.
    ///
    /// [`configure`]: RenderPipeline::configure
    #[must_use]
    pub fn new(controls: Arc<RenderControls>) -> Self {
        let sample_rate = 48_000;
        Self {
            controls,
            sample_rate,
            fade: FadeRamp::new(sample_rate),
            pink_left: PinkNoise::new(0x6d61_736b_4c00),
            pink_right: PinkNoise::new(0x6d61_736b_5200),
            crossfeed: CrossfeedStage::new(sample_rate),
            tone_phase: 0.0,
            noise_amp: db_to_amp(NOISE_GAIN_DB),
            tone_amp: db_to_amp(TONE_GAIN_DB),
        }
    }

    /// Adapts rate-dependent state to a newly negotiated sample rate.
    ///
    /// Fade amplitude and tone phase carry over; only the ramp step and
    /// delay line sizes are recomputed.
    pub fn configure(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.fade.set_sample_rate(sample_rate);
        self.crossfeed.set_sample_rate(sample_rate);
    }

    /// Returns the rate this pipeline is currently configured for.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn render_frames(&mut self, frames: &mut [f32]) {
        debug_assert!(frames.len() % 2 == 0, "interleaved stereo buffer");

        let target = if self.controls.fade_on() { 1.0 } else { 0.0 };
        self.fade.retarget(target);

        // Settled at zero: exact silence, not approximate.
        if self.fade.is_silent() {
            frames.fill(0.0);
            return;
        }

        let mode = self.controls.mode();
        let separation_ms = self.controls.separation_ms();
        let phase_delta = TONE_HZ / f64::from(self.sample_rate);

        for frame in frames.chunks_exact_mut(2) {
            let amplitude = self.fade.next_amplitude();
            let (left, right) = match mode {
                Mode::Noise => {
                    let l = self.pink_left.next_sample();
                    let r = self.pink_right.next_sample();
                    let (l, r) = self.crossfeed.process(l, r, separation_ms);
                    (l * self.noise_amp, r * self.noise_amp)
                }
                Mode::ReferenceTone => {
                    let y = self.tone_amp * (TAU * self.tone_phase).sin();
                    (y, y)
                }
            };
            // The phase keeps accumulating in every mode so switching back
            // to the tone is click-free.
            self.tone_phase += phase_delta;
            if self.tone_phase >= 1.0 {
                self.tone_phase -= 1.0;
            }

            frame[0] = (amplitude * left) as f32;
            frame[1] = (amplitude * right) as f32;
        }
    }
}

impl Renderer for RenderPipeline {
    fn render(&mut self, _timestamp_micros: u64, frames: &mut [f32]) {
        self.render_frames(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> (Arc<RenderControls>, RenderPipeline) {
        let controls = Arc::new(RenderControls::new());
        let pipeline = RenderPipeline::new(Arc::clone(&controls));
        (controls, pipeline)
    }

    fn block_peak(frames: &[f32]) -> f32 {
        frames.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()))
    }

    #[test]
    fn test_silent_pipeline_zero_fills_exactly() {
        let (_, mut pipeline) = pipeline();
        let mut frames = vec![1.0f32; 2 * 480];
        pipeline.render(0, &mut frames);
        assert!(frames.iter().all(|&s| s == 0.0), "exact zero fill");
    }

    #[test]
    fn test_fade_in_envelope_over_one_second() {
        let (controls, mut pipeline) = pipeline();
        controls.set_fade_on(true);
        controls.set_mode(Mode::ReferenceTone);

        // 1 second in 10ms blocks; per-block peak tracks the envelope.
        let mut frames = vec![0.0f32; 2 * 480];
        let mut peaks = Vec::new();
        for _ in 0..100 {
            pipeline.render(0, &mut frames);
            peaks.push(block_peak(&frames));
        }

        assert!(peaks[0] < 0.01, "t=0 amplitude ~0, got {}", peaks[0]);
        let tone_amp = db_to_amp(TONE_GAIN_DB) as f32;
        assert!(
            (peaks[99] - tone_amp).abs() < 0.01,
            "t=1s amplitude ~{tone_amp}, got {}",
            peaks[99]
        );
        for window in peaks.windows(2) {
            assert!(window[1] >= window[0] - 0.001, "envelope non-decreasing");
        }
    }

    #[test]
    fn test_fade_out_returns_to_exact_silence() {
        let (controls, mut pipeline) = pipeline();
        controls.set_fade_on(true);
        let mut frames = vec![0.0f32; 2 * 4800];
        for _ in 0..11 {
            pipeline.render(0, &mut frames);
        }

        controls.set_fade_on(false);
        // A bit over one second of fade-out, then everything is zero.
        for _ in 0..11 {
            pipeline.render(0, &mut frames);
        }
        pipeline.render(0, &mut frames);
        assert!(frames.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_noise_output_bounded_over_ten_seconds() {
        let (controls, mut pipeline) = pipeline();
        controls.set_fade_on(true);
        let mut frames = vec![0.0f32; 2 * 4800];
        for _ in 0..100 {
            pipeline.render(0, &mut frames);
            for &sample in &frames {
                assert!(sample.is_finite());
                assert!(sample.abs() <= 1.0, "sample {sample} out of range");
            }
        }
    }

    #[test]
    fn test_tone_phase_continuous_across_mode_switch() {
        let (controls, mut pipeline) = pipeline();
        controls.set_fade_on(true);
        controls.set_mode(Mode::ReferenceTone);

        let mut frames = vec![0.0f32; 2 * 48_000];
        pipeline.render(0, &mut frames); // settle the fade
        pipeline.render(0, &mut frames);
        let phase_before = pipeline.tone_phase;

        controls.set_mode(Mode::Noise);
        let mut noise_frames = vec![0.0f32; 2 * 480];
        pipeline.render(0, &mut noise_frames);

        // Phase kept advancing during noise mode: 480 frames at 1kHz/48kHz
        // is exactly 10 cycles, i.e. the fractional phase is unchanged.
        let expected = phase_before; // 480 * (1000/48000) = 10.0 cycles
        assert!((pipeline.tone_phase - expected).abs() < 1e-6);

        controls.set_mode(Mode::ReferenceTone);
        let mut tone_frames = vec![0.0f32; 2 * 2];
        pipeline.render(0, &mut tone_frames);
        let first = f64::from(tone_frames[0]);
        let expected_sample = db_to_amp(TONE_GAIN_DB) * (TAU * expected).sin();
        assert!((first - expected_sample).abs() < 1e-4, "no phase discontinuity");
    }

    #[test]
    fn test_configure_preserves_fade_state() {
        let (controls, mut pipeline) = pipeline();
        controls.set_fade_on(true);
        let mut frames = vec![0.0f32; 2 * 48_000];
        pipeline.render(0, &mut frames);
        pipeline.render(0, &mut frames); // fully faded in

        pipeline.configure(44_100);
        let mut more = vec![0.0f32; 2 * 441];
        pipeline.render(0, &mut more);
        let peak = block_peak(&more);
        assert!(peak > 0.0, "still audible after reopen at a new rate");
    }
}
