//! Shared DSP tunables crossing the control/audio thread boundary.
//!
//! These are single-writer (control thread), single-reader (audio thread)
//! scalars. The synchronization policy is relaxed atomics: each value is an
//! independent word, there is no ordering dependency between them, and a
//! write simply takes effect on the next render call. This is the documented
//! answer to "are plain shared writes acceptable" - they are not, so every
//! tunable goes through an atomic.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// Default stereo separation in milliseconds.
pub const DEFAULT_SEPARATION_MS: f32 = 1.8;
/// Minimum stereo separation in milliseconds.
pub const MIN_SEPARATION_MS: f32 = 0.0;
/// Maximum stereo separation in milliseconds.
pub const MAX_SEPARATION_MS: f32 = 15.0;

/// What the render pipeline synthesizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Mode {
    /// Crossfed pink masking noise.
    #[default]
    Noise = 0,
    /// 1 kHz reference sine at ~-20 dBFS, for level/path diagnostics.
    ReferenceTone = 1,
}

impl Mode {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::ReferenceTone,
            _ => Self::Noise,
        }
    }
}

/// Runtime tunables shared between the control thread and the audio thread.
///
/// Owned by the [`AudioEngine`](crate::AudioEngine) behind an `Arc`; the
/// render pipeline holds a clone and loads each value once per render call.
#[derive(Debug)]
pub struct RenderControls {
    /// Fade target: `true` = audible (amplitude 1.0), `false` = silent.
    fade_on: AtomicBool,
    /// Active synthesis mode, as a `Mode` discriminant.
    mode: AtomicU8,
    /// Stereo separation in milliseconds, stored as f32 bits.
    separation_ms_bits: AtomicU32,
}

impl Default for RenderControls {
    fn default() -> Self {
        Self {
            fade_on: AtomicBool::new(false),
            mode: AtomicU8::new(Mode::Noise as u8),
            separation_ms_bits: AtomicU32::new(DEFAULT_SEPARATION_MS.to_bits()),
        }
    }
}

impl RenderControls {
    /// Creates controls with defaults: faded out, noise mode, 1.8ms separation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fade target. The actual amplitude ramps over 1 second.
    pub fn set_fade_on(&self, on: bool) {
        self.fade_on.store(on, Ordering::Relaxed);
    }

    /// Returns the current fade target.
    pub fn fade_on(&self) -> bool {
        self.fade_on.load(Ordering::Relaxed)
    }

    /// Selects the synthesis mode.
    pub fn set_mode(&self, mode: Mode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    /// Returns the active synthesis mode.
    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    /// Sets the stereo separation, clamped to [0, 15] ms.
    pub fn set_separation_ms(&self, ms: f32) {
        let clamped = ms.clamp(MIN_SEPARATION_MS, MAX_SEPARATION_MS);
        self.separation_ms_bits
            .store(clamped.to_bits(), Ordering::Relaxed);
    }

    /// Returns the stereo separation in milliseconds.
    pub fn separation_ms(&self) -> f32 {
        f32::from_bits(self.separation_ms_bits.load(Ordering::Relaxed))
    }
}
