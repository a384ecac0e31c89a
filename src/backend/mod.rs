//! Platform stream backends and the contracts they share.
//!
//! Two delivery topologies are supported:
//!
//! - **Pull** ([`pull`]): an engine-owned thread loops
//!   `block_acquire → render → release` against a [`PullDevice`]. The
//!   production device is a CPAL output stream fed through a lock-free SPSC
//!   ring buffer; [`MockDevice`] implements the same contract for tests.
//! - **Push** ([`push`]): the OS invokes the CPAL data callback on its own
//!   real-time thread and the driver renders in place, routing channels via
//!   [`route`].

mod mock;
mod negotiate;
pub(crate) mod pull;
pub(crate) mod push;
pub(crate) mod route;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub use mock::{MockDevice, MockDeviceHandle};
pub use pull::{PullDevice, PullStream};

/// Format negotiated with the output device at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Negotiated sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum frames the backend hands out per cycle.
    pub max_frames: usize,
}

/// Monotonic counter tracking default-output-device changes.
///
/// The platform watcher bumps it whenever the OS reports that the default
/// output device changed or vanished; streams capture the value at open
/// time and treat any later mismatch as staleness. With CPAL the watcher is
/// the stream error callback (device-not-available reports); controllers
/// and tests may also [`bump`](DeviceGeneration::bump) it directly, e.g.
/// from an application-level device notification.
#[derive(Debug, Default, Clone)]
pub struct DeviceGeneration(Arc<AtomicU32>);

impl DeviceGeneration {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current generation.
    #[must_use]
    pub fn current(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Records a default-device change.
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

/// A transient, non-owning view over writable output space.
///
/// Strictly acquired → written → released within one cycle; the frames are
/// interleaved stereo. An empty buffer means no space was available (or the
/// stream closed).
#[derive(Debug)]
pub struct Buffer<'a> {
    frames: &'a mut [f32],
}

impl<'a> Buffer<'a> {
    pub(crate) fn new(frames: &'a mut [f32]) -> Self {
        debug_assert!(frames.len() % 2 == 0);
        Self { frames }
    }

    pub(crate) fn empty() -> Self {
        Self { frames: &mut [] }
    }

    /// Number of stereo frames in this buffer.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len() / 2
    }

    /// True when no writable space was available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The writable interleaved stereo samples.
    pub fn frames_mut(&mut self) -> &mut [f32] {
        self.frames
    }

    pub(crate) fn frames(&self) -> &[f32] {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_generation_bump() {
        let generation = DeviceGeneration::new();
        assert_eq!(generation.current(), 0);
        generation.bump();
        generation.bump();
        assert_eq!(generation.current(), 2);

        let clone = generation.clone();
        clone.bump();
        assert_eq!(generation.current(), 3, "clones share the counter");
    }

    #[test]
    fn test_buffer_views() {
        let mut samples = [0.0f32; 8];
        let mut buffer = Buffer::new(&mut samples);
        assert_eq!(buffer.frame_count(), 4);
        assert!(!buffer.is_empty());
        buffer.frames_mut()[0] = 0.5;
        assert_eq!(buffer.frames()[0], 0.5);

        assert!(Buffer::empty().is_empty());
        assert_eq!(Buffer::empty().frame_count(), 0);
    }
}
