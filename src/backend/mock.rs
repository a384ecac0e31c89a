//! Mock pull device for testing without audio hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::backend::pull::PullDevice;
use crate::backend::{DeviceGeneration, StreamParams};

/// A scriptable [`PullDevice`] that records committed audio.
///
/// This allows exercising the full pull path - supervisor loop, staleness
/// detection, self-healing reopen - without requiring actual audio
/// hardware, making it suitable for CI environments.
///
/// # Example
///
/// ```
/// use masking_audio::{MockDevice, PullStream};
///
/// let mock = MockDevice::new(48_000, 256);
/// let mut stream = PullStream::new(Box::new(mock.handle()));
///
/// // ... drive the stream ...
///
/// // Simulate a headphone unplug:
/// mock.generation().bump();
/// ```
#[derive(Debug, Clone)]
pub struct MockDevice {
    inner: Arc<MockInner>,
}

#[derive(Debug)]
struct MockInner {
    params: StreamParams,
    generation: DeviceGeneration,
    /// Frames reported writable per cycle; 0 simulates an unresponsive
    /// device (wait_writable times out immediately).
    writable_frames: AtomicUsize,
    committed: Mutex<Vec<f32>>,
    opens: AtomicUsize,
}

impl MockDevice {
    /// Creates a mock reporting the given format.
    #[must_use]
    pub fn new(sample_rate: u32, max_frames: usize) -> Self {
        Self {
            inner: Arc::new(MockInner {
                params: StreamParams {
                    sample_rate,
                    max_frames,
                },
                generation: DeviceGeneration::new(),
                writable_frames: AtomicUsize::new(max_frames),
                committed: Mutex::new(Vec::new()),
                opens: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns a device handle suitable for `PullStream::new`.
    ///
    /// Each handle counts as one open; all handles share this mock's
    /// generation counter and committed-audio log.
    #[must_use]
    pub fn handle(&self) -> MockDeviceHandle {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        MockDeviceHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// The shared device-generation counter; bump it to simulate a
    /// default-device change.
    #[must_use]
    pub fn generation(&self) -> &DeviceGeneration {
        &self.inner.generation
    }

    /// Scripts how many frames each cycle reports writable.
    pub fn set_writable_frames(&self, frames: usize) {
        self.inner.writable_frames.store(frames, Ordering::SeqCst);
    }

    /// Total samples committed across all handles.
    #[must_use]
    pub fn committed_samples(&self) -> usize {
        self.lock_committed().len()
    }

    /// Takes all committed audio, clearing the log.
    #[must_use]
    pub fn take_committed(&self) -> Vec<f32> {
        std::mem::take(&mut *self.lock_committed())
    }

    /// How many handles have been opened on this mock.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    fn lock_committed(&self) -> std::sync::MutexGuard<'_, Vec<f32>> {
        self.inner
            .committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One opened handle of a [`MockDevice`].
#[derive(Debug)]
pub struct MockDeviceHandle {
    inner: Arc<MockInner>,
}

impl PullDevice for MockDeviceHandle {
    fn params(&self) -> StreamParams {
        self.inner.params
    }

    fn generation(&self) -> u32 {
        self.inner.generation.current()
    }

    fn wait_writable(&mut self, deadline: Duration) -> bool {
        // An unresponsive device (0 writable frames) misses immediately.
        if self.writable_frames() == 0 {
            return false;
        }
        // Pace the caller roughly like a real device callback would, so a
        // supervisor loop against the mock does not spin flat out.
        std::thread::sleep(deadline.min(Duration::from_millis(1)));
        true
    }

    fn writable_frames(&self) -> usize {
        self.inner.writable_frames.load(Ordering::SeqCst)
    }

    fn commit(&mut self, frames: &[f32]) {
        self.inner
            .committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(frames);
    }
}
