//! Pull-topology driver: an engine-owned thread pulls writable buffers.
//!
//! The production [`PullDevice`] bridges to CPAL: the device callback only
//! copies samples out of a lock-free SPSC ring buffer, while the engine
//! thread blocks (with a bounded deadline) until ring space frees up,
//! renders into a staging buffer, and commits it. [`MockDevice`]
//! (`backend::mock`) implements the same contract without hardware.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

use crate::backend::negotiate::negotiate_stereo;
use crate::backend::{Buffer, DeviceGeneration, StreamParams};
use crate::error::AudioOutError;

/// Ring capacity in cycles of `max_frames`; absorbs scheduling jitter
/// between the engine thread and the device callback.
const RING_CYCLES: usize = 2;

/// The buffer-exchange contract a pull stream drives.
///
/// Implementations are created on (and stay on) the supervisor thread, so
/// they need not be `Send`; the factory that creates them is.
pub trait PullDevice {
    /// The format this device was opened with.
    fn params(&self) -> StreamParams;

    /// Current value of the default-device generation watcher.
    fn generation(&self) -> u32;

    /// Blocks until writable space is available or the deadline passes.
    /// Returns `false` on deadline miss.
    fn wait_writable(&mut self, deadline: Duration) -> bool;

    /// Frames that can currently be committed without blocking.
    fn writable_frames(&self) -> usize;

    /// Commits rendered interleaved stereo frames to the output.
    fn commit(&mut self, frames: &[f32]);
}

/// An open pull-topology stream handle.
///
/// Wraps a [`PullDevice`] with the lifecycle the supervisor drives:
/// acquire → render → release, staleness detection against the captured
/// device generation, and idempotent close.
pub struct PullStream {
    device: Box<dyn PullDevice>,
    params: StreamParams,
    captured_generation: u32,
    closed: bool,
    close_reason: Option<AudioOutError>,
}

impl std::fmt::Debug for PullStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullStream")
            .field("params", &self.params)
            .field("closed", &self.closed)
            .field("close_reason", &self.close_reason)
            .finish()
    }
}

impl PullStream {
    /// Wraps an opened device, capturing the current device generation.
    #[must_use]
    pub fn new(device: Box<dyn PullDevice>) -> Self {
        let params = device.params();
        let captured_generation = device.generation();
        Self {
            device,
            params,
            captured_generation,
            closed: false,
            close_reason: None,
        }
    }

    /// Opens a pull stream on the default output device at the requested
    /// rate.
    pub fn open_stereo(
        sample_rate_hz: u32,
        generation: &DeviceGeneration,
    ) -> Result<Self, AudioOutError> {
        let device = CpalPullDevice::open(sample_rate_hz, generation)?;
        Ok(Self::new(Box::new(device)))
    }

    /// The negotiated stream format.
    #[must_use]
    pub fn params(&self) -> StreamParams {
        self.params
    }

    /// True once the stream has transitioned to Closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Why the stream closed itself, if it did.
    #[must_use]
    pub fn close_reason(&self) -> Option<&AudioOutError> {
        self.close_reason.as_ref()
    }

    /// Non-blocking acquire: up to `max_frames` of currently writable
    /// space, possibly empty.
    pub fn acquire<'a>(&mut self, staging: &'a mut Vec<f32>, max_frames: usize) -> Buffer<'a> {
        if self.closed {
            return Buffer::empty();
        }
        let frames = self.device.writable_frames().min(max_frames);
        if frames == 0 {
            return Buffer::empty();
        }
        staging.resize(frames * 2, 0.0);
        Buffer::new(&mut staging[..frames * 2])
    }

    /// Blocking acquire with a bounded deadline of twice the requested
    /// frame duration at the negotiated rate.
    ///
    /// On a device-generation mismatch or a missed deadline the stream
    /// transitions to Closed and an empty buffer is returned; the caller
    /// must reopen. The generation check takes priority over the deadline
    /// result so a device swap is reported as such even when it also
    /// stalled the stream.
    pub fn block_acquire<'a>(
        &mut self,
        staging: &'a mut Vec<f32>,
        max_frames: usize,
    ) -> Buffer<'a> {
        if self.closed {
            return Buffer::empty();
        }

        let deadline = Duration::from_secs_f64(
            2.0 * max_frames as f64 / f64::from(self.params.sample_rate.max(1)),
        );
        let signaled = self.device.wait_writable(deadline);

        if self.device.generation() != self.captured_generation {
            self.close_with(AudioOutError::DefaultDeviceChanged);
            return Buffer::empty();
        }
        if !signaled {
            self.close_with(AudioOutError::DeviceUnresponsive);
            return Buffer::empty();
        }
        self.acquire(staging, max_frames)
    }

    /// Commits written frames; a no-op for a zero-length buffer.
    pub fn release(&mut self, buffer: Buffer<'_>) {
        if buffer.is_empty() || self.closed {
            return;
        }
        self.device.commit(buffer.frames());
    }

    /// Closes the stream; idempotent and safe on an already-closed handle.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
        }
    }

    fn close_with(&mut self, reason: AudioOutError) {
        tracing::warn!(%reason, "pull stream closing itself");
        self.close_reason = Some(reason);
        self.closed = true;
    }
}

/// Signal shared between the engine thread and the CPAL callback.
#[derive(Default)]
struct RefillSignal {
    drained: Mutex<bool>,
    condvar: Condvar,
}

/// CPAL-backed pull device: output stream draining an SPSC ring buffer.
pub(crate) struct CpalPullDevice {
    producer: ringbuf::HeapProd<f32>,
    signal: Arc<RefillSignal>,
    params: StreamParams,
    generation: DeviceGeneration,
    // RAII: dropping the stream stops playback and the callback.
    _stream: cpal::Stream,
}

impl CpalPullDevice {
    pub(crate) fn open(
        sample_rate_hz: u32,
        generation: &DeviceGeneration,
    ) -> Result<Self, AudioOutError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioOutError::NoDefaultDevice)?;

        let (config, max_frames) = negotiate_stereo(&device, sample_rate_hz)?;

        let ring = HeapRb::<f32>::new(max_frames * 2 * RING_CYCLES);
        let (producer, mut consumer) = ring.split();

        let signal = Arc::new(RefillSignal::default());
        let callback_signal = Arc::clone(&signal);
        let error_generation = generation.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let copied = consumer.pop_slice(data);
                    // Underrun: pad with silence rather than stale samples.
                    data[copied..].fill(0.0);

                    // try_lock keeps the device callback from ever parking
                    // on the engine thread; a missed notify is recovered by
                    // the waiter's bounded deadline.
                    if let Ok(mut drained) = callback_signal.drained.try_lock() {
                        *drained = true;
                        callback_signal.condvar.notify_one();
                    }
                },
                move |err| {
                    tracing::error!("output stream error: {err}");
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        error_generation.bump();
                    }
                },
                None,
            )
            .map_err(|e| AudioOutError::ResourceCreation {
                what: "output stream",
                reason: e.to_string(),
            })?;

        stream
            .play()
            .map_err(|e| AudioOutError::DeviceStartFailed {
                reason: e.to_string(),
            })?;

        let params = StreamParams {
            sample_rate: config.sample_rate.0,
            max_frames,
        };
        tracing::info!(
            sample_rate = params.sample_rate,
            max_frames = params.max_frames,
            "opened pull output stream"
        );

        Ok(Self {
            producer,
            signal,
            params,
            generation: generation.clone(),
            _stream: stream,
        })
    }
}

impl PullDevice for CpalPullDevice {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn generation(&self) -> u32 {
        self.generation.current()
    }

    fn wait_writable(&mut self, deadline: Duration) -> bool {
        if self.writable_frames() > 0 {
            return true;
        }
        let start = Instant::now();
        let mut drained = self
            .signal
            .drained
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            *drained = false;
            if self.producer.vacant_len() >= 2 {
                return true;
            }
            let Some(remaining) = deadline.checked_sub(start.elapsed()) else {
                return false;
            };
            let (guard, timeout) = self
                .signal
                .condvar
                .wait_timeout(drained, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            drained = guard;
            if timeout.timed_out() && self.producer.vacant_len() < 2 {
                return false;
            }
        }
    }

    fn writable_frames(&self) -> usize {
        self.producer.vacant_len() / 2
    }

    fn commit(&mut self, frames: &[f32]) {
        let pushed = self.producer.push_slice(frames);
        debug_assert_eq!(pushed, frames.len(), "commit exceeded acquired space");
    }
}
