//! Push-topology driver: the OS invokes the render entry point.
//!
//! CPAL owns the real-time callback thread. Each invocation wraps the
//! destination slice in a [`Destination`](super::route::Destination) and
//! routes the negotiated stereo pair through the shared channel router.
//! The callback never blocks (the pipeline lock is `try_lock`), never
//! allocates (the scratch buffer is preallocated at open), and degrades to
//! silence on any malformed cycle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::backend::negotiate::negotiate_stereo;
use crate::backend::route::{route_stereo, Destination};
use crate::backend::{DeviceGeneration, StreamParams};
use crate::error::AudioOutError;
use crate::render::SharedRenderer;
use crate::supervisor::StreamState;

/// An open push-topology stream handle.
///
/// The stream plays while this exists; dropping it stops the device
/// callback before the handle is released, so no render invocation can be
/// in flight afterwards (CPAL joins the callback on stream drop).
pub struct PushStream {
    params: StreamParams,
    state: Arc<AtomicU8>,
    // RAII: dropping stops playback and quiesces the callback.
    // `None` only for detached test handles.
    _stream: Option<cpal::Stream>,
}

impl std::fmt::Debug for PushStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushStream")
            .field("params", &self.params)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PushStream {
    /// Opens the default output device and installs the render entry point.
    pub fn open_stereo(
        sample_rate_hz: u32,
        renderer: SharedRenderer,
        generation: &DeviceGeneration,
    ) -> Result<Self, AudioOutError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioOutError::NoDefaultDevice)?;

        let (config, max_frames) = negotiate_stereo(&device, sample_rate_hz)?;
        let channels = config.channels;
        let sample_rate = config.sample_rate.0;

        // Configure before the first callback so no cycle renders at a
        // stale rate.
        if let Ok(mut pipeline) = renderer.lock() {
            pipeline.configure(sample_rate);
        }

        let state = Arc::new(AtomicU8::new(StreamState::Running as u8));
        let callback_state = Arc::clone(&state);
        let error_state = Arc::clone(&state);
        let error_generation = generation.clone();

        // Preallocated: the callback must not allocate on the OS thread.
        // Headroom over the declared maximum covers devices that under-report.
        let mut scratch = vec![0.0f32; max_frames.max(8192) * 2];
        let mut origin: Option<cpal::StreamInstant> = None;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                    if callback_state.load(Ordering::Acquire) != StreamState::Running as u8 {
                        data.fill(0.0);
                        return;
                    }

                    let playback = info.timestamp().playback;
                    let timestamp_micros = match origin {
                        Some(origin_instant) => playback
                            .duration_since(&origin_instant)
                            .map_or(0, |d| d.as_micros() as u64),
                        None => {
                            origin = Some(playback);
                            0
                        }
                    };

                    // A close in progress holds the pipeline lock; write
                    // silence rather than parking the OS audio thread.
                    let Ok(mut pipeline) = renderer.try_lock() else {
                        data.fill(0.0);
                        return;
                    };

                    let mut destinations = [Destination {
                        samples: data,
                        channels,
                        starting_channel: 1,
                    }];
                    route_stereo(
                        &mut destinations,
                        [1, 2],
                        &mut scratch,
                        timestamp_micros,
                        &mut *pipeline,
                    );
                },
                move |err| {
                    tracing::error!("output stream error: {err}");
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        error_generation.bump();
                    }
                    // Push topology cannot self-heal; mark closed and let
                    // the controller reopen on its next render attempt.
                    error_state.store(StreamState::Closed as u8, Ordering::Release);
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
            sample_rate,
            max_frames,
        };
        tracing::info!(
            sample_rate = params.sample_rate,
            max_frames = params.max_frames,
            channels,
            "opened push output stream"
        );

        Ok(Self {
            params,
            state,
            _stream: Some(stream),
        })
    }

    /// Builds a handle with no platform stream behind it, so lifecycle
    /// logic can be exercised without audio hardware. The returned state
    /// atomic stands in for the error callback's side of the handle.
    #[cfg(test)]
    pub(crate) fn detached(params: StreamParams) -> (Self, Arc<AtomicU8>) {
        let state = Arc::new(AtomicU8::new(StreamState::Running as u8));
        (
            Self {
                params,
                state: Arc::clone(&state),
                _stream: None,
            },
            state,
        )
    }

    /// The negotiated stream format.
    #[must_use]
    pub fn params(&self) -> StreamParams {
        self.params
    }

    /// Current stream state; `Closed` means the controller must reopen.
    #[must_use]
    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stops rendering before resources go away.
    pub fn close(&self) {
        self.state
            .store(StreamState::Closed as u8, Ordering::Release);
        // Pause errors at close time are not actionable.
        if let Some(stream) = &self._stream {
            if let Err(err) = stream.pause() {
                tracing::debug!("pause on close failed: {err}");
            }
        }
    }
}
