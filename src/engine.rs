//! The engine object applications hold: open/close lifecycle plus the
//! start/stop fade surface.

use std::sync::{Arc, Mutex};

use crate::backend::push::PushStream;
use crate::backend::{DeviceGeneration, PullStream};
use crate::controls::RenderControls;
use crate::error::AudioOutError;
use crate::render::{RenderPipeline, SharedRenderer};
use crate::supervisor::{PullSupervisor, StreamState};

/// How rendered audio reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// An engine-owned thread pulls writable buffers, renders, and commits
    /// them. Staleness recovery is automatic.
    #[default]
    Pull,
    /// The OS audio thread invokes the render callback directly. Lower
    /// latency, but a vanished device needs an explicit reopen.
    Push,
}

enum ActiveStream {
    Pull(PullSupervisor),
    Push(PushStream),
}

/// Stereo masking-sound output engine.
///
/// Owns the render pipeline, the runtime tunables, and at most one open
/// output stream. The pipeline outlives streams, so fades and filter state
/// survive device hot-swaps.
///
/// Dropping the engine closes the stream and joins any engine-owned audio
/// thread, so no render invocation outlives the engine.
pub struct AudioEngine {
    topology: Topology,
    controls: Arc<RenderControls>,
    renderer: SharedRenderer,
    generation: DeviceGeneration,
    active: Option<ActiveStream>,
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("topology", &self.topology)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AudioEngine {
    /// Creates an engine with a fresh pipeline, faded out, in noise mode.
    #[must_use]
    pub fn new(topology: Topology) -> Self {
        let controls = Arc::new(RenderControls::new());
        let pipeline = RenderPipeline::new(Arc::clone(&controls));
        Self {
            topology,
            controls,
            renderer: Arc::new(Mutex::new(pipeline)),
            generation: DeviceGeneration::new(),
            active: None,
        }
    }

    /// Opens a stereo stream on the default output device.
    ///
    /// At most one stream may be open per engine; a second open fails with
    /// [`AudioOutError::StreamAlreadyOpen`] and leaves the first stream
    /// untouched. A held stream that has already reached
    /// [`StreamState::Closed`] does not count: it is dropped and replaced,
    /// which is how a controller recovers a stale push stream. The
    /// requested rate is a preference; the negotiated rate is available
    /// from [`sample_rate`](Self::sample_rate) afterwards.
    pub fn open_stereo(&mut self, sample_rate_hz: u32) -> Result<(), AudioOutError> {
        self.reap_closed();
        match self.topology {
            Topology::Pull => {
                let generation = self.generation.clone();
                self.open_stereo_with(move || PullStream::open_stereo(sample_rate_hz, &generation))
            }
            Topology::Push => {
                if self.active.is_some() {
                    return Err(AudioOutError::StreamAlreadyOpen);
                }
                let stream = PushStream::open_stereo(
                    sample_rate_hz,
                    Arc::clone(&self.renderer),
                    &self.generation,
                )?;
                self.active = Some(ActiveStream::Push(stream));
                Ok(())
            }
        }
    }

    /// Opens a pull stream backed by a caller-supplied device factory.
    ///
    /// The factory runs on the supervisor thread, once per open attempt,
    /// so recovery reopens go through it too. This is the entry point for
    /// custom pull devices such as virtual outputs or
    /// [`MockDevice`](crate::MockDevice) in tests; [`open_stereo`] on a
    /// [`Topology::Pull`] engine is this with the platform factory.
    ///
    /// [`open_stereo`]: Self::open_stereo
    pub fn open_stereo_with<F>(&mut self, factory: F) -> Result<(), AudioOutError>
    where
        F: FnMut() -> Result<PullStream, AudioOutError> + Send + 'static,
    {
        self.reap_closed();
        if self.active.is_some() {
            return Err(AudioOutError::StreamAlreadyOpen);
        }

        let (supervisor, first) = PullSupervisor::spawn(factory, Arc::clone(&self.renderer))?;
        match first.recv() {
            Ok(Ok(params)) => {
                tracing::debug!(
                    sample_rate = params.sample_rate,
                    max_frames = params.max_frames,
                    "pull stream opened"
                );
                self.active = Some(ActiveStream::Pull(supervisor));
                Ok(())
            }
            // Dropping the supervisor here joins its thread.
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AudioOutError::BackendError(
                "supervisor exited before completing the first open".to_string(),
            )),
        }
    }

    /// Fades the masking sound in over one second.
    pub fn start(&self) {
        self.controls.set_fade_on(true);
    }

    /// Fades the masking sound out over one second.
    ///
    /// The stream stays open and renders exact digital silence once the
    /// fade completes, so a later [`start`](Self::start) is instant.
    pub fn stop(&self) {
        self.controls.set_fade_on(false);
    }

    /// Current stream lifecycle state; `Closed` when nothing is open.
    #[must_use]
    pub fn state(&self) -> StreamState {
        match &self.active {
            None => StreamState::Closed,
            Some(ActiveStream::Pull(supervisor)) => supervisor.state(),
            Some(ActiveStream::Push(stream)) => stream.state(),
        }
    }

    /// Negotiated sample rate of the open stream, if any.
    #[must_use]
    pub fn sample_rate(&self) -> Option<u32> {
        match &self.active {
            None => None,
            Some(ActiveStream::Pull(supervisor)) => supervisor.sample_rate(),
            Some(ActiveStream::Push(stream)) => Some(stream.params().sample_rate),
        }
    }

    /// The device-generation watcher for this engine.
    ///
    /// Application-level device notifications (for platforms or setups
    /// where the backend's own error reporting is not enough) can
    /// [`bump`](DeviceGeneration::bump) it to force streams stale.
    #[must_use]
    pub fn generation(&self) -> &DeviceGeneration {
        &self.generation
    }

    /// Selects noise or the 1 kHz reference tone.
    #[cfg(feature = "diagnostics")]
    pub fn set_mode(&self, mode: crate::controls::Mode) {
        self.controls.set_mode(mode);
    }

    /// Sets the stereo separation of the crossfeed, clamped to [0, 15] ms.
    #[cfg(feature = "diagnostics")]
    pub fn set_separation_ms(&self, ms: f32) {
        self.controls.set_separation_ms(ms);
    }

    /// Drops a held stream that has already reached `Closed`. A dead
    /// handle blocks nothing; only an open stream counts against the
    /// single-open invariant.
    fn reap_closed(&mut self) {
        if self.active.is_some() && self.state() == StreamState::Closed {
            self.close();
        }
    }

    /// Closes the open stream, if any. Idempotent.
    ///
    /// For the pull topology this joins the supervisor thread; on return
    /// no render invocation is in flight. The pipeline and its fade state
    /// are kept, so the engine can be reopened.
    pub fn close(&mut self) {
        match self.active.take() {
            None => {}
            Some(ActiveStream::Pull(mut supervisor)) => supervisor.shutdown(),
            Some(ActiveStream::Push(stream)) => stream.close(),
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.close();
    }
}
