//! Stream supervisor: drives the pull cycle and owns recovery policy.
//!
//! The supervisor runs on a dedicated engine-owned thread and walks the
//! stream through `Closed → Opening → Running → Stale → Closed`. After a
//! stream goes stale (device-generation mismatch or missed refill
//! deadline) it releases the handle and re-attempts `Opening` on the next
//! loop iteration, which is what makes device hot-swaps - headphone
//! unplugs, default-device changes - heal without user action.
//!
//! The first open attempt is special: its result is reported back to the
//! caller of `open_stereo`, which surfaces the error instead of retrying.
//! Later failures are recovery territory and retried unattended.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::{PullStream, StreamParams};
use crate::error::AudioOutError;
use crate::render::{Renderer, SharedRenderer};

/// Delay before re-attempting `open_stereo` after a failed open, so a
/// missing device does not spin the supervisor thread.
const REOPEN_DELAY: Duration = Duration::from_millis(50);

/// Lifecycle of a supervised stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// No stream is open.
    Closed = 0,
    /// An open attempt is in progress.
    Opening = 1,
    /// Buffers are being rendered.
    Running = 2,
    /// The stream detected staleness and is releasing its resources.
    Stale = 3,
}

impl StreamState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Opening,
            2 => Self::Running,
            3 => Self::Stale,
            _ => Self::Closed,
        }
    }
}

/// State shared between the supervisor thread and the engine.
struct SupervisorShared {
    state: AtomicU8,
    shutdown: AtomicBool,
    frames_rendered: AtomicU64,
    /// Negotiated rate of the most recent successful open, 0 before any.
    sample_rate: AtomicU64,
}

impl SupervisorShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(StreamState::Closed as u8),
            shutdown: AtomicBool::new(false),
            frames_rendered: AtomicU64::new(0),
            sample_rate: AtomicU64::new(0),
        }
    }

    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Result of the first open attempt, reported to `open_stereo`.
pub(crate) type FirstOpen = mpsc::Receiver<Result<StreamParams, AudioOutError>>;

/// A running pull supervisor and its thread.
pub(crate) struct PullSupervisor {
    shared: Arc<SupervisorShared>,
    thread: Option<JoinHandle<()>>,
}

impl PullSupervisor {
    /// Spawns the supervisor thread.
    ///
    /// `factory` performs one open attempt; it runs on the supervisor
    /// thread, which is where the platform stream must live (CPAL streams
    /// are not `Send`). The returned receiver yields the first attempt's
    /// outcome exactly once.
    pub(crate) fn spawn<F>(
        factory: F,
        renderer: SharedRenderer,
    ) -> Result<(Self, FirstOpen), AudioOutError>
    where
        F: FnMut() -> Result<PullStream, AudioOutError> + Send + 'static,
    {
        let shared = Arc::new(SupervisorShared::new());
        let (first_tx, first_rx) = mpsc::channel();
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("masking-audio-pull".to_string())
            .spawn(move || run_loop(&thread_shared, factory, &renderer, first_tx))
            .map_err(|e| AudioOutError::ResourceCreation {
                what: "supervisor thread",
                reason: e.to_string(),
            })?;

        Ok((
            Self {
                shared,
                thread: Some(thread),
            },
            first_rx,
        ))
    }

    pub(crate) fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub(crate) fn sample_rate(&self) -> Option<u32> {
        match self.shared.sample_rate.load(Ordering::Acquire) {
            0 => None,
            rate => Some(rate as u32),
        }
    }

    /// Stops the loop and joins the thread.
    ///
    /// After this returns no render invocation is in flight, so the
    /// renderer and platform resources are safe to release.
    pub(crate) fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.shared.set_state(StreamState::Closed);
    }
}

impl Drop for PullSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop<F>(
    shared: &SupervisorShared,
    mut factory: F,
    renderer: &SharedRenderer,
    first_tx: mpsc::Sender<Result<StreamParams, AudioOutError>>,
) where
    F: FnMut() -> Result<PullStream, AudioOutError>,
{
    let mut stream: Option<PullStream> = None;
    let mut staging: Vec<f32> = Vec::new();
    let mut first_tx = Some(first_tx);
    let mut failed_last_open = false;

    while !shared.shutdown.load(Ordering::Acquire) {
        let Some(open_stream) = stream.as_mut() else {
            if failed_last_open {
                // Don't spin while the device is missing.
                std::thread::sleep(REOPEN_DELAY);
                if shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
            }
            shared.set_state(StreamState::Opening);
            match factory() {
                Ok(opened) => {
                    let params = opened.params();
                    shared
                        .sample_rate
                        .store(u64::from(params.sample_rate), Ordering::Release);
                    if let Ok(mut pipeline) = renderer.lock() {
                        pipeline.configure(params.sample_rate);
                    }
                    shared.set_state(StreamState::Running);
                    failed_last_open = false;
                    if let Some(tx) = first_tx.take() {
                        let _ = tx.send(Ok(params));
                    }
                    stream = Some(opened);
                }
                Err(err) => {
                    shared.set_state(StreamState::Closed);
                    failed_last_open = true;
                    if let Some(tx) = first_tx.take() {
                        // The caller surfaces the first failure itself.
                        let _ = tx.send(Err(err));
                    } else {
                        tracing::warn!(%err, "reopen attempt failed; will retry");
                    }
                }
            }
            continue;
        };

        let max_frames = open_stream.params().max_frames;
        let mut buffer = open_stream.block_acquire(&mut staging, max_frames);

        if open_stream.is_closed() {
            // Stale: generation mismatch or missed deadline.
            shared.set_state(StreamState::Stale);
            tracing::warn!(
                reason = %open_stream
                    .close_reason()
                    .map_or_else(|| "closed".to_string(), ToString::to_string),
                "stream went stale; releasing and reopening"
            );
            stream = None;
            shared.set_state(StreamState::Closed);
            continue;
        }

        let frame_count = buffer.frame_count() as u64;
        if frame_count == 0 {
            continue;
        }

        let rate = open_stream.params().sample_rate.max(1);
        let rendered = shared.frames_rendered.load(Ordering::Relaxed);
        let timestamp_micros = rendered * 1_000_000 / u64::from(rate);
        if let Ok(mut pipeline) = renderer.lock() {
            pipeline.render(timestamp_micros, buffer.frames_mut());
        }
        open_stream.release(buffer);
        shared
            .frames_rendered
            .fetch_add(frame_count, Ordering::Relaxed);
    }

    if let Some(mut open_stream) = stream.take() {
        open_stream.close();
    }
    shared.set_state(StreamState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockDevice;
    use crate::controls::RenderControls;
    use crate::render::RenderPipeline;
    use std::sync::Mutex;

    fn renderer() -> (Arc<RenderControls>, SharedRenderer) {
        let controls = Arc::new(RenderControls::new());
        let pipeline = RenderPipeline::new(Arc::clone(&controls));
        (controls, Arc::new(Mutex::new(pipeline)))
    }

    fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        predicate()
    }

    #[test]
    fn test_supervisor_renders_into_device() {
        let (controls, renderer) = renderer();
        controls.set_fade_on(true);

        let mock = MockDevice::new(48_000, 64);
        let factory_mock = mock.clone();
        let (mut supervisor, first) = PullSupervisor::spawn(
            move || Ok(PullStream::new(Box::new(factory_mock.handle()))),
            renderer,
        )
        .unwrap();

        let params = first.recv().unwrap().unwrap();
        assert_eq!(params.sample_rate, 48_000);

        assert!(wait_for(
            || mock.committed_samples() > 48_000,
            Duration::from_secs(5)
        ));
        assert_eq!(supervisor.state(), StreamState::Running);
        assert_eq!(supervisor.sample_rate(), Some(48_000));

        supervisor.shutdown();
        assert_eq!(supervisor.state(), StreamState::Closed);
    }

    #[test]
    fn test_supervisor_reopens_after_generation_bump() {
        let (_controls, renderer) = renderer();

        let mock = MockDevice::new(48_000, 64);
        let factory_mock = mock.clone();
        let (mut supervisor, first) = PullSupervisor::spawn(
            move || Ok(PullStream::new(Box::new(factory_mock.handle()))),
            renderer,
        )
        .unwrap();
        first.recv().unwrap().unwrap();
        assert_eq!(mock.open_count(), 1);

        // Simulate a headphone unplug: the watcher bumps the generation,
        // the stream goes stale, and the supervisor opens a fresh handle
        // capturing the new generation.
        mock.generation().bump();
        assert!(wait_for(|| mock.open_count() >= 2, Duration::from_secs(5)));
        assert!(wait_for(
            || supervisor.state() == StreamState::Running,
            Duration::from_secs(5)
        ));

        // The fresh handle tracks the new generation: reopening stops.
        let opens = mock.open_count();
        std::thread::sleep(Duration::from_millis(50));
        assert!(mock.open_count() <= opens + 1);

        supervisor.shutdown();
    }

    #[test]
    fn test_first_open_failure_is_reported_not_swallowed() {
        let (_controls, renderer) = renderer();

        let (mut supervisor, first) = PullSupervisor::spawn(
            || Err(AudioOutError::NoDefaultDevice),
            renderer,
        )
        .unwrap();

        let err = first.recv().unwrap().unwrap_err();
        assert!(matches!(err, AudioOutError::NoDefaultDevice));
        supervisor.shutdown();
        assert_eq!(supervisor.state(), StreamState::Closed);
    }

    #[test]
    fn test_supervisor_retries_reopens_after_staleness() {
        let (_controls, renderer) = renderer();

        // First open succeeds; after the unplug, two opens fail before the
        // device comes back. The supervisor keeps retrying unattended.
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let factory_attempts = Arc::clone(&attempts);
        let mock = MockDevice::new(44_100, 64);
        let factory_mock = mock.clone();

        let (mut supervisor, first) = PullSupervisor::spawn(
            move || {
                let n = factory_attempts.fetch_add(1, Ordering::SeqCst);
                if n == 1 || n == 2 {
                    Err(AudioOutError::NoDefaultDevice)
                } else {
                    Ok(PullStream::new(Box::new(factory_mock.handle())))
                }
            },
            renderer,
        )
        .unwrap();
        first.recv().unwrap().unwrap();

        mock.generation().bump();
        assert!(wait_for(
            || attempts.load(Ordering::SeqCst) >= 4
                && supervisor.state() == StreamState::Running,
            Duration::from_secs(5)
        ));
        assert_eq!(supervisor.sample_rate(), Some(44_100));

        supervisor.shutdown();
    }

    #[test]
    fn test_shutdown_quiesces_before_return() {
        let (_controls, renderer) = renderer();
        let mock = MockDevice::new(48_000, 64);
        let factory_mock = mock.clone();
        let (mut supervisor, first) = PullSupervisor::spawn(
            move || Ok(PullStream::new(Box::new(factory_mock.handle()))),
            renderer,
        )
        .unwrap();
        first.recv().unwrap().unwrap();

        supervisor.shutdown();
        let after = mock.committed_samples();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(mock.committed_samples(), after, "no renders after shutdown");
    }
}
