//! Error types for masking-audio.
//!
//! Errors are split by kind:
//! - **Configuration**: the system cannot satisfy the request (no device,
//!   no compatible format). Returned from `open_stereo`.
//! - **Resource**: OS resource creation failed (stream, thread).
//! - **Runtime**: the device misbehaved mid-stream. These close the stream
//!   silently and are surfaced as [`StreamState`](crate::StreamState)
//!   transitions, never through the render call.
//! - **Programming**: API misuse (second concurrent open). Returned as an
//!   error rather than an assert so the single-open invariant stays
//!   testable.

/// Classification of an [`AudioOutError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The system cannot satisfy the requested configuration.
    Configuration,
    /// An OS resource could not be created.
    Resource,
    /// The device became unusable while streaming.
    Runtime,
    /// The API was misused; a defect in the caller.
    Programming,
}

/// Errors produced by the audio output engine.
///
/// All variants carry a human-readable reason via `Display`. Runtime errors
/// discovered on the audio path are never returned through the render
/// contract; they flag the stream Closed and the supervisor decides whether
/// to retry.
#[derive(Debug, thiserror::Error)]
pub enum AudioOutError {
    /// No default output device is configured on this system.
    #[error("no default output device configured")]
    NoDefaultDevice,

    /// The device exposes no stereo channel pair we can bind to.
    #[error("could not select stereo channels: {reason}")]
    NoStereoChannels {
        /// Why no pair could be matched.
        reason: String,
    },

    /// No packed-f32 stereo format covers the requested rate.
    #[error("no compatible stereo f32 format at {requested_hz}Hz (available: {available})")]
    NoCompatibleFormat {
        /// The sample rate that was requested.
        requested_hz: u32,
        /// Summary of the formats the device declared.
        available: String,
    },

    /// The device rejected the start request.
    #[error("could not start output device: {reason}")]
    DeviceStartFailed {
        /// Reason reported by the platform.
        reason: String,
    },

    /// An OS resource (stream, event, thread) could not be created.
    #[error("could not create {what}: {reason}")]
    ResourceCreation {
        /// The resource that failed.
        what: &'static str,
        /// Reason reported by the platform.
        reason: String,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),

    /// The device stopped signalling readiness within the deadline.
    #[error("device unresponsive: missed refill deadline")]
    DeviceUnresponsive,

    /// The OS default output device changed while the stream was open.
    #[error("default output device changed")]
    DefaultDeviceChanged,

    /// `open_stereo` was called while a stream is already open.
    #[error("a stream is already open on this engine")]
    StreamAlreadyOpen,
}

impl AudioOutError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoDefaultDevice | Self::NoStereoChannels { .. } | Self::NoCompatibleFormat { .. } => {
                ErrorKind::Configuration
            }
            Self::DeviceStartFailed { .. }
            | Self::ResourceCreation { .. }
            | Self::BackendError(_) => ErrorKind::Resource,
            Self::DeviceUnresponsive | Self::DefaultDeviceChanged => ErrorKind::Runtime,
            Self::StreamAlreadyOpen => ErrorKind::Programming,
        }
    }
}
