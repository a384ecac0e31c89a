//! # masking-audio
//!
//! Real-time stereo masking-sound output for desktop focus timers.
//!
//! `masking-audio` opens the platform default output device via CPAL,
//! negotiates a packed 32-bit float stereo format, and feeds it a continuous
//! stream of synthesized masking sound (crossfed pink noise, plus an optional
//! diagnostic reference tone) with glitch-free 1-second start/stop fades.
//! When the default device changes or stops responding, the stream closes
//! itself and the pull supervisor reopens it without user action.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use masking_audio::{AudioEngine, Topology};
//!
//! let mut engine = AudioEngine::new(Topology::Pull);
//! engine.open_stereo(48_000)?;
//!
//! engine.start();                 // fade masking noise in over 1s
//! std::thread::sleep(std::time::Duration::from_secs(25 * 60));
//! engine.stop();                  // fade out over 1s
//!
//! engine.close();
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Control thread**: owns the [`AudioEngine`], issues open/close and
//!   start/stop; tunable writes are relaxed atomics.
//! - **Audio thread**: either engine-owned (pull topology, a supervisor
//!   thread looping `block_acquire → render → release`) or OS-owned (push
//!   topology, the CPAL callback renders in place and never blocks).
//!
//! All DSP state lives in one [`RenderPipeline`] that survives stream
//! reopens, so device hot-swaps never reset fades or filter state.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample domains
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod backend;
mod controls;
mod engine;
mod error;
pub mod render;
mod supervisor;

pub use backend::{
    Buffer, DeviceGeneration, MockDevice, MockDeviceHandle, PullDevice, PullStream, StreamParams,
};
pub use controls::{Mode, RenderControls};
pub use engine::{AudioEngine, Topology};
pub use error::{AudioOutError, ErrorKind};
pub use render::{RenderPipeline, Renderer, SharedRenderer};
pub use supervisor::StreamState;
