//! Output format negotiation against a device's declared configurations.
//!
//! The selection logic is kept separate from CPAL so it can be tested on
//! synthetic candidates: a request matches a candidate either exactly or
//! when the candidate declares a variable-rate range containing it.

use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SampleRate, SupportedBufferSize};

use crate::error::AudioOutError;

/// Fallback per-cycle frame ceiling when the device does not declare a
/// maximum buffer size: ~1/60s of audio plus 2ms of slack at 48kHz.
const DEFAULT_MAX_FRAMES: usize = 48_000 / 60 + 2 * 48;

/// A device-declared output configuration reduced to what negotiation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FormatCandidate {
    pub channels: u16,
    pub min_hz: u32,
    pub max_hz: u32,
    pub sample_format: SampleFormat,
}

impl FormatCandidate {
    /// True when this candidate is packed-f32 stereo and its declared rate
    /// range contains the request (an exact rate declares min == max).
    pub(crate) fn supports(&self, requested_hz: u32) -> bool {
        self.channels == 2
            && self.sample_format == SampleFormat::F32
            && (self.min_hz..=self.max_hz).contains(&requested_hz)
    }

    fn describe(&self) -> String {
        if self.min_hz == self.max_hz {
            format!("{}ch {} @{}Hz", self.channels, self.sample_format, self.min_hz)
        } else {
            format!(
                "{}ch {} @{}-{}Hz",
                self.channels, self.sample_format, self.min_hz, self.max_hz
            )
        }
    }
}

/// Summarizes candidates for the `NoCompatibleFormat` diagnostic.
pub(crate) fn describe_candidates(candidates: &[FormatCandidate]) -> String {
    if candidates.is_empty() {
        return "none".to_string();
    }
    candidates
        .iter()
        .map(FormatCandidate::describe)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Picks the first candidate supporting the requested rate.
///
/// A device with no stereo pair at all is reported as such; a device that
/// has stereo but not at a usable rate/format gets the full candidate list
/// in the diagnostic.
pub(crate) fn select_candidate(
    candidates: &[FormatCandidate],
    requested_hz: u32,
) -> Result<FormatCandidate, AudioOutError> {
    if let Some(selected) = candidates
        .iter()
        .copied()
        .find(|candidate| candidate.supports(requested_hz))
    {
        return Ok(selected);
    }
    if !candidates.iter().any(|candidate| candidate.channels == 2) {
        return Err(AudioOutError::NoStereoChannels {
            reason: format!(
                "device declares no 2-channel output (available: {})",
                describe_candidates(candidates)
            ),
        });
    }
    Err(AudioOutError::NoCompatibleFormat {
        requested_hz,
        available: describe_candidates(candidates),
    })
}

/// Negotiates a stereo packed-f32 configuration with a CPAL device.
///
/// Returns the stream config pinned at the requested rate and the per-cycle
/// frame ceiling derived from the device's declared maximum buffer size.
pub(crate) fn negotiate_stereo(
    device: &Device,
    requested_hz: u32,
) -> Result<(cpal::StreamConfig, usize), AudioOutError> {
    let ranges: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioOutError::BackendError(e.to_string()))?
        .collect();

    let candidates: Vec<FormatCandidate> = ranges
        .iter()
        .map(|range| FormatCandidate {
            channels: range.channels(),
            min_hz: range.min_sample_rate().0,
            max_hz: range.max_sample_rate().0,
            sample_format: range.sample_format(),
        })
        .collect();

    let selected = select_candidate(&candidates, requested_hz)?;
    let range = ranges
        .into_iter()
        .find(|range| {
            range.channels() == selected.channels
                && range.min_sample_rate().0 == selected.min_hz
                && range.max_sample_rate().0 == selected.max_hz
                && range.sample_format() == selected.sample_format
        })
        .ok_or_else(|| AudioOutError::BackendError("candidate range vanished".to_string()))?;

    let max_frames = match *range.buffer_size() {
        SupportedBufferSize::Range { max, .. } => max as usize,
        SupportedBufferSize::Unknown => DEFAULT_MAX_FRAMES,
    };

    let supported = range
        .try_with_sample_rate(SampleRate(requested_hz))
        .ok_or_else(|| AudioOutError::NoCompatibleFormat {
            requested_hz,
            available: describe_candidates(&candidates),
        })?;

    Ok((supported.config(), max_frames.max(DEFAULT_MAX_FRAMES)))
}
