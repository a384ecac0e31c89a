//! Channel routing for the push topology.
//!
//! The OS hands the push callback a set of destination sub-buffers, each
//! covering a contiguous run of device channels. The router locates the
//! sub-buffers holding the negotiated left/right channels by matching
//! starting-channel indices, renders into an interleaved scratch buffer,
//! then de-interleaves into each destination honoring its stride.
//!
//! This runs on an OS-owned real-time thread: it never blocks, never
//! allocates, and degrades to silence on any malformed invocation.

use crate::render::Renderer;

/// One OS-provided destination sub-buffer.
///
/// `samples` is interleaved across `channels` device channels;
/// `starting_channel` is the 1-based index of its first channel, matching
/// how audio HALs number channels.
#[derive(Debug)]
pub struct Destination<'a> {
    /// Writable samples, interleaved across this destination's channels.
    pub samples: &'a mut [f32],
    /// Number of interleaved channels in `samples`.
    pub channels: u16,
    /// 1-based device channel index of the first channel.
    pub starting_channel: u32,
}

impl Destination<'_> {
    fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Where one of our stereo channels landed: destination index, sample
/// offset of the channel within a frame, stride, frame count.
#[derive(Debug, Clone, Copy)]
struct Binding {
    destination: usize,
    offset: usize,
    stride: usize,
    frame_count: usize,
}

/// Locates the destinations covering `selected` left/right device channels.
fn bind_channels(destinations: &[Destination<'_>], selected: [u32; 2]) -> [Option<Binding>; 2] {
    let mut bindings = [None, None];
    for (index, destination) in destinations.iter().enumerate() {
        let first = destination.starting_channel;
        for channel_offset in 0..u32::from(destination.channels) {
            let device_channel = first + channel_offset;
            for (side, &want) in selected.iter().enumerate() {
                if device_channel == want {
                    bindings[side] = Some(Binding {
                        destination: index,
                        offset: channel_offset as usize,
                        stride: destination.channels as usize,
                        frame_count: destination.frame_count(),
                    });
                }
            }
        }
    }
    bindings
}

/// Renders one push cycle into the OS destinations.
///
/// On success, the stereo signal is rendered into `scratch` and
/// de-interleaved into the bound destinations. When the invocation is
/// malformed - a selected channel is missing, the declared left/right frame
/// counts disagree, or the cycle exceeds the scratch capacity - every
/// destination is zero-filled and the renderer is not called, so the cycle
/// is audibly silent but never blocks or panics.
pub(crate) fn route_stereo(
    destinations: &mut [Destination<'_>],
    selected: [u32; 2],
    scratch: &mut [f32],
    timestamp_micros: u64,
    renderer: &mut dyn Renderer,
) {
    let [left, right] = bind_channels(destinations, selected);
    let (Some(left), Some(right)) = (left, right) else {
        silence(destinations);
        return;
    };
    if left.frame_count != right.frame_count {
        silence(destinations);
        return;
    }
    let frame_count = left.frame_count;
    if frame_count * 2 > scratch.len() {
        // Cycle larger than the preallocated scratch; cannot allocate here.
        silence(destinations);
        return;
    }

    let scratch = &mut scratch[..frame_count * 2];
    scratch.fill(0.0);
    renderer.render(timestamp_micros, scratch);

    for (side, binding) in [(0usize, left), (1usize, right)] {
        let samples = &mut *destinations[binding.destination].samples;
        for frame in 0..frame_count {
            samples[frame * binding.stride + binding.offset] = scratch[frame * 2 + side];
        }
    }
}

fn silence(destinations: &mut [Destination<'_>]) {
    for destination in destinations {
        destination.samples.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes a recognizable ramp so routing is observable.
    struct RampRenderer;

    impl Renderer for RampRenderer {
        fn render(&mut self, _timestamp_micros: u64, frames: &mut [f32]) {
            for (i, frame) in frames.chunks_exact_mut(2).enumerate() {
                frame[0] = i as f32 + 0.25; // left
                frame[1] = -(i as f32) - 0.25; // right
            }
        }
    }

    #[test]
    fn test_routes_single_interleaved_stereo_destination() {
        let mut samples = [9.0f32; 8]; // 4 frames, 2 channels
        let mut destinations = [Destination {
            samples: &mut samples,
            channels: 2,
            starting_channel: 1,
        }];
        let mut scratch = [0.0f32; 16];

        route_stereo(&mut destinations, [1, 2], &mut scratch, 0, &mut RampRenderer);

        assert_eq!(samples, [0.25, -0.25, 1.25, -1.25, 2.25, -2.25, 3.25, -3.25]);
    }

    #[test]
    fn test_routes_split_mono_destinations_with_swapped_order() {
        let mut right_samples = [9.0f32; 3];
        let mut left_samples = [9.0f32; 3];
        // Destinations arrive in device order, not left/right order.
        let mut destinations = [
            Destination {
                samples: &mut right_samples,
                channels: 1,
                starting_channel: 2,
            },
            Destination {
                samples: &mut left_samples,
                channels: 1,
                starting_channel: 1,
            },
        ];
        let mut scratch = [0.0f32; 8];

        route_stereo(&mut destinations, [1, 2], &mut scratch, 0, &mut RampRenderer);

        assert_eq!(left_samples, [0.25, 1.25, 2.25]);
        assert_eq!(right_samples, [-0.25, -1.25, -2.25]);
    }

    #[test]
    fn test_routes_strided_multichannel_destination() {
        // 8-channel device; our pair sits on channels 3 and 4.
        let mut samples = [9.0f32; 16]; // 2 frames x 8 channels
        let mut destinations = [Destination {
            samples: &mut samples,
            channels: 8,
            starting_channel: 1,
        }];
        let mut scratch = [0.0f32; 8];

        route_stereo(&mut destinations, [3, 4], &mut scratch, 0, &mut RampRenderer);

        assert_eq!(samples[2], 0.25);
        assert_eq!(samples[3], -0.25);
        assert_eq!(samples[10], 1.25);
        assert_eq!(samples[11], -1.25);
        // Unselected channels untouched.
        assert_eq!(samples[0], 9.0);
        assert_eq!(samples[15], 9.0);
    }

    #[test]
    fn test_mismatched_frame_counts_silences_and_skips_render() {
        struct PanicRenderer;
        impl Renderer for PanicRenderer {
            fn render(&mut self, _: u64, _: &mut [f32]) {
                panic!("renderer must not run on a malformed cycle");
            }
        }

        let mut left_samples = [9.0f32; 4];
        let mut right_samples = [9.0f32; 3];
        let mut destinations = [
            Destination {
                samples: &mut left_samples,
                channels: 1,
                starting_channel: 1,
            },
            Destination {
                samples: &mut right_samples,
                channels: 1,
                starting_channel: 2,
            },
        ];
        let mut scratch = [0.0f32; 16];

        route_stereo(&mut destinations, [1, 2], &mut scratch, 0, &mut PanicRenderer);

        assert!(left_samples.iter().all(|&s| s == 0.0));
        assert!(right_samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_missing_channel_silences() {
        let mut samples = [9.0f32; 4];
        let mut destinations = [Destination {
            samples: &mut samples,
            channels: 1,
            starting_channel: 1, // right channel (2) never appears
        }];
        let mut scratch = [0.0f32; 16];

        route_stereo(&mut destinations, [1, 2], &mut scratch, 0, &mut RampRenderer);

        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_oversized_cycle_silences_instead_of_allocating() {
        let mut samples = [9.0f32; 64];
        let mut destinations = [Destination {
            samples: &mut samples,
            channels: 2,
            starting_channel: 1,
        }];
        let mut scratch = [0.0f32; 8]; // too small for 32 frames

        route_stereo(&mut destinations, [1, 2], &mut scratch, 0, &mut RampRenderer);

        assert!(samples.iter().all(|&s| s == 0.0));
    }
}
