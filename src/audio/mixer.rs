//! Audio mixer: volume, ducking, summing, limiting
//!
//! Runs inside the device callback at the cadence the hardware driver
//! dictates, so every step is bounded: two mutex-protected buffer reads into
//! reusable scratch storage, then pure arithmetic. No I/O, no waiting, no
//! steady-state allocation.
//!
//! Per invocation:
//! 1. Read n frames from the media buffer and n from the announcement buffer
//!    (never blocks — short reads come back zero-padded).
//! 2. Scale the media block by the master volume.
//! 3. Duck: if any announcement sample exceeds the threshold, attenuate the
//!    whole media block for this invocation.
//! 4. Sum and hard-limit into the device's safety range.

use crate::audio::buffer::RingBuffer;
use crate::config::CHANNELS;
use crate::state::Volume;
use std::sync::Arc;

/// Announcement magnitude above which the media block is ducked
pub const DUCK_THRESHOLD: f32 = 0.001;

/// Attenuation applied to the media block while an announcement is audible
pub const DUCK_FACTOR: f32 = 0.2;

/// Hard output limit, kept inside full scale to avoid clipping distortion at
/// the hardware boundary
pub const LIMITER_CEILING: f32 = 0.95;

/// Mixes the media and announcement buffers into a device buffer.
///
/// One instance lives inside each output stream callback. Internal mixing is
/// always stereo; the device's channel layout is fanned out at the end.
pub struct Mixer {
    media: Arc<RingBuffer>,
    announce: Arc<RingBuffer>,
    volume: Volume,

    // Scratch blocks reused across invocations
    media_block: Vec<f32>,
    announce_block: Vec<f32>,
}

impl Mixer {
    pub fn new(media: Arc<RingBuffer>, announce: Arc<RingBuffer>, volume: Volume) -> Self {
        Self {
            media,
            announce,
            volume,
            media_block: Vec::new(),
            announce_block: Vec::new(),
        }
    }

    /// Fill an interleaved device buffer with `channels` channels per frame.
    ///
    /// The first two device channels carry left/right; further channels are
    /// zeroed; a mono device receives the left channel.
    pub fn fill(&mut self, out: &mut [f32], channels: usize) {
        let frames = out.len() / channels;
        let stereo_len = frames * CHANNELS;

        // First invocation (or device block size change) grows the scratch;
        // afterwards this is a no-op.
        self.media_block.resize(stereo_len, 0.0);
        self.announce_block.resize(stereo_len, 0.0);

        self.media.read_into(&mut self.media_block);
        self.announce.read_into(&mut self.announce_block);

        // Ducking is a coarse per-block decision, not per-sample
        let announcement_active = self
            .announce_block
            .iter()
            .any(|s| s.abs() > DUCK_THRESHOLD);

        let media_gain = if announcement_active {
            self.volume.get() * DUCK_FACTOR
        } else {
            self.volume.get()
        };

        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let left = (self.media_block[i * CHANNELS] * media_gain
                + self.announce_block[i * CHANNELS])
                .clamp(-LIMITER_CEILING, LIMITER_CEILING);
            let right = (self.media_block[i * CHANNELS + 1] * media_gain
                + self.announce_block[i * CHANNELS + 1])
                .clamp(-LIMITER_CEILING, LIMITER_CEILING);

            frame[0] = left;
            if channels > 1 {
                frame[1] = right;
            }
            for extra in frame.iter_mut().skip(CHANNELS) {
                *extra = 0.0;
            }
        }
    }
}
