//! Ring buffer for PCM sample storage
//!
//! Bounded, overflow-tolerant store of interleaved stereo f32 chunks, the
//! unit of transfer between a producer pipeline and the mixer. Exactly one
//! producer writes and exactly one reader (the mixer) reads; both go through
//! the internal mutex, so neither side needs external coordination.
//!
//! Capacity is a soft target: a write that would overflow evicts the oldest
//! chunks first (newest data always wins), and a single block larger than the
//! whole capacity is still accepted. Reads always return exactly the number
//! of frames requested, padding the tail with silence when the buffer runs
//! short — the mixer never sees a short read.

use crate::config::CHANNELS;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

/// Thread-safe chunk-based audio buffer
///
/// Stores interleaved stereo f32 samples ([L, R, L, R, ...]). All sizes in
/// the public API are in frames (one L+R pair).
pub struct RingBuffer {
    inner: Mutex<Inner>,

    /// Soft capacity in frames
    capacity: usize,

    /// Label used in overflow reports ("media" / "announcement")
    name: &'static str,
}

struct Inner {
    chunks: VecDeque<Vec<f32>>,
    /// Total buffered frames across all chunks
    frames: usize,
}

impl RingBuffer {
    /// Create a buffer holding up to `capacity` frames.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                chunks: VecDeque::new(),
                frames: 0,
            }),
            capacity,
            name,
        }
    }

    /// Append a copy of an interleaved sample block.
    ///
    /// If the block does not fit, the oldest stored chunks are discarded
    /// until it does (or the buffer is empty). Eviction is reported but
    /// non-fatal. An empty block is a no-op.
    pub fn write(&self, samples: &[f32]) {
        debug_assert_eq!(samples.len() % CHANNELS, 0, "partial frame write");
        if samples.is_empty() {
            return;
        }
        let incoming = samples.len() / CHANNELS;

        let mut inner = self.inner.lock().unwrap();

        if inner.frames + incoming > self.capacity {
            let mut dropped = 0;
            while !inner.chunks.is_empty() && inner.frames + incoming > self.capacity {
                let oldest = inner.chunks.pop_front().unwrap();
                let oldest_frames = oldest.len() / CHANNELS;
                inner.frames -= oldest_frames;
                dropped += oldest_frames;
            }
            warn!(
                buffer = self.name,
                dropped_frames = dropped,
                "audio buffer overflow, dropped oldest data"
            );
        }

        inner.chunks.push_back(samples.to_vec());
        inner.frames += incoming;
    }

    /// Fill `out` (interleaved, length = frames * 2) from the front of the
    /// buffer, zero-padding whatever is not available. When the request ends
    /// inside a chunk the chunk is split; no more than requested is consumed.
    pub fn read_into(&self, out: &mut [f32]) {
        debug_assert_eq!(out.len() % CHANNELS, 0, "partial frame read");
        out.fill(0.0);
        let want = out.len() / CHANNELS;

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let mut offset = 0; // frames copied so far

        while offset < want {
            let Some(chunk) = inner.chunks.front_mut() else {
                break;
            };
            let chunk_frames = chunk.len() / CHANNELS;
            let remaining = want - offset;

            if chunk_frames <= remaining {
                out[offset * CHANNELS..(offset + chunk_frames) * CHANNELS].copy_from_slice(chunk);
                offset += chunk_frames;
                inner.chunks.pop_front();
                inner.frames -= chunk_frames;
            } else {
                out[offset * CHANNELS..(offset + remaining) * CHANNELS]
                    .copy_from_slice(&chunk[..remaining * CHANNELS]);
                chunk.drain(..remaining * CHANNELS);
                inner.frames -= remaining;
                offset += remaining;
            }
        }
    }

    /// Allocating convenience wrapper around [`read_into`](Self::read_into);
    /// used off the real-time path.
    pub fn read(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; frames * CHANNELS];
        self.read_into(&mut out);
        out
    }

    /// Discard all buffered data. Used on skip/cancel so no stale audio from
    /// a cancelled track reaches the mixer.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.chunks.clear();
        inner.frames = 0;
    }

    /// Currently buffered frame count.
    ///
    /// Deliberately not transactional with a following `write`: producers use
    /// it for backpressure, which only needs to be approximately correct.
    pub fn occupancy(&self) -> usize {
        self.inner.lock().unwrap().frames
    }

    /// Soft capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an interleaved stereo block of `frames` frames, every sample set
    /// to `value`.
    fn block(frames: usize, value: f32) -> Vec<f32> {
        vec![value; frames * CHANNELS]
    }

    #[test]
    fn test_write_read_roundtrip() {
        let buffer = RingBuffer::new("test", 100);
        buffer.write(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(buffer.occupancy(), 2);

        let out = buffer.read(2);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(buffer.occupancy(), 0);
    }

    #[test]
    fn test_empty_write_is_noop() {
        let buffer = RingBuffer::new("test", 100);
        buffer.write(&[]);
        assert_eq!(buffer.occupancy(), 0);
    }

    #[test]
    fn test_short_read_pads_with_silence() {
        let buffer = RingBuffer::new("test", 100);
        buffer.write(&[0.5, 0.5]);

        let out = buffer.read(3);
        assert_eq!(out.len(), 3 * CHANNELS);
        assert_eq!(&out[..2], &[0.5, 0.5]);
        assert!(out[2..].iter().all(|&s| s == 0.0));
        assert_eq!(buffer.occupancy(), 0);
    }

    #[test]
    fn test_read_from_empty_is_all_silence() {
        let buffer = RingBuffer::new("test", 100);
        let out = buffer.read(8);
        assert_eq!(out.len(), 8 * CHANNELS);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_partial_chunk_split() {
        let buffer = RingBuffer::new("test", 100);
        buffer.write(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);

        // Read ends inside the chunk: front is split, remainder preserved
        let first = buffer.read(2);
        assert_eq!(first, vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(buffer.occupancy(), 1);

        let second = buffer.read(1);
        assert_eq!(second, vec![3.0, 3.0]);
    }

    #[test]
    fn test_read_spans_chunks() {
        let buffer = RingBuffer::new("test", 100);
        buffer.write(&block(2, 1.0));
        buffer.write(&block(2, 2.0));

        let out = buffer.read(3);
        assert_eq!(&out[..4], &block(2, 1.0)[..]);
        assert_eq!(&out[4..6], &[2.0, 2.0]);
        assert_eq!(buffer.occupancy(), 1);
    }

    #[test]
    fn test_overflow_evicts_oldest_first() {
        let buffer = RingBuffer::new("test", 4);
        buffer.write(&block(2, 1.0));
        buffer.write(&block(2, 2.0));
        assert_eq!(buffer.occupancy(), 4);

        // Needs 2 frames of room: oldest chunk is evicted
        buffer.write(&block(2, 3.0));
        assert_eq!(buffer.occupancy(), 4);

        let out = buffer.read(4);
        assert_eq!(&out[..4], &block(2, 2.0)[..]);
        assert_eq!(&out[4..], &block(2, 3.0)[..]);
    }

    #[test]
    fn test_occupancy_never_exceeds_capacity_for_fitting_writes() {
        let buffer = RingBuffer::new("test", 10);
        for i in 0..20 {
            buffer.write(&block(3, i as f32));
            assert!(buffer.occupancy() <= 10);
        }
    }

    #[test]
    fn test_oversized_single_write_accepted() {
        // Capacity is a soft target: one block larger than the whole buffer
        // is still accepted after everything older is evicted.
        let buffer = RingBuffer::new("test", 4);
        buffer.write(&block(2, 1.0));
        buffer.write(&block(6, 2.0));

        assert_eq!(buffer.occupancy(), 6);
        let out = buffer.read(6);
        assert_eq!(out, block(6, 2.0));
    }

    #[test]
    fn test_clear() {
        let buffer = RingBuffer::new("test", 100);
        buffer.write(&block(5, 1.0));
        assert_eq!(buffer.occupancy(), 5);

        buffer.clear();
        assert_eq!(buffer.occupancy(), 0);
        assert!(buffer.read(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_retains_most_recent_writes_up_to_capacity() {
        let buffer = RingBuffer::new("test", 6);
        for i in 0..10 {
            buffer.write(&block(2, i as f32));
        }

        // The last three 2-frame chunks survive, in order
        let out = buffer.read(6);
        assert_eq!(&out[..4], &block(2, 7.0)[..]);
        assert_eq!(&out[4..8], &block(2, 8.0)[..]);
        assert_eq!(&out[8..], &block(2, 9.0)[..]);
    }
}
