//! Audio subsystem: ring buffers, the mixer, and device output.

pub mod buffer;
pub mod mixer;
pub mod output;

pub use buffer::RingBuffer;
pub use mixer::Mixer;
pub use output::AudioOutput;
