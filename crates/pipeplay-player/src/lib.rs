//! pipeplay-player — streaming audio playback through an external decode
//! pipe.
//!
//! ## Pipeline
//! 1. **Probe**: `ffprobe` reports container/stream metadata as JSON.
//! 2. **Decode**: `ffmpeg` is spawned per session with a start-offset seek
//!    and writes raw interleaved PCM to its stdout.
//! 3. **Pump**: a background worker reads the pipe in fixed-size chunks and
//!    writes them to the output device through a bounded queue.
//! 4. **Output**: the CPAL callback drains the queue without blocking,
//!    applying volume; while paused it outputs silence and stops draining.
//!
//! The foreground API ([`AudioPlayer`]) is synchronous and never blocks on
//! I/O; worker failures surface through a polled error slot. Seeking always
//! restarts the decode process at the new offset — the pipe cannot seek
//! in-stream.

pub mod caps;
pub mod clock;
pub mod config;
pub mod decode;
pub mod device;
mod engine;
pub mod error;
pub mod output;
pub mod probe;
pub mod queue;
mod session;

pub use caps::{Capabilities, Feature};
pub use config::PlaybackConfig;
pub use device::DeviceRegistry;
pub use engine::AudioPlayer;
pub use error::PlayerError;
pub use output::{CpalBackend, OutputBackend, OutputOptions, OutputSpec, OutputStream, Volume, WriteOutcome};
pub use probe::{ProbeOptions, probe, probe_with, select_stream};

pub use pipeplay_types::{
    DeviceInfo, MediaInfo, MediaType, Position, SampleFormat, StreamInfo,
};
