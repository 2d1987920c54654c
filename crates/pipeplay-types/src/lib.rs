//! Shared plain-data types for the pipeplay workspace.
//!
//! These are deliberately dependency-light DTOs: probe results, sample
//! formats, device metadata, and the playback position union. The engine
//! crate (`pipeplay-player`) owns all behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Media type of one stream inside a container.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Audio,
    Video,
    /// Subtitles, data, attachments — anything that is not audio or video.
    Other,
}

/// One stream (track) inside a probed container.
///
/// Fields other than `index` and `media_type` are best-effort: containers are
/// not required to report them, and the prober passes through whatever the
/// probe tool emitted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamInfo {
    /// Stream index within the container (the decode tool's `0:<index>`).
    pub index: usize,
    pub media_type: MediaType,
    /// Codec name as reported by the probe tool (for example `mp3`, `flac`).
    pub codec: Option<String>,
    /// Sample rate in Hz (audio streams).
    pub sample_rate: Option<u32>,
    /// Channel count (audio streams).
    pub channels: Option<u16>,
    /// Source bit depth, when the codec reports one.
    pub bits_per_sample: Option<u32>,
    /// Stream duration, when the container reports one.
    pub duration: Option<Duration>,
}

/// Format-level metadata plus the ordered stream list for one media file.
///
/// Immutable once probed; the engine treats it as a snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    /// Container format name (for example `wav`, `mov,mp4,m4a,...`).
    pub container: Option<String>,
    /// Overall duration from the format section.
    pub duration: Option<Duration>,
    /// Overall bit rate in bits per second.
    pub bit_rate: Option<u64>,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    /// Iterate streams of one media type, in container order.
    ///
    /// The iterator borrows `self` and can be re-created at will.
    pub fn streams_of_type(&self, media_type: MediaType) -> impl Iterator<Item = &StreamInfo> {
        self.streams
            .iter()
            .filter(move |s| s.media_type == media_type)
    }

    /// First audio stream in container order, if any.
    pub fn first_audio_stream(&self) -> Option<&StreamInfo> {
        self.streams_of_type(MediaType::Audio).next()
    }

    /// Best known duration: the format-level value, falling back to the
    /// longest stream duration.
    pub fn best_duration(&self) -> Option<Duration> {
        self.duration
            .or_else(|| self.streams.iter().filter_map(|s| s.duration).max())
    }
}

/// Raw PCM sample formats the decode pipe can be asked to produce.
///
/// This is the full supported set; asking for anything else is a type error,
/// not a runtime one.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// 8-bit unsigned.
    U8,
    /// 16-bit signed little-endian.
    S16,
    /// 24-bit signed little-endian, packed.
    S24,
    /// 32-bit signed little-endian.
    S32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S24 => 3,
            SampleFormat::S32 => 4,
        }
    }

    pub fn bits(self) -> u32 {
        (self.bytes_per_sample() as u32) * 8
    }

    /// Codec argument for the decode tool (`-acodec`).
    pub fn ffmpeg_codec(self) -> &'static str {
        match self {
            SampleFormat::U8 => "pcm_u8",
            SampleFormat::S16 => "pcm_s16le",
            SampleFormat::S24 => "pcm_s24le",
            SampleFormat::S32 => "pcm_s32le",
        }
    }

    /// Muxer argument for the decode tool (`-f`).
    pub fn ffmpeg_format(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16le",
            SampleFormat::S24 => "s24le",
            SampleFormat::S32 => "s32le",
        }
    }
}

impl Default for SampleFormat {
    /// 16-bit signed is the interchange default, as in the original tool
    /// chain.
    fn default() -> Self {
        SampleFormat::S16
    }
}

/// Output device metadata snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    /// Position in the registry's enumeration order.
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    /// Preferred output rate in Hz, when the device reports one.
    pub default_sample_rate: Option<u32>,
    /// Whether this is the host's default output device.
    pub is_default: bool,
}

/// Playback position as reported by the engine.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// A session exists but no audio has reached the output device yet.
    Loading,
    /// No session, or the session has ended (naturally or via stop).
    Ended,
    /// Elapsed playback position in seconds.
    Seconds(f64),
}

impl Position {
    /// The numeric position, if playing or paused.
    pub fn seconds(self) -> Option<f64> {
        match self {
            Position::Seconds(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_ended(self) -> bool {
        matches!(self, Position::Ended)
    }

    pub fn is_loading(self) -> bool {
        matches!(self, Position::Loading)
    }
}
