//! Container/stream metadata probing via an external tool.
//!
//! Runs `ffprobe` (or a caller-supplied equivalent) requesting JSON output,
//! then converts the tool's stringly-typed document into [`MediaInfo`]. One
//! short-lived process per call; no other side effects.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;

use crate::error::PlayerError;
use pipeplay_types::{MediaInfo, MediaType, StreamInfo};

/// Options for a probe invocation.
#[derive(Clone, Debug)]
pub struct ProbeOptions {
    /// Probe tool binary name or path.
    pub tool: String,
    /// When `true`, non-UTF-8 tool output fails with
    /// [`PlayerError::InvalidEncoding`] instead of being decoded lossily.
    pub strict_utf8: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            tool: "ffprobe".into(),
            strict_utf8: false,
        }
    }
}

/// Probe `path` with the default options.
pub fn probe(path: &Path) -> Result<MediaInfo, PlayerError> {
    probe_with(path, &ProbeOptions::default())
}

/// Probe `path`, returning format- and stream-level metadata.
pub fn probe_with(path: &Path, opts: &ProbeOptions) -> Result<MediaInfo, PlayerError> {
    let output = Command::new(&opts.tool)
        .args([
            "-loglevel",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(&opts.tool, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PlayerError::Parse {
            tool: opts.tool.clone(),
            reason: format!(
                "exit status {}: {}",
                output.status,
                stderr.trim().lines().last().unwrap_or("")
            ),
        });
    }

    let text = decode_output(output.stdout, &opts.tool, opts.strict_utf8)?;
    tracing::debug!(path = %path.display(), tool = %opts.tool, "probed media file");
    parse_probe_json(&text, &opts.tool)
}

/// Select one audio stream: `None` picks the first audio stream, `Some(i)`
/// the i-th audio stream in container order.
pub fn select_stream(
    media: &MediaInfo,
    requested: Option<usize>,
) -> Result<&StreamInfo, PlayerError> {
    let selected = match requested {
        None => media.first_audio_stream(),
        Some(i) => media.streams_of_type(MediaType::Audio).nth(i),
    };
    selected.ok_or(PlayerError::NoSuchStream { requested })
}

pub(crate) fn spawn_error(tool: &str, source: std::io::Error) -> PlayerError {
    if source.kind() == std::io::ErrorKind::NotFound {
        PlayerError::ToolNotFound { tool: tool.into() }
    } else {
        PlayerError::Spawn {
            tool: tool.into(),
            source,
        }
    }
}

fn decode_output(bytes: Vec<u8>, tool: &str, strict: bool) -> Result<String, PlayerError> {
    if strict {
        String::from_utf8(bytes).map_err(|_| PlayerError::InvalidEncoding { tool: tool.into() })
    } else {
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// ffprobe reports most numbers as JSON strings; keep the raw document
// stringly-typed and convert leniently below.

#[derive(Deserialize)]
struct RawProbe {
    #[serde(default)]
    format: Option<RawFormat>,
    #[serde(default)]
    streams: Vec<RawStream>,
}

#[derive(Deserialize)]
struct RawFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Deserialize)]
struct RawStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
    bits_per_sample: Option<u32>,
    bits_per_raw_sample: Option<String>,
    duration: Option<String>,
}

fn parse_probe_json(text: &str, tool: &str) -> Result<MediaInfo, PlayerError> {
    let raw: RawProbe = serde_json::from_str(text).map_err(|e| PlayerError::Parse {
        tool: tool.into(),
        reason: e.to_string(),
    })?;

    let (container, duration, bit_rate) = match raw.format {
        Some(f) => (
            f.format_name,
            f.duration.as_deref().and_then(parse_seconds),
            f.bit_rate.as_deref().and_then(|s| s.parse().ok()),
        ),
        None => (None, None, None),
    };

    let streams = raw.streams.into_iter().map(convert_stream).collect();

    Ok(MediaInfo {
        container,
        duration,
        bit_rate,
        streams,
    })
}

fn convert_stream(raw: RawStream) -> StreamInfo {
    let media_type = match raw.codec_type.as_deref() {
        Some("audio") => MediaType::Audio,
        Some("video") => MediaType::Video,
        _ => MediaType::Other,
    };

    // Some codecs only report a raw bit depth, and PCM reports 0 for the
    // coded one.
    let bits_per_sample = raw
        .bits_per_sample
        .filter(|&b| b > 0)
        .or_else(|| raw.bits_per_raw_sample.as_deref().and_then(|s| s.parse().ok()));

    StreamInfo {
        index: raw.index,
        media_type,
        codec: raw.codec_name,
        sample_rate: raw.sample_rate.as_deref().and_then(|s| s.parse().ok()),
        channels: raw.channels,
        bits_per_sample,
        duration: raw.duration.as_deref().and_then(parse_seconds),
    }
}

fn parse_seconds(s: &str) -> Option<Duration> {
    let secs: f64 = s.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
