//! Error taxonomy for the playback engine.
//!
//! Everything detectable before a session starts is returned synchronously;
//! failures inside a running session are captured in the session's exception
//! slot and retrieved via [`AudioPlayer::take_error`](crate::AudioPlayer::take_error).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// The external tool binary is not on PATH.
    #[error("`{tool}` not found on PATH")]
    ToolNotFound { tool: String },

    /// The OS failed to create the tool process for a reason other than a
    /// missing binary.
    #[error("failed to spawn `{tool}`")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The probe tool exited abnormally or produced unparseable output.
    #[error("could not parse `{tool}` output: {reason}")]
    Parse { tool: String, reason: String },

    /// Strict decoding was requested and the tool output was not valid UTF-8.
    #[error("`{tool}` output is not valid UTF-8")]
    InvalidEncoding { tool: String },

    /// No stream satisfied the selection request.
    #[error("no matching audio stream (requested index {requested:?})")]
    NoSuchStream { requested: Option<usize> },

    /// Device index outside the registry's enumeration.
    #[error("device index {index} out of range (0..{count})")]
    InvalidDevice { index: usize, count: usize },

    /// Reading the decode pipe failed, or the decode process exited
    /// abnormally. Carries the tool's diagnostic output when available.
    #[error("decode stream failed: {0}")]
    DecodeIo(String),

    /// Opening or writing to the output device failed.
    #[error("output device error: {0}")]
    OutputDevice(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = PlayerError::ToolNotFound {
            tool: "ffprobe".into(),
        };
        assert!(err.to_string().contains("ffprobe"));

        let err = PlayerError::InvalidDevice { index: 9, count: 2 };
        assert!(err.to_string().contains('9'));
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn spawn_preserves_source() {
        use std::error::Error as _;
        let err = PlayerError::Spawn {
            tool: "ffmpeg".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.source().is_some());
    }
}
