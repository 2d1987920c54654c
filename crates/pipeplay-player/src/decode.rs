//! External decode pipeline.
//!
//! Seeking is always process-restart: the decode tool is spawned with a
//! start-offset argument and writes raw interleaved PCM to its stdout, which
//! the session worker reads in fixed-size chunks. stderr is kept for
//! diagnostics only. The tool performs sample-rate and channel conversion
//! itself (`-ar`/`-ac`), so nothing downstream resamples.

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::time::Duration;

use crate::error::PlayerError;
use crate::probe::spawn_error;
use pipeplay_types::SampleFormat;

/// Cap on how much stderr is retained for error reports.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Everything needed to spawn one decode process.
#[derive(Clone, Debug)]
pub struct DecodeRequest<'a> {
    pub path: &'a Path,
    /// Container stream index (`-map 0:<index>`).
    pub stream_index: usize,
    pub format: SampleFormat,
    /// Output sample rate in Hz, as negotiated with the output device.
    pub sample_rate: u32,
    /// Output channel count, as negotiated with the output device.
    pub channels: u16,
    /// Where decoding starts.
    pub start_offset: Duration,
    /// Decode tool binary name or path.
    pub tool: &'a str,
}

/// A running decode process and its PCM pipe.
///
/// Teardown is guaranteed: explicit [`teardown`](PipeDecoder::teardown) is
/// idempotent and `Drop` performs it on any exit path that skipped it.
#[derive(Debug)]
pub struct PipeDecoder {
    child: Option<Child>,
    tool: String,
}

impl PipeDecoder {
    /// Spawn the decode process described by `req`.
    pub fn spawn(req: &DecodeRequest<'_>) -> Result<Self, PlayerError> {
        let args = build_args(req);
        tracing::debug!(
            tool = req.tool,
            path = %req.path.display(),
            stream = req.stream_index,
            rate_hz = req.sample_rate,
            channels = req.channels,
            offset_secs = req.start_offset.as_secs_f64(),
            "spawning decode pipe"
        );

        let child = Command::new(req.tool)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(req.tool, e))?;

        Ok(Self {
            child: Some(child),
            tool: req.tool.into(),
        })
    }

    /// Take ownership of the PCM pipe. Returns `None` on the second call.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.take())
    }

    /// Wait for the process to exit and return its status.
    ///
    /// Intended for the end-of-stream path, where the process has already
    /// closed its stdout and exit is imminent.
    pub fn wait(&mut self) -> Result<ExitStatus, PlayerError> {
        match self.child.as_mut() {
            Some(child) => child.wait().map_err(|e| PlayerError::DecodeIo(format!(
                "waiting for `{}`: {e}",
                self.tool
            ))),
            None => Err(PlayerError::DecodeIo(format!(
                "`{}` already torn down",
                self.tool
            ))),
        }
    }

    /// Bounded read of the process's diagnostic output.
    ///
    /// Call after exit; returns the last non-empty portion of stderr.
    pub fn stderr_tail(&mut self) -> Option<String> {
        let stderr = self.child.as_mut()?.stderr.take()?;
        let mut buf = Vec::new();
        let mut limited = stderr.take(STDERR_TAIL_BYTES as u64);
        limited.read_to_end(&mut buf).ok()?;
        let text = String::from_utf8_lossy(&buf);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Terminate the process and reap it. Idempotent.
    ///
    /// Closes the PCM pipe, kills the process if it is still running, then
    /// waits so no zombie is left behind.
    pub fn teardown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        drop(child.stdout.take());

        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(tool = %self.tool, "decode teardown try_wait failed: {e}");
            }
        }

        if let Err(e) = child.kill() {
            tracing::debug!(tool = %self.tool, "decode kill failed (already exited?): {e}");
        }
        if let Err(e) = child.wait() {
            tracing::warn!(tool = %self.tool, "decode wait failed: {e}");
        }
    }
}

impl Drop for PipeDecoder {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Build the decode tool's argument vector.
///
/// `-ss` precedes `-i` so the seek happens on the demuxer, which is both
/// accurate (with `-accurate_seek`) and fast.
fn build_args(req: &DecodeRequest<'_>) -> Vec<OsString> {
    let pre = [
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostdin".to_string(),
        "-accurate_seek".to_string(),
        "-ss".to_string(),
        format_offset(req.start_offset),
        "-i".to_string(),
    ];
    let post = [
        "-map".to_string(),
        format!("0:{}", req.stream_index),
        "-f".to_string(),
        req.format.ffmpeg_format().to_string(),
        "-acodec".to_string(),
        req.format.ffmpeg_codec().to_string(),
        "-ar".to_string(),
        req.sample_rate.to_string(),
        "-ac".to_string(),
        req.channels.to_string(),
        "pipe:1".to_string(),
    ];

    let mut args: Vec<OsString> = pre.into_iter().map(OsString::from).collect();
    args.push(req.path.as_os_str().to_owned());
    args.extend(post.into_iter().map(OsString::from));
    args
}

fn format_offset(offset: Duration) -> String {
    format!("{:.6}", offset.as_secs_f64())
}

/// Convert raw little-endian PCM bytes into interleaved `f32` in [-1, 1].
///
/// A trailing partial sample (possible when the pipe is cut mid-frame) is
/// dropped.
pub fn bytes_to_f32(bytes: &[u8], format: SampleFormat) -> Vec<f32> {
    let width = format.bytes_per_sample();
    let mut out = Vec::with_capacity(bytes.len() / width);

    for sample in bytes.chunks_exact(width) {
        let v = match format {
            SampleFormat::U8 => (sample[0] as f32 - 128.0) / 128.0,
            SampleFormat::S16 => {
                i16::from_le_bytes([sample[0], sample[1]]) as f32 / 32_768.0
            }
            SampleFormat::S24 => {
                let raw = i32::from_le_bytes([0, sample[0], sample[1], sample[2]]) >> 8;
                raw as f32 / 8_388_608.0
            }
            SampleFormat::S32 => {
                i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]) as f32
                    / 2_147_483_648.0
            }
        };
        out.push(v);
    }

    out
}
