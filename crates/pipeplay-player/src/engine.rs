//! The playback engine: transport API plus the per-session worker thread.
//!
//! One worker thread exists per active session. The worker probes the file,
//! opens the output stream, spawns the decode pipe at the session's seek
//! offset, then pumps fixed-size chunks from the pipe into the output until
//! end-of-stream, cancellation, or an error. All failures inside the worker
//! land in the session's error slot and are retrieved with
//! [`AudioPlayer::take_error`]; the foreground API never blocks on I/O and
//! never panics across the thread boundary.
//!
//! `play()`, `set_position()`, and `stop()` fully tear down the previous
//! session (cancel flag, then join) before doing anything else, so no two
//! workers are ever alive for one engine instance.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::clock;
use crate::config::PlaybackConfig;
use crate::decode::{self, DecodeRequest, PipeDecoder};
use crate::device::DeviceRegistry;
use crate::error::PlayerError;
use crate::output::{
    CpalBackend, OutputBackend, OutputOptions, OutputSpec, Volume, WriteOutcome,
};
use crate::probe::{self, ProbeOptions};
use crate::session::{SessionShared, SessionState};
use pipeplay_types::{DeviceInfo, MediaInfo, Position, SampleFormat};

/// Plays one audio file through an output device with transport controls.
///
/// The foreground API is synchronous and non-blocking: decoding happens on a
/// background worker, and `stop()` is guaranteed on scope exit via `Drop`.
///
/// ```no_run
/// use pipeplay_player::AudioPlayer;
///
/// let mut player = AudioPlayer::new("/music/track.flac");
/// player.play(0.0);
/// player.join(None);
/// if let Some(err) = player.take_error() {
///     eprintln!("playback failed: {err}");
/// }
/// ```
pub struct AudioPlayer {
    path: PathBuf,
    stream: Option<usize>,
    format: SampleFormat,
    config: PlaybackConfig,
    decode_tool: String,
    probe_opts: ProbeOptions,
    devices: DeviceRegistry,
    backend: Arc<dyn OutputBackend>,
    volume: Arc<Volume>,
    shared: Arc<SessionShared>,
    session: Option<SessionHandle>,
}

struct SessionHandle {
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl AudioPlayer {
    /// Create a player for `path` using the CPAL output backend.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_backend(path, Arc::new(CpalBackend))
    }

    /// Create a player with a custom output backend (tests, other platforms).
    pub fn with_backend(path: impl Into<PathBuf>, backend: Arc<dyn OutputBackend>) -> Self {
        Self {
            path: path.into(),
            stream: None,
            format: SampleFormat::default(),
            config: PlaybackConfig::default(),
            decode_tool: "ffmpeg".into(),
            probe_opts: ProbeOptions::default(),
            devices: DeviceRegistry::new(),
            backend,
            volume: Arc::new(Volume::new(1.0)),
            shared: Arc::new(SessionShared::new()),
            session: None,
        }
    }

    /// Change the file played by subsequent `play()` calls.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
        // A different file means the cached duration is stale.
        self.shared.update(|s| s.duration = None);
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Select which audio stream to decode: `None` picks the first audio
    /// stream, `Some(i)` the i-th audio stream.
    pub fn set_stream(&mut self, stream: Option<usize>) {
        self.stream = stream;
    }

    /// Output sample format requested from the decode pipe.
    pub fn set_format(&mut self, format: SampleFormat) {
        self.format = format;
    }

    /// Frames read from the decode pipe per chunk. Clamped to at least one.
    pub fn set_chunk_frames(&mut self, frames: usize) {
        self.config.chunk_frames = frames.max(1);
    }

    /// Target buffering between the pipe and the device, in seconds.
    pub fn set_buffer_seconds(&mut self, seconds: f32) {
        self.config.buffer_seconds = seconds;
    }

    /// Override the decode tool binary (default `ffmpeg`).
    pub fn set_decode_tool(&mut self, tool: impl Into<String>) {
        self.decode_tool = tool.into();
    }

    /// Override the probe tool binary (default `ffprobe`).
    pub fn set_probe_tool(&mut self, tool: impl Into<String>) {
        self.probe_opts.tool = tool.into();
    }

    /// Fail probing with `InvalidEncoding` on non-UTF-8 tool output instead
    /// of decoding lossily.
    pub fn set_strict_probe_encoding(&mut self, strict: bool) {
        self.probe_opts.strict_utf8 = strict;
    }

    /// Probe the current file synchronously and cache its duration.
    pub fn probe(&self) -> Result<MediaInfo, PlayerError> {
        let info = probe::probe_with(&self.path, &self.probe_opts)?;
        self.shared.update(|s| s.duration = info.best_duration());
        Ok(info)
    }

    /// Media duration, when a probe (explicit or session-internal) has
    /// determined one.
    pub fn duration(&self) -> Option<Duration> {
        self.shared.lock().duration
    }

    /// Number of audio devices the host reports.
    pub fn device_count(&self) -> usize {
        self.devices.count()
    }

    /// Device metadata by index; `None` describes the currently selected
    /// (or default) output device.
    pub fn device_info(&self, index: Option<usize>) -> Result<DeviceInfo, PlayerError> {
        self.devices.info(index)
    }

    /// Select the output device used by sessions created after this call.
    ///
    /// The running session, if any, is unaffected. `None` re-affirms the
    /// current default and changes nothing.
    pub fn set_output_device(&mut self, index: Option<usize>) -> Result<(), PlayerError> {
        self.devices.set_output(index)
    }

    /// Start playback at `position_secs` (seconds from the beginning).
    ///
    /// Any current session is stopped first; if the position is at or past
    /// the known media duration this is a no-op. Failures after this call
    /// returns are reported through [`take_error`](Self::take_error).
    pub fn play(&mut self, position_secs: f64) {
        self.stop_session();

        let offset = offset_from_secs(position_secs);
        if let Some(total) = self.shared.lock().duration {
            if offset >= total {
                tracing::debug!(
                    offset_secs = offset.as_secs_f64(),
                    "play position at or past end; nothing to do"
                );
                return;
            }
        }

        tracing::info!(
            path = %self.path.display(),
            offset_secs = offset.as_secs_f64(),
            "starting playback session"
        );
        self.start_session(offset, false, false);
    }

    /// Pause playback. No-op unless the session is currently `Playing` and
    /// no reposition is in flight.
    pub fn pause(&self) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        self.shared.update(|s| {
            if s.state == SessionState::Playing && !s.reposition {
                s.pause_start = Some(Instant::now());
                s.state = SessionState::Paused;
                sess.paused.store(true, Ordering::Relaxed);
            }
        });
    }

    /// Resume playback. No-op unless the session is currently `Paused` and
    /// no reposition is in flight.
    pub fn resume(&self) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        self.shared.update(|s| {
            if s.state == SessionState::Paused && !s.reposition {
                if let Some(pause_start) = s.pause_start.take() {
                    s.paused_accum += pause_start.elapsed();
                }
                s.state = SessionState::Playing;
                sess.paused.store(false, Ordering::Relaxed);
            }
        });
    }

    /// Stop playback: terminate the decode process and join the worker
    /// before returning.
    pub fn stop(&mut self) {
        self.stop_session();
    }

    /// Seek to `position_secs` by restarting the decode session there.
    ///
    /// Pause state is preserved: a paused player stays paused at the new
    /// position once the reposition completes (observable via
    /// [`is_repositioning`](Self::is_repositioning)).
    pub fn set_position(&mut self, position_secs: f64) {
        let was_paused = self.is_paused();
        self.stop_session();

        let offset = offset_from_secs(position_secs);
        if let Some(total) = self.shared.lock().duration {
            if offset >= total {
                return;
            }
        }

        tracing::info!(
            offset_secs = offset.as_secs_f64(),
            was_paused,
            "repositioning playback"
        );
        self.start_session(offset, true, was_paused);
    }

    /// Current playback position.
    pub fn position(&self) -> Position {
        let g = self.shared.lock();
        match g.state {
            SessionState::Idle | SessionState::Ended => Position::Ended,
            SessionState::Spawning | SessionState::Loading => Position::Loading,
            SessionState::Playing | SessionState::Paused | SessionState::Draining => {
                match g.start {
                    Some(start) => Position::Seconds(
                        clock::elapsed(
                            start,
                            g.paused_accum,
                            g.pause_start,
                            g.seek_offset,
                            Instant::now(),
                        )
                        .as_secs_f64(),
                    ),
                    None => Position::Loading,
                }
            }
        }
    }

    /// Whether a session is loading, playing, paused, or draining.
    pub fn is_busy(&self) -> bool {
        self.shared.lock().state.is_busy()
    }

    /// Whether playback is paused (including the pause an in-flight
    /// reposition will restore).
    pub fn is_paused(&self) -> bool {
        let g = self.shared.lock();
        g.state == SessionState::Paused || (g.reposition && g.resume_paused)
    }

    /// Whether a reposition started by [`set_position`](Self::set_position)
    /// has not yet reached the output device.
    pub fn is_repositioning(&self) -> bool {
        self.shared.lock().reposition
    }

    /// Set the output volume. Values outside `[0, 1]` are ignored.
    pub fn set_volume(&self, value: f32) {
        if (0.0..=1.0).contains(&value) {
            self.volume.set(value);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Block until the session ends, or `timeout` elapses.
    ///
    /// Returns `true` when the session is over (also when nothing is
    /// playing). A timeout has no side effects.
    pub fn join(&mut self, timeout: Option<Duration>) -> bool {
        let ended = self.shared.wait_not_busy(timeout);
        if ended {
            // Reap the worker thread; it is already past its last state
            // transition.
            self.stop_session();
        }
        ended
    }

    /// Take the error captured by the background worker, if any.
    ///
    /// The slot is cleared by this call; a later failure overwrites an
    /// unread one.
    pub fn take_error(&self) -> Option<PlayerError> {
        self.shared.update(|s| s.error.take())
    }

    fn start_session(&mut self, offset: Duration, reposition: bool, resume_paused: bool) {
        self.shared.reset_for_session(offset, reposition, resume_paused);

        let cancel = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            path: self.path.clone(),
            stream: self.stream,
            format: self.format,
            config: self.config.clone(),
            decode_tool: self.decode_tool.clone(),
            probe_opts: self.probe_opts.clone(),
            device_index: self.devices.selected_index(),
            backend: self.backend.clone(),
            volume: self.volume.clone(),
            shared: self.shared.clone(),
            cancel: cancel.clone(),
            paused: paused.clone(),
        };
        let join = std::thread::spawn(move || ctx.run());

        self.session = Some(SessionHandle {
            cancel,
            paused,
            join,
        });
    }

    /// Cancel the current session and join its worker. Safe in any state.
    fn stop_session(&mut self) {
        if let Some(sess) = self.session.take() {
            sess.cancel.store(true, Ordering::Relaxed);
            let _ = sess.join.join();
        }
        // Defensive close in case the worker never ran to completion
        // (panicked decode tool wrapper, for example).
        self.shared.update(|s| {
            if s.state.is_busy() {
                s.state = SessionState::Ended;
                s.reposition = false;
            }
        });
    }
}

impl Drop for AudioPlayer {
    /// Equivalent to calling [`stop`](Self::stop) on scope exit.
    fn drop(&mut self) {
        self.stop_session();
    }
}

/// Clamp a caller-supplied seconds value into a seek offset.
///
/// Negative and NaN positions map to zero; values too large for a `Duration`
/// saturate, which the past-duration check then treats as "past the end".
fn offset_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Everything the worker thread needs, snapshotted at session start so later
/// setter calls cannot race a running session.
struct WorkerContext {
    path: PathBuf,
    stream: Option<usize>,
    format: SampleFormat,
    config: PlaybackConfig,
    decode_tool: String,
    probe_opts: ProbeOptions,
    device_index: Option<usize>,
    backend: Arc<dyn OutputBackend>,
    volume: Arc<Volume>,
    shared: Arc<SessionShared>,
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl WorkerContext {
    fn run(self) {
        match self.stream_session() {
            Ok(()) => self.shared.finish(),
            Err(err) => {
                if self.cancelled() {
                    // Teardown racing the pipe produces spurious read/exit
                    // errors; a cancelled session ends without reporting.
                    self.shared.finish();
                } else {
                    self.shared.fail(err);
                }
            }
        }
    }

    fn stream_session(&self) -> Result<(), PlayerError> {
        // Spawning: probe the container and pick the stream. A probe tool
        // that ran but rejected the input (unreadable or nonexistent file)
        // is a decode failure from the session's point of view.
        let media = probe::probe_with(&self.path, &self.probe_opts).map_err(|e| match e {
            PlayerError::Parse { reason, .. } => {
                PlayerError::DecodeIo(format!("probing failed: {reason}"))
            }
            other => other,
        })?;
        let stream = probe::select_stream(&media, self.stream)?.clone();
        let duration = media.best_duration();
        let seek_offset = self.shared.update(|s| {
            s.duration = duration.or(s.duration);
            s.seek_offset
        });
        if self.cancelled() {
            return Ok(());
        }
        if let Some(total) = duration {
            if seek_offset >= total {
                tracing::debug!("seek offset past end of media; ending session");
                return Ok(());
            }
        }

        let desired = OutputSpec {
            sample_rate: stream.sample_rate.unwrap_or(44_100),
            channels: stream.channels.unwrap_or(2),
        };
        let mut out = self.backend.open(
            self.device_index,
            desired,
            OutputOptions {
                volume: self.volume.clone(),
                paused: self.paused.clone(),
                config: self.config.clone(),
            },
        )?;
        let negotiated = out.spec();

        let mut decoder = PipeDecoder::spawn(&DecodeRequest {
            path: &self.path,
            stream_index: stream.index,
            format: self.format,
            sample_rate: negotiated.sample_rate,
            channels: negotiated.channels,
            start_offset: seek_offset,
            tool: &self.decode_tool,
        })?;
        let mut pipe = decoder
            .take_stdout()
            .ok_or_else(|| PlayerError::DecodeIo("decode pipe has no stdout".into()))?;

        self.shared.update(|s| s.state = SessionState::Loading);

        let chunk_bytes = self.config.chunk_frames.max(1)
            * negotiated.channels.max(1) as usize
            * self.format.bytes_per_sample();
        let mut buf = vec![0u8; chunk_bytes];
        let mut started = false;

        loop {
            if self.cancelled() {
                return Ok(());
            }
            let n = read_chunk(&mut pipe, &mut buf)
                .map_err(|e| PlayerError::DecodeIo(format!("reading decode pipe: {e}")))?;
            if n == 0 {
                break; // end of stream
            }

            let samples = decode::bytes_to_f32(&buf[..n], self.format);
            match out.write(&samples, &self.cancel)? {
                WriteOutcome::Written => {}
                WriteOutcome::Cancelled => return Ok(()),
            }

            if !started {
                started = true;
                self.mark_playing();
            }
        }

        // The pipe is at EOF, so the process has finished (or died) already.
        drop(pipe);
        let status = decoder.wait()?;
        if !status.success() {
            let diag = decoder
                .stderr_tail()
                .unwrap_or_else(|| "no diagnostic output".into());
            return Err(PlayerError::DecodeIo(format!(
                "decoder exited with {status}: {diag}"
            )));
        }

        self.shared.update(|s| {
            if s.state.is_busy() {
                s.state = SessionState::Draining;
            }
        });
        out.drain(&self.cancel)?;
        Ok(())
    }

    /// First chunk reached the device: Loading → Playing, or straight back
    /// to Paused when completing a reposition of a paused player.
    fn mark_playing(&self) {
        self.shared.update(|s| {
            let now = Instant::now();
            s.start = Some(now);
            if s.reposition && s.resume_paused {
                // Freeze the position exactly at the seek offset.
                s.pause_start = Some(now);
                s.state = SessionState::Paused;
                self.paused.store(true, Ordering::Relaxed);
            } else {
                s.state = SessionState::Playing;
            }
            s.reposition = false;
            s.resume_paused = false;
        });
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Fill `buf` from the pipe, tolerating short reads.
///
/// Returns the number of bytes read; zero only at end of stream.
fn read_chunk(pipe: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match pipe.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_from_secs_clamps_invalid_input() {
        assert_eq!(offset_from_secs(-1.0), Duration::ZERO);
        assert_eq!(offset_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(offset_from_secs(0.0), Duration::ZERO);
        assert_eq!(offset_from_secs(1.5), Duration::from_secs_f64(1.5));
        assert_eq!(offset_from_secs(f64::INFINITY), Duration::MAX);
        assert_eq!(offset_from_secs(1e300), Duration::MAX);
    }

    #[test]
    fn read_chunk_handles_short_reads() {
        struct TwoByteReader {
            remaining: usize,
        }
        impl Read for TwoByteReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let n = self.remaining.min(buf.len()).min(2);
                self.remaining -= n;
                for b in &mut buf[..n] {
                    *b = 0xab;
                }
                Ok(n)
            }
        }

        let mut reader = TwoByteReader { remaining: 7 };
        let mut buf = [0u8; 16];
        assert_eq!(read_chunk(&mut reader, &mut buf).unwrap(), 7);
        assert_eq!(read_chunk(&mut reader, &mut buf).unwrap(), 0);
    }
}
