//! End-to-end engine tests against a mock output backend.
//!
//! The mock paces consumption at roughly real time and honors the paused
//! flag the way the CPAL callback does (silence, no draining), so transport
//! semantics are exercised without a sound card. Tests that need the real
//! decode pipeline check for `ffmpeg`/`ffprobe` on PATH and return early
//! when the tools are missing, like the original tool-dependent suites do.

use std::f32::consts::TAU;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pipeplay_player::{
    AudioPlayer, OutputBackend, OutputOptions, OutputSpec, OutputStream, PlayerError, Position,
    WriteOutcome,
};

/// Output backend that consumes samples at wall-clock rate.
struct MockBackend {
    active_streams: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl MockBackend {
    fn new() -> (Arc<Self>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let active = Arc::new(AtomicUsize::new(0));
        let opened = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(Self {
            active_streams: active.clone(),
            opened: opened.clone(),
        });
        (backend, active, opened)
    }
}

impl OutputBackend for MockBackend {
    fn open(
        &self,
        _device_index: Option<usize>,
        desired: OutputSpec,
        opts: OutputOptions,
    ) -> Result<Box<dyn OutputStream>, PlayerError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.active_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            spec: desired,
            paused: opts.paused,
            active_streams: self.active_streams.clone(),
        }))
    }
}

struct MockStream {
    spec: OutputSpec,
    paused: Arc<AtomicBool>,
    active_streams: Arc<AtomicUsize>,
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.active_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

impl OutputStream for MockStream {
    fn spec(&self) -> OutputSpec {
        self.spec
    }

    fn write(
        &mut self,
        samples: &[f32],
        cancel: &AtomicBool,
    ) -> Result<WriteOutcome, PlayerError> {
        let samples_per_sec = (self.spec.sample_rate as u64 * self.spec.channels as u64).max(1);
        let mut remaining =
            Duration::from_secs_f64(samples.len() as f64 / samples_per_sec as f64);
        let slice = Duration::from_millis(5);

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(WriteOutcome::Cancelled);
            }
            if self.paused.load(Ordering::Relaxed) {
                // Paused device: keep the chunk, consume nothing.
                thread::sleep(slice);
                continue;
            }
            if remaining.is_zero() {
                return Ok(WriteOutcome::Written);
            }
            let step = remaining.min(slice);
            thread::sleep(step);
            remaining -= step;
        }
    }

    fn drain(&mut self, _cancel: &AtomicBool) -> Result<bool, PlayerError> {
        Ok(true)
    }
}

fn mock_player(path: impl Into<PathBuf>) -> (AudioPlayer, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let (backend, active, opened) = MockBackend::new();
    (AudioPlayer::with_backend(path, backend), active, opened)
}

fn tools_available() -> bool {
    ["ffprobe", "ffmpeg"].iter().all(|tool| {
        Command::new(tool)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}

/// Write a mono 44.1 kHz sine fixture and return its path.
fn write_wav(dir: &Path, name: &str, secs: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let total = (44_100.0 * secs) as usize;
    for i in 0..total {
        let t = i as f32 / 44_100.0;
        let v = (t * 440.0 * TAU).sin() * 0.25;
        writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn wait_for_playing(player: &AudioPlayer) -> bool {
    wait_until(Duration::from_secs(10), || {
        matches!(player.position(), Position::Seconds(_))
    })
}

#[test]
fn idle_player_reports_ended_and_not_busy() {
    let (player, _, _) = mock_player("/nonexistent.wav");
    assert_eq!(player.position(), Position::Ended);
    assert!(!player.is_busy());
    assert!(!player.is_paused());
}

#[test]
fn join_without_session_returns_immediately() {
    let (mut player, _, _) = mock_player("/nonexistent.wav");
    assert!(player.join(Some(Duration::from_millis(10))));
}

#[test]
fn stop_without_session_is_safe() {
    let (mut player, _, _) = mock_player("/nonexistent.wav");
    player.stop();
    player.stop();
    assert!(!player.is_busy());
}

#[test]
fn pause_and_resume_are_noops_when_not_playing() {
    let (player, _, _) = mock_player("/nonexistent.wav");
    player.pause();
    assert!(!player.is_paused());
    player.resume();
    assert!(!player.is_busy());
}

#[test]
fn volume_round_trips_and_ignores_out_of_range() {
    let (player, _, _) = mock_player("/nonexistent.wav");
    assert_eq!(player.volume(), 1.0);

    player.set_volume(1.0 / 3.0);
    assert_eq!(player.volume(), 1.0 / 3.0);

    player.set_volume(1.5);
    assert_eq!(player.volume(), 1.0 / 3.0);
    player.set_volume(-0.1);
    assert_eq!(player.volume(), 1.0 / 3.0);
    player.set_volume(f32::NAN);
    assert_eq!(player.volume(), 1.0 / 3.0);
}

#[test]
fn missing_probe_tool_surfaces_tool_not_found() {
    let (mut player, _, _) = mock_player("/nonexistent.wav");
    player.set_probe_tool("pipeplay-no-such-probe-tool");

    player.play(0.0);
    assert!(player.join(Some(Duration::from_secs(10))), "join timed out");
    assert!(!player.is_busy());
    assert_eq!(player.position(), Position::Ended);

    match player.take_error() {
        Some(PlayerError::ToolNotFound { tool }) => {
            assert_eq!(tool, "pipeplay-no-such-probe-tool")
        }
        other => panic!("expected ToolNotFound, got {other:?}"),
    }
    // The slot is cleared on read.
    assert!(player.take_error().is_none());
}

#[test]
fn play_reaches_playing_and_position_advances() {
    if !tools_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 3.0);
    let (mut player, _, _) = mock_player(&path);

    player.play(0.0);
    assert!(player.is_busy(), "busy immediately after play");
    assert!(wait_for_playing(&player), "never reached playing");

    let first = player.position().seconds().unwrap();
    thread::sleep(Duration::from_millis(200));
    let second = player.position().seconds().unwrap();
    assert!(second > first, "position did not advance: {first} -> {second}");

    player.stop();
    assert!(!player.is_busy());
    assert_eq!(player.position(), Position::Ended);
}

#[test]
fn pause_freezes_position_and_resume_continues() {
    if !tools_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 5.0);
    let (mut player, _, _) = mock_player(&path);

    player.play(0.0);
    assert!(wait_for_playing(&player));

    player.pause();
    assert!(player.is_paused());

    let frozen = player.position().seconds().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(player.position().seconds().unwrap(), frozen);

    player.resume();
    assert!(!player.is_paused());
    thread::sleep(Duration::from_millis(200));
    assert!(player.position().seconds().unwrap() > frozen);

    player.stop();
}

#[test]
fn set_position_lands_on_target_and_preserves_pause() {
    if !tools_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 5.0);
    let (mut player, _, _) = mock_player(&path);

    player.play(0.0);
    assert!(wait_for_playing(&player));
    player.pause();
    assert!(player.is_paused());

    player.set_position(1.0);
    assert!(player.is_paused(), "pause state lost during reposition");
    assert!(
        wait_until(Duration::from_secs(10), || !player.is_repositioning()),
        "reposition never completed"
    );
    assert!(player.is_paused());
    let pos = player.position().seconds().unwrap();
    assert!((pos - 1.0).abs() < 1e-6, "paused position {pos} != 1.0");

    player.resume();
    assert!(!player.is_paused());

    player.set_position(2.0);
    assert!(
        wait_until(Duration::from_secs(10), || !player.is_repositioning()),
        "second reposition never completed"
    );
    assert!(wait_for_playing(&player));
    let pos = player.position().seconds().unwrap();
    assert!(pos >= 2.0, "position {pos} before seek target");

    player.stop();
}

#[test]
fn restart_while_playing_keeps_exactly_one_session() {
    if !tools_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 5.0);
    let (mut player, active, opened) = mock_player(&path);

    player.play(0.0);
    assert!(wait_for_playing(&player));
    player.play(0.0);
    assert!(wait_for_playing(&player));

    assert_eq!(opened.load(Ordering::SeqCst), 2);
    assert_eq!(active.load(Ordering::SeqCst), 1, "two live sessions");

    player.stop();
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[test]
fn stop_is_bounded_from_every_phase() {
    if !tools_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 5.0);

    // Stop right after play, while the worker is still spawning/loading.
    let (mut player, active, _) = mock_player(&path);
    player.play(0.0);
    player.stop();
    assert!(!player.is_busy());
    assert_eq!(player.position(), Position::Ended);
    assert_eq!(active.load(Ordering::SeqCst), 0);

    // Stop while playing.
    let (mut player, active, _) = mock_player(&path);
    player.play(0.0);
    assert!(wait_for_playing(&player));
    player.stop();
    assert!(!player.is_busy());
    assert_eq!(active.load(Ordering::SeqCst), 0);

    // Stop while paused (worker is blocked on the paused device).
    let (mut player, active, _) = mock_player(&path);
    player.play(0.0);
    assert!(wait_for_playing(&player));
    player.pause();
    let begun = Instant::now();
    player.stop();
    assert!(begun.elapsed() < Duration::from_secs(5), "stop not bounded");
    assert!(!player.is_busy());
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[test]
fn natural_end_reaches_ended_without_error() {
    if !tools_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "blip.wav", 0.3);
    let (mut player, active, _) = mock_player(&path);

    player.play(0.0);
    assert!(player.join(Some(Duration::from_secs(30))), "join timed out");
    assert!(!player.is_busy());
    assert_eq!(player.position(), Position::Ended);
    assert!(player.take_error().is_none());
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[test]
fn nonexistent_file_surfaces_decode_error_via_slot() {
    if !tools_available() {
        return;
    }
    let (mut player, _, _) = mock_player("/definitely/not/here.wav");

    player.play(0.0);
    assert!(player.join(Some(Duration::from_secs(30))), "join timed out");
    assert_eq!(player.position(), Position::Ended);

    match player.take_error() {
        Some(PlayerError::DecodeIo(_)) => {}
        other => panic!("expected DecodeIo, got {other:?}"),
    }
}

#[test]
fn play_past_known_duration_is_a_noop() -> anyhow::Result<()> {
    if !tools_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let path = write_wav(dir.path(), "tone.wav", 1.0);
    let (mut player, _, opened) = mock_player(&path);

    let info = player.probe()?;
    assert!(info.best_duration().is_some());
    assert!(player.duration().is_some());

    player.play(9_999.0);
    assert!(!player.is_busy());
    assert_eq!(player.position(), Position::Ended);
    assert_eq!(opened.load(Ordering::SeqCst), 0, "no session should start");
    Ok(())
}

#[test]
fn probe_reports_stream_parameters() -> anyhow::Result<()> {
    if !tools_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let path = write_wav(dir.path(), "tone.wav", 1.0);
    let (player, _, _) = mock_player(&path);

    let info = player.probe()?;
    let stream = info.first_audio_stream().expect("audio stream");
    assert_eq!(stream.sample_rate, Some(44_100));
    assert_eq!(stream.channels, Some(1));

    let duration = info.best_duration().unwrap();
    assert!((duration.as_secs_f64() - 1.0).abs() < 0.1);
    Ok(())
}

#[test]
fn drop_stops_the_session() {
    if !tools_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 5.0);
    let (mut player, active, _) = mock_player(&path);

    player.play(0.0);
    assert!(wait_for_playing(&player));
    drop(player);
    assert_eq!(active.load(Ordering::SeqCst), 0, "session outlived player");
}
