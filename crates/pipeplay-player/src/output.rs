//! Output device seam.
//!
//! The engine never talks to the platform audio layer directly; it opens an
//! [`OutputStream`] through an injected [`OutputBackend`]. The production
//! backend is CPAL: a real-time callback drains a bounded [`PcmQueue`],
//! applies volume, and outputs silence **without draining** while paused
//! ("pause means pause" — buffered audio is kept, and the blocked producer is
//! the backpressure that eventually stalls the decode pipe).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::PlaybackConfig;
use crate::device;
use crate::error::PlayerError;
use crate::queue::{PcmQueue, PushOutcome, max_samples_for};

/// Output volume in `[0, 1]`, shared with the real-time callback.
///
/// Stored as raw `f32` bits so a read returns exactly the value that was
/// written. Range policy (ignoring out-of-range values) belongs to the
/// engine; this type stores whatever it is given.
pub struct Volume(AtomicU32);

impl Volume {
    pub fn new(initial: f32) -> Self {
        Self(AtomicU32::new(initial.to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Negotiated stream parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Result of a blocking write to the output stream.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The cancel flag was raised before the chunk was fully accepted.
    Cancelled,
}

/// Shared handles the backend wires into its output path.
pub struct OutputOptions {
    pub volume: Arc<Volume>,
    /// While `true` the device outputs silence and stops consuming.
    pub paused: Arc<AtomicBool>,
    pub config: PlaybackConfig,
}

/// Factory for output streams. Injected into the engine so tests (and other
/// platforms) can substitute the device.
pub trait OutputBackend: Send + Sync {
    /// Open an output stream as close to `desired` as the device allows.
    ///
    /// The returned spec is authoritative: the decode pipe is configured to
    /// produce exactly that rate and channel count.
    fn open(
        &self,
        device_index: Option<usize>,
        desired: OutputSpec,
        opts: OutputOptions,
    ) -> Result<Box<dyn OutputStream>, PlayerError>;
}

/// One open output stream. Lives entirely on the session worker thread.
pub trait OutputStream {
    fn spec(&self) -> OutputSpec;

    /// Write one chunk of interleaved `f32`, blocking for capacity.
    ///
    /// Observes `cancel` while blocked so `stop()` stays bounded.
    fn write(
        &mut self,
        samples: &[f32],
        cancel: &AtomicBool,
    ) -> Result<WriteOutcome, PlayerError>;

    /// Stop accepting input and wait for buffered audio to play out.
    ///
    /// Returns `Ok(false)` when `cancel` cut the drain short.
    fn drain(&mut self, cancel: &AtomicBool) -> Result<bool, PlayerError>;
}

/// CPAL-based production backend.
pub struct CpalBackend;

impl OutputBackend for CpalBackend {
    fn open(
        &self,
        device_index: Option<usize>,
        desired: OutputSpec,
        opts: OutputOptions,
    ) -> Result<Box<dyn OutputStream>, PlayerError> {
        let host = cpal::default_host();
        let device = device::output_device_at(&host, device_index)?;

        let config = device::pick_output_config(&device, Some(desired.sample_rate))?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = device::pick_buffer_size(&config) {
            stream_config.buffer_size = buf;
        }

        let spec = OutputSpec {
            sample_rate: stream_config.sample_rate,
            channels: stream_config.channels,
        };
        let capacity = max_samples_for(
            spec.sample_rate,
            spec.channels as usize,
            opts.config.buffer_seconds,
        );
        let queue = Arc::new(PcmQueue::new(spec.channels as usize, capacity));
        let failed = Arc::new(AtomicBool::new(false));

        let stream = build_output_stream(
            &device,
            &stream_config,
            config.sample_format(),
            &queue,
            CallbackOptions {
                refill_max_frames: opts.config.refill_max_frames,
                paused: opts.paused,
                volume: opts.volume,
                failed: failed.clone(),
            },
        )?;
        stream
            .play()
            .map_err(|e| PlayerError::OutputDevice(format!("starting stream: {e}")))?;

        tracing::info!(
            rate_hz = spec.sample_rate,
            channels = spec.channels,
            device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
            "output stream opened"
        );

        Ok(Box::new(CpalStream {
            _stream: stream,
            queue,
            spec,
            failed,
        }))
    }
}

struct CpalStream {
    // Held so the callback keeps running; dropped (and thereby closed) with
    // the session.
    _stream: cpal::Stream,
    queue: Arc<PcmQueue>,
    spec: OutputSpec,
    failed: Arc<AtomicBool>,
}

impl CpalStream {
    fn check_failed(&self) -> Result<(), PlayerError> {
        if self.failed.load(Ordering::Relaxed) {
            Err(PlayerError::OutputDevice(
                "stream error reported by device".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl OutputStream for CpalStream {
    fn spec(&self) -> OutputSpec {
        self.spec
    }

    fn write(
        &mut self,
        samples: &[f32],
        cancel: &AtomicBool,
    ) -> Result<WriteOutcome, PlayerError> {
        self.check_failed()?;
        match self.queue.push_blocking(samples, cancel) {
            PushOutcome::Pushed => Ok(WriteOutcome::Written),
            PushOutcome::Cancelled | PushOutcome::Closed => Ok(WriteOutcome::Cancelled),
        }
    }

    fn drain(&mut self, cancel: &AtomicBool) -> Result<bool, PlayerError> {
        self.queue.close();
        let drained = self.queue.wait_drained(cancel);
        self.check_failed()?;
        if drained {
            // Let the device play out its own internal buffer.
            thread::sleep(Duration::from_millis(100));
        }
        Ok(drained)
    }
}

struct CallbackOptions {
    refill_max_frames: usize,
    paused: Arc<AtomicBool>,
    volume: Arc<Volume>,
    failed: Arc<AtomicBool>,
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<PcmQueue>,
    opts: CallbackOptions,
) -> Result<cpal::Stream, PlayerError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, opts),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, opts),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, opts),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, opts),
        other => Err(PlayerError::OutputDevice(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

/// Local buffer state for the output callback: a chunk pulled from the queue
/// and a cursor into it, so the callback locks the queue at most once per
/// refill.
struct CallbackState {
    pos: usize,
    src: Vec<f32>,
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<PcmQueue>,
    opts: CallbackOptions,
) -> Result<cpal::Stream, PlayerError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let state = Arc::new(Mutex::new(CallbackState {
        pos: 0,
        src: Vec::new(),
    }));

    let refill_max_frames = opts.refill_max_frames.max(1);
    let queue_cb = queue.clone();
    let paused = opts.paused;
    let volume = opts.volume;

    let failed = opts.failed;
    let err_fn = move |err| {
        tracing::warn!("output stream error: {err}");
        failed.store(true, Ordering::Relaxed);
    };

    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                if paused.load(Ordering::Relaxed) {
                    data.fill(silence);
                    return;
                }

                let vol = volume.get();
                let mut st = state.lock().unwrap();

                let mut idx = 0;
                while idx < data.len() {
                    if st.pos >= st.src.len() {
                        st.pos = 0;
                        st.src.clear();
                        match queue_cb.pop_chunk(refill_max_frames) {
                            Some(chunk) => st.src = chunk,
                            // Underrun (or end of stream): silence the rest.
                            None => break,
                        }
                    }
                    let take = (st.src.len() - st.pos).min(data.len() - idx);
                    for i in 0..take {
                        let sample = st.src[st.pos + i] * vol;
                        data[idx + i] = <T as cpal::Sample>::from_sample::<f32>(sample);
                    }
                    st.pos += take;
                    idx += take;
                }

                for out in &mut data[idx..] {
                    *out = silence;
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::OutputDevice(format!("building stream: {e}")))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_round_trips_exactly() {
        let v = Volume::new(1.0);
        assert_eq!(v.get(), 1.0);
        v.set(1.0 / 3.0);
        assert_eq!(v.get(), 1.0 / 3.0);
        v.set(0.0);
        assert_eq!(v.get(), 0.0);
    }

    #[test]
    fn output_spec_equality() {
        let a = OutputSpec {
            sample_rate: 44_100,
            channels: 2,
        };
        assert_eq!(
            a,
            OutputSpec {
                sample_rate: 44_100,
                channels: 2
            }
        );
    }
}
