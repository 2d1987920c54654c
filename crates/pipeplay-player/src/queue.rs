//! Bounded queue of interleaved `f32` samples between the pipe reader and the
//! output callback.
//!
//! One producer (the session worker) pushes fixed-size chunks with
//! backpressure; one consumer (the real-time output callback) polls without
//! ever blocking. The `closed` flag lives under the same mutex as the sample
//! buffer so shutdown cannot race a push or pop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// How often blocked producers re-check the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Result of a blocking push.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// All samples were accepted.
    Pushed,
    /// The cancel flag was raised while waiting for capacity.
    Cancelled,
    /// The queue was closed while waiting; remaining samples were dropped.
    Closed,
}

/// Bounded interleaved-sample queue with close/drain semantics.
///
/// Capacity is in samples (not frames); use [`max_samples_for`] to size it
/// from a `(rate, channels, seconds)` target.
pub struct PcmQueue {
    channels: usize,
    max_buffered_samples: usize,
    inner: Mutex<Inner>,
    cv: Condvar,
}

struct Inner {
    buf: VecDeque<f32>,
    closed: bool,
}

/// Conservative queue capacity in samples for a buffering target.
///
/// Non-finite or non-positive `buffer_seconds` falls back to two seconds.
pub fn max_samples_for(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels.max(1))
}

impl PcmQueue {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        Self {
            channels: channels.max(1),
            max_buffered_samples: max_buffered_samples.max(1),
            inner: Mutex::new(Inner {
                buf: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn max_frames(&self) -> usize {
        self.max_buffered_samples / self.channels
    }

    /// Buffered frames right now. Best-effort snapshot.
    pub fn len_frames(&self) -> usize {
        let g = self.inner.lock().unwrap();
        g.buf.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Mark the queue closed and wake all waiters. Idempotent.
    ///
    /// A closed queue still hands out buffered samples until drained.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Push interleaved samples, blocking while the queue is full.
    ///
    /// Capacity waits are timed so the producer notices `cancel` within
    /// [`CANCEL_POLL`] even when the consumer has stopped draining (the
    /// paused case).
    pub fn push_blocking(&self, samples: &[f32], cancel: &AtomicBool) -> PushOutcome {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.inner.lock().unwrap();

            while g.buf.len() >= self.max_buffered_samples && !g.closed {
                if cancel.load(Ordering::Relaxed) {
                    return PushOutcome::Cancelled;
                }
                let (g2, _timeout) = self.cv.wait_timeout(g, CANCEL_POLL).unwrap();
                g = g2;
            }
            if g.closed {
                return PushOutcome::Closed;
            }
            if cancel.load(Ordering::Relaxed) {
                return PushOutcome::Cancelled;
            }

            while offset < samples.len() && g.buf.len() < self.max_buffered_samples {
                g.buf.push_back(samples[offset]);
                offset += 1;
            }

            drop(g);
            self.cv.notify_all();
        }

        PushOutcome::Pushed
    }

    /// Pop up to `max_frames` whole frames without blocking.
    ///
    /// Returns `None` when no complete frame is buffered. Safe to call from a
    /// real-time callback: the lock is held only for the copy.
    pub fn pop_chunk(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.inner.lock().unwrap();

        let available_frames = g.buf.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }

        let mut out = Vec::with_capacity(take_samples);
        for _ in 0..take_samples {
            out.push(g.buf.pop_front().unwrap_or(0.0));
        }

        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Block until the queue is closed and empty, or `cancel` is raised.
    ///
    /// Returns `true` when the queue drained normally.
    pub fn wait_drained(&self, cancel: &AtomicBool) -> bool {
        let mut g = self.inner.lock().unwrap();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if g.closed && g.buf.is_empty() {
                return true;
            }
            let (g2, _timeout) = self.cv.wait_timeout(g, CANCEL_POLL).unwrap();
            g = g2;
        }
    }
}
