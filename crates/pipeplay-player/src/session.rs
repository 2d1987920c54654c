//! Shared session state between the foreground API and the worker thread.
//!
//! Everything both threads touch lives behind one mutex: the state machine,
//! the position clock's inputs, the reposition flag, the cached media
//! duration, and the single-slot error mailbox. A condvar paired with the
//! mutex backs `join()` and other state waits, so the foreground can never
//! observe a half-updated position during a pause/resume/reposition race.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::PlayerError;

/// Lifecycle of one playback session.
///
/// `Ended` is reachable from every state via stop, supersession, or error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// No session has run yet.
    Idle,
    /// Worker started; probe/decode process being created.
    Spawning,
    /// Decode process up; no audio has reached the device yet.
    Loading,
    Playing,
    Paused,
    /// Decode finished; buffered audio is playing out.
    Draining,
    Ended,
}

impl SessionState {
    pub(crate) fn is_busy(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Ended)
    }
}

/// Fields guarded by the session lock.
pub(crate) struct SessionInner {
    pub state: SessionState,
    /// Set when the first chunk reaches the output device.
    pub start: Option<Instant>,
    pub pause_start: Option<Instant>,
    pub paused_accum: Duration,
    pub seek_offset: Duration,
    /// A reposition is in flight; pause/resume are not honored until it
    /// completes.
    pub reposition: bool,
    /// Pause state the in-flight reposition must restore.
    pub resume_paused: bool,
    /// Single-slot error mailbox; written by the worker, taken by the
    /// foreground. A later failure overwrites an unread one.
    pub error: Option<PlayerError>,
    /// Media duration cached from the most recent successful probe.
    pub duration: Option<Duration>,
}

pub(crate) struct SessionShared {
    inner: Mutex<SessionInner>,
    cond: Condvar,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                start: None,
                pause_start: None,
                paused_accum: Duration::ZERO,
                seek_offset: Duration::ZERO,
                reposition: false,
                resume_paused: false,
                error: None,
                duration: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap()
    }

    /// Mutate under the lock and wake any state waiters.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionInner) -> R) -> R {
        let mut g = self.lock();
        let r = f(&mut g);
        drop(g);
        self.cond.notify_all();
        r
    }

    /// Prepare the shared fields for a fresh session.
    ///
    /// Clears the stale error slot and pause accounting per the play()
    /// contract; the cached duration survives across sessions.
    pub(crate) fn reset_for_session(
        &self,
        seek_offset: Duration,
        reposition: bool,
        resume_paused: bool,
    ) {
        self.update(|s| {
            s.state = SessionState::Spawning;
            s.start = None;
            s.pause_start = None;
            s.paused_accum = Duration::ZERO;
            s.seek_offset = seek_offset;
            s.reposition = reposition;
            s.resume_paused = resume_paused;
            s.error = None;
        });
    }

    /// Record a worker failure and end the session.
    pub(crate) fn fail(&self, error: PlayerError) {
        tracing::warn!("playback session failed: {error}");
        self.update(|s| {
            s.error = Some(error);
            s.reposition = false;
            s.state = SessionState::Ended;
        });
    }

    /// End the session without recording an error.
    pub(crate) fn finish(&self) {
        self.update(|s| {
            s.reposition = false;
            s.state = SessionState::Ended;
        });
    }

    /// Block until the session is no longer busy, or `timeout` elapses.
    ///
    /// Returns `true` when the session ended within the wait.
    pub(crate) fn wait_not_busy(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut g = self.lock();
        loop {
            if !g.state.is_busy() {
                return true;
            }
            match deadline {
                None => g = self.cond.wait(g).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (g2, _timeout) = self.cond.wait_timeout(g, deadline - now).unwrap();
                    g = g2;
                }
            }
        }
    }
}
