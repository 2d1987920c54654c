//! Pure position accounting.
//!
//! The worker records three timestamps/durations under the session lock
//! (playback start, accumulated pause time, the in-progress pause start) plus
//! the seek offset the session was spawned with. This module turns them into
//! an elapsed position without touching any I/O or shared state, so the
//! arithmetic is testable with synthetic instants.

use std::time::{Duration, Instant};

/// Elapsed playback position.
///
/// While paused the position is frozen at the value it had when the pause
/// began; while playing it is wall-clock time since start, minus time spent
/// paused, plus the session's seek offset. All subtractions saturate so a
/// skewed caller clock can never panic the engine.
pub fn elapsed(
    start: Instant,
    paused_accum: Duration,
    pause_start: Option<Instant>,
    seek_offset: Duration,
    now: Instant,
) -> Duration {
    let reference = pause_start.unwrap_or(now);
    reference
        .saturating_duration_since(start)
        .saturating_sub(paused_accum)
        .saturating_add(seek_offset)
}
