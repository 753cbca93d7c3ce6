//! Maps a wall-clock instant to what is on air.
//!
//! Everything here is a pure function of the playlist snapshot, the channel
//! anchor and the evaluation time. Two callers evaluating the same instant get
//! the same answer, and a caller reconnecting after any gap lands on the right
//! position because nothing about previous evaluations is remembered.

use chrono::{DateTime, Utc};

use crate::playlist::{PlaylistEntry, PlaylistSnapshot};

/// Result of one evaluation. Stale as soon as the clock moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDecision<'a> {
    pub entry: &'a PlaylistEntry,
    pub offset_seconds: u64,
    pub cycle_total_seconds: u64,
    pub cycle_position_seconds: u64,
    /// Whole seconds since the anchor, never negative.
    pub elapsed_seconds: u64,
}

/// Whole seconds between `anchor` and `now`. Clock skew that puts `now`
/// before the anchor counts as zero.
pub fn elapsed_seconds(anchor: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - anchor).num_seconds().max(0) as u64
}

/// Sum of the scheduled durations of every non-continuous entry.
pub fn cycle_total(snapshot: &PlaylistSnapshot) -> u64 {
    snapshot
        .entries()
        .iter()
        .filter(|e| !e.item.is_continuous)
        .map(|e| e.item.scheduled_duration())
        .fold(0u64, u64::saturating_add)
}

/// Work out which entry is on air at `now` and how far into it playback is.
///
/// Returns `None` when there is nothing to play.
pub fn compute(
    snapshot: &PlaylistSnapshot,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<ScheduleDecision<'_>> {
    let first = snapshot.entries().first()?;

    let elapsed = elapsed_seconds(anchor, now);
    let total = cycle_total(snapshot);
    let position = if total == 0 { 0 } else { elapsed % total };

    // A live feed preempts the rotation and always plays from its own edge.
    if let Some(live) = snapshot.entries().iter().find(|e| e.item.is_continuous) {
        return Some(ScheduleDecision {
            entry: live,
            offset_seconds: 0,
            cycle_total_seconds: total,
            cycle_position_seconds: position,
            elapsed_seconds: elapsed,
        });
    }

    if total == 0 {
        return Some(ScheduleDecision {
            entry: first,
            offset_seconds: 0,
            cycle_total_seconds: 0,
            cycle_position_seconds: 0,
            elapsed_seconds: elapsed,
        });
    }

    let mut running = 0u64;
    for entry in snapshot.entries() {
        let duration = entry.item.scheduled_duration();
        if running.saturating_add(duration) > position {
            return Some(ScheduleDecision {
                entry,
                offset_seconds: position - running,
                cycle_total_seconds: total,
                cycle_position_seconds: position,
                elapsed_seconds: elapsed,
            });
        }
        running = running.saturating_add(duration);
    }

    // position < total, so the scan above always returns.
    None
}
