// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A pause-aware stopwatch for tracking elapsed run time.
//!
//! The runner needs a start time and a duration, the latter excluding any
//! intervals the run was paused. We use a combination of a `DateTime<Local>`
//! (wall clock, for reporting) and an `Instant` (monotonic clock, for
//! elapsed-time arithmetic).

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

pub fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// A running (or paused) stopwatch.
#[derive(Clone, Debug)]
pub struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
    paused_time: Duration,
    pause_state: StopwatchPauseState,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            // These two syscalls happen imperceptibly close to each other,
            // which is good enough for reporting purposes.
            start_time: Local::now(),
            instant: Instant::now(),
            paused_time: Duration::ZERO,
            pause_state: StopwatchPauseState::Running,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.pause_state, StopwatchPauseState::Paused { .. })
    }

    /// Pauses the stopwatch. Idempotent: pausing an already-paused
    /// stopwatch is a no-op rather than a panic, since `toggle_pause` must
    /// be safe to call repeatedly from any thread.
    pub fn pause(&mut self) {
        if let StopwatchPauseState::Running = self.pause_state {
            self.pause_state = StopwatchPauseState::Paused {
                paused_at: Instant::now(),
            };
        }
    }

    /// Resumes the stopwatch. Idempotent, for the same reason as `pause`.
    pub fn resume(&mut self) {
        if let StopwatchPauseState::Paused { paused_at } = &self.pause_state {
            self.paused_time += paused_at.elapsed();
            self.pause_state = StopwatchPauseState::Running;
        }
    }

    /// Toggles between paused and running, returning the new paused state.
    pub fn toggle_pause(&mut self) -> bool {
        if self.is_paused() {
            self.resume();
        } else {
            self.pause();
        }
        self.is_paused()
    }

    /// Resets the start-time reference to now, without touching accumulated
    /// paused time. Used when an event requests a reset of the event timer.
    pub fn reset_reference(&mut self) {
        self.instant = Instant::now();
        self.paused_time = Duration::ZERO;
    }

    pub fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            // instant is supposed to be monotonic but might not be so on
            // some weird systems; if the duration underflows, just return 0.
            active: self.instant.elapsed().saturating_sub(self.currently_paused()),
            paused: self.paused_time,
        }
    }

    fn currently_paused(&self) -> Duration {
        match self.pause_state {
            StopwatchPauseState::Running => self.paused_time,
            StopwatchPauseState::Paused { paused_at } => self.paused_time + paused_at.elapsed(),
        }
    }
}

/// A snapshot of the state of the stopwatch.
#[derive(Clone, Copy, Debug)]
pub struct StopwatchSnapshot {
    /// The time at which the stopwatch was started.
    pub start_time: DateTime<Local>,
    /// The amount of time spent while the stopwatch was active (excludes
    /// paused intervals, including any still in progress).
    pub active: Duration,
    /// The amount of time spent paused so far, not including a pause still
    /// in progress.
    #[allow(unused)]
    pub paused: Duration,
}

#[derive(Clone, Copy, Debug)]
enum StopwatchPauseState {
    Running,
    Paused { paused_at: Instant },
}
