// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The minimal view of an acquisition event that the runner itself reads.

/// The handful of fields the runner reads from an otherwise-opaque event.
///
/// Callers supply any `Ev` type that implements this trait; everything else
/// about `Ev` is opaque to the runner and is passed through to the engine
/// untouched. Events have identity by position in the input stream, not by
/// any field exposed here.
pub trait EventTiming {
    /// Seconds from run start at which this event may begin, if any.
    ///
    /// `None` means "as soon as the runner reaches this event in the
    /// stream" — no wait is performed.
    fn min_start_time(&self) -> Option<f64>;

    /// Whether this event resets the run-start reference used to interpret
    /// every subsequent `min_start_time`.
    fn reset_event_timer(&self) -> bool;
}
