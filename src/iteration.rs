// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives an [`EngineIter`] to completion, propagating cancel/pause signals.

use crate::engine::{EngineIter, EngineSignal};
use crate::frame::FrameYield;

/// What the caller of [`drive_engine_iter`] told us about the run's state
/// just after a frame was yielded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SignalState {
    pub canceled: bool,
    pub paused: bool,
}

impl SignalState {
    fn to_signal(self) -> Option<EngineSignal> {
        if self.canceled {
            Some(EngineSignal::Cancel)
        } else if self.paused {
            Some(EngineSignal::Pause)
        } else {
            None
        }
    }
}

/// Advances `iter`, handing each yielded frame to `on_frame`, and — between
/// yields — reads the run's current cancel/pause state via `poll_state` and
/// forwards the implied [`EngineSignal`] to the iterator.
///
/// This reproduces the wrapper algorithm of the engine iteration protocol
/// exactly: advance, yield, compute the signal from the freshly observed
/// state, send it, repeat until the iterator is exhausted or `on_frame`
/// asks to stop early.
///
/// `on_frame` returns `true` to keep going and `false` to stop (e.g.
/// because the dispatcher requested cancellation downstream). When it
/// returns `false` a final `Cancel` signal is still sent so hardware-backed
/// iterators get a chance to halt their sequence before being dropped.
pub fn drive_engine_iter<Ev>(
    mut iter: Box<dyn EngineIter<Ev> + Send>,
    mut poll_state: impl FnMut() -> SignalState,
    mut on_frame: impl FnMut(FrameYield<Ev>) -> bool,
) {
    while let Some(frame) = iter.next() {
        let keep_going = on_frame(frame);

        let state = poll_state();
        if let Some(signal) = state.to_signal() {
            iter.send_signal(signal);
        }

        if !keep_going || state.canceled {
            if state.to_signal() != Some(EngineSignal::Cancel) {
                iter.send_signal(EngineSignal::Cancel);
            }
            break;
        }
    }
}
