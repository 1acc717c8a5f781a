// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observational signals emitted by the runner.

use crate::frame::Frame;
use crate::meta::MetaMap;
use crate::report::RunReport;

/// Why a run is being canceled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// `Runner::cancel()` was called externally.
    External,
    /// A critical consumer failed under the `CANCEL` policy.
    ConsumerRequest,
    /// A worker's queue was full under the `FAIL` backpressure policy, or
    /// the engine raised an error not translated into cancellation.
    FatalError,
}

/// Lifecycle and per-frame signals the runner emits through the callback
/// passed to [`Runner::run`](crate::runner::Runner::run) /
/// [`Runner::try_execute`](crate::runner::Runner::try_execute). These are
/// observational — consumers are the mechanism for actually receiving and
/// processing frames; these signals exist for observers that sit outside
/// the consumer interface (e.g. progress bars, live previews).
#[derive(Clone, Debug)]
pub enum RunnerEvent<'a, Seq, Ev> {
    /// The run has begun: `engine.setup_sequence` succeeded and consumer
    /// workers have been started.
    SequenceStarted {
        sequence: &'a Seq,
        summary_meta: &'a MetaMap,
    },
    /// `toggle_pause()` changed the paused state.
    SequencePauseToggled { paused: bool },
    /// The run is being canceled.
    SequenceCanceled { sequence: &'a Seq, reason: CancelReason },
    /// The run has fully finished: every consumer's `finish` has returned
    /// (or been given the chance to).
    SequenceFinished { sequence: &'a Seq, report: &'a RunReport },
    /// The runner has begun processing one event.
    EventStarted { event: &'a Ev },
    /// The runner is waiting for `event.min_start_time` to elapse.
    AwaitingEvent { event: &'a Ev, remaining_seconds: f64 },
    /// A frame was yielded by the engine and is about to be submitted to
    /// the dispatcher.
    FrameReady { frame: &'a Frame<Ev> },
}
