// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capability set required of a pluggable acquisition engine.

use crate::errors::EngineError;
use crate::frame::FrameYield;
use crate::meta::MetaMap;

/// A signal the runner may send to an in-flight [`EngineIter`] between
/// yields.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EngineSignal {
    /// Terminate the current inner sequence promptly. For hardware-sequenced
    /// acquisitions this means stopping the hardware sequence; the engine
    /// returns (ending the iterable) once it has honored this.
    Cancel,
    /// Pause between inner frames under software control. Engines driving a
    /// hardware burst are never required to honor this; they may log that
    /// pause does not apply and continue.
    Pause,
}

/// A reversible iterator over the frames produced for a single event.
///
/// Any `Iterator<Item = FrameYield<Ev>>` can implement this trait; the
/// default `send_signal` is a no-op, which reproduces "otherwise the runner
/// simply advances the iterator" for engines that have no use for the
/// cancel/pause channel. Engines that drive hardware-triggered bursts
/// override `send_signal` to propagate it into the hardware sequence.
pub trait EngineIter<Ev>: Iterator<Item = FrameYield<Ev>> {
    /// Receives a signal between this iterator's yields. Called by
    /// [`crate::iteration::drive_engine_iter`] after every yielded item,
    /// with whatever signal the cancel/pause state implies (or none).
    fn send_signal(&mut self, _signal: EngineSignal) {}
}

/// Adapts any plain iterator of frames into an [`EngineIter`] with the
/// default no-op `send_signal` — the wrapper engines reach for when their
/// `exec_event` iterator is driven purely by software and has no use for
/// the cancel/pause channel.
pub struct SoftwareIter<I>(pub I);

impl<Ev, I: Iterator<Item = FrameYield<Ev>>> Iterator for SoftwareIter<I> {
    type Item = FrameYield<Ev>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

impl<Ev, I: Iterator<Item = FrameYield<Ev>>> EngineIter<Ev> for SoftwareIter<I> {}

/// The interface required of any acquisition engine.
///
/// `Seq` is the opaque sequence descriptor passed to `setup_sequence` and
/// `teardown_sequence`; `Ev` is the caller's event type. An engine is owned
/// exclusively by the runner thread for the duration of a run — it is never
/// shared with or called from a consumer worker thread.
pub trait Engine<Seq, Ev> {
    /// Called once per event before `exec_event`.
    fn setup_event(&mut self, event: &Ev) -> Result<(), EngineError>;

    /// Produces the frames for one event. `Ok(None)` is treated as an empty
    /// iterable. Iterators that want to participate in the cancel/pause
    /// signal protocol of [`EngineIter`] return one built from a type that
    /// overrides `send_signal`.
    #[allow(clippy::type_complexity)]
    fn exec_event(
        &mut self,
        event: &Ev,
    ) -> Result<Option<Box<dyn EngineIter<Ev> + Send>>, EngineError>;

    /// Called once at the start of a run, before `sequenceStarted` is
    /// emitted. Returns the summary metadata passed to every consumer's
    /// `setup`.
    fn setup_sequence(&mut self, _sequence: &Seq) -> Result<MetaMap, EngineError> {
        Ok(MetaMap::new())
    }

    /// Called once per event after its frames have been produced (or after
    /// an error, on a best-effort basis).
    fn teardown_event(&mut self, _event: &Ev) -> Result<(), EngineError> {
        Ok(())
    }

    /// Called once at the end of a run, after the dispatcher has closed.
    fn teardown_sequence(&mut self, _sequence: &Seq) -> Result<(), EngineError> {
        Ok(())
    }

    /// Gives the engine a chance to wrap the raw event stream (e.g. to
    /// reorder or expand it) before the runner starts iterating it. The
    /// default is the identity transform — "otherwise use the raw
    /// iterable."
    fn event_iterator(
        &mut self,
        events: Box<dyn Iterator<Item = Ev> + Send>,
    ) -> Box<dyn Iterator<Item = Ev> + Send>
    where
        Ev: 'static,
    {
        events
    }
}
