// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapters that coerce historical handler shapes and filesystem paths into
//! the [`Consumer`] capability set the core actually runs against.

use camino::Utf8Path;

use crate::consumer::{Consumer, ConsumerSpec};
use crate::errors::ConsumerError;
use crate::frame::Frame;
use crate::meta::MetaMap;
use crate::report::RunStatus;

/// Wraps an object that only implements some of the historical
/// `sequenceStarted`/`frameReady`/`sequenceFinished` callbacks as a full
/// [`Consumer`].
///
/// The source this core was distilled from dispatches to these callbacks by
/// probing their arity at call time and dropping trailing arguments until
/// one matches. That has no equivalent in a statically-typed host language:
/// arity is a compile-time property here. This adapter keeps the same
/// outcome — a caller registers only the callbacks it actually has, and the
/// rest silently no-op — via a fixed, typed capability set of optional
/// closures instead of runtime arity probing.
///
/// Treated as critical by default, per §4.5.
pub struct LegacyHandlerAdapter<Seq, Ev> {
    sequence_started: Option<Box<dyn FnMut(&Seq, &MetaMap) + Send>>,
    frame_ready: Option<Box<dyn FnMut(&Frame<Ev>) + Send>>,
    sequence_finished: Option<Box<dyn FnMut(&Seq, RunStatus) + Send>>,
}

impl<Seq, Ev> Default for LegacyHandlerAdapter<Seq, Ev> {
    fn default() -> Self {
        Self {
            sequence_started: None,
            frame_ready: None,
            sequence_finished: None,
        }
    }
}

impl<Seq, Ev> LegacyHandlerAdapter<Seq, Ev> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_sequence_started(mut self, handler: impl FnMut(&Seq, &MetaMap) + Send + 'static) -> Self {
        self.sequence_started = Some(Box::new(handler));
        self
    }

    pub fn on_frame_ready(mut self, handler: impl FnMut(&Frame<Ev>) + Send + 'static) -> Self {
        self.frame_ready = Some(Box::new(handler));
        self
    }

    pub fn on_sequence_finished(mut self, handler: impl FnMut(&Seq, RunStatus) + Send + 'static) -> Self {
        self.sequence_finished = Some(Box::new(handler));
        self
    }

    /// Wraps this adapter in a [`ConsumerSpec`] with the given name,
    /// critical by default.
    pub fn into_spec(self, name: impl Into<String>) -> ConsumerSpec<Seq, Ev>
    where
        Seq: Send + 'static,
        Ev: Send + 'static,
    {
        ConsumerSpec::new(name, Box::new(self), true)
    }
}

impl<Seq, Ev> Consumer<Seq, Ev> for LegacyHandlerAdapter<Seq, Ev>
where
    Seq: Send,
    Ev: Send,
{
    fn setup(&mut self, sequence: &Seq, summary_meta: &MetaMap) -> Result<(), ConsumerError> {
        if let Some(handler) = &mut self.sequence_started {
            handler(sequence, summary_meta);
        }
        Ok(())
    }

    fn frame(&mut self, frame: &Frame<Ev>) -> Result<(), ConsumerError> {
        if let Some(handler) = &mut self.frame_ready {
            handler(frame);
        }
        Ok(())
    }

    fn finish(&mut self, sequence: &Seq, status: RunStatus) -> Result<(), ConsumerError> {
        if let Some(handler) = &mut self.sequence_finished {
            handler(sequence, status);
        }
        Ok(())
    }
}

/// Maps a filesystem path to a writer [`Consumer`], by extension. An
/// external collaborator (file-format encoders are explicitly out of
/// scope, per §1) — the core only needs the coercion point.
pub trait OutputFactory<Seq, Ev> {
    fn create_writer(&self, path: &Utf8Path) -> Result<Box<dyn Consumer<Seq, Ev>>, ConsumerError>;
}

/// Coerces a path-based output into a [`ConsumerSpec`], critical by
/// default, as §4.5 specifies for path-based outputs.
pub fn coerce_path_output<Seq, Ev>(
    factory: &dyn OutputFactory<Seq, Ev>,
    path: &Utf8Path,
) -> Result<ConsumerSpec<Seq, Ev>, ConsumerError> {
    let writer = factory.create_writer(path)?;
    Ok(ConsumerSpec::new(path.to_string(), writer, true))
}

/// An internal, non-critical consumer whose `frame` method relays frames to
/// an external observer callback.
///
/// Since this implementation resolves the open question of which thread
/// emits `frameReady` in favor of the runner thread (see DESIGN.md), the
/// runner does not register one of these automatically — `frameReady` is
/// already emitted on the hot path before `Dispatcher::submit`. This
/// adapter remains available for callers who would rather observe
/// delivered frames as an ordinary consumer (e.g. to get the relay
/// decoupled onto its own worker thread) instead of through the runner's
/// signal callback.
pub struct SignalRelayConsumer<Ev> {
    relay: Box<dyn FnMut(&Frame<Ev>) + Send>,
}

impl<Ev> SignalRelayConsumer<Ev> {
    pub fn new(relay: impl FnMut(&Frame<Ev>) + Send + 'static) -> Self {
        Self {
            relay: Box::new(relay),
        }
    }
}

impl<Seq, Ev> Consumer<Seq, Ev> for SignalRelayConsumer<Ev>
where
    Ev: Send,
{
    fn setup(&mut self, _sequence: &Seq, _summary_meta: &MetaMap) -> Result<(), ConsumerError> {
        Ok(())
    }

    fn frame(&mut self, frame: &Frame<Ev>) -> Result<(), ConsumerError> {
        (self.relay)(frame);
        Ok(())
    }

    fn finish(&mut self, _sequence: &Seq, _status: RunStatus) -> Result<(), ConsumerError> {
        Ok(())
    }
}
