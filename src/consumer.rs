// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capability set every frame sink (or observer) must implement.

use crate::errors::ConsumerError;
use crate::frame::Frame;
use crate::meta::MetaMap;
use crate::report::RunStatus;

/// An output that receives lifecycle notifications and frames for the
/// duration of exactly one run.
///
/// `setup`/`finish` run synchronously on the dispatcher's thread; `frame`
/// runs exclusively on this consumer's own worker thread. A single
/// `Consumer` instance is never called from two threads at once.
pub trait Consumer<Seq, Ev>: Send {
    /// Called once, synchronously, before any frame is delivered.
    fn setup(&mut self, sequence: &Seq, summary_meta: &MetaMap) -> Result<(), ConsumerError>;

    /// Called once per frame delivered to this consumer, in submission
    /// order relative to every other frame delivered to it.
    fn frame(&mut self, frame: &Frame<Ev>) -> Result<(), ConsumerError>;

    /// Called once, synchronously, after this consumer's worker has
    /// drained (or been told to stop draining) its queue.
    fn finish(&mut self, sequence: &Seq, status: RunStatus) -> Result<(), ConsumerError>;
}

/// A registered consumer and the properties that govern how it is treated.
pub struct ConsumerSpec<Seq, Ev> {
    /// Used in reports; need not be unique.
    pub name: String,
    pub consumer: Box<dyn Consumer<Seq, Ev>>,
    /// Critical consumers can halt the run (per the run policy's
    /// critical-error policy); non-critical observers cannot.
    pub critical: bool,
}

impl<Seq, Ev> ConsumerSpec<Seq, Ev> {
    pub fn new(name: impl Into<String>, consumer: Box<dyn Consumer<Seq, Ev>>, critical: bool) -> Self {
        Self {
            name: name.into(),
            consumer,
            critical,
        }
    }
}
