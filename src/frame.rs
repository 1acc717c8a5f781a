// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `(image, event, meta)` triple produced by an engine for one event.

use std::sync::Arc;

use debug_ignore::DebugIgnore;

use crate::image::Image;
use crate::meta::MetaMap;

/// One `(image, event, meta)` triple as yielded by `Engine::exec_event`,
/// before the runner has decorated its metadata and wrapped it for sharing.
#[derive(Clone, Debug)]
pub struct FrameYield<Ev> {
    /// The acquired buffer.
    pub image: Image,
    /// The event this frame was produced from.
    pub event: Ev,
    /// Mutable metadata set by the engine; the runner adds `runner_time_ms`
    /// before this frame is submitted if the key is absent.
    pub meta: MetaMap,
}

impl<Ev> FrameYield<Ev> {
    pub fn new(image: Image, event: Ev, meta: MetaMap) -> Self {
        Self { image, event, meta }
    }
}

/// The immutable contents of a [`Frame`].
///
/// `image` is wrapped in [`DebugIgnore`] so that `{:?}`-formatting a frame
/// (e.g. in a log line) never dumps an acquired buffer's contents.
#[derive(Debug)]
pub struct FrameData<Ev> {
    pub image: DebugIgnore<Image>,
    pub event: Ev,
    pub meta: MetaMap,
}

/// A frame, owned by the runner during submission and shared read-only by
/// every consumer worker from that point until each has consumed it.
///
/// Cloning a `Frame` is cheap: it clones the `Arc`, not the buffer.
#[derive(Debug)]
pub struct Frame<Ev>(Arc<FrameData<Ev>>);

impl<Ev> Clone for Frame<Ev> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<Ev> Frame<Ev> {
    pub fn new(yielded: FrameYield<Ev>) -> Self {
        Self(Arc::new(FrameData {
            image: yielded.image,
            event: yielded.event,
            meta: yielded.meta,
        }))
    }

    pub fn image(&self) -> &Image {
        &self.0.image
    }

    pub fn event(&self) -> &Ev {
        &self.0.event
    }

    pub fn meta(&self) -> &MetaMap {
        &self.0.meta
    }
}
