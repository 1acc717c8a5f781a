// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An opaque handle to a multi-dimensional numeric buffer.

use std::fmt;
use std::sync::Arc;

/// What a frame's image actually contains is never the core's concern; this
/// trait exposes just enough shape information for a consumer to decide how
/// to route or display a frame without the core ever looking inside it.
pub trait ImageData: fmt::Debug + Send + Sync {
    /// The buffer's shape, outermost dimension first.
    fn shape(&self) -> &[usize];

    /// A short, implementation-defined description of the element type
    /// (e.g. `"uint16"`, `"float32"`).
    fn dtype(&self) -> &str;
}

/// A cheaply cloneable handle to an [`ImageData`] buffer.
///
/// Frames carry an `Image` by reference (`Arc`) rather than by value so that
/// a single acquired buffer can be fanned out to many consumers without
/// copying it.
#[derive(Clone, Debug)]
pub struct Image(Arc<dyn ImageData>);

impl Image {
    /// Wraps an existing buffer implementation.
    pub fn new(data: impl ImageData + 'static) -> Self {
        Self(Arc::new(data))
    }

    /// The buffer's shape, outermost dimension first.
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// A short, implementation-defined description of the element type.
    pub fn dtype(&self) -> &str {
        self.0.dtype()
    }
}
