// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the runner, dispatcher, and the traits they drive.

use thiserror::Error;

use crate::report::RunReport;

/// A boxed, type-erased underlying error, used as the `#[source]` of the
/// error types below when the failing engine or consumer reports its own
/// error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error surfaced by an [`Engine`](crate::engine::Engine) method.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// An error surfaced by a [`Consumer`](crate::consumer::Consumer) method.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConsumerError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ConsumerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// The single fatal error a run can store, per §7's "at most one captured
/// exception" rule for critical workers and the runner's own fatal paths.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// `engine.setup_sequence` failed; the run is aborted before
    /// `sequenceStarted` and no consumer receives `setup`.
    #[error("engine sequence setup failed")]
    EngineSequenceSetup(#[source] EngineError),

    /// `engine.setup_event`, `exec_event`, or `teardown_event` failed and
    /// was not translated into a cancellation by the iteration protocol.
    #[error("engine event handling failed")]
    EngineEvent(#[source] EngineError),

    /// A critical consumer failed under the `RAISE` policy.
    #[error("consumer `{name}` failed fatally")]
    ConsumerFatal {
        name: String,
        #[source]
        source: ConsumerError,
    },

    /// A worker's queue was full under the `FAIL` backpressure policy.
    #[error("queue for consumer `{name}` is full")]
    QueueFull { name: String },
}

/// The error returned by [`Runner::try_execute`](crate::runner::Runner::try_execute)
/// when a run ends in `RunStatus::Failed`.
///
/// Carries the report produced up to that point, since `close()` still runs
/// and every surviving consumer still receives its `finish()` call even on
/// a fatal error.
#[derive(Debug, Error)]
#[error("run failed: {error}")]
pub struct RunFailure {
    pub report: RunReport,
    #[source]
    pub error: RunnerError,
}
