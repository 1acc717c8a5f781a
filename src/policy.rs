// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The configuration record threaded through a single run.

/// How a critical consumer's failure (at setup, frame delivery, or finish)
/// is handled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CriticalErrorPolicy {
    /// Record the error and re-raise it once the run has finished closing.
    Raise,
    /// Record the error and request cancellation of the run.
    Cancel,
    /// Record the error and keep the consumer's worker running.
    Continue,
}

/// How a non-critical consumer's failure is handled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NonCriticalErrorPolicy {
    /// Log the error and keep delivering frames to this consumer.
    Log,
    /// Stop delivering frames to this consumer; further submissions are
    /// dropped without being enqueued.
    Disconnect,
}

/// What a worker does when its bounded queue is full at submission time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackpressurePolicy {
    /// Block the runner thread until space is available.
    Block,
    /// Evict the oldest queued item to make room for the new one.
    DropOldest,
    /// Drop the newly submitted item.
    DropNewest,
    /// Raise a queue-full error on the runner thread.
    Fail,
}

/// The per-criticality error policy a worker enforces. Resolved once, at
/// worker spawn time, from a [`RunPolicy`] and a consumer spec's
/// `critical` flag.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorPolicy {
    Critical(CriticalErrorPolicy),
    NonCritical(NonCriticalErrorPolicy),
}

/// Immutable configuration for a single run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RunPolicy {
    pub critical_error: CriticalErrorPolicy,
    pub noncritical_error: NonCriticalErrorPolicy,
    pub backpressure: BackpressurePolicy,
    /// Queue capacity for critical consumers. Must be at least 1.
    pub critical_queue: usize,
    /// Queue capacity for non-critical (observer) consumers. Must be at
    /// least 1.
    pub observer_queue: usize,
}

impl RunPolicy {
    /// The queue capacity to use for a consumer spec with the given
    /// criticality.
    pub fn queue_capacity(&self, critical: bool) -> usize {
        if critical {
            self.critical_queue
        } else {
            self.observer_queue
        }
    }

    /// The error policy to enforce for a consumer spec with the given
    /// criticality.
    pub fn error_policy(&self, critical: bool) -> ErrorPolicy {
        if critical {
            ErrorPolicy::Critical(self.critical_error)
        } else {
            ErrorPolicy::NonCritical(self.noncritical_error)
        }
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            critical_error: CriticalErrorPolicy::Raise,
            noncritical_error: NonCriticalErrorPolicy::Log,
            backpressure: BackpressurePolicy::Block,
            critical_queue: 256,
            observer_queue: 256,
        }
    }
}
