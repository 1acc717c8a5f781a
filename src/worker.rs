// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-consumer worker thread: one bounded queue, one consumer,
//! error-policy enforcement.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use crate::consumer::Consumer;
use crate::errors::ConsumerError;
use crate::frame::Frame;
use crate::policy::{CriticalErrorPolicy, ErrorPolicy, NonCriticalErrorPolicy};

/// A message sent from the dispatcher to a consumer's worker thread.
pub enum WorkerMessage<Ev> {
    Frame(Frame<Ev>),
    /// Distinct from any valid message; never reordered past queued frames.
    Stop,
}

/// Shared, thread-safe state for one worker, readable by the dispatcher
/// while the worker thread is running and written only by that thread
/// (aside from the counters, which the dispatcher also increments when it
/// drops a frame before the worker ever sees it).
#[derive(Default)]
pub struct WorkerState {
    pub submitted: AtomicU64,
    pub processed: AtomicU64,
    pub dropped: AtomicU64,
    /// Set by a critical worker under `RAISE`/`CANCEL` once it has decided
    /// to stop; observed by `Dispatcher::should_cancel`.
    pub stop_requested: AtomicBool,
    /// Set by a non-critical worker under `DISCONNECT`; subsequent
    /// submissions are dropped without being enqueued.
    pub disconnected: AtomicBool,
    /// At most one captured exception, stored only under critical `RAISE`.
    pub fatal: Mutex<Option<ConsumerError>>,
    /// Ordered, non-fatal errors captured while running this consumer.
    pub errors: Mutex<Vec<String>>,
}

impl WorkerState {
    pub fn queue_counts(&self) -> (u64, u64, u64) {
        (
            self.submitted.load(Ordering::Acquire),
            self.processed.load(Ordering::Acquire),
            self.dropped.load(Ordering::Acquire),
        )
    }
}

/// Runs on a dedicated worker thread for the lifetime of one consumer's
/// participation in a run. Owns the consumer outright (it was moved in at
/// spawn time) and hands it back as its return value once `Stop` is
/// received or the channel disconnects.
///
/// Once the error policy decides this consumer should stop (critical
/// `RAISE`/`CANCEL`, or non-critical `DISCONNECT`), the loop does not exit
/// immediately. It keeps taking messages — without ever calling
/// `consumer.frame` again — and counts each one as dropped, until the `Stop`
/// sentinel arrives. This is what keeps `submitted = processed + dropped`
/// true at close even for the frames that were already in flight in the
/// race between the worker deciding to stop and the dispatcher noticing.
pub fn worker_loop<Seq, Ev>(
    name: &str,
    mut consumer: Box<dyn Consumer<Seq, Ev>>,
    receiver: Receiver<WorkerMessage<Ev>>,
    state: &WorkerState,
    policy: ErrorPolicy,
) -> Box<dyn Consumer<Seq, Ev>> {
    let mut draining = false;

    loop {
        let message = match receiver.recv() {
            Ok(message) => message,
            Err(_) => {
                // The dispatcher's sender was dropped without a Stop. This
                // should not happen in normal operation; treat it the same
                // as an explicit Stop.
                break;
            }
        };

        let frame = match message {
            WorkerMessage::Stop => break,
            WorkerMessage::Frame(frame) => frame,
        };

        if draining {
            state.dropped.fetch_add(1, Ordering::AcqRel);
            continue;
        }

        // A frame handed to `consumer.frame` counts as processed whether or
        // not the call succeeded — `errors` is where a failed-but-continued
        // delivery shows up. Only frames that never reached `frame` at all
        // (evicted, or skipped while draining) count as dropped; otherwise
        // `submitted = processed + dropped` would drift for any run that hit
        // a non-fatal consumer error under CONTINUE/LOG.
        state.processed.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = consumer.frame(&frame) {
            if handle_frame_error(name, &err, state, policy) {
                draining = true;
            }
        }
    }

    consumer
}

/// Applies the `(critical, policy)` branch of §4.3's worker error matrix.
/// Returns `true` if the worker should stop delivering frames to the
/// consumer and start draining (discarding) whatever arrives until `Stop`.
fn handle_frame_error(name: &str, err: &ConsumerError, state: &WorkerState, policy: ErrorPolicy) -> bool {
    match policy {
        ErrorPolicy::Critical(CriticalErrorPolicy::Raise) => {
            *state.fatal.lock().unwrap() = Some(ConsumerError::new(err.to_string()));
            state.stop_requested.store(true, Ordering::Release);
            true
        }
        ErrorPolicy::Critical(CriticalErrorPolicy::Cancel) => {
            state.errors.lock().unwrap().push(err.to_string());
            state.stop_requested.store(true, Ordering::Release);
            true
        }
        ErrorPolicy::Critical(CriticalErrorPolicy::Continue) => {
            state.errors.lock().unwrap().push(err.to_string());
            debug!(consumer = name, error = %err, "critical consumer failed; continuing per CONTINUE policy");
            false
        }
        ErrorPolicy::NonCritical(NonCriticalErrorPolicy::Log) => {
            warn!(consumer = name, error = %err, "consumer failed; continuing per LOG policy");
            state.errors.lock().unwrap().push(err.to_string());
            false
        }
        ErrorPolicy::NonCritical(NonCriticalErrorPolicy::Disconnect) => {
            state.errors.lock().unwrap().push(err.to_string());
            state.disconnected.store(true, Ordering::Release);
            true
        }
    }
}
