// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event loop: timing, pause/cancel, engine interaction, and signal
//! emission.

use std::cell::RefCell;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Local;
use tracing::{error, info, warn};

use crate::consumer::ConsumerSpec;
use crate::dispatcher::Dispatcher;
use crate::engine::Engine;
use crate::errors::{RunnerError, RunFailure};
use crate::events::{CancelReason, RunnerEvent};
use crate::frame::Frame;
use crate::iteration::{drive_engine_iter, SignalState};
use crate::meta::decorate_with_runner_time;
use crate::policy::RunPolicy;
use crate::report::{RunReport, RunStatus};
use crate::stopwatch::{stopwatch, StopwatchStart};

/// Granularity of the busy-wait used to service `min_start_time` waits and
/// notice pause/cancel in between.
const WAIT_GRANULARITY: Duration = Duration::from_millis(10);

struct RunnerState {
    canceled: AtomicBool,
    running: AtomicBool,
    stopwatch: Mutex<Option<StopwatchStart>>,
}

impl Default for RunnerState {
    fn default() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stopwatch: Mutex::new(None),
        }
    }
}

/// The error returned by [`Runner::try_execute`] when either the callback
/// or the core itself fails.
#[derive(Debug, thiserror::Error)]
pub enum TryExecuteError<E> {
    /// The caller-supplied callback returned an error. The callback is not
    /// called again after this.
    #[error("callback returned an error")]
    Callback(#[source] E),
    /// The core itself failed; see [`RunFailure`].
    #[error(transparent)]
    Run(#[from] RunFailure),
}

/// Owns the event loop, the timing clock, and the pause/cancel flags for a
/// sequence of runs. A `Runner` can be cloned cheaply; clones share the
/// same underlying state, so `cancel()`/`toggle_pause()` called on a clone
/// from another thread affect the run in progress on the original.
pub struct Runner<Seq, Ev> {
    state: Arc<RunnerState>,
    _marker: PhantomData<(Seq, Ev)>,
}

impl<Seq, Ev> Clone for Runner<Seq, Ev> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            _marker: PhantomData,
        }
    }
}

impl<Seq, Ev> Default for Runner<Seq, Ev> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Seq, Ev> Runner<Seq, Ev>
where
    Seq: Send + Sync + 'static,
    Ev: Clone + Send + Sync + crate::event::EventTiming + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(RunnerState::default()),
            _marker: PhantomData,
        }
    }

    /// Idempotent. Sets the cancel flag. Safe to call from any thread.
    pub fn cancel(&self) {
        self.state.canceled.store(true, Ordering::Release);
    }

    /// Idempotent toggle. Accumulates paused time so that `min_start_time`
    /// reckoning excludes paused intervals. Returns the new paused state.
    pub fn toggle_pause(&self) -> bool {
        let mut guard = self.state.stopwatch.lock().unwrap();
        match guard.as_mut() {
            Some(sw) => sw.toggle_pause(),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.state
            .stopwatch
            .lock()
            .unwrap()
            .as_ref()
            .map(|sw| sw.is_paused())
            .unwrap_or(false)
    }

    /// Monotonic seconds since run start, minus accumulated paused time.
    pub fn seconds_elapsed(&self) -> f64 {
        self.state
            .stopwatch
            .lock()
            .unwrap()
            .as_ref()
            .map(|sw| sw.snapshot().active.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Runs to completion with an infallible callback, sugar over
    /// [`Runner::try_execute`] exactly as `execute` wraps `try_execute` in
    /// the core this was modeled on.
    pub fn run<F>(
        &self,
        sequence: Seq,
        events: Box<dyn Iterator<Item = Ev> + Send>,
        engine: &mut dyn Engine<Seq, Ev>,
        consumers: Vec<ConsumerSpec<Seq, Ev>>,
        policy: RunPolicy,
        mut callback: F,
    ) -> Result<RunReport, RunFailure>
    where
        F: FnMut(RunnerEvent<'_, Seq, Ev>) + Send,
    {
        match self.try_execute::<Infallible, _>(sequence, events, engine, consumers, policy, |event| {
            callback(event);
            Ok(())
        }) {
            Ok(report) => Ok(report),
            Err(TryExecuteError::Callback(infallible)) => match infallible {},
            Err(TryExecuteError::Run(failure)) => Err(failure),
        }
    }

    /// Runs to completion, calling `callback` for every [`RunnerEvent`]. If
    /// the callback returns an error, it is not called again and the run is
    /// canceled at the next safe point.
    pub fn try_execute<E, F>(
        &self,
        sequence: Seq,
        events: Box<dyn Iterator<Item = Ev> + Send>,
        engine: &mut dyn Engine<Seq, Ev>,
        consumers: Vec<ConsumerSpec<Seq, Ev>>,
        policy: RunPolicy,
        mut callback: F,
    ) -> Result<RunReport, TryExecuteError<E>>
    where
        F: FnMut(RunnerEvent<'_, Seq, Ev>) -> Result<(), E> + Send,
    {
        self.state.canceled.store(false, Ordering::Release);
        self.state.running.store(true, Ordering::Release);
        *self.state.stopwatch.lock().unwrap() = None;

        let result = self.run_inner(sequence, events, engine, consumers, policy, &mut callback);

        self.state.running.store(false, Ordering::Release);
        *self.state.stopwatch.lock().unwrap() = None;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_inner<E, F>(
        &self,
        sequence: Seq,
        events: Box<dyn Iterator<Item = Ev> + Send>,
        engine: &mut dyn Engine<Seq, Ev>,
        consumers: Vec<ConsumerSpec<Seq, Ev>>,
        policy: RunPolicy,
        callback: &mut F,
    ) -> Result<RunReport, TryExecuteError<E>>
    where
        F: FnMut(RunnerEvent<'_, Seq, Ev>) -> Result<(), E> + Send,
    {
        let started_at = Local::now();

        // --- IDLE -> PREPARING ---
        let summary_meta = match engine.setup_sequence(&sequence) {
            Ok(meta) => meta,
            Err(err) => {
                let report = RunReport {
                    status: RunStatus::Failed,
                    started_at,
                    finished_at: Local::now(),
                    consumer_reports: vec![],
                };
                return Err(TryExecuteError::Run(RunFailure {
                    report,
                    error: RunnerError::EngineSequenceSetup(err),
                }));
            }
        };

        let mut dispatcher = Dispatcher::new(policy);
        for spec in consumers {
            dispatcher.add_consumer(spec);
        }
        dispatcher.start(&sequence, &summary_meta);
        if dispatcher.should_cancel() {
            self.state.canceled.store(true, Ordering::Release);
        }

        // --- PREPARING -> RUNNING ---
        if let Err(err) = callback(RunnerEvent::SequenceStarted {
            sequence: &sequence,
            summary_meta: &summary_meta,
        }) {
            self.state.canceled.store(true, Ordering::Release);
            return self.finish_run(
                &sequence,
                engine,
                dispatcher,
                started_at,
                None,
                Some(TryExecuteError::Callback(err)),
                None,
                callback,
            );
        }

        let mut fatal: Option<RunnerError> = None;
        let mut last_observed_paused = self.is_paused();
        let mut callback_err: Option<E> = None;
        let cancel_reason_cell: RefCell<Option<CancelReason>> = RefCell::new(None);

        // Reset the event-timer reference to now: step 2 of the event loop
        // algorithm, deliberately after `setup_sequence`/consumer `setup()`
        // (both of which may take an arbitrary amount of time) so that
        // neither is silently charged against any event's `min_start_time`.
        *self.state.stopwatch.lock().unwrap() = Some(stopwatch());

        let events = engine.event_iterator(events);

        'events: for event in events {
            if event.reset_event_timer() {
                if let Some(sw) = self.state.stopwatch.lock().unwrap().as_mut() {
                    sw.reset_reference();
                }
            }

            if let Some(target) = event.min_start_time() {
                loop {
                    if self.state.canceled.load(Ordering::Acquire) {
                        break 'events;
                    }
                    if dispatcher.should_cancel() {
                        cancel_reason_cell.borrow_mut().get_or_insert(CancelReason::ConsumerRequest);
                        self.state.canceled.store(true, Ordering::Release);
                        break 'events;
                    }
                    self.emit_pause_toggle_if_changed(callback, &mut last_observed_paused, &mut callback_err);
                    if callback_err.is_some() {
                        self.state.canceled.store(true, Ordering::Release);
                        break 'events;
                    }

                    let remaining = target - self.seconds_elapsed();
                    if remaining <= 0.0 {
                        break;
                    }
                    if let Err(err) = callback(RunnerEvent::AwaitingEvent {
                        event: &event,
                        remaining_seconds: remaining,
                    }) {
                        callback_err = Some(err);
                        self.state.canceled.store(true, Ordering::Release);
                        break 'events;
                    }
                    thread::sleep(WAIT_GRANULARITY);
                }
            }

            if let Err(err) = callback(RunnerEvent::EventStarted { event: &event }) {
                callback_err = Some(err);
                self.state.canceled.store(true, Ordering::Release);
                break 'events;
            }

            if let Err(err) = engine.setup_event(&event) {
                fatal = Some(RunnerError::EngineEvent(err));
                self.state.canceled.store(true, Ordering::Release);
                let _ = engine.teardown_event(&event);
                break 'events;
            }

            let exec_result = engine.exec_event(&event);
            match exec_result {
                Ok(maybe_iter) => {
                    if let Some(iter) = maybe_iter {
                        let canceled = &self.state.canceled;
                        let stopwatch = &self.state.stopwatch;
                        let dispatcher_ref = &dispatcher;
                        let submit_fatal: RefCell<Option<RunnerError>> = RefCell::new(None);
                        let elapsed_ms_at = || {
                            stopwatch
                                .lock()
                                .unwrap()
                                .as_ref()
                                .map(|sw| sw.snapshot().active.as_millis() as u64)
                                .unwrap_or(0)
                        };

                        let mut submit_err = None;
                        drive_engine_iter(
                            iter,
                            || SignalState {
                                canceled: canceled.load(Ordering::Acquire),
                                paused: stopwatch
                                    .lock()
                                    .unwrap()
                                    .as_ref()
                                    .map(|sw| sw.is_paused())
                                    .unwrap_or(false),
                            },
                            |yielded| {
                                let meta = decorate_with_runner_time(yielded.meta, elapsed_ms_at());
                                let frame = Frame::new(crate::frame::FrameYield::new(
                                    yielded.image,
                                    yielded.event,
                                    meta,
                                ));

                                if let Err(err) = callback(RunnerEvent::FrameReady { frame: &frame }) {
                                    submit_err = Some(err);
                                    canceled.store(true, Ordering::Release);
                                    return false;
                                }

                                if let Err(err) = dispatcher_ref.submit(frame) {
                                    error!(error = %err, "dispatcher submit failed");
                                    *submit_fatal.borrow_mut() = Some(err);
                                    canceled.store(true, Ordering::Release);
                                    return false;
                                }

                                if dispatcher_ref.should_cancel() {
                                    cancel_reason_cell.borrow_mut().get_or_insert(CancelReason::ConsumerRequest);
                                    canceled.store(true, Ordering::Release);
                                    return false;
                                }

                                !canceled.load(Ordering::Acquire)
                            },
                        );

                        if let Some(err) = submit_err {
                            callback_err = Some(err);
                        }
                        if let Some(err) = submit_fatal.into_inner() {
                            fatal = Some(err);
                        }
                    }
                }
                Err(err) => {
                    fatal = Some(RunnerError::EngineEvent(err));
                    self.state.canceled.store(true, Ordering::Release);
                }
            }

            let _ = engine.teardown_event(&event);

            if callback_err.is_some() {
                break 'events;
            }

            self.emit_pause_toggle_if_changed(callback, &mut last_observed_paused, &mut callback_err);

            if self.state.canceled.load(Ordering::Acquire) {
                break 'events;
            }
        }

        if fatal.is_none() && dispatcher.should_cancel() {
            cancel_reason_cell.borrow_mut().get_or_insert(CancelReason::ConsumerRequest);
            self.state.canceled.store(true, Ordering::Release);
        }

        self.finish_run(
            &sequence,
            engine,
            dispatcher,
            started_at,
            fatal,
            callback_err.map(TryExecuteError::Callback),
            cancel_reason_cell.into_inner(),
            callback,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_run<E, F>(
        &self,
        sequence: &Seq,
        engine: &mut dyn Engine<Seq, Ev>,
        mut dispatcher: Dispatcher<Seq, Ev>,
        started_at: chrono::DateTime<Local>,
        fatal_from_loop: Option<RunnerError>,
        pending_callback_err: Option<TryExecuteError<E>>,
        cancel_reason: Option<CancelReason>,
        callback: &mut F,
    ) -> Result<RunReport, TryExecuteError<E>>
    where
        F: FnMut(RunnerEvent<'_, Seq, Ev>) -> Result<(), E> + Send,
    {
        let canceled = self.state.canceled.load(Ordering::Acquire);
        let provisional_status = if fatal_from_loop.is_some() {
            RunStatus::Failed
        } else if canceled {
            RunStatus::Canceled
        } else {
            RunStatus::Completed
        };

        // --- RUNNING -> CLOSING -> FINISHED ---
        let (consumer_reports, dispatcher_fatal) = dispatcher.close(sequence, provisional_status);

        let fatal = fatal_from_loop.or(dispatcher_fatal);
        let status = if fatal.is_some() {
            RunStatus::Failed
        } else {
            provisional_status
        };

        let report = RunReport {
            status,
            started_at,
            finished_at: Local::now(),
            consumer_reports,
        };

        info!(status = ?report.status, "run finished");

        // --- FINISHED -> IDLE --- best-effort, like `teardown_event`: the
        // dispatcher has already closed, and the report is already fixed,
        // so a failure here is logged rather than turned into a fatal error.
        if let Err(err) = engine.teardown_sequence(sequence) {
            warn!(error = %err, "engine teardown_sequence failed");
        }

        // The callback is never called again once it has returned an error
        // of its own, per `TryExecuteError::Callback`'s contract.
        let mut late_callback_err = None;
        if pending_callback_err.is_none() {
            if canceled {
                let reason = if fatal.is_some() {
                    CancelReason::FatalError
                } else {
                    cancel_reason.unwrap_or(CancelReason::External)
                };
                if let Err(err) = callback(RunnerEvent::SequenceCanceled { sequence, reason }) {
                    late_callback_err = Some(err);
                }
            }
            if late_callback_err.is_none() {
                if let Err(err) = callback(RunnerEvent::SequenceFinished { sequence, report: &report }) {
                    late_callback_err = Some(err);
                }
            }
        }

        match (fatal, pending_callback_err, late_callback_err) {
            (Some(error), _, _) => Err(TryExecuteError::Run(RunFailure { report, error })),
            (None, Some(err), _) => {
                error!("callback failed during run; reporting callback error");
                Err(err)
            }
            (None, None, Some(err)) => Err(TryExecuteError::Callback(err)),
            (None, None, None) => Ok(report),
        }
    }

    fn emit_pause_toggle_if_changed<E, F>(
        &self,
        callback: &mut F,
        last_observed_paused: &mut bool,
        callback_err: &mut Option<E>,
    ) where
        F: FnMut(RunnerEvent<'_, Seq, Ev>) -> Result<(), E> + Send,
    {
        let now_paused = self.is_paused();
        if now_paused != *last_observed_paused {
            *last_observed_paused = now_paused;
            if let Err(err) = callback(RunnerEvent::SequencePauseToggled { paused: now_paused }) {
                *callback_err = Some(err);
            }
        }
    }
}
