// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consumer lifecycle, fan-out, and per-consumer worker threads.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::consumer::{Consumer, ConsumerSpec};
use crate::errors::{ConsumerError, RunnerError};
use crate::frame::Frame;
use crate::meta::MetaMap;
use crate::policy::{BackpressurePolicy, CriticalErrorPolicy, ErrorPolicy, NonCriticalErrorPolicy, RunPolicy};
use crate::report::{ConsumerReport, RunStatus};
use crate::worker::{worker_loop, WorkerMessage, WorkerState};

/// How long `close()` waits for a single worker thread to finish draining
/// before reporting it as a possibly-deadlocked anomaly and moving on
/// without forcefully killing it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(30);

struct ActiveWorker<Seq, Ev> {
    name: String,
    critical: bool,
    sender: Sender<WorkerMessage<Ev>>,
    /// A second handle onto the same bounded channel, used only to evict
    /// the oldest queued item under `DROP_OLDEST`. Safe because
    /// `crossbeam_channel` receivers are cloneable and multiple consumers
    /// of one channel are supported directly.
    evict_receiver: Receiver<WorkerMessage<Ev>>,
    capacity: usize,
    state: Arc<WorkerState>,
    done_rx: Receiver<()>,
    handle: JoinHandle<Box<dyn Consumer<Seq, Ev>>>,
}

enum SetupOutcome {
    Active,
    Excluded,
}

/// Owns per-consumer worker threads for the duration of one run: spawns
/// them at `start`, fans frame submissions out to them, and joins them at
/// `close`.
pub struct Dispatcher<Seq, Ev> {
    policy: RunPolicy,
    pending_specs: Vec<ConsumerSpec<Seq, Ev>>,
    active: Vec<ActiveWorker<Seq, Ev>>,
    /// Populated at `start()`/`close()` for consumers excluded before a
    /// worker thread ever ran (e.g. setup failure under `CANCEL`), so they
    /// still appear in the final report.
    excluded_reports: Vec<ConsumerReport>,
    fatal: Option<RunnerError>,
    /// Set when a critical consumer's `setup`/`finish` failed under the
    /// `CANCEL` policy. There is no worker thread (and so no
    /// `WorkerState::stop_requested`) to carry this signal for a consumer
    /// excluded before it ever started, so `should_cancel` also consults
    /// this flag.
    setup_cancel_requested: bool,
}

impl<Seq, Ev> Dispatcher<Seq, Ev>
where
    Seq: Send + Sync + 'static,
    Ev: Send + Sync + 'static,
{
    pub fn new(policy: RunPolicy) -> Self {
        Self {
            policy,
            pending_specs: Vec::new(),
            active: Vec::new(),
            excluded_reports: Vec::new(),
            fatal: None,
            setup_cancel_requested: false,
        }
    }

    /// Registers a consumer spec. Must be called before [`Dispatcher::start`].
    pub fn add_consumer(&mut self, spec: ConsumerSpec<Seq, Ev>) {
        self.pending_specs.push(spec);
    }

    /// Runs every registered consumer's `setup` synchronously, then spawns
    /// one worker thread per consumer that survived setup.
    pub fn start(&mut self, sequence: &Seq, summary_meta: &MetaMap) {
        let specs = std::mem::take(&mut self.pending_specs);
        for mut spec in specs {
            let outcome = match spec.consumer.setup(sequence, summary_meta) {
                Ok(()) => SetupOutcome::Active,
                Err(err) => self.handle_setup_or_finish_failure(&spec.name, spec.critical, err),
            };

            match outcome {
                SetupOutcome::Active => self.spawn_worker(spec),
                SetupOutcome::Excluded => {
                    self.excluded_reports.push(ConsumerReport::new(spec.name));
                }
            }
        }
    }

    fn spawn_worker(&mut self, spec: ConsumerSpec<Seq, Ev>) {
        let capacity = self.policy.queue_capacity(spec.critical);
        let error_policy = self.policy.error_policy(spec.critical);
        let (sender, receiver) = crossbeam_channel::bounded::<WorkerMessage<Ev>>(capacity);
        let evict_receiver = receiver.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let state = Arc::new(WorkerState::default());
        let worker_state = Arc::clone(&state);
        let name = spec.name.clone();
        let thread_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("mda-consumer-{thread_name}"))
            .spawn(move || {
                let consumer = worker_loop(&name, spec.consumer, receiver, &worker_state, error_policy);
                let _ = done_tx.send(());
                consumer
            })
            .expect("failed to spawn consumer worker thread");

        self.active.push(ActiveWorker {
            name: spec.name,
            critical: spec.critical,
            sender,
            evict_receiver,
            capacity,
            state,
            done_rx,
            handle,
        });
    }

    /// Fans one frame out to every active worker's queue, per the
    /// configured backpressure policy.
    pub fn submit(&self, frame: Frame<Ev>) -> Result<(), RunnerError> {
        // Workers are fully independent (§5: "Workers share no state with
        // each other"): a `FAIL`-policy queue-full on one worker must not
        // suppress the submission attempt to any other. Every worker is
        // offered this frame regardless of an earlier error; the first
        // error encountered is returned only after the loop completes.
        let mut first_err: Option<RunnerError> = None;

        for worker in &self.active {
            // `submitted` counts every frame this worker was offered,
            // whatever happens to it next — that is what lets `processed +
            // dropped` reliably add back up to `submitted` at close.
            worker.state.submitted.fetch_add(1, Ordering::AcqRel);

            // `stop_requested` covers a critical worker that has already
            // exited under RAISE/CANCEL: its receiver is gone, but the
            // dispatcher's own `evict_receiver` handle keeps the channel
            // itself alive, so nothing would ever tell us the send failed.
            // Treating a stopped worker the same as a disconnected one here
            // is what keeps `submitted = processed + dropped` true at close.
            if worker.state.disconnected.load(Ordering::Acquire)
                || worker.state.stop_requested.load(Ordering::Acquire)
            {
                worker.state.dropped.fetch_add(1, Ordering::AcqRel);
                continue;
            }

            if let Err(err) = self.enqueue(worker, frame.clone()) {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn enqueue(&self, worker: &ActiveWorker<Seq, Ev>, frame: Frame<Ev>) -> Result<(), RunnerError> {
        match self.policy.backpressure {
            BackpressurePolicy::Block => {
                // An unbounded wait here is what gives the engine natural
                // upstream backpressure: the runner thread blocks until a
                // slot opens up.
                if worker.sender.send(WorkerMessage::Frame(frame)).is_err() {
                    // Receiver dropped (worker already exited); count this
                    // frame as dropped rather than losing it from the
                    // submitted/processed/dropped accounting.
                    worker.state.dropped.fetch_add(1, Ordering::AcqRel);
                }
                Ok(())
            }
            BackpressurePolicy::DropNewest => {
                match worker.sender.try_send(WorkerMessage::Frame(frame)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        worker.state.dropped.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        worker.state.dropped.fetch_add(1, Ordering::AcqRel);
                    }
                }
                Ok(())
            }
            BackpressurePolicy::DropOldest => {
                let mut message = WorkerMessage::Frame(frame);
                // Retry once on the race between checking "full" and
                // actually evicting, matching the spec's "retry once" note.
                for _ in 0..2 {
                    match worker.sender.try_send(message) {
                        Ok(()) => return Ok(()),
                        Err(TrySendError::Disconnected(_)) => {
                            worker.state.dropped.fetch_add(1, Ordering::AcqRel);
                            return Ok(());
                        }
                        Err(TrySendError::Full(returned)) => {
                            message = returned;
                            if worker.evict_receiver.try_recv().is_ok() {
                                worker.state.dropped.fetch_add(1, Ordering::AcqRel);
                            }
                        }
                    }
                }
                // Lost the race twice in a row; count this item as dropped
                // rather than blocking the hot path.
                worker.state.dropped.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            BackpressurePolicy::Fail => match worker.sender.try_send(WorkerMessage::Frame(frame)) {
                Ok(()) => Ok(()),
                Err(TrySendError::Disconnected(_)) => {
                    worker.state.dropped.fetch_add(1, Ordering::AcqRel);
                    Ok(())
                }
                Err(TrySendError::Full(_)) => {
                    worker.state.dropped.fetch_add(1, Ordering::AcqRel);
                    Err(RunnerError::QueueFull {
                        name: worker.name.clone(),
                    })
                }
            },
        }
    }

    /// True iff any active critical worker has requested cancellation since
    /// the dispatcher started.
    pub fn should_cancel(&self) -> bool {
        self.setup_cancel_requested
            || self
                .active
                .iter()
                .any(|w| w.critical && w.state.stop_requested.load(Ordering::Acquire))
    }

    /// An observational snapshot of every active worker's queue occupancy.
    pub fn queue_status(&self) -> HashMap<String, (usize, usize)> {
        self.active
            .iter()
            .map(|w| (w.name.clone(), (w.sender.len(), w.capacity)))
            .collect()
    }

    /// Stops every active worker, joins them with a bounded wait, then
    /// calls `finish` on every surviving consumer. Returns the per-consumer
    /// reports and, if a fatal error was captured anywhere, that error.
    pub fn close(&mut self, sequence: &Seq, status: RunStatus) -> (Vec<ConsumerReport>, Option<RunnerError>) {
        let active = std::mem::take(&mut self.active);
        let mut reports = std::mem::take(&mut self.excluded_reports);

        for worker in &active {
            let _ = worker.sender.send(WorkerMessage::Stop);
        }

        for worker in active {
            let ActiveWorker {
                name,
                critical,
                state,
                done_rx,
                handle,
                ..
            } = worker;

            match done_rx.recv_timeout(JOIN_TIMEOUT) {
                Ok(()) => {
                    let mut consumer = handle.join().expect("consumer worker thread panicked");
                    self.finish_consumer(&name, critical, &mut *consumer, &state, sequence, status, &mut reports);
                }
                Err(_) => {
                    warn!(consumer = %name, "worker did not finish within the join timeout; detaching");
                    let (submitted, processed, dropped) = state.queue_counts();
                    reports.push(ConsumerReport {
                        name,
                        submitted,
                        processed,
                        dropped,
                        errors: {
                            let mut errors = state.errors.lock().unwrap().clone();
                            errors.push("worker did not finish within the join timeout".to_string());
                            errors
                        },
                    });
                }
            }
        }

        (reports, self.fatal.take())
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_consumer(
        &mut self,
        name: &str,
        critical: bool,
        consumer: &mut dyn Consumer<Seq, Ev>,
        state: &WorkerState,
        sequence: &Seq,
        status: RunStatus,
        reports: &mut Vec<ConsumerReport>,
    ) {
        if let Some(fatal) = state.fatal.lock().unwrap().take() {
            self.fatal.get_or_insert(RunnerError::ConsumerFatal {
                name: name.to_string(),
                source: fatal,
            });
        }

        if let Err(err) = consumer.finish(sequence, status) {
            self.handle_setup_or_finish_failure(name, critical, err);
        }

        let (submitted, processed, dropped) = state.queue_counts();
        reports.push(ConsumerReport {
            name: name.to_string(),
            submitted,
            processed,
            dropped,
            errors: state.errors.lock().unwrap().clone(),
        });
    }

    /// Shared error-policy branch for `setup` and `finish` failures (§4.2's
    /// setup table; `finish` is handled "like setup failure, but never
    /// aborts draining of other consumers" per §7).
    fn handle_setup_or_finish_failure(&mut self, name: &str, critical: bool, err: ConsumerError) -> SetupOutcome {
        match self.policy.error_policy(critical) {
            ErrorPolicy::Critical(CriticalErrorPolicy::Raise) => {
                self.fatal.get_or_insert(RunnerError::ConsumerFatal {
                    name: name.to_string(),
                    source: err,
                });
                SetupOutcome::Excluded
            }
            ErrorPolicy::Critical(CriticalErrorPolicy::Cancel) => {
                info!(consumer = name, error = %err, "critical consumer requested cancellation");
                self.setup_cancel_requested = true;
                SetupOutcome::Excluded
            }
            ErrorPolicy::Critical(CriticalErrorPolicy::Continue) => {
                debug!(consumer = name, error = %err, "critical consumer setup/finish failed; continuing");
                SetupOutcome::Excluded
            }
            ErrorPolicy::NonCritical(NonCriticalErrorPolicy::Log) => {
                warn!(consumer = name, error = %err, "non-critical consumer setup/finish failed");
                SetupOutcome::Active
            }
            ErrorPolicy::NonCritical(NonCriticalErrorPolicy::Disconnect) => SetupOutcome::Excluded,
        }
    }
}
