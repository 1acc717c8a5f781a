// Copyright (c) The mda-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end coverage of the runner against an in-process fake engine and
//! fake consumers: the concrete acquisition scenarios a run must handle
//! correctly (happy path, mid-run cancellation, critical/non-critical
//! consumer failure, backpressure, and cooperative cancellation into a
//! hardware-style burst).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mda_runner::{
    BackpressurePolicy, Consumer, ConsumerError, ConsumerSpec, Engine, EngineError, EngineIter,
    EngineSignal, EventTiming, Frame, FrameYield, Image, ImageData, MetaMap, RunPolicy, Runner,
    RunStatus, SoftwareIter,
};
use pretty_assertions::assert_eq;

type Seq = ();

#[derive(Clone, Debug, Default)]
struct FakeEvent {
    label: String,
    min_start_time: Option<f64>,
}

impl FakeEvent {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            min_start_time: None,
        }
    }
}

impl EventTiming for FakeEvent {
    fn min_start_time(&self) -> Option<f64> {
        self.min_start_time
    }

    fn reset_event_timer(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct FakeImage;

impl ImageData for FakeImage {
    fn shape(&self) -> &[usize] {
        &[1, 1]
    }

    fn dtype(&self) -> &str {
        "uint8"
    }
}

fn fake_image() -> Image {
    Image::new(FakeImage)
}

/// Yields one frame per event, carrying a clone of the event as its payload.
struct OneFramePerEvent;

impl Engine<Seq, FakeEvent> for OneFramePerEvent {
    fn setup_event(&mut self, _event: &FakeEvent) -> Result<(), EngineError> {
        Ok(())
    }

    fn exec_event(
        &mut self,
        event: &FakeEvent,
    ) -> Result<Option<Box<dyn EngineIter<FakeEvent> + Send>>, EngineError> {
        let frame = FrameYield::new(fake_image(), event.clone(), MetaMap::new());
        Ok(Some(Box::new(SoftwareIter(std::iter::once(frame)))))
    }
}

/// A consumer that records every frame it sees and lets a test script
/// override `frame`'s outcome on a given 1-based attempt.
struct RecordingConsumer {
    fail_on_attempt: Option<usize>,
    frame_delay: Option<Duration>,
    attempts: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
    finished_with: Arc<Mutex<Option<RunStatus>>>,
}

#[derive(Clone, Default)]
struct RecordingHandle {
    attempts: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
    finished_with: Arc<Mutex<Option<RunStatus>>>,
}

impl RecordingHandle {
    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn finished_with(&self) -> Option<RunStatus> {
        *self.finished_with.lock().unwrap()
    }
}

impl RecordingConsumer {
    fn new(fail_on_attempt: Option<usize>, frame_delay: Option<Duration>) -> (Self, RecordingHandle) {
        let handle = RecordingHandle::default();
        (
            Self {
                fail_on_attempt,
                frame_delay,
                attempts: Arc::clone(&handle.attempts),
                seen: Arc::clone(&handle.seen),
                finished_with: Arc::clone(&handle.finished_with),
            },
            handle,
        )
    }
}

impl Consumer<Seq, FakeEvent> for RecordingConsumer {
    fn setup(&mut self, _sequence: &Seq, _summary_meta: &MetaMap) -> Result<(), ConsumerError> {
        Ok(())
    }

    fn frame(&mut self, frame: &Frame<FakeEvent>) -> Result<(), ConsumerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(delay) = self.frame_delay {
            std::thread::sleep(delay);
        }
        if self.fail_on_attempt == Some(attempt) {
            return Err(ConsumerError::new(format!("scripted failure on attempt {attempt}")));
        }
        self.seen.lock().unwrap().push(frame.event().label.clone());
        Ok(())
    }

    fn finish(&mut self, _sequence: &Seq, status: RunStatus) -> Result<(), ConsumerError> {
        *self.finished_with.lock().unwrap() = Some(status);
        Ok(())
    }
}

#[test]
fn happy_path_delivers_every_frame_in_order() {
    let mut engine = OneFramePerEvent;
    let (writer, handle) = RecordingConsumer::new(None, None);
    let consumers = vec![ConsumerSpec::new("writer", Box::new(writer), true)];

    let events: Box<dyn Iterator<Item = FakeEvent> + Send> =
        Box::new(vec![FakeEvent::new("e1"), FakeEvent::new("e2")].into_iter());

    let runner: Runner<Seq, FakeEvent> = Runner::new();
    let report = runner
        .run((), events, &mut engine, consumers, RunPolicy::default(), |_| {})
        .expect("run should complete");

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(handle.seen(), vec!["e1".to_string(), "e2".to_string()]);
    assert_eq!(handle.finished_with(), Some(RunStatus::Completed));

    assert_eq!(report.consumer_reports.len(), 1);
    let writer_report = &report.consumer_reports[0];
    assert_eq!(writer_report.name, "writer");
    assert_eq!(writer_report.submitted, 2);
    assert_eq!(writer_report.processed, 2);
    assert_eq!(writer_report.dropped, 0);
    assert!(writer_report.errors.is_empty());
}

#[test]
fn zero_events_still_runs_setup_and_finish() {
    let mut engine = OneFramePerEvent;
    let (writer, handle) = RecordingConsumer::new(None, None);
    let consumers = vec![ConsumerSpec::new("writer", Box::new(writer), true)];

    let events: Box<dyn Iterator<Item = FakeEvent> + Send> = Box::new(std::iter::empty());
    let runner: Runner<Seq, FakeEvent> = Runner::new();
    let report = runner
        .run((), events, &mut engine, consumers, RunPolicy::default(), |_| {})
        .expect("run should complete");

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(handle.finished_with(), Some(RunStatus::Completed));
    let writer_report = &report.consumer_reports[0];
    assert_eq!(writer_report.submitted, 0);
    assert_eq!(writer_report.processed, 0);
    assert_eq!(writer_report.dropped, 0);
}

#[test]
fn external_cancel_mid_run_drains_queued_frames_and_reports_canceled() {
    let mut engine = OneFramePerEvent;
    let (writer, handle) = RecordingConsumer::new(None, Some(Duration::from_millis(5)));
    let consumers = vec![ConsumerSpec::new("writer", Box::new(writer), true)];

    // An open-ended stream: the runner keeps asking for events until it is
    // canceled from the callback below.
    let events: Box<dyn Iterator<Item = FakeEvent> + Send> =
        Box::new((0u64..).map(|i| FakeEvent::new(format!("e{i}"))));

    let runner: Runner<Seq, FakeEvent> = Runner::new();
    let runner_for_cancel = runner.clone();
    let mut frames_seen = 0usize;

    let report = runner
        .run((), events, &mut engine, consumers, RunPolicy::default(), move |event| {
            if let mda_runner::RunnerEvent::FrameReady { .. } = event {
                frames_seen += 1;
                if frames_seen == 3 {
                    runner_for_cancel.cancel();
                }
            }
        })
        .expect("run should complete with a cancellation, not an error");

    assert_eq!(report.status, RunStatus::Canceled);
    assert_eq!(handle.finished_with(), Some(RunStatus::Canceled));

    let writer_report = &report.consumer_reports[0];
    // Every submitted frame was eventually drained before close() returned.
    assert_eq!(writer_report.submitted, writer_report.processed + writer_report.dropped);
    assert!(writer_report.submitted >= 3);
}

#[test]
fn critical_consumer_failure_under_cancel_policy_stops_the_run() {
    let mut engine = OneFramePerEvent;
    let (writer, writer_handle) = RecordingConsumer::new(Some(3), None);
    let (observer, observer_handle) = RecordingConsumer::new(None, None);

    let consumers = vec![
        ConsumerSpec::new("writer", Box::new(writer), true),
        ConsumerSpec::new("observer", Box::new(observer), false),
    ];

    let events: Box<dyn Iterator<Item = FakeEvent> + Send> = Box::new(
        (0..10).map(|i| FakeEvent::new(format!("e{i}"))),
    );

    let policy = RunPolicy {
        critical_error: mda_runner::CriticalErrorPolicy::Cancel,
        ..RunPolicy::default()
    };

    let runner: Runner<Seq, FakeEvent> = Runner::new();
    let report = runner
        .run((), events, &mut engine, consumers, policy, |_| {})
        .expect("a CANCEL policy failure ends the run cleanly, not fatally");

    assert_eq!(report.status, RunStatus::Canceled);
    assert_eq!(writer_handle.finished_with(), Some(RunStatus::Canceled));
    assert_eq!(observer_handle.finished_with(), Some(RunStatus::Canceled));

    let writer_report = report
        .consumer_reports
        .iter()
        .find(|r| r.name == "writer")
        .unwrap();
    assert_eq!(writer_report.errors.len(), 1);

    // The non-critical observer kept draining its own queue independent of
    // the writer's failure.
    let observer_report = report
        .consumer_reports
        .iter()
        .find(|r| r.name == "observer")
        .unwrap();
    assert!(observer_report.errors.is_empty());
}

#[test]
fn noncritical_consumer_failure_under_disconnect_policy_only_drops_afterward() {
    let mut engine = OneFramePerEvent;
    let (viewer, viewer_handle) = RecordingConsumer::new(Some(2), None);
    let (writer, writer_handle) = RecordingConsumer::new(None, None);

    let consumers = vec![
        ConsumerSpec::new("writer", Box::new(writer), true),
        ConsumerSpec::new("viewer", Box::new(viewer), false),
    ];

    let events: Box<dyn Iterator<Item = FakeEvent> + Send> =
        Box::new(vec![FakeEvent::new("e1"), FakeEvent::new("e2"), FakeEvent::new("e3")].into_iter());

    let policy = RunPolicy {
        noncritical_error: mda_runner::NonCriticalErrorPolicy::Disconnect,
        ..RunPolicy::default()
    };

    let runner: Runner<Seq, FakeEvent> = Runner::new();
    let report = runner
        .run((), events, &mut engine, consumers, policy, |_| {})
        .expect("a disconnected observer must not fail the run");

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(writer_handle.finished_with(), Some(RunStatus::Completed));
    assert_eq!(writer_handle.seen().len(), 3);

    let viewer_report = report
        .consumer_reports
        .iter()
        .find(|r| r.name == "viewer")
        .unwrap();
    // frame1 is delivered cleanly; frame2 is handed to `frame()` and counted
    // as processed even though it returns the scripted error that trips
    // DISCONNECT; frame3 is never enqueued at all once `disconnected` is
    // set, so it is dropped at the dispatcher rather than the worker.
    assert_eq!(viewer_report.submitted, 3);
    assert_eq!(viewer_report.processed, 2);
    assert_eq!(viewer_report.dropped, 1);
    assert_eq!(viewer_report.errors.len(), 1);
}

#[test]
fn drop_oldest_backpressure_evicts_the_queue_head_under_a_slow_consumer() {
    struct TenFramesFromOneEvent;

    impl Engine<Seq, FakeEvent> for TenFramesFromOneEvent {
        fn setup_event(&mut self, _event: &FakeEvent) -> Result<(), EngineError> {
            Ok(())
        }

        fn exec_event(
            &mut self,
            event: &FakeEvent,
        ) -> Result<Option<Box<dyn EngineIter<FakeEvent> + Send>>, EngineError> {
            let event = event.clone();
            let frames = (0..10).map(move |i| {
                FrameYield::new(fake_image(), FakeEvent::new(format!("{}-{i}", event.label)), MetaMap::new())
            });
            Ok(Some(Box::new(SoftwareIter(frames))))
        }
    }

    let mut engine = TenFramesFromOneEvent;
    // The first `frame()` call sleeps well past the time it takes the
    // runner to submit all ten frames, so every subsequent submission in
    // this test observes a queue that is already at capacity.
    let (writer, handle) = RecordingConsumer::new(None, None);
    let writer = SlowFirstFrame::wrap(writer);
    let consumers = vec![ConsumerSpec::new("writer", Box::new(writer), true)];

    let events: Box<dyn Iterator<Item = FakeEvent> + Send> =
        Box::new(std::iter::once(FakeEvent::new("burst")));

    let policy = RunPolicy {
        backpressure: BackpressurePolicy::DropOldest,
        critical_queue: 4,
        ..RunPolicy::default()
    };

    let runner: Runner<Seq, FakeEvent> = Runner::new();
    let report = runner
        .run((), events, &mut engine, consumers, policy, |_| {})
        .expect("a dropped frame is not a fatal error");

    assert_eq!(report.status, RunStatus::Completed);
    let writer_report = &report.consumer_reports[0];
    assert_eq!(writer_report.submitted, 10);
    assert_eq!(writer_report.processed + writer_report.dropped, 10);
    assert!(writer_report.dropped > 0, "a slow consumer under DROP_OLDEST must lose frames");
    assert!(
        writer_report.processed <= 6,
        "processed ({}) should stay close to the queue capacity plus the one in flight",
        writer_report.processed
    );
    let _ = handle.seen();

    /// Delays the very first `frame()` call so the queue fills up behind it
    /// before the consumer starts pulling from it again.
    struct SlowFirstFrame {
        inner: RecordingConsumer,
        first_call: bool,
    }

    impl SlowFirstFrame {
        fn wrap(inner: RecordingConsumer) -> Self {
            Self { inner, first_call: true }
        }
    }

    impl Consumer<Seq, FakeEvent> for SlowFirstFrame {
        fn setup(&mut self, sequence: &Seq, summary_meta: &MetaMap) -> Result<(), ConsumerError> {
            self.inner.setup(sequence, summary_meta)
        }

        fn frame(&mut self, frame: &Frame<FakeEvent>) -> Result<(), ConsumerError> {
            if self.first_call {
                self.first_call = false;
                std::thread::sleep(Duration::from_millis(300));
            }
            self.inner.frame(frame)
        }

        fn finish(&mut self, sequence: &Seq, status: RunStatus) -> Result<(), ConsumerError> {
            self.inner.finish(sequence, status)
        }
    }
}

/// A custom [`EngineIter`] modeling a hardware-triggered burst: it honors
/// the `Cancel` signal by ending the iterable, per the engine iteration
/// protocol, and never honors `Pause` (there is no software control point
/// inside a hardware sequence).
struct HardwareBurst {
    event: FakeEvent,
    index: usize,
    total: usize,
    stopped: bool,
}

impl Iterator for HardwareBurst {
    type Item = FrameYield<FakeEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped || self.index >= self.total {
            return None;
        }
        let frame = FrameYield::new(
            fake_image(),
            FakeEvent::new(format!("{}-{}", self.event.label, self.index)),
            MetaMap::new(),
        );
        self.index += 1;
        Some(frame)
    }
}

impl EngineIter<FakeEvent> for HardwareBurst {
    fn send_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::Cancel => self.stopped = true,
            EngineSignal::Pause => {
                // Hardware-triggered bursts cannot honor pause: log and
                // continue, per the conservative choice this protocol makes.
            }
        }
    }
}

struct HardwareSequencedEngine {
    burst_size: usize,
}

impl Engine<Seq, FakeEvent> for HardwareSequencedEngine {
    fn setup_event(&mut self, _event: &FakeEvent) -> Result<(), EngineError> {
        Ok(())
    }

    fn exec_event(
        &mut self,
        event: &FakeEvent,
    ) -> Result<Option<Box<dyn EngineIter<FakeEvent> + Send>>, EngineError> {
        Ok(Some(Box::new(HardwareBurst {
            event: event.clone(),
            index: 0,
            total: self.burst_size,
            stopped: false,
        })))
    }
}

#[test]
fn cancel_signal_reaches_a_hardware_sequenced_burst_within_a_few_frames() {
    let mut engine = HardwareSequencedEngine { burst_size: 100 };
    let (writer, handle) = RecordingConsumer::new(None, None);
    let consumers = vec![ConsumerSpec::new("writer", Box::new(writer), true)];

    let events: Box<dyn Iterator<Item = FakeEvent> + Send> =
        Box::new(std::iter::once(FakeEvent::new("burst")));

    let runner: Runner<Seq, FakeEvent> = Runner::new();
    let runner_for_cancel = runner.clone();
    let mut frames_seen = 0usize;

    let report = runner
        .run((), events, &mut engine, consumers, RunPolicy::default(), move |event| {
            if let mda_runner::RunnerEvent::FrameReady { .. } = event {
                frames_seen += 1;
                if frames_seen == 5 {
                    runner_for_cancel.cancel();
                }
            }
        })
        .expect("cancellation into a hardware burst must not fail the run");

    assert_eq!(report.status, RunStatus::Canceled);
    assert!(
        handle.seen().len() <= 6,
        "frame() should be called at most a handful of times after cancel, saw {}",
        handle.seen().len()
    );
    assert!(!handle.seen().is_empty());
}
