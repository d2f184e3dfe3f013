//! Switching the active run: teardown, snapshot, live stream.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::jobs::{JobChannel, Waker, next_generation};
use crate::runs::{
    ApiError, EventKind, MetricEvent, MetricsSnapshot, RunId, RunsApi, StreamHandle,
    StreamMessage, TrainRun,
};
use crate::telemetry::{Admission, FrameScheduler, IngestPipeline, TelemetryRingBuffer};

/// Called with a human-readable message whenever the snapshot or the stream
/// fails.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// Summary of the selected run shown in the header and inspector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunHud {
    pub step: Option<f64>,
    pub epoch: Option<f64>,
    pub percent: Option<f64>,
    pub loss: Option<f64>,
    pub lr: Option<f64>,
    pub grad_norm: Option<f64>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub last_error: Option<String>,
    pub event_count: usize,
    pub point_count: usize,
    pub metrics: BTreeMap<String, f64>,
}

impl RunHud {
    fn observe(&mut self, event: &MetricEvent) {
        macro_rules! latest {
            ($($field:ident),*) => {
                $(if let Some(value) = event.$field {
                    self.$field = Some(value);
                })*
            };
        }
        latest!(step, epoch, percent, loss, lr, grad_norm);
        if let Some(status) = &event.status {
            self.status = Some(status.clone());
        }
        if let Some(message) = &event.message {
            if event.is_kind(EventKind::Error) {
                self.last_error = Some(message.clone());
            } else {
                self.message = Some(message.clone());
            }
        }
        for (name, value) in &event.metrics {
            self.metrics.insert(name.clone(), *value);
        }
    }
}

#[derive(Debug)]
enum RunJob {
    Snapshot {
        generation: u64,
        run_id: RunId,
        result: Result<(TrainRun, MetricsSnapshot), ApiError>,
    },
    Stream {
        generation: u64,
        message: StreamMessage,
    },
}

/// What one [`RunStreamController::poll`] applied.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunPoll {
    pub accepted: usize,
    pub snapshot_loaded: bool,
    pub errors: Vec<String>,
}

impl RunPoll {
    pub fn changed(&self) -> bool {
        self.accepted > 0 || self.snapshot_loaded || !self.errors.is_empty()
    }
}

pub struct RunStreamController {
    api: Arc<dyn RunsApi>,
    pipeline: IngestPipeline,
    jobs: JobChannel<RunJob>,
    generation: u64,
    selected: Option<RunId>,
    run: Option<TrainRun>,
    stream: Option<StreamHandle>,
    stream_ended: bool,
    loading: bool,
    hud: RunHud,
    metrics_limit: usize,
    on_error: Option<ErrorCallback>,
}

impl RunStreamController {
    pub fn new(api: Arc<dyn RunsApi>, ring: TelemetryRingBuffer, metrics_limit: usize) -> Self {
        Self {
            api,
            pipeline: IngestPipeline::new(ring),
            jobs: JobChannel::new(),
            generation: 0,
            selected: None,
            run: None,
            stream: None,
            stream_ended: false,
            loading: false,
            hud: RunHud::default(),
            metrics_limit: metrics_limit.max(1),
            on_error: None,
        }
    }

    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.on_error = Some(callback);
    }

    pub fn set_waker(&mut self, waker: Waker) {
        self.jobs.set_waker(waker);
    }

    pub fn set_scheduler(&mut self, scheduler: Box<dyn FrameScheduler>) {
        self.pipeline.ring_mut().set_scheduler(scheduler);
    }

    pub fn set_ring_capacity(&mut self, capacity: usize) {
        self.pipeline.ring_mut().set_capacity(capacity);
    }

    pub fn set_metrics_limit(&mut self, limit: usize) {
        self.metrics_limit = limit.max(1);
    }

    /// Replace the server client; the current selection is dropped.
    pub fn set_api(&mut self, api: Arc<dyn RunsApi>) {
        self.clear_selection();
        self.api = api;
    }

    /// Switch to `run_id`. Everything belonging to the previous run is gone
    /// when this returns; the history and the live stream follow through
    /// [`Self::poll`].
    pub fn select_run(&mut self, run_id: RunId) {
        self.close_stream();
        self.reset_state();
        self.generation = next_generation(self.generation);
        self.selected = Some(run_id.clone());
        self.loading = true;
        tracing::info!("Selecting run {run_id} (generation {})", self.generation);

        let api = Arc::clone(&self.api);
        let generation = self.generation;
        let limit = self.metrics_limit;
        self.jobs.spawn("snapshot", move || {
            let result = api
                .get_run(&run_id)
                .and_then(|run| Ok((run, api.get_metrics(&run_id, limit)?)));
            RunJob::Snapshot {
                generation,
                run_id,
                result,
            }
        });
    }

    /// Close the stream and forget the selected run.
    pub fn clear_selection(&mut self) {
        self.close_stream();
        self.reset_state();
        self.generation = next_generation(self.generation);
        self.selected = None;
    }

    /// Apply job results for the current selection. Results issued for an
    /// earlier selection are dropped.
    pub fn poll(&mut self) -> RunPoll {
        let mut outcome = RunPoll::default();
        while let Some(job) = self.jobs.try_recv() {
            let generation = match &job {
                RunJob::Snapshot { generation, .. } | RunJob::Stream { generation, .. } => {
                    *generation
                }
            };
            if generation != self.generation {
                tracing::trace!(
                    "Dropping result for generation {generation}, current is {}",
                    self.generation
                );
                continue;
            }
            match job {
                RunJob::Snapshot { run_id, result, .. } => {
                    self.apply_snapshot(run_id, result, &mut outcome);
                }
                RunJob::Stream { message, .. } => self.apply_stream(message, &mut outcome),
            }
        }
        if outcome.accepted > 0 {
            self.refresh_counts();
        }
        outcome
    }

    /// Frame callback for the ring buffer.
    pub fn on_frame(&mut self) -> bool {
        let flushed = self.pipeline.on_frame();
        if flushed {
            self.refresh_counts();
        }
        flushed
    }

    pub fn selected(&self) -> Option<&RunId> {
        self.selected.as_ref()
    }

    pub fn run(&self) -> Option<&TrainRun> {
        self.run.as_ref()
    }

    pub fn hud(&self) -> &RunHud {
        &self.hud
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.as_ref().is_some_and(|handle| !handle.is_closed()) && !self.stream_ended
    }

    fn apply_snapshot(
        &mut self,
        run_id: RunId,
        result: Result<(TrainRun, MetricsSnapshot), ApiError>,
        outcome: &mut RunPoll,
    ) {
        self.loading = false;
        let (run, snapshot) = match result {
            Ok(loaded) => loaded,
            Err(err) => {
                self.reset_state();
                let message = format!("Failed to load run {run_id}: {err}");
                tracing::warn!("{message}");
                self.report_error(message, outcome);
                return;
            }
        };
        tracing::debug!(
            "Loaded run {run_id} with {} history events",
            snapshot.events.len()
        );
        self.hud.status = Some(run.status.to_string());
        self.run = Some(run);
        outcome.snapshot_loaded = true;
        for event in snapshot.events {
            self.admit(event, outcome);
        }
        self.open_stream(run_id, outcome);
    }

    fn open_stream(&mut self, run_id: RunId, outcome: &mut RunPoll) {
        let tx = self.jobs.sender();
        let waker = self.jobs.waker();
        let generation = self.generation;
        let deliver = Box::new(move |message| {
            let delivered = tx.send(RunJob::Stream {
                generation,
                message,
            });
            waker();
            delivered.is_ok()
        });
        match self.api.stream_run(&run_id, deliver) {
            Ok(handle) => {
                self.stream = Some(handle);
                self.stream_ended = false;
            }
            Err(err) => {
                let message = format!("Failed to open event stream for {run_id}: {err}");
                tracing::warn!("{message}");
                self.report_error(message, outcome);
            }
        }
    }

    fn apply_stream(&mut self, message: StreamMessage, outcome: &mut RunPoll) {
        match message {
            StreamMessage::Event(event) => self.admit(event, outcome),
            StreamMessage::Error(error) => {
                tracing::warn!("Event stream error: {error}");
                self.report_error(error, outcome);
            }
            StreamMessage::Ended => {
                tracing::info!("Event stream ended");
                self.stream_ended = true;
            }
        }
    }

    fn admit(&mut self, event: MetricEvent, outcome: &mut RunPoll) {
        if self.pipeline.log().contains(&event) {
            return;
        }
        let terminal = event.terminal_status();
        let ts = event.ts.clone();
        self.hud.observe(&event);
        let Admission { accepted, .. } = self.pipeline.admit(event);
        if !accepted {
            return;
        }
        outcome.accepted += 1;
        let (Some(status), Some(run)) = (terminal, self.run.as_mut()) else {
            return;
        };
        if run.apply_terminal(status, ts.as_ref()) {
            tracing::info!("Run {} finished as {status}", run.run_id);
            self.hud.status = Some(status.to_string());
        }
    }

    fn report_error(&mut self, message: String, outcome: &mut RunPoll) {
        if let Some(callback) = self.on_error.as_mut() {
            callback(&message);
        }
        self.hud.last_error = Some(message.clone());
        outcome.errors.push(message);
    }

    fn refresh_counts(&mut self) {
        self.hud.event_count = self.pipeline.log().len();
        self.hud.point_count = self.pipeline.ring().len();
    }

    fn close_stream(&mut self) {
        if let Some(handle) = self.stream.take() {
            if handle.close() {
                tracing::debug!("Closed event stream");
            }
        }
        self.stream_ended = false;
    }

    fn reset_state(&mut self) {
        self.pipeline.reset();
        self.run = None;
        self.hud = RunHud::default();
        self.loading = false;
    }
}

impl std::fmt::Debug for RunStreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStreamController")
            .field("generation", &self.generation)
            .field("selected", &self.selected)
            .field("loading", &self.loading)
            .field("streaming", &self.is_streaming())
            .field("events", &self.pipeline.log().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::{FakeRunsApi, telemetry, wait_until};
    use crate::runs::{EventTime, RunStatus};
    use crate::telemetry::ManualScheduler;
    use std::sync::Mutex;

    fn controller(api: Arc<FakeRunsApi>) -> (RunStreamController, ManualScheduler) {
        let (ring, scheduler) = TelemetryRingBuffer::with_manual_scheduler(1_000);
        (RunStreamController::new(api, ring, 500), scheduler)
    }

    fn wait_for_stream(controller: &mut RunStreamController, api: &FakeRunsApi, id: &str) {
        assert!(wait_until(|| {
            controller.poll();
            api.is_streaming(id)
        }));
    }

    #[test]
    fn switching_runs_empties_log_and_ring_immediately() {
        let api = Arc::new(
            FakeRunsApi::default()
                .with_run("a", vec![])
                .with_run("b", vec![]),
        );
        let (mut controller, _scheduler) = controller(Arc::clone(&api));
        controller.select_run(RunId::new("a"));
        wait_for_stream(&mut controller, &api, "a");

        for step in 0..3 {
            api.emit("a", StreamMessage::Event(telemetry(step as f64)));
        }
        controller.poll();
        controller.on_frame();
        assert_eq!(controller.pipeline().log().len(), 3);
        assert_eq!(controller.pipeline().ring().len(), 3);

        controller.select_run(RunId::new("b"));
        assert_eq!(controller.pipeline().log().len(), 0);
        assert_eq!(controller.pipeline().ring().len(), 0);
        assert_eq!(controller.hud(), &RunHud::default());
        assert!(!api.is_streaming("a"));
        assert_eq!(api.emit("a", StreamMessage::Event(telemetry(9.0))), 0);
    }

    #[test]
    fn queued_stream_events_of_previous_run_are_dropped() {
        let api = Arc::new(
            FakeRunsApi::default()
                .with_run("a", vec![])
                .with_run("b", vec![]),
        );
        let (mut controller, _scheduler) = controller(Arc::clone(&api));
        controller.select_run(RunId::new("a"));
        wait_for_stream(&mut controller, &api, "a");

        // Delivered into the channel while "a" is still the selection.
        assert_eq!(api.emit("a", StreamMessage::Event(telemetry(1.0))), 1);
        assert_eq!(api.emit("a", StreamMessage::Error("late".into())), 1);
        controller.select_run(RunId::new("b"));
        wait_for_stream(&mut controller, &api, "b");

        let poll = controller.poll();
        assert_eq!(poll.accepted, 0);
        assert!(poll.errors.is_empty());
        controller.on_frame();
        assert_eq!(controller.pipeline().log().len(), 0);
        assert_eq!(controller.pipeline().ring().len(), 0);
        assert_eq!(controller.hud().last_error, None);
        assert_eq!(controller.selected().map(RunId::as_str), Some("b"));
    }

    #[test]
    fn history_and_stream_overlap_is_deduplicated() {
        let history = vec![telemetry(1.0), telemetry(2.0)];
        let api = Arc::new(FakeRunsApi::default().with_run("a", history));
        let (mut controller, scheduler) = controller(Arc::clone(&api));
        controller.select_run(RunId::new("a"));
        wait_for_stream(&mut controller, &api, "a");
        assert!(!controller.is_loading());
        assert_eq!(scheduler.requests(), 1);

        api.emit("a", StreamMessage::Event(telemetry(2.0)));
        api.emit("a", StreamMessage::Event(telemetry(3.0)));
        let poll = controller.poll();
        assert_eq!(poll.accepted, 1);
        controller.on_frame();
        assert_eq!(controller.hud().event_count, 3);
        assert_eq!(controller.hud().point_count, 3);
        assert_eq!(controller.hud().step, Some(3.0));
    }

    #[test]
    fn stale_snapshot_is_discarded() {
        let api = Arc::new(
            FakeRunsApi::default()
                .with_run("a", vec![telemetry(1.0), telemetry(2.0)])
                .with_run("b", vec![telemetry(5.0)]),
        );
        let (mut controller, _) = controller(Arc::clone(&api));
        controller.select_run(RunId::new("a"));
        // Let a's snapshot land in the channel without polling it.
        std::thread::sleep(std::time::Duration::from_millis(50));
        controller.select_run(RunId::new("b"));
        wait_for_stream(&mut controller, &api, "b");

        assert_eq!(controller.run().map(|run| run.run_id.as_str()), Some("b"));
        assert_eq!(controller.pipeline().log().len(), 1);
        assert!(!api.is_streaming("a"));
    }

    #[test]
    fn snapshot_failure_clears_state_and_opens_no_stream() {
        let api = Arc::new(FakeRunsApi::default().with_run("a", vec![]));
        api.fail_snapshot("a");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (mut controller, _) = controller(Arc::clone(&api));
        let sink = Arc::clone(&errors);
        controller.set_error_callback(Box::new(move |message| {
            sink.lock().unwrap().push(message.to_string());
        }));

        controller.select_run(RunId::new("a"));
        assert!(wait_until(|| !controller.poll().errors.is_empty()));
        assert!(controller.run().is_none());
        assert!(!controller.is_loading());
        assert!(!controller.is_streaming());
        assert!(!api.is_streaming("a"));
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(controller.hud().last_error.is_some());
    }

    #[test]
    fn stream_errors_keep_admitted_events() {
        let api = Arc::new(FakeRunsApi::default().with_run("a", vec![telemetry(1.0)]));
        let (mut controller, _) = controller(Arc::clone(&api));
        controller.select_run(RunId::new("a"));
        wait_for_stream(&mut controller, &api, "a");

        api.emit("a", StreamMessage::Error("connection reset".into()));
        let poll = controller.poll();
        assert_eq!(poll.errors, vec!["connection reset".to_string()]);
        assert_eq!(controller.pipeline().log().len(), 1);
        assert_eq!(
            controller.hud().last_error.as_deref(),
            Some("connection reset")
        );
    }

    #[test]
    fn terminal_status_is_applied_once() {
        let api = Arc::new(FakeRunsApi::default().with_run("a", vec![]));
        let (mut controller, _) = controller(Arc::clone(&api));
        controller.select_run(RunId::new("a"));
        wait_for_stream(&mut controller, &api, "a");

        let done = MetricEvent {
            kind: Some(EventKind::Status),
            status: Some("completed".into()),
            ts: Some(EventTime::Epoch(4_242.0)),
            ..MetricEvent::default()
        };
        let failed = MetricEvent {
            kind: Some(EventKind::Status),
            status: Some("failed".into()),
            ts: Some(EventTime::Epoch(5_000.0)),
            ..MetricEvent::default()
        };
        api.emit("a", StreamMessage::Event(done));
        api.emit("a", StreamMessage::Event(failed));
        controller.poll();

        let run = controller.run().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.completed_at, Some(EventTime::Epoch(4_242.0)));
    }

    #[test]
    fn terminal_status_without_timestamp_uses_current_time() {
        let api = Arc::new(FakeRunsApi::default().with_run("a", vec![]));
        let (mut controller, _) = controller(Arc::clone(&api));
        controller.select_run(RunId::new("a"));
        wait_for_stream(&mut controller, &api, "a");

        let cancelled = MetricEvent {
            kind: Some(EventKind::Status),
            status: Some("cancelled".into()),
            ..MetricEvent::default()
        };
        api.emit("a", StreamMessage::Event(cancelled));
        controller.poll();
        let run = controller.run().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(matches!(run.completed_at, Some(EventTime::Epoch(secs)) if secs > 1.0e9));
    }

    #[test]
    fn clear_selection_drops_everything() {
        let api = Arc::new(FakeRunsApi::default().with_run("a", vec![telemetry(1.0)]));
        let (mut controller, scheduler) = controller(Arc::clone(&api));
        controller.select_run(RunId::new("a"));
        wait_for_stream(&mut controller, &api, "a");
        controller.clear_selection();
        assert!(controller.selected().is_none());
        assert!(controller.pipeline().log().is_empty());
        assert!(!api.is_streaming("a"));
        assert_eq!(scheduler.cancellations(), 1);
    }
}
