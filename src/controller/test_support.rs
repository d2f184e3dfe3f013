use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::runs::{
    ApiError, EventKind, EventTime, MetricEvent, MetricsSnapshot, PromoteResponse, RunId,
    RunMeta, RunStatus, RunsApi, ScorePairRequest, ScoreResult, StartRunRequest,
    StartRunResponse, StreamCallback, StreamHandle, StreamMessage, StreamSink, TrainRun,
    subscription,
};

/// In-memory server: tests seed runs and push stream events by hand.
#[derive(Default)]
pub(crate) struct FakeRunsApi {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    runs: Vec<RunMeta>,
    details: HashMap<RunId, TrainRun>,
    history: HashMap<RunId, Vec<MetricEvent>>,
    failing: HashSet<RunId>,
    sinks: HashMap<RunId, Vec<StreamSink>>,
    started: Vec<StartRunRequest>,
    promoted: Vec<RunId>,
}

impl FakeRunsApi {
    pub(crate) fn with_run(self, id: &str, history: Vec<MetricEvent>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let run_id = RunId::new(id);
            state.runs.push(RunMeta {
                run_id: run_id.clone(),
                status: RunStatus::Running,
                started_at: Some(EventTime::Epoch(1.0)),
                name: None,
            });
            let mut config = serde_json::Map::new();
            config.insert("lr".into(), serde_json::json!(0.001));
            state.details.insert(
                run_id.clone(),
                TrainRun {
                    run_id: run_id.clone(),
                    status: RunStatus::Running,
                    started_at: Some(EventTime::Epoch(1.0)),
                    completed_at: None,
                    config_snapshot: config,
                },
            );
            state.history.insert(run_id, history);
        }
        self
    }

    pub(crate) fn fail_snapshot(&self, id: &str) {
        self.state.lock().unwrap().failing.insert(RunId::new(id));
    }

    pub(crate) fn restore_snapshot(&self, id: &str) {
        self.state.lock().unwrap().failing.remove(&RunId::new(id));
    }

    pub(crate) fn is_streaming(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .sinks
            .get(&RunId::new(id))
            .is_some_and(|sinks| sinks.iter().any(StreamSink::is_open))
    }

    /// Push `message` to every open subscription of `id`; returns how many
    /// subscribers accepted it.
    pub(crate) fn emit(&self, id: &str, message: StreamMessage) -> usize {
        let mut state = self.state.lock().unwrap();
        let Some(sinks) = state.sinks.get_mut(&RunId::new(id)) else {
            return 0;
        };
        sinks
            .iter_mut()
            .filter_map(|sink| sink.send(message.clone()).then_some(()))
            .count()
    }

    pub(crate) fn started(&self) -> Vec<StartRunRequest> {
        self.state.lock().unwrap().started.clone()
    }

    pub(crate) fn promoted(&self) -> Vec<RunId> {
        self.state.lock().unwrap().promoted.clone()
    }
}

fn not_found(run_id: &RunId) -> ApiError {
    ApiError::Status {
        endpoint: format!("runs/{run_id}"),
        code: 404,
        body: "not found".into(),
    }
}

impl RunsApi for FakeRunsApi {
    fn list_runs(&self, _scope: &str, limit: usize) -> Result<Vec<RunMeta>, ApiError> {
        let state = self.state.lock().unwrap();
        Ok(state.runs.iter().take(limit).cloned().collect())
    }

    fn get_run(&self, run_id: &RunId) -> Result<TrainRun, ApiError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(run_id) {
            return Err(ApiError::Transport {
                endpoint: format!("runs/{run_id}"),
                message: "connection refused".into(),
            });
        }
        state.details.get(run_id).cloned().ok_or_else(|| not_found(run_id))
    }

    fn get_metrics(&self, run_id: &RunId, limit: usize) -> Result<MetricsSnapshot, ApiError> {
        let state = self.state.lock().unwrap();
        let events = state.history.get(run_id).ok_or_else(|| not_found(run_id))?;
        Ok(MetricsSnapshot {
            events: events.iter().take(limit).cloned().collect(),
        })
    }

    fn stream_run(
        &self,
        run_id: &RunId,
        deliver: StreamCallback,
    ) -> Result<StreamHandle, ApiError> {
        let (handle, sink) = subscription(deliver);
        self.state
            .lock()
            .unwrap()
            .sinks
            .entry(run_id.clone())
            .or_default()
            .push(sink);
        Ok(handle)
    }

    fn start_run(&self, request: &StartRunRequest) -> Result<StartRunResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.started.push(request.clone());
        Ok(StartRunResponse {
            run_id: RunId::new(format!("child-{}", state.started.len())),
        })
    }

    fn promote_run(&self, run_id: &RunId) -> Result<PromoteResponse, ApiError> {
        self.state.lock().unwrap().promoted.push(run_id.clone());
        Ok(PromoteResponse { ok: true })
    }

    fn score_pair(&self, request: &ScorePairRequest) -> Result<ScoreResult, ApiError> {
        Ok(ScoreResult {
            score: 0.75,
            winner: Some(request.candidate.clone()),
            details: serde_json::Map::new(),
        })
    }
}

pub(crate) fn telemetry(step: f64) -> MetricEvent {
    MetricEvent {
        kind: Some(EventKind::Telemetry),
        ts: Some(EventTime::Epoch(1_000.0 + step)),
        step: Some(step),
        loss: Some(1.0 / (1.0 + step)),
        proj_x: Some(step),
        proj_y: Some(step * 0.5),
        ..MetricEvent::default()
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
