use std::collections::HashMap;
use std::sync::Mutex;

use runscope::runs::{
    ApiError, EventKind, EventTime, MetricEvent, MetricsSnapshot, PromoteResponse, RunId,
    RunMeta, RunStatus, RunsApi, ScorePairRequest, ScoreResult, StartRunRequest,
    StartRunResponse, StreamCallback, StreamHandle, StreamMessage, StreamSink, TrainRun,
    subscription,
};

/// Scriptable in-memory training server.
#[derive(Default)]
pub struct FakeRunsApi {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    runs: Vec<TrainRun>,
    history: HashMap<RunId, Vec<MetricEvent>>,
    sinks: HashMap<RunId, Vec<StreamSink>>,
}

impl FakeRunsApi {
    pub fn with_run(self, id: &str, history: Vec<MetricEvent>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let run_id = RunId::new(id);
            state.runs.push(TrainRun {
                run_id: run_id.clone(),
                status: RunStatus::Running,
                started_at: Some(EventTime::Epoch(1_700_000_000.0)),
                completed_at: None,
                config_snapshot: serde_json::Map::new(),
            });
            state.history.insert(run_id, history);
        }
        self
    }

    pub fn is_streaming(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .sinks
            .get(&RunId::new(id))
            .is_some_and(|sinks| sinks.iter().any(StreamSink::is_open))
    }

    pub fn emit(&self, id: &str, event: MetricEvent) -> usize {
        let mut state = self.state.lock().unwrap();
        let Some(sinks) = state.sinks.get_mut(&RunId::new(id)) else {
            return 0;
        };
        sinks
            .iter_mut()
            .filter_map(|sink| sink.send(StreamMessage::Event(event.clone())).then_some(()))
            .count()
    }
}

impl RunsApi for FakeRunsApi {
    fn list_runs(&self, _scope: &str, limit: usize) -> Result<Vec<RunMeta>, ApiError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .runs
            .iter()
            .take(limit)
            .map(|run| RunMeta {
                run_id: run.run_id.clone(),
                status: run.status,
                started_at: run.started_at.clone(),
                name: None,
            })
            .collect())
    }

    fn get_run(&self, run_id: &RunId) -> Result<TrainRun, ApiError> {
        let state = self.state.lock().unwrap();
        state
            .runs
            .iter()
            .find(|run| &run.run_id == run_id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                endpoint: format!("runs/{run_id}"),
                code: 404,
                body: String::new(),
            })
    }

    fn get_metrics(&self, run_id: &RunId, limit: usize) -> Result<MetricsSnapshot, ApiError> {
        let state = self.state.lock().unwrap();
        let events = state.history.get(run_id).cloned().unwrap_or_default();
        Ok(MetricsSnapshot {
            events: events.into_iter().take(limit).collect(),
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

    fn start_run(&self, _request: &StartRunRequest) -> Result<StartRunResponse, ApiError> {
        Ok(StartRunResponse {
            run_id: RunId::new("relaunched"),
        })
    }

    fn promote_run(&self, _run_id: &RunId) -> Result<PromoteResponse, ApiError> {
        Ok(PromoteResponse { ok: true })
    }

    fn score_pair(&self, request: &ScorePairRequest) -> Result<ScoreResult, ApiError> {
        Ok(ScoreResult {
            score: 0.5,
            winner: Some(request.baseline.clone()),
            details: serde_json::Map::new(),
        })
    }
}

pub fn telemetry(step: u32) -> MetricEvent {
    let step = f64::from(step);
    MetricEvent {
        kind: Some(EventKind::Telemetry),
        ts: Some(EventTime::Epoch(1_700_000_000.0 + step)),
        step: Some(step),
        loss: Some(2.0 / (1.0 + step)),
        ..MetricEvent::default()
    }
}
