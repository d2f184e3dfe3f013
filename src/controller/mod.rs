//! Console state and the entry points the UI calls to change it.

mod jobs;
pub mod run_stream;
#[cfg(test)]
mod test_support;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub use jobs::Waker;
use jobs::{JobChannel, JobMessage, next_generation};
pub use run_stream::{ErrorCallback, RunHud, RunPoll, RunStreamController};

use crate::runs::{
    ApiError, HttpRunsApi, RunId, RunMeta, RunsApi, ScorePairRequest, ScoreResult,
    StartRunRequest,
};
use crate::settings::{self, ConfigError, ConsoleSettings};
use crate::telemetry::{FrameScheduler, ManualScheduler, TelemetryRingBuffer};
use crate::workspace::{
    PanelId, PanelSize, PopoutHost, Preset, RestoreOutcome, Viewport, WorkspacePresetController,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusTone {
    #[default]
    Idle,
    Busy,
    Info,
    Warning,
    Error,
}

/// One-line status shown in the footer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub tone: StatusTone,
}

/// Where the server client comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ApiSource {
    /// Built from `server.base_url` and rebuilt when it changes.
    Settings,
    /// Supplied by the caller; never replaced.
    Injected,
}

/// Owns everything the console shows and every mutation of it.
pub struct ConsoleController {
    settings: ConsoleSettings,
    settings_path: Option<PathBuf>,
    api: Arc<dyn RunsApi>,
    api_source: ApiSource,
    runs: Vec<RunMeta>,
    runs_generation: u64,
    runs_loading: bool,
    stream: RunStreamController,
    workspace: WorkspacePresetController,
    jobs: JobChannel<JobMessage>,
    status: StatusLine,
    last_score: Option<ScoreResult>,
}

impl ConsoleController {
    /// Console talking to `api`, with default settings that are never saved
    /// unless [`Self::with_settings_path`] is used.
    pub fn new(api: Arc<dyn RunsApi>) -> Self {
        Self::build(ConsoleSettings::default(), api, ApiSource::Injected)
    }

    /// Console talking HTTP to `settings.server.base_url`.
    pub fn from_settings(settings: ConsoleSettings) -> Result<Self, ApiError> {
        let api = Arc::new(HttpRunsApi::new(&settings.server.base_url)?);
        Ok(Self::build(settings.normalized(), api, ApiSource::Settings))
    }

    fn build(settings: ConsoleSettings, api: Arc<dyn RunsApi>, api_source: ApiSource) -> Self {
        let ring = TelemetryRingBuffer::new(
            settings.telemetry.ring_capacity,
            Box::new(ManualScheduler::new()),
        );
        let stream = RunStreamController::new(
            Arc::clone(&api),
            ring,
            settings.server.metrics_limit,
        );
        let workspace = WorkspacePresetController::new(
            settings.workspace.preset,
            settings.workspace.overrides(),
        );
        Self {
            settings,
            settings_path: None,
            api,
            api_source,
            runs: Vec::new(),
            runs_generation: 0,
            runs_loading: false,
            stream,
            workspace,
            jobs: JobChannel::new(),
            status: StatusLine::default(),
            last_score: None,
        }
    }

    /// Save settings to `path` whenever they change.
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// Load `config.toml` (from the settings path, or the app directory when
    /// none is set) and apply it.
    pub fn load_configuration(&mut self) -> Result<(), ConfigError> {
        let path = match &self.settings_path {
            Some(path) => path.clone(),
            None => settings::config_path()?,
        };
        let loaded = settings::load_from(&path)?;
        tracing::info!("Loaded configuration from {}", path.display());
        self.settings_path = Some(path);
        self.apply_settings(loaded);
        Ok(())
    }

    fn apply_settings(&mut self, loaded: ConsoleSettings) {
        let base_url_changed = loaded.server.base_url != self.settings.server.base_url;
        self.settings = loaded;
        if self.api_source == ApiSource::Settings && base_url_changed {
            match HttpRunsApi::new(&self.settings.server.base_url) {
                Ok(api) => self.replace_api(Arc::new(api)),
                Err(err) => self.set_status(
                    format!("Invalid server URL: {err}"),
                    StatusTone::Error,
                ),
            }
        }
        self.stream
            .set_ring_capacity(self.settings.telemetry.ring_capacity);
        self.stream
            .set_metrics_limit(self.settings.server.metrics_limit);
        self.workspace
            .set_overrides(self.settings.workspace.overrides());
        if self.workspace.preset() != self.settings.workspace.preset
            && self.workspace.engine().is_seeded()
        {
            self.workspace.apply_preset(self.settings.workspace.preset);
        }
    }

    fn replace_api(&mut self, api: Arc<dyn RunsApi>) {
        self.api = Arc::clone(&api);
        self.stream.set_api(api);
        self.runs.clear();
        self.runs_generation = next_generation(self.runs_generation);
        self.runs_loading = false;
    }

    /// Wake the host when background work completes.
    pub fn set_waker(&mut self, waker: Waker) {
        self.jobs.set_waker(Arc::clone(&waker));
        self.stream.set_waker(waker);
    }

    pub fn set_frame_scheduler(&mut self, scheduler: Box<dyn FrameScheduler>) {
        self.stream.set_scheduler(scheduler);
    }

    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.stream.set_error_callback(callback);
    }

    /// Request the run list; an older in-flight request is superseded.
    pub fn refresh_runs(&mut self) {
        self.runs_generation = next_generation(self.runs_generation);
        self.runs_loading = true;
        let generation = self.runs_generation;
        let api = Arc::clone(&self.api);
        let scope = self.settings.server.list_scope.clone();
        let limit = self.settings.server.list_limit;
        self.set_status("Loading runs", StatusTone::Busy);
        self.jobs.spawn("list-runs", move || JobMessage::RunsListed {
            generation,
            result: api.list_runs(&scope, limit),
        });
    }

    /// Load `run_id` and follow its stream. Selecting the current run again
    /// only reloads it once loading or streaming has stopped.
    pub fn select_run(&mut self, run_id: RunId) {
        let healthy = self.stream.is_loading() || self.stream.is_streaming();
        if healthy && self.stream.selected() == Some(&run_id) {
            return;
        }
        self.set_status(format!("Loading run {run_id}"), StatusTone::Busy);
        self.stream.select_run(run_id);
    }

    pub fn select_run_by_index(&mut self, index: usize) {
        if let Some(run_id) = self.runs.get(index).map(|run| run.run_id.clone()) {
            self.select_run(run_id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.stream.clear_selection();
    }

    /// Relaunch the selected run with its configuration snapshot.
    pub fn start_run(&mut self) -> bool {
        let Some(run) = self.stream.run() else {
            self.set_status("Select a run to relaunch", StatusTone::Warning);
            return false;
        };
        let request = StartRunRequest {
            config: run.config_snapshot.clone(),
            parent_run_id: Some(run.run_id.clone()),
        };
        self.start_run_with(request);
        true
    }

    pub fn start_run_with(&mut self, request: StartRunRequest) {
        let api = Arc::clone(&self.api);
        let parent = request.parent_run_id.clone();
        self.set_status("Starting run", StatusTone::Busy);
        self.jobs.spawn("start-run", move || JobMessage::RunStarted {
            parent,
            result: api.start_run(&request),
        });
    }

    pub fn promote_selected_run(&mut self) -> bool {
        let Some(run_id) = self.stream.selected().cloned() else {
            self.set_status("Select a run to promote", StatusTone::Warning);
            return false;
        };
        let api = Arc::clone(&self.api);
        self.set_status(format!("Promoting {run_id}"), StatusTone::Busy);
        self.jobs.spawn("promote", move || {
            let result = api.promote_run(&run_id);
            JobMessage::RunPromoted { run_id, result }
        });
        true
    }

    /// Compare `candidate` against `baseline` on `metric`.
    pub fn score_pair(&mut self, baseline: RunId, candidate: RunId, metric: impl Into<String>) {
        let request = ScorePairRequest {
            baseline,
            candidate,
            metric: metric.into(),
        };
        let api = Arc::clone(&self.api);
        self.last_score = None;
        self.set_status("Scoring runs", StatusTone::Busy);
        self.jobs.spawn("score", move || JobMessage::PairScored {
            result: api.score_pair(&request),
        });
    }

    /// Record the workspace size. The first call restores the saved layout.
    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        if !self.workspace.engine().is_seeded() {
            let document = self.settings.workspace.layout_document.clone();
            let outcome = self.workspace.startup(document.as_deref(), viewport);
            if outcome == RestoreOutcome::Reseeded && document.is_some() {
                self.set_status("Saved layout was unusable; reset to preset", StatusTone::Info);
            }
            if self.workspace.preset() != self.settings.workspace.preset {
                self.settings.workspace.preset = self.workspace.preset();
                self.save_settings();
            }
            return true;
        }
        self.workspace.set_viewport(viewport)
    }

    pub fn apply_preset(&mut self, preset: Preset) {
        self.workspace.apply_preset(preset);
        if self.settings.workspace.preset != preset {
            self.settings.workspace.preset = preset;
            self.save_settings();
        }
    }

    pub fn resize_panel(&mut self, panel: PanelId, size: PanelSize) -> bool {
        match self.workspace.resize(panel, size) {
            Ok(changed) => changed,
            Err(err) => {
                tracing::debug!("Ignoring resize of {panel}: {err}");
                false
            }
        }
    }

    pub fn toggle_maximize(&mut self, panel: PanelId) {
        if let Err(err) = self.workspace.toggle_maximize(panel) {
            self.set_status(format!("Cannot maximize {panel}: {err}"), StatusTone::Warning);
        }
    }

    pub fn popout_panel(&mut self, panel: PanelId, host: &mut dyn PopoutHost) -> bool {
        let detached = self.workspace.popout(panel, host);
        if !detached {
            self.set_status(format!("{} cannot be popped out", panel.title()), StatusTone::Info);
        }
        detached
    }

    pub fn dock_panel(&mut self, panel: PanelId) {
        if let Err(err) = self.workspace.dock(panel) {
            tracing::debug!("Ignoring dock of {panel}: {err}");
        }
    }

    /// Per-frame work: apply job results, flush pending telemetry and write
    /// a settled layout. Returns whether anything visible changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = self.poll_jobs();
        let poll = self.stream.poll();
        if let Some(error) = poll.errors.last() {
            self.set_status(error.clone(), StatusTone::Error);
        } else if poll.snapshot_loaded
            && let Some(run) = self.stream.run()
        {
            let text = format!("Streaming {}", run.run_id);
            self.set_status(text, StatusTone::Info);
        }
        changed |= poll.changed();
        changed |= self.stream.on_frame();
        if let Some(document) = self.workspace.poll_persist(now) {
            self.store_layout(document);
        }
        changed
    }

    /// Close the stream and write any layout still settling.
    pub fn shutdown(&mut self) {
        self.stream.clear_selection();
        if let Some(document) = self.workspace.flush_persist() {
            self.store_layout(document);
        }
    }

    pub fn settings(&self) -> &ConsoleSettings {
        &self.settings
    }

    pub fn settings_path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }

    pub fn runs(&self) -> &[RunMeta] {
        &self.runs
    }

    pub fn is_loading_runs(&self) -> bool {
        self.runs_loading
    }

    pub fn stream(&self) -> &RunStreamController {
        &self.stream
    }

    pub fn workspace(&self) -> &WorkspacePresetController {
        &self.workspace
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn last_score(&self) -> Option<&ScoreResult> {
        self.last_score.as_ref()
    }

    fn poll_jobs(&mut self) -> bool {
        let mut changed = false;
        while let Some(message) = self.jobs.try_recv() {
            changed = true;
            match message {
                JobMessage::RunsListed { generation, result } => {
                    self.apply_runs_listed(generation, result);
                }
                JobMessage::RunStarted { parent, result } => match result {
                    Ok(response) => {
                        let origin = parent
                            .map(|parent| format!(" from {parent}"))
                            .unwrap_or_default();
                        tracing::info!("Started run {}{origin}", response.run_id);
                        self.set_status(
                            format!("Started run {}{origin}", response.run_id),
                            StatusTone::Info,
                        );
                        self.refresh_runs();
                        self.select_run(response.run_id);
                    }
                    Err(err) => self.report_api_error("Failed to start run", &err),
                },
                JobMessage::RunPromoted { run_id, result } => match result {
                    Ok(response) if response.ok => {
                        self.set_status(format!("Promoted {run_id}"), StatusTone::Info);
                    }
                    Ok(_) => self.set_status(
                        format!("Server declined to promote {run_id}"),
                        StatusTone::Warning,
                    ),
                    Err(err) => self.report_api_error("Failed to promote run", &err),
                },
                JobMessage::PairScored { result } => match result {
                    Ok(score) => {
                        let winner = score
                            .winner
                            .as_ref()
                            .map(|winner| format!(", winner {winner}"))
                            .unwrap_or_default();
                        self.set_status(
                            format!("Score {:.3}{winner}", score.score),
                            StatusTone::Info,
                        );
                        self.last_score = Some(score);
                    }
                    Err(err) => self.report_api_error("Failed to score runs", &err),
                },
            }
        }
        changed
    }

    fn apply_runs_listed(&mut self, generation: u64, result: Result<Vec<RunMeta>, ApiError>) {
        if generation != self.runs_generation {
            tracing::trace!(
                "Dropping run list for generation {generation}, current is {}",
                self.runs_generation
            );
            return;
        }
        self.runs_loading = false;
        match result {
            Ok(runs) => {
                self.set_status(format!("{} runs", runs.len()), StatusTone::Idle);
                self.runs = runs;
            }
            Err(err) => self.report_api_error("Failed to list runs", &err),
        }
    }

    fn report_api_error(&mut self, context: &str, err: &ApiError) {
        tracing::warn!("{context}: {err}");
        self.set_status(format!("{context}: {err}"), StatusTone::Error);
    }

    fn store_layout(&mut self, document: String) {
        self.settings.workspace.layout_document = Some(document);
        self.save_settings();
    }

    fn save_settings(&mut self) {
        let Some(path) = self.settings_path.as_deref() else {
            return;
        };
        if let Err(err) = settings::save_to_path(&self.settings, path) {
            tracing::warn!("Failed to save settings: {err}");
            self.set_status(format!("Failed to save settings: {err}"), StatusTone::Error);
        }
    }

    fn set_status(&mut self, text: impl Into<String>, tone: StatusTone) {
        self.status = StatusLine {
            text: text.into(),
            tone,
        };
    }
}

impl std::fmt::Debug for ConsoleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleController")
            .field("runs", &self.runs.len())
            .field("stream", &self.stream)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
