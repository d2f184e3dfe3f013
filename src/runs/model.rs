use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

/// Server-assigned identity of a training run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle state of a run. Once terminal, a run never leaves that state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Lenient parse used for the free-form `status` field of events.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" | "succeeded" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

// Decoded through `parse`; a status the console does not know reads as queued
// instead of failing the whole response.
impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(value.as_str().and_then(Self::parse).unwrap_or_else(|| {
            tracing::debug!("Unrecognized run status {value}, treating as queued");
            Self::default()
        }))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp as delivered by the server: epoch seconds or an opaque string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    Epoch(f64),
    Text(String),
}

impl EventTime {
    pub fn now() -> Self {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        Self::Epoch(nanos as f64 / 1_000_000_000.0)
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoch(seconds) => write!(f, "{seconds}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Full run record returned by `get_run`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainRun {
    pub run_id: RunId,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub started_at: Option<EventTime>,
    #[serde(default)]
    pub completed_at: Option<EventTime>,
    #[serde(default)]
    pub config_snapshot: serde_json::Map<String, serde_json::Value>,
}

impl TrainRun {
    /// Apply a terminal status carried by an event.
    ///
    /// Returns `true` only for the first terminal transition; later events can
    /// never move the run out of a terminal state.
    pub fn apply_terminal(&mut self, status: RunStatus, ts: Option<&EventTime>) -> bool {
        if !status.is_terminal() || self.status.is_terminal() {
            return false;
        }
        self.status = status;
        if self.completed_at.is_none() {
            self.completed_at = Some(ts.cloned().unwrap_or_else(EventTime::now));
        }
        true
    }
}

/// Row returned by `list_runs`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: RunId,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub started_at: Option<EventTime>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RunMeta {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.run_id.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Telemetry,
    Error,
    Status,
    #[serde(other)]
    Other,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Telemetry => "telemetry",
            Self::Error => "error",
            Self::Status => "status",
            Self::Other => "other",
        }
    }
}

/// One record from a run's event stream. Every field is optional on the wire
/// and a field of the wrong type reads as absent, so malformed events still
/// deserialize and get logged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<EventKind>,
    #[serde(default, deserialize_with = "lenient")]
    pub ts: Option<EventTime>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub epoch: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub lr: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub grad_norm: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub proj_x: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub proj_y: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_metrics",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub metrics: BTreeMap<String, f64>,
}

impl MetricEvent {
    pub fn is_kind(&self, kind: EventKind) -> bool {
        self.kind == Some(kind)
    }

    /// Terminal status carried by this event, if any.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        self.status
            .as_deref()
            .and_then(RunStatus::parse)
            .filter(|status| status.is_terminal())
    }
}

/// Point-in-time history returned by `get_metrics`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(default, deserialize_with = "lenient_events")]
    pub events: Vec<MetricEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StartRunRequest {
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<RunId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub run_id: RunId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromoteResponse {
    #[serde(default)]
    pub ok: bool,
}

/// Pairwise comparison of two runs on one metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScorePairRequest {
    pub baseline: RunId,
    pub candidate: RunId,
    pub metric: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    #[serde(default)]
    pub winner: Option<RunId>,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

// Non-numeric and non-finite metric values are dropped individually.
fn lenient_metrics<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_json::Value::Object(entries) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|(name, value)| {
            let value = value.as_f64().filter(|value| value.is_finite())?;
            Some((name, value))
        })
        .collect())
}

fn lenient_events<'de, D>(deserializer: D) -> Result<Vec<MetricEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_json::Value::Array(items) = serde_json::Value::deserialize(deserializer)? else {
        tracing::warn!("Metrics snapshot has no event list, showing none");
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::warn!("Skipping history event {index}: {err}");
                None
            }
        })
        .collect())
}
