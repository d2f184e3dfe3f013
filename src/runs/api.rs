//! Training-server client.
//!
//! [`RunsApi`] is the seam the controllers depend on; [`HttpRunsApi`] talks to
//! the real server over HTTP, tests substitute in-memory fakes.

use std::io::BufReader;
use std::thread;

use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::model::{
    MetricsSnapshot, PromoteResponse, RunId, RunMeta, ScorePairRequest, ScoreResult,
    StartRunRequest, StartRunResponse, TrainRun,
};
use super::stream::{StreamCallback, StreamHandle, pump_events, subscription};
use crate::http_client::{self, RetryPolicy};

const MAX_RESPONSE_BYTES: usize = 1024 * 1024;
const MAX_SNAPSHOT_BYTES: usize = 16 * 1024 * 1024;
const MAX_ERROR_BODY_BYTES: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid server URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("Server URL {0} cannot address API paths")]
    UnsupportedUrl(String),
    #[error("HTTP {code} from {endpoint}: {body}")]
    Status {
        endpoint: String,
        code: u16,
        body: String,
    },
    #[error("HTTP error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
    #[error("Failed to read response from {endpoint}: {source}")]
    Read {
        endpoint: String,
        source: std::io::Error,
    },
    #[error("Unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl ApiError {
    /// Whether repeating the same request could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { code, .. } => *code == 429 || (500..=599).contains(code),
            _ => false,
        }
    }
}

/// Operations the console consumes from the training server.
pub trait RunsApi: Send + Sync {
    fn list_runs(&self, scope: &str, limit: usize) -> Result<Vec<RunMeta>, ApiError>;
    fn get_run(&self, run_id: &RunId) -> Result<TrainRun, ApiError>;
    fn get_metrics(&self, run_id: &RunId, limit: usize) -> Result<MetricsSnapshot, ApiError>;
    /// Open a push stream for `run_id`. Events and errors are delivered to
    /// `deliver` from a background reader until the returned handle is closed.
    fn stream_run(
        &self,
        run_id: &RunId,
        deliver: StreamCallback,
    ) -> Result<StreamHandle, ApiError>;
    fn start_run(&self, request: &StartRunRequest) -> Result<StartRunResponse, ApiError>;
    fn promote_run(&self, run_id: &RunId) -> Result<PromoteResponse, ApiError>;
    fn score_pair(&self, request: &ScorePairRequest) -> Result<ScoreResult, ApiError>;
}

/// HTTP implementation of [`RunsApi`].
#[derive(Clone, Debug)]
pub struct HttpRunsApi {
    base: Url,
}

impl HttpRunsApi {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base = Url::parse(base_url.trim()).map_err(|source| ApiError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        if base.cannot_be_a_base() {
            return Err(ApiError::UnsupportedUrl(base_url.to_string()));
        }
        Ok(Self { base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::UnsupportedUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &Url, max_bytes: usize) -> Result<T, ApiError> {
        let response = http_client::request_agent()
            .get(url.as_str())
            .set("Accept", "application/json")
            .call();
        decode_response(url, response, max_bytes)
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = http_client::request_agent()
            .post(url.as_str())
            .set("Accept", "application/json")
            .send_json(body);
        decode_response(url, response, MAX_RESPONSE_BYTES)
    }
}

impl RunsApi for HttpRunsApi {
    fn list_runs(&self, scope: &str, limit: usize) -> Result<Vec<RunMeta>, ApiError> {
        let mut url = self.endpoint(&["runs"])?;
        url.query_pairs_mut()
            .append_pair("scope", scope)
            .append_pair("limit", &limit.to_string());
        RetryPolicy::default().run(
            || self.get_json(&url, MAX_RESPONSE_BYTES),
            ApiError::is_retryable,
        )
    }

    fn get_run(&self, run_id: &RunId) -> Result<TrainRun, ApiError> {
        let url = self.endpoint(&["runs", run_id.as_str()])?;
        self.get_json(&url, MAX_RESPONSE_BYTES)
    }

    fn get_metrics(&self, run_id: &RunId, limit: usize) -> Result<MetricsSnapshot, ApiError> {
        let mut url = self.endpoint(&["runs", run_id.as_str(), "metrics"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get_json(&url, MAX_SNAPSHOT_BYTES)
    }

    fn stream_run(
        &self,
        run_id: &RunId,
        deliver: StreamCallback,
    ) -> Result<StreamHandle, ApiError> {
        let url = self.endpoint(&["runs", run_id.as_str(), "stream"])?;
        let (handle, mut sink) = subscription(deliver);
        let run_id = run_id.clone();
        thread::spawn(move || {
            let response = http_client::stream_agent()
                .get(url.as_str())
                .set("Accept", "text/event-stream, application/x-ndjson")
                .call();
            let response = match response {
                Ok(response) => response,
                Err(ureq::Error::Status(code, response)) => {
                    let body = http_client::error_text(response, MAX_ERROR_BODY_BYTES);
                    sink.error(format!("Stream for {run_id} refused: HTTP {code}: {body}"));
                    return;
                }
                Err(ureq::Error::Transport(err)) => {
                    sink.error(format!("Stream for {run_id} failed to connect: {err}"));
                    return;
                }
            };
            tracing::info!("Event stream opened for run {run_id}");
            pump_events(BufReader::new(response.into_reader()), &mut sink);
            tracing::info!("Event stream reader for run {run_id} exited");
        });
        Ok(handle)
    }

    fn start_run(&self, request: &StartRunRequest) -> Result<StartRunResponse, ApiError> {
        let url = self.endpoint(&["runs"])?;
        self.post_json(&url, request)
    }

    fn promote_run(&self, run_id: &RunId) -> Result<PromoteResponse, ApiError> {
        let url = self.endpoint(&["runs", run_id.as_str(), "promote"])?;
        self.post_json(&url, &serde_json::json!({}))
    }

    fn score_pair(&self, request: &ScorePairRequest) -> Result<ScoreResult, ApiError> {
        let url = self.endpoint(&["score"])?;
        self.post_json(&url, request)
    }
}

fn decode_response<T: DeserializeOwned>(
    url: &Url,
    response: Result<ureq::Response, ureq::Error>,
    max_bytes: usize,
) -> Result<T, ApiError> {
    let endpoint = url.path().to_string();
    let response = match response {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) => {
            let body = http_client::error_text(response, MAX_ERROR_BODY_BYTES);
            return Err(ApiError::Status {
                endpoint,
                code,
                body,
            });
        }
        Err(ureq::Error::Transport(err)) => {
            return Err(ApiError::Transport {
                endpoint,
                message: err.to_string(),
            });
        }
    };
    let bytes = http_client::read_limited(response, max_bytes).map_err(|source| ApiError::Read {
        endpoint: endpoint.clone(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode {
        endpoint,
        message: err.to_string(),
    })
}
