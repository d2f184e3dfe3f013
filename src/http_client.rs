//! HTTP agents and bounded body reads shared by the training-server client.

use std::io::{self, Read};
use std::sync::OnceLock;
use std::time::Duration;

use rand::Rng;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How often and how patiently an idempotent request is repeated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of each delay that is randomized, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry number `retry` (1-based), never above `max_delay`.
    pub fn delay_for(&self, retry: usize) -> Duration {
        let shift = u32::try_from(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let scale = 1.0 - jitter * rand::rng().random_range(0.0..=1.0);
        delay.mul_f64(scale)
    }

    /// Run `request` until it succeeds, the attempts are used up, or
    /// `retryable` rejects the error.
    pub fn run<T, E>(
        &self,
        mut request: impl FnMut() -> Result<T, E>,
        mut retryable: impl FnMut(&E) -> bool,
    ) -> Result<T, E> {
        let mut attempt = 1usize;
        loop {
            match request() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts.max(1) && retryable(&err) => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!("Request failed, retry {attempt} in {delay:?}");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Agent for request/response calls.
pub(crate) fn request_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(REQUEST_TIMEOUT)
            .timeout_write(REQUEST_TIMEOUT)
            .build()
    })
}

/// Agent for event streams. No read timeout: a quiet run may send nothing
/// for minutes.
pub(crate) fn stream_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_write(REQUEST_TIMEOUT)
            .build()
    })
}

/// Read the whole body, failing with `InvalidData` once it exceeds `limit`.
pub(crate) fn read_limited(response: ureq::Response, limit: usize) -> io::Result<Vec<u8>> {
    let declared = response
        .header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());
    if let Some(declared) = declared
        && declared > limit as u64
    {
        return Err(too_large(format!("declared {declared} bytes, limit {limit}")));
    }
    let mut body = Vec::with_capacity(declared.map_or(0, |len| len as usize));
    response
        .into_reader()
        .take(limit as u64 + 1)
        .read_to_end(&mut body)?;
    if body.len() > limit {
        return Err(too_large(format!("body exceeds {limit} bytes")));
    }
    Ok(body)
}

/// Body of an error response as text, for messages shown to the operator.
pub(crate) fn error_text(response: ureq::Response, limit: usize) -> String {
    match read_limited(response, limit) {
        Ok(body) => String::from_utf8_lossy(&body).trim().to_string(),
        Err(err) => format!("<body unavailable: {err}>"),
    }
}

fn too_large(detail: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("Response too large: {detail}"))
}
