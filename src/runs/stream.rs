//! Push-based run event subscription.
//!
//! A stream is represented by a [`StreamHandle`] owned by the subscriber and a
//! [`StreamSink`] owned by the reader. Closing the handle is idempotent and
//! also happens on drop; the reader notices at its next delivery and stops.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::model::MetricEvent;

/// Messages a stream reader delivers to its subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    Event(MetricEvent),
    Error(String),
    /// The server ended the stream cleanly.
    Ended,
}

/// Subscriber side of a stream. Dropping it closes the subscription.
#[derive(Debug)]
pub struct StreamHandle {
    closed: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn new() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal the reader to stop. Returns `true` only for the call that
    /// actually closed the stream; repeated calls are no-ops.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shared flag handed to the reader side.
    pub fn signal(&self) -> CloseSignal {
        CloseSignal {
            closed: Arc::clone(&self.closed),
        }
    }
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Clone, Debug)]
pub struct CloseSignal {
    closed: Arc<AtomicBool>,
}

impl CloseSignal {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Subscriber callback; returns `false` once it can no longer receive.
pub type StreamCallback = Box<dyn FnMut(StreamMessage) -> bool + Send>;

/// Create a connected handle/sink pair for a new subscription.
pub fn subscription(deliver: StreamCallback) -> (StreamHandle, StreamSink) {
    let handle = StreamHandle::new();
    let sink = StreamSink::new(handle.signal(), deliver);
    (handle, sink)
}

/// Reader side of a stream: forwards decoded messages to the subscriber.
pub struct StreamSink {
    signal: CloseSignal,
    deliver: StreamCallback,
}

impl StreamSink {
    pub fn new(signal: CloseSignal, deliver: StreamCallback) -> Self {
        Self { signal, deliver }
    }

    pub fn is_open(&self) -> bool {
        !self.signal.is_closed()
    }

    /// Deliver a message unless the stream was closed. Returns whether the
    /// reader should keep going.
    pub fn send(&mut self, message: StreamMessage) -> bool {
        if !self.is_open() {
            return false;
        }
        (self.deliver)(message)
    }

    pub fn event(&mut self, event: MetricEvent) -> bool {
        self.send(StreamMessage::Event(event))
    }

    pub fn error(&mut self, message: impl Into<String>) -> bool {
        self.send(StreamMessage::Error(message.into()))
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Splits a byte stream into JSON payloads. Accepts server-sent events
/// (`data:` lines terminated by a blank line) and newline-delimited JSON.
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    data: Vec<String>,
}

impl LineDecoder {
    pub(crate) fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return self.take_data();
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            return None;
        }
        if line.starts_with(':')
            || line.starts_with("event:")
            || line.starts_with("id:")
            || line.starts_with("retry:")
        {
            return None;
        }
        let trimmed = line.trim();
        if trimmed.starts_with('{') {
            return Some(trimmed.to_string());
        }
        None
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        self.take_data()
    }

    fn take_data(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(payload)
    }
}

/// Read `reader` to the end (or until the sink closes), delivering every
/// decodable event. Undecodable payloads are skipped with a warning.
pub(crate) fn pump_events(reader: impl BufRead, sink: &mut StreamSink) {
    let mut decoder = LineDecoder::default();
    for line in reader.lines() {
        if !sink.is_open() {
            return;
        }
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                sink.error(format!("Event stream interrupted: {err}"));
                return;
            }
        };
        if let Some(payload) = decoder.push_line(&line) {
            if !deliver_payload(&payload, sink) {
                return;
            }
        }
    }
    if let Some(payload) = decoder.finish() {
        if !deliver_payload(&payload, sink) {
            return;
        }
    }
    sink.send(StreamMessage::Ended);
}

fn deliver_payload(payload: &str, sink: &mut StreamSink) -> bool {
    match serde_json::from_str::<MetricEvent>(payload) {
        Ok(event) => sink.event(event),
        Err(err) => {
            tracing::warn!("Skipping undecodable stream event: {err}");
            true
        }
    }
}
