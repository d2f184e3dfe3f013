//! Training runs: data model, server client and event streams.

pub mod api;
pub mod model;
pub mod stream;

pub use api::{ApiError, HttpRunsApi, RunsApi};
pub use model::*;
pub use stream::{StreamCallback, StreamHandle, StreamMessage, StreamSink, subscription};
