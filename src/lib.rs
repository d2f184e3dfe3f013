//! Library exports for reuse in benchmarks and tests.
/// Where runscope keeps its files.
pub mod app_dirs;
/// Console state and the entry points the UI calls.
pub mod controller;
/// Shared HTTP helpers for the training-server client.
pub mod http_client;
/// Log file setup.
pub mod logging;
/// Training-server data model, client and event streams.
pub mod runs;
/// Persisted console settings.
pub mod settings;
/// Live telemetry ingestion.
pub mod telemetry;
/// egui renderer.
pub mod ui;
/// Windowed rendering for long lists.
pub mod virtual_window;
/// Dockable workspace layout.
pub mod workspace;
