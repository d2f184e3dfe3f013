//! `config.toml`: server endpoint, workspace preferences and telemetry tuning.
//!
//! Every field has a serde default so files written by older versions keep
//! loading. Writes go through a temp file and a rename.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs;
use crate::telemetry::clamp_capacity;
use crate::telemetry::ring_buffer::DEFAULT_CAPACITY;
use crate::workspace::{Preset, TargetOverrides};

pub const CONFIG_FILE_NAME: &str = "config.toml";

const MIN_FPS: u32 = 1;
const MAX_FPS: u32 = 240;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config for {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("No suitable config directory found")]
    NoConfigDir,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub workspace: WorkspaceSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Filter passed to `list_runs`, e.g. `recent` or `all`.
    #[serde(default = "default_list_scope")]
    pub list_scope: String,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    /// History events requested when a run is selected.
    #[serde(default = "default_metrics_limit")]
    pub metrics_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            list_scope: default_list_scope(),
            list_limit: default_list_limit(),
            metrics_limit: default_metrics_limit(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default)]
    pub preset: Preset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<f32>,
    /// Last persisted workspace layout (JSON).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_document: Option<String>,
}

impl WorkspaceSettings {
    pub fn overrides(&self) -> TargetOverrides {
        TargetOverrides {
            left: self.left,
            right: self.right,
            bottom: self.bottom,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            target_fps: default_target_fps(),
        }
    }
}

impl TelemetrySettings {
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(MIN_FPS)))
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/api".to_string()
}

fn default_list_scope() -> String {
    "recent".to_string()
}

fn default_list_limit() -> usize {
    100
}

fn default_metrics_limit() -> usize {
    2_000
}

fn default_ring_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_target_fps() -> u32 {
    30
}

impl ConsoleSettings {
    /// Clamp values that would break the console into their supported range.
    pub fn normalized(mut self) -> Self {
        let capacity = clamp_capacity(self.telemetry.ring_capacity);
        if capacity != self.telemetry.ring_capacity {
            tracing::warn!(
                "ring_capacity {} out of range, using {capacity}",
                self.telemetry.ring_capacity
            );
            self.telemetry.ring_capacity = capacity;
        }
        self.telemetry.target_fps = self.telemetry.target_fps.clamp(MIN_FPS, MAX_FPS);
        self.server.list_limit = self.server.list_limit.max(1);
        self.server.metrics_limit = self.server.metrics_limit.max(1);
        for side in [
            &mut self.workspace.left,
            &mut self.workspace.right,
            &mut self.workspace.bottom,
        ] {
            if side.is_some_and(|ratio| !ratio.is_finite() || ratio <= 0.0 || ratio >= 1.0) {
                *side = None;
            }
        }
        self
    }
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(map_app_dir_error)?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Load settings from the app directory; a missing file yields defaults.
pub fn load_or_default() -> Result<ConsoleSettings, ConfigError> {
    load_from(&config_path()?)
}

pub fn load_from(path: &Path) -> Result<ConsoleSettings, ConfigError> {
    if !path.exists() {
        return Ok(ConsoleSettings::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: ConsoleSettings =
        toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(settings.normalized())
}

pub fn save(settings: &ConsoleSettings) -> Result<(), ConfigError> {
    save_to_path(settings, &config_path()?)
}

pub fn save_to_path(settings: &ConsoleSettings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = toml::to_string_pretty(settings).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, data.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let write_error = |path: &Path, source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().ok_or_else(|| {
        write_error(
            path,
            std::io::Error::other("config path has no parent directory"),
        )
    })?;
    let file_name = path
        .file_name()
        .ok_or_else(|| write_error(path, std::io::Error::other("config path has no file name")))?;

    let mut last_err = None;
    for _ in 0..5 {
        let suffix = random_suffix().map_err(|source| write_error(path, source))?;
        let tmp_path = dir.join(format!("{}.tmp-{suffix}", file_name.to_string_lossy()));
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                last_err = Some(err);
                continue;
            }
            Err(err) => return Err(write_error(&tmp_path, err)),
        };
        if let Err(err) = file.write_all(data).and_then(|()| file.sync_all()) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(write_error(&tmp_path, err));
        }
        drop(file);
        if let Err(err) = replace_file(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(write_error(path, err));
        }
        return sync_parent_dir(dir);
    }
    let detail = last_err.map_or_else(|| "unknown error".to_string(), |err| err.to_string());
    Err(write_error(
        path,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free temporary file name: {detail}"),
        ),
    ))
}

fn random_suffix() -> Result<String, std::io::Error> {
    use rand::TryRngCore;
    let mut bytes = [0u8; 6];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| std::io::Error::other(format!("temporary file suffix: {err}")))?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}

fn replace_file(temp_path: &Path, path: &Path) -> Result<(), std::io::Error> {
    match std::fs::rename(temp_path, path) {
        Ok(()) => Ok(()),
        #[cfg(target_os = "windows")]
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::PermissionDenied
            ) =>
        {
            match std::fs::remove_file(path) {
                Err(inner) if inner.kind() != std::io::ErrorKind::NotFound => return Err(inner),
                _ => {}
            }
            std::fs::rename(temp_path, path)
        }
        Err(err) => Err(err),
    }
}

fn sync_parent_dir(dir: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        std::fs::File::open(dir)
            .and_then(|handle| handle.sync_all())
            .map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => {
            ConfigError::CreateDir { path, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn with_config_home<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
        let _guard = app_dirs::ConfigBaseGuard::set(dir.to_path_buf());
        f()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let loaded = load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, ConsoleSettings::default());
        assert_eq!(loaded.telemetry.ring_capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn round_trips_through_app_dir() {
        let dir = tempdir().unwrap();
        with_config_home(dir.path(), || {
            let mut settings = ConsoleSettings::default();
            settings.server.base_url = "http://trainer:9000/api".into();
            settings.workspace.preset = Preset::FocusLogs;
            settings.workspace.right = Some(0.3);
            settings.workspace.layout_document = Some("{\"version\":1}".into());
            save(&settings).unwrap();

            let path = dir
                .path()
                .join(app_dirs::APP_DIR_NAME)
                .join(CONFIG_FILE_NAME);
            assert!(path.is_file());
            assert_eq!(load_or_default().unwrap(), settings);
        });
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[workspace]\npreset = \"focus_inspector\"\n\n[telemetry]\nring_capacity = 5\n",
        )
        .unwrap();
        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.workspace.preset, Preset::FocusInspector);
        assert_eq!(loaded.telemetry.ring_capacity, 1_000);
        assert_eq!(loaded.telemetry.target_fps, 30);
        assert_eq!(loaded.server, ServerSettings::default());
    }

    #[test]
    fn nonsensical_overrides_are_dropped() {
        let settings = ConsoleSettings {
            workspace: WorkspaceSettings {
                left: Some(1.5),
                right: Some(f32::NAN),
                bottom: Some(0.3),
                ..WorkspaceSettings::default()
            },
            ..ConsoleSettings::default()
        }
        .normalized();
        assert_eq!(settings.workspace.left, None);
        assert_eq!(settings.workspace.right, None);
        assert_eq!(settings.workspace.bottom, Some(0.3));
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[server\nbase_url = 3").unwrap();
        assert!(matches!(
            load_from(&path),
            Err(ConfigError::ParseToml { .. })
        ));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        save_to_path(&ConsoleSettings::default(), &path).unwrap();
        save_to_path(&ConsoleSettings::default(), &path).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(CONFIG_FILE_NAME)]);
    }
}
