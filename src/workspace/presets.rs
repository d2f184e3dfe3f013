use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::layout::{
    LayoutError, PanelId, PanelSize, PopoutHost, PresetTargets, RestoreOutcome, Viewport,
    WorkspaceLayoutEngine,
};
use super::persist::LayoutPersister;

/// Named workspace arrangement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    #[default]
    Balanced,
    FocusTelemetry,
    FocusLogs,
    FocusInspector,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Preset::Balanced,
        Preset::FocusTelemetry,
        Preset::FocusLogs,
        Preset::FocusInspector,
    ];

    pub fn targets(self) -> PresetTargets {
        let (left, right, bottom) = match self {
            Self::Balanced => (0.18, 0.26, 0.28),
            Self::FocusTelemetry => (0.14, 0.22, 0.22),
            Self::FocusLogs => (0.16, 0.22, 0.42),
            Self::FocusInspector => (0.16, 0.36, 0.24),
        };
        PresetTargets {
            left,
            right,
            bottom,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::FocusTelemetry => "focus_telemetry",
            Self::FocusLogs => "focus_logs",
            Self::FocusInspector => "focus_inspector",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Balanced => "Balanced",
            Self::FocusTelemetry => "Focus telemetry",
            Self::FocusLogs => "Focus logs",
            Self::FocusInspector => "Focus inspector",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.as_str() == value)
            .ok_or_else(|| format!("unknown workspace preset `{value}`"))
    }
}

/// User overrides for individual preset sides, as fractions of the viewport.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TargetOverrides {
    pub left: Option<f32>,
    pub right: Option<f32>,
    pub bottom: Option<f32>,
}

impl TargetOverrides {
    pub fn apply(&self, targets: PresetTargets) -> PresetTargets {
        PresetTargets {
            left: self.left.unwrap_or(targets.left),
            right: self.right.unwrap_or(targets.right),
            bottom: self.bottom.unwrap_or(targets.bottom),
        }
    }
}

/// Drives the layout engine from presets and viewport changes, and decides
/// when the layout should be written back to settings.
#[derive(Debug)]
pub struct WorkspacePresetController {
    engine: WorkspaceLayoutEngine,
    preset: Preset,
    overrides: TargetOverrides,
    persister: LayoutPersister,
}

impl WorkspacePresetController {
    pub fn new(preset: Preset, overrides: TargetOverrides) -> Self {
        Self::with_persister(preset, overrides, LayoutPersister::default())
    }

    pub fn with_settle(preset: Preset, overrides: TargetOverrides, settle: Duration) -> Self {
        Self::with_persister(preset, overrides, LayoutPersister::new(settle))
    }

    fn with_persister(
        preset: Preset,
        overrides: TargetOverrides,
        persister: LayoutPersister,
    ) -> Self {
        Self {
            engine: WorkspaceLayoutEngine::new(overrides.apply(Preset::default().targets())),
            preset,
            overrides,
            persister,
        }
    }

    pub fn engine(&self) -> &WorkspaceLayoutEngine {
        &self.engine
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    pub fn overrides(&self) -> TargetOverrides {
        self.overrides
    }

    pub fn set_overrides(&mut self, overrides: TargetOverrides) {
        self.overrides = overrides;
        let fallback = overrides.apply(Preset::default().targets());
        self.engine.set_fallback(fallback);
    }

    /// Effective targets of the active preset.
    pub fn targets(&self) -> PresetTargets {
        self.overrides.apply(self.preset.targets())
    }

    /// Restore the stored layout, or seed the active preset when there is none.
    pub fn startup(&mut self, document: Option<&str>, viewport: Viewport) -> RestoreOutcome {
        self.engine.set_viewport(viewport);
        let Some(document) = document.filter(|document| !document.trim().is_empty()) else {
            self.engine.seed(self.targets(), viewport);
            self.layout_changed();
            return RestoreOutcome::Reseeded;
        };
        let outcome = self.engine.restore(document);
        match outcome {
            RestoreOutcome::Restored => match self.engine.serialize() {
                Ok(fitted) if fitted == document => self.persister.mark_persisted(document),
                _ => self.layout_changed(),
            },
            RestoreOutcome::Reseeded => {
                // The engine fell back to the default preset's targets.
                self.preset = Preset::default();
                self.layout_changed();
            }
        }
        outcome
    }

    pub fn apply_preset(&mut self, preset: Preset) {
        self.preset = preset;
        let viewport = self.engine.viewport();
        self.engine.seed(self.targets(), viewport);
        tracing::info!("Applied workspace preset {preset}");
        self.layout_changed();
    }

    /// Record the viewport, reseeding when it crosses the narrow threshold.
    /// Returns whether the layout was reseeded.
    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        let previous = self.engine.viewport();
        if !self.engine.is_seeded() || previous.is_narrow() == viewport.is_narrow() {
            self.engine.set_viewport(viewport);
            return false;
        }
        tracing::debug!(
            "Viewport class changed ({} -> {} px wide), reseeding {}",
            previous.width,
            viewport.width,
            self.preset
        );
        self.engine.seed(self.targets(), viewport);
        self.layout_changed();
        true
    }

    pub fn resize(&mut self, panel: PanelId, size: PanelSize) -> Result<bool, LayoutError> {
        let changed = self.engine.resize(panel, size)?;
        if changed {
            self.layout_changed();
        }
        Ok(changed)
    }

    pub fn toggle_maximize(&mut self, panel: PanelId) -> Result<(), LayoutError> {
        self.engine.toggle_maximize(panel)?;
        self.layout_changed();
        Ok(())
    }

    pub fn popout(&mut self, panel: PanelId, host: &mut dyn PopoutHost) -> bool {
        let detached = self.engine.popout(panel, host);
        if detached {
            self.layout_changed();
        }
        detached
    }

    pub fn dock(&mut self, panel: PanelId) -> Result<(), LayoutError> {
        self.engine.dock(panel)?;
        self.layout_changed();
        Ok(())
    }

    /// Settled layout document that should be written now, if any.
    pub fn poll_persist(&mut self, now: Instant) -> Option<String> {
        self.persister.poll(now)
    }

    pub fn flush_persist(&mut self) -> Option<String> {
        self.persister.flush()
    }

    pub fn has_pending_persist(&self) -> bool {
        self.persister.has_pending()
    }

    fn layout_changed(&mut self) {
        match self.engine.serialize() {
            Ok(document) => self.persister.record(document, Instant::now()),
            Err(err) => tracing::warn!("Failed to serialize workspace layout: {err}"),
        }
    }
}
