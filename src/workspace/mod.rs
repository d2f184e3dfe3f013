//! Dockable workspace: panel graph, presets and layout persistence.

pub mod layout;
pub mod persist;
pub mod presets;

pub use layout::{
    LayoutError, PanelId, PanelPlacement, PanelRect, PanelSize, PanelState, PopoutHost, Position,
    PresetTargets, RestoreOutcome, Viewport, WorkspaceLayout, WorkspaceLayoutEngine,
};
pub use persist::LayoutPersister;
pub use presets::{Preset, TargetOverrides, WorkspacePresetController};
