//! Dockable workspace layout engine.
//!
//! The workspace is a small graph: one root panel fills the area, every other
//! panel is docked to a side of a panel placed before it. The engine owns the
//! graph and turns it into pixel rectangles; drawing is left to the UI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Schema version written into every serialized layout.
pub const LAYOUT_VERSION: u32 = 1;

/// Viewports narrower than this get a larger center share.
pub const NARROW_VIEWPORT_WIDTH: f32 = 1_100.0;

const LEFT_BOUNDS: (f32, f32) = (0.12, 0.26);
const RIGHT_BOUNDS: (f32, f32) = (0.20, 0.38);
const BOTTOM_BOUNDS: (f32, f32) = (0.22, 0.44);
const CENTER_MIN: f32 = 0.36;
const CENTER_MIN_NARROW: f32 = 0.44;
// Restored ratios closer than this to their fitted value are kept verbatim.
const RATIO_TOLERANCE: f32 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelId {
    Runs,
    Telemetry,
    Inspector,
    Activity,
}

impl PanelId {
    /// Panels every layout must contain.
    pub const REQUIRED: [PanelId; 4] = [
        PanelId::Runs,
        PanelId::Telemetry,
        PanelId::Inspector,
        PanelId::Activity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runs => "runs",
            Self::Telemetry => "telemetry",
            Self::Inspector => "inspector",
            Self::Activity => "activity",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Runs => "Runs",
            Self::Telemetry => "Telemetry",
            Self::Inspector => "Inspector",
            Self::Activity => "Activity",
        }
    }

    /// Smallest docked extent along the panel's split axis, in pixels.
    pub fn min_size(self) -> f32 {
        match self {
            Self::Runs => 180.0,
            Self::Telemetry => 320.0,
            Self::Inspector => 240.0,
            Self::Activity => 120.0,
        }
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanelId {
    type Err = LayoutError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::REQUIRED
            .into_iter()
            .find(|panel| panel.as_str() == value)
            .ok_or_else(|| LayoutError::UnknownPanel(value.to_string()))
    }
}

/// Where a panel sits relative to its reference panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Root,
    Left,
    Right,
    Below,
    Above,
}

impl Position {
    fn is_horizontal(self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }

    fn ratio_bounds(self) -> (f32, f32) {
        match self {
            Self::Root => (1.0, 1.0),
            Self::Left => LEFT_BOUNDS,
            Self::Right => RIGHT_BOUNDS,
            Self::Below | Self::Above => BOTTOM_BOUNDS,
        }
    }
}

/// Extent of a docked panel along its split axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelSize {
    Pixels(f32),
    /// Percentage (0..=100) of the workspace extent along the split axis.
    Percent(f32),
}

impl PanelSize {
    pub fn to_pixels(self, extent: f32) -> f32 {
        match self {
            Self::Pixels(pixels) => pixels,
            Self::Percent(percent) => extent * percent / 100.0,
        }
    }

    fn is_valid(self) -> bool {
        let value = match self {
            Self::Pixels(value) | Self::Percent(value) => value,
        };
        value.is_finite() && value >= 0.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelState {
    #[default]
    Docked,
    Maximized,
    PoppedOut,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PanelPlacement {
    pub id: PanelId,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<PanelId>,
    pub size: PanelSize,
    pub min_size: f32,
    #[serde(default)]
    pub state: PanelState,
}

/// Serializable panel graph, placements in dependency order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceLayout {
    pub version: u32,
    pub panels: Vec<PanelPlacement>,
}

impl WorkspaceLayout {
    pub fn placement(&self, panel: PanelId) -> Option<&PanelPlacement> {
        self.panels.iter().find(|placement| placement.id == panel)
    }

    fn placement_mut(&mut self, panel: PanelId) -> Option<&mut PanelPlacement> {
        self.panels.iter_mut().find(|placement| placement.id == panel)
    }

    pub fn maximized(&self) -> Option<PanelId> {
        self.panels
            .iter()
            .find(|placement| placement.state == PanelState::Maximized)
            .map(|placement| placement.id)
    }

    pub fn popped_out(&self) -> Vec<PanelId> {
        self.panels
            .iter()
            .filter(|placement| placement.state == PanelState::PoppedOut)
            .map(|placement| placement.id)
            .collect()
    }

    /// Check the structural rules a restored document must satisfy.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.version != LAYOUT_VERSION {
            return Err(LayoutError::Invalid(format!(
                "unsupported layout version {}",
                self.version
            )));
        }
        for required in PanelId::REQUIRED {
            let count = self.panels.iter().filter(|p| p.id == required).count();
            if count != 1 {
                return Err(LayoutError::Invalid(format!(
                    "panel `{required}` appears {count} times"
                )));
            }
        }
        let mut placed: Vec<PanelId> = Vec::with_capacity(self.panels.len());
        for (index, placement) in self.panels.iter().enumerate() {
            match (placement.position, placement.reference) {
                (Position::Root, None) if index == 0 => {}
                (Position::Root, _) => {
                    return Err(LayoutError::Invalid(format!(
                        "`{}` is not a valid root",
                        placement.id
                    )));
                }
                (_, Some(reference)) if placed.contains(&reference) => {}
                (_, reference) => {
                    return Err(LayoutError::Invalid(format!(
                        "`{}` references {:?} before it is placed",
                        placement.id, reference
                    )));
                }
            }
            if !placement.size.is_valid() || !placement.min_size.is_finite() {
                return Err(LayoutError::Invalid(format!(
                    "`{}` has an invalid size",
                    placement.id
                )));
            }
            placed.push(placement.id);
        }
        let maximized = self
            .panels
            .iter()
            .filter(|p| p.state == PanelState::Maximized)
            .count();
        if maximized > 1 {
            return Err(LayoutError::Invalid("more than one maximized panel".into()));
        }
        if self
            .panels
            .first()
            .is_some_and(|root| root.state == PanelState::PoppedOut)
        {
            return Err(LayoutError::Invalid("root panel cannot be popped out".into()));
        }
        Ok(())
    }
}

/// Target side ratios (fractions of the viewport) requested by a preset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PresetTargets {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn is_narrow(&self) -> bool {
        self.width < NARROW_VIEWPORT_WIDTH
    }

    fn extent(&self, position: Position) -> f32 {
        if position.is_horizontal() {
            self.width
        } else {
            self.height
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1_280.0, 800.0)
    }
}

/// Pixel rectangle of a docked panel, relative to the workspace origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PanelRect {
    pub id: PanelId,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PanelRect {
    fn extent(&self, position: Position) -> f32 {
        if position.is_horizontal() {
            self.width
        } else {
            self.height
        }
    }

    // Cut `size` pixels from the `position` side of `self`.
    fn carve(&mut self, id: PanelId, position: Position, size: f32) -> PanelRect {
        let size = size.clamp(0.0, self.extent(position));
        let mut piece = PanelRect { id, ..*self };
        match position {
            Position::Root => {}
            Position::Left => {
                piece.width = size;
                self.x += size;
                self.width -= size;
            }
            Position::Right => {
                piece.x = self.x + self.width - size;
                piece.width = size;
                self.width -= size;
            }
            Position::Above => {
                piece.height = size;
                self.y += size;
                self.height -= size;
            }
            Position::Below => {
                piece.y = self.y + self.height - size;
                piece.height = size;
                self.height -= size;
            }
        }
        piece
    }
}

/// Side ratios resolved for a seed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeedRatios {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
}

impl SeedRatios {
    pub fn resolve(targets: PresetTargets, viewport: Viewport) -> Self {
        let (left, right) = side_ratios(targets, viewport.width);
        let mut bottom = clamp_ratio(targets.bottom, BOTTOM_BOUNDS);
        if viewport.height > 0.0 {
            let floor = (PanelId::Activity.min_size() / viewport.height).min(BOTTOM_BOUNDS.1);
            bottom = bottom.max(floor);
        }
        Self {
            left,
            right,
            bottom,
        }
    }

    pub fn center(&self) -> f32 {
        1.0 - self.left - self.right
    }
}

pub fn center_minimum(width: f32) -> f32 {
    if width < NARROW_VIEWPORT_WIDTH {
        CENTER_MIN_NARROW
    } else {
        CENTER_MIN
    }
}

fn clamp_ratio(value: f32, bounds: (f32, f32)) -> f32 {
    if value.is_finite() {
        value.clamp(bounds.0, bounds.1)
    } else {
        bounds.0
    }
}

fn side_ratios(targets: PresetTargets, width: f32) -> (f32, f32) {
    let mut left = clamp_ratio(targets.left, LEFT_BOUNDS);
    let mut right = clamp_ratio(targets.right, RIGHT_BOUNDS);
    let budget = 1.0 - center_minimum(width);
    if left + right > budget {
        let scale = budget / (left + right);
        left *= scale;
        right *= scale;
    }
    if width <= 0.0 {
        return (left, right);
    }
    let left_floor = PanelId::Runs.min_size() / width;
    let right_floor = PanelId::Inspector.min_size() / width;
    left = left.max(left_floor);
    right = right.max(right_floor);

    let mut deficit = left + right - budget;
    if deficit <= f32::EPSILON {
        return (left, right);
    }
    let left_first = PanelId::Runs.min_size() <= PanelId::Inspector.min_size();
    let mut sides = if left_first {
        [(&mut left, left_floor), (&mut right, right_floor)]
    } else {
        [(&mut right, right_floor), (&mut left, left_floor)]
    };
    // Give up slack above each minimum first, then cut below the minimums.
    for (ratio, floor) in sides.iter_mut() {
        let slack = (**ratio - *floor).max(0.0);
        let take = deficit.min(slack);
        **ratio -= take;
        deficit -= take;
    }
    for (ratio, _) in sides.iter_mut() {
        let take = deficit.min(**ratio);
        **ratio -= take;
        deficit -= take;
    }
    (left, right)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    Reseeded,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LayoutError {
    #[error("Workspace has not been seeded")]
    NotSeeded,
    #[error("Unknown panel `{0}`")]
    UnknownPanel(String),
    #[error("Panel `{0}` is popped out")]
    PoppedOut(PanelId),
    #[error("Panel `{0}` is maximized")]
    Maximized(PanelId),
    #[error("Panel `{0}` is not popped out")]
    NotPoppedOut(PanelId),
    #[error("Panel `{0}` fills the workspace and cannot be resized")]
    RootPanel(PanelId),
    #[error("Invalid layout: {0}")]
    Invalid(String),
    #[error("Failed to parse layout: {0}")]
    Parse(String),
}

/// Window system that can host a detached panel.
pub trait PopoutHost {
    /// Open a separate window for `panel`; `false` when detaching is refused.
    fn detach(&mut self, panel: PanelId) -> bool;
}

#[derive(Debug)]
pub struct WorkspaceLayoutEngine {
    layout: Option<WorkspaceLayout>,
    viewport: Viewport,
    fallback: PresetTargets,
    revision: u64,
}

impl WorkspaceLayoutEngine {
    /// `fallback` is seeded whenever a restored document is rejected.
    pub fn new(fallback: PresetTargets) -> Self {
        Self {
            layout: None,
            viewport: Viewport::default(),
            fallback,
            revision: 0,
        }
    }

    pub fn set_fallback(&mut self, fallback: PresetTargets) {
        self.fallback = fallback;
    }

    pub fn is_seeded(&self) -> bool {
        self.layout.is_some()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Record a new viewport without touching the graph.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn layout(&self) -> Option<&WorkspaceLayout> {
        self.layout.as_ref()
    }

    pub fn placement(&self, panel: PanelId) -> Option<&PanelPlacement> {
        self.layout.as_ref()?.placement(panel)
    }

    pub fn state(&self, panel: PanelId) -> Option<PanelState> {
        self.placement(panel).map(|placement| placement.state)
    }

    pub fn maximized(&self) -> Option<PanelId> {
        self.layout.as_ref()?.maximized()
    }

    pub fn seed(&mut self, targets: PresetTargets, viewport: Viewport) {
        self.viewport = viewport;
        let ratios = SeedRatios::resolve(targets, viewport);
        let placement = |id: PanelId, position, reference, ratio: f32| PanelPlacement {
            id,
            position,
            reference,
            size: PanelSize::Percent(ratio * 100.0),
            min_size: id.min_size(),
            state: PanelState::Docked,
        };
        let telemetry = Some(PanelId::Telemetry);
        self.layout = Some(WorkspaceLayout {
            version: LAYOUT_VERSION,
            panels: vec![
                placement(PanelId::Telemetry, Position::Root, None, 1.0),
                placement(PanelId::Runs, Position::Left, telemetry, ratios.left),
                placement(PanelId::Inspector, Position::Right, telemetry, ratios.right),
                placement(PanelId::Activity, Position::Below, telemetry, ratios.bottom),
            ],
        });
        self.bump();
    }

    /// Adopt a serialized layout, or seed the fallback targets at the current
    /// viewport when it is unusable.
    ///
    /// Stored sizes are clamped to the ratio bounds of their position and
    /// the center minimum of the current viewport. Panels stored as popped
    /// out come back docked: their windows did not survive the restart and
    /// only a [`PopoutHost`] may detach them again.
    pub fn restore(&mut self, document: &str) -> RestoreOutcome {
        match parse_layout(document) {
            Ok(mut layout) => {
                fit_restored(&mut layout, self.viewport);
                self.layout = Some(layout);
                self.bump();
                RestoreOutcome::Restored
            }
            Err(err) => {
                tracing::debug!("Discarding stored workspace layout: {err}");
                self.seed(self.fallback, self.viewport);
                RestoreOutcome::Reseeded
            }
        }
    }

    pub fn serialize(&self) -> Result<String, LayoutError> {
        let layout = self.layout.as_ref().ok_or(LayoutError::NotSeeded)?;
        serde_json::to_string(layout).map_err(|err| LayoutError::Parse(err.to_string()))
    }

    /// Apply a user resize, clamped to the panel minimum and the ratio bounds
    /// of its position. Returns whether the stored size changed.
    pub fn resize(&mut self, panel: PanelId, size: PanelSize) -> Result<bool, LayoutError> {
        let viewport = self.viewport;
        let placement = self.placement_mut(panel)?;
        if placement.position == Position::Root {
            return Err(LayoutError::RootPanel(panel));
        }
        let extent = viewport.extent(placement.position);
        let next = clamp_size(placement, size, extent);
        if placement.size == next {
            return Ok(false);
        }
        placement.size = next;
        self.bump();
        Ok(true)
    }

    pub fn maximize(&mut self, panel: PanelId) -> Result<(), LayoutError> {
        let layout = self.layout.as_mut().ok_or(LayoutError::NotSeeded)?;
        let state = layout
            .placement(panel)
            .map(|placement| placement.state)
            .ok_or_else(|| LayoutError::UnknownPanel(panel.to_string()))?;
        match state {
            PanelState::Maximized => return Ok(()),
            PanelState::PoppedOut => return Err(LayoutError::PoppedOut(panel)),
            PanelState::Docked => {}
        }
        for placement in &mut layout.panels {
            if placement.state == PanelState::Maximized {
                placement.state = PanelState::Docked;
            }
            if placement.id == panel {
                placement.state = PanelState::Maximized;
            }
        }
        self.bump();
        Ok(())
    }

    /// Return a maximized panel to its docked place.
    pub fn restore_panel(&mut self, panel: PanelId) -> Result<(), LayoutError> {
        let placement = self.placement_mut(panel)?;
        match placement.state {
            PanelState::Maximized => {
                placement.state = PanelState::Docked;
                self.bump();
                Ok(())
            }
            PanelState::PoppedOut => Err(LayoutError::PoppedOut(panel)),
            PanelState::Docked => Ok(()),
        }
    }

    pub fn toggle_maximize(&mut self, panel: PanelId) -> Result<(), LayoutError> {
        if self.state(panel) == Some(PanelState::Maximized) {
            self.restore_panel(panel)
        } else {
            self.maximize(panel)
        }
    }

    /// Detach `panel` into its own window. Returns `false` without changing
    /// anything for the root panel, panels that are not docked, or when the
    /// host refuses.
    pub fn popout(&mut self, panel: PanelId, host: &mut dyn PopoutHost) -> bool {
        let Ok(placement) = self.placement_mut(panel) else {
            return false;
        };
        if placement.position == Position::Root || placement.state != PanelState::Docked {
            return false;
        }
        if !host.detach(panel) {
            tracing::info!("Popout host refused to detach `{panel}`");
            return false;
        }
        placement.state = PanelState::PoppedOut;
        self.bump();
        true
    }

    pub fn dock(&mut self, panel: PanelId) -> Result<(), LayoutError> {
        let placement = self.placement_mut(panel)?;
        if placement.state != PanelState::PoppedOut {
            return Err(LayoutError::NotPoppedOut(panel));
        }
        placement.state = PanelState::Docked;
        self.bump();
        Ok(())
    }

    /// Resolve the graph into docked rectangles, in placement order.
    pub fn arrange(&self, viewport: Viewport) -> Vec<PanelRect> {
        let Some(layout) = &self.layout else {
            return Vec::new();
        };
        let full = |id| PanelRect {
            id,
            x: 0.0,
            y: 0.0,
            width: viewport.width,
            height: viewport.height,
        };
        if let Some(panel) = layout.maximized() {
            return vec![full(panel)];
        }
        let mut rects: Vec<PanelRect> = Vec::with_capacity(layout.panels.len());
        for placement in &layout.panels {
            if placement.state == PanelState::PoppedOut {
                continue;
            }
            let Some(anchor) = docked_anchor(layout, placement.reference) else {
                rects.push(full(placement.id));
                continue;
            };
            let Some(anchor_rect) = rects.iter_mut().find(|rect| rect.id == anchor) else {
                continue;
            };
            let extent = viewport.extent(placement.position);
            let size = placement.size.to_pixels(extent).max(placement.min_size);
            let rect = anchor_rect.carve(placement.id, placement.position, size);
            rects.push(rect);
        }
        rects
    }

    fn placement_mut(&mut self, panel: PanelId) -> Result<&mut PanelPlacement, LayoutError> {
        self.layout
            .as_mut()
            .ok_or(LayoutError::NotSeeded)?
            .placement_mut(panel)
            .ok_or_else(|| LayoutError::UnknownPanel(panel.to_string()))
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

fn parse_layout(document: &str) -> Result<WorkspaceLayout, LayoutError> {
    let layout: WorkspaceLayout =
        serde_json::from_str(document).map_err(|err| LayoutError::Parse(err.to_string()))?;
    layout.validate()?;
    Ok(layout)
}

fn fit_restored(layout: &mut WorkspaceLayout, viewport: Viewport) {
    for placement in &mut layout.panels {
        if placement.state == PanelState::PoppedOut {
            tracing::debug!("Docking `{}` restored as popped out", placement.id);
            placement.state = PanelState::Docked;
        }
        let extent = viewport.extent(placement.position);
        if placement.position == Position::Root || extent <= 0.0 {
            continue;
        }
        let (_, high) = placement.position.ratio_bounds();
        if placement.size.to_pixels(extent) / extent > high + RATIO_TOLERANCE {
            tracing::debug!(
                "Capping restored size of `{}` at {}%",
                placement.id,
                high * 100.0
            );
            placement.size = PanelSize::Percent(high * 100.0);
        }
    }
    shrink_to_budget(layout, viewport.width, true, 1.0 - center_minimum(viewport.width));
    shrink_to_budget(layout, viewport.height, false, 1.0 - CENTER_MIN);
}

// Scale the panels along one axis down until they leave the center its share.
fn shrink_to_budget(layout: &mut WorkspaceLayout, extent: f32, horizontal: bool, budget: f32) {
    if extent <= 0.0 {
        return;
    }
    let on_axis = |placement: &PanelPlacement| {
        placement.position != Position::Root && placement.position.is_horizontal() == horizontal
    };
    let total: f32 = layout
        .panels
        .iter()
        .filter(|placement| on_axis(placement))
        .map(|placement| placement.size.to_pixels(extent) / extent)
        .sum();
    if total <= budget + RATIO_TOLERANCE {
        return;
    }
    let scale = budget / total;
    for placement in layout.panels.iter_mut().filter(|placement| on_axis(placement)) {
        let ratio = placement.size.to_pixels(extent) / extent;
        placement.size = PanelSize::Percent(ratio * scale * 100.0);
    }
}

// Nearest docked panel up the reference chain; popped-out panels leave their
// area to whatever they were docked against.
fn docked_anchor(layout: &WorkspaceLayout, reference: Option<PanelId>) -> Option<PanelId> {
    let mut current = reference?;
    for _ in 0..layout.panels.len() {
        let placement = layout.placement(current)?;
        if placement.state != PanelState::PoppedOut {
            return Some(current);
        }
        current = placement.reference?;
    }
    None
}

fn clamp_size(placement: &PanelPlacement, size: PanelSize, extent: f32) -> PanelSize {
    let (low, high) = placement.position.ratio_bounds();
    let requested = match size {
        PanelSize::Percent(percent) => percent / 100.0,
        PanelSize::Pixels(pixels) if extent > 0.0 => pixels / extent,
        PanelSize::Pixels(pixels) => return PanelSize::Pixels(pixels.max(placement.min_size)),
    };
    let mut low = low;
    if extent > 0.0 {
        low = low.max(placement.min_size / extent).min(high);
    }
    let ratio = if requested.is_finite() {
        requested.clamp(low, high)
    } else {
        low
    };
    PanelSize::Percent(ratio * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BALANCED: PresetTargets = PresetTargets {
        left: 0.18,
        right: 0.26,
        bottom: 0.28,
    };

    struct Host(bool);

    impl PopoutHost for Host {
        fn detach(&mut self, _panel: PanelId) -> bool {
            self.0
        }
    }

    fn seeded() -> WorkspaceLayoutEngine {
        let mut engine = WorkspaceLayoutEngine::new(BALANCED);
        engine.seed(BALANCED, Viewport::new(1_280.0, 800.0));
        engine
    }

    fn percent(engine: &WorkspaceLayoutEngine, panel: PanelId) -> f32 {
        match engine.placement(panel).map(|placement| placement.size) {
            Some(PanelSize::Percent(value)) => value,
            other => panic!("unexpected size {other:?}"),
        }
    }

    #[test]
    fn starts_unseeded() {
        let engine = WorkspaceLayoutEngine::new(BALANCED);
        assert!(!engine.is_seeded());
        assert!(engine.arrange(Viewport::default()).is_empty());
        assert_eq!(engine.serialize(), Err(LayoutError::NotSeeded));
    }

    #[test]
    fn seed_places_required_panels_around_telemetry() {
        let engine = seeded();
        let layout = engine.layout().unwrap();
        let ids: Vec<PanelId> = layout.panels.iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            [
                PanelId::Telemetry,
                PanelId::Runs,
                PanelId::Inspector,
                PanelId::Activity
            ]
        );
        assert!(layout.validate().is_ok());
        assert_eq!(engine.revision(), 1);
    }

    #[test]
    fn target_ratios_are_clamped() {
        let ratios = SeedRatios::resolve(
            PresetTargets {
                left: 0.01,
                right: 0.9,
                bottom: 0.9,
            },
            Viewport::new(1_600.0, 900.0),
        );
        assert_eq!(ratios.left, 0.12);
        assert!(ratios.right <= 0.38);
        assert_eq!(ratios.bottom, 0.44);
    }

    #[test]
    fn wide_sides_are_scaled_to_keep_center() {
        let targets = PresetTargets {
            left: 0.26,
            right: 0.38,
            bottom: 0.3,
        };
        let wide = SeedRatios::resolve(targets, Viewport::new(1_600.0, 900.0));
        assert!(wide.center() >= 0.36 - 1e-5);
        assert!((wide.left / wide.right - 0.26 / 0.38).abs() < 1e-4);

        let narrow = SeedRatios::resolve(targets, Viewport::new(1_000.0, 700.0));
        assert!(narrow.center() >= 0.44 - 1e-5);
    }

    #[test]
    fn pinned_side_takes_slack_from_the_other_side_first() {
        let targets = PresetTargets {
            left: 0.16,
            right: 0.38,
            bottom: 0.26,
        };
        let ratios = SeedRatios::resolve(targets, Viewport::new(800.0, 600.0));
        assert!(ratios.left * 800.0 >= PanelId::Runs.min_size() - 0.01);
        assert!(ratios.right * 800.0 >= PanelId::Inspector.min_size() - 0.01);
        assert!(ratios.center() >= 0.44 - 1e-5);
    }

    #[test]
    fn tiny_viewport_trims_smaller_minimum_first() {
        let ratios = SeedRatios::resolve(BALANCED, Viewport::new(600.0, 400.0));
        assert!(ratios.center() >= 0.44 - 1e-5);
        // Inspector keeps its minimum, runs absorbs the shortfall.
        assert!((ratios.right * 600.0 - PanelId::Inspector.min_size()).abs() < 0.01);
        assert!(ratios.left * 600.0 < PanelId::Runs.min_size());
    }

    #[test]
    fn serialize_restore_round_trip() {
        let mut engine = seeded();
        engine.resize(PanelId::Runs, PanelSize::Percent(22.0)).unwrap();
        let document = engine.serialize().unwrap();
        let mut other = WorkspaceLayoutEngine::new(BALANCED);
        assert_eq!(other.restore(&document), RestoreOutcome::Restored);
        assert_eq!(other.layout(), engine.layout());
    }

    #[test]
    fn restore_reseeds_when_a_panel_is_missing() {
        let engine = seeded();
        let mut layout = engine.layout().unwrap().clone();
        layout.panels.retain(|p| p.id != PanelId::Inspector);
        let document = serde_json::to_string(&layout).unwrap();

        let mut other = WorkspaceLayoutEngine::new(BALANCED);
        other.set_viewport(Viewport::new(1_280.0, 800.0));
        assert_eq!(other.restore(&document), RestoreOutcome::Reseeded);
        assert_eq!(other.layout(), engine.layout());
    }

    #[test]
    fn restore_rejects_garbage_and_forward_references() {
        let mut engine = WorkspaceLayoutEngine::new(BALANCED);
        assert_eq!(engine.restore("{not json"), RestoreOutcome::Reseeded);
        assert!(engine.is_seeded());

        let mut layout = seeded().layout().unwrap().clone();
        layout.panels.swap(0, 1);
        let document = serde_json::to_string(&layout).unwrap();
        assert_eq!(engine.restore(&document), RestoreOutcome::Reseeded);

        let unknown = r#"{"version":1,"panels":[{"id":"chat","position":"root","size":{"percent":100.0},"min_size":0.0}]}"#;
        assert_eq!(engine.restore(unknown), RestoreOutcome::Reseeded);
    }

    #[test]
    fn restored_oversized_sides_leave_the_center_its_minimum() {
        let mut layout = seeded().layout().unwrap().clone();
        for placement in &mut layout.panels {
            match placement.id {
                PanelId::Runs => placement.size = PanelSize::Percent(95.0),
                PanelId::Inspector => placement.size = PanelSize::Pixels(600.0),
                PanelId::Activity => placement.size = PanelSize::Percent(90.0),
                PanelId::Telemetry => {}
            }
        }
        let document = serde_json::to_string(&layout).unwrap();

        let viewport = Viewport::new(1_280.0, 800.0);
        let mut engine = WorkspaceLayoutEngine::new(BALANCED);
        engine.set_viewport(viewport);
        assert_eq!(engine.restore(&document), RestoreOutcome::Restored);
        assert!(percent(&engine, PanelId::Runs) <= 26.0 + 1e-3);
        assert!(percent(&engine, PanelId::Activity) <= 44.0 + 1e-3);

        let rects = engine.arrange(viewport);
        let telemetry = rects.iter().find(|r| r.id == PanelId::Telemetry).unwrap();
        assert!(telemetry.width >= 1_280.0 * 0.36 - 0.5, "{telemetry:?}");
        assert!(telemetry.height >= 800.0 * 0.36 - 0.5, "{telemetry:?}");
    }

    #[test]
    fn restored_popouts_come_back_docked() {
        let mut engine = seeded();
        assert!(engine.popout(PanelId::Inspector, &mut Host(true)));
        let document = engine.serialize().unwrap();

        let mut restored = WorkspaceLayoutEngine::new(BALANCED);
        assert_eq!(restored.restore(&document), RestoreOutcome::Restored);
        assert_eq!(restored.state(PanelId::Inspector), Some(PanelState::Docked));
        assert!(restored.layout().unwrap().popped_out().is_empty());
        assert_eq!(restored.arrange(Viewport::new(1_280.0, 800.0)).len(), 4);
    }

    #[test]
    fn resize_clamps_to_bounds_and_minimum() {
        let mut engine = seeded();
        assert!(engine.resize(PanelId::Runs, PanelSize::Percent(60.0)).unwrap());
        assert!((percent(&engine, PanelId::Runs) - 26.0).abs() < 1e-3);
        engine.resize(PanelId::Runs, PanelSize::Pixels(40.0)).unwrap();
        assert!((percent(&engine, PanelId::Runs) - 180.0 / 1_280.0 * 100.0).abs() < 1e-3);
        assert!(!engine.resize(PanelId::Runs, PanelSize::Pixels(10.0)).unwrap());
        assert_eq!(
            engine.resize(PanelId::Telemetry, PanelSize::Percent(50.0)),
            Err(LayoutError::RootPanel(PanelId::Telemetry))
        );
    }

    #[test]
    fn maximize_is_exclusive_and_toggles() {
        let mut engine = seeded();
        engine.maximize(PanelId::Runs).unwrap();
        engine.maximize(PanelId::Activity).unwrap();
        assert_eq!(engine.maximized(), Some(PanelId::Activity));
        assert_eq!(engine.state(PanelId::Runs), Some(PanelState::Docked));

        let rects = engine.arrange(Viewport::new(1_280.0, 800.0));
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].width, 1_280.0);

        engine.toggle_maximize(PanelId::Activity).unwrap();
        assert_eq!(engine.maximized(), None);
        assert_eq!(engine.arrange(Viewport::new(1_280.0, 800.0)).len(), 4);
    }

    #[test]
    fn popout_rules() {
        let mut engine = seeded();
        assert!(!engine.popout(PanelId::Telemetry, &mut Host(true)));
        assert!(!engine.popout(PanelId::Inspector, &mut Host(false)));
        assert_eq!(engine.state(PanelId::Inspector), Some(PanelState::Docked));

        let before = engine.revision();
        assert!(engine.popout(PanelId::Inspector, &mut Host(true)));
        assert!(engine.revision() > before);
        assert!(!engine.popout(PanelId::Inspector, &mut Host(true)));
        assert_eq!(
            engine.maximize(PanelId::Inspector),
            Err(LayoutError::PoppedOut(PanelId::Inspector))
        );

        engine.maximize(PanelId::Runs).unwrap();
        assert!(!engine.popout(PanelId::Runs, &mut Host(true)));

        engine.dock(PanelId::Inspector).unwrap();
        assert_eq!(
            engine.dock(PanelId::Inspector),
            Err(LayoutError::NotPoppedOut(PanelId::Inspector))
        );
    }

    #[test]
    fn arrange_tiles_the_viewport() {
        let engine = seeded();
        let viewport = Viewport::new(1_280.0, 800.0);
        let rects = engine.arrange(viewport);
        let area: f32 = rects.iter().map(|r| r.width * r.height).sum();
        assert!((area - viewport.width * viewport.height).abs() < 1.0);

        let get = |id| rects.iter().find(|r| r.id == id).copied().unwrap();
        let runs = get(PanelId::Runs);
        let telemetry = get(PanelId::Telemetry);
        let inspector = get(PanelId::Inspector);
        let activity = get(PanelId::Activity);
        assert_eq!(runs.x, 0.0);
        assert!((inspector.x + inspector.width - 1_280.0).abs() < 0.01);
        assert!((telemetry.x - runs.width).abs() < 0.01);
        assert!((activity.y - telemetry.height).abs() < 0.01);
        assert!((activity.x - telemetry.x).abs() < 0.01);
    }

    #[test]
    fn popped_out_area_returns_to_reference() {
        let mut engine = seeded();
        assert!(engine.popout(PanelId::Runs, &mut Host(true)));
        let rects = engine.arrange(Viewport::new(1_280.0, 800.0));
        assert!(rects.iter().all(|r| r.id != PanelId::Runs));
        let telemetry = rects.iter().find(|r| r.id == PanelId::Telemetry).unwrap();
        assert_eq!(telemetry.x, 0.0);
    }

    #[test]
    fn panel_ids_parse_from_text() {
        assert_eq!("activity".parse::<PanelId>(), Ok(PanelId::Activity));
        assert!(matches!(
            "chat".parse::<PanelId>(),
            Err(LayoutError::UnknownPanel(_))
        ));
    }
}
