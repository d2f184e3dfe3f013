use eframe::egui::{self, Align, Layout, RichText, Sense, StrokeKind, Ui, UiBuilder};

use super::ConsoleApp;
use super::host::{ViewportPopoutHost, popout_viewport_id};
use super::style;
use crate::workspace::{PanelId, PanelRect, PanelSize, PanelState, Position, Viewport};

const GUTTER: f32 = 2.0;
const PANEL_MARGIN: f32 = 6.0;
const SPLITTER_GRAB: f32 = 6.0;

impl ConsoleApp {
    /// Draw every docked panel at the rectangle the layout engine assigns.
    pub(super) fn render_workspace(&mut self, ctx: &egui::Context) {
        let fill = style::palette().bg_primary;
        egui::CentralPanel::default()
            .frame(egui::Frame::new().fill(fill))
            .show(ctx, |ui| {
                let area = ui.max_rect();
                let viewport = Viewport::new(area.width(), area.height());
                self.controller.set_viewport(viewport);
                let rects = self.controller.workspace().engine().arrange(viewport);
                for rect in &rects {
                    self.render_docked(ui, area.min, rect);
                }
                for rect in &rects {
                    self.render_splitter(ui, area.min, rect, viewport);
                }
            });
    }

    pub(super) fn render_popouts(&mut self, ctx: &egui::Context) {
        let popped = self
            .controller
            .workspace()
            .engine()
            .layout()
            .map(|layout| layout.popped_out())
            .unwrap_or_default();
        for panel in popped {
            let builder = egui::ViewportBuilder::default()
                .with_title(format!("runscope · {}", panel.title()))
                .with_inner_size([640.0, 480.0]);
            let id = popout_viewport_id(panel);
            let close = ctx.show_viewport_immediate(id, builder, |ctx, _class| {
                egui::CentralPanel::default().show(ctx, |ui| self.render_panel_body(ui, panel));
                ctx.input(|input| input.viewport().close_requested())
            });
            if close {
                self.controller.dock_panel(panel);
            }
        }
    }

    fn render_docked(&mut self, ui: &mut Ui, origin: egui::Pos2, rect: &PanelRect) {
        let bounds = screen_rect(origin, rect).shrink(GUTTER);
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            return;
        }
        let palette = style::palette();
        ui.painter().rect(
            bounds,
            0.0,
            palette.bg_secondary,
            style::panel_border(),
            StrokeKind::Inside,
        );
        let mut child = ui.new_child(
            UiBuilder::new()
                .id_salt(("panel", rect.id.as_str()))
                .max_rect(bounds.shrink(PANEL_MARGIN))
                .layout(Layout::top_down(Align::Min)),
        );
        child.set_clip_rect(bounds);
        self.render_panel_header(&mut child, rect.id);
        child.separator();
        self.render_panel_body(&mut child, rect.id);
    }

    fn render_panel_header(&mut self, ui: &mut Ui, panel: PanelId) {
        let state = self.controller.workspace().engine().state(panel);
        let is_root = self
            .controller
            .workspace()
            .engine()
            .placement(panel)
            .is_some_and(|placement| placement.position == Position::Root);
        ui.horizontal(|ui| {
            ui.label(RichText::new(panel.title()).strong());
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                let maximized = state == Some(PanelState::Maximized);
                let label = if maximized { "Restore" } else { "Maximize" };
                if ui.small_button(label).clicked() {
                    self.controller.toggle_maximize(panel);
                }
                if !is_root && !maximized && ui.small_button("Pop out").clicked() {
                    let mut host = ViewportPopoutHost::new(ui.ctx());
                    self.controller.popout_panel(panel, &mut host);
                }
            });
        });
    }

    fn render_splitter(
        &mut self,
        ui: &mut Ui,
        origin: egui::Pos2,
        rect: &PanelRect,
        viewport: Viewport,
    ) {
        let Some(position) = self
            .controller
            .workspace()
            .engine()
            .placement(rect.id)
            .map(|placement| placement.position)
        else {
            return;
        };
        let bounds = screen_rect(origin, rect);
        let (handle, edge, cursor) = match position {
            Position::Root => return,
            Position::Left => (
                egui::Rect::from_center_size(
                    egui::pos2(bounds.right(), bounds.center().y),
                    egui::vec2(SPLITTER_GRAB, bounds.height()),
                ),
                [bounds.right_top(), bounds.right_bottom()],
                egui::CursorIcon::ResizeHorizontal,
            ),
            Position::Right => (
                egui::Rect::from_center_size(
                    egui::pos2(bounds.left(), bounds.center().y),
                    egui::vec2(SPLITTER_GRAB, bounds.height()),
                ),
                [bounds.left_top(), bounds.left_bottom()],
                egui::CursorIcon::ResizeHorizontal,
            ),
            Position::Below => (
                egui::Rect::from_center_size(
                    egui::pos2(bounds.center().x, bounds.top()),
                    egui::vec2(bounds.width(), SPLITTER_GRAB),
                ),
                [bounds.left_top(), bounds.right_top()],
                egui::CursorIcon::ResizeVertical,
            ),
            Position::Above => (
                egui::Rect::from_center_size(
                    egui::pos2(bounds.center().x, bounds.bottom()),
                    egui::vec2(bounds.width(), SPLITTER_GRAB),
                ),
                [bounds.left_bottom(), bounds.right_bottom()],
                egui::CursorIcon::ResizeVertical,
            ),
        };
        let response = ui.interact(
            handle,
            ui.id().with(("splitter", rect.id.as_str())),
            Sense::drag(),
        );
        let active = response.hovered() || response.dragged();
        if active {
            ui.ctx().set_cursor_icon(cursor);
        }
        ui.painter().line_segment(edge, style::splitter_stroke(active));
        if !response.dragged() {
            return;
        }
        let delta = response.drag_delta();
        let (size, extent) = match position {
            Position::Left => (rect.width + delta.x, viewport.width),
            Position::Right => (rect.width - delta.x, viewport.width),
            Position::Below => (rect.height - delta.y, viewport.height),
            Position::Above => (rect.height + delta.y, viewport.height),
            Position::Root => return,
        };
        if extent > 0.0 {
            let percent = size / extent * 100.0;
            self.controller.resize_panel(rect.id, PanelSize::Percent(percent));
        }
    }

    pub(super) fn render_panel_body(&mut self, ui: &mut Ui, panel: PanelId) {
        match panel {
            PanelId::Runs => self.render_runs_panel(ui),
            PanelId::Telemetry => self.render_telemetry_panel(ui),
            PanelId::Inspector => self.render_inspector_panel(ui),
            PanelId::Activity => self.render_activity_panel(ui),
        }
    }
}

fn screen_rect(origin: egui::Pos2, rect: &PanelRect) -> egui::Rect {
    egui::Rect::from_min_size(
        origin + egui::vec2(rect.x, rect.y),
        egui::vec2(rect.width, rect.height),
    )
}
