//! eframe shell around [`ConsoleController`].

mod host;
mod panels;
mod style;
mod workspace;

use std::sync::Arc;
use std::time::Instant;

use eframe::egui::{self, RichText};

use crate::controller::ConsoleController;
use crate::runs::RunId;
use crate::settings::ConsoleSettings;
use crate::virtual_window::VirtualWindow;
use crate::workspace::Preset;
use host::EguiFrameScheduler;

/// Smallest window the workspace can lay out without starving the center.
pub const MIN_VIEWPORT_SIZE: egui::Vec2 = egui::vec2(900.0, 600.0);

const RUN_ROW_HEIGHT: f32 = 24.0;
const ACTIVITY_ROW_ESTIMATE: f32 = 20.0;

/// Renders the console and forwards every interaction to the controller.
pub struct ConsoleApp {
    controller: ConsoleController,
    runs_window: VirtualWindow,
    revealed_run: Option<RunId>,
    activity: panels::ActivityView,
    plot: panels::PlotCache,
    score: panels::ScoreForm,
    visuals_set: bool,
}

impl ConsoleApp {
    /// Load configuration and connect the controller to `ctx`.
    pub fn new(ctx: &egui::Context) -> Result<Self, String> {
        let mut controller = ConsoleController::from_settings(ConsoleSettings::default())
            .map_err(|err| format!("Failed to create server client: {err}"))?;
        controller
            .load_configuration()
            .map_err(|err| format!("Failed to load config: {err}"))?;
        let repaint = ctx.clone();
        controller.set_waker(Arc::new(move || repaint.request_repaint()));
        let interval = controller.settings().telemetry.frame_interval();
        controller.set_frame_scheduler(Box::new(EguiFrameScheduler::new(ctx.clone(), interval)));
        controller.refresh_runs();
        Ok(Self {
            controller,
            runs_window: VirtualWindow::fixed(RUN_ROW_HEIGHT),
            revealed_run: None,
            activity: panels::ActivityView::new(ACTIVITY_ROW_ESTIMATE),
            plot: panels::PlotCache::default(),
            score: panels::ScoreForm::default(),
            visuals_set: false,
        })
    }

    fn apply_visuals(&mut self, ctx: &egui::Context) {
        if self.visuals_set {
            return;
        }
        let mut visuals = egui::Visuals::dark();
        style::apply_visuals(&mut visuals);
        ctx.set_visuals(visuals);
        self.visuals_set = true;
    }

    fn render_toolbar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(RichText::new("runscope").strong());
                ui.separator();
                let current = self.controller.workspace().preset();
                let mut chosen = current;
                egui::ComboBox::from_id_salt("workspace_preset")
                    .selected_text(current.label())
                    .show_ui(ui, |ui| {
                        for preset in Preset::ALL {
                            ui.selectable_value(&mut chosen, preset, preset.label());
                        }
                    });
                let reset = ui.button("Reset layout").clicked();
                if chosen != current || reset {
                    self.controller.apply_preset(chosen);
                }
                ui.separator();
                if ui.button("Refresh runs").clicked() {
                    self.controller.refresh_runs();
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(
                        RichText::new(&self.controller.settings().server.base_url)
                            .color(style::palette().text_muted),
                    );
                });
            });
        });
    }

    fn render_status(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            let status = self.controller.status();
            let hud = self.controller.stream().hud();
            ui.horizontal(|ui| {
                let (dot, _) = ui.allocate_exact_size(egui::vec2(12.0, 12.0), egui::Sense::hover());
                ui.painter()
                    .circle_filled(dot.center(), 5.0, style::status_color(status.tone));
                ui.label(&status.text);
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(
                        RichText::new(format!(
                            "{} events · {} points",
                            hud.event_count, hud.point_count
                        ))
                        .color(style::palette().text_muted),
                    );
                });
            });
        });
    }
}

impl eframe::App for ConsoleApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.apply_visuals(ctx);
        self.controller.tick(Instant::now());
        self.render_toolbar(ctx);
        self.render_status(ctx);
        self.render_workspace(ctx);
        self.render_popouts(ctx);
        if self.controller.workspace().has_pending_persist() {
            ctx.request_repaint_after(crate::workspace::persist::DEFAULT_SETTLE);
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.controller.shutdown();
    }
}
