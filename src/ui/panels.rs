use eframe::egui::{self, Align, RichText, Sense, StrokeKind, Ui, UiBuilder};

use super::{ConsoleApp, RUN_ROW_HEIGHT, style};
use crate::runs::{EventKind, MetricEvent, RunId};
use crate::telemetry::{DedupKeyedLog, TelemetryRingBuffer};
use crate::virtual_window::VirtualWindow;

const PLOT_POINT_RADIUS: f32 = 2.0;
const ACTIVITY_ROW_MAX_HEIGHT: f32 = 400.0;

/// Activity log list state. Row heights are measured as rows are drawn.
pub(super) struct ActivityView {
    window: VirtualWindow,
    generation: u64,
    evicted: usize,
}

impl ActivityView {
    pub(super) fn new(estimate: f32) -> Self {
        Self {
            window: VirtualWindow::estimated(estimate),
            generation: 0,
            evicted: 0,
        }
    }

    /// Keep the position cache aligned with the log after a run switch or
    /// front eviction.
    fn sync(&mut self, generation: u64, log: &DedupKeyedLog) {
        if generation != self.generation || log.evicted() < self.evicted {
            self.window.clear();
            self.generation = generation;
            self.evicted = log.evicted();
            return;
        }
        self.window.drop_front(log.evicted() - self.evicted);
        self.evicted = log.evicted();
    }
}

/// Plot points normalized to the unit square, rebuilt only when the ring
/// buffer revision changes.
#[derive(Default)]
pub(super) struct PlotCache {
    revision: Option<u64>,
    points: Vec<[f32; 2]>,
}

impl PlotCache {
    fn refresh(&mut self, ring: &TelemetryRingBuffer) -> &[[f32; 2]] {
        if self.revision != Some(ring.revision()) {
            self.points = normalized_points(ring);
            self.revision = Some(ring.revision());
        }
        &self.points
    }
}

#[derive(Default)]
pub(super) struct ScoreForm {
    baseline: String,
    metric: String,
}

impl ConsoleApp {
    pub(super) fn render_runs_panel(&mut self, ui: &mut Ui) {
        ui.horizontal(|ui| {
            if ui.small_button("Refresh").clicked() {
                self.controller.refresh_runs();
            }
            if self.controller.is_loading_runs() {
                ui.spinner();
            }
            ui.label(
                RichText::new(format!("{} runs", self.controller.runs().len()))
                    .color(style::palette().text_muted),
            );
        });
        let selected = self.controller.stream().selected().cloned();
        let reveal = selected
            .as_ref()
            .filter(|id| self.revealed_run.as_ref() != Some(*id))
            .and_then(|id| self.controller.runs().iter().position(|run| &run.run_id == id));
        let mut clicked: Option<RunId> = None;
        egui::ScrollArea::vertical()
            .id_salt("runs_list")
            .auto_shrink([false, false])
            .show_viewport(ui, |ui, viewport| {
                let runs = self.controller.runs();
                let layout = self
                    .runs_window
                    .compute(viewport.min.y, viewport.height(), runs.len());
                ui.set_height(layout.total_extent);
                let origin = ui.min_rect().min;
                let width = ui.available_width();
                for (index, offset) in layout.range().zip(layout.offsets.iter().copied()) {
                    let Some(run) = runs.get(index) else {
                        continue;
                    };
                    let row = egui::Rect::from_min_size(
                        origin + egui::vec2(0.0, offset),
                        egui::vec2(width, RUN_ROW_HEIGHT),
                    );
                    let mut row_ui = ui.new_child(UiBuilder::new().max_rect(row));
                    let is_selected = selected.as_ref() == Some(&run.run_id);
                    let text = RichText::new(format!("{}  ·  {}", run.label(), run.status))
                        .color(style::run_status_color(run.status));
                    if row_ui.selectable_label(is_selected, text).clicked() {
                        clicked = Some(run.run_id.clone());
                    }
                }
                if let Some(index) = reveal {
                    let target = self.runs_window.scroll_to_reveal(
                        viewport.min.y,
                        index,
                        viewport.height(),
                        1.0,
                    );
                    if (target - viewport.min.y).abs() > 0.5 {
                        let top = egui::Rect::from_min_size(
                            origin + egui::vec2(0.0, target),
                            egui::vec2(1.0, viewport.height()),
                        );
                        ui.scroll_to_rect(top, Some(Align::Min));
                    }
                }
            });
        if reveal.is_some() {
            self.revealed_run = selected;
        }
        if let Some(run_id) = clicked {
            self.revealed_run = Some(run_id.clone());
            self.controller.select_run(run_id);
        }
    }

    pub(super) fn render_telemetry_panel(&mut self, ui: &mut Ui) {
        let hud = self.controller.stream().hud();
        ui.horizontal_wrapped(|ui| {
            for (label, value) in [
                ("step", hud.step),
                ("epoch", hud.epoch),
                ("loss", hud.loss),
                ("lr", hud.lr),
                ("grad", hud.grad_norm),
            ] {
                ui.label(RichText::new(label).color(style::palette().text_muted));
                ui.label(format_value(value));
            }
            if let Some(percent) = hud.percent {
                ui.add(
                    egui::ProgressBar::new((percent / 100.0).clamp(0.0, 1.0) as f32)
                        .desired_width(120.0)
                        .show_percentage(),
                );
            }
        });
        let (rect, _) = ui.allocate_exact_size(ui.available_size(), Sense::hover());
        let palette = style::palette();
        let painter = ui.painter_at(rect);
        painter.rect(
            rect,
            0.0,
            palette.bg_primary,
            egui::Stroke::new(1.0, palette.grid_soft),
            StrokeKind::Inside,
        );
        let points = self.plot.refresh(self.controller.stream().pipeline().ring());
        if points.is_empty() {
            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "Waiting for telemetry",
                egui::FontId::proportional(14.0),
                palette.text_muted,
            );
            return;
        }
        let plot = rect.shrink(12.0);
        let to_screen = |[x, y]: [f32; 2]| {
            egui::pos2(
                plot.left() + x * plot.width(),
                plot.bottom() - y * plot.height(),
            )
        };
        let count = points.len();
        for (index, point) in points.iter().enumerate() {
            let age = 1.0 - (index + 1) as f32 / count as f32;
            painter.circle_filled(to_screen(*point), PLOT_POINT_RADIUS, style::point_color(age));
        }
        if let Some(last) = points.last() {
            painter.circle_stroke(
                to_screen(*last),
                PLOT_POINT_RADIUS * 2.5,
                egui::Stroke::new(1.5, palette.accent_ice),
            );
        }
    }

    pub(super) fn render_inspector_panel(&mut self, ui: &mut Ui) {
        let Some(run) = self.controller.stream().run().cloned() else {
            let text = if self.controller.stream().is_loading() {
                "Loading run…"
            } else {
                "Select a run"
            };
            ui.label(RichText::new(text).color(style::palette().text_muted));
            return;
        };
        let hud = self.controller.stream().hud().clone();
        egui::ScrollArea::vertical()
            .id_salt("inspector")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                egui::Grid::new("run_summary").num_columns(2).show(ui, |ui| {
                    ui.label("Run");
                    ui.label(run.run_id.as_str());
                    ui.end_row();
                    ui.label("Status");
                    ui.label(
                        RichText::new(run.status.as_str())
                            .color(style::run_status_color(run.status)),
                    );
                    ui.end_row();
                    ui.label("Started");
                    ui.label(optional_text(run.started_at.as_ref()));
                    ui.end_row();
                    ui.label("Completed");
                    ui.label(optional_text(run.completed_at.as_ref()));
                    ui.end_row();
                });
                if let Some(message) = &hud.message {
                    ui.label(message);
                }
                if let Some(error) = &hud.last_error {
                    ui.colored_label(style::palette().warning, error);
                }
                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("Relaunch").clicked() {
                        self.controller.start_run();
                    }
                    if ui.button("Promote").clicked() {
                        self.controller.promote_selected_run();
                    }
                });
                self.render_score_form(ui, &run.run_id);
                egui::CollapsingHeader::new("Latest metrics")
                    .default_open(true)
                    .show(ui, |ui| {
                        egui::Grid::new("run_metrics").num_columns(2).show(ui, |ui| {
                            for (name, value) in &hud.metrics {
                                ui.label(name);
                                ui.label(format_value(Some(*value)));
                                ui.end_row();
                            }
                        });
                    });
                egui::CollapsingHeader::new("Configuration")
                    .default_open(false)
                    .show(ui, |ui| {
                        egui::Grid::new("run_config").num_columns(2).show(ui, |ui| {
                            for (key, value) in &run.config_snapshot {
                                ui.label(key);
                                ui.label(value.to_string());
                                ui.end_row();
                            }
                        });
                    });
            });
    }

    fn render_score_form(&mut self, ui: &mut Ui, candidate: &RunId) {
        ui.horizontal(|ui| {
            ui.add(
                egui::TextEdit::singleline(&mut self.score.baseline)
                    .hint_text("baseline run")
                    .desired_width(110.0),
            );
            ui.add(
                egui::TextEdit::singleline(&mut self.score.metric)
                    .hint_text("metric")
                    .desired_width(80.0),
            );
            let ready = !self.score.baseline.trim().is_empty() && !self.score.metric.trim().is_empty();
            if ui.add_enabled(ready, egui::Button::new("Score")).clicked() {
                self.controller.score_pair(
                    RunId::new(self.score.baseline.trim()),
                    candidate.clone(),
                    self.score.metric.trim(),
                );
            }
        });
        if let Some(score) = self.controller.last_score() {
            ui.label(format!("Score {:.3}", score.score));
        }
    }

    pub(super) fn render_activity_panel(&mut self, ui: &mut Ui) {
        let generation = self.controller.stream().generation();
        let log = self.controller.stream().pipeline().log();
        self.activity.sync(generation, log);
        let window = &mut self.activity.window;
        egui::ScrollArea::vertical()
            .id_salt("activity_log")
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show_viewport(ui, |ui, viewport| {
                let layout = window.compute(viewport.min.y, viewport.height(), log.len());
                ui.set_height(layout.total_extent);
                let origin = ui.min_rect().min;
                let width = ui.available_width();
                for (index, offset) in layout.range().zip(layout.offsets.iter().copied()) {
                    let Some(event) = log.get(index) else {
                        continue;
                    };
                    let slot = egui::Rect::from_min_size(
                        origin + egui::vec2(0.0, offset),
                        egui::vec2(width, ACTIVITY_ROW_MAX_HEIGHT),
                    );
                    let mut row_ui = ui.new_child(UiBuilder::new().max_rect(slot));
                    let color = if event.is_kind(EventKind::Error) {
                        style::palette().warning
                    } else {
                        style::palette().text_primary
                    };
                    row_ui.add(
                        egui::Label::new(RichText::new(describe_event(event)).color(color))
                            .wrap(),
                    );
                    window.set_extent(index, row_ui.min_rect().height());
                }
            });
    }
}

/// One-line summary of an event for the activity log.
pub(super) fn describe_event(event: &MetricEvent) -> String {
    let mut parts = vec![format!(
        "[{}]",
        event.kind.map_or("?", |kind| kind.as_str())
    )];
    if let Some(status) = &event.status {
        parts.push(status.clone());
    }
    for (label, value) in [
        ("step", event.step),
        ("epoch", event.epoch),
        ("loss", event.loss),
        ("lr", event.lr),
    ] {
        if let Some(value) = value {
            parts.push(format!("{label}={}", format_number(value)));
        }
    }
    if let Some(percent) = event.percent {
        parts.push(format!("{percent:.1}%"));
    }
    if let Some(message) = &event.message {
        parts.push(message.clone());
    }
    parts.join(" ")
}

fn normalized_points(ring: &TelemetryRingBuffer) -> Vec<[f32; 2]> {
    let Some(([min_x, min_y], [max_x, max_y])) = ring.bounds() else {
        return Vec::new();
    };
    let span = |min: f64, max: f64| if max > min { max - min } else { 1.0 };
    let (span_x, span_y) = (span(min_x, max_x), span(min_y, max_y));
    ring.iter()
        .map(|point| {
            [
                ((point.x - min_x) / span_x) as f32,
                ((point.y - min_y) / span_y) as f32,
            ]
        })
        .collect()
}

fn format_value(value: Option<f64>) -> String {
    value.map_or_else(|| "–".to_string(), format_number)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e9 {
        format!("{value:.0}")
    } else if value.abs() >= 1e-3 {
        format!("{value:.4}")
    } else {
        format!("{value:.2e}")
    }
}

fn optional_text(value: Option<&impl std::fmt::Display>) -> String {
    value.map_or_else(|| "–".to_string(), |value| value.to_string())
}
