//! egui implementations of the frame scheduler and the popout host.

use std::time::Duration;

use eframe::egui;

use crate::telemetry::FrameScheduler;
use crate::workspace::{PanelId, PopoutHost};

/// Asks egui for a repaint after the target frame interval. egui cannot
/// revoke a repaint request, so a cancelled frame simply flushes nothing.
pub struct EguiFrameScheduler {
    ctx: egui::Context,
    interval: Duration,
    pending: bool,
}

impl EguiFrameScheduler {
    pub fn new(ctx: egui::Context, interval: Duration) -> Self {
        Self {
            ctx,
            interval,
            pending: false,
        }
    }
}

impl FrameScheduler for EguiFrameScheduler {
    fn request_frame(&mut self) {
        self.pending = true;
        self.ctx.request_repaint_after(self.interval);
    }

    fn cancel(&mut self) {
        if self.pending {
            tracing::trace!("Cancelled pending telemetry frame");
        }
        self.pending = false;
    }
}

/// Detaches panels into native egui viewports. Backends that embed
/// viewports in the main window cannot host a popout.
pub struct ViewportPopoutHost {
    embedded: bool,
}

impl ViewportPopoutHost {
    pub fn new(ctx: &egui::Context) -> Self {
        Self {
            embedded: ctx.embed_viewports(),
        }
    }
}

impl PopoutHost for ViewportPopoutHost {
    fn detach(&mut self, panel: PanelId) -> bool {
        if self.embedded {
            tracing::debug!("Viewports are embedded, keeping `{panel}` docked");
            return false;
        }
        true
    }
}

pub fn popout_viewport_id(panel: PanelId) -> egui::ViewportId {
    egui::ViewportId::from_hash_of(("runscope-popout", panel.as_str()))
}
