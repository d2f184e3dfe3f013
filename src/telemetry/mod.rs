//! Live telemetry ingestion: duplicate suppression plus frame-batched plotting.

pub mod dedup_log;
pub mod ring_buffer;

pub use dedup_log::{Append, DedupKey, DedupKeyedLog, MAX_EVENTS};
pub use ring_buffer::{
    FrameScheduler, ManualScheduler, TelemetryPoint, TelemetryRingBuffer, clamp_capacity,
};

use crate::runs::MetricEvent;

/// Outcome of [`IngestPipeline::admit`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Admission {
    pub accepted: bool,
    pub plotted: bool,
}

/// Single entry point for events of the selected run, whether they come from
/// the history snapshot or the live stream.
#[derive(Debug)]
pub struct IngestPipeline {
    log: DedupKeyedLog,
    ring: TelemetryRingBuffer,
}

impl IngestPipeline {
    pub fn new(ring: TelemetryRingBuffer) -> Self {
        Self {
            log: DedupKeyedLog::new(),
            ring,
        }
    }

    pub fn with_manual_scheduler(capacity: usize) -> (Self, ManualScheduler) {
        let (ring, scheduler) = TelemetryRingBuffer::with_manual_scheduler(capacity);
        (Self::new(ring), scheduler)
    }

    /// Log the event unless it is a duplicate; accepted telemetry events that
    /// carry a plottable sample are queued on the ring buffer.
    pub fn admit(&mut self, event: MetricEvent) -> Admission {
        let point = TelemetryPoint::from_event(&event);
        if !self.log.append(event).accepted {
            return Admission::default();
        }
        let plotted = match point {
            Some(point) => {
                self.ring.push(point);
                true
            }
            None => false,
        };
        Admission {
            accepted: true,
            plotted,
        }
    }

    pub fn reset(&mut self) {
        self.log.reset();
        self.ring.reset();
    }

    pub fn on_frame(&mut self) -> bool {
        self.ring.on_frame()
    }

    pub fn log(&self) -> &DedupKeyedLog {
        &self.log
    }

    pub fn ring(&self) -> &TelemetryRingBuffer {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut TelemetryRingBuffer {
        &mut self.ring
    }
}
