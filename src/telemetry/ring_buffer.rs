//! Frame-batched, capacity-bounded buffer of plotted telemetry points.
//!
//! Writes land in a pending batch and become visible together on the next
//! frame, so a renderer redraws at most once per frame however fast points
//! arrive.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::runs::{EventKind, EventTime, MetricEvent};

pub const MIN_CAPACITY: usize = 1_000;
pub const MAX_CAPACITY: usize = 50_000;
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Clamp a requested buffer capacity into the supported range.
pub fn clamp_capacity(capacity: usize) -> usize {
    capacity.clamp(MIN_CAPACITY, MAX_CAPACITY)
}

/// Plottable sample derived from a telemetry event.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryPoint {
    pub x: f64,
    pub y: f64,
    pub step: Option<f64>,
    pub loss: Option<f64>,
    pub lr: Option<f64>,
    pub grad_norm: Option<f64>,
    pub ts: Option<EventTime>,
}

impl TelemetryPoint {
    /// Project a telemetry event onto the plot. Events with `proj_x`/`proj_y`
    /// use the projection; otherwise `(step, loss)` is used when both exist.
    pub fn from_event(event: &MetricEvent) -> Option<Self> {
        if !event.is_kind(EventKind::Telemetry) {
            return None;
        }
        let (x, y) = match (event.proj_x, event.proj_y) {
            (Some(x), Some(y)) => (x, y),
            _ => (event.step?, event.loss?),
        };
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        Some(Self {
            x,
            y,
            step: event.step,
            loss: event.loss,
            lr: event.lr,
            grad_norm: event.grad_norm,
            ts: event.ts.clone(),
        })
    }
}

/// Host hook that runs [`TelemetryRingBuffer::on_frame`] on the next frame.
pub trait FrameScheduler: Send {
    /// Ask the host for one more frame.
    fn request_frame(&mut self);
    /// Withdraw an outstanding request, if the host supports it.
    fn cancel(&mut self);
}

/// Scheduler for tests and headless hosts: records requests, the caller
/// drives frames by calling `on_frame` itself.
#[derive(Clone, Debug, Default)]
pub struct ManualScheduler {
    requested: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    pending: Arc<AtomicBool>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> usize {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) {
        self.requested.fetch_add(1, Ordering::SeqCst);
        self.pending.store(true, Ordering::SeqCst);
    }

    fn cancel(&mut self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.pending.store(false, Ordering::SeqCst);
    }
}

pub struct TelemetryRingBuffer {
    visible: VecDeque<TelemetryPoint>,
    pending: Vec<TelemetryPoint>,
    capacity: usize,
    flush_scheduled: bool,
    revision: u64,
    scheduler: Box<dyn FrameScheduler>,
}

impl TelemetryRingBuffer {
    pub fn new(capacity: usize, scheduler: Box<dyn FrameScheduler>) -> Self {
        let capacity = clamp_capacity(capacity);
        Self {
            visible: VecDeque::with_capacity(capacity),
            pending: Vec::new(),
            capacity,
            flush_scheduled: false,
            revision: 0,
            scheduler,
        }
    }

    pub fn with_manual_scheduler(capacity: usize) -> (Self, ManualScheduler) {
        let scheduler = ManualScheduler::new();
        (Self::new(capacity, Box::new(scheduler.clone())), scheduler)
    }

    /// Queue a point for the next flush. Only the first push of a batch asks
    /// the scheduler for a frame.
    pub fn push(&mut self, point: TelemetryPoint) {
        self.pending.push(point);
        if !self.flush_scheduled {
            self.flush_scheduled = true;
            self.scheduler.request_frame();
        }
    }

    /// Frame callback: flushes when a flush is outstanding.
    pub fn on_frame(&mut self) -> bool {
        if self.flush_scheduled {
            self.flush()
        } else {
            false
        }
    }

    /// Move the pending batch into the visible buffer and evict from the
    /// front down to capacity. Returns whether visible data changed.
    pub fn flush(&mut self) -> bool {
        self.flush_scheduled = false;
        if self.pending.is_empty() {
            return false;
        }
        self.visible.extend(self.pending.drain(..));
        self.evict_overflow();
        self.revision += 1;
        true
    }

    /// Drop all pending and visible points and cancel the scheduled flush.
    pub fn reset(&mut self) {
        if self.flush_scheduled {
            self.scheduler.cancel();
            self.flush_scheduled = false;
        }
        self.pending.clear();
        if !self.visible.is_empty() {
            self.visible.clear();
            self.revision += 1;
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = clamp_capacity(capacity);
        if self.visible.len() > self.capacity {
            self.evict_overflow();
            self.revision += 1;
        }
    }

    pub fn set_scheduler(&mut self, scheduler: Box<dyn FrameScheduler>) {
        if self.flush_scheduled {
            self.scheduler.cancel();
        }
        self.scheduler = scheduler;
        if self.flush_scheduled {
            self.scheduler.request_frame();
        }
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }

    /// Bumped once per flush that changed the visible points.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &TelemetryPoint> {
        self.visible.iter()
    }

    pub fn first(&self) -> Option<&TelemetryPoint> {
        self.visible.front()
    }

    pub fn last(&self) -> Option<&TelemetryPoint> {
        self.visible.back()
    }

    /// Data bounds of the visible points as `([min_x, min_y], [max_x, max_y])`.
    pub fn bounds(&self) -> Option<([f64; 2], [f64; 2])> {
        let mut points = self.visible.iter();
        let first = points.next()?;
        let mut min = [first.x, first.y];
        let mut max = [first.x, first.y];
        for point in points {
            min[0] = min[0].min(point.x);
            min[1] = min[1].min(point.y);
            max[0] = max[0].max(point.x);
            max[1] = max[1].max(point.y);
        }
        Some((min, max))
    }

    fn evict_overflow(&mut self) {
        if self.visible.len() > self.capacity {
            let excess = self.visible.len() - self.capacity;
            self.visible.drain(..excess);
        }
    }
}

impl std::fmt::Debug for TelemetryRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRingBuffer")
            .field("visible", &self.visible.len())
            .field("pending", &self.pending.len())
            .field("capacity", &self.capacity)
            .field("flush_scheduled", &self.flush_scheduled)
            .field("revision", &self.revision)
            .finish()
    }
}
