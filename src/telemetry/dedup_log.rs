//! Bounded, duplicate-free event log.
//!
//! Historical snapshots and live streams overlap, so the same event is often
//! delivered twice. Every event is fingerprinted over all of its
//! discriminating fields and admitted only once.

use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;

use crate::runs::MetricEvent;

/// Maximum number of events retained per run.
pub const MAX_EVENTS: usize = 5_000;

const MISSING: &str = "~";

/// Fingerprint of a [`MetricEvent`]. Two events with equal keys are the same
/// event regardless of which channel delivered them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn of(event: &MetricEvent) -> Self {
        let mut key = String::with_capacity(128);
        push_text(&mut key, event.kind.map(|kind| kind.as_str()));
        match &event.ts {
            Some(ts) => push_text(&mut key, Some(&ts.to_string())),
            None => push_text(&mut key, None),
        }
        push_text(&mut key, event.status.as_deref());
        push_number(&mut key, event.step);
        push_number(&mut key, event.epoch);
        push_number(&mut key, event.percent);
        push_text(&mut key, event.message.as_deref());
        push_number(&mut key, event.loss);
        push_number(&mut key, event.lr);
        push_number(&mut key, event.grad_norm);
        push_number(&mut key, event.proj_x);
        push_number(&mut key, event.proj_y);
        for (name, value) in &event.metrics {
            let _ = write!(key, "{}:{name}={value};", name.len());
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Text is length-prefixed so separators inside messages cannot shift fields.
fn push_text(key: &mut String, value: Option<&str>) {
    match value {
        Some(text) => {
            let _ = write!(key, "{}:{text}", text.len());
        }
        None => key.push_str(MISSING),
    }
    key.push('|');
}

fn push_number(key: &mut String, value: Option<f64>) {
    match value {
        Some(number) => {
            let _ = write!(key, "{number}");
        }
        None => key.push_str(MISSING),
    }
    key.push('|');
}

/// Result of [`DedupKeyedLog::append`].
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Append {
    pub accepted: bool,
}

/// Append-only event log with duplicate suppression, capped at
/// [`MAX_EVENTS`] by dropping the oldest events.
#[derive(Clone, Debug)]
pub struct DedupKeyedLog {
    events: VecDeque<MetricEvent>,
    keys: HashSet<DedupKey>,
    capacity: usize,
    evicted: usize,
}

impl Default for DedupKeyedLog {
    fn default() -> Self {
        Self::with_capacity(MAX_EVENTS)
    }
}

impl DedupKeyedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(MAX_EVENTS)),
            keys: HashSet::with_capacity(capacity.min(MAX_EVENTS)),
            capacity,
            evicted: 0,
        }
    }

    pub fn append(&mut self, event: MetricEvent) -> Append {
        let key = DedupKey::of(&event);
        if !self.keys.insert(key) {
            return Append { accepted: false };
        }
        self.events.push_back(event);
        if self.events.len() > self.capacity {
            let excess = self.events.len() - self.capacity;
            for evicted in self.events.drain(..excess) {
                self.keys.remove(&DedupKey::of(&evicted));
            }
            self.evicted += excess;
        }
        Append { accepted: true }
    }

    /// Drop every event and fingerprint. Must run before a new run's events
    /// are admitted.
    pub fn reset(&mut self) {
        self.events.clear();
        self.keys.clear();
        self.evicted = 0;
    }

    pub fn contains(&self, event: &MetricEvent) -> bool {
        self.keys.contains(&DedupKey::of(event))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&MetricEvent> {
        self.events.get(index)
    }

    pub fn last(&self) -> Option<&MetricEvent> {
        self.events.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MetricEvent> + ExactSizeIterator {
        self.events.iter()
    }

    /// Number of accepted events evicted from the front since the last reset.
    /// The event at index `i` was the `evicted() + i`-th accepted event.
    pub fn evicted(&self) -> usize {
        self.evicted
    }
}
