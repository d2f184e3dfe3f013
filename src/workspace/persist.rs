use std::time::{Duration, Instant};

/// Quiet period a layout must survive before it is written.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(750);

/// Debounces serialized layouts so a drag produces one write, and skips
/// documents identical to the last one written.
#[derive(Debug)]
pub struct LayoutPersister {
    settle: Duration,
    last_persisted: Option<String>,
    pending: Option<(String, Instant)>,
}

impl Default for LayoutPersister {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE)
    }
}

impl LayoutPersister {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            last_persisted: None,
            pending: None,
        }
    }

    /// Treat `document` as already on disk, e.g. the one loaded at startup.
    pub fn mark_persisted(&mut self, document: impl Into<String>) {
        self.last_persisted = Some(document.into());
        self.pending = None;
    }

    /// Note a new layout; restarts the settle timer.
    pub fn record(&mut self, document: String, now: Instant) {
        if self.last_persisted.as_deref() == Some(document.as_str()) {
            self.pending = None;
            return;
        }
        self.pending = Some((document, now));
    }

    /// Document to write once it has settled.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        let (_, recorded) = self.pending.as_ref()?;
        if now.saturating_duration_since(*recorded) < self.settle {
            return None;
        }
        self.take_pending()
    }

    /// Pending document regardless of the settle timer, for shutdown.
    pub fn flush(&mut self) -> Option<String> {
        self.take_pending()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_persisted(&self) -> Option<&str> {
        self.last_persisted.as_deref()
    }

    fn take_pending(&mut self) -> Option<String> {
        let (document, _) = self.pending.take()?;
        self.last_persisted = Some(document.clone());
        Some(document)
    }
}
