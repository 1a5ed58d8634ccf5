use std::collections::VecDeque;

/// A step that has been committed to the tone generator, waiting for the
/// clock to reach its firing time so the UI can show it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedStep {
    pub index: usize,
    pub time: f64,
    pub preview: bool,
    pub disabled: bool,
}

/// What a single-highlight view should light up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Highlight {
    pub index: usize,
    pub preview: bool,
}

impl QueuedStep {
    /// Disabled steps are never lit. Main-sequence steps at or past the
    /// current active length are suppressed; preview steps ignore it.
    pub fn highlight(&self, active_len: usize) -> Option<Highlight> {
        if self.disabled {
            return None;
        }
        if !self.preview && self.index >= active_len {
            return None;
        }
        Some(Highlight { index: self.index, preview: self.preview })
    }
}

/// Entries kept when nobody is draining the queue; the oldest go first.
pub const CAPACITY: usize = 256;

/// FIFO of committed steps. Entries arrive in firing-time order.
#[derive(Debug, Default)]
pub struct EventQueue {
    entries: VecDeque<QueuedStep>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueuedStep) {
        debug_assert!(
            self.entries.back().map_or(true, |last| last.time <= entry.time),
            "queue entries must be pushed in time order"
        );
        if self.entries.len() >= CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Pops every entry due at or before `now` and returns the last one.
    /// Older entries in the same batch are superseded and dropped.
    pub fn drain_due(&mut self, now: f64) -> Option<QueuedStep> {
        let mut last = None;
        while self.entries.front().is_some_and(|e| e.time <= now) {
            last = self.entries.pop_front();
        }
        last
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
