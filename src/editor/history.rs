//! Snapshot ring for undo/redo.
//!
//! The ring always holds at least one entry. Index 0 is the oldest state
//! still reachable; once the ring is full the oldest snapshot is dropped on
//! every push.

use super::types::TimelineTrack;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryState {
    pub tracks: Vec<TimelineTrack>,
    pub duration: f64,
}

#[derive(Debug)]
pub struct History {
    entries: Vec<HistoryState>,
    index: usize,
    limit: usize,
}

impl History {
    pub fn new(initial: HistoryState, limit: usize) -> Self {
        Self {
            entries: vec![initial],
            index: 0,
            limit: limit.max(1),
        }
    }

    /// Record a new state, discarding any redo branch.
    pub fn push(&mut self, state: HistoryState) {
        self.entries.truncate(self.index + 1);
        self.entries.push(state);
        if self.entries.len() > self.limit {
            let overflow = self.entries.len() - self.limit;
            self.entries.drain(..overflow);
        }
        self.index = self.entries.len() - 1;
        tracing::debug!(depth = self.entries.len(), "history snapshot pushed");
    }

    pub fn undo(&mut self) -> Option<&HistoryState> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        self.entries.get(self.index)
    }

    pub fn redo(&mut self) -> Option<&HistoryState> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        self.entries.get(self.index)
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Forget everything and start over from `state`
    pub fn reset(&mut self, state: HistoryState) {
        self.entries = vec![state];
        self.index = 0;
    }
}
