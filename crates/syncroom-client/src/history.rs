//! Bounded undo/redo stacks.
//!
//! Entries are ordered item sequences; an item is either a storage op or a
//! partial-presence snapshot. Replaying an entry as local both restores state
//! and produces the inverse entry for the opposite stack.

use syncroom_crdt::{JsonObject, Op};

/// Oldest entries are discarded once the undo stack holds this many.
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryItem {
    Op(Op),
    Presence(JsonObject),
}

pub type HistoryEntry = Vec<HistoryItem>;

/// Snapshot for `history` subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEvent {
    pub can_undo: bool,
    pub can_redo: bool,
}

#[derive(Debug, Default)]
pub struct History {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    /// While paused, appends collect here and land as one entry on resume.
    paused: Option<Vec<HistoryItem>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn event(&self) -> HistoryEvent {
        HistoryEvent {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
        }
    }

    /// Record an entry, either onto the undo stack or into the paused
    /// collector. Empty entries are ignored.
    ///
    /// Paused entries are prepended: the collector is itself an entry, so
    /// later reverses must replay before earlier ones.
    pub fn record(&mut self, entry: HistoryEntry) {
        if entry.is_empty() {
            return;
        }
        match &mut self.paused {
            Some(collector) => {
                collector.splice(0..0, entry);
            }
            None => self.push_undo(entry),
        }
    }

    pub fn push_undo(&mut self, entry: HistoryEntry) {
        if entry.is_empty() {
            return;
        }
        self.undo.push(entry);
        if self.undo.len() > HISTORY_LIMIT {
            self.undo.remove(0);
        }
    }

    pub fn push_redo(&mut self, entry: HistoryEntry) {
        if !entry.is_empty() {
            self.redo.push(entry);
        }
    }

    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    pub fn clear_redo(&mut self) {
        self.redo.clear();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }

    /// Start redirecting appends. Pausing twice keeps the first collector.
    pub fn pause(&mut self) {
        if self.paused.is_none() {
            self.paused = Some(Vec::new());
        }
    }

    /// Stop redirecting and flush whatever collected as a single entry.
    pub fn resume(&mut self) {
        if let Some(collected) = self.paused.take() {
            self.push_undo(collected);
        }
    }

    #[cfg(test)]
    pub(crate) fn undo_len(&self) -> usize {
        self.undo.len()
    }
}
