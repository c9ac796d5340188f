//! Ordered navigation history with a cursor
//!
//! Used by engines whose content host has no native history of its own.

use serde::{Deserialize, Serialize};

/// Oldest entries are dropped beyond this many.
const MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationHistory<T> {
    entries: Vec<T>,
    cursor: Option<usize>,
}

impl<T> NavigationHistory<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
        }
    }

    /// Record a new entry after the cursor, discarding forward entries.
    pub fn push(&mut self, entry: T) {
        if let Some(cursor) = self.cursor {
            self.entries.truncate(cursor + 1);
        }
        self.entries.push(entry);

        if self.entries.len() > MAX_ENTRIES {
            let overflow = self.entries.len() - MAX_ENTRIES;
            self.entries.drain(0..overflow);
        }

        self.cursor = Some(self.entries.len() - 1);
    }

    /// Overwrite the entry under the cursor (used after a reload).
    pub fn replace_current(&mut self, entry: T) {
        match self.cursor {
            Some(cursor) => self.entries[cursor] = entry,
            None => self.push(entry),
        }
    }

    pub fn current(&self) -> Option<&T> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn can_go_back(&self) -> bool {
        matches!(self.cursor, Some(c) if c > 0)
    }

    pub fn can_go_forward(&self) -> bool {
        matches!(self.cursor, Some(c) if c + 1 < self.entries.len())
    }

    /// Move the cursor one entry back.
    pub fn back(&mut self) -> Option<&T> {
        if !self.can_go_back() {
            return None;
        }
        self.cursor = self.cursor.map(|c| c - 1);
        self.current()
    }

    /// Move the cursor one entry forward.
    pub fn forward(&mut self) -> Option<&T> {
        if !self.can_go_forward() {
            return None;
        }
        self.cursor = self.cursor.map(|c| c + 1);
        self.current()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for NavigationHistory<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_and_forward() {
        let mut history = NavigationHistory::new();
        history.push("a");
        history.push("b");
        history.push("c");

        assert!(history.can_go_back());
        assert!(!history.can_go_forward());
        assert_eq!(history.back(), Some(&"b"));
        assert_eq!(history.back(), Some(&"a"));
        assert_eq!(history.back(), None);
        assert_eq!(history.current(), Some(&"a"));
        assert_eq!(history.forward(), Some(&"b"));
    }

    #[test]
    fn test_push_truncates_forward_entries() {
        let mut history = NavigationHistory::new();
        history.push("a");
        history.push("b");
        history.push("c");
        history.back();
        history.back();
        history.push("d");

        assert_eq!(history.len(), 2);
        assert_eq!(history.current(), Some(&"d"));
        assert!(!history.can_go_forward());
        assert_eq!(history.back(), Some(&"a"));
    }

    #[test]
    fn test_capped_length() {
        let mut history = NavigationHistory::new();
        for i in 0..(MAX_ENTRIES + 10) {
            history.push(i);
        }
        assert_eq!(history.len(), MAX_ENTRIES);
        assert_eq!(history.current(), Some(&(MAX_ENTRIES + 9)));
    }

    #[test]
    fn test_empty_history() {
        let mut history: NavigationHistory<u8> = NavigationHistory::new();
        assert!(history.current().is_none());
        assert!(!history.can_go_back());
        assert!(history.forward().is_none());
        history.replace_current(7);
        assert_eq!(history.current(), Some(&7));
    }
}
