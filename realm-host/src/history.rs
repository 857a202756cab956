//! Session history stack.

use realm_script::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

/// One session history entry.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub state: Value,
    pub url: String,
}

pub(crate) struct HistoryStack {
    next_id: u64,
    entries: Vec<HistoryEntry>,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: vec![HistoryEntry {
                id: EntryId(0),
                state: Value::Null,
                url: "/".to_string(),
            }],
        }
    }
}

impl HistoryStack {
    pub(crate) fn current(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    fn current_url(&self) -> String {
        self.current().map(|e| e.url.clone()).unwrap_or_else(|| "/".to_string())
    }

    pub(crate) fn push(&mut self, state: Value, url: Option<String>) -> EntryId {
        self.next_id += 1;
        let id = EntryId(self.next_id);
        let url = url.unwrap_or_else(|| self.current_url());
        self.entries.push(HistoryEntry { id, state, url });
        id
    }

    /// Replaces the current entry's state and url, returning what it held before.
    pub(crate) fn replace(&mut self, state: Value, url: Option<String>) -> Option<HistoryEntry> {
        let url = url.unwrap_or_else(|| self.current_url());
        let current = self.entries.last_mut()?;
        let previous = current.clone();
        current.state = state;
        current.url = url;
        Some(previous)
    }

    /// Pops the current entry if there is one to go back to.
    pub(crate) fn back(&mut self) -> Option<&HistoryEntry> {
        if self.entries.len() <= 1 {
            return None;
        }
        self.entries.pop();
        self.entries.last()
    }

    pub(crate) fn remove(&mut self, id: EntryId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub(crate) fn restore(&mut self, id: EntryId, state: Value, url: String) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.state = state;
                entry.url = url;
                true
            }
            None => false,
        }
    }

    pub(crate) fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_replace_and_restore() {
        let mut history = HistoryStack::default();
        let pushed = history.push(Value::Number(1.0), Some("/a".into()));
        let previous = history.replace(Value::Number(2.0), None).unwrap();
        assert_eq!(previous.id, pushed);
        assert_eq!(previous.url, "/a");

        assert!(history.restore(pushed, previous.state, "/b".into()));
        assert_eq!(history.current().unwrap().url, "/b");
        assert!(history.remove(pushed));
        assert_eq!(history.entries().len(), 1);
    }

    #[test]
    fn back_never_pops_the_initial_entry() {
        let mut history = HistoryStack::default();
        assert!(history.back().is_none());
        history.push(Value::Null, Some("/x".into()));
        assert_eq!(history.back().map(|e| e.url.clone()), Some("/".to_string()));
    }
}
