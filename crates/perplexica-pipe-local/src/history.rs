use perplexica_pipe_core::{HistoryEntry, Role};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Conversation history keyed by session. Append-only per session.
///
/// The lock is never held across an `.await`: callers take a snapshot, search,
/// then append.
#[derive(Debug, Default)]
pub struct HistoryStore {
    sessions: Mutex<HashMap<String, Vec<HistoryEntry>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<HistoryEntry>>> {
        // Both entries of a turn are pushed under one guard; poisoning is ignored.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self, session: &str) -> Vec<HistoryEntry> {
        self.lock().get(session).cloned().unwrap_or_default()
    }

    /// Append one completed turn: the human query, then the assistant reply.
    pub fn record_turn(&self, session: &str, query: &str, response: &str) {
        let mut g = self.lock();
        let h = g.entry(session.to_string()).or_default();
        h.push(HistoryEntry(Role::Human, query.to_string()));
        h.push(HistoryEntry(Role::Assistant, response.to_string()));
    }

    pub fn len(&self, session: &str) -> usize {
        self.lock().get(session).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, session: &str) -> bool {
        self.len(session) == 0
    }

}
