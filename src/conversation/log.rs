use super::types::ConversationTurn;

/// Outcome of replacing the log, used to decide whether to scroll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogChange {
    pub previous_len: usize,
    pub len: usize,
    /// Whether the content differs from what was there before
    pub changed: bool,
}

impl LogChange {
    /// Whether new turns appeared
    pub fn grew(&self) -> bool {
        self.len > self.previous_len
    }
}

/// Ordered conversation history, replaced wholesale on every sync
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in the backend's sequence as-is
    pub fn replace(&mut self, turns: Vec<ConversationTurn>) -> LogChange {
        let previous_len = self.turns.len();
        let changed = self.turns != turns;
        self.turns = turns;
        LogChange {
            previous_len,
            len: self.turns.len(),
            changed,
        }
    }

    pub fn clear(&mut self) -> LogChange {
        self.replace(Vec::new())
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
