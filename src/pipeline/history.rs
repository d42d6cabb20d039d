//! Bounded conversation history used as suggestion context.

use std::collections::VecDeque;

/// One conversation turn. `translated` starts empty and is filled in place
/// once translation completes, so prompts built for in-flight suggestion
/// requests always see the best-available context.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTurn {
    pub speaker: String,
    pub original: String,
    pub translated: String,
}

impl HistoryTurn {
    pub fn new(speaker: impl Into<String>, original: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            original: original.into(),
            translated: String::new(),
        }
    }

    /// Text to use when rendering this turn into a prompt: the translation
    /// when present, the original otherwise.
    pub fn text_for_prompt(&self) -> &str {
        if self.translated.trim().is_empty() {
            &self.original
        } else {
            &self.translated
        }
    }
}

/// Ordered (oldest-first) sequence of turns capped at a fixed size.
/// Inserting at capacity evicts the oldest turn; the size never exceeds
/// the cap.
#[derive(Debug)]
pub struct ConversationHistory {
    turns: VecDeque<HistoryTurn>,
    capacity: usize,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, evicting the oldest when full.
    pub fn push(&mut self, turn: HistoryTurn) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Fill the most recent turn's translation in place.
    pub fn set_last_translation(&mut self, translated: impl Into<String>) {
        if let Some(turn) = self.turns.back_mut() {
            turn.translated = translated.into();
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryTurn> {
        self.turns.iter()
    }

    /// Owned copy of the current turns, oldest first. Taken while holding
    /// the history lock so suggestion requests see a consistent view.
    pub fn snapshot(&self) -> Vec<HistoryTurn> {
        self.turns.iter().cloned().collect()
    }
}
