use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Maximum number of turns an agent remembers.
pub const MAX_HISTORY: usize = 15;

/// Who spoke a turn. Serialized the way the generation service names roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            speaker: Role::Model,
            text: text.into(),
        }
    }
}

/// Bounded turn log. Oldest turns are evicted first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::with_capacity(MAX_HISTORY)
    }
}

impl ConversationHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Turn::user(text));
    }

    pub fn push_model(&mut self, text: impl Into<String>) {
        self.push(Turn::model(text));
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Unbounded chat log kept for the "full chat log" view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: String,
    pub text: String,
}

impl Transcript {
    pub fn record(&mut self, speaker: impl Into<String>, text: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            speaker: speaker.into(),
            text: text.into(),
        });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render turns as `role: text` lines for raw prompts.
pub fn format_turns(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "(no recent chat)".into();
    }
    turns
        .iter()
        .map(|t| format!("{}: {}", t.speaker.as_str(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut history = ConversationHistory::default();
        for i in 0..40 {
            if i % 2 == 0 {
                history.push_user(format!("u{i}"));
            } else {
                history.push_model(format!("m{i}"));
            }
            assert!(history.len() <= MAX_HISTORY);
        }

        let turns = history.turns();
        assert_eq!(turns.len(), MAX_HISTORY);
        assert_eq!(turns[0], Turn::model("m25"));
        assert_eq!(turns[MAX_HISTORY - 1], Turn::model("m39"));
        let order: Vec<usize> = turns
            .iter()
            .map(|t| t.text[1..].parse().unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut history = ConversationHistory::default();
        history.push_user("a");
        history.push_model("b");
        history.push_user("c");

        assert_eq!(history.recent(2), vec![Turn::model("b"), Turn::user("c")]);
        assert_eq!(history.recent(10).len(), 3);
    }

    #[test]
    fn formats_turns_for_prompts() {
        let turns = vec![Turn::user("hi"), Turn::model("hey there")];
        assert_eq!(format_turns(&turns), "user: hi\nmodel: hey there");
        assert_eq!(format_turns(&[]), "(no recent chat)");
    }
}
