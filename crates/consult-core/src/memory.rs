//! Bounded per-user conversation memory.
//!
//! Memory is the ordered list of recent turns stored on a [`UserProfile`].
//! It holds at most `max_turns` entries; appending past the bound evicts the
//! oldest turns first. The unbounded audit trail lives in the dialog log, not
//! here.

use chrono::{DateTime, Utc};

use crate::models::{ConversationTurn, Role, UserProfile};

/// Default number of turns kept per user.
pub const DEFAULT_MAX_TURNS: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct ConversationMemory {
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Append one turn and evict FIFO down to the bound.
    pub fn append(&self, profile: &mut UserProfile, role: Role, text: &str, at: DateTime<Utc>) {
        profile.history.push(ConversationTurn {
            role,
            text: text.to_string(),
            timestamp: at,
        });
        if profile.history.len() > self.max_turns {
            let excess = profile.history.len() - self.max_turns;
            profile.history.drain(..excess);
        }
        profile.updated_at = at;
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

/// The last `n` turns, oldest first.
pub fn recent(history: &[ConversationTurn], n: usize) -> &[ConversationTurn] {
    let start = history.len().saturating_sub(n);
    &history[start..]
}

/// The most recent answered exchange: an assistant turn and the user turn
/// right before it.
pub fn last_exchange(history: &[ConversationTurn]) -> Option<(&ConversationTurn, &ConversationTurn)> {
    history
        .windows(2)
        .rev()
        .find(|pair| pair[0].role == Role::User && pair[1].role == Role::Assistant)
        .map(|pair| (&pair[0], &pair[1]))
}
