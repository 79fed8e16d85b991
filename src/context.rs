//! Rolling conversation window given to remote interpretation calls.

use std::collections::VecDeque;
use std::fmt;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Agent => f.write_str("agent"),
        }
    }
}

/// One conversational turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Bounded window of recent turns. Never persisted beyond the session;
/// eviction keeps both the turn count and the byte budget under their caps.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    turns: VecDeque<Turn>,
    max_turns: usize,
    max_bytes: usize,
    bytes: usize,
}

impl ConversationContext {
    pub fn new(max_turns: usize, max_bytes: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
            max_bytes,
            bytes: 0,
        }
    }

    /// Append a turn, evicting the oldest turns until the caps hold.
    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        let text = text.into();
        self.bytes += text.len();
        self.turns.push_back(Turn { role, text });
        while self.turns.len() > self.max_turns || (self.bytes > self.max_bytes && self.turns.len() > 1)
        {
            if let Some(evicted) = self.turns.pop_front() {
                self.bytes -= evicted.text.len();
            }
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render as a plain transcript, one `role: text` line per turn.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.bytes + self.turns.len() * 8);
        for turn in &self.turns {
            out.push_str(&format!("{}: {}\n", turn.role, turn.text));
        }
        out
    }
}
