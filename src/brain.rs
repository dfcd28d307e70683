//! # Brain module (conversation memory)
//!
//! The **brain** is the in-process memory of one conversation: an ordered queue
//! of [`Memory`] turns (user and assistant) that the
//! [`ConversationEngine`](crate::engine::ConversationEngine) replays into each
//! prompt for continuity.
//!
//! - Turns are appended at the back and evicted from the front.
//! - After every append, at most `max_memories` turns are retained.
//! - [`Brain::recent`] hands out the tail that gets replayed.
//!
//! ## Quick start
//! ```rust
//! use awful_rag::brain::{Brain, Memory};
//! use async_openai::types::chat::Role;
//!
//! let mut brain = Brain::new(4);
//! for i in 0..6 {
//!     brain.add_memory(Memory::new(Role::User, format!("turn {i}")));
//! }
//! assert_eq!(brain.len(), 4);
//! assert_eq!(brain.recent(2)[1].content, "turn 5");
//! ```

use async_openai::types::chat::Role;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Turns kept after each append.
pub const DEFAULT_MAX_MEMORIES: usize = 20;

/// A single conversational turn (role + content).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Memory {
    /// The role of the message (User / Assistant / System).
    pub role: Role,
    /// The textual content of the message.
    pub content: String,
}

impl Memory {
    pub fn new(role: Role, content: String) -> Self {
        Self { role, content }
    }
}

/// Bounded FIFO of conversation turns.
#[derive(Debug)]
pub struct Brain {
    /// Oldest turn at the front.
    pub memories: VecDeque<Memory>,
    pub max_memories: usize,
}

impl Default for Brain {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORIES)
    }
}

impl Brain {
    pub fn new(max_memories: usize) -> Self {
        Self {
            memories: VecDeque::with_capacity(max_memories + 1),
            max_memories,
        }
    }

    /// Push a turn, then drop the oldest turns beyond `max_memories`.
    pub fn add_memory(&mut self, memory: Memory) {
        self.memories.push_back(memory);
        self.enforce_limit();
    }

    fn enforce_limit(&mut self) {
        while self.memories.len() > self.max_memories {
            debug!("Memory holds more than {} turns, removing oldest", self.max_memories);
            self.memories.pop_front();
        }
    }

    /// Up to `n` most recent turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Memory> {
        let skip = self.memories.len().saturating_sub(n);
        self.memories.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.memories.clear();
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }
}
