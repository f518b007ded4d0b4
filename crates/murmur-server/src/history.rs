use std::collections::VecDeque;

use murmur_shared::frame::ChatMessage;

/// The last `capacity` chat messages, oldest evicted first.
#[derive(Debug)]
pub struct History {
    capacity: usize,
    messages: VecDeque<ChatMessage>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        if self.capacity == 0 {
            return;
        }
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    /// Up to `limit` messages, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        self.messages.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}
