use crate::message::{Message, MessageContent};

/// Message history carried between queries.
///
/// The history either is empty or starts with the single system message of the last
/// committed round.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    history: Vec<Message>,
    enabled: bool,
}

impl Conversation {
    pub fn new(enabled: bool) -> Self {
        Self {
            history: Vec::new(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Builds the working message list for a new query.
    ///
    /// A system message at the head of the history is replaced by `system_prompt`, so the
    /// model always sees the current tool catalog.
    pub fn compose(&self, system_prompt: &str, query: &str) -> Vec<Message> {
        let mut messages = if self.enabled && !self.history.is_empty() {
            self.history.clone()
        } else {
            Vec::new()
        };

        match messages.first_mut() {
            Some(first) if first.is_system() => {
                first.content = MessageContent::Text(system_prompt.to_string());
            }
            _ => messages.insert(0, Message::system(system_prompt)),
        }
        messages.push(Message::user(query));
        messages
    }

    /// A copy of the stored history.
    pub fn history(&self) -> Vec<Message> {
        self.history.clone()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Stores the finished working list, if history is kept at all.
    pub fn commit(&mut self, working: Vec<Message>) {
        if self.enabled {
            self.history = working;
        }
    }
}
