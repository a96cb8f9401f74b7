//! Conversation history owned by one request.

use std::collections::HashSet;

use crate::llm::{ChatMessage, Role, ToolCall};

use super::AgentError;

/// Ordered, append-only message history for a single conversation.
///
/// The first message is always the system preamble. Everything after it is
/// the transcript that callers store and replay on the next turn.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(preamble)],
        }
    }

    /// Rebuild a conversation from a stored transcript.
    ///
    /// The transcript must not carry its own system messages, and every tool
    /// message has to answer a call requested by the assistant message
    /// before it. Calls must be answered before the next user or assistant
    /// message, and call ids may not repeat. Only the final assistant message
    /// may leave calls open.
    pub fn replay(
        preamble: impl Into<String>,
        transcript: Vec<ChatMessage>,
    ) -> Result<Self, AgentError> {
        let mut open_calls: HashSet<String> = HashSet::new();
        let mut seen_calls: HashSet<&str> = HashSet::new();
        for (position, message) in transcript.iter().enumerate() {
            if message.role != Role::Tool && !open_calls.is_empty() {
                let mut unanswered: Vec<&str> = open_calls.iter().map(String::as_str).collect();
                unanswered.sort_unstable();
                return Err(AgentError::InvalidHistory(format!(
                    "message {} arrives before tool calls {} were answered",
                    position,
                    unanswered.join(", ")
                )));
            }
            match message.role {
                Role::System => {
                    return Err(AgentError::InvalidHistory(format!(
                        "message {} is a system message; the preamble is supplied by the agent",
                        position
                    )))
                }
                Role::Assistant => {
                    for call in message.requested_calls() {
                        if !seen_calls.insert(call.id.as_str()) {
                            return Err(AgentError::InvalidHistory(format!(
                                "message {} repeats tool call id '{}'",
                                position, call.id
                            )));
                        }
                        open_calls.insert(call.id.clone());
                    }
                }
                Role::Tool => {
                    let id = message.tool_call_id.as_deref().unwrap_or_default();
                    if !open_calls.remove(id) {
                        return Err(AgentError::InvalidHistory(format!(
                            "tool message {} answers unknown call '{}'",
                            position, id
                        )));
                    }
                }
                Role::User => {}
            }
        }

        let mut conversation = Self::new(preamble);
        conversation.messages.extend(transcript);
        Ok(conversation)
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
    }

    /// Full history including the preamble, as sent to the model.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// History without the preamble.
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.messages[1..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript().is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.transcript().last()
    }

    /// Text of the last message when it is a terminal assistant reply.
    pub fn final_answer(&self) -> Option<&str> {
        self.last()
            .filter(|m| is_terminal_reply(m))
            .map(|m| m.text().trim())
            .filter(|t| !t.is_empty())
    }

    /// Calls from the trailing assistant message that have no result yet.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let mut answered: HashSet<&str> = HashSet::new();
        for message in self.transcript().iter().rev() {
            match message.role {
                Role::Tool => {
                    if let Some(id) = message.tool_call_id.as_deref() {
                        answered.insert(id);
                    }
                }
                Role::Assistant => {
                    return message
                        .requested_calls()
                        .iter()
                        .filter(|c| !answered.contains(c.id.as_str()))
                        .cloned()
                        .collect();
                }
                Role::User | Role::System => return Vec::new(),
            }
        }
        Vec::new()
    }

    /// Whether there is something for the model to respond to.
    pub fn awaiting_answer(&self) -> bool {
        match self.last() {
            None => false,
            Some(message) => !is_terminal_reply(message),
        }
    }
}

fn is_terminal_reply(message: &ChatMessage) -> bool {
    message.role == Role::Assistant && !message.has_tool_calls()
}
