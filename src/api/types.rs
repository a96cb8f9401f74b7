//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::agent::{AgentError, AgentEvent, TurnOutcome, TurnStatus};
use crate::llm::ChatMessage;

/// Shown to the user when a turn fails.
pub const FAILURE_MESSAGE: &str = "I encountered an error and couldn't complete your request.";

/// Shown to the user when a turn ends without a usable answer.
pub const NO_ANSWER_MESSAGE: &str = "I'm not sure how to respond to that or an issue occurred.";

/// Request to run one conversational turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurnRequest {
    /// Transcript returned by previous turns (no system preamble).
    #[serde(default)]
    pub history: Vec<ChatMessage>,

    /// The new user message.
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Answered,
    NoAnswer,
    LimitExceeded,
    Failed,
}

/// Result of one turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurnResponse {
    pub status: ChatStatus,

    /// Text to display. Falls back to a fixed message when there is no answer.
    pub answer: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Model calls made during the turn.
    pub iterations: usize,

    /// Updated transcript to send back as `history` next time.
    pub messages: Vec<ChatMessage>,

    pub trace: Vec<AgentEvent>,
}

impl ChatTurnResponse {
    pub fn new(
        result: Result<TurnOutcome, AgentError>,
        messages: Vec<ChatMessage>,
        trace: Vec<AgentEvent>,
    ) -> Self {
        let (status, answer, error, iterations) = match result {
            Ok(outcome) => match outcome.status {
                TurnStatus::Answered(text) => (ChatStatus::Answered, text, None, outcome.iterations),
                TurnStatus::NoAnswer => (
                    ChatStatus::NoAnswer,
                    NO_ANSWER_MESSAGE.to_string(),
                    None,
                    outcome.iterations,
                ),
                TurnStatus::LimitExceeded => (
                    ChatStatus::LimitExceeded,
                    NO_ANSWER_MESSAGE.to_string(),
                    Some(format!(
                        "No final answer after {} model calls",
                        outcome.iterations
                    )),
                    outcome.iterations,
                ),
            },
            Err(e) => {
                let iterations = trace
                    .iter()
                    .find_map(|event| match event {
                        AgentEvent::Failed { iterations, .. } => Some(*iterations),
                        _ => None,
                    })
                    .unwrap_or(0);
                (
                    ChatStatus::Failed,
                    FAILURE_MESSAGE.to_string(),
                    Some(e.to_string()),
                    iterations,
                )
            }
        };

        Self {
            status,
            answer,
            error,
            iterations,
            messages,
            trace,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
}
