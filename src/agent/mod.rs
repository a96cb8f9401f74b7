//! Agent module - the core conversational agent logic.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Send the conversation and tool descriptors to the model
//! 2. If the model requests tools, run the whole batch and append the results
//! 3. Repeat until the model answers in plain text or the iteration bound is hit

mod agent_loop;
mod events;
mod executor;
mod history;
mod prompt;

pub use agent_loop::{Agent, TurnOutcome, TurnStatus};
pub use events::{AgentEvent, Node, TraceSink};
pub use executor::{ToolResult, TurnExecutor};
pub use history::Conversation;
pub use prompt::build_system_prompt;

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model call failed: {0}")]
    Model(#[from] LlmError),

    #[error("The conversation already ends with an answer; there is nothing to respond to")]
    NothingToAnswer,

    #[error("Invalid conversation history: {0}")]
    InvalidHistory(String),
}
