//! # Cognito
//!
//! A tool-using conversational assistant.
//!
//! This library provides:
//! - A fixed tool set: web search, calculator, a sandboxed Python-subset
//!   interpreter and an LLM-backed document summarizer
//! - A model gateway over an OpenAI-compatible chat-completions API (Groq)
//! - A bounded agent loop that alternates model inference and tool execution
//! - An HTTP API for running turns, with per-step trace events over SSE
//!
//! ## Example
//!
//! ```rust,ignore
//! use cognito::{agent::Agent, llm::ChatMessage, Config};
//!
//! let config = Config::from_env()?;
//! let agent = Agent::from_config(&config)?;
//! let mut conversation = agent.new_conversation();
//! conversation.push(ChatMessage::user("What is 25 * 76?"));
//! let outcome = agent.run_turn(&mut conversation, None).await?;
//! println!("{:?}", outcome.answer());
//! ```

pub mod api;
pub mod agent;
pub mod config;
pub mod llm;
pub mod tools;

pub use config::Config;
