//! Core agent loop implementation.

use std::sync::Arc;

use crate::config::{Config, ConfigError};
use crate::llm::{ChatMessage, ModelGateway, ToolCall, ToolSchema};
use crate::tools::{ToolContext, ToolRegistry};

use super::events::{AgentEvent, Node, TraceSink};
use super::executor::{ToolResult, TurnExecutor};
use super::history::Conversation;
use super::prompt::build_system_prompt;
use super::AgentError;

/// How a turn ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model produced a terminal reply with this text.
    Answered(String),

    /// The terminal reply was empty.
    NoAnswer,

    /// The inference budget ran out before a terminal reply.
    LimitExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub status: TurnStatus,

    /// Model inferences performed during the turn.
    pub iterations: usize,
}

impl TurnOutcome {
    pub fn answer(&self) -> Option<&str> {
        match &self.status {
            TurnStatus::Answered(text) => Some(text),
            _ => None,
        }
    }
}

enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCall>),
    Terminated(TurnStatus),
}

/// The assistant. Immutable once built and shared across requests.
pub struct Agent {
    gateway: Arc<ModelGateway>,
    tools: Arc<ToolRegistry>,
    executor: TurnExecutor,
    schemas: Vec<ToolSchema>,
    preamble: String,
    max_iterations: usize,
}

impl Agent {
    pub fn new(gateway: Arc<ModelGateway>, tools: Arc<ToolRegistry>, max_iterations: usize) -> Self {
        let schemas = tools.get_tool_schemas();
        let preamble = build_system_prompt(&tools);
        Self {
            gateway,
            executor: TurnExecutor::new(Arc::clone(&tools)),
            tools,
            schemas,
            preamble,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Build the agent and its standard tools from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let gateway = Arc::new(ModelGateway::from_config(config)?);
        let tools = ToolRegistry::new(ToolContext::from_config(config, Some(Arc::clone(&gateway))));
        Ok(Self::new(gateway, Arc::new(tools), config.max_iterations))
    }

    pub fn model(&self) -> &str {
        self.gateway.model()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn new_conversation(&self) -> Conversation {
        Conversation::new(self.preamble.clone())
    }

    /// Continue a stored transcript (without preamble).
    pub fn resume(&self, transcript: Vec<ChatMessage>) -> Result<Conversation, AgentError> {
        Conversation::replay(self.preamble.clone(), transcript)
    }

    /// Drive the conversation until the model answers, the budget runs out,
    /// or the model call fails.
    ///
    /// Messages appended before a failure stay in `conversation`. Exactly one
    /// terminal event is sent to `sink` for every turn that starts.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        sink: Option<&TraceSink>,
    ) -> Result<TurnOutcome, AgentError> {
        if !conversation.awaiting_answer() {
            return Err(AgentError::NothingToAnswer);
        }

        let mut iterations = 0;
        let result = self.drive(conversation, sink, &mut iterations).await;

        let terminal = match &result {
            Ok(TurnStatus::Answered(text)) => AgentEvent::Finished {
                answer: Some(text.clone()),
                iterations,
            },
            Ok(TurnStatus::NoAnswer) => AgentEvent::Finished {
                answer: None,
                iterations,
            },
            Ok(TurnStatus::LimitExceeded) => {
                tracing::warn!(iterations, "Iteration limit reached without a final answer");
                AgentEvent::LimitExceeded { iterations }
            }
            Err(e) => {
                tracing::error!(iterations, error = %e, "Agent turn failed");
                AgentEvent::Failed {
                    error: e.to_string(),
                    iterations,
                }
            }
        };
        if let Some(sink) = sink {
            sink.emit(terminal);
        }

        result.map(|status| TurnOutcome { status, iterations })
    }

    async fn drive(
        &self,
        conversation: &mut Conversation,
        sink: Option<&TraceSink>,
        iterations: &mut usize,
    ) -> Result<TurnStatus, AgentError> {
        let pending = conversation.pending_tool_calls();
        let mut state = if pending.is_empty() {
            LoopState::AwaitingModel
        } else {
            tracing::debug!(calls = pending.len(), "Resuming with unanswered tool calls");
            LoopState::ExecutingTools(pending)
        };

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if *iterations >= self.max_iterations {
                        LoopState::Terminated(TurnStatus::LimitExceeded)
                    } else {
                        *iterations += 1;
                        tracing::debug!("Agent iteration {}", *iterations);

                        let reply = self
                            .gateway
                            .infer(conversation.messages(), &self.schemas)
                            .await?;
                        let message = reply.into_message();
                        let calls = message.requested_calls().to_vec();
                        conversation.push(message.clone());
                        if let Some(sink) = sink {
                            sink.emit(AgentEvent::node_executed(Node::Agent, *iterations, vec![message]));
                        }

                        if calls.is_empty() {
                            LoopState::Terminated(match conversation.final_answer() {
                                Some(text) => TurnStatus::Answered(text.to_string()),
                                None => TurnStatus::NoAnswer,
                            })
                        } else {
                            LoopState::ExecutingTools(calls)
                        }
                    }
                }
                LoopState::ExecutingTools(calls) => {
                    let results = self.executor.execute(&calls).await;
                    let messages: Vec<ChatMessage> =
                        results.into_iter().map(ToolResult::into_message).collect();
                    conversation.extend(messages.iter().cloned());
                    if let Some(sink) = sink {
                        sink.emit(AgentEvent::node_executed(Node::Tools, *iterations, messages));
                    }
                    LoopState::AwaitingModel
                }
                LoopState::Terminated(status) => return Ok(status),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, LlmClient, LlmError, Role};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays queued responses, then keeps returning `fallback`.
    struct Scripted {
        queue: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        fallback: Option<ChatResponse>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(responses.into()),
                fallback: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn forever(response: ChatResponse) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(VecDeque::new()),
                fallback: Some(response),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            tools: Option<&[ToolSchema]>,
            _temperature: f32,
        ) -> Result<ChatResponse, LlmError> {
            assert_eq!(messages[0].role, Role::System);
            assert_eq!(tools.map(|t| t.len()), Some(4));
            self.calls.fetch_add(1, Ordering::SeqCst);

            let next = self.queue.lock().unwrap().pop_front();
            match (next, &self.fallback) {
                (Some(response), _) => response,
                (None, Some(fallback)) => Ok(fallback.clone()),
                (None, None) => Err(LlmError::InvalidResponse("script exhausted".to_string())),
            }
        }
    }

    fn text(content: &str) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse {
            content: Some(content.to_string()),
            ..Default::default()
        })
    }

    fn calls(calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: Some(calls),
            usage: None,
        }
    }

    fn agent(client: Arc<Scripted>, max_iterations: usize) -> Agent {
        let gateway = Arc::new(ModelGateway::new(client, "test-model", 0.1));
        let tools = Arc::new(ToolRegistry::new(ToolContext::new(None)));
        Agent::new(gateway, tools, max_iterations)
    }

    fn asking(agent: &Agent, question: &str) -> Conversation {
        let mut conversation = agent.new_conversation();
        conversation.push(ChatMessage::user(question));
        conversation
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn text_reply_terminates_immediately() {
        let client = Scripted::new(vec![text("Paris is the capital of France.")]);
        let agent = agent(client.clone(), 15);
        let mut conversation = asking(&agent, "What is the capital of France?");

        let outcome = agent.run_turn(&mut conversation, None).await.unwrap();
        assert_eq!(
            outcome.status,
            TurnStatus::Answered("Paris is the capital of France.".to_string())
        );
        assert_eq!(outcome.iterations, 1);
        assert_eq!(client.calls(), 1);
        assert_eq!(conversation.transcript().len(), 2);
    }

    #[tokio::test]
    async fn tool_results_pair_with_requests() {
        let client = Scripted::new(vec![
            Ok(calls(vec![
                ToolCall::new("call_a", "calculator", json!({"expression": "25 * 76"})),
                ToolCall::new("call_b", "teleport", json!({})),
            ])),
            text("25 * 76 = 1900."),
        ]);
        let agent = agent(client, 15);
        let mut conversation = asking(&agent, "What's 25 * 76?");
        let (sink, mut rx) = TraceSink::channel();

        let outcome = agent.run_turn(&mut conversation, Some(&sink)).await.unwrap();
        assert_eq!(outcome.answer(), Some("25 * 76 = 1900."));
        assert_eq!(outcome.iterations, 2);

        let transcript = conversation.transcript();
        let roles: Vec<Role> = transcript.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(transcript[2].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(transcript[2].text(), "1900");
        assert_eq!(transcript[3].tool_call_id.as_deref(), Some("call_b"));
        assert_eq!(transcript[3].text(), "Error: Unknown tool 'teleport'");

        let names: Vec<&str> = drain(&mut rx).iter().map(|e| e.event_name()).collect();
        assert_eq!(names, vec!["agent", "tools", "agent", "finished"]);
    }

    #[tokio::test]
    async fn iteration_bound_caps_model_calls() {
        let client = Scripted::forever(calls(vec![ToolCall::new(
            "",
            "calculator",
            json!({"expression": "1 + 1"}),
        )]));
        let agent = agent(client.clone(), 3);
        let mut conversation = asking(&agent, "loop forever");
        let (sink, mut rx) = TraceSink::channel();

        let outcome = agent.run_turn(&mut conversation, Some(&sink)).await.unwrap();
        assert_eq!(outcome.status, TurnStatus::LimitExceeded);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(client.calls(), 3);

        // Every request still has its result.
        assert!(conversation.pending_tool_calls().is_empty());
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(AgentEvent::LimitExceeded { iterations: 3 })
        ));
    }

    #[tokio::test]
    async fn model_failure_keeps_partial_history() {
        let client = Scripted::new(vec![
            Ok(calls(vec![ToolCall::new(
                "call_a",
                "calculator",
                json!({"expression": "5 + 10"}),
            )])),
            Err(LlmError::Api {
                status: 500,
                body: "boom".to_string(),
            }),
        ]);
        let agent = agent(client, 15);
        let mut conversation = asking(&agent, "5 + 10?");
        let (sink, mut rx) = TraceSink::channel();

        let err = agent
            .run_turn(&mut conversation, Some(&sink))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Model(LlmError::Api { status: 500, .. })));
        assert_eq!(conversation.transcript().len(), 3);
        assert_eq!(conversation.transcript()[2].text(), "15");

        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(matches!(events.last(), Some(AgentEvent::Failed { iterations: 2, .. })));
    }

    #[tokio::test]
    async fn empty_terminal_reply_is_no_answer() {
        let client = Scripted::new(vec![text("   ")]);
        let agent = agent(client, 15);
        let mut conversation = asking(&agent, "hello?");

        let outcome = agent.run_turn(&mut conversation, None).await.unwrap();
        assert_eq!(outcome.status, TurnStatus::NoAnswer);
        assert_eq!(outcome.answer(), None);
    }

    #[tokio::test]
    async fn finished_conversation_is_not_replayed() {
        let client = Scripted::new(vec![text("unused")]);
        let agent = agent(client.clone(), 15);
        let mut conversation = agent
            .resume(vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant(Some("Hello!".to_string()), vec![]),
            ])
            .unwrap();

        let err = agent.run_turn(&mut conversation, None).await.unwrap_err();
        assert!(matches!(err, AgentError::NothingToAnswer));
        assert_eq!(client.calls(), 0);

        let mut empty = agent.new_conversation();
        assert!(matches!(
            agent.run_turn(&mut empty, None).await,
            Err(AgentError::NothingToAnswer)
        ));
    }

    #[tokio::test]
    async fn resumed_pending_calls_run_before_the_model() {
        let client = Scripted::new(vec![text("It is 4.")]);
        let agent = agent(client.clone(), 15);
        let mut conversation = agent
            .resume(vec![
                ChatMessage::user("2 + 2?"),
                ChatMessage::assistant(
                    None,
                    vec![ToolCall::new("call_x", "calculator", json!({"expression": "2 + 2"}))],
                ),
            ])
            .unwrap();

        let outcome = agent.run_turn(&mut conversation, None).await.unwrap();
        assert_eq!(outcome.answer(), Some("It is 4."));
        assert_eq!(client.calls(), 1);
        assert_eq!(conversation.transcript()[2].tool_call_id.as_deref(), Some("call_x"));
        assert_eq!(conversation.transcript()[2].text(), "4");
    }
}
