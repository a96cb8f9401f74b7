//! Model gateway: one inference per call over the configured model.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use super::{ChatMessage, GroqClient, LlmClient, LlmError, TokenUsage, ToolCall, ToolSchema};
use crate::config::{Config, ConfigError};

/// Assistant reply produced by one inference.
///
/// Terminal when `tool_calls` is empty; otherwise the model is requesting tools
/// and `content` is optional commentary.
#[derive(Debug, Clone, Default)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<TokenUsage>,
}

impl AssistantReply {
    pub fn is_terminal(&self) -> bool {
        self.tool_calls.is_empty()
    }

    pub fn into_message(self) -> ChatMessage {
        ChatMessage::assistant(self.content, self.tool_calls)
    }
}

/// Wraps a completion client with the model identifier and sampling temperature.
pub struct ModelGateway {
    client: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
        }
    }

    /// Build the Groq-backed gateway. Refuses to initialize without a credential.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("GROQ_API_KEY".to_string()));
        }
        let client = GroqClient::new(config.api_key.clone()).with_base_url(config.base_url.clone());
        Ok(Self::new(Arc::new(client), config.model.clone(), config.temperature))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model for the next step given the history and the available tools.
    pub async fn infer(
        &self,
        history: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<AssistantReply, LlmError> {
        if history.is_empty() {
            return Err(LlmError::EmptyHistory);
        }

        let tools = if tools.is_empty() { None } else { Some(tools) };
        let response = self
            .client
            .chat_completion(&self.model, history, tools, self.temperature)
            .await?;

        let mut tool_calls = response.tool_calls.unwrap_or_default();
        assign_call_ids(history, &mut tool_calls);

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Model usage"
            );
        }

        Ok(AssistantReply {
            content: response.content,
            tool_calls,
            usage: response.usage,
        })
    }

    /// Plain text completion without tools.
    pub async fn complete_text(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let reply = self.infer(messages, &[]).await?;
        Ok(reply.content.unwrap_or_default())
    }
}

/// Give every call an id unique across the history and the batch. Blank ids
/// and ids the provider reused are replaced with fresh `call_<uuid>` ids.
fn assign_call_ids(history: &[ChatMessage], calls: &mut [ToolCall]) {
    let mut taken: HashSet<String> = history
        .iter()
        .flat_map(|m| m.requested_calls())
        .map(|c| c.id.clone())
        .collect();
    for call in calls.iter_mut() {
        if call.id.trim().is_empty() || taken.contains(&call.id) {
            let fresh = format!("call_{}", Uuid::new_v4().simple());
            tracing::debug!(provider_id = %call.id, id = %fresh, "Reassigned tool call id");
            call.id = fresh;
        }
        taken.insert(call.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClient {
        calls: AtomicUsize,
        response: ChatResponse,
    }

    #[async_trait]
    impl LlmClient for FixedClient {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolSchema]>,
            _temperature: f32,
        ) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn empty_history_is_rejected_before_any_call() {
        let client = Arc::new(FixedClient {
            calls: AtomicUsize::new(0),
            response: ChatResponse::default(),
        });
        let gateway = ModelGateway::new(client.clone(), "m", 0.1);

        let err = gateway.infer(&[], &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyHistory));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_call_ids_are_filled() {
        let mut call = ToolCall::new("", "calculator", json!({"expression": "1+1"}));
        call.id.clear();
        let client = Arc::new(FixedClient {
            calls: AtomicUsize::new(0),
            response: ChatResponse {
                content: None,
                tool_calls: Some(vec![call]),
                usage: None,
            },
        });
        let gateway = ModelGateway::new(client, "m", 0.1);

        let reply = gateway
            .infer(&[ChatMessage::user("1+1?")], &[])
            .await
            .unwrap();
        assert!(!reply.is_terminal());
        assert!(reply.tool_calls[0].id.starts_with("call_"));
    }

    #[tokio::test]
    async fn reused_call_ids_are_replaced() {
        let client = Arc::new(FixedClient {
            calls: AtomicUsize::new(0),
            response: ChatResponse {
                content: None,
                tool_calls: Some(vec![
                    ToolCall::new("call_0", "calculator", json!({"expression": "1+1"})),
                    ToolCall::new("call_0", "calculator", json!({"expression": "2+2"})),
                    ToolCall::new("call_1", "calculator", json!({"expression": "3+3"})),
                ]),
                usage: None,
            },
        });
        let gateway = ModelGateway::new(client, "m", 0.1);
        let history = vec![
            ChatMessage::user("1+1?"),
            ChatMessage::assistant(
                None,
                vec![ToolCall::new("call_1", "calculator", json!({"expression": "1+1"}))],
            ),
            ChatMessage::tool("call_1", "calculator", "2"),
            ChatMessage::user("and the rest?"),
        ];

        let reply = gateway.infer(&history, &[]).await.unwrap();
        let ids: Vec<&str> = reply.tool_calls.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(ids[0], "call_0");
        assert_ne!(ids[1], "call_0");
        assert_ne!(ids[2], "call_1");
        assert!(ids.iter().all(|id| id.starts_with("call_")));
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn from_config_requires_credential() {
        let config = Config::new("  ".to_string(), "m".to_string());
        assert!(ModelGateway::from_config(&config).is_err());

        let config = Config::new("gsk_x".to_string(), "m".to_string());
        let gateway = ModelGateway::from_config(&config).unwrap();
        assert_eq!(gateway.model(), "m");
    }
}
