//! Runs one batch of model-requested tool calls.

use std::sync::Arc;

use futures::future::join_all;

use crate::llm::{ChatMessage, ToolCall};
use crate::tools::{ToolError, ToolRegistry};

/// Outcome of a single tool call, tagged with the id of the request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: Result<String, ToolError>,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Text shown to the model. Errors are rendered, never dropped.
    pub fn content(&self) -> String {
        match &self.outcome {
            Ok(output) => output.clone(),
            Err(e) => e.to_string(),
        }
    }

    pub fn into_message(self) -> ChatMessage {
        let content = self.content();
        ChatMessage::tool(self.call_id, self.tool_name, content)
    }
}

pub struct TurnExecutor {
    tools: Arc<ToolRegistry>,
}

impl TurnExecutor {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    /// Run every call concurrently. Returns exactly one result per call, in
    /// request order.
    pub async fn execute(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.execute_one(call))).await
    }

    async fn execute_one(&self, call: &ToolCall) -> ToolResult {
        let name = call.name();
        tracing::info!(tool = name, call_id = %call.id, "Calling tool");

        let outcome = match (self.tools.get(name), call.parsed_arguments()) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(ToolError::InvalidArguments {
                tool: name.to_string(),
                message: format!("malformed JSON arguments: {}", e),
            }),
            (Ok(_), Ok(args)) => self.tools.invoke(name, args).await,
        };

        if let Err(e) = &outcome {
            tracing::warn!(tool = name, call_id = %call.id, error = %e, "Tool call failed");
        }

        ToolResult {
            call_id: call.id.clone(),
            tool_name: name.to_string(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FunctionCall, Role};
    use crate::tools::{Tool, ToolContext};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Sleeps before answering so completion order differs from request order.
    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Answers after a delay"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"ms": {"type": "integer"}}})
        }

        async fn execute(&self, args: Value) -> anyhow::Result<String> {
            let ms = args["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(format!("slept {}", ms))
        }
    }

    fn executor() -> TurnExecutor {
        let mut registry = ToolRegistry::new(ToolContext::new(None));
        registry.register(Arc::new(Slow));
        TurnExecutor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn one_result_per_call_in_request_order() {
        let calls = vec![
            ToolCall::new("c1", "slow", json!({"ms": 40})),
            ToolCall::new("c2", "calculator", json!({"expression": "5 + 10"})),
            ToolCall::new("c3", "slow", json!({"ms": 0})),
        ];
        let results = executor().execute(&calls).await;

        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(results[0].content(), "slept 40");
        assert_eq!(results[1].content(), "15");
        assert_eq!(results[2].content(), "slept 0");
    }

    #[tokio::test]
    async fn unknown_tool_does_not_block_siblings() {
        let calls = vec![
            ToolCall::new("c1", "teleport", json!({})),
            ToolCall::new("c2", "calculator", json!({"expression": "2025 - 1624"})),
        ];
        let results = executor().execute(&calls).await;

        assert!(results[0].is_error());
        assert_eq!(results[0].content(), "Error: Unknown tool 'teleport'");
        assert_eq!(results[1].outcome, Ok("401".to_string()));
    }

    #[tokio::test]
    async fn malformed_arguments_become_an_error_result() {
        let call = ToolCall {
            id: "c1".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: "calculator".to_string(),
                arguments: "{\"expression\": ".to_string(),
            },
        };
        let results = executor().execute(&[call]).await;
        assert!(matches!(
            results[0].outcome,
            Err(ToolError::InvalidArguments { .. })
        ));

        let message = results[0].clone().into_message();
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("c1"));
        assert!(message.text().starts_with("Error: Invalid arguments for calculator"));
    }

    #[tokio::test]
    async fn empty_batch_yields_no_results() {
        assert!(executor().execute(&[]).await.is_empty());
    }
}
