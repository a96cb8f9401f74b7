//! Summarization tool that delegates to the model gateway.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Tool;
use crate::llm::{ChatMessage, ModelGateway};

const INSTRUCTION: &str = "You are an expert at summarizing text. Provide a clear, concise, and neutral summary of the provided content. Focus on the main facts and key takeaways. Do not add any preamble like 'Here is the summary:' or opinions unless the text explicitly contains them.";

/// Condense a piece of text, optionally focused on a question.
pub struct DocumentSummarizer {
    gateway: Option<Arc<ModelGateway>>,
}

impl DocumentSummarizer {
    pub fn new(gateway: Option<Arc<ModelGateway>>) -> Self {
        Self { gateway }
    }

    fn build_messages(text: &str, context: Option<&str>) -> Vec<ChatMessage> {
        let mut instruction = INSTRUCTION.to_string();
        if let Some(context) = context {
            instruction.push_str(&format!(
                "\nThe summary should specifically highlight information relevant to this context or question: '{}'",
                context
            ));
        }
        vec![
            ChatMessage::user(instruction),
            ChatMessage::user(format!(
                "Please summarize this text:\n\nTEXT_START\n{}\nTEXT_END",
                text
            )),
        ]
    }
}

#[async_trait]
impl Tool for DocumentSummarizer {
    fn name(&self) -> &str {
        "document_summarizer"
    }

    fn description(&self) -> &str {
        "Summarizes the provided 'text_content'. If 'query_context' (e.g., the original user question or topic of interest) is provided, the summary will be tailored to be relevant to it. Use this tool when you have a long piece of text that needs to be condensed, for example, the content of a web article found by web_search. Example: If web_search returns a long article and the user wants key points, pass the article's text here."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text_content": {
                    "type": "string",
                    "description": "The text to summarize"
                },
                "query_context": {
                    "type": "string",
                    "description": "Optional question or topic the summary should focus on"
                }
            },
            "required": ["text_content"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let text = args["text_content"].as_str().unwrap_or_default();
        if text.is_empty() {
            return Ok("Error: No text content provided to summarize.".to_string());
        }
        let Some(gateway) = &self.gateway else {
            return Ok("Error: GROQ_API_KEY not configured for summarizer tool.".to_string());
        };

        let context = args["query_context"]
            .as_str()
            .filter(|c| !c.trim().is_empty());

        tracing::info!(chars = text.len(), focused = context.is_some(), "Summarizing text");

        let messages = Self::build_messages(text, context);
        match gateway.complete_text(&messages).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                tracing::warn!(error = %e, "Summarization call failed");
                Ok(format!("Error during summarization LLM call: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, LlmClient, LlmError, Role, ToolSchema};
    use std::sync::Mutex;

    /// Records the messages it receives and answers with a fixed summary.
    struct Recorder {
        seen: Mutex<Vec<ChatMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for Recorder {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            tools: Option<&[ToolSchema]>,
            _temperature: f32,
        ) -> Result<ChatResponse, LlmError> {
            assert!(tools.is_none());
            *self.seen.lock().unwrap() = messages.to_vec();
            if self.fail {
                return Err(LlmError::Api {
                    status: 503,
                    body: "overloaded".to_string(),
                });
            }
            Ok(ChatResponse {
                content: Some("Short summary.".to_string()),
                ..Default::default()
            })
        }
    }

    fn summarizer(fail: bool) -> (Arc<Recorder>, DocumentSummarizer) {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail,
        });
        let gateway = ModelGateway::new(recorder.clone(), "test-model", 0.1);
        (recorder, DocumentSummarizer::new(Some(Arc::new(gateway))))
    }

    #[tokio::test]
    async fn sends_instruction_then_delimited_text() {
        let (recorder, tool) = summarizer(false);
        let out = tool
            .execute(json!({"text_content": "Long article.", "query_context": "Who won?"}))
            .await
            .unwrap();
        assert_eq!(out, "Short summary.");

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|m| m.role == Role::User));
        assert!(seen[0].text().starts_with("You are an expert at summarizing text."));
        assert!(seen[0]
            .text()
            .ends_with("relevant to this context or question: 'Who won?'"));
        assert_eq!(
            seen[1].text(),
            "Please summarize this text:\n\nTEXT_START\nLong article.\nTEXT_END"
        );
    }

    #[tokio::test]
    async fn no_context_means_plain_instruction() {
        let (recorder, tool) = summarizer(false);
        tool.execute(json!({"text_content": "abc"})).await.unwrap();
        assert_eq!(recorder.seen.lock().unwrap()[0].text(), INSTRUCTION);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_a_call() {
        let (recorder, tool) = summarizer(false);
        let out = tool.execute(json!({"text_content": ""})).await.unwrap();
        assert_eq!(out, "Error: No text content provided to summarize.");
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_gateway_reports_configuration_error() {
        let tool = DocumentSummarizer::new(None);
        let out = tool.execute(json!({"text_content": "abc"})).await.unwrap();
        assert_eq!(out, "Error: GROQ_API_KEY not configured for summarizer tool.");
    }

    #[tokio::test]
    async fn model_failure_is_reported_as_text() {
        let (_, tool) = summarizer(true);
        let out = tool.execute(json!({"text_content": "abc"})).await.unwrap();
        assert!(out.starts_with("Error during summarization LLM call: "));
        assert!(out.contains("503"));
    }
}
