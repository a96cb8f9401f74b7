//! Tool system for the agent.
//!
//! Each tool has:
//! - A stable name and a description shown verbatim to the model
//! - A JSON schema for its arguments
//! - An async `execute` method
//!
//! Tools report failures as `anyhow::Error`; [`ToolRegistry::invoke`] is the
//! boundary that turns those into a [`ToolError`] the model can read.

mod calculator;
mod code_runner;
mod sandbox;
mod summarizer;
mod web;

pub use calculator::{evaluate, Calculator, CalcError, Number};
pub use code_runner::{CodeRunner, NO_RESULT_PLACEHOLDER};
pub use summarizer::DocumentSummarizer;
pub use web::{SearchResult, WebSearch};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::{Config, DEFAULT_SEARCH_RESULTS};
use crate::llm::{ModelGateway, ToolSchema};

/// Errors produced at the tool boundary. Rendered into the tool message
/// so the model can react to them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Error: Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Error: Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Error in {tool}: {message}")]
    Failed { tool: String, message: String },
}

/// A capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable name used by the model to invoke the tool.
    fn name(&self) -> &str;

    /// Natural-language description advertised to the model.
    fn description(&self) -> &str;

    /// JSON schema of the argument object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> anyhow::Result<String>;
}

/// Name and description of a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Shared dependencies handed to tools at registration time.
#[derive(Clone)]
pub struct ToolContext {
    /// Gateway used by the summarizer. `None` disables summarization.
    pub gateway: Option<Arc<ModelGateway>>,

    /// DuckDuckGo HTML endpoint.
    pub search_endpoint: String,

    /// Maximum search results returned per query.
    pub search_max_results: usize,
}

impl ToolContext {
    pub fn new(gateway: Option<Arc<ModelGateway>>) -> Self {
        Self {
            gateway,
            search_endpoint: web::DEFAULT_ENDPOINT.to_string(),
            search_max_results: DEFAULT_SEARCH_RESULTS,
        }
    }

    pub fn from_config(config: &Config, gateway: Option<Arc<ModelGateway>>) -> Self {
        Self {
            search_max_results: config.search_max_results,
            ..Self::new(gateway)
        }
    }
}

/// Fixed registry of tools, built once at startup and read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Registry with the standard tool set.
    pub fn new(ctx: ToolContext) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(WebSearch::new(
            ctx.search_endpoint.clone(),
            ctx.search_max_results,
        )));
        registry.register(Arc::new(Calculator));
        registry.register(Arc::new(CodeRunner::default()));
        registry.register(Arc::new(DocumentSummarizer::new(ctx.gateway)));
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.index
            .get(name)
            .map(|&slot| Arc::clone(&self.tools[slot]))
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// Descriptors in the provider's `tools` format.
    pub fn get_tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema::function(t.name(), t.description(), t.parameters_schema()))
            .collect()
    }

    /// Resolve and run a tool. Tool failures never escape as anything but a `ToolError`.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self.get(name)?;
        if !args.is_object() {
            return Err(ToolError::InvalidArguments {
                tool: name.to_string(),
                message: "arguments must be a JSON object".to_string(),
            });
        }

        tool.execute(args).await.map_err(|e| ToolError::Failed {
            tool: name.to_string(),
            message: format!("{:#}", e),
        })
    }
}
