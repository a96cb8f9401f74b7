//! Cognito - entry point
//!
//! `cognito` starts the HTTP server. `cognito ask "<question>"` runs a single
//! turn in the terminal and prints each step.

use cognito::agent::{Agent, AgentEvent, TraceSink};
use cognito::api::types::{FAILURE_MESSAGE, NO_ANSWER_MESSAGE};
use cognito::api;
use cognito::config::Config;
use cognito::llm::{ChatMessage, Role};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cognito=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration: model={}", config.model);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("ask") => {
            let question = args[1..].join(" ");
            if question.trim().is_empty() {
                anyhow::bail!("usage: cognito ask \"<question>\"");
            }
            ask(&config, question.trim()).await
        }
        Some(other) => anyhow::bail!("unknown command '{}'; expected 'ask' or no arguments", other),
        None => {
            info!("Starting server on {}:{}", config.host, config.port);
            api::serve(config).await
        }
    }
}

async fn ask(config: &Config, question: &str) -> anyhow::Result<()> {
    let agent = Agent::from_config(config)?;
    let mut conversation = agent.new_conversation();
    conversation.push(ChatMessage::user(question));

    let (sink, mut rx) = TraceSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let result = agent.run_turn(&mut conversation, Some(&sink)).await;
    drop(sink);
    printer.await?;

    println!();
    match result {
        Ok(outcome) => match outcome.answer() {
            Some(answer) => println!("Cognito: {}", answer),
            None => println!("Cognito: {}", NO_ANSWER_MESSAGE),
        },
        Err(e) => {
            eprintln!("error: {}", e);
            println!("Cognito: {}", FAILURE_MESSAGE);
        }
    }
    Ok(())
}

fn print_event(event: &AgentEvent) {
    for line in render_event(event) {
        println!("{}", line);
    }
}

/// Terminal lines for one trace event.
fn render_event(event: &AgentEvent) -> Vec<String> {
    let mut lines = Vec::new();
    match event {
        AgentEvent::NodeExecuted {
            node,
            iteration,
            messages,
            ..
        } => {
            lines.push(format!("--- {} (iteration {}) ---", node.as_str(), iteration));
            for message in messages {
                match message.role {
                    Role::Assistant if message.has_tool_calls() => {
                        let text = message.text().trim();
                        if !text.is_empty() {
                            lines.push(format!("  {}", text));
                        }
                        for call in message.requested_calls() {
                            lines.push(format!(
                                "  -> {}({})",
                                call.name(),
                                call.function.arguments
                            ));
                        }
                    }
                    Role::Tool => lines.push(format!(
                        "  <- {}: {}",
                        message.name.as_deref().unwrap_or("tool"),
                        message.text()
                    )),
                    _ => lines.push(format!("  {}", message.text())),
                }
            }
        }
        AgentEvent::LimitExceeded { iterations } => lines.push(format!(
            "--- stopped after {} model calls without a final answer ---",
            iterations
        )),
        AgentEvent::Finished { .. } | AgentEvent::Failed { .. } => {}
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use cognito::agent::Node;
    use cognito::llm::ToolCall;
    use serde_json::json;

    #[test]
    fn assistant_text_is_shown_before_its_tool_calls() {
        let message = ChatMessage::assistant(
            Some("Let me work that out.".to_string()),
            vec![ToolCall::new("call_1", "calculator", json!({ "expression": "2 + 2" }))],
        );
        let lines = render_event(&AgentEvent::node_executed(Node::Agent, 1, vec![message]));

        assert_eq!(lines[0], "--- agent (iteration 1) ---");
        assert_eq!(lines[1], "  Let me work that out.");
        assert!(lines[2].starts_with("  -> calculator("));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn tool_results_name_their_tool() {
        let message = ChatMessage::tool("call_1", "calculator", "4");
        let lines = render_event(&AgentEvent::node_executed(Node::Tools, 1, vec![message]));
        assert_eq!(lines[1], "  <- calculator: 4");
    }
}
