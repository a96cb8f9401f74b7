//! Per-step trace events emitted while a turn runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::llm::ChatMessage;

/// Which step of the loop produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Agent,
    Tools,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Node::Agent => "agent",
            Node::Tools => "tools",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A loop step finished and appended `messages` to the conversation.
    NodeExecuted {
        node: Node,
        iteration: usize,
        messages: Vec<ChatMessage>,
        timestamp: DateTime<Utc>,
    },

    Finished {
        answer: Option<String>,
        iterations: usize,
    },

    LimitExceeded {
        iterations: usize,
    },

    Failed {
        error: String,
        iterations: usize,
    },
}

impl AgentEvent {
    pub fn node_executed(node: Node, iteration: usize, messages: Vec<ChatMessage>) -> Self {
        AgentEvent::NodeExecuted {
            node,
            iteration,
            messages,
            timestamp: Utc::now(),
        }
    }

    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            AgentEvent::NodeExecuted { node, .. } => node.as_str(),
            AgentEvent::Finished { .. } => "finished",
            AgentEvent::LimitExceeded { .. } => "limit_exceeded",
            AgentEvent::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentEvent::NodeExecuted { .. })
    }
}

/// Receives trace events. Sending never blocks the loop; a dropped receiver
/// only means nobody is watching.
#[derive(Debug, Clone)]
pub struct TraceSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl TraceSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Trace receiver dropped; event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = AgentEvent::node_executed(Node::Tools, 2, vec![ChatMessage::tool("c1", "calculator", "4")]);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "node_executed");
        assert_eq!(value["node"], "tools");
        assert_eq!(value["iteration"], 2);
        assert_eq!(value["messages"][0]["tool_call_id"], "c1");
        assert_eq!(event.event_name(), "tools");
        assert!(!event.is_terminal());

        let done = AgentEvent::LimitExceeded { iterations: 15 };
        assert_eq!(serde_json::to_value(&done).unwrap()["type"], "limit_exceeded");
        assert!(done.is_terminal());
    }

    #[tokio::test]
    async fn sink_delivers_in_order_and_survives_closed_receiver() {
        let (sink, mut rx) = TraceSink::channel();
        sink.emit(AgentEvent::node_executed(Node::Agent, 1, vec![]));
        sink.emit(AgentEvent::Finished {
            answer: Some("ok".to_string()),
            iterations: 1,
        });
        assert_eq!(rx.recv().await.unwrap().event_name(), "agent");
        assert_eq!(rx.recv().await.unwrap().event_name(), "finished");

        drop(rx);
        sink.emit(AgentEvent::LimitExceeded { iterations: 1 });
    }
}
