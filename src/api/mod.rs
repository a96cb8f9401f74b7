//! HTTP API.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/tools` - Registered tools
//! - `POST /api/chat` - Run one turn and return the answer with its trace
//! - `POST /api/chat/stream` - Run one turn, streaming trace events over SSE

mod chat;
mod routes;
pub mod types;

pub use routes::{router, AppState};

use std::sync::Arc;

use crate::agent::Agent;
use crate::config::Config;

/// Build the agent and serve until the process exits.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let agent = Agent::from_config(&config)?;
    tracing::info!(
        model = %agent.model(),
        tools = ?agent.tools().names(),
        max_iterations = agent.max_iterations(),
        "Agent ready"
    );

    let app = router(Arc::new(AppState::new(agent)));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
