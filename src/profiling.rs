use crate::manager::AddressManager;
use crate::version;
use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Optional HTTP endpoint for operational visibility, enabled with
/// `--profile <port>`. Loopback only.
pub struct ProfilingServer {
    port: u16,
    manager: Arc<AddressManager>,
}

impl ProfilingServer {
    pub fn new(port: u16, manager: Arc<AddressManager>) -> Self {
        Self { port, manager }
    }

    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let app = Router::new()
            .route("/health", get(health))
            .route("/stats", get(stats))
            .with_state(self.manager);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Profiling server listening on {}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": version::version(),
    }))
}

async fn stats(State(manager): State<Arc<AddressManager>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "known_nodes": manager.address_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
