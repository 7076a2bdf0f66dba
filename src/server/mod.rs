//! Embedded batch coordinator server.
//!
//! Exposes the coordinator over HTTP so a remote driver (or an admin-panel
//! front end) can drive batch generation without linking the engine in
//! process.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::coordinator::BatchCoordinator;

/// Shared state for the batch endpoint.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BatchCoordinator>,
}

/// Start the coordinator server.
pub async fn serve(coordinator: Arc<BatchCoordinator>, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState { coordinator };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting batch server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
