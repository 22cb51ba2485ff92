//! Minimal `/metrics` HTTP endpoint (feature `metrics`), serving the
//! registry built in [`super::metrics`]. Grounded in the teacher's
//! `rest_api::server::run_server`, stripped of the mTLS listener branch this
//! core has no use for.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};

async fn metrics_handler() -> String {
    super::metrics::encode_registry()
}

/// Serve `/metrics` on `addr` until the process exits.
pub async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http());

    info!(%addr, "metrics server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::FatalConfig(format!("failed to bind metrics address {addr}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::FatalConfig(format!("metrics server error: {e}")))?;

    Ok(())
}
