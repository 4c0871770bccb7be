//! HTTP servers
//!
//! - [`agent`]: per-agent resource and tool surface
//! - [`registry`]: coordinator registry listing plus the knowledge-network API

pub mod agent;
pub mod registry;

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::registry::{Resource, Tool};

// ─────────────────────────────────────────────────────────────────
// Response Bodies
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList {
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolList {
    pub tools: Vec<Tool>,
}

/// Body of a resource read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContent {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub result: String,
}

// ─────────────────────────────────────────────────────────────────
// Serving
// ─────────────────────────────────────────────────────────────────

/// Resolve `host:port` into a socket address.
pub fn listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| Error::config_field_invalid("network.listen_host", format!("{}: {}", host, e)))
}

/// Serve `router` on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(%addr, "HTTP server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_addr() {
        assert_eq!(listen_addr("127.0.0.1", 8100).unwrap().port(), 8100);
        assert!(listen_addr("not a host", 8100).is_err());
    }
}
