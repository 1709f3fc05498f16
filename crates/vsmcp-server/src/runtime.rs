//! Server runtime: dial the host, serve the worker operation set, wait for
//! shutdown.
//!
//! The MCP-facing protocol endpoint itself lives a layer above; this runtime
//! owns the channel back to the host and the process's exit conditions:
//! a `request-shutdown` call from the host, or the channel going away
//! (host exited without asking).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use vsmcp_bridge::{RpcChannel, RpcHandler, methods, pipe};

use crate::capabilities;

/// How long to keep dialing before giving up on the host.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settle time before exit so the final response frame can flush.
const SHUTDOWN_LINGER: Duration = Duration::from_millis(50);

/// Command-line configuration, passed by the host verbatim.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub pipe: String,
    pub bind_address: String,
    pub port: u16,
    pub display_name: String,
    pub connect_timeout: Duration,
}

impl ServerConfig {
    pub fn new(pipe: impl Into<String>) -> Self {
        Self {
            pipe: pipe.into(),
            bind_address: "localhost".to_string(),
            port: 5050,
            display_name: "vsmcp".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// The operation set this process exposes to the host.
struct WorkerHandler {
    shutdown: CancellationToken,
}

#[async_trait::async_trait]
impl RpcHandler for WorkerHandler {
    async fn handle(
        &self,
        method: &str,
        _params: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        match method {
            methods::LIST_CAPABILITIES => {
                serde_json::to_value(capabilities::catalog()).map_err(|e| e.to_string())
            }
            methods::REQUEST_SHUTDOWN => {
                tracing::info!("Shutdown requested via RPC");
                self.shutdown.cancel();
                Ok(serde_json::Value::Bool(true))
            }
            other => Err(format!("unknown method: {other}")),
        }
    }
}

/// Connect to the host and run until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let stream = pipe::connect(&config.pipe, config.connect_timeout)
        .await
        .with_context(|| format!("failed to connect to host pipe {}", config.pipe))?;
    tracing::info!(pipe = %config.pipe, "Connected to host");

    let handler = Arc::new(WorkerHandler {
        shutdown: shutdown.clone(),
    });
    let channel = RpcChannel::spawn(stream, handler);

    tracing::info!(
        name = %config.display_name,
        endpoint = %format!("http://{}:{}", config.bind_address, config.port),
        "Server ready"
    );

    tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("Shutting down on host request");
            // Let the ack frame for request-shutdown reach the wire.
            tokio::time::sleep(SHUTDOWN_LINGER).await;
            channel.close();
        }
        _ = channel.closed() => {
            tracing::info!("Host connection closed, exiting");
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}
