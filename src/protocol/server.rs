//! MCP server loop with lifecycle management.

use crate::error::{McpError, ProtocolError, Result};
use crate::protocol::handler::{Dispatcher, Handler};
use crate::protocol::transport::{StdioTransport, Transport};
use crate::protocol::types::*;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Server created but not initialized.
    Created,
    /// Initialize request received, awaiting initialized notification.
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

/// Methods handled inline, in arrival order. Everything else runs on its own task.
fn is_lifecycle_method(method: &str) -> bool {
    matches!(
        method,
        "initialize" | "initialized" | "notifications/initialized" | "shutdown"
    )
}

pub struct McpServer<H: Handler> {
    info: ServerInfo,
    handler: Arc<H>,
    state: RwLock<Lifecycle>,
}

impl<H: Handler + 'static> McpServer<H> {
    pub fn new(handler: H, info: ServerInfo) -> Self {
        Self {
            info,
            handler: Arc::new(handler),
            state: RwLock::new(Lifecycle::Created),
        }
    }

    pub async fn state(&self) -> Lifecycle {
        *self.state.read().await
    }

    /// Run the server with stdio transport.
    #[instrument(skip(self), fields(server = %self.info.name))]
    pub async fn run(self) -> Result<()> {
        self.run_with_transport(Arc::new(StdioTransport::stdio())).await
    }

    /// Serve requests until EOF or `shutdown`, then wait for in-flight requests.
    pub async fn run_with_transport<T: Transport + 'static>(&self, transport: Arc<T>) -> Result<()> {
        info!(
            "Starting MCP server: {} v{}",
            self.info.name, self.info.version
        );

        let dispatcher = Dispatcher::new(Arc::clone(&self.handler));
        let mut in_flight = JoinSet::new();

        loop {
            let message = match transport.read_message().await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    debug!("EOF received, shutting down");
                    break;
                }
                Err(McpError::Protocol(ProtocolError::ParseError)) => {
                    let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    if let Err(e) = transport.write_response(&response).await {
                        error!("Failed to send error response: {}", e);
                    }
                    continue;
                }
                Err(e) => {
                    error!("Transport error: {}", e);
                    break;
                }
            };

            let request = match message {
                Message::Request(request) => request,
                Message::Response(response) => {
                    warn!("Unexpected response received: {:?}", response.id);
                    continue;
                }
            };

            // Reap finished tasks so the set does not grow without bound.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Request task failed: {}", e);
                }
            }

            let method = request.method.clone();
            self.update_state_for_method(&method).await;

            if is_lifecycle_method(&method) {
                respond(&dispatcher, transport.as_ref(), request).await;
                if method == "shutdown" {
                    info!("Shutdown request received");
                    break;
                }
            } else {
                let dispatcher = dispatcher.clone();
                let transport = Arc::clone(&transport);
                in_flight.spawn(async move {
                    respond(&dispatcher, transport.as_ref(), request).await;
                });
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Request task failed: {}", e);
            }
        }

        *self.state.write().await = Lifecycle::Stopped;
        info!("Server stopped");
        Ok(())
    }

    async fn update_state_for_method(&self, method: &str) {
        let mut state = self.state.write().await;
        match method {
            "initialize" if *state == Lifecycle::Created => {
                *state = Lifecycle::Initializing;
            }
            "initialized" | "notifications/initialized" if *state == Lifecycle::Initializing => {
                *state = Lifecycle::Running;
                info!("Server initialized and running");
            }
            "shutdown" => {
                *state = Lifecycle::ShuttingDown;
            }
            _ => {}
        }
    }
}

async fn respond<H: Handler, T: Transport + ?Sized>(
    dispatcher: &Dispatcher<H>,
    transport: &T,
    request: JsonRpcRequest,
) {
    let is_notification = request.is_notification();
    let response = dispatcher.dispatch(request).await;
    if !is_notification && let Err(e) = transport.write_response(&response).await {
        error!("Failed to send response: {}", e);
    }
}

pub struct McpServerBuilder<H: Handler> {
    handler: Option<H>,
    name: String,
    version: String,
}

impl<H: Handler + 'static> McpServerBuilder<H> {
    pub fn new() -> Self {
        Self {
            handler: None,
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn build(self) -> Result<McpServer<H>> {
        let handler = self.handler.ok_or_else(|| McpError::Internal {
            message: "Handler is required".into(),
        })?;

        Ok(McpServer::new(
            handler,
            ServerInfo {
                name: self.name,
                version: self.version,
            },
        ))
    }
}

impl<H: Handler + 'static> Default for McpServerBuilder<H> {
    fn default() -> Self {
        Self::new()
    }
}
