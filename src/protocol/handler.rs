//! Request handler and method dispatcher.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::types::*;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Handler trait for processing MCP requests.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn initialize(&self, params: InitializeParams) -> ProtocolResult<InitializeResult>;

    /// Handle the `initialized` notification.
    async fn initialized(&self) -> ProtocolResult<()>;

    async fn shutdown(&self) -> ProtocolResult<()>;

    async fn list_tools(&self) -> ProtocolResult<ListToolsResult>;

    async fn call_tool(&self, params: CallToolParams) -> ProtocolResult<CallToolResult>;

    async fn ping(&self) -> ProtocolResult<Value> {
        Ok(serde_json::json!({}))
    }
}

/// Routes requests to handler methods.
pub struct Dispatcher<H: Handler> {
    handler: Arc<H>,
}

impl<H: Handler> Clone for Dispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<H: Handler> Dispatcher<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("Dispatching request");

        let result = match request.method.as_str() {
            "initialize" => match parse_params(request.params) {
                Ok(params) => self.handler.initialize(params).await.and_then(to_value),
                Err(e) => Err(e),
            },
            "initialized" | "notifications/initialized" => {
                self.handler.initialized().await.map(|_| Value::Null)
            }
            "shutdown" => self.handler.shutdown().await.map(|_| Value::Null),
            "ping" => self.handler.ping().await,
            "tools/list" => self.handler.list_tools().await.and_then(to_value),
            "tools/call" => match parse_params(request.params) {
                Ok(params) => self.handler.call_tool(params).await.and_then(to_value),
                Err(e) => Err(e),
            },
            method => Err(ProtocolError::MethodNotFound(method.to_string())),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                warn!(code = e.code(), "Request failed: {}", e);
                JsonRpcResponse::error(request.id, JsonRpcError::new(e.code(), e.to_string()))
            }
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> ProtocolResult<T> {
    params
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ProtocolError::InvalidParams(e.to_string().into()))?
        .ok_or_else(|| ProtocolError::InvalidParams("Missing params".into()))
}

fn to_value<T: Serialize>(result: T) -> ProtocolResult<Value> {
    serde_json::to_value(result).map_err(|e| ProtocolError::InternalError(e.to_string().into()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) struct MockHandler {
        pub(crate) initialized: AtomicBool,
    }

    impl MockHandler {
        pub(crate) fn new() -> Self {
            Self {
                initialized: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Handler for MockHandler {
        async fn initialize(&self, _params: InitializeParams) -> ProtocolResult<InitializeResult> {
            Ok(InitializeResult {
                protocol_version: MCP_VERSION.into(),
                capabilities: ServerCapabilities::default(),
                server_info: ServerInfo {
                    name: "test".into(),
                    version: "1.0".into(),
                },
                instructions: None,
            })
        }

        async fn initialized(&self) -> ProtocolResult<()> {
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> ProtocolResult<()> {
            Ok(())
        }

        async fn list_tools(&self) -> ProtocolResult<ListToolsResult> {
            Ok(ListToolsResult {
                tools: vec![],
                next_cursor: None,
            })
        }

        async fn call_tool(&self, params: CallToolParams) -> ProtocolResult<CallToolResult> {
            Ok(CallToolResult::text(format!("called {}", params.name)))
        }
    }

    #[tokio::test]
    async fn test_dispatcher_initialize() {
        let dispatcher = Dispatcher::new(Arc::new(MockHandler::new()));

        let request = JsonRpcRequest::new("initialize")
            .with_id(1)
            .with_params(serde_json::json!({
                "protocolVersion": MCP_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0"}
            }));

        let response = dispatcher.dispatch(request).await;
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["protocolVersion"], MCP_VERSION);
    }

    #[tokio::test]
    async fn test_dispatcher_initialized_notification() {
        let handler = Arc::new(MockHandler::new());
        let dispatcher = Dispatcher::new(Arc::clone(&handler));

        dispatcher
            .dispatch(JsonRpcRequest::new("notifications/initialized"))
            .await;
        assert!(handler.initialized.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispatcher_tool_call_requires_params() {
        let dispatcher = Dispatcher::new(Arc::new(MockHandler::new()));

        let response = dispatcher
            .dispatch(JsonRpcRequest::new("tools/call").with_id(2))
            .await;
        assert_eq!(response.error.unwrap().code, -32602);

        let response = dispatcher
            .dispatch(
                JsonRpcRequest::new("tools/call")
                    .with_id(3)
                    .with_params(serde_json::json!({"name": "ask", "arguments": {}})),
            )
            .await;
        assert_eq!(response.result.unwrap()["content"][0]["text"], "called ask");
    }

    #[tokio::test]
    async fn test_dispatcher_unknown_method() {
        let dispatcher = Dispatcher::new(Arc::new(MockHandler::new()));

        let request = JsonRpcRequest::new("resources/list").with_id(1);
        let response = dispatcher.dispatch(request).await;

        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
