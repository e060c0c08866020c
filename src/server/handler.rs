//! MCP request handler implementation.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{
    CallToolParams, CallToolResult, Handler, InitializeParams, InitializeResult, ListToolsResult,
    MCP_VERSION, ServerCapabilities, ServerInfo, ToolsCapability,
};
use crate::server::state::ServerState;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const INSTRUCTIONS: &str = "Natural-language questions over a PostgreSQL database. \
    First call 'connect' with your auth_token and the database credentials to get a session_token. \
    Then call 'ask' with the auth_token, the session_token and a question. \
    Generated SQL is restricted to a single read-only SELECT with a row limit, checked by the \
    database planner before it runs.";

pub struct McpHandler {
    state: Arc<ServerState>,
}

impl McpHandler {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }
}

#[async_trait]
impl Handler for McpHandler {
    async fn initialize(&self, params: InitializeParams) -> ProtocolResult<InitializeResult> {
        info!(
            "Initialize request from {} v{}",
            params.client_info.name, params.client_info.version
        );
        if params.protocol_version != MCP_VERSION {
            debug!(requested = %params.protocol_version, "Client requested a different protocol version");
        }

        self.state.set_initialized(params.client_info);

        Ok(InitializeResult {
            protocol_version: MCP_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: ServerInfo {
                name: self.state.config.name.to_string(),
                version: self.state.config.version.to_string(),
            },
            instructions: Some(INSTRUCTIONS.into()),
        })
    }

    async fn initialized(&self) -> ProtocolResult<()> {
        info!("Server initialized successfully");
        Ok(())
    }

    async fn shutdown(&self) -> ProtocolResult<()> {
        info!(requests = self.state.request_count(), "Shutdown request received");
        Ok(())
    }

    async fn list_tools(&self) -> ProtocolResult<ListToolsResult> {
        let tools = self.state.tools.list();
        debug!("Listing {} tools", tools.len());

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(&self, params: CallToolParams) -> ProtocolResult<CallToolResult> {
        if !self.state.is_initialized() {
            return Err(ProtocolError::NotInitialized);
        }
        let request_id = self.state.next_request_id();
        debug!(request_id, tool = %params.name, "Tool call");

        match self.state.tools.execute(params).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(request_id, "Tool execution error: {}", e);
                Ok(CallToolResult::error(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::pipeline::QueryOrchestrator;
    use crate::protocol::ClientInfo;
    use crate::server::ServerStateBuilder;
    use crate::testing::{FakeDatabase, StubGenerator};

    fn handler() -> McpHandler {
        let config = ServerConfig::builder()
            .session_secret("handler-test-session-secret")
            .build()
            .unwrap();
        let orchestrator = Arc::new(QueryOrchestrator::from_config(
            &config,
            Arc::new(FakeDatabase::customers()),
            Arc::new(StubGenerator::sql("SELECT 1")),
        ));
        let state = ServerStateBuilder::new()
            .config(config)
            .orchestrator(orchestrator)
            .build()
            .unwrap();
        McpHandler::new(Arc::new(state))
    }

    fn init_params() -> InitializeParams {
        InitializeParams {
            protocol_version: MCP_VERSION.into(),
            capabilities: serde_json::Value::Null,
            client_info: ClientInfo {
                name: "inspector".into(),
                version: "1.0".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_initialize_advertises_tools() {
        let handler = handler();
        let result = handler.initialize(init_params()).await.unwrap();

        assert_eq!(result.server_info.name, "askdb-mcp");
        assert!(result.capabilities.tools.is_some());
        assert!(handler.state().is_initialized());
        assert_eq!(handler.state().client_info().unwrap().name, "inspector");

        let names: Vec<String> = handler
            .list_tools()
            .await
            .unwrap()
            .tools
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["ask", "connect"]);
    }

    #[tokio::test]
    async fn test_tool_call_before_initialize() {
        let handler = handler();
        let result = handler
            .call_tool(CallToolParams {
                name: "ask".into(),
                arguments: serde_json::json!({}),
            })
            .await;
        assert!(matches!(result, Err(ProtocolError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_tool_errors_become_error_results() {
        let handler = handler();
        handler.initialize(init_params()).await.unwrap();

        let result = handler
            .call_tool(CallToolParams {
                name: "drop_database".into(),
                arguments: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.text_content().contains("drop_database"));
    }
}
