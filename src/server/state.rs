//! Server state management.

use crate::auth::VerifierChain;
use crate::config::ServerConfig;
use crate::error::{McpError, Result};
use crate::pipeline::QueryOrchestrator;
use crate::protocol::ClientInfo;
use crate::tools::ToolRegistry;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct ServerState {
    pub config: ServerConfig,
    pub orchestrator: Arc<QueryOrchestrator>,
    pub tools: ToolRegistry,
    initialized: AtomicBool,
    client_info: RwLock<Option<ClientInfo>>,
    request_count: AtomicU64,
}

impl ServerState {
    pub fn new(config: ServerConfig, orchestrator: Arc<QueryOrchestrator>, tools: ToolRegistry) -> Self {
        Self {
            config,
            orchestrator,
            tools,
            initialized: AtomicBool::new(false),
            client_info: RwLock::new(None),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialized(&self, client_info: ClientInfo) {
        *self.client_info.write() = Some(client_info);
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn client_info(&self) -> Option<ClientInfo> {
        self.client_info.read().clone()
    }

    pub fn next_request_id(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }
}

pub struct ServerStateBuilder {
    config: Option<ServerConfig>,
    orchestrator: Option<Arc<QueryOrchestrator>>,
    verifiers: Option<Arc<VerifierChain>>,
}

impl ServerStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            orchestrator: None,
            verifiers: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn orchestrator(mut self, orchestrator: Arc<QueryOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Defaults to the chain described by `config.auth`.
    pub fn verifiers(mut self, verifiers: Arc<VerifierChain>) -> Self {
        self.verifiers = Some(verifiers);
        self
    }

    pub fn build(self) -> Result<ServerState> {
        let config = self.config.ok_or_else(|| McpError::Internal {
            message: "Config is required".into(),
        })?;
        let orchestrator = self.orchestrator.ok_or_else(|| McpError::Internal {
            message: "Orchestrator is required".into(),
        })?;
        let verifiers = match self.verifiers {
            Some(verifiers) => verifiers,
            None => Arc::new(VerifierChain::from_config(&config.auth)?),
        };

        let tools = crate::tools::create_registry(Arc::clone(&orchestrator), verifiers);

        Ok(ServerState::new(config, orchestrator, tools))
    }
}

impl Default for ServerStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
