//! MCP tool definitions and registry.
//!
//! Tool-level failures come back as `isError` results carrying a JSON body
//! `{"error": <code>, "message": <text>}` rather than as JSON-RPC errors, so a
//! client can tell a rejected question apart from a broken request.

pub mod ask;
pub mod connect;
pub mod registry;

pub use ask::AskTool;
pub use connect::ConnectTool;
pub use registry::{ToolHandler, ToolRegistry};

use crate::auth::{Identity, VerifierChain};
use crate::error::{PipelineError, Stage};
use crate::pipeline::{QueryOrchestrator, audit_rejection};
use crate::protocol::CallToolResult;
use serde_json::json;
use std::sync::Arc;

/// Register the `connect` and `ask` tools.
pub fn create_registry(
    orchestrator: Arc<QueryOrchestrator>,
    verifiers: Arc<VerifierChain>,
) -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(ConnectTool::new(
        Arc::clone(&orchestrator),
        Arc::clone(&verifiers),
    ));
    registry.register(AskTool::new(orchestrator, verifiers));
    registry
}

/// Tool result for a request that ended without an answer.
pub fn rejection_result(err: &PipelineError) -> CallToolResult {
    let mut body = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    if let PipelineError::RateLimited { retry_after_secs } = err {
        body["retry_after_secs"] = json!(retry_after_secs);
    }
    CallToolResult::error(body.to_string())
}

/// Resolve the caller, or the rejection to return instead.
pub(crate) fn authenticate(
    verifiers: &VerifierChain,
    token: &str,
) -> std::result::Result<Identity, CallToolResult> {
    verifiers.authenticate(token).map_err(|e| {
        let err = PipelineError::from(e);
        audit_rejection("anonymous", Stage::Authenticate, &err);
        rejection_result(&err)
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::HmacJwtVerifier;
    use crate::config::ServerConfig;
    use crate::testing::{FakeDatabase, StubGenerator};
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

    const JWT_SECRET: &str = "tool-test-jwt-secret";

    pub(crate) fn bearer(sub: &str) -> String {
        let claims = json!({
            "sub": sub,
            "exp": chrono::Utc::now().timestamp() + 3600,
        });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .unwrap()
    }

    pub(crate) fn registry(db: FakeDatabase, generator: StubGenerator) -> (ToolRegistry, Arc<FakeDatabase>) {
        let config = ServerConfig::builder()
            .session_secret("tool-test-session-secret")
            .build()
            .unwrap();
        let db = Arc::new(db);
        let orchestrator = Arc::new(QueryOrchestrator::from_config(
            &config,
            Arc::clone(&db),
            Arc::new(generator),
        ));
        let verifiers = Arc::new(VerifierChain::new().with(HmacJwtVerifier::new(JWT_SECRET.as_bytes(), None)));
        (create_registry(orchestrator, verifiers), db)
    }
}
