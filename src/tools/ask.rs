//! `ask` tool: answer a natural-language question with a checked, read-only query.

use super::{authenticate, rejection_result};
use crate::auth::VerifierChain;
use crate::error::{Result, ToolError};
use crate::pipeline::QueryOrchestrator;
use crate::protocol::{CallToolResult, Tool};
use crate::tools::registry::ToolHandler;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

#[derive(Deserialize)]
pub struct AskArgs {
    pub auth_token: String,
    pub session_token: String,
    pub question: String,
}

pub struct AskTool {
    orchestrator: Arc<QueryOrchestrator>,
    verifiers: Arc<VerifierChain>,
}

impl AskTool {
    pub fn new(orchestrator: Arc<QueryOrchestrator>, verifiers: Arc<VerifierChain>) -> Self {
        Self {
            orchestrator,
            verifiers,
        }
    }
}

#[async_trait]
impl ToolHandler for AskTool {
    fn definition(&self) -> Tool {
        crate::define_tool! {
            name: "ask",
            description: "Answer a question about the connected database. The question is turned \
                into a single read-only SELECT, checked against the live schema, and run with a \
                row limit. Returns the executed SQL, the rows, the column names and the execution time.",
            schema: {
                "type": "object",
                "properties": {
                    "auth_token": {
                        "type": "string",
                        "description": "Bearer token identifying the caller"
                    },
                    "session_token": {
                        "type": "string",
                        "description": "Token returned by the 'connect' tool"
                    },
                    "question": {
                        "type": "string",
                        "description": "Natural-language question, e.g. 'show me 5 customers'"
                    }
                },
                "required": ["auth_token", "session_token", "question"]
            }
        }
    }

    #[instrument(skip(self, arguments), fields(tool = "ask"))]
    async fn execute(&self, arguments: Value) -> Result<CallToolResult> {
        let args: AskArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        if args.question.trim().is_empty() {
            return Err(ToolError::MissingArgument("question".into()).into());
        }

        let identity = match authenticate(&self.verifiers, &args.auth_token) {
            Ok(identity) => identity,
            Err(rejection) => return Ok(rejection),
        };

        match self
            .orchestrator
            .ask(&identity, &args.session_token, &args.question)
            .await
        {
            Ok(outcome) => Ok(CallToolResult::json(&outcome)),
            Err(e) => Ok(rejection_result(&e)),
        }
    }
}
