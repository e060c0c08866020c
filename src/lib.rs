//! MCP server that answers natural-language questions over PostgreSQL.
//!
//! A language model proposes SQL; nothing it proposes runs until it has passed a
//! layered gate: per-identity rate limiting, encrypted stateless sessions, a static
//! validator that admits exactly one bounded read-only SELECT, and a plan-only check
//! against the live database.
//!
//! # Example
//!
//! ```no_run
//! use askdb_mcp::{
//!     config::ServerConfig,
//!     database::{PoolConfig, PostgresDriver},
//!     generation::ChatCompletionsGenerator,
//!     pipeline::QueryOrchestrator,
//!     protocol::McpServerBuilder,
//!     server::{McpHandler, ServerStateBuilder},
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!
//!     let driver = Arc::new(PostgresDriver::new(PoolConfig::from(&config.database)));
//!     let generator = Arc::new(ChatCompletionsGenerator::new(config.generator.clone())?);
//!     let orchestrator = Arc::new(QueryOrchestrator::from_config(&config, driver, generator));
//!
//!     let state = Arc::new(
//!         ServerStateBuilder::new()
//!             .config(config)
//!             .orchestrator(orchestrator)
//!             .build()?,
//!     );
//!
//!     let server = McpServerBuilder::new()
//!         .handler(McpHandler::new(state))
//!         .build()?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod protocol;
pub mod security;
pub mod server;
pub mod session;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{Identity, VerifierChain};
pub use config::ServerConfig;
pub use database::{ConnectionFactory, SchemaIntrospector};
pub use error::{McpError, PipelineError, Result};
pub use pipeline::{QueryOrchestrator, QueryOutcome};
pub use protocol::{McpServer, McpServerBuilder};
pub use security::{ExplainGuard, RateLimiter, SqlValidator};
pub use server::{McpHandler, ServerState, ServerStateBuilder};
pub use session::{ConnectionCredentials, SessionCodec, SessionToken};
