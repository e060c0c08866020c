//! MCP server binary entry point.

use anyhow::{Context, Result};
use askdb_mcp::{
    config::ServerConfig,
    database::{PoolConfig, PostgresDriver},
    generation::ChatCompletionsGenerator,
    pipeline::QueryOrchestrator,
    protocol::McpServerBuilder,
    server::{McpHandler, ServerStateBuilder},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal in production.
    dotenv::dotenv().ok();
    init_tracing();

    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = ServerConfig::from_env().context("invalid configuration")?;

    if !config.auth.has_verifier() {
        warn!("No AUTH_JWT_SECRET or AUTH_RSA_PUBLIC_KEY configured; every tool call will be rejected");
    }
    if config.generator.api_key.is_none() {
        warn!("LLM_API_KEY is not set; 'ask' will report the generator as unavailable");
    }

    let driver = Arc::new(PostgresDriver::new(PoolConfig::from(&config.database)));
    let generator = Arc::new(
        ChatCompletionsGenerator::new(config.generator.clone())
            .context("failed to build the SQL generator client")?,
    );
    let orchestrator = Arc::new(QueryOrchestrator::from_config(&config, driver, generator));

    let name = config.name.to_string();
    let version = config.version.to_string();
    let state = Arc::new(
        ServerStateBuilder::new()
            .config(config)
            .orchestrator(orchestrator)
            .build()
            .context("failed to build server state")?,
    );

    info!("Server state initialized with {} tools", state.tools.len());

    let server = McpServerBuilder::new()
        .handler(McpHandler::new(state))
        .name(name)
        .version(version)
        .build()?;

    info!("MCP server ready, waiting for requests...");

    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("askdb_mcp=info,warn"));

    // Structured JSON to stderr; stdout carries the protocol.
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .json()
        .init();
}
