//! PostgreSQL driver using `tokio-postgres` and `deadpool`.
//!
//! One pool per distinct set of credentials, created on first use and keyed by the
//! credential fingerprint. Plans and executions run inside a read-only transaction
//! with a transaction-local `statement_timeout`; the transaction is never committed.

use crate::database::pool::{PoolConfig, PoolMetrics};
use crate::database::result::*;
use crate::database::traits::{ConnectionFactory, SchemaIntrospector};
use crate::error::{ConnectFailure, DatabaseError, DbResult};
use crate::session::{ConnectionCredentials, TlsMode};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use dashmap::DashMap;
use deadpool_postgres::{
    Config as DeadpoolConfig, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime,
    SslMode, Timeouts,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::FromSql;
use tokio_postgres::NoTls;
use tracing::{debug, info, instrument, warn};

const APPLICATION_NAME: &str = "askdb-mcp";

/// Extra time granted past `statement_timeout` before the client gives up.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

const SCHEMA_QUERY: &str = r#"
    SELECT
        c.table_schema::text AS table_schema,
        c.table_name::text AS table_name,
        c.column_name::text AS column_name,
        c.data_type::text AS data_type
    FROM information_schema.columns c
    WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema')
      AND c.table_schema NOT LIKE 'pg_toast%'
      AND c.table_schema NOT LIKE 'pg_temp%'
    ORDER BY c.table_schema, c.table_name, c.ordinal_position
"#;

/// PostgreSQL database driver.
pub struct PostgresDriver {
    pools: DashMap<String, Pool>,
    config: PoolConfig,
    metrics: Arc<PoolMetrics>,
}

impl PostgresDriver {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pools: DashMap::new(),
            config,
            metrics: Arc::new(PoolMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of live per-credential pools.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn pool_for(&self, credentials: &ConnectionCredentials) -> DbResult<Pool> {
        if credentials.tls_mode == TlsMode::Require {
            return Err(DatabaseError::ConnectionFailed {
                kind: ConnectFailure::TlsUnavailable,
                detail: "sslmode=require is not supported by this server".into(),
            });
        }

        let key = credentials.fingerprint();
        if let Some(pool) = self.pools.get(&key) {
            return Ok(pool.value().clone());
        }

        let pool = self.create_pool(credentials)?;
        let pool = self.pools.entry(key).or_insert(pool).value().clone();
        Ok(pool)
    }

    fn create_pool(&self, credentials: &ConnectionCredentials) -> DbResult<Pool> {
        let mut cfg = DeadpoolConfig::new();
        cfg.host = Some(credentials.host.clone());
        cfg.port = Some(credentials.port);
        cfg.dbname = Some(credentials.database.clone());
        cfg.user = Some(credentials.user.clone());
        cfg.password = Some(credentials.password.clone());
        cfg.application_name = Some(APPLICATION_NAME.into());
        cfg.connect_timeout = Some(self.config.connection_timeout);
        cfg.ssl_mode = Some(match credentials.tls_mode {
            TlsMode::Disable => SslMode::Disable,
            TlsMode::Prefer | TlsMode::Require => SslMode::Prefer,
        });
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut timeouts = Timeouts::default();
        timeouts.wait = Some(self.config.connection_timeout);
        timeouts.create = Some(self.config.connection_timeout);
        timeouts.recycle = Some(self.config.recycle_timeout);
        let mut pool_config = deadpool_postgres::PoolConfig::new(self.config.max_size as usize);
        pool_config.timeouts = timeouts;
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::ConnectionFailed {
                kind: ConnectFailure::Other,
                detail: e.to_string(),
            })?;

        self.metrics.record_pool_created();
        info!(
            endpoint = %credentials.display_target(),
            max_size = self.config.max_size,
            "PostgreSQL connection pool created"
        );
        Ok(pool)
    }

    fn evict(&self, credentials: &ConnectionCredentials) {
        if self.pools.remove(&credentials.fingerprint()).is_some() {
            self.metrics.record_pool_evicted();
            debug!(endpoint = %credentials.display_target(), "Evicted connection pool");
        }
    }

    async fn connection(&self, credentials: &ConnectionCredentials) -> DbResult<Object> {
        let pool = self.pool_for(credentials)?;
        pool.get().await.map_err(|e| {
            self.metrics.record_connection_error();
            classify_pool_error(e)
        })
    }

    fn statement_timeout_ms(&self) -> u64 {
        self.config.query_timeout.as_millis() as u64
    }

    async fn with_deadline<T, F>(&self, fut: F) -> DbResult<T>
    where
        F: std::future::Future<Output = DbResult<T>>,
    {
        let deadline = self.config.query_timeout + CLIENT_TIMEOUT_GRACE;
        timeout(deadline, fut)
            .await
            .map_err(|_| DatabaseError::Timeout(deadline.as_millis() as u64))?
    }

    fn query_error(&self, err: tokio_postgres::Error) -> DatabaseError {
        self.metrics.record_query_error();
        if err.code() == Some(&SqlState::QUERY_CANCELED) {
            return DatabaseError::Timeout(self.statement_timeout_ms());
        }
        DatabaseError::QueryFailed(summarize(&err))
    }

    /// Convert a PostgreSQL row to our Row type.
    fn convert_row(pg_row: &tokio_postgres::Row, columns: &[Column]) -> Row {
        let mut row = Row::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            row.push(col.name.clone(), Self::get_cell_value(pg_row, i, &col.data_type));
        }
        row
    }

    /// Extract a cell by the column's PostgreSQL type name.
    fn get_cell_value(row: &tokio_postgres::Row, index: usize, data_type: &str) -> CellValue {
        let value = match data_type {
            "bool" => opt::<bool>(row, index).map(CellValue::Bool),
            "int2" => opt::<i16>(row, index).map(|v| CellValue::Int(v as i64)),
            "int4" => opt::<i32>(row, index).map(|v| CellValue::Int(v as i64)),
            "int8" => opt::<i64>(row, index).map(CellValue::Int),
            "oid" => opt::<u32>(row, index).map(|v| CellValue::Int(v as i64)),
            "float4" => opt::<f32>(row, index).map(|v| CellValue::Float(v as f64)),
            "float8" => opt::<f64>(row, index).map(CellValue::Float),
            "numeric" => opt::<Decimal>(row, index).map(CellValue::Decimal),
            "date" => opt::<NaiveDate>(row, index).map(CellValue::Date),
            "time" => opt::<NaiveTime>(row, index).map(CellValue::Time),
            "timestamp" => opt::<NaiveDateTime>(row, index).map(CellValue::Timestamp),
            "timestamptz" => opt::<DateTime<Utc>>(row, index).map(CellValue::TimestampTz),
            "json" | "jsonb" => opt::<serde_json::Value>(row, index).map(CellValue::Json),
            "uuid" => opt::<uuid::Uuid>(row, index).map(|v| CellValue::String(v.to_string())),
            "bytea" => opt::<Vec<u8>>(row, index).map(CellValue::Bytes),
            _ => opt::<String>(row, index).map(CellValue::String),
        };
        value.unwrap_or(CellValue::Null)
    }
}

fn opt<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, index: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(index).ok().flatten()
}

/// Engine message plus SQLSTATE, without connection details.
fn summarize(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => format!("{} (SQLSTATE {})", db.message(), db.code().code()),
        None => err.to_string(),
    }
}

fn classify_connect_error(err: &tokio_postgres::Error) -> ConnectFailure {
    if let Some(code) = err.code() {
        return if *code == SqlState::INVALID_PASSWORD
            || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
        {
            ConnectFailure::AuthenticationFailed
        } else if *code == SqlState::INVALID_CATALOG_NAME {
            ConnectFailure::UnknownDatabase
        } else {
            ConnectFailure::Other
        };
    }

    match std::error::Error::source(err).and_then(|s| s.downcast_ref::<std::io::Error>()) {
        Some(io) if io.kind() == std::io::ErrorKind::TimedOut => ConnectFailure::TimedOut,
        Some(_) => ConnectFailure::Unreachable,
        None => ConnectFailure::Other,
    }
}

fn classify_pool_error(err: PoolError) -> DatabaseError {
    match err {
        PoolError::Timeout(_) => DatabaseError::ConnectionFailed {
            kind: ConnectFailure::TimedOut,
            detail: "timed out waiting for a connection".into(),
        },
        PoolError::Backend(e) => DatabaseError::ConnectionFailed {
            kind: classify_connect_error(&e),
            detail: summarize(&e),
        },
        PoolError::Closed => DatabaseError::PoolExhausted,
        other => DatabaseError::ConnectionFailed {
            kind: ConnectFailure::Other,
            detail: other.to_string(),
        },
    }
}

#[async_trait]
impl ConnectionFactory for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self, credentials), fields(db = "postgres", endpoint = %credentials.display_target()))]
    async fn probe(&self, credentials: &ConnectionCredentials) -> DbResult<()> {
        let result = async {
            let client = self.connection(credentials).await?;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(|e| DatabaseError::ConnectionFailed {
                    kind: classify_connect_error(&e),
                    detail: summarize(&e),
                })?;
            Ok(())
        }
        .await;

        if let Err(err) = &result {
            warn!(error = %err, "Connection probe failed");
            self.evict(credentials);
        }
        result
    }

    #[instrument(skip(self, credentials, sql), fields(db = "postgres"))]
    async fn explain(
        &self,
        credentials: &ConnectionCredentials,
        sql: &str,
    ) -> DbResult<ExecutionPlan> {
        self.metrics.record_plan_requested();
        let explain_query = format!("EXPLAIN {sql}");

        self.with_deadline(async {
            let mut client = self.connection(credentials).await?;
            let tx = client
                .build_transaction()
                .read_only(true)
                .start()
                .await
                .map_err(|e| self.query_error(e))?;
            tx.batch_execute(&format!(
                "SET LOCAL statement_timeout = {}",
                self.statement_timeout_ms()
            ))
            .await
            .map_err(|e| self.query_error(e))?;

            let rows = tx
                .query(explain_query.as_str(), &[])
                .await
                .map_err(|e| self.query_error(e))?;
            let lines = rows
                .iter()
                .filter_map(|r| r.try_get::<_, String>(0).ok())
                .collect();

            // Dropping the transaction rolls it back.
            Ok(ExecutionPlan::from_text(lines))
        })
        .await
    }

    #[instrument(skip(self, credentials, sql), fields(db = "postgres"))]
    async fn execute(
        &self,
        credentials: &ConnectionCredentials,
        sql: &str,
    ) -> DbResult<QueryResult> {
        self.with_deadline(async {
            let mut client = self.connection(credentials).await?;
            let tx = client
                .build_transaction()
                .read_only(true)
                .start()
                .await
                .map_err(|e| self.query_error(e))?;
            tx.batch_execute(&format!(
                "SET LOCAL statement_timeout = {}",
                self.statement_timeout_ms()
            ))
            .await
            .map_err(|e| self.query_error(e))?;

            let stmt = tx.prepare(sql).await.map_err(|e| self.query_error(e))?;
            let pg_rows = tx.query(&stmt, &[]).await.map_err(|e| self.query_error(e))?;

            let columns: Vec<Column> = stmt
                .columns()
                .iter()
                .map(|c| Column::new(c.name(), c.type_().name()))
                .collect();
            let rows: Vec<Row> = pg_rows
                .iter()
                .map(|r| Self::convert_row(r, &columns))
                .collect();

            self.metrics.record_query_executed();
            debug!(rows = rows.len(), "Query executed");
            Ok(QueryResult::new(columns, rows))
        })
        .await
    }
}

#[async_trait]
impl SchemaIntrospector for PostgresDriver {
    #[instrument(skip(self, credentials), fields(db = "postgres"))]
    async fn schema_summary(&self, credentials: &ConnectionCredentials) -> DbResult<SchemaSummary> {
        let rows = self
            .with_deadline(async {
                let client = self.connection(credentials).await?;
                client
                    .query(SCHEMA_QUERY, &[])
                    .await
                    .map_err(|e| self.query_error(e))
            })
            .await?;

        let mut tables: Vec<TableSummary> = Vec::new();
        for row in &rows {
            let schema: String = row.try_get(0).map_err(|e| self.query_error(e))?;
            let table: String = row.try_get(1).map_err(|e| self.query_error(e))?;
            let column = Column::new(
                row.try_get::<_, String>(2).map_err(|e| self.query_error(e))?,
                row.try_get::<_, String>(3).map_err(|e| self.query_error(e))?,
            );

            match tables.last_mut() {
                Some(last) if last.schema == schema && last.name == table => {
                    last.columns.push(column)
                }
                _ => tables.push(TableSummary {
                    schema,
                    name: table,
                    columns: vec![column],
                }),
            }
        }

        debug!(tables = tables.len(), "Schema introspected");
        Ok(SchemaSummary::new(tables))
    }
}
