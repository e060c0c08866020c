//! Database collaborator traits.

use crate::database::result::{ExecutionPlan, QueryResult, SchemaSummary};
use crate::error::DbResult;
use crate::session::ConnectionCredentials;
use async_trait::async_trait;

/// Opens connections to whatever database a set of credentials names.
///
/// Implementations: [`PostgresDriver`](crate::database::PostgresDriver).
///
/// Every call borrows a connection for its own duration and gives it back on all
/// exit paths. Nothing a caller submits here may change data.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Returns the driver name (e.g., "postgres").
    fn name(&self) -> &'static str;

    /// Open (or reuse) a connection and run a trivial round trip.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::ConnectionFailed`](crate::error::DatabaseError::ConnectionFailed)
    /// with a classified failure kind.
    async fn probe(&self, credentials: &ConnectionCredentials) -> DbResult<()>;

    /// Plan `sql` without executing it.
    async fn explain(&self, credentials: &ConnectionCredentials, sql: &str)
    -> DbResult<ExecutionPlan>;

    /// Execute `sql` read-only and collect every row.
    async fn execute(&self, credentials: &ConnectionCredentials, sql: &str)
    -> DbResult<QueryResult>;
}

/// Describes the tables a set of credentials can see.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn schema_summary(&self, credentials: &ConnectionCredentials) -> DbResult<SchemaSummary>;
}
