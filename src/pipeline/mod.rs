//! Question-to-result pipeline.
//!
//! A question runs through a fixed sequence of stages and stops at the first one
//! that fails:
//!
//! ```text
//! rate check -> session decode -> schema fetch -> SQL generation
//!            -> static validation -> plan check -> execution
//! ```
//!
//! Every failure is mapped to one [`PipelineError`] at the stage that produced it
//! and written to the audit log with the caller's identity.

use crate::auth::Identity;
use crate::cache::SchemaCache;
use crate::config::ServerConfig;
use crate::database::{ConnectionFactory, Row, SchemaIntrospector, SchemaSummary};
use crate::error::{DatabaseError, PipelineError, PipelineResult, Stage};
use crate::generation::{Generation, SqlGenerator};
use crate::security::{ExplainGuard, RateLimiter, SqlValidator, ValidatedStatement};
use crate::session::{ConnectionCredentials, SessionCodec, SessionToken};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Result of a successfully answered question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// The statement that actually ran, after validation rewrote it.
    pub sql: String,
    #[serde(rename = "results")]
    pub rows: Vec<Row>,
    pub column_names: Vec<String>,
    pub row_count: usize,
    pub execution_time_ms: f64,
}

/// Write a rejection to the audit log.
pub fn audit_rejection(identity: &str, stage: Stage, err: &PipelineError) {
    let reason = err.audit_reason();
    if err.is_defect() {
        error!(identity, stage = %stage, code = err.code(), reason = %reason, "Request failed");
    } else {
        warn!(identity, stage = %stage, code = err.code(), reason = %reason, "Request rejected");
    }
}

pub struct QueryOrchestrator {
    codec: SessionCodec,
    limiter: RateLimiter,
    validator: SqlValidator,
    guard: ExplainGuard,
    factory: Arc<dyn ConnectionFactory>,
    introspector: Arc<dyn SchemaIntrospector>,
    schema_cache: SchemaCache,
    generator: Arc<dyn SqlGenerator>,
}

impl QueryOrchestrator {
    pub fn from_config<D>(
        config: &ServerConfig,
        database: Arc<D>,
        generator: Arc<dyn SqlGenerator>,
    ) -> Self
    where
        D: ConnectionFactory + SchemaIntrospector + 'static,
    {
        let security = &config.security;
        let factory: Arc<dyn ConnectionFactory> = database.clone();
        let introspector: Arc<dyn SchemaIntrospector> = database;

        Self {
            codec: SessionCodec::new(config.session.secret.as_bytes())
                .with_token_ttl(config.session.token_ttl),
            limiter: RateLimiter::new(security.rate_limit_requests, security.rate_limit_window),
            validator: SqlValidator::new()
                .max_query_length(security.max_query_length)
                .row_limit_ceiling(security.row_limit_ceiling),
            guard: ExplainGuard::new().max_plan_cost(security.max_plan_cost),
            factory,
            introspector,
            schema_cache: SchemaCache::new(config.schema_cache_ttl),
            generator,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    /// Test the credentials with a live round trip and seal them into a token.
    pub async fn connect(
        &self,
        identity: &Identity,
        credentials: &ConnectionCredentials,
    ) -> PipelineResult<SessionToken> {
        let target = credentials.display_target();

        if let Err(e) = self.factory.probe(credentials).await {
            let err = connect_error(e);
            audit_rejection(identity.as_str(), Stage::Connect, &err);
            return Err(err);
        }

        // A fresh connect picks up schema changes.
        self.schema_cache.invalidate(&credentials.fingerprint());

        let token = self.codec.encode(credentials).map_err(|e| {
            let err = PipelineError::from(e);
            audit_rejection(identity.as_str(), Stage::Connect, &err);
            err
        })?;

        info!(identity = identity.as_str(), target = %target, "Database session issued");
        Ok(token)
    }

    /// Answer a natural-language question against the session's database.
    pub async fn ask(
        &self,
        identity: &Identity,
        token: &str,
        question: &str,
    ) -> PipelineResult<QueryOutcome> {
        self.run(identity, token, question).await.map_err(|(stage, err)| {
            audit_rejection(identity.as_str(), stage, &err);
            err
        })
    }

    async fn run(
        &self,
        identity: &Identity,
        token: &str,
        question: &str,
    ) -> Result<QueryOutcome, (Stage, PipelineError)> {
        self.limiter
            .check(identity.as_str())
            .map_err(|e| (Stage::RateCheck, e.into()))?;

        let credentials = self
            .codec
            .decode(token)
            .map_err(|e| (Stage::SessionDecode, e.into()))?;

        let schema = self
            .schema_for(&credentials)
            .await
            .map_err(|e| (Stage::SchemaFetch, e))?;

        let candidate = match self.generator.generate(&schema, question).await {
            Ok(Generation::Candidate(sql)) => sql,
            Ok(Generation::Unanswerable) => {
                return Err((Stage::SqlGeneration, PipelineError::GenerationUnanswerable));
            }
            Err(e) => {
                return Err((
                    Stage::SqlGeneration,
                    PipelineError::GenerationUnavailable {
                        detail: e.to_string(),
                    },
                ));
            }
        };

        let statement = self
            .validator
            .validate(&candidate)
            .map_err(|e| (Stage::StaticValidate, e.into()))?;

        let verdict = self
            .guard
            .check_safety(self.factory.as_ref(), &credentials, &statement)
            .await;
        if !verdict.accepted {
            return Err((
                Stage::DynamicValidate,
                PipelineError::DynamicSafetyViolation {
                    reason: verdict
                        .reason
                        .unwrap_or_else(|| "rejected by the database planner".into()),
                },
            ));
        }

        self.execute(identity, &credentials, statement)
            .await
            .map_err(|e| (Stage::Execute, e))
    }

    async fn schema_for(
        &self,
        credentials: &ConnectionCredentials,
    ) -> PipelineResult<Arc<SchemaSummary>> {
        let fingerprint = credentials.fingerprint();
        if let Some(schema) = self.schema_cache.get(&fingerprint) {
            return Ok(schema);
        }

        let schema = self
            .introspector
            .schema_summary(credentials)
            .await
            .map(Arc::new)
            .map_err(|e| PipelineError::SchemaUnavailable {
                detail: e.to_string(),
            })?;
        self.schema_cache.insert(&fingerprint, Arc::clone(&schema));
        Ok(schema)
    }

    async fn execute(
        &self,
        identity: &Identity,
        credentials: &ConnectionCredentials,
        statement: ValidatedStatement,
    ) -> PipelineResult<QueryOutcome> {
        let start = Instant::now();
        let result = self
            .factory
            .execute(credentials, statement.sql())
            .await
            .map_err(execution_error)?;
        let execution_time_ms = round_ms(start.elapsed().as_secs_f64() * 1000.0);

        let sql = statement.into_sql();
        info!(
            identity = identity.as_str(),
            sql = %sql,
            row_count = result.row_count,
            duration_ms = execution_time_ms,
            "Query executed"
        );

        Ok(QueryOutcome {
            column_names: result.column_names(),
            row_count: result.row_count,
            rows: result.rows,
            sql,
            execution_time_ms,
        })
    }
}

fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

fn connect_error(err: DatabaseError) -> PipelineError {
    use crate::error::ConnectFailure;

    let (kind, detail) = match err {
        DatabaseError::ConnectionFailed { kind, detail } => (kind, detail),
        DatabaseError::Timeout(_) => (ConnectFailure::TimedOut, err.to_string()),
        other => (ConnectFailure::Other, other.to_string()),
    };
    PipelineError::ConnectionRefused { kind, detail }
}

fn execution_error(err: DatabaseError) -> PipelineError {
    let summary = match err {
        DatabaseError::QueryFailed(summary) | DatabaseError::Transaction(summary) => summary,
        other => other.to_string(),
    };
    PipelineError::BackendExecutionError { summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::error::{ConnectFailure, ValidationError};
    use crate::testing::{FakeDatabase, StubGenerator, customers_credentials};

    const SECRET: &str = "pipeline-test-secret-0123456789";

    struct Harness {
        orchestrator: QueryOrchestrator,
        db: Arc<FakeDatabase>,
        generator: Arc<StubGenerator>,
        identity: Identity,
    }

    impl Harness {
        fn new(db: FakeDatabase, generator: StubGenerator) -> Self {
            Self::with_config(db, generator, SecurityConfig::default())
        }

        fn with_config(db: FakeDatabase, generator: StubGenerator, security: SecurityConfig) -> Self {
            let config = ServerConfig::builder()
                .session_secret(SECRET)
                .security(security)
                .build()
                .unwrap();
            let db = Arc::new(db);
            let generator = Arc::new(generator);
            let orchestrator = QueryOrchestrator::from_config(
                &config,
                Arc::clone(&db),
                Arc::clone(&generator) as Arc<dyn SqlGenerator>,
            );
            Self {
                orchestrator,
                db,
                generator,
                identity: Identity::new("alice").unwrap(),
            }
        }

        async fn token(&self) -> SessionToken {
            self.orchestrator
                .connect(&self.identity, &customers_credentials())
                .await
                .unwrap()
        }

        async fn ask(&self, question: &str) -> PipelineResult<QueryOutcome> {
            let token = self.token().await;
            self.orchestrator
                .ask(&self.identity, token.as_str(), question)
                .await
        }
    }

    #[tokio::test]
    async fn test_end_to_end_select() {
        let h = Harness::new(
            FakeDatabase::customers(),
            StubGenerator::sql("SELECT name FROM customers LIMIT 5"),
        );

        let outcome = h.ask("show me 5 customers").await.unwrap();

        assert_eq!(outcome.sql, "SELECT name FROM customers LIMIT 5");
        assert_eq!(outcome.column_names, vec!["name".to_string()]);
        assert!(outcome.row_count <= 5);
        assert_eq!(outcome.rows.len(), outcome.row_count);
        assert!(outcome.execution_time_ms >= 0.0);

        assert_eq!(h.db.probe_count(), 1);
        assert_eq!(h.db.explain_count(), 1);
        assert_eq!(h.db.executed(), vec!["SELECT name FROM customers LIMIT 5".to_string()]);
        assert_eq!(h.generator.questions(), vec!["show me 5 customers".to_string()]);
    }

    #[tokio::test]
    async fn test_outcome_serializes_results() {
        let h = Harness::new(
            FakeDatabase::customers(),
            StubGenerator::sql("SELECT name FROM customers LIMIT 5"),
        );
        let outcome = h.ask("show me 5 customers").await.unwrap();
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["results"][0]["name"], "Ada");
        assert_eq!(json["column_names"][0], "name");
        assert!(json.get("rows").is_none());
    }

    #[tokio::test]
    async fn test_delete_rejected_before_plan_check() {
        let h = Harness::new(FakeDatabase::customers(), StubGenerator::sql("DELETE FROM customers"));

        let err = h.ask("remove everyone").await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StaticSafetyViolation(ValidationError::ForbiddenKeyword(ref kw)) if kw == "DELETE"
        ));
        assert!(err.is_expected());
        assert_eq!(h.db.explain_count(), 0);
        assert_eq!(h.db.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_limit_is_lowered_before_execution() {
        let h = Harness::new(
            FakeDatabase::customers(),
            StubGenerator::sql("SELECT name FROM customers LIMIT 500"),
        );

        let outcome = h.ask("all customers").await.unwrap();
        assert!(outcome.sql.contains("LIMIT 100"));
        assert!(!outcome.sql.contains("500"));
        assert_eq!(h.db.executed(), vec![outcome.sql.clone()]);
    }

    #[tokio::test]
    async fn test_unanswerable_stops_before_validation() {
        let h = Harness::new(FakeDatabase::customers(), StubGenerator::unanswerable());

        let err = h.ask("what is the weather").await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationUnanswerable));
        assert_eq!(h.db.explain_count(), 0);
        assert_eq!(h.db.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_generator_failure_is_unavailable() {
        let h = Harness::new(FakeDatabase::customers(), StubGenerator::failing("upstream 503"));

        let err = h.ask("show me customers").await.unwrap_err();
        assert!(matches!(err, PipelineError::GenerationUnavailable { .. }));
        assert!(!err.to_string().contains("503"));
        assert!(err.audit_reason().contains("503"));
    }

    #[tokio::test]
    async fn test_invalid_session_stops_before_schema_fetch() {
        let h = Harness::new(FakeDatabase::customers(), StubGenerator::sql("SELECT 1"));

        let err = h
            .orchestrator
            .ask(&h.identity, "v1.not-a-real-token", "anything")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidSession));
        assert_eq!(err.to_string(), "Invalid database session. Please reconnect.");
        assert_eq!(h.db.schema_fetch_count(), 0);
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_before_any_work() {
        let security = SecurityConfig {
            rate_limit_requests: 2,
            ..Default::default()
        };
        let h = Harness::with_config(
            FakeDatabase::customers(),
            StubGenerator::sql("SELECT name FROM customers"),
            security,
        );
        let token = h.token().await;

        for _ in 0..2 {
            h.orchestrator
                .ask(&h.identity, token.as_str(), "customers")
                .await
                .unwrap();
        }
        let err = h
            .orchestrator
            .ask(&h.identity, token.as_str(), "customers")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::RateLimited { retry_after_secs } if retry_after_secs > 0));
        assert_eq!(h.generator.call_count(), 2);
        assert_eq!(h.db.execute_count(), 2);

        let bob = Identity::new("bob").unwrap();
        assert!(h.orchestrator.ask(&bob, token.as_str(), "customers").await.is_ok());
    }

    #[tokio::test]
    async fn test_dynamic_rejection_stops_before_execution() {
        let h = Harness::new(
            FakeDatabase::customers().fail_explain("relation \"clients\" does not exist (SQLSTATE 42P01)"),
            StubGenerator::sql("SELECT name FROM clients"),
        );

        let err = h.ask("show me clients").await.unwrap_err();
        match &err {
            PipelineError::DynamicSafetyViolation { reason } => {
                assert!(reason.contains("does not exist"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_expected());
        assert_eq!(h.db.explain_count(), 1);
        assert_eq!(h.db.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_plan_cost_ceiling_rejects() {
        let security = SecurityConfig {
            max_plan_cost: Some(100.0),
            ..Default::default()
        };
        let h = Harness::with_config(
            FakeDatabase::customers().with_plan_cost(1e6),
            StubGenerator::sql("SELECT name FROM customers"),
            security,
        );

        let err = h.ask("customers").await.unwrap_err();
        assert!(matches!(err, PipelineError::DynamicSafetyViolation { .. }));
        assert_eq!(h.db.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_error_is_summarized() {
        let h = Harness::new(
            FakeDatabase::customers().fail_execute("canceling statement due to statement timeout (SQLSTATE 57014)"),
            StubGenerator::sql("SELECT name FROM customers"),
        );

        let err = h.ask("customers").await.unwrap_err();
        assert!(matches!(err, PipelineError::BackendExecutionError { .. }));
        assert!(!err.is_expected());
        assert!(!err.is_defect());
        assert!(err.to_string().contains("statement timeout"));
    }

    #[tokio::test]
    async fn test_schema_failure_is_unavailable() {
        let h = Harness::new(
            FakeDatabase::customers().fail_schema("permission denied for schema public"),
            StubGenerator::sql("SELECT name FROM customers"),
        );

        let err = h.ask("customers").await.unwrap_err();
        assert!(matches!(err, PipelineError::SchemaUnavailable { .. }));
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_schema_is_cached_per_credentials() {
        let h = Harness::new(
            FakeDatabase::customers(),
            StubGenerator::sql("SELECT name FROM customers"),
        );
        let token = h.token().await;

        for _ in 0..3 {
            h.orchestrator
                .ask(&h.identity, token.as_str(), "customers")
                .await
                .unwrap();
        }
        assert_eq!(h.db.schema_fetch_count(), 1);
        assert_eq!(h.orchestrator.schema_cache().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_hides_driver_detail() {
        let h = Harness::new(
            FakeDatabase::customers().fail_probe(ConnectFailure::AuthenticationFailed),
            StubGenerator::sql("SELECT 1"),
        );

        let err = h
            .orchestrator
            .connect(&h.identity, &customers_credentials())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::ConnectionRefused { kind: ConnectFailure::AuthenticationFailed, .. }
        ));
        assert!(!err.to_string().contains("probe refused"));
        assert!(!err.to_string().contains("s3cret"));
    }

    #[tokio::test]
    async fn test_token_from_other_process_is_accepted() {
        let h = Harness::new(
            FakeDatabase::customers(),
            StubGenerator::sql("SELECT name FROM customers"),
        );
        let token = SessionCodec::new(SECRET.as_bytes())
            .encode(&customers_credentials())
            .unwrap();

        assert!(h.orchestrator.ask(&h.identity, token.as_str(), "customers").await.is_ok());
        assert_eq!(h.db.probe_count(), 0);
    }

    #[test]
    fn test_round_ms() {
        assert_eq!(round_ms(12.3456), 12.35);
        assert_eq!(round_ms(0.001), 0.0);
    }
}
