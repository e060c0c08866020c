//! In-memory collaborators for unit and pipeline tests.

use crate::database::{
    CellValue, Column, ConnectionFactory, ExecutionPlan, QueryResult, Row, SchemaIntrospector,
    SchemaSummary, TableSummary,
};
use crate::error::{ConnectFailure, DatabaseError, DbResult, GenerationError};
use crate::generation::{Generation, SqlGenerator};
use crate::session::ConnectionCredentials;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) fn customers_credentials() -> ConnectionCredentials {
    ConnectionCredentials::new("db.internal", 5432, "reader", "s3cret", "shop")
}

/// Fake database with a `customers` table. Records every call it receives.
#[derive(Default)]
pub(crate) struct FakeDatabase {
    schema: SchemaSummary,
    result: QueryResult,
    plan_cost: Option<f64>,
    probe_failure: Option<ConnectFailure>,
    schema_failure: Option<String>,
    explain_failure: Option<String>,
    execute_failure: Option<String>,
    probes: AtomicUsize,
    schema_fetches: AtomicUsize,
    explains: AtomicUsize,
    executes: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl FakeDatabase {
    pub(crate) fn customers() -> Self {
        let schema = SchemaSummary::new(vec![TableSummary {
            schema: "public".into(),
            name: "customers".into(),
            columns: vec![Column::new("id", "integer"), Column::new("name", "text")],
        }]);

        let rows = ["Ada", "Grace", "Linus"]
            .into_iter()
            .map(|name| {
                let mut row = Row::new();
                row.push("name", CellValue::String(name.into()));
                row
            })
            .collect();

        Self {
            schema,
            result: QueryResult::new(vec![Column::new("name", "text")], rows),
            plan_cost: Some(12.5),
            ..Default::default()
        }
    }

    pub(crate) fn fail_probe(mut self, kind: ConnectFailure) -> Self {
        self.probe_failure = Some(kind);
        self
    }

    pub(crate) fn fail_schema(mut self, message: &str) -> Self {
        self.schema_failure = Some(message.into());
        self
    }

    pub(crate) fn fail_explain(mut self, message: &str) -> Self {
        self.explain_failure = Some(message.into());
        self
    }

    pub(crate) fn fail_execute(mut self, message: &str) -> Self {
        self.execute_failure = Some(message.into());
        self
    }

    pub(crate) fn with_plan_cost(mut self, cost: f64) -> Self {
        self.plan_cost = Some(cost);
        self
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn schema_fetch_count(&self) -> usize {
        self.schema_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn explain_count(&self) -> usize {
        self.explains.load(Ordering::SeqCst)
    }

    pub(crate) fn execute_count(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for FakeDatabase {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self, _credentials: &ConnectionCredentials) -> DbResult<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.probe_failure {
            Some(kind) => Err(DatabaseError::ConnectionFailed {
                kind,
                detail: format!("probe refused: {kind}"),
            }),
            None => Ok(()),
        }
    }

    async fn explain(&self, _credentials: &ConnectionCredentials, _sql: &str) -> DbResult<ExecutionPlan> {
        self.explains.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.explain_failure {
            return Err(DatabaseError::QueryFailed(message.clone()));
        }
        let cost = self.plan_cost.unwrap_or_default();
        Ok(ExecutionPlan::from_text(vec![format!(
            "Limit  (cost=0.00..{cost:.2} rows=3 width=32)"
        )]))
    }

    async fn execute(&self, _credentials: &ConnectionCredentials, sql: &str) -> DbResult<QueryResult> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().push(sql.to_string());
        if let Some(message) = &self.execute_failure {
            return Err(DatabaseError::QueryFailed(message.clone()));
        }
        Ok(self.result.clone())
    }
}

#[async_trait]
impl SchemaIntrospector for FakeDatabase {
    async fn schema_summary(&self, _credentials: &ConnectionCredentials) -> DbResult<SchemaSummary> {
        self.schema_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.schema_failure {
            return Err(DatabaseError::QueryFailed(message.clone()));
        }
        Ok(self.schema.clone())
    }
}

/// Generator that always gives the same scripted reply.
pub(crate) struct StubGenerator {
    reply: Result<Generation, String>,
    calls: AtomicUsize,
    questions: Mutex<Vec<String>>,
}

impl StubGenerator {
    pub(crate) fn sql(sql: &str) -> Self {
        Self::with_reply(Ok(Generation::Candidate(sql.into())))
    }

    pub(crate) fn unanswerable() -> Self {
        Self::with_reply(Ok(Generation::Unanswerable))
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self::with_reply(Err(message.into()))
    }

    fn with_reply(reply: Result<Generation, String>) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }
}

#[async_trait]
impl SqlGenerator for StubGenerator {
    async fn generate(
        &self,
        _schema: &SchemaSummary,
        question: &str,
    ) -> Result<Generation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.questions.lock().push(question.to_string());
        match &self.reply {
            Ok(generation) => Ok(generation.clone()),
            Err(message) => Err(GenerationError::Transport(message.clone())),
        }
    }
}
