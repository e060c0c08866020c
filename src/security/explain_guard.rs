//! Plan-only check of a validated statement against the live database.
//!
//! Text analysis cannot see the live schema, so before a statement runs the engine
//! is asked to plan it. Unknown tables or columns, missing privileges, type errors
//! and syntax the static validator let through all surface here without touching
//! any data.

use super::validator::ValidatedStatement;
use crate::database::ConnectionFactory;
use crate::error::DatabaseError;
use crate::session::ConnectionCredentials;
use tracing::{debug, instrument};

/// Outcome of a dynamic safety check.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyVerdict {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl SafetyVerdict {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Asks the engine for an execution plan instead of running the statement.
#[derive(Debug, Clone, Default)]
pub struct ExplainGuard {
    max_plan_cost: Option<f64>,
}

impl ExplainGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject plans whose estimated total cost exceeds `cost`.
    pub fn max_plan_cost(mut self, cost: Option<f64>) -> Self {
        self.max_plan_cost = cost;
        self
    }

    #[instrument(skip_all, fields(driver = factory.name()))]
    pub async fn check_safety(
        &self,
        factory: &dyn ConnectionFactory,
        credentials: &ConnectionCredentials,
        statement: &ValidatedStatement,
    ) -> SafetyVerdict {
        let plan = match factory.explain(credentials, statement.sql()).await {
            Ok(plan) => plan,
            Err(e) => return SafetyVerdict::reject(engine_reason(e)),
        };

        debug!(
            estimated_cost = plan.estimated_cost,
            estimated_rows = plan.estimated_rows,
            "Plan accepted by engine"
        );

        if let (Some(ceiling), Some(cost)) = (self.max_plan_cost, plan.estimated_cost)
            && cost > ceiling
        {
            return SafetyVerdict::reject(format!(
                "estimated plan cost {cost:.2} exceeds the allowed maximum of {ceiling:.2}"
            ));
        }

        SafetyVerdict::accept()
    }
}

fn engine_reason(err: DatabaseError) -> String {
    match err {
        DatabaseError::QueryFailed(summary) => summary,
        other => other.to_string(),
    }
}
