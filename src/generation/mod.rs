//! Question-to-SQL generation.
//!
//! The generator only proposes text. Everything it returns is untrusted and goes
//! through the validator and the explain guard before it can run.

pub mod openai;

pub use openai::ChatCompletionsGenerator;

use crate::database::SchemaSummary;
use crate::error::GenerationError;
use async_trait::async_trait;

/// Reply a model gives when the schema cannot answer the question.
pub const UNANSWERABLE_SENTINEL: &str = "INVALID_QUERY";

/// What the generator made of a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    /// Raw candidate SQL, not yet validated.
    Candidate(String),
    Unanswerable,
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(
        &self,
        schema: &SchemaSummary,
        question: &str,
    ) -> Result<Generation, GenerationError>;
}

pub(crate) const SYSTEM_MESSAGE: &str = "You are a specialized SQL generation assistant.";

/// User prompt for a PostgreSQL target.
pub fn build_prompt(schema: &SchemaSummary, question: &str) -> String {
    format!(
        "You are a PostgreSQL expert.
Your task is to generate a SQL query to answer the user's question, given the following database schema.

SCHEMA:
{schema}
RULES:
1. ONLY generate a single standard PostgreSQL SELECT query.
2. DO NOT generate ANY explanation, markdown, or code blocks. Just the raw SQL.
3. Use the table names and column names EXACTLY as provided in the schema. Do not invent any.
4. If the question cannot be answered by the schema, or requires DROP/DELETE/INSERT/UPDATE, return strictly: {UNANSWERABLE_SENTINEL}
5. ALWAYS LIMIT the result to 100 rows if not specified otherwise (but max 100).
6. Do NOT use wildcards like SELECT *. Select specific columns.

USER QUESTION: {question}

SQL:",
        schema = schema.render(),
        question = question.trim(),
    )
}

/// Strips markdown fences and recognises the unanswerable sentinel.
pub fn parse_response(content: &str) -> Result<Generation, GenerationError> {
    let cleaned = content
        .replace("```sql", "")
        .replace("```SQL", "")
        .replace("```", "");
    let cleaned = cleaned.trim();

    if cleaned.contains(UNANSWERABLE_SENTINEL) {
        return Ok(Generation::Unanswerable);
    }
    if cleaned.is_empty() {
        return Err(GenerationError::InvalidResponse("empty completion".into()));
    }
    Ok(Generation::Candidate(cleaned.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Column, TableSummary};

    #[test]
    fn test_prompt_contains_schema_and_question() {
        let schema = SchemaSummary::new(vec![TableSummary {
            schema: "public".into(),
            name: "customers".into(),
            columns: vec![Column::new("name", "text")],
        }]);
        let prompt = build_prompt(&schema, "  show me 5 customers ");

        assert!(prompt.contains("PostgreSQL"));
        assert!(prompt.contains("Table: customers\nColumns:\n - name (text)\n"));
        assert!(prompt.contains("USER QUESTION: show me 5 customers\n"));
        assert!(prompt.contains(UNANSWERABLE_SENTINEL));
        assert!(prompt.ends_with("SQL:"));
    }

    #[test]
    fn test_parse_plain_sql() {
        assert_eq!(
            parse_response("  SELECT name FROM customers LIMIT 5\n").unwrap(),
            Generation::Candidate("SELECT name FROM customers LIMIT 5".into())
        );
    }

    #[test]
    fn test_parse_strips_fences() {
        let reply = "```sql\nSELECT id FROM orders\n```";
        assert_eq!(
            parse_response(reply).unwrap(),
            Generation::Candidate("SELECT id FROM orders".into())
        );
    }

    #[test]
    fn test_parse_sentinel() {
        assert_eq!(parse_response("INVALID_QUERY").unwrap(), Generation::Unanswerable);
        assert_eq!(
            parse_response("```\nINVALID_QUERY\n```").unwrap(),
            Generation::Unanswerable
        );
    }

    #[test]
    fn test_parse_empty() {
        assert!(matches!(
            parse_response("```sql\n```"),
            Err(GenerationError::InvalidResponse(_))
        ));
    }
}
