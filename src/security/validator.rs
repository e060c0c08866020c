//! Static SQL validator.
//!
//! Turns untrusted candidate text into a [`ValidatedStatement`]: exactly one
//! read-only SELECT, free of blocklisted keywords and side-effecting functions,
//! with a row limit no greater than the configured ceiling.
//!
//! The candidate is parsed with the PostgreSQL dialect and the statement that is
//! handed on is rendered back from the syntax tree, so comments and anything the
//! parser did not see never reach the database.

use crate::error::{ValidationError, ValidationResult};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{Expr, Query, SetExpr, Statement, Value};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::fmt;
use tracing::{debug, warn};

/// Data-definition and mutation keywords, matched on word boundaries anywhere in
/// the raw text regardless of how the statement is classified.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "CREATE",
    "REPLACE", "MERGE", "COPY", "VACUUM", "REINDEX", "CALL", "EXECUTE",
];

static FORBIDDEN_KEYWORD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|")))
        .expect("Invalid regex: forbidden keyword pattern")
});

/// Functions with side effects or unbounded cost that a plan cannot reveal.
static FORBIDDEN_FUNCTION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(pg_sleep\w*|pg_read_file|pg_read_binary_file|pg_ls_dir|pg_stat_file|lo_import|lo_export|dblink\w*|pg_terminate_backend|pg_cancel_backend|pg_reload_conf|set_config|nextval|setval|pg_advisory\w*)$",
    )
    .expect("Invalid regex: forbidden function pattern")
});

/// Command kind of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Other(String),
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => f.write_str("SELECT"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// What the validator did to the statement's row limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitAction {
    /// An existing limit was already within the ceiling.
    Kept,
    /// An existing limit above the ceiling (or `NULL`) was rewritten down.
    Lowered,
    /// No limit was present and one was added.
    Appended,
}

/// A statement that passed every static check. Only [`SqlValidator`] creates these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStatement {
    sql: String,
    kind: StatementKind,
    row_limit: u64,
    limit_action: LimitAction,
}

impl ValidatedStatement {
    /// The rewritten text that is safe to plan and execute.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    /// Upper bound on rows the statement can return.
    pub fn row_limit(&self) -> u64 {
        self.row_limit
    }

    pub fn limit_action(&self) -> LimitAction {
        self.limit_action
    }

    pub fn into_sql(self) -> String {
        self.sql
    }
}

impl fmt::Display for ValidatedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// SQL query validator.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    max_query_length: usize,
    row_limit_ceiling: u64,
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self {
            max_query_length: 10_000,
            row_limit_ceiling: 100,
        }
    }
}

impl SqlValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_query_length(mut self, length: usize) -> Self {
        self.max_query_length = length;
        self
    }

    pub fn row_limit_ceiling(mut self, ceiling: u64) -> Self {
        self.row_limit_ceiling = ceiling;
        self
    }

    pub fn ceiling(&self) -> u64 {
        self.row_limit_ceiling
    }

    /// Validate and rewrite a candidate statement.
    ///
    /// Checks run in this order: length, tokenizing, the function scan over tokens,
    /// parsing and the statement count, the raw-text keyword scan, classification,
    /// and finally the row limit.
    pub fn validate(&self, candidate: &str) -> ValidationResult<ValidatedStatement> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }
        if trimmed.len() > self.max_query_length {
            return Err(ValidationError::TooLong(self.max_query_length));
        }

        let dialect = PostgreSqlDialect {};
        let tokens = Tokenizer::new(&dialect, trimmed)
            .tokenize()
            .map_err(|e| ValidationError::Malformed(e.to_string().into()))?;
        self.check_forbidden_functions(&tokens)?;

        let mut statements = match Parser::parse_sql(&dialect, trimmed) {
            Ok(statements) => statements,
            Err(e) => {
                // Unparseable DML still reports the keyword that made it dangerous.
                self.check_forbidden_keywords(trimmed)?;
                return Err(ValidationError::Malformed(e.to_string().into()));
            }
        };
        let mut statement = match statements.len() {
            0 => return Err(ValidationError::Empty),
            1 => statements.remove(0),
            _ => return Err(ValidationError::MultipleStatements),
        };

        self.check_forbidden_keywords(trimmed)?;

        let kind = classify(&statement, &tokens);
        if kind != StatementKind::Select {
            warn!(kind = %kind, "Disallowed statement kind");
            return Err(ValidationError::DisallowedStatementKind(kind.to_string()));
        }

        let Statement::Query(query) = &mut statement else {
            return Err(ValidationError::DisallowedStatementKind(kind.to_string()));
        };
        let (row_limit, limit_action) = self.enforce_limit(query)?;
        debug!(?limit_action, row_limit, "Query validation passed");

        Ok(ValidatedStatement {
            sql: statement.to_string(),
            kind,
            row_limit,
            limit_action,
        })
    }

    fn check_forbidden_keywords(&self, raw: &str) -> ValidationResult<()> {
        if let Some(found) = FORBIDDEN_KEYWORD_REGEX.captures(raw).and_then(|c| c.get(1)) {
            let keyword = found.as_str().to_ascii_uppercase();
            warn!(keyword = %keyword, "Forbidden keyword detected");
            return Err(ValidationError::ForbiddenKeyword(keyword));
        }
        Ok(())
    }

    /// Reject calls to blocklisted functions and any Unicode-escaped identifier.
    fn check_forbidden_functions(&self, tokens: &[Token]) -> ValidationResult<()> {
        for (i, token) in tokens.iter().enumerate() {
            let Token::Word(word) = token else { continue };

            if let Some(escaped) = unicode_escape_identifier(&tokens[i..]) {
                if let Some(name) = decode_unicode_escapes(escaped)
                    .filter(|name| FORBIDDEN_FUNCTION_REGEX.is_match(name))
                {
                    return Err(forbidden_function(&name));
                }
                warn!("Unicode-escaped identifier rejected");
                return Err(ValidationError::Malformed(
                    "Unicode-escaped identifiers are not allowed".into(),
                ));
            }

            let next = tokens[i + 1..]
                .iter()
                .find(|t| !matches!(t, Token::Whitespace(_)));
            if matches!(next, Some(Token::LParen)) && FORBIDDEN_FUNCTION_REGEX.is_match(&word.value) {
                return Err(forbidden_function(&word.value));
            }
        }
        Ok(())
    }

    /// Bound the outermost query by its `LIMIT`, or add one.
    fn enforce_limit(&self, query: &mut Query) -> ValidationResult<(u64, LimitAction)> {
        let ceiling = self.row_limit_ceiling;

        // `LIMIT ALL` parses to no limit at all.
        let action = match &query.limit {
            None => LimitAction::Appended,
            Some(Expr::Value(Value::Number(n, _))) if n.bytes().all(|b| b.is_ascii_digit()) => {
                match n.parse::<u64>() {
                    Ok(n) if n <= ceiling => return Ok((n, LimitAction::Kept)),
                    _ => LimitAction::Lowered,
                }
            }
            Some(Expr::Value(Value::Null)) => LimitAction::Lowered,
            Some(_) => return Err(ValidationError::UnboundedLimit),
        };

        query.limit = Some(Expr::Value(Value::Number(ceiling.to_string(), false)));
        Ok((ceiling, action))
    }
}

fn forbidden_function(name: &str) -> ValidationError {
    let function = name.to_ascii_lowercase();
    warn!(function = %function, "Forbidden function detected");
    ValidationError::ForbiddenFunction(function)
}

fn classify(statement: &Statement, tokens: &[Token]) -> StatementKind {
    match statement {
        Statement::Query(query) => {
            if !query.locks.is_empty() {
                return StatementKind::Other("SELECT FOR UPDATE/SHARE".into());
            }
            classify_body(&query.body)
        }
        _ => StatementKind::Other(
            tokens
                .iter()
                .find_map(|t| match t {
                    Token::Word(w) => Some(w.value.to_ascii_uppercase()),
                    _ => None,
                })
                .unwrap_or_else(|| "UNKNOWN".into()),
        ),
    }
}

fn classify_body(body: &SetExpr) -> StatementKind {
    match body {
        // SELECT ... INTO creates a table.
        SetExpr::Select(select) if select.into.is_some() => StatementKind::Other("SELECT INTO".into()),
        SetExpr::Select(_) => StatementKind::Select,
        SetExpr::Query(query) => classify_body(&query.body),
        SetExpr::SetOperation { left, right, .. } => match classify_body(left) {
            StatementKind::Select => classify_body(right),
            other => other,
        },
        other => StatementKind::Other(leading_keyword(&other.to_string())),
    }
}

fn leading_keyword(text: &str) -> String {
    text.split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphabetic()).to_ascii_uppercase())
        .filter(|w| !w.is_empty())
        .unwrap_or_else(|| "UNKNOWN".into())
}

/// The body of a `U&"..."` identifier starting at `tokens[0]`.
///
/// The tokenizer reads it as the bare word `U`, an `&` and a double-quoted
/// identifier with nothing between them.
fn unicode_escape_identifier(tokens: &[Token]) -> Option<&str> {
    match tokens {
        [Token::Word(u), Token::Ampersand, Token::Word(quoted), ..]
            if u.quote_style.is_none()
                && u.value.eq_ignore_ascii_case("u")
                && quoted.quote_style == Some('"') =>
        {
            Some(quoted.value.as_str())
        }
        _ => None,
    }
}

/// Decode `\XXXX`, `\+XXXXXX` and `\\` escapes with the default escape character.
fn decode_unicode_escapes(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits = match chars.peek() {
            Some('\\') => {
                chars.next();
                out.push('\\');
                continue;
            }
            Some('+') => {
                chars.next();
                6
            }
            _ => 4,
        };
        let hex: String = chars.by_ref().take(digits).collect();
        if hex.len() != digits {
            return None;
        }
        out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
    }
    Some(out)
}
