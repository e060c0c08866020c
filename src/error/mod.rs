//! Error types for the askdb server.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` conversions.
//! [`PipelineError`] is the taxonomy every stage of a question request collapses into;
//! its `Display` text is what callers see, internal detail is kept out of it and logged instead.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the MCP surface.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: Cow<'static, str> },
}

/// JSON-RPC 2.0 and MCP protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Parse error: invalid JSON")]
    ParseError,

    #[error("Invalid request: {0}")]
    InvalidRequest(Cow<'static, str>),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(Cow<'static, str>),

    #[error("Internal error: {0}")]
    InternalError(Cow<'static, str>),

    #[error("Server not initialized")]
    NotInitialized,

    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),
}

impl ProtocolError {
    /// Returns the JSON-RPC 2.0 error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::InternalError(_) => -32603,
            Self::NotInitialized => -32002,
            Self::Transport(_) => -32000,
        }
    }
}

/// Why a connection attempt against a target database failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Unreachable,
    AuthenticationFailed,
    UnknownDatabase,
    TlsUnavailable,
    TimedOut,
    Other,
}

impl ConnectFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::AuthenticationFailed => "authentication_failed",
            Self::UnknownDatabase => "unknown_database",
            Self::TlsUnavailable => "tls_unavailable",
            Self::TimedOut => "timed_out",
            Self::Other => "other",
        }
    }

    fn user_message(&self) -> &'static str {
        match self {
            Self::Unreachable => "the database host could not be reached",
            Self::AuthenticationFailed => "the user name or password was rejected",
            Self::UnknownDatabase => "the database does not exist",
            Self::TlsUnavailable => "an encrypted connection is required but not supported",
            Self::TimedOut => "the connection attempt timed out",
            Self::Other => "the database refused the connection",
        }
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database driver errors. These never cross the pipeline boundary as-is.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {kind}")]
    ConnectionFailed { kind: ConnectFailure, detail: String },

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Query timeout after {0}ms")]
    Timeout(u64),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

/// Errors from the session codec and the rate limiter.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Invalid session token")]
    InvalidSession,

    #[error("Rate limit exceeded: {limit} requests per {window:?}")]
    RateLimitExceeded {
        limit: u32,
        window: Duration,
        retry_after: Duration,
    },

    #[error("Session encryption failed")]
    Encryption,
}

/// Static SQL validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Query is empty")]
    Empty,

    #[error("Query exceeds maximum length of {0} bytes")]
    TooLong(usize),

    #[error("Query could not be parsed: {0}")]
    Malformed(Cow<'static, str>),

    #[error("Multiple statements are not allowed")]
    MultipleStatements,

    #[error("Only SELECT queries are allowed, found {0}")]
    DisallowedStatementKind(String),

    #[error("Forbidden keyword detected: {0}")]
    ForbiddenKeyword(String),

    #[error("Forbidden function detected: {0}")]
    ForbiddenFunction(String),

    #[error("Row limit must be a numeric literal")]
    UnboundedLimit,
}

/// SQL generation collaborator failures.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generator is not configured: {0}")]
    NotConfigured(Cow<'static, str>),

    #[error("Generator request failed: {0}")]
    Transport(String),

    #[error("Generator returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Generator returned an unusable response: {0}")]
    InvalidResponse(Cow<'static, str>),
}

/// Bearer token verification failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    Missing,

    #[error("Token rejected by every configured verifier")]
    Rejected,

    #[error("Invalid verifier key: {0}")]
    InvalidKey(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(Cow<'static, str>),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
}

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(Cow<'static, str>),
}

/// The stage of a question request at which it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authenticate,
    RateCheck,
    SessionDecode,
    Connect,
    SchemaFetch,
    SqlGeneration,
    StaticValidate,
    DynamicValidate,
    Execute,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::RateCheck => "rate_check",
            Self::SessionDecode => "session_decode",
            Self::Connect => "connect",
            Self::SchemaFetch => "schema_fetch",
            Self::SqlGeneration => "sql_generation",
            Self::StaticValidate => "static_validate",
            Self::DynamicValidate => "dynamic_validate",
            Self::Execute => "execute",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way a connect or question request can end without a result.
///
/// Fields named `detail` hold internal diagnostics for the audit log and are
/// deliberately absent from the `Display` output.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Rate limit exceeded. Try again in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid database session. Please reconnect.")]
    InvalidSession,

    #[error("Could not connect to the database: {}", .kind.user_message())]
    ConnectionRefused { kind: ConnectFailure, detail: String },

    #[error("Could not read the database schema")]
    SchemaUnavailable { detail: String },

    #[error("The question cannot be answered from this database schema")]
    GenerationUnanswerable,

    #[error("The SQL generator is unavailable")]
    GenerationUnavailable { detail: String },

    #[error("Query rejected: {0}")]
    StaticSafetyViolation(#[from] ValidationError),

    #[error("Query rejected by the database planner: {reason}")]
    DynamicSafetyViolation { reason: String },

    #[error("Query execution failed: {summary}")]
    BackendExecutionError { summary: String },

    #[error("An unexpected internal error occurred")]
    InternalUnexpected { detail: String },
}

impl PipelineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidSession => "invalid_session",
            Self::ConnectionRefused { .. } => "connection_refused",
            Self::SchemaUnavailable { .. } => "schema_unavailable",
            Self::GenerationUnanswerable => "generation_unanswerable",
            Self::GenerationUnavailable { .. } => "generation_unavailable",
            Self::StaticSafetyViolation(_) => "static_safety_violation",
            Self::DynamicSafetyViolation { .. } => "dynamic_safety_violation",
            Self::BackendExecutionError { .. } => "backend_execution_error",
            Self::InternalUnexpected { .. } => "internal_unexpected",
        }
    }

    /// Safety rejections are an expected outcome of generated SQL.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::StaticSafetyViolation(_) | Self::DynamicSafetyViolation { .. }
        )
    }

    /// Only the catch-all indicates a defect in this server.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::InternalUnexpected { .. })
    }

    /// Reason string for the audit log, including internal detail.
    pub fn audit_reason(&self) -> String {
        match self {
            Self::ConnectionRefused { kind, detail } => format!("{kind}: {detail}"),
            Self::SchemaUnavailable { detail }
            | Self::GenerationUnavailable { detail }
            | Self::InternalUnexpected { detail } => detail.clone(),
            other => other.to_string(),
        }
    }
}

impl From<SecurityError> for PipelineError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::InvalidSession => Self::InvalidSession,
            SecurityError::RateLimitExceeded { retry_after, .. } => Self::RateLimited {
                retry_after_secs: retry_after.as_secs_f64().ceil() as u64,
            },
            SecurityError::Encryption => Self::InternalUnexpected {
                detail: err.to_string(),
            },
        }
    }
}

impl From<AuthError> for PipelineError {
    fn from(_: AuthError) -> Self {
        Self::AuthRequired
    }
}

/// Result type alias for McpError.
pub type Result<T> = std::result::Result<T, McpError>;

/// Result type alias for DatabaseError.
pub type DbResult<T> = std::result::Result<T, DatabaseError>;

/// Result type alias for ProtocolError.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for SecurityError.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;

/// Result type alias for ValidationError.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Result type alias for PipelineError.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
