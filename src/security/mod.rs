//! SQL safety checks and rate limiting.

pub mod explain_guard;
pub mod rate_limiter;
pub mod validator;

pub use explain_guard::{ExplainGuard, SafetyVerdict};
pub use rate_limiter::{RateLimitStatus, RateLimiter, RateLimiterBuilder};
pub use validator::{LimitAction, SqlValidator, StatementKind, ValidatedStatement};
