//! Configuration types and builders.
//!
//! Everything is read from the environment once at startup. [`ServerConfig::from_lookup`]
//! takes the lookup as a closure so tests never touch the process environment.

use crate::error::{ConfigError, Result};
use serde::Serialize;
use std::borrow::Cow;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Minimum accepted length of the session secret, in bytes.
pub const MIN_SECRET_LEN: usize = 16;

/// Session token configuration.
#[derive(Clone, Serialize)]
pub struct SessionConfig {
    #[serde(skip_serializing)]
    pub secret: String,
    /// Maximum token age. `None` disables expiry.
    pub token_ttl: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .finish()
    }
}

/// Security configuration.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityConfig {
    pub max_query_length: usize,
    pub row_limit_ceiling: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    /// Estimated plan cost above which a statement is rejected.
    pub max_plan_cost: Option<f64>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_query_length: 10_000,
            row_limit_ceiling: 100,
            rate_limit_requests: 20,
            rate_limit_window: Duration::from_secs(60),
            max_plan_cost: None,
        }
    }
}

/// Settings applied to every per-credential connection pool.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSettings {
    pub pool_size: u32,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            pool_size: 10,
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Chat-completions endpoint used to turn questions into SQL.
#[derive(Clone, Serialize)]
pub struct GeneratorConfig {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.groq.com/openai/v1".into(),
            api_key: None,
            model: "llama-3.3-70b-versatile".into(),
            temperature: 0.1,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Bearer token verifiers, tried in declaration order.
#[derive(Clone, Default, Serialize)]
pub struct AuthConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    #[serde(skip_serializing)]
    pub rsa_public_key_pem: Option<String>,
}

impl AuthConfig {
    pub fn has_verifier(&self) -> bool {
        self.jwt_secret.is_some() || self.rsa_public_key_pem.is_some()
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("jwt_issuer", &self.jwt_issuer)
            .field("rsa_public_key_pem", &self.rsa_public_key_pem.is_some())
            .finish()
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub name: Cow<'static, str>,
    pub version: Cow<'static, str>,
    pub session: SessionConfig,
    pub security: SecurityConfig,
    pub database: DatabaseSettings,
    pub generator: GeneratorConfig,
    pub auth: AuthConfig,
    pub schema_cache_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "askdb-mcp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            session: SessionConfig::default(),
            security: SecurityConfig::default(),
            database: DatabaseSettings::default(),
            generator: GeneratorConfig::default(),
            auth: AuthConfig::default(),
            schema_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.session.secret = get("SESSION_SECRET")
            .ok_or_else(|| ConfigError::MissingField("SESSION_SECRET".into()))?;
        if let Some(secs) = parse_opt::<u64>(&get, "SESSION_TOKEN_TTL_SECS")? {
            config.session.token_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        let security = &mut config.security;
        if let Some(n) = parse_opt(&get, "RATE_LIMIT_REQUESTS")? {
            security.rate_limit_requests = n;
        }
        if let Some(secs) = parse_opt(&get, "RATE_LIMIT_WINDOW_SECS")? {
            security.rate_limit_window = Duration::from_secs(secs);
        }
        if let Some(n) = parse_opt(&get, "ROW_LIMIT_CEILING")? {
            security.row_limit_ceiling = n;
        }
        if let Some(n) = parse_opt(&get, "MAX_QUERY_LENGTH")? {
            security.max_query_length = n;
        }
        if let Some(cost) = parse_opt(&get, "MAX_PLAN_COST")? {
            security.max_plan_cost = Some(cost);
        }

        let database = &mut config.database;
        if let Some(n) = parse_opt(&get, "DATABASE_POOL_SIZE")? {
            database.pool_size = n;
        }
        if let Some(secs) = parse_opt(&get, "DATABASE_CONNECT_TIMEOUT_SECS")? {
            database.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt(&get, "DATABASE_QUERY_TIMEOUT_SECS")? {
            database.query_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_opt(&get, "SCHEMA_CACHE_TTL_SECS")? {
            config.schema_cache_ttl = Duration::from_secs(secs);
        }

        let generator = &mut config.generator;
        if let Some(base) = get("LLM_API_BASE") {
            generator.api_base = base.trim_end_matches('/').to_string();
        }
        generator.api_key = get("LLM_API_KEY");
        if let Some(model) = get("LLM_MODEL") {
            generator.model = model;
        }
        if let Some(t) = parse_opt(&get, "LLM_TEMPERATURE")? {
            generator.temperature = t;
        }

        config.auth = AuthConfig {
            jwt_secret: get("AUTH_JWT_SECRET"),
            jwt_issuer: get("AUTH_JWT_ISSUER"),
            rsa_public_key_pem: get("AUTH_RSA_PUBLIC_KEY"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.secret.len() < MIN_SECRET_LEN {
            return Err(invalid(
                "SESSION_SECRET",
                format!("must be at least {MIN_SECRET_LEN} bytes"),
            ));
        }
        if self.security.rate_limit_requests == 0 {
            return Err(invalid("RATE_LIMIT_REQUESTS", "must be greater than 0"));
        }
        if self.security.rate_limit_window.is_zero() {
            return Err(invalid("RATE_LIMIT_WINDOW_SECS", "must be greater than 0"));
        }
        if self.security.row_limit_ceiling == 0 {
            return Err(invalid("ROW_LIMIT_CEILING", "must be greater than 0"));
        }
        if self.database.pool_size == 0 {
            return Err(invalid("DATABASE_POOL_SIZE", "Pool size must be greater than 0"));
        }
        if let Some(cost) = self.security.max_plan_cost
            && !(cost.is_finite() && cost > 0.0)
        {
            return Err(invalid("MAX_PLAN_COST", "must be a positive number"));
        }
        Ok(())
    }
}

fn parse_opt<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, format!("cannot parse '{}'", raw.trim()))),
    }
}

fn invalid(field: &'static str, message: impl Into<Cow<'static, str>>) -> crate::error::McpError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
    .into()
}

/// Builder for ServerConfig.
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn session_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.session.secret = secret.into();
        self
    }

    pub fn token_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.session.token_ttl = ttl;
        self
    }

    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.config.security = security;
        self
    }

    pub fn database(mut self, database: DatabaseSettings) -> Self {
        self.config.database = database;
        self
    }

    pub fn generator(mut self, generator: GeneratorConfig) -> Self {
        self.config.generator = generator;
        self
    }

    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.config.auth = auth;
        self
    }

    pub fn schema_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.schema_cache_ttl = ttl;
        self
    }

    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::McpError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_secret_only() {
        let config =
            ServerConfig::from_lookup(lookup(&[("SESSION_SECRET", "0123456789abcdef")])).unwrap();
        assert_eq!(config.security.rate_limit_requests, 20);
        assert_eq!(config.security.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.security.row_limit_ceiling, 100);
        assert_eq!(config.session.token_ttl, Some(Duration::from_secs(86_400)));
        assert_eq!(config.generator.model, "llama-3.3-70b-versatile");
        assert!(config.generator.api_key.is_none());
        assert!(!config.auth.has_verifier());
    }

    #[test]
    fn test_missing_secret() {
        let err = ServerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, McpError::Config(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("SESSION_SECRET", "short")])).unwrap_err();
        assert!(matches!(err, McpError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SESSION_SECRET", "0123456789abcdef"),
            ("SESSION_TOKEN_TTL_SECS", "0"),
            ("RATE_LIMIT_REQUESTS", "5"),
            ("ROW_LIMIT_CEILING", "250"),
            ("MAX_PLAN_COST", "1e6"),
            ("LLM_API_BASE", "http://localhost:8080/v1/"),
            ("AUTH_JWT_SECRET", "jwt-secret"),
        ]))
        .unwrap();
        assert_eq!(config.session.token_ttl, None);
        assert_eq!(config.security.rate_limit_requests, 5);
        assert_eq!(config.security.row_limit_ceiling, 250);
        assert_eq!(config.security.max_plan_cost, Some(1e6));
        assert_eq!(config.generator.api_base, "http://localhost:8080/v1");
        assert!(config.auth.has_verifier());
    }

    #[test]
    fn test_unparseable_number() {
        let err = ServerConfig::from_lookup(lookup(&[
            ("SESSION_SECRET", "0123456789abcdef"),
            ("RATE_LIMIT_REQUESTS", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_REQUESTS"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ServerConfig::builder()
            .session_secret("super-secret-value-123")
            .build()
            .unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-value-123"));
    }
}
