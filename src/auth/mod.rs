//! Caller identity.
//!
//! Each tool call carries a bearer token. A [`VerifierChain`] tries its verifiers
//! in order and the first one that recognises the token supplies the [`Identity`]
//! used as the rate-limit key and in the audit log.

use crate::config::AuthConfig;
use crate::error::AuthError;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::fmt;
use tracing::debug;

/// Stable, non-empty identifier of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One authentication scheme.
///
/// `None` means "not mine": the chain moves on to the next verifier.
pub trait IdentityVerifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, token: &str) -> Option<Identity>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

fn verify_jwt(token: &str, key: &DecodingKey, validation: &Validation) -> Option<Identity> {
    match decode::<Claims>(token, key, validation) {
        Ok(data) => Identity::new(data.claims.sub),
        Err(e) => {
            debug!(error = %e, "JWT rejected");
            None
        }
    }
}

fn validation_for(algorithm: Algorithm, issuer: Option<&str>) -> Validation {
    let mut validation = Validation::new(algorithm);
    if let Some(iss) = issuer {
        validation.set_issuer(&[iss]);
    }
    validation
}

/// HS256 tokens signed with a shared secret.
pub struct HmacJwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl HmacJwtVerifier {
    pub fn new(secret: &[u8], issuer: Option<&str>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: validation_for(Algorithm::HS256, issuer),
        }
    }
}

impl IdentityVerifier for HmacJwtVerifier {
    fn name(&self) -> &'static str {
        "jwt-hs256"
    }

    fn verify(&self, token: &str) -> Option<Identity> {
        verify_jwt(token, &self.key, &self.validation)
    }
}

/// RS256 tokens checked against a PEM public key.
pub struct RsaJwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl RsaJwtVerifier {
    pub fn from_pem(pem: &[u8], issuer: Option<&str>) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(pem).map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        Ok(Self {
            key,
            validation: validation_for(Algorithm::RS256, issuer),
        })
    }
}

impl IdentityVerifier for RsaJwtVerifier {
    fn name(&self) -> &'static str {
        "jwt-rs256"
    }

    fn verify(&self, token: &str) -> Option<Identity> {
        verify_jwt(token, &self.key, &self.validation)
    }
}

/// Verifiers in priority order.
#[derive(Default)]
pub struct VerifierChain {
    verifiers: Vec<Box<dyn IdentityVerifier>>,
}

impl VerifierChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the HS256 verifier first, then RS256, from whichever keys are configured.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let issuer = config.jwt_issuer.as_deref();
        let mut chain = Self::new();
        if let Some(secret) = &config.jwt_secret {
            chain = chain.with(HmacJwtVerifier::new(secret.as_bytes(), issuer));
        }
        if let Some(pem) = &config.rsa_public_key_pem {
            chain = chain.with(RsaJwtVerifier::from_pem(pem.as_bytes(), issuer)?);
        }
        Ok(chain)
    }

    pub fn with(mut self, verifier: impl IdentityVerifier + 'static) -> Self {
        self.verifiers.push(Box::new(verifier));
        self
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    /// An empty chain rejects every token.
    pub fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        for verifier in &self.verifiers {
            if let Some(identity) = verifier.verify(token) {
                debug!(verifier = verifier.name(), identity = %identity, "Caller authenticated");
                return Ok(identity);
            }
        }
        Err(AuthError::Rejected)
    }
}
