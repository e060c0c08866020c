//! Stateless session tokens.
//!
//! A token is the connection credentials sealed with XChaCha20-Poly1305 under a key
//! derived from the server secret. Any process holding the same secret can open a
//! token issued by any other, so the server keeps no session table.
//!
//! Format: `v1.` followed by base64url (no padding) of `nonce || ciphertext`.

use super::ConnectionCredentials;
use crate::error::{SecurityError, SecurityResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::XChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TOKEN_PREFIX: &str = "v1.";
const KEY_DOMAIN: &[u8] = b"askdb-session-key-v1\0";
const ASSOCIATED_DATA: &[u8] = b"askdb-session-v1";
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Opaque token handed to the client after a successful connect.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({} bytes)", self.0.len())
    }
}

#[derive(Serialize, Deserialize)]
struct SessionPayload {
    iat: u64,
    credentials: ConnectionCredentials,
}

/// Encrypts credentials into session tokens and back.
pub struct SessionCodec {
    cipher: XChaCha20Poly1305,
    token_ttl: Option<Duration>,
}

impl fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCodec")
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    /// Derive the cipher key from `secret`. Equal secrets always give equal keys.
    pub fn new(secret: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(secret);
        let key = hasher.finalize();

        Self {
            cipher: XChaCha20Poly1305::new(GenericArray::from_slice(key.as_slice())),
            token_ttl: None,
        }
    }

    /// Reject tokens older than `ttl`.
    pub fn with_token_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn encode(&self, credentials: &ConnectionCredentials) -> SecurityResult<SessionToken> {
        self.encode_at(credentials, unix_now())
    }

    pub fn encode_at(
        &self,
        credentials: &ConnectionCredentials,
        issued_at: u64,
    ) -> SecurityResult<SessionToken> {
        use rand::RngCore;

        let payload = SessionPayload {
            iat: issued_at,
            credentials: credentials.clone(),
        };
        let plaintext = serde_json::to_vec(&payload).map_err(|_| SecurityError::Encryption)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                GenericArray::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: ASSOCIATED_DATA,
                },
            )
            .map_err(|_| SecurityError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(SessionToken(format!(
            "{TOKEN_PREFIX}{}",
            URL_SAFE_NO_PAD.encode(sealed)
        )))
    }

    /// Every failure collapses to [`SecurityError::InvalidSession`].
    pub fn decode(&self, token: &str) -> SecurityResult<ConnectionCredentials> {
        self.decode_at(token, unix_now())
    }

    pub fn decode_at(&self, token: &str, now: u64) -> SecurityResult<ConnectionCredentials> {
        let payload = self.open(token).ok_or(SecurityError::InvalidSession)?;

        if let Some(ttl) = self.token_ttl
            && now.saturating_sub(payload.iat) > ttl.as_secs()
        {
            return Err(SecurityError::InvalidSession);
        }

        Ok(payload.credentials)
    }

    fn open(&self, token: &str) -> Option<SessionPayload> {
        let encoded = token.trim().strip_prefix(TOKEN_PREFIX)?;
        let sealed = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return None;
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                GenericArray::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: ASSOCIATED_DATA,
                },
            )
            .ok()?;

        serde_json::from_slice(&plaintext).ok()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
