//! Caller credential check
//!
//! Trigger and cancel calls carry an opaque bearer credential. Deciding
//! whether it is valid belongs to the identity provider; the orchestrator only
//! asks a `CredentialValidator`.

use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};

/// Decides whether a caller credential is acceptable
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, credential: Option<&str>) -> bool;
}

/// Accepts a fixed set of tokens
pub struct StaticTokenValidator {
    tokens: Vec<String>,
    allow_anonymous: bool,
}

impl StaticTokenValidator {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            allow_anonymous: false,
        }
    }

    /// Accepts every caller (local development only)
    pub fn allow_all() -> Self {
        Self {
            tokens: Vec::new(),
            allow_anonymous: true,
        }
    }
}

#[async_trait]
impl CredentialValidator for StaticTokenValidator {
    async fn validate(&self, credential: Option<&str>) -> bool {
        if self.allow_anonymous {
            return true;
        }
        match credential {
            Some(presented) => self
                .tokens
                .iter()
                .any(|token| constant_time_eq(token.as_bytes(), presented.as_bytes())),
            None => false,
        }
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
