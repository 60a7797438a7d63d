//! Revocation lookup port.
//!
//! The middleware asks "is this bearer still live?" through
//! [`RevocationCheck`] and only looks at the outcome. The token registry
//! implements it; tests usually pass a closure.

use async_trait::async_trait;
use thiserror::Error;

/// Why a token with a valid signature was still refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevocationError {
    /// No record exists for this token.
    #[error("token not found")]
    NotFound,

    /// The record was explicitly revoked.
    #[error("token revoked")]
    Revoked,

    /// The record's own expiry has passed.
    #[error("token expired")]
    Expired,

    /// The lookup itself failed.
    #[error("revocation lookup failed: {0}")]
    Backend(String),
}

/// Checks a raw bearer token against an external record store.
///
/// Returns the token's record id on success. Implementations bound their own
/// latency; the middleware imposes no timeout.
#[async_trait]
pub trait RevocationCheck: Send + Sync {
    /// Look up `raw_token`.
    async fn check(&self, raw_token: &str) -> Result<String, RevocationError>;
}

#[async_trait]
impl<F> RevocationCheck for F
where
    F: Fn(&str) -> Result<String, RevocationError> + Send + Sync,
{
    async fn check(&self, raw_token: &str) -> Result<String, RevocationError> {
        self(raw_token)
    }
}
