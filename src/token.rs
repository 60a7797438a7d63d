//! Bearer token codec.
//!
//! Tokens are self-contained and signed with a single process-wide secret:
//!
//! ```text
//! base64url(claims_json) "." base64url(HMAC-SHA256(claims_json, secret))
//! ```
//!
//! Claims are `{"cn": "...", "iat": <unix>, "exp": <unix>}`. Both segments use
//! the URL-safe alphabet without padding. Rotating the secret invalidates every
//! outstanding token at once.
//!
//! The codec is pure: nothing here touches storage. Only [`hash_token`] output
//! is meant to be persisted (by the token registry), never the token itself.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Separator between the payload and signature segments.
const SEPARATOR: char = '.';

/// Prefix of generated token identifiers.
const TOKEN_ID_PREFIX: &str = "tok_";

/// Number of random bytes behind a token identifier.
const TOKEN_ID_BYTES: usize = 12;

/// Size of a SHA-256 digest.
pub const TOKEN_HASH_LEN: usize = 32;

/// Token codec failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Wrong number of segments, undecodable base64, or unparsable claims.
    #[error("invalid token format")]
    InvalidToken,

    /// MAC mismatch: tampered payload or a different secret.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Signature is valid but `exp` is in the past.
    #[error("token has expired")]
    TokenExpired,

    /// Signing was attempted with an empty secret.
    #[error("signing secret is empty")]
    EmptySecret,

    /// Requested secret size was zero.
    #[error("secret size must be non-zero")]
    InvalidSecretSize,

    /// `now + ttl` is outside the representable date range.
    #[error("token lifetime out of range")]
    ExpiryOutOfRange,

    /// Claims could not be serialized.
    #[error("failed to serialize claims: {0}")]
    Serialization(String),
}

/// Payload of a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Common Name of the principal the token was minted for.
    #[serde(rename = "cn")]
    pub common_name: String,
    /// Issued-at (Unix epoch seconds).
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Expires-at (Unix epoch seconds).
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

impl TokenClaims {
    /// `true` when `now` is strictly past `exp`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() > self.expires_at
    }
}

/// Mint a signed token for `common_name` valid for `ttl`.
///
/// A negative `ttl` produces a token that is already expired; this is only
/// useful in tests.
///
/// # Errors
///
/// [`TokenError::EmptySecret`] if `secret` is empty,
/// [`TokenError::ExpiryOutOfRange`] if `now + ttl` overflows,
/// [`TokenError::Serialization`] if the claims cannot be encoded.
pub fn generate_token(
    common_name: &str,
    ttl: TimeDelta,
    secret: &[u8],
) -> Result<(String, DateTime<Utc>), TokenError> {
    generate_token_at(common_name, ttl, secret, Utc::now())
}

/// [`generate_token`] with an explicit issuance instant.
pub fn generate_token_at(
    common_name: &str,
    ttl: TimeDelta,
    secret: &[u8],
    now: DateTime<Utc>,
) -> Result<(String, DateTime<Utc>), TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }

    let expires_at = now
        .checked_add_signed(ttl)
        .ok_or(TokenError::ExpiryOutOfRange)?;
    let claims = TokenClaims {
        common_name: common_name.to_string(),
        issued_at: now.timestamp(),
        expires_at: expires_at.timestamp(),
    };

    let payload =
        serde_json::to_vec(&claims).map_err(|e| TokenError::Serialization(e.to_string()))?;
    let signature = compute_mac(&payload, secret)?;

    let token = format!(
        "{}{SEPARATOR}{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(signature)
    );

    Ok((token, expires_at))
}

/// Verify a token's signature, then its expiry, and return its claims.
///
/// The MAC is always checked before the claims are parsed or the expiry is
/// looked at, so a forged token and an expired one are indistinguishable
/// until the signature has been verified.
///
/// # Errors
///
/// See [`TokenError`]; an empty `secret` yields `InvalidSignature`.
pub fn validate_token(token: &str, secret: &[u8]) -> Result<TokenClaims, TokenError> {
    validate_token_at(token, secret, Utc::now())
}

/// [`validate_token`] against an explicit clock reading.
pub fn validate_token_at(
    token: &str,
    secret: &[u8],
    now: DateTime<Utc>,
) -> Result<TokenClaims, TokenError> {
    let mut segments = token.split(SEPARATOR);
    let (Some(payload_b64), Some(signature_b64), None) =
        (segments.next(), segments.next(), segments.next())
    else {
        return Err(TokenError::InvalidToken);
    };

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::InvalidToken)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| TokenError::InvalidToken)?;

    if secret.is_empty() {
        return Err(TokenError::InvalidSignature);
    }

    let expected = compute_mac(&payload, secret)?;
    if !bool::from(expected.as_slice().ct_eq(signature.as_slice())) {
        return Err(TokenError::InvalidSignature);
    }

    let claims: TokenClaims =
        serde_json::from_slice(&payload).map_err(|_| TokenError::InvalidToken)?;

    if claims.is_expired_at(now) {
        return Err(TokenError::TokenExpired);
    }

    Ok(claims)
}

/// One-way SHA-256 digest of a token, used as the storage/revocation key.
#[must_use]
pub fn hash_token(token: &str) -> [u8; TOKEN_HASH_LEN] {
    Sha256::digest(token.as_bytes()).into()
}

/// Generate a random token identifier of the form `tok_<16 chars>`.
#[must_use]
pub fn generate_token_id() -> String {
    let bytes: [u8; TOKEN_ID_BYTES] = rand::random();
    format!("{TOKEN_ID_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate `size` bytes from the thread-local CSPRNG.
///
/// # Errors
///
/// [`TokenError::InvalidSecretSize`] when `size` is zero.
pub fn generate_secret(size: usize) -> Result<Vec<u8>, TokenError> {
    if size == 0 {
        return Err(TokenError::InvalidSecretSize);
    }
    let mut secret = vec![0u8; size];
    rand::fill(secret.as_mut_slice());
    Ok(secret)
}

fn compute_mac(data: &[u8], secret: &[u8]) -> Result<Vec<u8>, TokenError> {
    // HMAC accepts keys of any length; the error arm is unreachable in practice.
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::EmptySecret)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
