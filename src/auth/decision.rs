//! Per-request authentication decision.
//!
//! [`decide`] and [`decide_cert_only`] turn the credentials found on a
//! request into exactly one [`AuthOutcome`]. They never touch the response or
//! the audit log; the middleware does both from the outcome.

use axum::{
    Json,
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use super::revocation::{RevocationCheck, RevocationError};
use crate::identity::CallerIdentity;
use crate::mtls::{self, PeerCertificates};
use crate::token::{self, TokenError};

/// Authorization scheme prefix, matched exactly.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Closed set of rejection kinds.
///
/// The kind is recorded in the audit log; the caller only ever sees a
/// uniform `401`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Bearer token malformed, forged or expired.
    #[error("invalid token: {0}")]
    InvalidToken(TokenError),

    /// Bearer token valid on its own but refused by the revocation check.
    #[error("token revoked: {0}")]
    TokenRevoked(RevocationError),

    /// Neither a certificate nor a bearer token was presented.
    #[error("no credentials")]
    NoCredentials,

    /// The route needs a certificate and none was presented.
    #[error("client certificate required")]
    CertificateRequired,
}

impl Rejection {
    /// Audit reason tag.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid_token",
            Self::TokenRevoked(_) => "token_revoked",
            Self::NoCredentials => "no_credentials",
            Self::CertificateRequired => "cert_required",
        }
    }

    /// Audit details text (unsanitized; the logger sanitizes it).
    #[must_use]
    pub fn details(&self) -> String {
        match self {
            Self::InvalidToken(e) => e.to_string(),
            Self::TokenRevoked(e) => e.to_string(),
            Self::NoCredentials => String::new(),
            Self::CertificateRequired => "token auth not accepted".to_string(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        unauthorized_response()
    }
}

/// The single response every rejection collapses to.
#[must_use]
pub fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}

/// Result of one decision: an identity or a rejection, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Caller resolved.
    Authenticated(CallerIdentity),
    /// Caller refused.
    Rejected(Rejection),
}

/// Credentials found on one request.
///
/// Owned so nothing borrows the request across the revocation lookup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    certificate: Option<CallerIdentity>,
    bearer: Option<String>,
}

impl Credentials {
    /// Build from already-extracted parts.
    #[must_use]
    pub fn new(certificate: Option<CallerIdentity>, bearer: Option<String>) -> Self {
        Self {
            certificate,
            bearer,
        }
    }

    /// Read the peer certificate (attached by the TLS acceptor) and the
    /// `Authorization` header.
    #[must_use]
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let certificate =
            mtls::from_peer_certificates(request.extensions().get::<PeerCertificates>());
        let bearer = bearer_token(request.headers()).map(str::to_string);
        Self::new(certificate, bearer)
    }

    /// Identity from the peer certificate, if one was presented.
    #[must_use]
    pub fn certificate(&self) -> Option<&CallerIdentity> {
        self.certificate.as_ref()
    }

    /// Raw bearer token, if one was presented.
    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }
}

/// Token after the exact `Bearer ` prefix; `None` for any other header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
}

/// Certificate first, then bearer token, then reject.
///
/// A bearer token goes through signature and expiry validation before the
/// revocation check is consulted.
pub async fn decide(
    credentials: Credentials,
    secret: &[u8],
    revocation: Option<&dyn RevocationCheck>,
) -> AuthOutcome {
    let Credentials {
        certificate,
        bearer,
    } = credentials;

    if let Some(identity) = certificate {
        return AuthOutcome::Authenticated(identity);
    }

    let Some(raw) = bearer else {
        return AuthOutcome::Rejected(Rejection::NoCredentials);
    };

    let claims = match token::validate_token(&raw, secret) {
        Ok(claims) => claims,
        Err(e) => return AuthOutcome::Rejected(Rejection::InvalidToken(e)),
    };

    let token_id = match revocation {
        Some(check) => match check.check(&raw).await {
            Ok(id) => id,
            Err(e) => return AuthOutcome::Rejected(Rejection::TokenRevoked(e)),
        },
        None => String::new(),
    };

    AuthOutcome::Authenticated(CallerIdentity::from_token(claims.common_name, token_id))
}

/// Certificate or reject. A bearer token is never looked at.
#[must_use]
pub fn decide_cert_only(credentials: Credentials) -> AuthOutcome {
    match credentials.certificate {
        Some(identity) => AuthOutcome::Authenticated(identity),
        None => AuthOutcome::Rejected(Rejection::CertificateRequired),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::identity::AuthMethod;

    const SECRET: &[u8] = b"decision-test-secret-32-bytes!!!";

    fn alice_cert() -> CallerIdentity {
        CallerIdentity::from_certificate("alice", "CN=alice", "1", Utc::now())
    }

    fn token_for(cn: &str) -> String {
        token::generate_token(cn, TimeDelta::hours(1), SECRET).unwrap().0
    }

    #[tokio::test]
    async fn certificate_wins_over_bearer() {
        // GIVEN: both a certificate and a (garbage) bearer token
        let creds = Credentials::new(Some(alice_cert()), Some("garbage".into()));
        // WHEN
        let outcome = decide(creds, SECRET, None).await;
        // THEN: the token is never validated
        let AuthOutcome::Authenticated(id) = outcome else {
            panic!("expected identity, got {outcome:?}");
        };
        assert_eq!(id.common_name(), "alice");
        assert_eq!(id.auth_method(), AuthMethod::Cert);
    }

    #[tokio::test]
    async fn valid_token_without_revocation_check() {
        let creds = Credentials::new(None, Some(token_for("bob")));
        let AuthOutcome::Authenticated(id) = decide(creds, SECRET, None).await else {
            panic!("expected identity");
        };
        assert_eq!(id.common_name(), "bob");
        assert_eq!(id.auth_method(), AuthMethod::Token);
        assert!(id.token_id().is_empty());
    }

    #[tokio::test]
    async fn revocation_check_supplies_token_id() {
        let check = |_: &str| Ok::<_, RevocationError>("tok_42".to_string());
        let creds = Credentials::new(None, Some(token_for("bob")));
        let AuthOutcome::Authenticated(id) = decide(creds, SECRET, Some(&check)).await else {
            panic!("expected identity");
        };
        assert_eq!(id.token_id(), "tok_42");
    }

    #[tokio::test]
    async fn revoked_token_is_rejected() {
        let check = |_: &str| Err::<String, _>(RevocationError::Revoked);
        let creds = Credentials::new(None, Some(token_for("bob")));
        let outcome = decide(creds, SECRET, Some(&check)).await;
        assert_eq!(
            outcome,
            AuthOutcome::Rejected(Rejection::TokenRevoked(RevocationError::Revoked))
        );
    }

    #[tokio::test]
    async fn forged_token_never_reaches_revocation_check() {
        // GIVEN: a token signed with another secret and a counting check
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let check = move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, RevocationError>("tok".to_string())
        };
        let forged = token::generate_token("mallory", TimeDelta::hours(1), b"other-secret")
            .unwrap()
            .0;

        // WHEN
        let outcome = decide(Credentials::new(None, Some(forged)), SECRET, Some(&check)).await;

        // THEN
        assert_eq!(
            outcome,
            AuthOutcome::Rejected(Rejection::InvalidToken(TokenError::InvalidSignature))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_is_invalid_token() {
        let expired = token::generate_token("bob", TimeDelta::hours(-1), SECRET)
            .unwrap()
            .0;
        let outcome = decide(Credentials::new(None, Some(expired)), SECRET, None).await;
        let AuthOutcome::Rejected(rejection) = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(rejection, Rejection::InvalidToken(TokenError::TokenExpired));
        assert_eq!(rejection.reason(), "invalid_token");
    }

    #[tokio::test]
    async fn nothing_presented_is_no_credentials() {
        let outcome = decide(Credentials::default(), SECRET, None).await;
        assert_eq!(outcome, AuthOutcome::Rejected(Rejection::NoCredentials));
    }

    #[test]
    fn cert_only_ignores_valid_token() {
        let creds = Credentials::new(None, Some(token_for("bob")));
        assert_eq!(
            decide_cert_only(creds),
            AuthOutcome::Rejected(Rejection::CertificateRequired)
        );
    }

    #[test]
    fn cert_only_accepts_certificate() {
        let outcome = decide_cert_only(Credentials::new(Some(alice_cert()), None));
        assert!(matches!(outcome, AuthOutcome::Authenticated(id) if id.common_name() == "alice"));
    }

    #[test]
    fn bearer_prefix_is_exact() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        for value in ["bearer abc.def", "Basic dXNlcjpwYXNz", "Bearerabc", "abc.def"] {
            headers.insert(header::AUTHORIZATION, value.parse().unwrap());
            assert_eq!(bearer_token(&headers), None, "{value}");
        }
    }

    #[test]
    fn reason_tags_are_stable() {
        assert_eq!(
            Rejection::InvalidToken(TokenError::InvalidToken).reason(),
            "invalid_token"
        );
        assert_eq!(
            Rejection::TokenRevoked(RevocationError::NotFound).reason(),
            "token_revoked"
        );
        assert_eq!(Rejection::NoCredentials.reason(), "no_credentials");
        assert_eq!(Rejection::CertificateRequired.reason(), "cert_required");
    }

    #[test]
    fn every_rejection_renders_the_same_response() {
        for rejection in [
            Rejection::InvalidToken(TokenError::InvalidSignature),
            Rejection::TokenRevoked(RevocationError::Expired),
            Rejection::NoCredentials,
            Rejection::CertificateRequired,
        ] {
            let response = rejection.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
        }
    }
}
