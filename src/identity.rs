//! Caller identity and its request-scoped carrier.
//!
//! A [`CallerIdentity`] is built fresh for each request by the auth
//! middleware and stored in the request extensions. Handlers read it through
//! [`current_identity`] or the [`CurrentIdentity`] extractor and never need to
//! know whether it came from a certificate or a token.

use std::fmt;

use axum::{
    extract::FromRequestParts,
    http::{Request, request::Parts},
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::decision::unauthorized_response;

/// Common Name reported when authentication is administratively disabled.
pub const SINGLE_USER_CN: &str = "single-user-mode";

/// How a caller was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Verified mTLS client certificate.
    Cert,
    /// Signed bearer token.
    Token,
    /// Authentication disabled (single-user mode).
    None,
}

impl AuthMethod {
    /// Wire representation used in headers and audit records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cert => "cert",
            Self::Token => "token",
            Self::None => "none",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved identity of the caller of one request.
///
/// Fields are private so the per-method shape cannot be broken after
/// construction: certificate identities always carry a distinguished name
/// and an expiry, token identities never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerIdentity {
    common_name: String,
    distinguished_name: String,
    certificate_serial: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate_expiry: Option<DateTime<Utc>>,
    auth_method: AuthMethod,
    #[serde(skip_serializing_if = "String::is_empty")]
    token_id: String,
}

impl CallerIdentity {
    /// Identity derived from a verified client certificate.
    #[must_use]
    pub fn from_certificate(
        common_name: impl Into<String>,
        distinguished_name: impl Into<String>,
        serial: impl Into<String>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self {
            common_name: common_name.into(),
            distinguished_name: distinguished_name.into(),
            certificate_serial: serial.into(),
            certificate_expiry: Some(not_after),
            auth_method: AuthMethod::Cert,
            token_id: String::new(),
        }
    }

    /// Identity derived from a validated bearer token.
    ///
    /// `token_id` is empty when no revocation check is configured.
    #[must_use]
    pub fn from_token(common_name: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            distinguished_name: String::new(),
            certificate_serial: String::new(),
            certificate_expiry: None,
            auth_method: AuthMethod::Token,
            token_id: token_id.into(),
        }
    }

    /// Fixed identity used when authentication is disabled.
    #[must_use]
    pub fn single_user() -> Self {
        Self {
            common_name: SINGLE_USER_CN.to_string(),
            distinguished_name: String::new(),
            certificate_serial: String::new(),
            certificate_expiry: None,
            auth_method: AuthMethod::None,
            token_id: String::new(),
        }
    }

    /// Common Name (primary identifier).
    #[must_use]
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Full subject DN; empty unless certificate-authenticated.
    #[must_use]
    pub fn distinguished_name(&self) -> &str {
        &self.distinguished_name
    }

    /// Certificate serial (decimal); empty unless certificate-authenticated.
    #[must_use]
    pub fn certificate_serial(&self) -> &str {
        &self.certificate_serial
    }

    /// Certificate `notAfter`; `None` unless certificate-authenticated.
    #[must_use]
    pub fn certificate_expiry(&self) -> Option<DateTime<Utc>> {
        self.certificate_expiry
    }

    /// Authentication method.
    #[must_use]
    pub fn auth_method(&self) -> AuthMethod {
        self.auth_method
    }

    /// Token identifier from the revocation store; empty unless token-authenticated.
    #[must_use]
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    /// `true` for certificate callers and for single-user mode.
    ///
    /// Operations that must not be reachable with a token (minting or
    /// deleting tokens) check this in addition to the cert-only middleware.
    #[must_use]
    pub fn holds_certificate_authority(&self) -> bool {
        matches!(self.auth_method, AuthMethod::Cert | AuthMethod::None)
    }
}

/// Shorthand for [`CallerIdentity::single_user`].
#[must_use]
pub fn single_user_identity() -> CallerIdentity {
    CallerIdentity::single_user()
}

/// Attach an identity to a request, replacing any earlier one.
pub fn attach_identity<B>(request: &mut Request<B>, identity: CallerIdentity) {
    request.extensions_mut().insert(identity);
}

/// Read the identity attached to a request.
#[must_use]
pub fn current_identity<B>(request: &Request<B>) -> Option<&CallerIdentity> {
    request.extensions().get::<CallerIdentity>()
}

/// Extractor for handlers behind the auth middleware.
///
/// Rejects with the same `401` as the auth middleware if the middleware was
/// not installed on the route.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub CallerIdentity);

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .map(Self)
            .ok_or_else(unauthorized_response)
    }
}
