//! Axum middleware wrapping the authentication decision.
//!
//! ```text
//! request
//!   → disabled?            → single-user identity, no audit record
//!   → Credentials::from_request (peer cert extension + Authorization header)
//!   → decide / decide_cert_only
//!   → Authenticated: attach identity, audit auth_success, X-Auth-* headers
//!   → Rejected:      audit auth_failure(reason), uniform 401
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::decision::{AuthOutcome, Credentials, decide, decide_cert_only};
use super::revocation::RevocationCheck;
use crate::audit::SecurityLogger;
use crate::identity::{AuthMethod, CallerIdentity, attach_identity, single_user_identity};

/// Response header naming the authenticated Common Name.
pub const X_AUTH_USER: HeaderName = HeaderName::from_static("x-auth-user");

/// Response header naming the authentication method (`cert` or `token`).
pub const X_AUTH_METHOD: HeaderName = HeaderName::from_static("x-auth-method");

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Client address resolved by the middleware, attached to every request it
/// lets through so handlers can write audit records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceIp(pub String);

/// Middleware configuration, built once at startup and shared via `State`.
pub struct AuthConfig {
    secret: Vec<u8>,
    /// Optional revocation lookup run after a token validates.
    pub revocation: Option<Arc<dyn RevocationCheck>>,
    /// Optional audit sink.
    pub logger: Option<Arc<SecurityLogger>>,
    /// When `false` every request gets the single-user identity.
    pub enabled: bool,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy: bool,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"[REDACTED]")
            .field("revocation", &self.revocation.is_some())
            .field("logger", &self.logger)
            .field("enabled", &self.enabled)
            .field("trust_proxy", &self.trust_proxy)
            .finish()
    }
}

impl AuthConfig {
    /// Enabled config with no revocation check, no logger, no proxy trust.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            revocation: None,
            logger: None,
            enabled: true,
            trust_proxy: false,
        }
    }

    /// Set the revocation check.
    #[must_use]
    pub fn with_revocation(mut self, check: Arc<dyn RevocationCheck>) -> Self {
        self.revocation = Some(check);
        self
    }

    /// Set the audit logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<SecurityLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Turn authentication on or off.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Trust proxy headers for the source address.
    #[must_use]
    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    /// Token signing secret.
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

/// Accept a client certificate or a bearer token.
pub async fn authenticate(
    State(config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&config, request, next, false).await
}

/// Accept only a client certificate.
///
/// For routes a token must not be able to reach, such as minting new tokens.
pub async fn require_certificate(
    State(config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&config, request, next, true).await
}

async fn enforce(
    config: &AuthConfig,
    mut request: Request<Body>,
    next: Next,
    cert_only: bool,
) -> Response {
    let source_ip = extract_source_ip(&request, config.trust_proxy);

    if !config.enabled {
        request.extensions_mut().insert(SourceIp(source_ip));
        attach_identity(&mut request, single_user_identity());
        return next.run(request).await;
    }

    let credentials = Credentials::from_request(&request);

    let outcome = if cert_only {
        decide_cert_only(credentials)
    } else {
        decide(credentials, &config.secret, config.revocation.as_deref()).await
    };

    match outcome {
        AuthOutcome::Authenticated(identity) => {
            debug!(
                user = %identity.common_name(),
                method = %identity.auth_method(),
                path = %request.uri().path(),
                "Authenticated request"
            );
            if let Some(logger) = &config.logger {
                logger.log_auth_success(&identity, &source_ip);
            }

            let markers = response_markers(&identity);
            request.extensions_mut().insert(SourceIp(source_ip));
            attach_identity(&mut request, identity);

            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            if let Some((user, method)) = markers {
                headers.insert(X_AUTH_METHOD, method);
                if let Some(user) = user {
                    headers.insert(X_AUTH_USER, user);
                }
            }
            response
        }
        AuthOutcome::Rejected(rejection) => {
            warn!(
                reason = rejection.reason(),
                ip = %source_ip,
                path = %request.uri().path(),
                "Authentication rejected"
            );
            if let Some(logger) = &config.logger {
                logger.log_auth_failure(rejection.reason(), &rejection.details(), &source_ip);
            }
            rejection.into_response()
        }
    }
}

/// `X-Auth-User` / `X-Auth-Method` values; `None` for the single-user
/// sentinel.
///
/// The CN is sent as its raw UTF-8 bytes; it is omitted only when it holds
/// bytes no header may carry (control characters).
fn response_markers(identity: &CallerIdentity) -> Option<(Option<HeaderValue>, HeaderValue)> {
    if identity.auth_method() == AuthMethod::None {
        return None;
    }
    let user = HeaderValue::from_bytes(identity.common_name().as_bytes()).ok();
    Some((user, HeaderValue::from_static(identity.auth_method().as_str())))
}

/// Client address for the audit log.
///
/// Without `trust_proxy` only the transport peer address is used. With it,
/// the left-most `X-Forwarded-For` entry wins, then `X-Real-IP`, then the
/// peer address. Empty when none is known.
#[must_use]
pub fn extract_source_ip<B>(request: &Request<B>, trust_proxy: bool) -> String {
    if trust_proxy {
        let header = |name: &HeaderName| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(xff) = header(&X_FORWARDED_FOR) {
            let first = xff.split_once(',').map_or(xff, |(first, _)| first);
            return first.trim().to_string();
        }
        if let Some(real_ip) = header(&X_REAL_IP) {
            return real_ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}
