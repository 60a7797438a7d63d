//! HTTP surface and process lifecycle.
//!
//! # Routes
//!
//! | Route | Guard |
//! |-------|-------|
//! | `GET /api/health` | public |
//! | `GET /api/status` | public |
//! | `GET /api/whoami` | certificate or token |
//! | `GET /api/tokens` | certificate or token |
//! | `POST /api/tokens` | certificate only |
//! | `DELETE /api/tokens/{id}` | certificate only |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{MethodRouter, delete, get, post},
};
use axum_server::tls_rustls::RustlsConfig;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::audit::SecurityLogger;
use crate::auth::decision::unauthorized_response;
use crate::auth::{AuthConfig, RevocationCheck, SourceIp, authenticate, require_certificate};
use crate::config::{Config, MAX_TOKEN_TTL_SECS};
use crate::identity::CurrentIdentity;
use crate::mtls::{PeerCertAcceptor, build_tls_config};
use crate::registry::{TokenRecord, TokenRegistry, spawn_reaper};
use crate::secrets::{FileSecretStore, SecretStore};
use crate::token::{generate_token_at, generate_token_id, hash_token};
use crate::{Error, Result};

/// How long in-flight TLS connections get to finish on shutdown.
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared handler state.
#[derive(Debug)]
pub struct AppState {
    /// Middleware configuration (secret, logger, switches).
    pub auth: Arc<AuthConfig>,
    /// Minted token records.
    pub registry: Arc<TokenRegistry>,
    /// Lifetime of a token when the request does not name one.
    pub default_ttl: TimeDelta,
    /// Upper bound on a requested lifetime.
    pub max_ttl: TimeDelta,
    /// Whether the listener speaks TLS (reported by `/api/status`).
    pub tls_enabled: bool,
}

impl AppState {
    /// State with TTLs taken from `config`.
    #[must_use]
    pub fn from_config(
        config: &Config,
        auth: Arc<AuthConfig>,
        registry: Arc<TokenRegistry>,
    ) -> Self {
        Self {
            auth,
            registry,
            default_ttl: ttl_from_secs(config.auth.token_ttl_secs),
            max_ttl: ttl_from_secs(config.auth.token_max_ttl_secs),
            tls_enabled: config.tls_enabled(),
        }
    }

    fn logger(&self) -> Option<&SecurityLogger> {
        self.auth.logger.as_deref()
    }
}

/// `secs` as a `TimeDelta`, saturating at the largest allowed token lifetime.
fn ttl_from_secs(secs: i64) -> TimeDelta {
    TimeDelta::try_seconds(secs.min(MAX_TOKEN_TTL_SECS)).unwrap_or(TimeDelta::zero())
}

/// Build the API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let auth = Arc::clone(&state.auth);
    let any_credential = || middleware::from_fn_with_state(Arc::clone(&auth), authenticate);
    let certificate_only =
        || middleware::from_fn_with_state(Arc::clone(&auth), require_certificate);

    let tokens: MethodRouter<Arc<AppState>> = get(list_tokens)
        .route_layer(any_credential())
        .merge(post(create_token).route_layer(certificate_only()));

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/whoami", get(whoami).route_layer(any_credential()))
        .route("/api/tokens", tokens)
        .route(
            "/api/tokens/{id}",
            delete(delete_token).route_layer(certificate_only()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "auth_enabled": state.auth.enabled,
        "tls": state.tls_enabled,
    }))
}

async fn whoami(CurrentIdentity(identity): CurrentIdentity) -> impl IntoResponse {
    Json(identity)
}

async fn list_tokens(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
) -> impl IntoResponse {
    Json(state.registry.list_for(identity.common_name()))
}

/// `POST /api/tokens` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTokenRequest {
    /// Label for the token.
    pub name: String,
    /// Requested lifetime in seconds; clamped to the configured maximum.
    #[serde(default)]
    pub expires_in_secs: Option<i64>,
}

/// `POST /api/tokens` response. The only time the raw token is shown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTokenResponse {
    /// Record id.
    pub id: String,
    /// Label.
    pub name: String,
    /// Bearer token.
    pub token: String,
    /// Mint time.
    pub created_at: DateTime<Utc>,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn create_token(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Extension(SourceIp(source_ip)): Extension<SourceIp>,
    body: std::result::Result<Json<CreateTokenRequest>, JsonRejection>,
) -> Response {
    if !identity.holds_certificate_authority() {
        return unauthorized_response();
    }

    let Ok(Json(request)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "invalid JSON");
    };
    let name = request.name.trim();
    if name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "name is required");
    }

    let ttl = match request.expires_in_secs {
        Some(secs) if secs <= 0 => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "expires_in_secs must be positive",
            );
        }
        Some(secs) => TimeDelta::try_seconds(secs)
            .map_or(state.max_ttl, |requested| requested.min(state.max_ttl)),
        None => state.default_ttl.min(state.max_ttl),
    };

    let now = Utc::now();
    let (token, expires_at) =
        match generate_token_at(identity.common_name(), ttl, state.auth.secret(), now) {
            Ok(minted) => minted,
            Err(e) => {
                error!(error = %e, "Failed to mint token");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to generate token",
                );
            }
        };

    let id = generate_token_id();
    state.registry.insert(TokenRecord {
        id: id.clone(),
        owner_cn: identity.common_name().to_string(),
        name: name.to_string(),
        token_hash: hash_token(&token),
        created_at: now,
        expires_at,
        last_used_at: None,
    });

    if let Some(logger) = state.logger() {
        logger.log_token_created(identity.common_name(), &id, name, expires_at, &source_ip);
    }
    info!(user = %identity.common_name(), token_id = %id, "Token created");

    let response = CreateTokenResponse {
        id,
        name: name.to_string(),
        token,
        created_at: now,
        expires_at,
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

async fn delete_token(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Extension(SourceIp(source_ip)): Extension<SourceIp>,
    Path(id): Path<String>,
) -> Response {
    if !identity.holds_certificate_authority() {
        return unauthorized_response();
    }

    if !state.registry.delete(&id, identity.common_name()) {
        return error_response(StatusCode::NOT_FOUND, "token not found");
    }

    if let Some(logger) = state.logger() {
        logger.log_token_revoked(identity.common_name(), &id, &source_ip);
    }
    info!(user = %identity.common_name(), token_id = %id, "Token revoked");
    StatusCode::NO_CONTENT.into_response()
}

/// Load the signing secret, open the audit log, and serve until a shutdown
/// signal arrives.
///
/// # Errors
///
/// Any startup failure (secret store, audit log, TLS material, bind) is
/// returned before the listener accepts a connection.
pub async fn run(config: Config) -> Result<()> {
    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
        config.server.port,
    );
    let auth_enabled = config.auth_enabled();

    let (store, key) = FileSecretStore::for_file(&config.auth.secret_path)?;
    let secret = store.get_or_create(&key)?;

    let logger = Arc::new(SecurityLogger::open(&config.audit.path).map_err(|e| {
        Error::Config(format!(
            "Failed to open security log {}: {e}",
            config.audit.path
        ))
    })?);

    let registry = Arc::new(TokenRegistry::new());
    let revocation: Arc<dyn RevocationCheck> = registry.clone();
    let auth = Arc::new(
        AuthConfig::new(secret)
            .with_enabled(auth_enabled)
            .with_trust_proxy(config.server.trust_proxy)
            .with_revocation(revocation)
            .with_logger(Arc::clone(&logger)),
    );
    let state = Arc::new(AppState::from_config(&config, auth, Arc::clone(&registry)));
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let tls = if config.tls_enabled() {
        Some(build_tls_config(&config.tls)?)
    } else {
        None
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    spawn_reaper(
        registry,
        config.server.reap_interval(),
        shutdown_tx.subscribe(),
    );
    spawn_log_reopener(Arc::clone(&logger), shutdown_tx.subscribe());

    let ca_file = config.tls.verifies_clients().then_some(config.tls.ca_cert.as_str());
    if auth_enabled {
        logger.log_server_start("authenticated", ca_file);
        info!(ca_cert = ca_file.unwrap_or(""), "Authentication enabled");
    } else {
        logger.log_server_start("development", ca_file);
        warn!("Authentication disabled: every request runs as single-user-mode");
    }

    if let Some(tls) = tls {
        let handle = axum_server::Handle::new();
        let acceptor = PeerCertAcceptor::new(RustlsConfig::from_config(Arc::new(tls)));

        let signal_handle = handle.clone();
        let signal_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(signal_tx).await;
            signal_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
        });

        info!(
            addr = %addr,
            mtls = config.tls.verifies_clients(),
            "Listening (TLS)"
        );
        axum_server::bind(addr)
            .acceptor(acceptor)
            .handle(handle)
            .serve(app)
            .await?;
    } else {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "Listening (plain HTTP)");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
            .await?;
    }

    logger.log_server_stop("shutdown");
    info!("Server stopped");
    Ok(())
}

/// Reopen the audit log on `SIGHUP` (logrotate).
#[cfg(unix)]
fn spawn_log_reopener(logger: Arc<SecurityLogger>, mut shutdown: broadcast::Receiver<()>) {
    tokio::spawn(async move {
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGHUP handler; log reopen disabled");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = hangup.recv() => match logger.reopen() {
                    Ok(()) => info!("Reopened security log"),
                    Err(e) => error!(error = %e, "Failed to reopen security log"),
                },
                _ = shutdown.recv() => break,
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_log_reopener(_logger: Arc<SecurityLogger>, _shutdown: broadcast::Receiver<()>) {}

/// Resolve on Ctrl+C or `SIGTERM`, then notify background tasks.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
