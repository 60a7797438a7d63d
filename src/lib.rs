//! certgate Library
//!
//! Authentication gateway for a small HTTP API: callers present either a
//! client certificate over mutual TLS or an HMAC-signed bearer token, and
//! every authentication decision lands in a JSON Lines security log.
//!
//! # Features
//!
//! - **mTLS identity**: CN / DN / serial / expiry from the verified peer certificate
//! - **Bearer tokens**: stateless HMAC-SHA256 tokens, revocable through the token registry
//! - **Single decision point**: certificate wins, tokens are the fallback, every rejection looks the same
//! - **Security audit log**: sanitized, append-only, reopenable on SIGHUP
//! - **Operator CLI**: private CA bootstrap, leaf issuance, secret rotation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod mtls;
pub mod registry;
pub mod secrets;
pub mod server;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns [`Error::Internal`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
