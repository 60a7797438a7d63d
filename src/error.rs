//! Error types for certgate

use std::io;

use thiserror::Error;

/// Result type alias for certgate
pub type Result<T> = std::result::Result<T, Error>;

/// Process-level errors.
///
/// Per-request authentication failures are not represented here; they are
/// carried by [`crate::auth::Rejection`] and never escape the middleware.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS material could not be loaded or assembled
    #[error("TLS error: {0}")]
    Tls(String),

    /// Signing secret could not be read, created or rotated
    #[error("Secret store error: {0}")]
    Secret(String),

    /// Token codec failure outside of request handling (e.g. minting)
    #[error("Token error: {0}")]
    Token(#[from] crate::token::TokenError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
