//! Request authentication.
//!
//! - [`revocation`]: the `RevocationCheck` port consulted for bearer tokens
//! - [`decision`]: credential extraction and the certificate/token decision
//! - [`middleware`]: axum middleware (`authenticate`, `require_certificate`)

pub mod decision;
pub mod middleware;
pub mod revocation;

pub use decision::{AuthOutcome, Credentials, Rejection, decide, decide_cert_only};
pub use middleware::{
    AuthConfig, SourceIp, X_AUTH_METHOD, X_AUTH_USER, authenticate, extract_source_ip,
    require_certificate,
};
pub use revocation::{RevocationCheck, RevocationError};
