//! Mutual TLS: listener configuration and client certificate identity.
//!
//! # Architecture
//!
//! ```text
//! TCP connection
//!   → TLS handshake  (rustls verifies the client cert against the CA, if offered)
//!   → PeerCertAcceptor attaches PeerCertificates to each request
//!   → auth middleware: mtls::from_peer_certificates → CallerIdentity
//! ```
//!
//! # Modules
//!
//! - [`config`]: YAML configuration (`TlsConfig`)
//! - [`identity`]: X.509 field extraction (`PeerCertificates`, `from_peer_certificates`)
//! - [`acceptor`]: `axum-server` acceptor exposing the peer chain
//! - [`cert_manager`]: rustls config building and certificate generation CLI helpers

pub mod acceptor;
pub mod cert_manager;
pub mod config;
pub mod identity;

pub use acceptor::PeerCertAcceptor;
pub use cert_manager::{
    CaParams, CertGenerator, GeneratedCert, LeafCertParams, LeafUsage, build_tls_config,
    load_certs, load_private_key,
};
pub use config::TlsConfig;
pub use identity::{PeerCertificates, from_der, from_peer_certificates};
