//! TLS listener configuration.
//!
//! # Example YAML
//!
//! ```yaml
//! tls:
//!   enabled: true
//!   server_cert: "/etc/certgate/tls/server.crt"
//!   server_key:  "/etc/certgate/tls/server.key"
//!   ca_cert:     "/etc/certgate/tls/ca.crt"
//!   require_client_cert: false
//! ```
//!
//! Setting `ca_cert` turns on client certificate verification and, unless
//! `auth.enabled` says otherwise, authentication itself.

use serde::{Deserialize, Serialize};

/// TLS / mTLS configuration block.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Serve HTTPS instead of plain HTTP.
    pub enabled: bool,

    /// Path to the PEM-encoded server certificate file.
    pub server_cert: String,

    /// Path to the PEM-encoded server private key file.
    pub server_key: String,

    /// Path to the PEM-encoded CA certificate used to verify client certs.
    ///
    /// Empty means client certificates are neither requested nor verified.
    pub ca_cert: String,

    /// When `true`, clients without a certificate signed by `ca_cert` are
    /// rejected during the handshake.
    ///
    /// When `false` (default) a certificate is verified if one is offered,
    /// so bearer-token clients can still connect.
    pub require_client_cert: bool,

    /// Optional path to a PEM-encoded Certificate Revocation List.
    pub crl_path: Option<String>,
}

impl TlsConfig {
    /// `true` when a client CA is configured.
    #[must_use]
    pub fn verifies_clients(&self) -> bool {
        !self.ca_cert.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tls_config_is_disabled() {
        // GIVEN: default-constructed config
        let cfg = TlsConfig::default();
        // THEN: plain HTTP, no client verification
        assert!(!cfg.enabled);
        assert!(!cfg.verifies_clients());
        assert!(cfg.crl_path.is_none());
    }

    #[test]
    fn client_cert_is_optional_by_default() {
        let yaml = "enabled: true\nserver_cert: a\nserver_key: b\nca_cert: c";
        let cfg: TlsConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.verifies_clients());
        assert!(!cfg.require_client_cert);
    }

    #[test]
    fn require_client_cert_can_be_enabled() {
        let yaml = "enabled: true\nca_cert: c\nrequire_client_cert: true\ncrl_path: /tmp/crl.pem";
        let cfg: TlsConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.require_client_cert);
        assert_eq!(cfg.crl_path.as_deref(), Some("/tmp/crl.pem"));
    }
}
