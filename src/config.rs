//! Configuration management

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::mtls::TlsConfig;
use crate::{Error, Result};

/// Prefix for environment overrides (`CERTGATE_SERVER__PORT=8443`).
pub const ENV_PREFIX: &str = "CERTGATE_";

/// Upper bound for `auth.token_max_ttl_secs` (100 years).
pub const MAX_TOKEN_TTL_SECS: i64 = 100 * 365 * 24 * 3600;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthSettings,
    /// TLS / mTLS configuration
    pub tls: TlsConfig,
    /// Security audit log configuration
    pub audit: AuditConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Take the audit source address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only safe behind a proxy that overwrites those headers.
    pub trust_proxy: bool,
    /// How often expired token records are purged
    pub reap_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 31337,
            trust_proxy: false,
            reap_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// `host:port`
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reaper interval as a `Duration` (at least one second).
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Explicit on/off switch. Unset means "on when a client CA is configured".
    pub enabled: Option<bool>,
    /// File holding the hex-encoded token signing secret
    pub secret_path: String,
    /// Lifetime of a minted token when the request does not ask for one
    pub token_ttl_secs: i64,
    /// Upper bound on a requested token lifetime
    pub token_max_ttl_secs: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: None,
            secret_path: "certgate.secret".to_string(),
            token_ttl_secs: 720 * 3600,
            token_max_ttl_secs: 8760 * 3600,
        }
    }
}

/// Security audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON Lines file the security events are appended to
    pub path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: "security.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Whether requests must authenticate.
    #[must_use]
    pub fn auth_enabled(&self) -> bool {
        self.auth
            .enabled
            .unwrap_or_else(|| self.tls.verifies_clients())
    }

    /// Reject contradictory settings.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let tls_material_missing =
            self.tls.server_cert.is_empty() || self.tls.server_key.is_empty();
        if self.tls.verifies_clients() && tls_material_missing {
            return Err(Error::Config(
                "tls.ca_cert requires tls.server_cert and tls.server_key".to_string(),
            ));
        }
        if self.tls.enabled && tls_material_missing {
            return Err(Error::Config(
                "tls.enabled requires tls.server_cert and tls.server_key".to_string(),
            ));
        }
        if self.auth.token_ttl_secs <= 0 {
            return Err(Error::Config(
                "auth.token_ttl_secs must be positive".to_string(),
            ));
        }
        if self.auth.token_max_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(Error::Config(format!(
                "auth.token_max_ttl_secs ({}) exceeds {MAX_TOKEN_TTL_SECS}",
                self.auth.token_max_ttl_secs
            )));
        }
        if self.auth.token_ttl_secs > self.auth.token_max_ttl_secs {
            return Err(Error::Config(format!(
                "auth.token_ttl_secs ({}) exceeds auth.token_max_ttl_secs ({})",
                self.auth.token_ttl_secs, self.auth.token_max_ttl_secs
            )));
        }
        Ok(())
    }

    /// Whether the listener speaks TLS.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.tls.enabled || self.tls.verifies_clients()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(yaml: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certgate.yaml");
        std::fs::write(&path, yaml).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_are_plain_http_without_auth() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:31337");
        assert!(!config.auth_enabled());
        assert!(!config.tls_enabled());
        assert_eq!(config.auth.token_ttl_secs, 30 * 24 * 3600);
        assert_eq!(config.audit.path, "security.log");
        config.validate().unwrap();
    }

    #[test]
    fn ca_cert_turns_auth_on_by_default() {
        let (_dir, path) = write_config(
            r#"
tls:
  server_cert: /etc/certgate/server.crt
  server_key: /etc/certgate/server.key
  ca_cert: /etc/certgate/ca.crt
"#,
        );
        let config = Config::load(Some(&path)).unwrap();
        assert!(config.auth_enabled());
        assert!(config.tls_enabled());
    }

    #[test]
    fn explicit_auth_switch_wins() {
        let (_dir, path) = write_config(
            r#"
auth:
  enabled: false
tls:
  server_cert: s.crt
  server_key: s.key
  ca_cert: ca.crt
"#,
        );
        assert!(!Config::load(Some(&path)).unwrap().auth_enabled());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let (_dir, path) = write_config("server:\n  port: 8443\n  trust_proxy: true\n");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 8443);
        assert!(config.server.trust_proxy);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.auth.secret_path, "certgate.secret");
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/certgate.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn ca_without_server_material_is_rejected() {
        let mut config = Config::default();
        config.tls.ca_cert = "ca.crt".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tls.ca_cert"));
    }

    #[test]
    fn ttl_above_max_is_rejected() {
        let mut config = Config::default();
        config.auth.token_ttl_secs = config.auth.token_max_ttl_secs + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_ttl_beyond_century_is_rejected() {
        let mut config = Config::default();
        config.auth.token_max_ttl_secs = i64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("auth.token_max_ttl_secs"));
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let mut config = Config::default();
        config.auth.token_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reap_interval_has_floor() {
        let mut config = Config::default();
        config.server.reap_interval_secs = 0;
        assert_eq!(config.server.reap_interval(), Duration::from_secs(1));
    }
}
