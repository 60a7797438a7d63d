//! Certificate management: loading, rustls config building, and CLI helpers.
//!
//! Provides:
//! - [`build_tls_config`]: build a `rustls::ServerConfig` from [`TlsConfig`]
//! - [`load_certs`] / [`load_private_key`]: PEM file loading
//! - [`CertGenerator`]: `rcgen`-backed cert generation for `certgate tls` CLI commands
//!
//! # File format
//!
//! All certificate and key files are expected in **PEM format**.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    Ia5String, IsCa, KeyPair, SanType, date_time_ymd,
};
use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use tracing::debug;

use crate::mtls::config::TlsConfig;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS server config
// ─────────────────────────────────────────────────────────────────────────────

/// Build a `rustls::ServerConfig` from the listener config.
///
/// - no `ca_cert`: server-authenticated TLS only
/// - `ca_cert` + `require_client_cert: false`: a client certificate is
///   verified if offered, connections without one are still accepted
/// - `ca_cert` + `require_client_cert: true`: the handshake fails without a
///   valid client certificate
///
/// The aws-lc-rs provider is selected explicitly so the process never depends
/// on which rustls backends happen to be compiled in.
///
/// # Errors
///
/// Returns an error if any certificate or key file cannot be read or parsed,
/// or if the rustls config cannot be built (e.g. mismatched cert/key pair).
pub fn build_tls_config(config: &TlsConfig) -> Result<ServerConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let server_certs = load_certs(&config.server_cert)?;
    let server_key = load_private_key(&config.server_key)?;

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(format!("Unsupported protocol versions: {e}")))?;

    let builder = if config.verifies_clients() {
        builder.with_client_cert_verifier(build_client_verifier(config, provider)?)
    } else {
        builder.with_no_client_auth()
    };

    let mut tls_cfg = builder
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Tls(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server_cert = %config.server_cert,
        ca_cert = %config.ca_cert,
        require_client_cert = config.require_client_cert,
        "TLS config built"
    );

    Ok(tls_cfg)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certs from '{path}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in '{path}'")));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports RSA (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`), and EC keys.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains no private key, or
/// the key format is unsupported.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| Error::Tls(format!("Failed to parse private key from '{path}': {e}")))?
        .ok_or_else(|| Error::Tls(format!("No private key found in '{path}'")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: certificate generation (CLI helpers)
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for generating a CA certificate.
#[derive(Debug)]
pub struct CaParams<'a> {
    /// Common Name for the root CA (e.g. `"certgate Root CA"`).
    pub cn: &'a str,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Which side of the handshake a leaf certificate is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUsage {
    /// TLS server (`serverAuth`).
    Server,
    /// mTLS client (`clientAuth`).
    Client,
}

/// Parameters for generating a leaf certificate (server or client).
#[derive(Debug)]
pub struct LeafCertParams<'a> {
    /// Common Name; for clients this becomes the caller identity.
    pub cn: &'a str,
    /// Organisation (optional), included in the subject DN.
    pub org: Option<&'a str>,
    /// Subject Alternative Names: DNS entries.
    pub san_dns: Vec<String>,
    /// Server or client certificate.
    pub usage: LeafUsage,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Generated certificate and key pair in PEM format.
#[derive(Debug)]
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// Certificate generator backed by `rcgen`.
///
/// Lets an operator bootstrap a private CA plus server/client leaves without
/// `openssl`.
pub struct CertGenerator;

impl CertGenerator {
    /// Generate a self-signed CA certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or certificate serialisation fails.
    pub fn init_ca(params: &CaParams<'_>) -> Result<GeneratedCert> {
        let key = KeyPair::generate().map_err(tls_err("generate CA key"))?;

        let mut cert_params = base_params(params.cn, None, params.validity_days)?;
        cert_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let cert = cert_params
            .self_signed(&key)
            .map_err(tls_err("self-sign CA certificate"))?;
        Ok(GeneratedCert::new(&cert, &key))
    }

    /// Issue a leaf certificate signed by `ca_cert_pem` / `ca_key_pem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA cert/key cannot be parsed, a SAN is not
    /// IA5, key generation fails, or certificate serialisation fails.
    pub fn issue_leaf(
        params: &LeafCertParams<'_>,
        ca_cert_pem: &str,
        ca_key_pem: &str,
    ) -> Result<GeneratedCert> {
        let (issuer, issuer_key) = load_issuer(ca_cert_pem, ca_key_pem)?;

        let mut cert_params = base_params(params.cn, params.org, params.validity_days)?;
        cert_params.extended_key_usages = vec![match params.usage {
            LeafUsage::Server => ExtendedKeyUsagePurpose::ServerAuth,
            LeafUsage::Client => ExtendedKeyUsagePurpose::ClientAuth,
        }];
        cert_params.subject_alt_names = params
            .san_dns
            .iter()
            .map(|dns| {
                Ia5String::try_from(dns.as_str())
                    .map(SanType::DnsName)
                    .map_err(|e| Error::Tls(format!("Invalid DNS SAN '{dns}': {e}")))
            })
            .collect::<Result<_>>()?;

        let key = KeyPair::generate().map_err(tls_err("generate leaf key"))?;
        let cert = cert_params
            .signed_by(&key, &issuer, &issuer_key)
            .map_err(tls_err("sign leaf certificate"))?;
        Ok(GeneratedCert::new(&cert, &key))
    }

    /// Write a [`GeneratedCert`] to `<dir>/<stem>.crt` and `<dir>/<stem>.key`.
    ///
    /// The key file is written owner-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the files
    /// cannot be written.
    pub fn write_to_dir(cert: &GeneratedCert, dir: &Path, stem: &str) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(format!("{stem}.crt")), &cert.cert_pem)?;
        crate::secrets::write_private(&dir.join(format!("{stem}.key")), cert.key_pem.as_bytes())
    }
}

impl GeneratedCert {
    fn new(cert: &rcgen::Certificate, key: &KeyPair) -> Self {
        Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        }
    }
}

/// Subject DN (CN, optional O) and `notAfter` shared by CA and leaf certs.
fn base_params(cn: &str, org: Option<&str>, validity_days: u32) -> Result<CertificateParams> {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    if let Some(org) = org {
        dn.push(DnType::OrganizationName, org);
    }

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.not_after = validity_to_date(validity_days)?;
    Ok(params)
}

/// Rebuild the CA certificate from PEM so `rcgen` can sign with it.
fn load_issuer(ca_cert_pem: &str, ca_key_pem: &str) -> Result<(rcgen::Certificate, KeyPair)> {
    let key = KeyPair::from_pem(ca_key_pem).map_err(tls_err("parse CA key"))?;
    let cert = CertificateParams::from_ca_cert_pem(ca_cert_pem)
        .map_err(tls_err("parse CA certificate"))?
        .self_signed(&key)
        .map_err(tls_err("rebuild CA certificate"))?;
    Ok((cert, key))
}

fn tls_err(action: &'static str) -> impl FnOnce(rcgen::Error) -> Error {
    move |e| Error::Tls(format!("Failed to {action}: {e}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Tls(format!("Cannot read '{path}': {e}")))
}

/// Build a `WebPkiClientVerifier` with optional CRL support.
fn build_client_verifier(
    config: &TlsConfig,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    let mut root_store = rustls::RootCertStore::empty();
    for cert in load_certs(&config.ca_cert)? {
        root_store
            .add(cert)
            .map_err(|e| Error::Tls(format!("Failed to add CA cert to trust store: {e}")))?;
    }

    let builder = WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider);

    let builder = if let Some(ref crl_path) = config.crl_path {
        builder.with_crls(load_crls(crl_path)?)
    } else {
        builder
    };

    let builder = if config.require_client_cert {
        builder
    } else {
        builder.allow_unauthenticated()
    };

    builder
        .build()
        .map_err(|e| Error::Tls(format!("Failed to build client verifier: {e}")))
}

/// Load CRL entries from a PEM file.
fn load_crls(path: &str) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::crls(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse CRL from '{path}': {e}")))
}

/// Convert a validity period (days) into a future date for `rcgen`.
fn validity_to_date(days: u32) -> Result<time::OffsetDateTime> {
    let future = chrono::TimeDelta::try_days(i64::from(days))
        .and_then(|validity| chrono::Utc::now().checked_add_signed(validity))
        .ok_or_else(|| Error::Tls(format!("Validity of {days} days is out of range")))?;
    let dt = time::OffsetDateTime::from_unix_timestamp(future.timestamp())
        .map_err(|e| Error::Tls(format!("Date calculation error: {e}")))?;

    Ok(date_time_ymd(dt.year(), dt.month() as u8, dt.day()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
