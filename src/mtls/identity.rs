//! Certificate identity extraction.
//!
//! Turns the verified peer chain handed over by the TLS layer into a
//! [`CallerIdentity`]. The leaf is always the first entry of the chain.
//!
//! # No unsafe
//!
//! `x509-parser` performs minimal `unsafe` internally for ASN.1 parsing;
//! this module itself contains no `unsafe` code and simply calls the safe
//! public API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::pki_types::CertificateDer;
use tracing::warn;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::identity::CallerIdentity;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Peer chain carrier
// ─────────────────────────────────────────────────────────────────────────────

/// Verified peer certificate chain of the connection a request arrived on.
///
/// Inserted into request extensions by
/// [`PeerCertAcceptor`](crate::mtls::PeerCertAcceptor); empty when the client
/// did not present a certificate.
#[derive(Debug, Clone, Default)]
pub struct PeerCertificates(Arc<Vec<CertificateDer<'static>>>);

impl PeerCertificates {
    /// Wrap an already-verified chain (leaf first).
    #[must_use]
    pub fn new(chain: Vec<CertificateDer<'static>>) -> Self {
        Self(Arc::new(chain))
    }

    /// The leaf certificate, if any.
    #[must_use]
    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.0.first()
    }

    /// `true` if no certificate was presented.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Derive the caller identity from a verified peer chain.
///
/// Returns `None` when no certificate is present; that is the normal case for
/// bearer-token clients, not an error. A leaf that fails to parse is also
/// treated as absent (it has already been verified by rustls, so this only
/// happens with exotic encodings) and logged.
#[must_use]
pub fn from_peer_certificates(peer: Option<&PeerCertificates>) -> Option<CallerIdentity> {
    let leaf = peer?.leaf()?;
    match from_der(leaf.as_ref()) {
        Ok(identity) => Some(identity),
        Err(e) => {
            warn!(error = %e, "Verified peer certificate could not be parsed");
            None
        }
    }
}

/// Parse a DER-encoded certificate into a certificate identity.
///
/// The DN is rendered in `x509-parser`'s RFC 4514 style (`CN=alice, O=Org`),
/// the serial in decimal.
///
/// # Errors
///
/// Returns `Error::Tls` if the certificate cannot be parsed or its `notAfter`
/// is out of range.
pub fn from_der(der: &[u8]) -> Result<CallerIdentity> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::Tls(format!("Failed to parse client certificate: {e}")))?;

    let common_name = extract_cn(&cert).unwrap_or_default();
    let distinguished_name = cert.subject().to_string();
    let serial = cert.serial.to_string();
    let not_after = not_after(&cert)?;

    Ok(CallerIdentity::from_certificate(
        common_name,
        distinguished_name,
        serial,
        not_after,
    ))
}

/// Extract the CN attribute from the subject DN.
fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn not_after(cert: &X509Certificate<'_>) -> Result<DateTime<Utc>> {
    let ts = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| Error::Tls(format!("Certificate notAfter out of range: {ts}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
