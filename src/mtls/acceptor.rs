//! TLS acceptor that exposes the verified peer chain to request handlers.
//!
//! `axum-server`'s [`RustlsAcceptor`] finishes the handshake but keeps the
//! session to itself. [`PeerCertAcceptor`] wraps it and layers every
//! connection's service with an `Extension(PeerCertificates)`, so the auth
//! middleware can read the client certificate from the request without any
//! connection-level state of its own.

use std::io;

use axum::{Extension, middleware::AddExtension};
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tower::Layer;
use tracing::trace;

use super::identity::PeerCertificates;

/// Rustls acceptor that attaches [`PeerCertificates`] to every request.
#[derive(Debug, Clone)]
pub struct PeerCertAcceptor {
    inner: RustlsAcceptor,
}

impl PeerCertAcceptor {
    /// Wrap a rustls server configuration.
    #[must_use]
    pub fn new(config: RustlsConfig) -> Self {
        Self {
            inner: RustlsAcceptor::new(config),
        }
    }
}

impl<I, S> Accept<I, S> for PeerCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, PeerCertificates>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();

        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let (_, session) = stream.get_ref();

            let peer = session
                .peer_certificates()
                .map(|chain| PeerCertificates::new(chain.to_vec()))
                .unwrap_or_default();
            trace!(client_cert = !peer.is_empty(), "TLS handshake complete");

            Ok((stream, Extension(peer).layer(service)))
        })
    }
}
