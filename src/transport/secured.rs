//! TLS transport over BoringSSL.

use std::net::TcpStream;

use boring::ssl::{SslConnector, SslMethod, SslStream};

use crate::base::error::CacheError;
use crate::cache::key::ConnectionKey;

use super::{StreamSocket, Transport, TransportKind};

/// A pooled TLS stream with a completed handshake.
pub struct SecuredTransport {
    stream: Option<SslStream<TcpStream>>,
}

impl SecuredTransport {
    pub fn new(stream: SslStream<TcpStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

/// Opens a secured transport: TCP connect followed by a BoringSSL handshake
/// against the key's host. Usable directly as the `open_socket` argument to
/// [`ConnectionCache::acquire`](crate::cache::pool::ConnectionCache::acquire).
pub fn open(key: &ConnectionKey) -> Result<Box<dyn Transport>, CacheError> {
    let tcp = TcpStream::connect((key.host.as_str(), key.port)).map_err(|e| {
        tracing::debug!(host = %key.host, port = key.port, error = %e, "TCP connect failed");
        CacheError::OpenFailed
    })?;
    let connector = SslConnector::builder(SslMethod::tls())
        .map_err(|e| {
            tracing::debug!(error = %e, "SSL connector setup failed");
            CacheError::OpenFailed
        })?
        .build();
    let stream = connector.connect(&key.host, tcp).map_err(|e| {
        tracing::debug!(host = %key.host, port = key.port, error = %e, "SSL handshake failed");
        CacheError::OpenFailed
    })?;
    Ok(Box::new(SecuredTransport::new(stream)))
}

impl Transport for SecuredTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Secured
    }

    /// Liveness for a secured stream means the handshake is established and
    /// the stream underneath it is still connected.
    fn is_live(&self) -> bool {
        self.stream.as_ref().map_or(false, |stream| {
            stream.ssl().is_init_finished() && stream.get_ref().peer_addr().is_ok()
        })
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
    }

    fn stream(&mut self) -> Option<&mut dyn StreamSocket> {
        self.stream
            .as_mut()
            .map(|stream| stream as &mut dyn StreamSocket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_transport_is_dead() {
        let mut transport = SecuredTransport { stream: None };
        assert!(!transport.is_live());
        assert!(transport.stream().is_none());
        transport.close();
        assert_eq!(transport.kind(), TransportKind::Secured);
    }
}
