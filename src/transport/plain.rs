//! Plain TCP transport.

use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream};

use crate::base::error::CacheError;
use crate::cache::key::ConnectionKey;

use super::{StreamSocket, Transport, TransportKind};

/// A pooled plain TCP stream.
pub struct PlainTransport {
    stream: Option<TcpStream>,
}

impl PlainTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

/// Opens a plain TCP transport to the key's destination. Usable directly as
/// the `open_socket` argument to
/// [`ConnectionCache::acquire`](crate::cache::pool::ConnectionCache::acquire).
pub fn open(key: &ConnectionKey) -> Result<Box<dyn Transport>, CacheError> {
    let stream = TcpStream::connect((key.host.as_str(), key.port)).map_err(|e| {
        tracing::debug!(host = %key.host, port = key.port, error = %e, "TCP connect failed");
        CacheError::OpenFailed
    })?;
    Ok(Box::new(PlainTransport::new(stream)))
}

/// Lightweight connectedness test: peer_addr() fails once the socket is
/// disconnected, and a non-blocking peek catches a FIN or RST the peer
/// already sent.
fn check_connected(stream: &TcpStream) -> bool {
    if stream.peer_addr().is_err() {
        return false;
    }
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut buf = [0u8; 1];
    let live = match stream.peek(&mut buf) {
        Ok(0) => false, // EOF - connection closed
        Ok(_) => true,  // Data available, still connected
        Err(ref e) if e.kind() == ErrorKind::WouldBlock => true, // No data, but connected
        Err(_) => false,
    };
    let _ = stream.set_nonblocking(false);
    live
}

impl Transport for PlainTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Plain
    }

    fn is_live(&self) -> bool {
        self.stream.as_ref().map_or(false, check_connected)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
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
    use std::io::Write;
    use std::net::TcpListener;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_live_while_peer_holds_socket() {
        let (client, server) = loopback_pair();
        let transport = PlainTransport::new(client);
        assert!(transport.is_live());
        drop(server);
    }

    #[test]
    fn test_dead_after_peer_close() {
        let (client, server) = loopback_pair();
        let transport = PlainTransport::new(client);
        drop(server);
        // The FIN may take a moment to land on loopback.
        let mut live = transport.is_live();
        for _ in 0..50 {
            if !live {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            live = transport.is_live();
        }
        assert!(!live);
    }

    #[test]
    fn test_dead_after_close() {
        let (client, _server) = loopback_pair();
        let mut transport = PlainTransport::new(client);
        transport.close();
        assert!(!transport.is_live());
        assert!(transport.stream().is_none());
    }

    #[test]
    fn test_live_with_unread_data_pending() {
        let (client, mut server) = loopback_pair();
        server.write_all(b"x").unwrap();
        let transport = PlainTransport::new(client);
        let mut live = transport.is_live();
        for _ in 0..50 {
            if live {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            live = transport.is_live();
        }
        assert!(live);
    }

    #[test]
    fn test_open_refused_maps_to_open_failed() {
        // Bind then drop to find a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let key = ConnectionKey::new("127.0.0.1", port);
        assert_eq!(open(&key).err(), Some(CacheError::OpenFailed));
    }
}
