//! Transport capability and pooled socket handles.
//!
//! The cache needs exactly three operations from a socket: open, a liveness
//! check, and close. [`Transport`] captures those together with stream
//! access for jobs; [`plain`] and [`secured`] provide the two concrete
//! kinds. Every other part of the cache (admission, queueing, eviction) is
//! transport-agnostic and never branches on the concrete kind.

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::io::{Read, Write};
use std::rc::Rc;

pub mod plain;
pub mod secured;

/// The transport kinds the cache knows how to pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Plain,
    Secured,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Plain => f.write_str("plain"),
            TransportKind::Secured => f.write_str("secured"),
        }
    }
}

/// Byte stream a job performs its I/O on once a transport is dispatched to
/// it.
pub trait StreamSocket: Read + Write {}

impl StreamSocket for std::net::TcpStream {}
impl StreamSocket for boring::ssl::SslStream<std::net::TcpStream> {}

/// Capability a pooled socket must provide.
///
/// `is_live` means "connected" for a plain stream and "handshake
/// established" for a secured stream. The checks differ per kind but share
/// this contract, so the cache never has to ask which kind it is holding.
pub trait Transport {
    fn kind(&self) -> TransportKind;

    /// Whether the transport can still carry a job.
    fn is_live(&self) -> bool;

    /// Releases the underlying socket. Idempotent; `is_live` reports false
    /// afterwards.
    fn close(&mut self);

    /// The byte stream handed to jobs, or `None` once closed.
    fn stream(&mut self) -> Option<&mut dyn StreamSocket>;
}

/// A transport owned by the cache.
///
/// Handle identity (`Rc::ptr_eq`) is how a completion notification resolves
/// which connection it belongs to: a handle identifies at most one live
/// connection at a time.
pub struct PooledSocket {
    transport: RefCell<Box<dyn Transport>>,
}

/// Shared handle to a pooled socket, given to jobs exactly once.
pub type SocketHandle = Rc<PooledSocket>;

impl PooledSocket {
    pub(crate) fn new(transport: Box<dyn Transport>) -> SocketHandle {
        Rc::new(PooledSocket {
            transport: RefCell::new(transport),
        })
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.borrow().kind()
    }

    pub fn is_live(&self) -> bool {
        self.transport.borrow().is_live()
    }

    pub(crate) fn close(&self) {
        self.transport.borrow_mut().close();
    }

    /// Borrows the transport for I/O. A job must not hold this borrow after
    /// signalling completion; the cache borrows the transport itself when it
    /// reacts to the notification.
    pub fn transport(&self) -> RefMut<'_, Box<dyn Transport>> {
        self.transport.borrow_mut()
    }
}

impl fmt::Debug for PooledSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSocket")
            .field("kind", &self.kind())
            .field("live", &self.is_live())
            .finish()
    }
}
