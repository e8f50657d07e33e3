use thiserror::Error;

/// Error codes surfaced to jobs by the connection cache.
///
/// A failure that concerns a single job (an open failure during acquire) is
/// delivered to that job only. A failed reconnection concerns a connection's
/// whole backlog and is delivered to every job queued on it, in FIFO order.
/// No error here ever terminates the process; at worst the cache degrades to
/// having no cached connection for a destination.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CacheError {
    /// The connector could not produce a transport handle.
    #[error("Failed to open connection")]
    OpenFailed,
    /// The socket backing a dispatched job is no longer connected.
    #[error("Socket not connected")]
    SocketNotConnected,
    /// The cache was shut down; no new work is accepted.
    #[error("Connection cache shut down")]
    ShutDown,
}
