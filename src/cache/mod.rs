//! Connection reuse and lifecycle management.
//!
//! - [`key`]: destination keys (host, port)
//! - [`pool`]: the connection cache (admission, dispatch, reconnection,
//!   idle eviction)

pub mod key;
pub mod pool;
