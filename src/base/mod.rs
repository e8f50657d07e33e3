//! Base types and error handling.
//!
//! Provides the error codes the cache hands to jobs:
//! - [`error::CacheError`]: open failures, dead sockets, shutdown

pub mod error;
