//! # conncache
//!
//! A destination-keyed connection-reuse pool for outbound client requests.
//!
//! For each outbound request the cache decides whether to hand out an
//! existing live connection, open a new one, or queue the request on a busy
//! connection, and it reclaims idle connections after a timeout. A socket
//! found dead while jobs are still queued is replaced in place without
//! losing or reordering the queue.
//!
//! ## Features
//!
//! - **Per-destination admission bound**: at most 4 connections per
//!   (host, port) key by default
//! - **FIFO per-connection queues**: backlog is spread onto the least-loaded
//!   connection of a destination
//! - **Idle eviction**: a single-shot timer per connection, with removal
//!   deferred to a later event-loop turn
//! - **Transparent reconnection**: dead sockets are reopened in place with
//!   their queue intact
//! - **Transport polymorphism**: plain TCP and BoringSSL-secured streams
//!   behind one capability trait
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conncache::cache::key::ConnectionKey;
//! use conncache::cache::pool::{CacheConfig, ConnectionCache};
//! use conncache::scheduler::TokioScheduler;
//! use conncache::transport::plain;
//!
//! let cache = ConnectionCache::new(CacheConfig::default(), TokioScheduler::new());
//! let key = ConnectionKey::new("example.com", 80);
//! let open = {
//!     let key = key.clone();
//!     Box::new(move || plain::open(&key))
//! };
//! cache.acquire(
//!     key,
//!     Box::new(|socket| {
//!         // issue the request, then call cache.release(&socket)
//!     }),
//!     open,
//! );
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes
//! - [`cache`] - Destination keys and the connection cache itself
//! - [`scheduler`] - Event-loop timer and deferred-task primitives
//! - [`transport`] - Transport capability and the two concrete kinds
//!
//! ## Threading
//!
//! The cache is single-threaded by design: it lives on one event-loop
//! thread, shares state through `Rc`, and is not `Send`. Socket completions
//! and timers reach it as callbacks, never as blocking calls, so no locking
//! is involved anywhere.

pub mod base;
pub mod cache;
pub mod scheduler;
pub mod transport;
