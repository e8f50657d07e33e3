//! The connection cache: admission, dispatch, reconnection, idle eviction.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::base::error::CacheError;
use crate::cache::key::ConnectionKey;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::transport::{PooledSocket, SocketHandle, Transport};

/// A unit of work that is handed a live socket handle exactly once, or an
/// error if no socket could be provided. Once accepted into a queue a job is
/// never dropped silently: it is eventually dispatched or explicitly failed.
pub type Job = Box<dyn FnOnce(Result<SocketHandle, CacheError>)>;

/// Opens a transport for a destination.
///
/// Stored on the connection it creates (and refreshed by later acquires that
/// touch the connection) so a socket found dead with jobs still queued can
/// be reopened in place. Connectors must not call back into the cache.
pub type Connector = Box<dyn FnMut() -> Result<Box<dyn Transport>, CacheError>>;

/// Cache tunables. Neither value is a compatibility contract.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Connections the cache may hold per destination key. At least 1.
    pub max_connections_per_key: usize,
    /// How long an idle connection survives before eviction.
    pub idle_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_connections_per_key: 4,
            idle_timeout: Duration::from_secs(5),
        }
    }
}

/// One pooled socket plus its pending-job queue and idle state.
struct Connection {
    /// Stable identifier; timer and deferred callbacks carry this instead of
    /// an index into the (reallocating, reordering) entry Vec.
    id: u64,
    socket: SocketHandle,
    queue: VecDeque<Job>,
    /// True exactly while a job is bound to the socket.
    active: bool,
    eviction_timer: Option<TimerHandle>,
    /// Bumped on every idle -> active transition; a deferred eviction that
    /// carries a stale epoch knows the idle period it was armed for ended.
    idle_epoch: u64,
    connector: Connector,
}

struct CacheState {
    /// Entry Vecs are in connection creation order.
    entries: HashMap<ConnectionKey, Vec<Connection>>,
    next_connection_id: u64,
    shut_down: bool,
}

struct CacheInner {
    config: CacheConfig,
    scheduler: Box<dyn Scheduler>,
    state: RefCell<CacheState>,
}

/// What release decided to do once the cache borrow is dropped.
enum Followup {
    Done,
    Dispatch(Job, SocketHandle),
    Reopen(Connector, ConnectionKey, u64),
}

/// Destination-keyed cache of reusable client connections.
///
/// `acquire` hands a job a live socket: an idle connection is reused, a new
/// one is opened while the per-key bound allows, and beyond that the job
/// queues on the least-loaded connection for its key. `release` is the
/// completion notification that drains the next queued job or, with nothing
/// queued, arms the idle-eviction timer.
///
/// The cache runs entirely on one event-loop thread and is not `Send`.
/// Cloning is cheap; clones share the same cache. Jobs may call back into
/// the cache from inside their callback: the cache never holds its internal
/// borrow while a job runs.
#[derive(Clone)]
pub struct ConnectionCache {
    inner: Rc<CacheInner>,
}

impl ConnectionCache {
    pub fn new(config: CacheConfig, scheduler: impl Scheduler + 'static) -> Self {
        debug_assert!(config.max_connections_per_key > 0);
        Self {
            inner: Rc::new(CacheInner {
                config,
                scheduler: Box::new(scheduler),
                state: RefCell::new(CacheState {
                    entries: HashMap::new(),
                    next_connection_id: 0,
                    shut_down: false,
                }),
            }),
        }
    }

    /// Hands `job` a live socket for `key`.
    ///
    /// An idle connection is reused immediately (its eviction timer is
    /// cancelled first). Below the per-key bound a new connection is opened
    /// via `open_socket`; if that fails the job is failed immediately with
    /// [`CacheError::OpenFailed`] and no connection entry is created. At the
    /// bound the job is appended to the shortest queue, ties going to the
    /// earliest-created connection.
    ///
    /// Jobs queued on one connection dispatch strictly FIFO; connections for
    /// the same key progress independently of each other.
    pub fn acquire(&self, key: ConnectionKey, job: Job, mut open_socket: Connector) {
        let shut_down = self.inner.state.borrow().shut_down;
        if shut_down {
            tracing::debug!(host = %key.host, port = key.port, "acquire on a shut-down cache");
            job(Err(CacheError::ShutDown));
            return;
        }

        let mut state = self.inner.state.borrow_mut();

        // Idle connection for this key: reuse it.
        if let Some(conn) = state
            .entries
            .get_mut(&key)
            .into_iter()
            .flatten()
            .find(|conn| !conn.active && conn.queue.is_empty())
        {
            if let Some(timer) = conn.eviction_timer.take() {
                self.inner.scheduler.cancel_timer(timer);
            }
            conn.active = true;
            conn.idle_epoch += 1;
            conn.connector = open_socket;
            let socket = Rc::clone(&conn.socket);
            let id = conn.id;
            drop(state);
            tracing::debug!(host = %key.host, port = key.port, id, "reusing idle connection");
            job(Ok(socket));
            return;
        }

        // Below the bound: open a fresh connection for this job.
        let count = state.entries.get(&key).map_or(0, Vec::len);
        if count < self.inner.config.max_connections_per_key {
            drop(state);
            let transport = match open_socket() {
                Ok(transport) => transport,
                Err(error) => {
                    tracing::warn!(
                        host = %key.host,
                        port = key.port,
                        error = %error,
                        "failed to open connection"
                    );
                    job(Err(error));
                    return;
                }
            };
            let socket = PooledSocket::new(transport);
            let mut state = self.inner.state.borrow_mut();
            let id = state.next_connection_id;
            state.next_connection_id += 1;
            state.entries.entry(key.clone()).or_default().push(Connection {
                id,
                socket: Rc::clone(&socket),
                queue: VecDeque::new(),
                active: true,
                eviction_timer: None,
                idle_epoch: 0,
                connector: open_socket,
            });
            drop(state);
            tracing::debug!(host = %key.host, port = key.port, id, "opened new connection");
            job(Ok(socket));
            return;
        }

        // At the bound: queue on the least-loaded connection for the key.
        // min_by_key keeps the first minimum, so ties go to the
        // earliest-created connection.
        let conn = state
            .entries
            .get_mut(&key)
            .and_then(|entry| entry.iter_mut().min_by_key(|conn| conn.queue.len()))
            .expect("a full cache entry holds at least one connection");
        conn.queue.push_back(job);
        conn.connector = open_socket;
        tracing::debug!(
            host = %key.host,
            port = key.port,
            id = conn.id,
            depth = conn.queue.len(),
            "queued job on busy connection"
        );
    }

    /// Completion notification: the job dispatched on `socket` has finished
    /// with it (the socket stays open for reuse).
    ///
    /// With jobs still queued on the owning connection, the next one is
    /// dispatched; if the socket died in the meantime a replacement is
    /// opened in place first, and if that replacement cannot be opened every
    /// queued job is failed in FIFO order and the connection is removed.
    /// With an empty queue the connection goes idle and its eviction timer
    /// is armed. A handle the cache does not own is logged and ignored; it
    /// may belong to an already-evicted connection or to a socket outside
    /// the cache entirely.
    pub fn release(&self, socket: &SocketHandle) {
        let followup = {
            let mut state = self.inner.state.borrow_mut();
            let Some((key, index)) = Self::find_connection(&state, socket) else {
                drop(state);
                tracing::debug!(
                    kind = %socket.kind(),
                    "release for a socket this cache does not own"
                );
                return;
            };
            let entry = state.entries.get_mut(&key).expect("resolved key is present");
            let conn = &mut entry[index];

            if conn.queue.is_empty() {
                conn.active = false;
                if let Some(stale) = conn.eviction_timer.take() {
                    self.inner.scheduler.cancel_timer(stale);
                }
                let timer =
                    Self::arm_eviction_timer(&self.inner, key.clone(), conn.id, conn.idle_epoch);
                conn.eviction_timer = Some(timer);
                tracing::debug!(
                    host = %key.host,
                    port = key.port,
                    id = conn.id,
                    "connection idle, eviction timer armed"
                );
                Followup::Done
            } else if conn.socket.is_live() {
                let job = conn.queue.pop_front().expect("queue checked non-empty");
                tracing::debug!(
                    host = %key.host,
                    port = key.port,
                    id = conn.id,
                    "dispatching next queued job"
                );
                Followup::Dispatch(job, Rc::clone(&conn.socket))
            } else {
                tracing::debug!(
                    host = %key.host,
                    port = key.port,
                    id = conn.id,
                    "socket died with jobs queued, opening a replacement"
                );
                // The connector runs outside the cache borrow; park a
                // connector that fails in its place until it is restored.
                let connector = std::mem::replace(
                    &mut conn.connector,
                    Box::new(|| Err(CacheError::OpenFailed)),
                );
                Followup::Reopen(connector, key, conn.id)
            }
        };

        match followup {
            Followup::Done => {}
            Followup::Dispatch(job, socket) => job(Ok(socket)),
            Followup::Reopen(mut connector, key, id) => {
                let opened = connector();
                self.finish_reopen(key, id, connector, opened);
            }
        }
    }

    /// Closes every socket, cancels every timer, and fails all queued jobs
    /// with [`CacheError::ShutDown`]. Further `acquire` calls fail their job
    /// the same way.
    pub fn shutdown(&self) {
        let entries = {
            let mut state = self.inner.state.borrow_mut();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            std::mem::take(&mut state.entries)
        };
        let mut failed = 0usize;
        for (_, entry) in entries {
            for conn in entry {
                if let Some(timer) = conn.eviction_timer {
                    self.inner.scheduler.cancel_timer(timer);
                }
                conn.socket.close();
                failed += conn.queue.len();
                for job in conn.queue {
                    job(Err(CacheError::ShutDown));
                }
            }
        }
        tracing::debug!(failed_jobs = failed, "connection cache shut down");
    }

    /// Number of connections currently cached for `key`.
    pub fn connection_count(&self, key: &ConnectionKey) -> usize {
        self.inner
            .state
            .borrow()
            .entries
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Jobs waiting in queues across all connections for `key`.
    pub fn queued_job_count(&self, key: &ConnectionKey) -> usize {
        self.inner
            .state
            .borrow()
            .entries
            .get(key)
            .map_or(0, |entry| entry.iter().map(|conn| conn.queue.len()).sum())
    }

    /// Idle connections across all keys.
    pub fn idle_connection_count(&self) -> usize {
        self.inner
            .state
            .borrow()
            .entries
            .values()
            .flatten()
            .filter(|conn| !conn.active && conn.queue.is_empty())
            .count()
    }

    fn find_connection(
        state: &CacheState,
        socket: &SocketHandle,
    ) -> Option<(ConnectionKey, usize)> {
        for (key, entry) in &state.entries {
            if let Some(index) = entry
                .iter()
                .position(|conn| Rc::ptr_eq(&conn.socket, socket))
            {
                return Some((key.clone(), index));
            }
        }
        None
    }

    /// Second half of the dead-socket path: the connector already ran with
    /// the cache borrow released.
    fn finish_reopen(
        &self,
        key: ConnectionKey,
        id: u64,
        connector: Connector,
        opened: Result<Box<dyn Transport>, CacheError>,
    ) {
        let mut state = self.inner.state.borrow_mut();
        let Some(entry) = state.entries.get_mut(&key) else {
            return;
        };
        let Some(index) = entry.iter().position(|conn| conn.id == id) else {
            return;
        };

        match opened {
            Ok(transport) => {
                // Same connection slot, same queue, queue order unchanged.
                let conn = &mut entry[index];
                conn.connector = connector;
                conn.socket = PooledSocket::new(transport);
                let job = conn
                    .queue
                    .pop_front()
                    .expect("reopen only happens with jobs queued");
                let socket = Rc::clone(&conn.socket);
                drop(state);
                tracing::debug!(
                    host = %key.host,
                    port = key.port,
                    id,
                    "replacement socket opened, dispatching next queued job"
                );
                job(Ok(socket));
            }
            Err(error) => {
                let conn = entry.remove(index);
                if entry.is_empty() {
                    state.entries.remove(&key);
                }
                drop(state);
                conn.socket.close();
                tracing::warn!(
                    host = %key.host,
                    port = key.port,
                    id,
                    error = %error,
                    jobs = conn.queue.len(),
                    "replacement open failed, failing queued jobs"
                );
                for job in conn.queue {
                    job(Err(error));
                }
            }
        }
    }

    fn arm_eviction_timer(
        inner: &Rc<CacheInner>,
        key: ConnectionKey,
        id: u64,
        epoch: u64,
    ) -> TimerHandle {
        let weak = Rc::downgrade(inner);
        inner.scheduler.start_timer(
            inner.config.idle_timeout,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                // Removal runs as a deferred task, never inline from the
                // timer callback: a caller further up the stack may still be
                // iterating the entry table.
                let weak = Rc::downgrade(&inner);
                inner.scheduler.defer(Box::new(move || {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    Self::evict_if_still_idle(&inner, &key, id, epoch);
                }));
            }),
        )
    }

    fn evict_if_still_idle(inner: &Rc<CacheInner>, key: &ConnectionKey, id: u64, epoch: u64) {
        let mut state = inner.state.borrow_mut();
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        let Some(index) = entry.iter().position(|conn| conn.id == id) else {
            return;
        };
        let conn = &entry[index];
        // A job may have been admitted (and even finished) since the timer
        // was armed; only evict if this exact idle period is still running.
        if conn.active || !conn.queue.is_empty() || conn.idle_epoch != epoch {
            return;
        }
        let conn = entry.remove(index);
        if entry.is_empty() {
            state.entries.remove(key);
        }
        drop(state);
        conn.socket.close();
        tracing::debug!(host = %key.host, port = key.port, id, "evicted idle connection");
    }
}
