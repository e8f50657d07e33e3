//! Event-loop primitives consumed by the cache.
//!
//! The cache runs single-threaded and reacts to callbacks. It needs exactly
//! two things from the surrounding loop: a way to run work on a *later*
//! turn, so completion handling never mutates cache state a caller further
//! up the stack may still be iterating, and single-shot timers for idle
//! eviction. [`TokioScheduler`] supplies both on a tokio current-thread
//! runtime.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

/// Identifies an armed timer for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) u64);

/// Deferred-invocation and single-shot-timer primitives supplied by the
/// surrounding event loop.
///
/// Implementations must never run `task` or `on_fire` reentrantly from the
/// call that scheduled them.
pub trait Scheduler {
    /// Runs `task` on a later loop turn.
    fn defer(&self, task: Box<dyn FnOnce()>);

    /// Arms a single-shot timer that runs `on_fire` once `after` has
    /// elapsed.
    fn start_timer(&self, after: Duration, on_fire: Box<dyn FnOnce()>) -> TimerHandle;

    /// Cancels an armed timer. A no-op if the timer already fired.
    fn cancel_timer(&self, timer: TimerHandle);
}

/// [`Scheduler`] backed by a tokio current-thread runtime.
///
/// Deferred tasks and timers are spawned onto the thread-local task set, so
/// the cache must be driven from inside a [`tokio::task::LocalSet`]. Clones
/// share one timer table.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    timers: Rc<RefCell<TimerTable>>,
}

#[derive(Default)]
struct TimerTable {
    next_id: u64,
    armed: HashMap<u64, tokio::task::AbortHandle>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move { task() });
    }

    fn start_timer(&self, after: Duration, on_fire: Box<dyn FnOnce()>) -> TimerHandle {
        let mut timers = self.timers.borrow_mut();
        let id = timers.next_id;
        timers.next_id += 1;
        let table = Rc::clone(&self.timers);
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(after).await;
            // Deregister before firing so a late cancel_timer is a no-op.
            table.borrow_mut().armed.remove(&id);
            on_fire();
        });
        timers.armed.insert(id, task.abort_handle());
        TimerHandle(id)
    }

    fn cancel_timer(&self, timer: TimerHandle) {
        if let Some(handle) = self.timers.borrow_mut().armed.remove(&timer.0) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    async fn yield_turns(n: usize) {
        for _ in 0..n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_defer_runs_on_a_later_turn() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = TokioScheduler::new();
                let ran = Rc::new(Cell::new(false));
                let flag = Rc::clone(&ran);
                scheduler.defer(Box::new(move || flag.set(true)));
                // Never reentrant from the scheduling call.
                assert!(!ran.get());
                yield_turns(2).await;
                assert!(ran.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_duration() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = TokioScheduler::new();
                let fired = Rc::new(Cell::new(false));
                let flag = Rc::clone(&fired);
                scheduler.start_timer(Duration::from_secs(3), Box::new(move || flag.set(true)));
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert!(!fired.get());
                tokio::time::sleep(Duration::from_secs(3)).await;
                assert!(fired.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = TokioScheduler::new();
                let fired = Rc::new(Cell::new(false));
                let flag = Rc::clone(&fired);
                let timer = scheduler
                    .start_timer(Duration::from_secs(1), Box::new(move || flag.set(true)));
                scheduler.cancel_timer(timer);
                tokio::time::sleep(Duration::from_secs(2)).await;
                assert!(!fired.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_a_noop() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = TokioScheduler::new();
                let fired = Rc::new(Cell::new(0u32));
                let counter = Rc::clone(&fired);
                let timer = scheduler
                    .start_timer(Duration::from_secs(1), Box::new(move || counter.set(counter.get() + 1)));
                tokio::time::sleep(Duration::from_secs(2)).await;
                assert_eq!(fired.get(), 1);
                scheduler.cancel_timer(timer);
                assert_eq!(fired.get(), 1);
            })
            .await;
    }
}
