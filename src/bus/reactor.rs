//! Reactor threads.
//!
//! A reactor is an OS thread driving a tokio current-thread runtime. Work
//! spawned onto a reactor never leaves it, and tasks on one reactor never
//! run in parallel with each other.
//!
//! Each reactor thread is tagged through a thread-local so code can ask
//! whether it is running on one ([`is_reactor_thread`]). Blocking a reactor
//! while waiting for a reply would stall the very loop that has to deliver
//! that reply, so synchronous calls check this first.

use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

use crate::error::Result;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<Option<ReactorTag>> = const { Cell::new(None) };
}

/// Identity of a reactor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactorTag {
    /// Pool the reactor belongs to.
    pub pool: u64,
    /// Index of the reactor within its pool.
    pub index: usize,
}

/// Tag of the reactor running the current thread, if any.
pub fn current() -> Option<ReactorTag> {
    CURRENT.with(|c| c.get())
}

/// Whether the current thread is a reactor thread.
pub fn is_reactor_thread() -> bool {
    current().is_some()
}

/// Block the current thread until `future` completes.
///
/// Only legal off reactor threads; callers check [`is_reactor_thread`] first.
pub fn block_on<F: Future>(future: F) -> F::Output {
    futures::executor::block_on(future)
}

struct Reactor {
    handle: Handle,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

/// A fixed set of reactors.
pub(crate) struct ReactorPool {
    id: u64,
    reactors: Vec<Reactor>,
    next: AtomicUsize,
    running: Arc<AtomicUsize>,
}

impl ReactorPool {
    /// Start `count` reactor threads (at least one).
    pub(crate) fn start(count: usize, name_prefix: &str) -> Result<Self> {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let mut reactors = Vec::with_capacity(count.max(1));
        let running = Arc::new(AtomicUsize::new(0));

        for index in 0..count.max(1) {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            let handle = runtime.handle().clone();
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let tag = ReactorTag { pool: id, index };
            let alive = running.clone();

            alive.fetch_add(1, Ordering::AcqRel);
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", name_prefix, index))
                .spawn(move || {
                    CURRENT.with(|c| c.set(Some(tag)));
                    runtime.block_on(async {
                        let _ = shutdown_rx.await;
                    });
                    // Pending tasks are dropped with the runtime.
                    drop(runtime);
                    alive.fetch_sub(1, Ordering::AcqRel);
                    tracing::debug!("Reactor {} of pool {} stopped", index, id);
                });
            if let Err(e) = spawned {
                running.fetch_sub(1, Ordering::AcqRel);
                return Err(e.into());
            }

            reactors.push(Reactor {
                handle,
                shutdown: Mutex::new(Some(shutdown_tx)),
            });
        }

        tracing::debug!("Started {} reactors for pool {}", reactors.len(), id);
        Ok(Self {
            id,
            reactors,
            next: AtomicUsize::new(0),
            running,
        })
    }

    /// Number of reactor threads that have not exited yet.
    pub(crate) fn live(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn running(&self) -> Arc<AtomicUsize> {
        self.running.clone()
    }

    /// Number of reactors.
    pub(crate) fn len(&self) -> usize {
        self.reactors.len()
    }

    /// The reactor to bind new work to: the calling reactor if it belongs
    /// to this pool, the next one round-robin otherwise.
    pub(crate) fn pick(&self) -> usize {
        match current() {
            Some(tag) if tag.pool == self.id => tag.index,
            _ => self.next.fetch_add(1, Ordering::Relaxed) % self.reactors.len(),
        }
    }

    /// Spawn a task on reactor `index`.
    pub(crate) fn spawn<F>(&self, index: usize, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let reactor = &self.reactors[index % self.reactors.len()];
        drop(reactor.handle.spawn(future));
    }

    /// Signal every reactor to stop. Tasks still pending are dropped.
    pub(crate) fn shutdown(&self) {
        for reactor in &self.reactors {
            if let Some(tx) = reactor.shutdown.lock().take() {
                let _ = tx.send(());
            }
        }
    }
}

impl Drop for ReactorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_main_thread_is_not_a_reactor() {
        assert!(!is_reactor_thread());
        assert_eq!(current(), None);
    }

    #[test]
    fn test_spawned_work_runs_tagged() {
        let pool = ReactorPool::start(2, "test-reactor").unwrap();
        let (tx, rx) = oneshot::channel();

        pool.spawn(1, async move {
            let _ = tx.send((current(), std::thread::current().name().map(String::from)));
        });

        let (tag, name) = block_on(rx).unwrap();
        let tag = tag.unwrap();
        assert_eq!(tag.index, 1);
        assert_eq!(name.as_deref(), Some("test-reactor-1"));
    }

    #[test]
    fn test_pick_round_robin_off_reactor() {
        let pool = ReactorPool::start(3, "rr").unwrap();
        let picks: Vec<usize> = (0..6).map(|_| pool.pick()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_pick_prefers_calling_reactor() {
        let pool = std::sync::Arc::new(ReactorPool::start(3, "sticky").unwrap());
        let (tx, rx) = oneshot::channel();
        let inner = pool.clone();

        pool.spawn(2, async move {
            let _ = tx.send((inner.pick(), inner.pick()));
        });

        assert_eq!(block_on(rx).unwrap(), (2, 2));
    }

    #[test]
    fn test_timers_work_on_reactors() {
        let pool = ReactorPool::start(1, "timer").unwrap();
        let (tx, rx) = oneshot::channel();
        pool.spawn(0, async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(());
        });
        assert!(block_on(rx).is_ok());
    }

    #[test]
    fn test_threads_exit_after_drop() {
        let pool = ReactorPool::start(2, "exit").unwrap();
        let running = pool.running();
        assert_eq!(pool.live(), 2);

        drop(pool);
        for _ in 0..200 {
            if running.load(Ordering::Acquire) == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(running.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_zero_count_starts_one() {
        let pool = ReactorPool::start(0, "min").unwrap();
        assert_eq!(pool.len(), 1);
    }
}
