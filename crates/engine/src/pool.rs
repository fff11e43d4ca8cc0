//! Bounded worker pool with a rendezvous for run completion.
//!
//! The orchestrator must not observe "no outstanding work" before every
//! task has been registered, so registration happens on the dispatching
//! side, before the task is spawned, and deregistration happens when
//! the task finishes (even if it panics). The outstanding count starts
//! at one for the orchestrator itself; waiting gives that registration
//! back and then blocks until the count drains to zero.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};

/// Counts outstanding units of work and lets one waiter block until
/// all of them have completed.
#[derive(Debug)]
pub struct WaitGroup {
    outstanding: AtomicUsize,
    drained: Notify,
}

impl WaitGroup {
    /// Create a wait group with the orchestrator already registered.
    pub fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(1),
            drained: Notify::new(),
        }
    }

    /// Register one unit of work. Must happen before the work is
    /// dispatched.
    pub fn add(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Deregister one unit of work.
    pub fn done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Give back the orchestrator's registration and block until the
    /// count reaches zero.
    pub async fn wait(&self) {
        self.done();
        loop {
            let notified = self.drained.notified();
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Deregisters on drop, so a panicking task still counts as completed.
struct WaitGuard(Arc<PoolInner>);

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.0.wait_group.done();
    }
}

#[derive(Debug)]
struct PoolInner {
    permits: Semaphore,
    wait_group: WaitGroup,
}

/// A worker pool running at most `workers` tasks at a time.
///
/// Tasks may spawn further tasks onto the same pool; [`WorkerPool::wait`]
/// returns only once every task dispatched by anyone has completed.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool with the given number of workers.
    pub fn new(workers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                permits: Semaphore::new(workers.max(1)),
                wait_group: WaitGroup::new(),
            }),
        }
    }

    /// Dispatch a task. Registration happens here, before the spawn.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.wait_group.add();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = WaitGuard(Arc::clone(&inner));
            // The semaphore is never closed, so acquisition only fails
            // if the pool is torn down mid-run; run unthrottled then.
            let _permit = inner.permits.acquire().await.ok();
            task.await;
        });
    }

    /// Block until all dispatched work (including work dispatched by
    /// tasks themselves) has completed.
    pub async fn wait(&self) {
        self.inner.wait_group.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_with_no_tasks_returns_immediately() {
        let pool = WorkerPool::new(4);
        pool.wait().await;
    }

    #[tokio::test]
    async fn wait_drains_all_tasks() {
        let pool = WorkerPool::new(4);
        let completed = Arc::new(AtomicU64::new(0));

        for _ in 0..100 {
            let completed = Arc::clone(&completed);
            pool.spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.wait().await;
        assert_eq!(completed.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let pool = WorkerPool::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..30 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            pool.spawn(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }

        pool.wait().await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn tasks_can_spawn_tasks() {
        let pool = WorkerPool::new(2);
        let completed = Arc::new(AtomicU64::new(0));

        for _ in 0..5 {
            let child_pool = pool.clone();
            let completed = Arc::clone(&completed);
            pool.spawn(async move {
                for _ in 0..4 {
                    let completed = Arc::clone(&completed);
                    child_pool.spawn(async move {
                        completed.fetch_add(1, Ordering::SeqCst);
                    });
                }
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.wait().await;
        assert_eq!(completed.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn panicking_task_still_deregisters() {
        let pool = WorkerPool::new(2);
        pool.spawn(async {
            panic!("task blew up");
        });
        pool.spawn(async {});
        // Must not hang.
        pool.wait().await;
    }

    #[tokio::test]
    async fn wait_group_rendezvous() {
        let wg = Arc::new(WaitGroup::new());

        wg.add();
        let worker = {
            let wg = Arc::clone(&wg);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                wg.done();
            })
        };

        wg.wait().await;
        worker.await.unwrap();
    }
}
