use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// Runs storage work off the caller's thread.
///
/// Work submitted under the same key runs strictly in submission order; work
/// under different keys may run concurrently, bounded by the worker count.
/// Everything except [`spawn_ungated`](Self::spawn_ungated) waits behind a
/// barrier gate until [`open_gate`](Self::open_gate) is called.
pub struct KeyedExecutor<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for KeyedExecutor<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<K> {
    handle: Handle,
    lanes: Mutex<HashMap<K, Lane>>,
    workers: Arc<Semaphore>,
    gate: watch::Sender<bool>,
    next_ticket: AtomicU64,
}

/// Tail of one key's FIFO: the completion signal of the last submitted unit.
struct Lane {
    ticket: u64,
    tail: Option<oneshot::Receiver<()>>,
}

impl<K> KeyedExecutor<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Executor bound to the current tokio runtime.
    ///
    /// # Panics
    /// When called outside a tokio runtime.
    pub fn new(workers: usize) -> Self {
        Self::with_handle(Handle::current(), workers)
    }

    /// Executor bound to `handle`, so work can be submitted from threads that
    /// are not themselves runtime workers.
    pub fn with_handle(handle: Handle, workers: usize) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                handle,
                lanes: Mutex::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(workers.max(1))),
                gate,
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Releases everything queued behind the barrier. Idempotent.
    pub fn open_gate(&self) {
        self.inner.gate.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.inner.gate.borrow()
    }

    /// Resolves once the gate has been opened.
    pub async fn gate_opened(&self) {
        let mut gate = self.inner.gate.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = gate.wait_for(|open| *open).await;
    }

    /// Number of keys with queued or running work.
    pub fn active_lanes(&self) -> usize {
        self.lanes().len()
    }

    /// Queues `work` behind everything previously submitted under `key`.
    pub fn submit<F>(&self, key: K, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done, tail) = oneshot::channel();

        let predecessor = {
            let mut lanes = self.lanes();
            let lane = lanes.entry(key.clone()).or_insert(Lane {
                ticket,
                tail: None,
            });
            lane.ticket = ticket;
            lane.tail.replace(tail)
        };

        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            let _retire = LaneGuard {
                inner: Arc::clone(&inner),
                key,
                ticket,
                done: Some(done),
            };

            if let Some(predecessor) = predecessor {
                // A dropped sender means the predecessor finished or panicked.
                let _ = predecessor.await;
            }
            inner.run(work).await
        })
    }

    /// Resolves once every unit queued so far, under any key, has run.
    pub async fn drain(&self) {
        let keys: Vec<K> = self.lanes().keys().cloned().collect();
        let markers: Vec<_> = keys
            .into_iter()
            .map(|key| self.submit(key, async {}))
            .collect();
        for marker in join_all(markers).await {
            if let Err(e) = marker {
                debug!(error = %e, "Drain marker failed");
            }
        }
    }

    /// Gated work with no ordering relative to anything else.
    pub fn spawn<F>(&self, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move { inner.run(work).await })
    }

    /// Work that runs immediately, ignoring the gate. Used for the task that
    /// eventually opens it.
    pub fn spawn_ungated<F>(&self, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let workers = Arc::clone(&self.inner.workers);
        self.inner.handle.spawn(async move {
            let _permit = workers.acquire_owned().await.ok();
            work.await
        })
    }

    fn lanes(&self) -> std::sync::MutexGuard<'_, HashMap<K, Lane>> {
        self.inner
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> Inner<K> {
    async fn run<F: Future>(&self, work: F) -> F::Output {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let _permit = Arc::clone(&self.workers).acquire_owned().await.ok();
        work.await
    }
}

/// Signals the successor and drops the lane entry once the unit is done,
/// including when it panics.
struct LaneGuard<K: Eq + Hash> {
    inner: Arc<Inner<K>>,
    key: K,
    ticket: u64,
    done: Option<oneshot::Sender<()>>,
}

impl<K: Eq + Hash> Drop for LaneGuard<K> {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }

        let mut lanes = self
            .inner
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if lanes.get(&self.key).is_some_and(|lane| lane.ticket == self.ticket) {
            lanes.remove(&self.key);
            debug!(ticket = self.ticket, "Lane retired");
        }
    }
}
