//! Fixed-size thread pool with a bounded job queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use super::error::{PoolError, PoolResult};
use crate::executor::{Executor, Job};

/// Default queue capacity multiplier per worker.
pub const DEFAULT_QUEUE_MULTIPLIER: usize = 100;

/// A queued job.
struct Queued {
    job: Job,
    queued_at: Instant,
}

/// State shared between the pool handle and its workers.
struct Shared {
    pending: AtomicUsize,
    /// Set when the drain deadline passed; workers drop queued jobs.
    cancelled: AtomicBool,
}

/// A thread pool for blocking work.
///
/// Workers pull jobs from a shared bounded queue. Submitting to a full queue
/// fails immediately instead of blocking the caller.
pub struct ThreadPool {
    /// `None` once the pool is shut down.
    job_tx: Mutex<Option<mpsc::SyncSender<Queued>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    queue_capacity: usize,
    shared: Arc<Shared>,
    shutdown: AtomicBool,
    name: String,
}

impl ThreadPool {
    /// Create a pool with auto-calculated queue capacity.
    ///
    /// `num_workers == 0` uses the CPU count.
    pub fn new(num_workers: usize, name: impl Into<String>) -> PoolResult<Self> {
        let num_workers = if num_workers == 0 {
            num_cpus::get()
        } else {
            num_workers
        };
        Self::with_capacity(num_workers, num_workers * DEFAULT_QUEUE_MULTIPLIER, name)
    }

    /// Create a pool with a custom queue capacity.
    ///
    /// Threads are named `{name}-{id}`.
    pub fn with_capacity(
        num_workers: usize,
        queue_capacity: usize,
        name: impl Into<String>,
    ) -> PoolResult<Self> {
        let name = name.into();
        let (job_tx, job_rx) = mpsc::sync_channel::<Queued>(queue_capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let shared = Arc::new(Shared {
            pending: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let rx = Arc::clone(&job_rx);
            let shared = Arc::clone(&shared);

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || worker_loop(id, rx, shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Workers already spawned exit once the sender is dropped.
                    drop(job_tx);
                    return Err(PoolError::Spawn(e.to_string()));
                }
            }
        }

        tracing::info!(
            pool = %name,
            workers = num_workers,
            capacity = queue_capacity,
            "thread pool created"
        );

        Ok(Self {
            job_tx: Mutex::new(Some(job_tx)),
            workers: Mutex::new(workers),
            worker_count: num_workers,
            queue_capacity,
            shared,
            shutdown: AtomicBool::new(false),
            name,
        })
    }

    /// Queue a job without waiting for it.
    pub fn submit(&self, job: Job) -> PoolResult<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(PoolError::Shutdown);
        }

        let guard = self.job_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(PoolError::Shutdown);
        };

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let queued = Queued {
            job,
            queued_at: Instant::now(),
        };

        if let Err(e) = tx.try_send(queued) {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            return match e {
                mpsc::TrySendError::Full(_) => Err(PoolError::QueueFull {
                    capacity: self.queue_capacity,
                    pending: self.pending_count(),
                }),
                mpsc::TrySendError::Disconnected(_) => Err(PoolError::Shutdown),
            };
        }
        Ok(())
    }

    /// Run `f` on a worker and await its result.
    pub async fn execute<F, R>(&self, f: F) -> PoolResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let _ = result_tx.send(f());
        }))?;

        result_rx.await.map_err(|_| PoolError::ChannelClosed)
    }

    /// Run `f` on a worker, giving up after `timeout`.
    ///
    /// The job keeps running on its worker when the timeout fires.
    pub async fn execute_with_timeout<F, R>(&self, f: F, timeout: Duration) -> PoolResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        match tokio::time::timeout(timeout, self.execute(f)).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout(timeout)),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Jobs queued but not yet picked up by a worker.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs. Queued jobs still run.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(pool = %self.name, pending = self.pending_count(), "shutting down thread pool");

        // Workers exit once the queue is drained and the sender is gone
        self.job_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Wait for all workers to finish (call after shutdown).
    pub fn join(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }

    /// Wait for workers up to `timeout`.
    ///
    /// When the deadline passes, jobs still in the queue are dropped and
    /// workers busy with a job are left to finish on their own. Returns
    /// `true` when every worker exited in time.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                workers.drain(..).partition(|worker| worker.is_finished());
            for worker in finished {
                let _ = worker.join();
            }
            *workers = running;

            if workers.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        self.shared.cancelled.store(true, Ordering::SeqCst);
        tracing::warn!(
            pool = %self.name,
            running = workers.len(),
            dropped = self.pending_count(),
            "drain timeout reached, cancelling queued jobs"
        );
        workers.clear();
        false
    }
}

impl Executor for ThreadPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, job: Job) -> PoolResult<()> {
        ThreadPool::submit(self, job)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread main loop.
fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<Queued>>>, shared: Arc<Shared>) {
    tracing::debug!(worker = id, "worker started");

    loop {
        let next = {
            let guard = rx.lock().unwrap_or_else(PoisonError::into_inner);
            guard.recv()
        };

        let Ok(Queued { job, queued_at }) = next else {
            // Channel closed, shutdown
            break;
        };
        shared.pending.fetch_sub(1, Ordering::SeqCst);

        if shared.cancelled.load(Ordering::SeqCst) {
            tracing::debug!(worker = id, "dropping cancelled job");
            continue;
        }

        tracing::trace!(worker = id, wait_us = queued_at.elapsed().as_micros() as u64, "job started");
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(worker = id, "job panicked");
        }
    }

    tracing::debug!(worker = id, "worker stopped");
}
