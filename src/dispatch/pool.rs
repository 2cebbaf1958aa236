//! Bounded worker pool running callback invocations off the delivery path.
//!
//! Each worker owns a bounded queue. Jobs are routed to a worker by hashing
//! their topic, so jobs for one topic run in submission order while
//! different topics run in parallel.
//!
//! When a worker's queue is full, [`WorkerPool::submit`] blocks the caller
//! (the transport delivery path) until space frees up. Backpressure then
//! reaches the broker instead of growing memory without bound.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::sync::{lock, read, write};

/// A unit of work.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Statistics from the worker pool.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs that ran to completion.
    pub jobs_run: u64,
    /// Jobs that panicked (the worker survives).
    pub jobs_panicked: u64,
    /// Submissions that had to wait for a full queue.
    pub saturated: u64,
}

#[derive(Default)]
struct Counters {
    jobs_run: AtomicU64,
    jobs_panicked: AtomicU64,
    saturated: AtomicU64,
}

/// Returned when submitting to a pool that has shut down. Carries the job back.
pub(crate) struct PoolClosed(pub(crate) Job);

pub(crate) struct WorkerPool {
    queues: RwLock<Option<Vec<SyncSender<Job>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    finished: Mutex<Receiver<()>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Spawn `workers` threads, each with a queue of `capacity` jobs.
    pub(crate) fn spawn(workers: usize, capacity: usize) -> std::io::Result<Self> {
        let counters = Arc::new(Counters::default());
        let (finished_tx, finished_rx) = channel();
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers.max(1) {
            let (tx, rx) = sync_channel::<Job>(capacity.max(1));
            let counters = Arc::clone(&counters);
            let finished = finished_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("switchboard-dispatch-{}", index))
                .spawn(move || {
                    for job in rx {
                        run_job(job, &counters);
                    }
                    let _ = finished.send(());
                })?;
            queues.push(tx);
            handles.push(handle);
        }

        debug!(workers = queues.len(), capacity, "dispatch pool started");
        Ok(Self {
            queues: RwLock::new(Some(queues)),
            workers: Mutex::new(handles),
            finished: Mutex::new(finished_rx),
            counters,
        })
    }

    /// Queue a job on the worker that owns `key`.
    pub(crate) fn submit(&self, key: &str, job: Job) -> Result<(), PoolClosed> {
        let queue = {
            let queues = read(&self.queues);
            match queues.as_ref() {
                Some(queues) => queues[worker_index(key, queues.len())].clone(),
                None => return Err(PoolClosed(job)),
            }
        };

        match queue.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                self.counters.saturated.fetch_add(1, Ordering::Relaxed);
                warn!(key, "dispatch queue full, blocking delivery until a worker frees up");
                queue.send(job).map_err(|e| PoolClosed(e.0))
            }
            Err(TrySendError::Disconnected(job)) => Err(PoolClosed(job)),
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            jobs_run: self.counters.jobs_run.load(Ordering::Relaxed),
            jobs_panicked: self.counters.jobs_panicked.load(Ordering::Relaxed),
            saturated: self.counters.saturated.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting jobs and wait up to `grace` for queued jobs to drain.
    ///
    /// Workers still busy after the grace period are detached.
    pub(crate) fn shutdown(&self, grace: Duration) {
        let Some(queues) = write(&self.queues).take() else {
            return;
        };
        let expected = queues.len();
        drop(queues);

        let deadline = Instant::now() + grace;
        let finished = lock(&self.finished);
        let mut drained = 0;
        while drained < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match finished.recv_timeout(remaining) {
                Ok(()) => drained += 1,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let handles: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        if drained == expected {
            for handle in handles {
                let _ = handle.join();
            }
            debug!("dispatch pool drained");
        } else {
            warn!(
                busy = expected - drained,
                ?grace,
                "dispatch workers still busy after grace period, detaching"
            );
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queues lets workers exit once they drain.
        write(&self.queues).take();
    }
}

fn worker_index(key: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

fn run_job(job: Job, counters: &Counters) {
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(()) => {
            counters.jobs_run.fetch_add(1, Ordering::Relaxed);
        }
        Err(panic) => {
            counters.jobs_panicked.fetch_add(1, Ordering::Relaxed);
            error!(panic = %panic_message(panic.as_ref()), "dispatch job panicked");
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
